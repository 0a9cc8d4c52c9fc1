//! 模拟 GPU 的共享状态
//!
//! 单一的有序队列、真实的描述符内存、Fence 完成值，以及一份事件日志。
//! `GpuHandle` 可以跨线程克隆，测试通过它推进 GPU 或检查发生过的事情。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::core::config::{CompletionMode, HeadlessConfig};
use crate::core::error::{DistGfxError, Result};
use crate::gfx::backend::ResourceState;
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapType, GpuDescriptorHandle};

const CPU_ADDRESS_BASE: usize = 0x0010_0000;
const GPU_ADDRESS_BASE: u64 = 0x7f00_0000_0000;
/// 相邻两个堆的地址范围之间至少相隔这么多字节
const HEAP_ADDRESS_GAP: usize = 0x1_0000;

/// 模拟 GPU 上发生的事件，按发生顺序记录
#[derive(Debug, Clone, PartialEq)]
pub enum GpuEvent {
    HeapCreated {
        heap: usize,
        heap_type: DescriptorHeapType,
        slots: u32,
        shader_visible: bool,
    },
    DescriptorsCopied {
        count: u32,
        dst: usize,
        src: usize,
    },
    /// `completed` 是重置时所有 Fence 中最大的完成值
    AllocatorReset {
        allocator: u64,
        completed: u64,
    },
    CommandListReset {
        list: u64,
        allocator: u64,
    },
    CommandListClosed {
        list: u64,
    },
    HeapsBound {
        list: u64,
        heaps: Vec<usize>,
    },
    Transition {
        list: u64,
        resource: u64,
        before: ResourceState,
        after: ResourceState,
    },
    RenderTargetCleared {
        list: u64,
        handle: usize,
        color: [f32; 4],
    },
    DepthStencilCleared {
        list: u64,
        handle: usize,
        depth: f32,
    },
    Executed {
        list: u64,
    },
    Signaled {
        fence: u64,
        value: u64,
    },
    FenceCompleted {
        fence: u64,
        value: u64,
    },
    Presented {
        back_buffer: u32,
        sync_interval: u32,
    },
    CpuWait {
        fence: u64,
        value: u64,
    },
}

#[derive(Debug)]
enum QueuedWork {
    Execute { allocator: u64 },
    Signal { fence: u64, value: u64 },
}

pub(crate) struct HeapMemory {
    pub heap_type: DescriptorHeapType,
    pub cpu_start: usize,
    pub gpu_start: Option<u64>,
    pub increment: u32,
    pub slots: u32,
    pub bytes: Vec<u8>,
}

impl HeapMemory {
    fn byte_len(&self) -> usize {
        self.slots as usize * self.increment as usize
    }
}

pub(crate) struct ListState {
    pub allocator: u64,
    pub recording: bool,
}

pub(crate) struct SwapChainState {
    pub buffers: Vec<u64>,
    pub current: u32,
    pub width: u32,
    pub height: u32,
}

pub(crate) struct GpuState {
    next_id: u64,
    next_cpu_address: usize,
    next_gpu_address: u64,
    pub heaps: Vec<HeapMemory>,
    pub fences: HashMap<u64, u64>,
    /// 每个分配器上尚未完成的提交数量
    pub allocators: HashMap<u64, u32>,
    pub lists: HashMap<u64, ListState>,
    pub resources: HashMap<u64, ResourceState>,
    pub swap_chains: HashMap<u64, SwapChainState>,
    queue: VecDeque<QueuedWork>,
    pub events: Vec<GpuEvent>,
    pub validation_errors: Vec<String>,
    pub removed: Option<String>,
}

impl GpuState {
    fn new() -> Self {
        Self {
            next_id: 1,
            next_cpu_address: CPU_ADDRESS_BASE,
            next_gpu_address: GPU_ADDRESS_BASE,
            heaps: Vec::new(),
            fences: HashMap::new(),
            allocators: HashMap::new(),
            lists: HashMap::new(),
            resources: HashMap::new(),
            swap_chains: HashMap::new(),
            queue: VecDeque::new(),
            events: Vec::new(),
            validation_errors: Vec::new(),
            removed: None,
        }
    }

    pub fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn check_removed(&self) -> Result<()> {
        match &self.removed {
            Some(reason) => Err(crate::core::error::GraphicsError::DeviceRemoved(reason.clone()).into()),
            None => Ok(()),
        }
    }

    /// 分配一段与其他堆不重叠的地址范围
    pub fn add_heap(
        &mut self,
        heap_type: DescriptorHeapType,
        slots: u32,
        increment: u32,
        shader_visible: bool,
    ) -> usize {
        let byte_len = slots as usize * increment as usize;
        let cpu_start = self.next_cpu_address;
        self.next_cpu_address += byte_len + HEAP_ADDRESS_GAP;

        let gpu_start = shader_visible.then(|| {
            let start = self.next_gpu_address;
            self.next_gpu_address += (byte_len + HEAP_ADDRESS_GAP) as u64;
            start
        });

        self.heaps.push(HeapMemory {
            heap_type,
            cpu_start,
            gpu_start,
            increment,
            slots,
            bytes: vec![0; byte_len],
        });
        self.heaps.len() - 1
    }

    /// 查找 CPU 地址所在的堆，返回（堆索引，字节偏移）
    ///
    /// 地址必须对齐到槽位，且 `count` 个槽位全部落在堆内。
    pub fn locate_cpu(&self, address: usize, count: u32) -> Option<(usize, usize)> {
        self.heaps.iter().enumerate().find_map(|(index, heap)| {
            let offset = address.checked_sub(heap.cpu_start)?;
            let len = count as usize * heap.increment as usize;
            (offset % heap.increment as usize == 0 && offset + len <= heap.byte_len())
                .then_some((index, offset))
        })
    }

    pub fn locate_gpu(&self, address: u64, count: u32) -> Option<(usize, usize)> {
        self.heaps.iter().enumerate().find_map(|(index, heap)| {
            let offset = address.checked_sub(heap.gpu_start?)? as usize;
            let len = count as usize * heap.increment as usize;
            (offset % heap.increment as usize == 0 && offset + len <= heap.byte_len())
                .then_some((index, offset))
        })
    }

    /// 把数据写入一个描述符槽位，多余的字节被截断
    pub fn write_slot(&mut self, address: usize, payload: &[u8]) -> Result<()> {
        let (index, offset) = self
            .locate_cpu(address, 1)
            .ok_or_else(|| bad_address("CPU", address as u64))?;
        let heap = &mut self.heaps[index];
        let len = payload.len().min(heap.increment as usize);
        heap.bytes[offset..offset + heap.increment as usize].fill(0);
        heap.bytes[offset..offset + len].copy_from_slice(&payload[..len]);
        Ok(())
    }

    pub fn enqueue_execute(&mut self, allocator: u64) {
        *self.allocators.entry(allocator).or_insert(0) += 1;
        self.queue.push_back(QueuedWork::Execute { allocator });
    }

    pub fn enqueue_signal(&mut self, fence: u64, value: u64) {
        self.queue.push_back(QueuedWork::Signal { fence, value });
        self.events.push(GpuEvent::Signaled { fence, value });
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn completed(&self, fence: u64) -> u64 {
        self.fences.get(&fence).copied().unwrap_or(0)
    }

    pub fn max_completed(&self) -> u64 {
        self.fences.values().copied().max().unwrap_or(0)
    }

    /// GPU 按顺序完成队首的工作
    pub fn retire_next(&mut self) -> bool {
        let Some(work) = self.queue.pop_front() else {
            return false;
        };
        match work {
            QueuedWork::Execute { allocator } => {
                if let Some(in_flight) = self.allocators.get_mut(&allocator) {
                    *in_flight = in_flight.saturating_sub(1);
                }
            }
            QueuedWork::Signal { fence, value } => {
                let completed = self.fences.entry(fence).or_insert(0);
                *completed = (*completed).max(value);
                self.events.push(GpuEvent::FenceCompleted { fence, value });
                trace!(fence, value, "Headless fence completed");
            }
        }
        true
    }

    pub fn retire_all(&mut self) {
        while self.retire_next() {}
    }

    /// 完成直到 `fence` 达到 `value`，或队列为空
    pub fn retire_through(&mut self, fence: u64, value: u64) {
        while self.completed(fence) < value && self.retire_next() {}
    }

    /// 完成值为 `value` 的 signal 及其之前排队的所有工作
    ///
    /// 该 signal 已经完成或从未排队时返回 false。
    pub fn complete_signal(&mut self, value: u64) -> bool {
        let position = self
            .queue
            .iter()
            .position(|work| matches!(work, QueuedWork::Signal { value: v, .. } if *v == value));
        match position {
            Some(position) => {
                for _ in 0..=position {
                    self.retire_next();
                }
                true
            }
            None => false,
        }
    }
}

fn bad_address(kind: &str, address: u64) -> DistGfxError {
    DistGfxError::Runtime(format!("{} descriptor address {:#x} is not inside any heap", kind, address))
}

pub(crate) struct Shared {
    state: Mutex<GpuState>,
    retired: Condvar,
    pub mode: CompletionMode,
    pub wait_timeout: Duration,
}

/// 模拟 GPU 的共享句柄
///
/// 可以克隆并发送到其他线程；`Manual` 模式下由它推进 Fence。
#[derive(Clone)]
pub struct GpuHandle {
    shared: Arc<Shared>,
}

impl GpuHandle {
    pub(crate) fn new(config: &HeadlessConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(GpuState::new()),
                retired: Condvar::new(),
                mode: config.completion,
                wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn retired(&self) -> &Condvar {
        &self.shared.retired
    }

    /// GPU 完成模式
    pub fn mode(&self) -> CompletionMode {
        self.shared.mode
    }

    /// GPU 完成值为 `value` 的 signal 及其之前的所有工作
    pub fn complete(&self, value: u64) -> bool {
        let completed = self.lock().complete_signal(value);
        self.shared.retired.notify_all();
        completed
    }

    /// GPU 完成所有排队的工作
    pub fn complete_all(&self) {
        self.lock().retire_all();
        self.shared.retired.notify_all();
    }

    /// 队列中尚未完成的工作数量
    pub fn pending(&self) -> usize {
        self.lock().pending()
    }

    /// 所有 Fence 中最大的完成值
    pub fn max_completed(&self) -> u64 {
        self.lock().max_completed()
    }

    /// 事件日志快照
    pub fn events(&self) -> Vec<GpuEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// 类似调试层报告的 API 误用
    pub fn validation_errors(&self) -> Vec<String> {
        self.lock().validation_errors.clone()
    }

    /// 模拟设备丢失；之后所有队列操作都返回 `DeviceRemoved`
    pub fn remove_device(&self, reason: &str) {
        self.lock().removed = Some(reason.to_string());
        self.shared.retired.notify_all();
    }

    /// 直接写入一个描述符槽位
    pub fn write_descriptor(&self, handle: CpuDescriptorHandle, payload: &[u8]) -> Result<()> {
        self.lock().write_slot(handle.ptr, payload)
    }

    /// 通过 CPU 地址读取 `count` 个描述符的原始字节
    pub fn read_descriptors_cpu(&self, handle: CpuDescriptorHandle, count: u32) -> Result<Vec<u8>> {
        let state = self.lock();
        let (index, offset) = state
            .locate_cpu(handle.ptr, count)
            .ok_or_else(|| bad_address("CPU", handle.ptr as u64))?;
        let heap = &state.heaps[index];
        let len = count as usize * heap.increment as usize;
        Ok(heap.bytes[offset..offset + len].to_vec())
    }

    /// 通过 GPU 地址读取 `count` 个描述符的原始字节（着色器看到的内容）
    pub fn read_descriptors_gpu(&self, handle: GpuDescriptorHandle, count: u32) -> Result<Vec<u8>> {
        let state = self.lock();
        let (index, offset) = state
            .locate_gpu(handle.ptr, count)
            .ok_or_else(|| bad_address("GPU", handle.ptr))?;
        let heap = &state.heaps[index];
        let len = count as usize * heap.increment as usize;
        Ok(heap.bytes[offset..offset + len].to_vec())
    }
}
