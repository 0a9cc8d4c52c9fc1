//! 无头设备
//!
//! 在没有显卡和窗口的环境中实现 `GpuDevice`。命令不做任何渲染，
//! 但队列顺序、Fence 语义、分配器的在途检查和描述符内存都与真实设备一致。

use std::sync::PoisonError;

use tracing::{debug, warn};

use super::gpu::{GpuEvent, GpuHandle, SwapChainState};
use crate::core::config::{CompletionMode, HeadlessConfig};
use crate::core::error::{DistGfxError, GraphicsError, Result};
use crate::gfx::backend::{GpuDevice, NativeDescriptorHeap, ResourceState, SwapChainDescriptor, WindowProvider};
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle,
};
use crate::renderer::sync::MAX_BACK_BUFFERS;

const RTV_TAG: u8 = 0x52;
const DSV_TAG: u8 = 0x44;

/// 描述符堆（`GpuState::heaps` 中的索引）
#[derive(Debug)]
pub struct HeadlessHeap {
    pub index: usize,
}

/// GPU 资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessResource {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct HeadlessQueue {
    pub id: u64,
}

#[derive(Debug)]
pub struct HeadlessAllocator {
    pub id: u64,
}

#[derive(Debug)]
pub struct HeadlessCommandList {
    pub id: u64,
}

#[derive(Debug)]
pub struct HeadlessSwapChain {
    pub id: u64,
}

#[derive(Debug)]
pub struct HeadlessFence {
    pub id: u64,
}

#[derive(Debug)]
pub struct HeadlessFenceEvent;

/// 模拟 GPU 设备
pub struct HeadlessDevice {
    gpu: GpuHandle,
}

impl HeadlessDevice {
    pub fn new(config: &HeadlessConfig) -> Self {
        debug!(completion = ?config.completion, "Headless device created");
        Self {
            gpu: GpuHandle::new(config),
        }
    }

    /// 以指定完成模式创建
    pub fn with_completion(completion: CompletionMode) -> Self {
        Self::new(&HeadlessConfig {
            completion,
            ..HeadlessConfig::default()
        })
    }

    /// 获取共享 GPU 句柄
    pub fn gpu(&self) -> GpuHandle {
        self.gpu.clone()
    }

    fn validate_recording(&self, list: &HeadlessCommandList, command: &str) -> bool {
        let mut state = self.gpu.lock();
        let recording = state.lists.get(&list.id).is_some_and(|l| l.recording);
        if !recording {
            let message = format!("{} recorded into closed command list {}", command, list.id);
            warn!("{}", message);
            state.validation_errors.push(message);
        }
        recording
    }

    fn write_view(&self, handle: CpuDescriptorHandle, tag: u8, resource: &HeadlessResource) {
        let mut payload = vec![tag];
        payload.extend_from_slice(&resource.id.to_le_bytes());
        let mut state = self.gpu.lock();
        if let Err(e) = state.write_slot(handle.ptr, &payload) {
            state.validation_errors.push(e.to_string());
        }
    }
}

fn command_error(message: String) -> DistGfxError {
    GraphicsError::CommandExecution(message).into()
}

impl GpuDevice for HeadlessDevice {
    type DescriptorHeap = HeadlessHeap;
    type Resource = HeadlessResource;
    type CommandQueue = HeadlessQueue;
    type CommandAllocator = HeadlessAllocator;
    type CommandList = HeadlessCommandList;
    type SwapChain = HeadlessSwapChain;
    type Fence = HeadlessFence;
    type FenceEvent = HeadlessFenceEvent;

    fn backend_name(&self) -> &'static str {
        "Headless"
    }

    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::RenderTarget | DescriptorHeapType::CbvSrvUav => 32,
            DescriptorHeapType::DepthStencil | DescriptorHeapType::Sampler => 16,
        }
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<NativeDescriptorHeap<HeadlessHeap>> {
        if desc.shader_visible && !desc.heap_type.can_be_shader_visible() {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} heap cannot be shader visible",
                desc.heap_type.name()
            ))
            .into());
        }

        let slots = desc.native_slot_count();
        let increment = self.descriptor_increment_size(desc.heap_type);
        let mut state = self.gpu.lock();
        let index = state.add_heap(desc.heap_type, slots, increment, desc.shader_visible);
        state.events.push(GpuEvent::HeapCreated {
            heap: index,
            heap_type: desc.heap_type,
            slots,
            shader_visible: desc.shader_visible,
        });

        let heap = &state.heaps[index];
        Ok(NativeDescriptorHeap {
            cpu_start: CpuDescriptorHandle::new(heap.cpu_start),
            gpu_start: heap.gpu_start.map(GpuDescriptorHandle::new),
            heap: HeadlessHeap { index },
        })
    }

    fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        heap_type: DescriptorHeapType,
    ) {
        let mut state = self.gpu.lock();
        let (src_heap, dst_heap) = match (state.locate_cpu(src.ptr, count), state.locate_cpu(dst.ptr, count)) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                state
                    .validation_errors
                    .push(format!("copy of {} descriptors from {:#x} to {:#x} out of range", count, src.ptr, dst.ptr));
                return;
            }
        };

        if state.heaps[src_heap.0].heap_type != heap_type || state.heaps[dst_heap.0].heap_type != heap_type {
            state
                .validation_errors
                .push(format!("copy of {} descriptors across heap types", heap_type.name()));
            return;
        }

        let len = count as usize * state.heaps[src_heap.0].increment as usize;
        let bytes = state.heaps[src_heap.0].bytes[src_heap.1..src_heap.1 + len].to_vec();
        state.heaps[dst_heap.0].bytes[dst_heap.1..dst_heap.1 + len].copy_from_slice(&bytes);
        state.events.push(GpuEvent::DescriptorsCopied {
            count,
            dst: dst.ptr,
            src: src.ptr,
        });
    }

    fn create_render_target_view(&self, resource: &HeadlessResource, handle: CpuDescriptorHandle) {
        self.write_view(handle, RTV_TAG, resource);
    }

    fn create_depth_stencil_view(&self, resource: &HeadlessResource, handle: CpuDescriptorHandle) {
        self.write_view(handle, DSV_TAG, resource);
    }

    fn create_command_queue(&self) -> Result<HeadlessQueue> {
        let mut state = self.gpu.lock();
        Ok(HeadlessQueue { id: state.alloc_id() })
    }

    fn create_swap_chain(
        &self,
        _queue: &HeadlessQueue,
        _window: &dyn WindowProvider,
        desc: &SwapChainDescriptor,
    ) -> Result<HeadlessSwapChain> {
        if desc.buffer_count < 2 || desc.buffer_count as usize > MAX_BACK_BUFFERS {
            return Err(GraphicsError::SwapchainError(format!(
                "buffer count {} out of range 2..={}",
                desc.buffer_count, MAX_BACK_BUFFERS
            ))
            .into());
        }

        let mut state = self.gpu.lock();
        let buffers: Vec<u64> = (0..desc.buffer_count)
            .map(|_| {
                let id = state.alloc_id();
                state.resources.insert(id, ResourceState::Present);
                id
            })
            .collect();
        let id = state.alloc_id();
        state.swap_chains.insert(
            id,
            SwapChainState {
                buffers,
                current: 0,
                width: desc.width,
                height: desc.height,
            },
        );
        Ok(HeadlessSwapChain { id })
    }

    fn swap_chain_buffer(&self, swap_chain: &HeadlessSwapChain, index: u32) -> Result<HeadlessResource> {
        let state = self.gpu.lock();
        state
            .swap_chains
            .get(&swap_chain.id)
            .and_then(|sc| {
                sc.buffers.get(index as usize).map(|&id| HeadlessResource {
                    id,
                    width: sc.width,
                    height: sc.height,
                })
            })
            .ok_or_else(|| GraphicsError::SwapchainError(format!("no back buffer {}", index)).into())
    }

    fn current_back_buffer_index(&self, swap_chain: &HeadlessSwapChain) -> u32 {
        self.gpu
            .lock()
            .swap_chains
            .get(&swap_chain.id)
            .map_or(0, |sc| sc.current)
    }

    fn present(&self, swap_chain: &HeadlessSwapChain, sync_interval: u32) -> Result<()> {
        let mut state = self.gpu.lock();
        state.check_removed()?;

        let (back_buffer, buffer) = {
            let sc = state
                .swap_chains
                .get_mut(&swap_chain.id)
                .ok_or_else(|| GraphicsError::SwapchainError("unknown swap chain".to_string()))?;
            let current = sc.current;
            let buffer = sc.buffers[current as usize];
            sc.current = (current + 1) % sc.buffers.len() as u32;
            (current, buffer)
        };

        if state.resources.get(&buffer) != Some(&ResourceState::Present) {
            state
                .validation_errors
                .push(format!("back buffer {} presented while not in Present state", back_buffer));
        }
        state.events.push(GpuEvent::Presented {
            back_buffer,
            sync_interval,
        });
        Ok(())
    }

    fn create_depth_stencil_buffer(&self, width: u32, height: u32) -> Result<HeadlessResource> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::ResourceCreation("depth buffer with zero extent".to_string()).into());
        }
        let mut state = self.gpu.lock();
        let id = state.alloc_id();
        state.resources.insert(id, ResourceState::DepthWrite);
        Ok(HeadlessResource { id, width, height })
    }

    fn create_command_allocator(&self) -> Result<HeadlessAllocator> {
        let mut state = self.gpu.lock();
        let id = state.alloc_id();
        state.allocators.insert(id, 0);
        Ok(HeadlessAllocator { id })
    }

    fn create_command_list(&self, allocator: &HeadlessAllocator) -> Result<HeadlessCommandList> {
        let mut state = self.gpu.lock();
        let id = state.alloc_id();
        state.lists.insert(
            id,
            super::gpu::ListState {
                allocator: allocator.id,
                recording: false,
            },
        );
        Ok(HeadlessCommandList { id })
    }

    fn reset_command_allocator(&self, allocator: &HeadlessAllocator) -> Result<()> {
        let mut state = self.gpu.lock();
        state.check_removed()?;

        let in_flight = state.allocators.get(&allocator.id).copied().unwrap_or(0);
        if in_flight > 0 {
            return Err(command_error(format!(
                "command allocator {} reset while {} submission(s) are still executing",
                allocator.id, in_flight
            )));
        }
        if state
            .lists
            .values()
            .any(|l| l.allocator == allocator.id && l.recording)
        {
            return Err(command_error(format!(
                "command allocator {} reset while a command list is recording into it",
                allocator.id
            )));
        }

        let completed = state.max_completed();
        state.events.push(GpuEvent::AllocatorReset {
            allocator: allocator.id,
            completed,
        });
        Ok(())
    }

    fn reset_command_list(&self, list: &HeadlessCommandList, allocator: &HeadlessAllocator) -> Result<()> {
        let mut state = self.gpu.lock();
        let entry = state
            .lists
            .get_mut(&list.id)
            .ok_or_else(|| command_error(format!("unknown command list {}", list.id)))?;
        if entry.recording {
            return Err(command_error(format!("command list {} reset while recording", list.id)));
        }
        entry.recording = true;
        entry.allocator = allocator.id;
        state.events.push(GpuEvent::CommandListReset {
            list: list.id,
            allocator: allocator.id,
        });
        Ok(())
    }

    fn close_command_list(&self, list: &HeadlessCommandList) -> Result<()> {
        let mut state = self.gpu.lock();
        let entry = state
            .lists
            .get_mut(&list.id)
            .ok_or_else(|| command_error(format!("unknown command list {}", list.id)))?;
        if !entry.recording {
            return Err(command_error(format!("command list {} closed twice", list.id)));
        }
        entry.recording = false;
        state.events.push(GpuEvent::CommandListClosed { list: list.id });
        Ok(())
    }

    fn execute_command_list(&self, _queue: &HeadlessQueue, list: &HeadlessCommandList) -> Result<()> {
        let mut state = self.gpu.lock();
        state.check_removed()?;

        let allocator = match state.lists.get(&list.id) {
            Some(l) if !l.recording => l.allocator,
            Some(_) => return Err(command_error(format!("command list {} executed while open", list.id))),
            None => return Err(command_error(format!("unknown command list {}", list.id))),
        };
        state.enqueue_execute(allocator);
        state.events.push(GpuEvent::Executed { list: list.id });
        Ok(())
    }

    fn set_descriptor_heaps(&self, list: &HeadlessCommandList, heaps: &[&HeadlessHeap]) {
        if !self.validate_recording(list, "SetDescriptorHeaps") {
            return;
        }
        let mut state = self.gpu.lock();
        for heap in heaps {
            if state.heaps[heap.index].gpu_start.is_none() {
                let message = format!("heap {} bound but not shader visible", heap.index);
                state.validation_errors.push(message);
            }
        }
        state.events.push(GpuEvent::HeapsBound {
            list: list.id,
            heaps: heaps.iter().map(|h| h.index).collect(),
        });
    }

    fn transition(
        &self,
        list: &HeadlessCommandList,
        resource: &HeadlessResource,
        before: ResourceState,
        after: ResourceState,
    ) {
        if !self.validate_recording(list, "ResourceBarrier") {
            return;
        }
        let mut state = self.gpu.lock();
        let current = state.resources.get(&resource.id).copied();
        if current != Some(before) {
            let message = format!(
                "resource {} transitioned from {:?} but is in {:?}",
                resource.id, before, current
            );
            state.validation_errors.push(message);
        }
        state.resources.insert(resource.id, after);
        state.events.push(GpuEvent::Transition {
            list: list.id,
            resource: resource.id,
            before,
            after,
        });
    }

    fn clear_render_target(&self, list: &HeadlessCommandList, handle: CpuDescriptorHandle, color: [f32; 4]) {
        if !self.validate_recording(list, "ClearRenderTargetView") {
            return;
        }
        let mut state = self.gpu.lock();
        let valid = state
            .locate_cpu(handle.ptr, 1)
            .is_some_and(|(index, _)| state.heaps[index].heap_type == DescriptorHeapType::RenderTarget);
        if !valid {
            state
                .validation_errors
                .push(format!("{:#x} is not a render target view", handle.ptr));
        }
        state.events.push(GpuEvent::RenderTargetCleared {
            list: list.id,
            handle: handle.ptr,
            color,
        });
    }

    fn clear_depth_stencil(&self, list: &HeadlessCommandList, handle: CpuDescriptorHandle, depth: f32) {
        if !self.validate_recording(list, "ClearDepthStencilView") {
            return;
        }
        let mut state = self.gpu.lock();
        let valid = state
            .locate_cpu(handle.ptr, 1)
            .is_some_and(|(index, _)| state.heaps[index].heap_type == DescriptorHeapType::DepthStencil);
        if !valid {
            state
                .validation_errors
                .push(format!("{:#x} is not a depth stencil view", handle.ptr));
        }
        state.events.push(GpuEvent::DepthStencilCleared {
            list: list.id,
            handle: handle.ptr,
            depth,
        });
    }

    fn create_fence(&self, initial_value: u64) -> Result<HeadlessFence> {
        let mut state = self.gpu.lock();
        let id = state.alloc_id();
        state.fences.insert(id, initial_value);
        Ok(HeadlessFence { id })
    }

    fn create_fence_event(&self) -> Result<HeadlessFenceEvent> {
        Ok(HeadlessFenceEvent)
    }

    fn signal(&self, _queue: &HeadlessQueue, fence: &HeadlessFence, value: u64) -> Result<()> {
        let mut state = self.gpu.lock();
        state.check_removed()?;
        state.enqueue_signal(fence.id, value);

        if self.gpu.mode() == CompletionMode::Eager {
            state.retire_all();
            drop(state);
            self.gpu.retired().notify_all();
        }
        Ok(())
    }

    fn completed_value(&self, fence: &HeadlessFence) -> u64 {
        let state = self.gpu.lock();
        // 与 D3D12 一致：设备丢失后返回 u64::MAX
        if state.removed.is_some() {
            return u64::MAX;
        }
        state.completed(fence.id)
    }

    fn wait_for_value(&self, fence: &HeadlessFence, _event: &HeadlessFenceEvent, value: u64) -> Result<()> {
        let mut state = self.gpu.lock();
        state.check_removed()?;
        state.events.push(GpuEvent::CpuWait { fence: fence.id, value });

        match self.gpu.mode() {
            CompletionMode::Eager | CompletionMode::OnWait => {
                state.retire_through(fence.id, value);
            }
            CompletionMode::Manual => {
                let timeout = self.gpu.shared().wait_timeout;
                let (guard, result) = self
                    .gpu
                    .retired()
                    .wait_timeout_while(state, timeout, |s| {
                        s.removed.is_none() && s.completed(fence.id) < value
                    })
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
                state.check_removed()?;
                if result.timed_out() && state.completed(fence.id) < value {
                    return Err(GraphicsError::FenceWait(format!(
                        "timed out after {:?} waiting for fence value {} (completed {})",
                        timeout,
                        value,
                        state.completed(fence.id)
                    ))
                    .into());
                }
            }
        }

        let completed = state.completed(fence.id);
        if completed < value {
            return Err(GraphicsError::FenceWait(format!(
                "fence value {} was never signaled (completed {})",
                value, completed
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_list(device: &HeadlessDevice) -> (HeadlessAllocator, HeadlessCommandList) {
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(&allocator).unwrap();
        device.reset_command_list(&list, &allocator).unwrap();
        (allocator, list)
    }

    #[test]
    fn test_heap_address_ranges_are_disjoint() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let desc = DescriptorHeapDescriptor::new(DescriptorHeapType::CbvSrvUav, 8).per_frame();
        let a = device.create_descriptor_heap(&desc).unwrap();
        let b = device.create_descriptor_heap(&desc).unwrap();

        let inc = device.descriptor_increment_size(DescriptorHeapType::CbvSrvUav) as usize;
        assert!(a.cpu_start.ptr + 9 * inc <= b.cpu_start.ptr);
        assert!(a.gpu_start.unwrap().ptr < b.gpu_start.unwrap().ptr);
    }

    #[test]
    fn test_on_wait_retires_in_order() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();
        let event = device.create_fence_event().unwrap();

        device.signal(&queue, &fence, 1).unwrap();
        device.signal(&queue, &fence, 2).unwrap();
        assert_eq!(device.completed_value(&fence), 0);

        device.wait_for_value(&fence, &event, 1).unwrap();
        assert_eq!(device.completed_value(&fence), 1);
        assert_eq!(gpu.pending(), 1);

        assert!(device.wait_for_value(&fence, &event, 3).is_err());
    }

    #[test]
    fn test_eager_completes_at_signal() {
        let device = HeadlessDevice::with_completion(CompletionMode::Eager);
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();

        device.signal(&queue, &fence, 7).unwrap();
        assert_eq!(device.completed_value(&fence), 7);
    }

    #[test]
    fn test_completed_value_is_running_max() {
        let device = HeadlessDevice::with_completion(CompletionMode::Manual);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();

        for value in 1..=3 {
            device.signal(&queue, &fence, value).unwrap();
        }
        assert!(gpu.complete(3));
        assert!(!gpu.complete(1));
        assert_eq!(device.completed_value(&fence), 3);
        assert_eq!(gpu.pending(), 0);
    }

    #[test]
    fn test_allocator_reset_rejected_while_in_flight() {
        let device = HeadlessDevice::with_completion(CompletionMode::Manual);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let (allocator, list) = open_list(&device);

        device.close_command_list(&list).unwrap();
        device.execute_command_list(&queue, &list).unwrap();
        assert!(device.reset_command_allocator(&allocator).is_err());

        gpu.complete_all();
        device.reset_command_allocator(&allocator).unwrap();
    }

    #[test]
    fn test_command_list_state_validation() {
        let device = HeadlessDevice::with_completion(CompletionMode::Eager);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let (allocator, list) = open_list(&device);

        assert!(device.reset_command_list(&list, &allocator).is_err());
        assert!(device.execute_command_list(&queue, &list).is_err());
        device.close_command_list(&list).unwrap();
        assert!(device.close_command_list(&list).is_err());

        device.clear_depth_stencil(&list, CpuDescriptorHandle::new(0), 1.0);
        assert_eq!(gpu.validation_errors().len(), 1);
    }

    #[test]
    fn test_descriptor_copy_and_readback() {
        let device = HeadlessDevice::with_completion(CompletionMode::Eager);
        let gpu = device.gpu();
        let cpu = device
            .create_descriptor_heap(&DescriptorHeapDescriptor::new(DescriptorHeapType::Sampler, 4))
            .unwrap();
        let shader = device
            .create_descriptor_heap(&DescriptorHeapDescriptor::new(DescriptorHeapType::Sampler, 4).per_frame())
            .unwrap();

        gpu.write_descriptor(cpu.cpu_start, b"linear-wrap").unwrap();
        device.copy_descriptors(1, shader.cpu_start, cpu.cpu_start, DescriptorHeapType::Sampler);

        let seen = gpu.read_descriptors_gpu(shader.gpu_start.unwrap(), 1).unwrap();
        assert_eq!(&seen[..11], b"linear-wrap");
        assert_eq!(seen, gpu.read_descriptors_cpu(cpu.cpu_start, 1).unwrap());
    }

    #[test]
    fn test_device_removed() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let fence = device.create_fence(0).unwrap();

        gpu.remove_device("TDR");
        assert_eq!(device.completed_value(&fence), u64::MAX);
        let err = device.signal(&queue, &fence, 1).unwrap_err();
        assert!(matches!(err, DistGfxError::Graphics(GraphicsError::DeviceRemoved(_))));
    }
}
