//! 描述符堆管理模块
//!
//! 每个描述符堆都是固定容量的线性（bump）分配器：帧内只增不减，
//! 逐帧作用域的着色器可见堆在复用其帧槽位时整体归零。
//! GPU 可见的描述符表在一帧内只写一次、录制期间只读，
//! 因此不需要空闲链表或逐个释放。
//!
//! # 堆的种类
//!
//! - **RTV**：交换链缓冲的渲染目标视图，容量等于缓冲数量，永不重置
//! - **DSV**：深度模板视图，容量为 1，永不重置
//! - **CBV/SRV/UAV**：一个持久的 CPU 堆 + 每个帧槽位一个着色器可见堆
//! - **Sampler**：同上
//!
//! `DescriptorHeapRegistry` 根据（类型，可见性，帧槽位）选出唯一的堆实例，
//! 首次请求时按容量策略惰性创建。

use tracing::{debug, trace};

use crate::core::config::DescriptorConfig;
use crate::core::error::{DistGfxError, Result};
use crate::gfx::backend::GpuDevice;
use crate::renderer::sync::FRAMES_IN_FLIGHT;

/// 原生堆额外保留、永不分配出去的槽位数
///
/// 分配检查使用严格小于：`size + count < capacity + GUARD_SLOTS`。
pub const GUARD_SLOTS: u32 = 1;

/// 单个 CBV/SRV/UAV 堆的容量上限（D3D12 资源绑定层级 1/2 的着色器可见上限）
pub const MAX_CBV_SRV_UAV_DESCRIPTORS: u32 = 1_000_000;

/// 单个采样器堆的容量上限
pub const MAX_SAMPLER_DESCRIPTORS: u32 = 2048;

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// 渲染目标视图 (RTV)
    RenderTarget,
    /// 深度模板视图 (DSV)
    DepthStencil,
    /// 常量缓冲 / 着色资源 / 无序访问视图
    CbvSrvUav,
    /// 采样器
    Sampler,
}

impl DescriptorHeapType {
    /// 该类型的堆能否对着色器可见
    pub fn can_be_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }

    /// 获取堆类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapType::RenderTarget => "RTV",
            DescriptorHeapType::DepthStencil => "DSV",
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "Sampler",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapDescriptor {
    /// 堆类型
    pub heap_type: DescriptorHeapType,
    /// 调用方可用的描述符数量（不含保护槽位）
    pub capacity: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 是否逐帧重置
    pub frame_scoped: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDescriptor {
    /// 创建 CPU 可见、持久的堆描述
    pub fn new(heap_type: DescriptorHeapType, capacity: u32) -> Self {
        Self {
            heap_type,
            capacity,
            shader_visible: false,
            frame_scoped: false,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置为着色器可见、逐帧重置的堆
    pub fn per_frame(mut self) -> Self {
        self.shader_visible = true;
        self.frame_scoped = true;
        self
    }

    /// 原生堆的槽位数量
    pub fn native_slot_count(&self) -> u32 {
        self.capacity.saturating_add(GUARD_SLOTS)
    }

    /// 创建 RTV 堆描述
    pub fn rtv(capacity: u32) -> Self {
        Self::new(DescriptorHeapType::RenderTarget, capacity).with_name("RTV Heap")
    }

    /// 创建 DSV 堆描述
    pub fn dsv(capacity: u32) -> Self {
        Self::new(DescriptorHeapType::DepthStencil, capacity).with_name("DSV Heap")
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize) -> Self {
        Self { ptr }
    }

    /// 偏移 `count` 个描述符
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64) -> Self {
        Self { ptr }
    }

    /// 偏移 `count` 个描述符
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
        }
    }
}

/// 着色器可见分配的句柄对，CPU 与 GPU 地址指向同一偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHandlePair {
    pub cpu: CpuDescriptorHandle,
    pub gpu: GpuDescriptorHandle,
}

/// 描述符堆
///
/// `size` 是本轮已使用的槽位数，`capacity` 在创建时固定。
/// 任何时刻都满足 `size <= capacity`，越界分配直接 panic：
/// 描述符耗尽是容量配置错误，不是可恢复的运行时状态。
pub struct DescriptorHeap<H> {
    native: H,
    heap_type: DescriptorHeapType,
    name: String,
    shader_visible: bool,
    frame_scoped: bool,
    cpu_start: CpuDescriptorHandle,
    gpu_start: Option<GpuDescriptorHandle>,
    increment_size: u32,
    size: u32,
    capacity: u32,
}

impl<H> DescriptorHeap<H> {
    /// 通过设备创建原生堆并包装
    pub fn create<D>(device: &D, desc: &DescriptorHeapDescriptor) -> Result<Self>
    where
        D: GpuDevice<DescriptorHeap = H>,
    {
        if desc.shader_visible && !desc.heap_type.can_be_shader_visible() {
            return Err(DistGfxError::Runtime(format!(
                "{} heaps cannot be shader visible",
                desc.heap_type.name()
            )));
        }

        let native = device.create_descriptor_heap(desc)?;
        if desc.shader_visible && native.gpu_start.is_none() {
            return Err(DistGfxError::Runtime(format!(
                "Device returned no GPU start for shader visible {} heap",
                desc.heap_type.name()
            )));
        }
        let increment_size = device.descriptor_increment_size(desc.heap_type);

        let heap = Self {
            native: native.heap,
            heap_type: desc.heap_type,
            name: desc
                .name
                .clone()
                .unwrap_or_else(|| format!("{} Heap", desc.heap_type.name())),
            shader_visible: desc.shader_visible,
            frame_scoped: desc.frame_scoped,
            cpu_start: native.cpu_start,
            gpu_start: native.gpu_start,
            increment_size,
            size: 0,
            capacity: desc.capacity,
        };

        debug!(
            heap = %heap.name,
            capacity = heap.capacity,
            increment_size,
            shader_visible = heap.shader_visible,
            "Descriptor heap created"
        );

        Ok(heap)
    }

    /// 分配 `count` 个连续槽位，返回第一个槽位的 CPU 句柄
    ///
    /// # Panics
    ///
    /// 当 `size + count` 超过容量时 panic。
    pub fn allocate(&mut self, count: u32) -> CpuDescriptorHandle {
        let offset = self.reserve(count);
        self.cpu_start.offset(offset, self.increment_size)
    }

    /// 分配 `count` 个连续槽位，同时返回同一偏移的 GPU 句柄
    ///
    /// # Panics
    ///
    /// 堆不是着色器可见的，或容量不足时 panic。
    pub fn allocate_gpu_visible(&mut self, count: u32) -> DescriptorHandlePair {
        let gpu_start = match self.gpu_start {
            Some(start) => start,
            None => panic!("{} is not shader visible", self.name),
        };
        let offset = self.reserve(count);
        DescriptorHandlePair {
            cpu: self.cpu_start.offset(offset, self.increment_size),
            gpu: gpu_start.offset(offset, self.increment_size),
        }
    }

    fn reserve(&mut self, count: u32) -> u32 {
        let limit = self.capacity.saturating_add(GUARD_SLOTS);
        assert!(
            self.size.checked_add(count).is_some_and(|end| end < limit),
            "Descriptor heap '{}' exhausted: {} used + {} requested, capacity {}",
            self.name,
            self.size,
            count,
            self.capacity
        );
        let offset = self.size;
        self.size += count;
        trace!(heap = %self.name, offset, count, "Descriptors allocated");
        offset
    }

    /// 帧槽位被复用时归零
    ///
    /// 只对逐帧作用域的堆生效；RTV/DSV 等持久堆调用此方法没有任何效果。
    pub fn begin_frame(&mut self) {
        if self.frame_scoped {
            self.size = 0;
        }
    }

    /// 获取第 `index` 个槽位的 CPU 句柄
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        self.cpu_start.offset(index, self.increment_size)
    }

    /// 获取第 `index` 个槽位的 GPU 句柄（仅对着色器可见的堆）
    pub fn gpu_handle(&self, index: u32) -> Option<GpuDescriptorHandle> {
        self.gpu_start.map(|start| start.offset(index, self.increment_size))
    }

    /// 底层原生堆
    pub fn native(&self) -> &H {
        &self.native
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    pub fn is_frame_scoped(&self) -> bool {
        self.frame_scoped
    }

    pub fn cpu_start(&self) -> CpuDescriptorHandle {
        self.cpu_start
    }

    pub fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.gpu_start
    }

    pub fn increment_size(&self) -> u32 {
        self.increment_size
    }

    /// 本轮已使用的槽位数
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 地址是否落在本堆的 CPU 范围内
    pub fn contains_cpu(&self, handle: CpuDescriptorHandle) -> bool {
        let end = self.cpu_start.offset(self.capacity.saturating_add(GUARD_SLOTS), self.increment_size);
        handle >= self.cpu_start && handle < end
    }

    /// 获取统计信息
    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.name.clone(), self.heap_type, self.capacity, self.size)
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    /// 堆名称
    pub name: String,
    /// 堆类型
    pub heap_type: DescriptorHeapType,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(name: String, heap_type: DescriptorHeapType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            name,
            heap_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 堆容量策略
#[derive(Debug, Clone)]
pub struct HeapCapacityPolicy {
    /// RTV 堆容量（交换链缓冲数量）
    pub render_targets: u32,
    /// DSV 堆容量
    pub depth_stencils: u32,
    pub descriptors: DescriptorConfig,
}

impl HeapCapacityPolicy {
    pub fn new(back_buffer_count: u32, descriptors: DescriptorConfig) -> Self {
        Self {
            render_targets: back_buffer_count,
            depth_stencils: 1,
            descriptors,
        }
    }

    /// 为（类型，可见性，帧槽位）生成堆描述
    pub fn descriptor_for(
        &self,
        heap_type: DescriptorHeapType,
        shader_visible: bool,
        frame_index: usize,
    ) -> DescriptorHeapDescriptor {
        let d = &self.descriptors;
        match (heap_type, shader_visible) {
            (DescriptorHeapType::RenderTarget, _) => DescriptorHeapDescriptor::rtv(self.render_targets),
            (DescriptorHeapType::DepthStencil, _) => DescriptorHeapDescriptor::dsv(self.depth_stencils),
            (DescriptorHeapType::CbvSrvUav, false) => {
                DescriptorHeapDescriptor::new(heap_type, d.cpu_cbv_srv_uav).with_name("CPU CBV/SRV/UAV Heap")
            }
            (DescriptorHeapType::Sampler, false) => {
                DescriptorHeapDescriptor::new(heap_type, d.cpu_sampler).with_name("CPU Sampler Heap")
            }
            (DescriptorHeapType::CbvSrvUav, true) => DescriptorHeapDescriptor::new(heap_type, d.gpu_cbv_srv_uav)
                .per_frame()
                .with_name(format!("GPU CBV/SRV/UAV Heap [frame {}]", frame_index)),
            (DescriptorHeapType::Sampler, true) => DescriptorHeapDescriptor::new(heap_type, d.gpu_sampler)
                .per_frame()
                .with_name(format!("GPU Sampler Heap [frame {}]", frame_index)),
        }
    }
}

/// 描述符堆注册表
///
/// 每个（类型，可见性）组合只有一个堆实例；着色器可见的堆额外按帧槽位区分，
/// 帧 0 的分配永远不会出现在帧 1 的堆中。
pub struct DescriptorHeapRegistry<H> {
    policy: HeapCapacityPolicy,
    render_target: Option<DescriptorHeap<H>>,
    depth_stencil: Option<DescriptorHeap<H>>,
    cpu_cbv_srv_uav: Option<DescriptorHeap<H>>,
    cpu_sampler: Option<DescriptorHeap<H>>,
    gpu_cbv_srv_uav: [Option<DescriptorHeap<H>>; FRAMES_IN_FLIGHT],
    gpu_sampler: [Option<DescriptorHeap<H>>; FRAMES_IN_FLIGHT],
}

impl<H> DescriptorHeapRegistry<H> {
    pub fn new(policy: HeapCapacityPolicy) -> Self {
        Self {
            policy,
            render_target: None,
            depth_stencil: None,
            cpu_cbv_srv_uav: None,
            cpu_sampler: None,
            gpu_cbv_srv_uav: std::array::from_fn(|_| None),
            gpu_sampler: std::array::from_fn(|_| None),
        }
    }

    pub fn policy(&self) -> &HeapCapacityPolicy {
        &self.policy
    }

    fn slot_mut(
        &mut self,
        heap_type: DescriptorHeapType,
        shader_visible: bool,
        frame_index: usize,
    ) -> Result<&mut Option<DescriptorHeap<H>>> {
        check_request(heap_type, shader_visible, frame_index)?;
        Ok(match (heap_type, shader_visible) {
            (DescriptorHeapType::RenderTarget, _) => &mut self.render_target,
            (DescriptorHeapType::DepthStencil, _) => &mut self.depth_stencil,
            (DescriptorHeapType::CbvSrvUav, false) => &mut self.cpu_cbv_srv_uav,
            (DescriptorHeapType::Sampler, false) => &mut self.cpu_sampler,
            (DescriptorHeapType::CbvSrvUav, true) => &mut self.gpu_cbv_srv_uav[frame_index],
            (DescriptorHeapType::Sampler, true) => &mut self.gpu_sampler[frame_index],
        })
    }

    /// 获取匹配的堆，不存在时按容量策略创建
    ///
    /// 对着色器可见的请求，返回 `frame_index` 帧槽位自己的堆实例。
    pub fn get_or_create<D>(
        &mut self,
        device: &D,
        heap_type: DescriptorHeapType,
        shader_visible: bool,
        frame_index: usize,
    ) -> Result<&mut DescriptorHeap<H>>
    where
        D: GpuDevice<DescriptorHeap = H>,
    {
        let desc = self.policy.descriptor_for(heap_type, shader_visible, frame_index);
        let slot = self.slot_mut(heap_type, shader_visible, frame_index)?;

        if slot.is_none() {
            *slot = Some(DescriptorHeap::create(device, &desc)?);
        }

        slot.as_mut().ok_or_else(|| {
            DistGfxError::Runtime(format!("{} heap missing after creation", heap_type.name()))
        })
    }

    /// 获取已存在的堆
    pub fn get(
        &self,
        heap_type: DescriptorHeapType,
        shader_visible: bool,
        frame_index: usize,
    ) -> Option<&DescriptorHeap<H>> {
        check_request(heap_type, shader_visible, frame_index).ok()?;
        match (heap_type, shader_visible) {
            (DescriptorHeapType::RenderTarget, _) => self.render_target.as_ref(),
            (DescriptorHeapType::DepthStencil, _) => self.depth_stencil.as_ref(),
            (DescriptorHeapType::CbvSrvUav, false) => self.cpu_cbv_srv_uav.as_ref(),
            (DescriptorHeapType::Sampler, false) => self.cpu_sampler.as_ref(),
            (DescriptorHeapType::CbvSrvUav, true) => self.gpu_cbv_srv_uav[frame_index].as_ref(),
            (DescriptorHeapType::Sampler, true) => self.gpu_sampler[frame_index].as_ref(),
        }
    }

    /// 帧槽位被复用：归零该槽位的着色器可见堆
    ///
    /// 调用方必须保证 GPU 已完成上一次使用该槽位的所有工作。
    pub fn begin_frame(&mut self, frame_index: usize) {
        for heap in [&mut self.gpu_cbv_srv_uav[frame_index], &mut self.gpu_sampler[frame_index]]
            .into_iter()
            .flatten()
        {
            heap.begin_frame();
        }
    }

    /// 当前帧需要绑定到命令列表的着色器可见堆（CBV/SRV/UAV 在前）
    pub fn shader_visible_heaps(&self, frame_index: usize) -> Vec<&H> {
        [&self.gpu_cbv_srv_uav[frame_index], &self.gpu_sampler[frame_index]]
            .into_iter()
            .flatten()
            .map(|heap| heap.native())
            .collect()
    }

    /// 获取所有已创建堆的统计信息
    pub fn all_stats(&self) -> Vec<DescriptorHeapStats> {
        [&self.render_target, &self.depth_stencil, &self.cpu_cbv_srv_uav, &self.cpu_sampler]
            .into_iter()
            .chain(self.gpu_cbv_srv_uav.iter())
            .chain(self.gpu_sampler.iter())
            .flatten()
            .map(|heap| heap.stats())
            .collect()
    }
}

fn check_request(heap_type: DescriptorHeapType, shader_visible: bool, frame_index: usize) -> Result<()> {
    if shader_visible && !heap_type.can_be_shader_visible() {
        return Err(DistGfxError::Runtime(format!(
            "{} heaps cannot be shader visible",
            heap_type.name()
        )));
    }
    if frame_index >= FRAMES_IN_FLIGHT {
        return Err(DistGfxError::Runtime(format!(
            "Frame index {} out of range (frames in flight: {})",
            frame_index, FRAMES_IN_FLIGHT
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HeadlessConfig;
    use crate::gfx::headless::HeadlessDevice;

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(&HeadlessConfig::default())
    }

    fn cpu_heap(device: &HeadlessDevice, capacity: u32) -> DescriptorHeap<<HeadlessDevice as GpuDevice>::DescriptorHeap> {
        let desc = DescriptorHeapDescriptor::new(DescriptorHeapType::CbvSrvUav, capacity);
        DescriptorHeap::create(device, &desc).unwrap()
    }

    #[test]
    fn test_heap_type() {
        assert!(DescriptorHeapType::CbvSrvUav.can_be_shader_visible());
        assert!(DescriptorHeapType::Sampler.can_be_shader_visible());
        assert!(!DescriptorHeapType::RenderTarget.can_be_shader_visible());
        assert_eq!(DescriptorHeapType::DepthStencil.name(), "DSV");
    }

    #[test]
    fn test_handle_offset() {
        let cpu = CpuDescriptorHandle::new(1000);
        assert_eq!(cpu.offset(5, 32).ptr, 1160);

        let gpu = GpuDescriptorHandle::new(2000);
        assert_eq!(gpu.offset(10, 32).ptr, 2320);
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = DescriptorHeapDescriptor::rtv(4);
        assert_eq!(desc.capacity, 4);
        assert_eq!(desc.native_slot_count(), 5);
        assert!(!desc.shader_visible);
        assert!(!desc.frame_scoped);
        assert_eq!(desc.name.as_deref(), Some("RTV Heap"));

        let desc = DescriptorHeapDescriptor::new(DescriptorHeapType::Sampler, 16).per_frame();
        assert!(desc.shader_visible && desc.frame_scoped);
    }

    #[test]
    fn test_bump_allocation_offsets() {
        let device = device();
        let mut heap = cpu_heap(&device, 64);
        let start = heap.cpu_start();
        let inc = heap.increment_size();

        let counts = [3u32, 1, 7, 2];
        let mut used = 0;
        for count in counts {
            let handle = heap.allocate(count);
            assert_eq!(handle, start.offset(used, inc));
            used += count;
            assert_eq!(heap.size(), used);
        }
    }

    #[test]
    fn test_capacity_boundary() {
        let device = device();
        let mut heap = cpu_heap(&device, 256);

        for _ in 0..64 {
            heap.allocate(4);
        }
        assert_eq!(heap.size(), 256);
        assert_eq!(heap.stats().available, 0);
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_capacity_overflow_panics() {
        let device = device();
        let mut heap = cpu_heap(&device, 256);

        for _ in 0..65 {
            heap.allocate(4);
        }
    }

    #[test]
    #[should_panic(expected = "exhausted")]
    fn test_huge_request_does_not_wrap() {
        let device = device();
        let mut heap = cpu_heap(&device, 256);

        heap.allocate(4);
        heap.allocate(u32::MAX - 2);
    }

    #[test]
    fn test_huge_request_leaves_heap_untouched() {
        let device = device();
        let mut heap = cpu_heap(&device, 256);
        let first = heap.allocate(4);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| heap.allocate(u32::MAX - 2)));
        assert!(result.is_err());
        assert_eq!(heap.size(), 4);
        assert_eq!(heap.allocate(1), first.offset(4, heap.increment_size()));
    }

    #[test]
    fn test_native_slot_count_saturates() {
        let desc = DescriptorHeapDescriptor::new(DescriptorHeapType::CbvSrvUav, u32::MAX);
        assert_eq!(desc.native_slot_count(), u32::MAX);
    }

    #[test]
    #[should_panic(expected = "not shader visible")]
    fn test_gpu_allocation_on_cpu_heap_panics() {
        let device = device();
        let mut heap = cpu_heap(&device, 8);
        heap.allocate_gpu_visible(1);
    }

    #[test]
    fn test_gpu_visible_allocation_pairs() {
        let device = device();
        let desc = DescriptorHeapDescriptor::new(DescriptorHeapType::CbvSrvUav, 32).per_frame();
        let mut heap = DescriptorHeap::create(&device, &desc).unwrap();
        let gpu_start = heap.gpu_start().unwrap();
        let inc = heap.increment_size();

        heap.allocate_gpu_visible(2);
        let pair = heap.allocate_gpu_visible(3);
        assert_eq!(pair.cpu, heap.cpu_start().offset(2, inc));
        assert_eq!(pair.gpu, gpu_start.offset(2, inc));
        assert_eq!(heap.gpu_handle(2), Some(pair.gpu));
    }

    #[test]
    fn test_begin_frame_only_resets_frame_scoped() {
        let device = device();
        let mut persistent = cpu_heap(&device, 8);
        persistent.allocate(3);
        persistent.begin_frame();
        assert_eq!(persistent.size(), 3);

        let desc = DescriptorHeapDescriptor::new(DescriptorHeapType::CbvSrvUav, 8).per_frame();
        let mut per_frame = DescriptorHeap::create(&device, &desc).unwrap();
        per_frame.allocate_gpu_visible(3);
        per_frame.begin_frame();
        assert_eq!(per_frame.size(), 0);
    }

    #[test]
    fn test_rtv_cannot_be_shader_visible() {
        let device = device();
        let desc = DescriptorHeapDescriptor::rtv(2).per_frame();
        assert!(DescriptorHeap::create(&device, &desc).is_err());
    }

    #[test]
    fn test_registry_policy_and_frame_isolation() {
        let device = device();
        let policy = HeapCapacityPolicy::new(3, DescriptorConfig::default());
        let mut registry = DescriptorHeapRegistry::new(policy);

        let rtv = registry
            .get_or_create(&device, DescriptorHeapType::RenderTarget, false, 0)
            .unwrap();
        assert_eq!(rtv.capacity(), 3);

        let dsv = registry
            .get_or_create(&device, DescriptorHeapType::DepthStencil, false, 1)
            .unwrap();
        assert_eq!(dsv.capacity(), 1);

        registry
            .get_or_create(&device, DescriptorHeapType::CbvSrvUav, true, 0)
            .unwrap()
            .allocate_gpu_visible(10);
        let frame1 = registry
            .get_or_create(&device, DescriptorHeapType::CbvSrvUav, true, 1)
            .unwrap();
        assert_eq!(frame1.size(), 0);
        let in_frame1 = frame1.allocate_gpu_visible(4);

        let frame0 = registry.get(DescriptorHeapType::CbvSrvUav, true, 0).unwrap();
        assert_eq!(frame0.size(), 10);
        assert!(!frame0.contains_cpu(in_frame1.cpu));

        // CPU 堆与帧槽位无关
        registry
            .get_or_create(&device, DescriptorHeapType::CbvSrvUav, false, 0)
            .unwrap()
            .allocate(5);
        let cpu = registry
            .get_or_create(&device, DescriptorHeapType::CbvSrvUav, false, 1)
            .unwrap();
        assert_eq!(cpu.size(), 5);

        registry.begin_frame(0);
        assert_eq!(registry.get(DescriptorHeapType::CbvSrvUav, true, 0).unwrap().size(), 0);
        assert_eq!(registry.get(DescriptorHeapType::CbvSrvUav, true, 1).unwrap().size(), 4);
        assert_eq!(registry.get(DescriptorHeapType::CbvSrvUav, false, 0).unwrap().size(), 5);
    }

    #[test]
    fn test_registry_rejects_invalid_requests() {
        let device = device();
        let mut registry = DescriptorHeapRegistry::new(HeapCapacityPolicy::new(2, DescriptorConfig::default()));

        assert!(registry
            .get_or_create(&device, DescriptorHeapType::DepthStencil, true, 0)
            .is_err());
        assert!(registry
            .get_or_create(&device, DescriptorHeapType::CbvSrvUav, true, FRAMES_IN_FLIGHT)
            .is_err());
        assert!(registry.get(DescriptorHeapType::RenderTarget, false, 0).is_none());
    }

    #[test]
    fn test_shader_visible_heaps_and_stats() {
        let device = device();
        let mut registry = DescriptorHeapRegistry::new(HeapCapacityPolicy::new(2, DescriptorConfig::default()));
        assert!(registry.shader_visible_heaps(0).is_empty());

        registry.get_or_create(&device, DescriptorHeapType::CbvSrvUav, true, 0).unwrap();
        registry.get_or_create(&device, DescriptorHeapType::Sampler, true, 0).unwrap();
        registry.get_or_create(&device, DescriptorHeapType::RenderTarget, false, 0).unwrap();

        assert_eq!(registry.shader_visible_heaps(0).len(), 2);
        assert!(registry.shader_visible_heaps(1).is_empty());

        let stats = registry.all_stats();
        assert_eq!(stats.len(), 3);
        assert!(stats.iter().any(|s| s.name == "GPU Sampler Heap [frame 0]"));
    }
}
