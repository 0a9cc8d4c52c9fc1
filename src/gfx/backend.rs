//! 图形后端的统一抽象接口
//!
//! 描述符堆、帧同步器和图形上下文都是对 `GpuDevice` 泛型的。
//! 每个后端通过关联类型给出自己的原生对象（堆、资源、队列、Fence 等），
//! 上层只通过这里列出的操作与设备交互。
//!
//! 目前有两个实现：
//! - `gfx::dx12::Dx12Device`：Windows 上的 DirectX 12
//! - `gfx::headless::HeadlessDevice`：所有平台可用的模拟 GPU

use raw_window_handle::{HasWindowHandle, RawWindowHandle};

use crate::core::error::{DistGfxError, Result};
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle,
};

/// 设备创建出的原生描述符堆及其起始地址
pub struct NativeDescriptorHeap<H> {
    pub heap: H,
    pub cpu_start: CpuDescriptorHandle,
    /// 仅着色器可见的堆有 GPU 地址
    pub gpu_start: Option<GpuDescriptorHandle>,
}

/// 交换链描述信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDescriptor {
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
}

/// 资源状态（用于资源屏障）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// 可以被交换链呈现
    Present,
    /// 作为渲染目标写入
    RenderTarget,
    /// 作为深度缓冲写入
    DepthWrite,
}

/// 窗口提供者
///
/// 只在上下文初始化时使用：提供原生窗口句柄和当前分辨率。
pub trait WindowProvider {
    /// 原生窗口句柄
    fn raw_window_handle(&self) -> Result<RawWindowHandle>;

    /// 窗口分辨率 `[width, height]`
    fn resolution(&self) -> [u32; 2];
}

impl WindowProvider for winit::window::Window {
    fn raw_window_handle(&self) -> Result<RawWindowHandle> {
        self.window_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| DistGfxError::Initialization(format!("Failed to get window handle: {}", e)))
    }

    fn resolution(&self) -> [u32; 2] {
        let size = self.inner_size();
        [size.width, size.height]
    }
}

/// 图形设备的统一接口
///
/// 所有具体的图形后端都必须实现此 trait。除 `wait_for_value` 外，
/// 所有操作都不会阻塞 CPU；命令在 `execute_command_list` 之后按提交顺序
/// 在唯一的队列上异步执行。
pub trait GpuDevice {
    /// 描述符堆
    type DescriptorHeap;
    /// GPU 资源（交换链缓冲、深度缓冲）
    type Resource: Clone;
    /// 命令队列
    type CommandQueue;
    /// 命令分配器
    type CommandAllocator;
    /// 命令列表
    type CommandList;
    /// 交换链
    type SwapChain;
    /// Fence
    type Fence;
    /// CPU 等待 Fence 时使用的 OS 事件
    type FenceEvent;

    /// 获取后端的名称（如 "DirectX 12"）
    fn backend_name(&self) -> &'static str;

    // ---- 描述符 ----

    /// 相邻两个描述符之间的字节距离
    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32;

    /// 创建原生描述符堆，槽位数量为 `desc.native_slot_count()`
    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDescriptor,
    ) -> Result<NativeDescriptorHeap<Self::DescriptorHeap>>;

    /// 从 `src` 复制 `count` 个描述符到 `dst`（均为 CPU 地址）
    fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        heap_type: DescriptorHeapType,
    );

    fn create_render_target_view(&self, resource: &Self::Resource, handle: CpuDescriptorHandle);

    fn create_depth_stencil_view(&self, resource: &Self::Resource, handle: CpuDescriptorHandle);

    // ---- 呈现 ----

    fn create_command_queue(&self) -> Result<Self::CommandQueue>;

    fn create_swap_chain(
        &self,
        queue: &Self::CommandQueue,
        window: &dyn WindowProvider,
        desc: &SwapChainDescriptor,
    ) -> Result<Self::SwapChain>;

    /// 获取交换链的第 `index` 个缓冲
    fn swap_chain_buffer(&self, swap_chain: &Self::SwapChain, index: u32) -> Result<Self::Resource>;

    fn current_back_buffer_index(&self, swap_chain: &Self::SwapChain) -> u32;

    /// 呈现当前后台缓冲，`sync_interval` 为等待的垂直同步次数
    fn present(&self, swap_chain: &Self::SwapChain, sync_interval: u32) -> Result<()>;

    /// 创建 D32 深度缓冲，初始状态为 `DepthWrite`
    fn create_depth_stencil_buffer(&self, width: u32, height: u32) -> Result<Self::Resource>;

    // ---- 命令 ----

    fn create_command_allocator(&self) -> Result<Self::CommandAllocator>;

    /// 创建命令列表，返回时已处于关闭状态
    fn create_command_list(&self, allocator: &Self::CommandAllocator) -> Result<Self::CommandList>;

    /// 重置命令分配器
    ///
    /// 只有当 GPU 已经完成该分配器上的所有工作时才合法。
    fn reset_command_allocator(&self, allocator: &Self::CommandAllocator) -> Result<()>;

    fn reset_command_list(&self, list: &Self::CommandList, allocator: &Self::CommandAllocator) -> Result<()>;

    fn close_command_list(&self, list: &Self::CommandList) -> Result<()>;

    fn execute_command_list(&self, queue: &Self::CommandQueue, list: &Self::CommandList) -> Result<()>;

    /// 将着色器可见的描述符堆绑定到命令列表
    fn set_descriptor_heaps(&self, list: &Self::CommandList, heaps: &[&Self::DescriptorHeap]);

    /// 记录资源状态转换屏障
    fn transition(
        &self,
        list: &Self::CommandList,
        resource: &Self::Resource,
        before: ResourceState,
        after: ResourceState,
    );

    fn clear_render_target(&self, list: &Self::CommandList, handle: CpuDescriptorHandle, color: [f32; 4]);

    fn clear_depth_stencil(&self, list: &Self::CommandList, handle: CpuDescriptorHandle, depth: f32);

    // ---- 同步 ----

    fn create_fence(&self, initial_value: u64) -> Result<Self::Fence>;

    fn create_fence_event(&self) -> Result<Self::FenceEvent>;

    /// 在队列中排入 signal：GPU 执行到这里时 Fence 达到 `value`
    fn signal(&self, queue: &Self::CommandQueue, fence: &Self::Fence, value: u64) -> Result<()>;

    /// GPU 已经到达的最大 Fence 值
    fn completed_value(&self, fence: &Self::Fence) -> u64;

    /// 阻塞直到 Fence 到达 `value`
    fn wait_for_value(&self, fence: &Self::Fence, event: &Self::FenceEvent, value: u64) -> Result<()>;
}
