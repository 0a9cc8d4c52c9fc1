//! DirectX 12 设备
//!
//! # 初始化流程
//!
//! 1. 启用调试层（可配置）
//! 2. 创建 DXGI 工厂
//! 3. 创建 D3D12 设备
//!
//! 命令队列、交换链、描述符堆和 Fence 都由上下文通过 `GpuDevice` 接口按需创建。

use std::mem::ManuallyDrop;

use raw_window_handle::RawWindowHandle;
use tracing::{debug, info, warn};
use windows::{
    core::Interface, Win32::Foundation::HWND, Win32::Graphics::Direct3D::*, Win32::Graphics::Direct3D12::*,
    Win32::Graphics::Dxgi::Common::*, Win32::Graphics::Dxgi::*,
};

use super::descriptor::{self as dx12_descriptor, cpu_handle};
use super::sync::FenceEvent;
use crate::core::config::GraphicsConfig;
use crate::core::error::{DistGfxError, GraphicsError, Result};
use crate::gfx::backend::{GpuDevice, NativeDescriptorHeap, ResourceState, SwapChainDescriptor, WindowProvider};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorHeapType};

/// DirectX 12 设备
pub struct Dx12Device {
    factory: IDXGIFactory4,
    device: ID3D12Device,
}

impl Dx12Device {
    /// 创建 DXGI 工厂和 D3D12 设备
    pub fn new(config: &GraphicsConfig) -> Result<Self> {
        unsafe {
            let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);
            if config.debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                if let Some(debug) = D3D12GetDebugInterface(&mut debug).ok().and(debug) {
                    debug.EnableDebugLayer();
                    factory_flags |= DXGI_CREATE_FACTORY_DEBUG;
                    debug!("DX12 Debug Layer enabled");
                } else {
                    warn!("Failed to enable DX12 Debug Layer");
                }
            }

            let factory: IDXGIFactory4 = CreateDXGIFactory2(factory_flags)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create DXGI factory: {:?}", e)))?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| GraphicsError::DeviceCreation(format!("Failed to create D3D12 device: {:?}", e)))?;
            let device = device
                .ok_or_else(|| GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string()))?;

            info!("D3D12 device created");
            Ok(Self { factory, device })
        }
    }

    /// 底层 D3D12 设备
    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    /// 队列操作失败时区分设备丢失和普通错误
    fn queue_error(&self, what: &str, error: windows::core::Error) -> DistGfxError {
        let code = error.code();
        if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == DXGI_ERROR_DEVICE_HUNG {
            let reason = unsafe { self.device.GetDeviceRemovedReason() };
            return GraphicsError::DeviceRemoved(format!("{} failed: {:?} (reason: {:?})", what, error, reason)).into();
        }
        GraphicsError::CommandExecution(format!("{} failed: {:?}", what, error)).into()
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
    }
}

fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // 借用指针，不增加引用计数
                pResource: unsafe { std::mem::transmute_copy(resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: state_before,
                StateAfter: state_after,
            }),
        },
    }
}

fn creation_error(what: &str, error: windows::core::Error) -> DistGfxError {
    GraphicsError::ResourceCreation(format!("Failed to create {}: {:?}", what, error)).into()
}

impl GpuDevice for Dx12Device {
    type DescriptorHeap = ID3D12DescriptorHeap;
    type Resource = ID3D12Resource;
    type CommandQueue = ID3D12CommandQueue;
    type CommandAllocator = ID3D12CommandAllocator;
    type CommandList = ID3D12GraphicsCommandList;
    type SwapChain = IDXGISwapChain3;
    type Fence = ID3D12Fence;
    type FenceEvent = FenceEvent;

    fn backend_name(&self) -> &'static str {
        "DirectX 12"
    }

    fn descriptor_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        unsafe {
            self.device
                .GetDescriptorHandleIncrementSize(dx12_descriptor::heap_type(heap_type))
        }
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDescriptor,
    ) -> Result<NativeDescriptorHeap<ID3D12DescriptorHeap>> {
        dx12_descriptor::create_heap(&self.device, desc)
    }

    fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        heap_type: DescriptorHeapType,
    ) {
        unsafe {
            self.device.CopyDescriptorsSimple(
                count,
                cpu_handle(dst),
                cpu_handle(src),
                dx12_descriptor::heap_type(heap_type),
            );
        }
    }

    fn create_render_target_view(&self, resource: &ID3D12Resource, handle: CpuDescriptorHandle) {
        unsafe { self.device.CreateRenderTargetView(resource, None, cpu_handle(handle)) }
    }

    fn create_depth_stencil_view(&self, resource: &ID3D12Resource, handle: CpuDescriptorHandle) {
        unsafe { self.device.CreateDepthStencilView(resource, None, cpu_handle(handle)) }
    }

    fn create_command_queue(&self) -> Result<ID3D12CommandQueue> {
        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            ..Default::default()
        };
        unsafe { self.device.CreateCommandQueue(&queue_desc) }.map_err(|e| creation_error("command queue", e))
    }

    fn create_swap_chain(
        &self,
        queue: &ID3D12CommandQueue,
        window: &dyn WindowProvider,
        desc: &SwapChainDescriptor,
    ) -> Result<IDXGISwapChain3> {
        let hwnd = match window.raw_window_handle()? {
            RawWindowHandle::Win32(handle) => HWND(handle.hwnd.get() as *mut core::ffi::c_void),
            _ => {
                return Err(GraphicsError::SwapchainError(
                    "Expected Win32 window handle on Windows platform".to_string(),
                )
                .into())
            }
        };

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        unsafe {
            let swap_chain: IDXGISwapChain1 = self
                .factory
                .CreateSwapChainForHwnd(queue, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GraphicsError::SwapchainError(format!("Failed to create swap chain: {:?}", e)))?;
            let swap_chain: IDXGISwapChain3 = swap_chain
                .cast()
                .map_err(|e| GraphicsError::SwapchainError(format!("IDXGISwapChain3 unavailable: {:?}", e)))?;

            info!(
                width = desc.width,
                height = desc.height,
                buffers = desc.buffer_count,
                "Swap chain created"
            );
            Ok(swap_chain)
        }
    }

    fn swap_chain_buffer(&self, swap_chain: &IDXGISwapChain3, index: u32) -> Result<ID3D12Resource> {
        unsafe { swap_chain.GetBuffer(index) }
            .map_err(|e| GraphicsError::SwapchainError(format!("Failed to get swap chain buffer {}: {:?}", index, e)).into())
    }

    fn current_back_buffer_index(&self, swap_chain: &IDXGISwapChain3) -> u32 {
        unsafe { swap_chain.GetCurrentBackBufferIndex() }
    }

    fn present(&self, swap_chain: &IDXGISwapChain3, sync_interval: u32) -> Result<()> {
        unsafe { swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(|e| self.queue_error("Present", e))
    }

    fn create_depth_stencil_buffer(&self, width: u32, height: u32) -> Result<ID3D12Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };

        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: width as u64,
            Height: height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_D32_FLOAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
        };

        let clear_value = D3D12_CLEAR_VALUE {
            Format: DXGI_FORMAT_D32_FLOAT,
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: 1.0,
                    Stencil: 0,
                },
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_DEPTH_WRITE,
                Some(&clear_value),
                &mut resource,
            )
        }
        .map_err(|e| creation_error("depth stencil buffer", e))?;

        resource.ok_or_else(|| GraphicsError::ResourceCreation("Depth stencil buffer is null".to_string()).into())
    }

    fn create_command_allocator(&self) -> Result<ID3D12CommandAllocator> {
        unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
            .map_err(|e| creation_error("command allocator", e))
    }

    fn create_command_list(&self, allocator: &ID3D12CommandAllocator) -> Result<ID3D12GraphicsCommandList> {
        unsafe {
            let list: ID3D12GraphicsCommandList = self
                .device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, allocator, None)
                .map_err(|e| creation_error("command list", e))?;
            // 创建时处于记录状态，先关闭
            list.Close().map_err(|e| creation_error("command list", e))?;
            Ok(list)
        }
    }

    fn reset_command_allocator(&self, allocator: &ID3D12CommandAllocator) -> Result<()> {
        unsafe { allocator.Reset() }.map_err(|e| self.queue_error("Command allocator reset", e))
    }

    fn reset_command_list(&self, list: &ID3D12GraphicsCommandList, allocator: &ID3D12CommandAllocator) -> Result<()> {
        unsafe { list.Reset(allocator, None) }.map_err(|e| self.queue_error("Command list reset", e))
    }

    fn close_command_list(&self, list: &ID3D12GraphicsCommandList) -> Result<()> {
        unsafe { list.Close() }.map_err(|e| self.queue_error("Command list close", e))
    }

    fn execute_command_list(&self, queue: &ID3D12CommandQueue, list: &ID3D12GraphicsCommandList) -> Result<()> {
        let list: ID3D12CommandList = list
            .cast()
            .map_err(|e| self.queue_error("Command list cast", e))?;
        unsafe { queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    fn set_descriptor_heaps(&self, list: &ID3D12GraphicsCommandList, heaps: &[&ID3D12DescriptorHeap]) {
        let heaps: Vec<Option<ID3D12DescriptorHeap>> = heaps.iter().map(|&heap| Some(heap.clone())).collect();
        unsafe { list.SetDescriptorHeaps(&heaps) }
    }

    fn transition(
        &self,
        list: &ID3D12GraphicsCommandList,
        resource: &ID3D12Resource,
        before: ResourceState,
        after: ResourceState,
    ) {
        let barrier = transition_barrier(resource, resource_state(before), resource_state(after));
        unsafe { list.ResourceBarrier(&[barrier]) }
    }

    fn clear_render_target(&self, list: &ID3D12GraphicsCommandList, handle: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe { list.ClearRenderTargetView(cpu_handle(handle), &color, None) }
    }

    fn clear_depth_stencil(&self, list: &ID3D12GraphicsCommandList, handle: CpuDescriptorHandle, depth: f32) {
        unsafe { list.ClearDepthStencilView(cpu_handle(handle), D3D12_CLEAR_FLAG_DEPTH, depth, 0, None) }
    }

    fn create_fence(&self, initial_value: u64) -> Result<ID3D12Fence> {
        unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }.map_err(|e| creation_error("fence", e))
    }

    fn create_fence_event(&self) -> Result<FenceEvent> {
        FenceEvent::new()
    }

    fn signal(&self, queue: &ID3D12CommandQueue, fence: &ID3D12Fence, value: u64) -> Result<()> {
        unsafe { queue.Signal(fence, value) }.map_err(|e| self.queue_error("Fence signal", e))
    }

    fn completed_value(&self, fence: &ID3D12Fence) -> u64 {
        unsafe { fence.GetCompletedValue() }
    }

    fn wait_for_value(&self, fence: &ID3D12Fence, event: &FenceEvent, value: u64) -> Result<()> {
        event.wait(fence, value)?;
        // 设备丢失后完成值为 u64::MAX，等待会立即返回
        if self.completed_value(fence) == u64::MAX {
            if let Err(e) = unsafe { self.device.GetDeviceRemovedReason() } {
                return Err(GraphicsError::DeviceRemoved(format!("{:?}", e)).into());
            }
        }
        Ok(())
    }
}
