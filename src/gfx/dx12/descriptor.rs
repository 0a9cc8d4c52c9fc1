//! DX12 描述符堆与句柄转换

use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::NativeDescriptorHeap;
use crate::renderer::descriptor::{
    CpuDescriptorHandle, DescriptorHeapDescriptor, DescriptorHeapType, GpuDescriptorHandle,
};

/// 描述符堆类型到 D3D12 类型的映射
pub fn heap_type(heap_type: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match heap_type {
        DescriptorHeapType::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

pub fn cpu_handle(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

/// 创建原生描述符堆
///
/// 槽位数量包含保护槽位。
pub fn create_heap(
    device: &ID3D12Device,
    desc: &DescriptorHeapDescriptor,
) -> Result<NativeDescriptorHeap<ID3D12DescriptorHeap>> {
    unsafe {
        let flags = if desc.shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };

        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type(desc.heap_type),
            NumDescriptors: desc.native_slot_count(),
            Flags: flags,
            NodeMask: 0,
        };

        let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
            GraphicsError::ResourceCreation(format!(
                "Failed to create {} descriptor heap: {:?}",
                desc.heap_type.name(),
                e
            ))
        })?;

        // 设置调试名称
        if let Some(name) = &desc.name {
            let wide_name: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
            let _ = heap.SetName(windows::core::PCWSTR(wide_name.as_ptr()));
        }

        let cpu_start = CpuDescriptorHandle::new(heap.GetCPUDescriptorHandleForHeapStart().ptr);
        let gpu_start = desc
            .shader_visible
            .then(|| GpuDescriptorHandle::new(heap.GetGPUDescriptorHandleForHeapStart().ptr));

        Ok(NativeDescriptorHeap {
            heap,
            cpu_start,
            gpu_start,
        })
    }
}
