//! DirectX 12 图形 API 实现模块
//!
//! - `device`：DXGI 工厂、D3D12 设备以及 `GpuDevice` 实现
//! - `descriptor`：描述符堆创建与句柄转换
//! - `sync`：Fence 等待事件

pub mod descriptor;
pub mod device;
pub mod sync;

// 重新导出常用类型
pub use device::Dx12Device;
pub use sync::FenceEvent;
