//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现，包括：
//! - DirectX 12：Windows 平台的高性能图形 API
//! - Headless：没有显卡时使用的模拟 GPU
//!
//! 所有后端都实现了统一的 `GpuDevice` trait，
//! 上下文、描述符堆和帧同步器对它泛型。

pub mod backend;
#[cfg(target_os = "windows")]
pub mod dx12;
pub mod headless;

pub use backend::{GpuDevice, ResourceState, SwapChainDescriptor, WindowProvider};
#[cfg(target_os = "windows")]
pub use dx12::Dx12Device;
pub use headless::{HeadlessDevice, HeadlessWindow};
