//! 渲染器模块
//!
//! 与具体图形 API 无关的上下文核心，对 `gfx::GpuDevice` 泛型：
//!
//! - `descriptor`：描述符堆（线性分配器）与堆注册表
//! - `sync`：双帧槽位的命令分配器 + Fence 同步
//! - `command`：命令列表的录制状态
//! - `context`：聚合以上组件的 `GraphicsContext`

pub mod command;
pub mod context;
pub mod descriptor;
pub mod sync;

pub use command::{CommandListState, CommandRecorder};
pub use context::{GraphicsContext, ViewedResource};
pub use descriptor::{
    CpuDescriptorHandle, DescriptorHandlePair, DescriptorHeap, DescriptorHeapDescriptor, DescriptorHeapRegistry,
    DescriptorHeapStats, DescriptorHeapType, GpuDescriptorHandle, HeapCapacityPolicy,
};
pub use sync::{FenceValue, FramePipeline, FRAMES_IN_FLIGHT, MAX_BACK_BUFFERS};
