//! 无头后端
//!
//! 模拟 GPU，用于没有显卡的 CI 环境和上下文的集成测试。

mod device;
mod gpu;

pub use device::{
    HeadlessAllocator, HeadlessCommandList, HeadlessDevice, HeadlessFence, HeadlessFenceEvent, HeadlessHeap,
    HeadlessQueue, HeadlessResource, HeadlessSwapChain,
};
pub use gpu::{GpuEvent, GpuHandle};

use raw_window_handle::RawWindowHandle;

use crate::core::error::{DistGfxError, Result};
use crate::gfx::backend::WindowProvider;

/// 没有原生窗口的窗口提供者，只报告分辨率
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessWindow {
    pub width: u32,
    pub height: u32,
}

impl HeadlessWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl WindowProvider for HeadlessWindow {
    fn raw_window_handle(&self) -> Result<RawWindowHandle> {
        Err(DistGfxError::Initialization(
            "Headless window has no native handle".to_string(),
        ))
    }

    fn resolution(&self) -> [u32; 2] {
        [self.width, self.height]
    }
}
