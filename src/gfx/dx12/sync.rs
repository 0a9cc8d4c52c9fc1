//! DX12 Fence 等待事件

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::ID3D12Fence;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::error::{GraphicsError, Result};

/// CPU 等待 Fence 使用的 OS 事件，释放时关闭句柄
pub struct FenceEvent {
    handle: HANDLE,
}

impl FenceEvent {
    pub fn new() -> Result<Self> {
        let handle = unsafe { CreateEventA(None, false, false, None) }
            .map_err(|e| GraphicsError::ResourceCreation(format!("Failed to create fence event: {:?}", e)))?;
        Ok(Self { handle })
    }

    /// 阻塞直到 `fence` 到达 `value`
    pub fn wait(&self, fence: &ID3D12Fence, value: u64) -> Result<()> {
        unsafe {
            fence
                .SetEventOnCompletion(value, self.handle)
                .map_err(|e| GraphicsError::FenceWait(format!("SetEventOnCompletion({}) failed: {:?}", value, e)))?;

            let result = WaitForSingleObject(self.handle, INFINITE);
            if result != WAIT_OBJECT_0 {
                return Err(GraphicsError::FenceWait(format!(
                    "WaitForSingleObject returned {:#x} while waiting for {}",
                    result.0, value
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl Drop for FenceEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}
