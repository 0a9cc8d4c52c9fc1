//! 命令列表管理模块
//!
//! 上下文只有一个直接命令列表，每帧通过当前帧槽位的分配器重新打开。
//! `CommandRecorder` 跟踪它的状态，把非法的状态转换变成
//! `GraphicsError::CommandExecution` 而不是交给驱动。

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuDevice;

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 已关闭，可以提交或重新打开
    Closed,
    /// 正在记录
    Recording,
}

/// 命令列表及其状态
pub struct CommandRecorder<L> {
    list: L,
    state: CommandListState,
}

impl<L> CommandRecorder<L> {
    /// 包装一个刚创建（已关闭）的命令列表
    pub fn new(list: L) -> Self {
        Self {
            list,
            state: CommandListState::Closed,
        }
    }

    /// 用 `allocator` 重新打开命令列表
    pub fn begin<D>(&mut self, device: &D, allocator: &D::CommandAllocator) -> Result<()>
    where
        D: GpuDevice<CommandList = L>,
    {
        if self.state == CommandListState::Recording {
            return Err(GraphicsError::CommandExecution(
                "begin_frame called while the command list is still recording".to_string(),
            )
            .into());
        }
        device.reset_command_list(&self.list, allocator)?;
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// 结束记录并关闭命令列表
    pub fn finish<D>(&mut self, device: &D) -> Result<()>
    where
        D: GpuDevice<CommandList = L>,
    {
        if self.state != CommandListState::Recording {
            return Err(GraphicsError::CommandExecution(
                "present_frame called without begin_frame".to_string(),
            )
            .into());
        }
        device.close_command_list(&self.list)?;
        self.state = CommandListState::Closed;
        Ok(())
    }

    pub fn list(&self) -> &L {
        &self.list
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CommandListState::Recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompletionMode;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_command_recorder_state_machine() {
        let device = HeadlessDevice::with_completion(CompletionMode::Eager);
        let allocator = device.create_command_allocator().unwrap();
        let mut recorder = CommandRecorder::new(device.create_command_list(&allocator).unwrap());

        assert_eq!(recorder.state(), CommandListState::Closed);

        // 未开始不能结束
        assert!(recorder.finish(&device).is_err());

        recorder.begin(&device, &allocator).unwrap();
        assert!(recorder.is_recording());

        // 不能重复开始
        assert!(recorder.begin(&device, &allocator).is_err());

        recorder.finish(&device).unwrap();
        assert_eq!(recorder.state(), CommandListState::Closed);
        assert!(device.gpu().validation_errors().is_empty());
    }
}
