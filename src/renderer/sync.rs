//! GPU 同步机制模块
//!
//! 双缓冲的命令分配器 + 单调递增的 Fence，决定 CPU 何时可以复用一帧的资源。
//!
//! # 帧协议
//!
//! 1. **Begin**：`frame_index = frame_count % 2`。如果该槽位上一次提交的
//!    Fence 值尚未完成，CPU 阻塞等待；然后重置该槽位的命令分配器。
//! 2. **Record**：调用方录制命令、分配描述符。
//! 3. **End**：提交并呈现之后 signal 新的 Fence 值，记到该槽位上，`frame_count += 1`。
//!
//! 因此 GPU 队列中最多同时存在两帧的工作。
//!
//! # 排空
//!
//! `drain` 在关闭前 signal 并无条件等待，之后任何 `begin_frame` 都会返回
//! `GraphicsError::ContextDrained`。

use tracing::{debug, info, trace};

use crate::core::error::{DistGfxError, GraphicsError, Result};
use crate::gfx::backend::GpuDevice;

/// 同时在途的帧数
pub const FRAMES_IN_FLIGHT: usize = 2;

/// 交换链缓冲数量上限
pub const MAX_BACK_BUFFERS: usize = 4;

/// 设备丢失后 Fence 的完成值
const DEVICE_LOST_FENCE_VALUE: u64 = u64::MAX;

/// Fence 值，整个上下文内严格递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 一个帧槽位：命令分配器 + 上一次占用者 signal 的 Fence 值
struct FrameSlot<A> {
    allocator: A,
    fence_value: FenceValue,
}

/// 帧流水线同步器
pub struct FramePipeline<D: GpuDevice> {
    slots: [FrameSlot<D::CommandAllocator>; FRAMES_IN_FLIGHT],
    fence: D::Fence,
    fence_event: D::FenceEvent,
    /// 已经结束的帧数
    frame_count: u64,
    /// 最后一次 signal 的值（帧结束和 flush 共用一个计数器）
    last_signaled: FenceValue,
    drained: bool,
}

impl<D: GpuDevice> FramePipeline<D> {
    /// 创建分配器、Fence 和等待事件
    pub fn new(device: &D) -> Result<Self> {
        let slots: Vec<FrameSlot<D::CommandAllocator>> = (0..FRAMES_IN_FLIGHT)
            .map(|_| -> Result<FrameSlot<D::CommandAllocator>> {
                Ok(FrameSlot {
                    allocator: device.create_command_allocator()?,
                    fence_value: FenceValue::default(),
                })
            })
            .collect::<Result<_>>()?;
        let slots: [FrameSlot<D::CommandAllocator>; FRAMES_IN_FLIGHT] = slots
            .try_into()
            .map_err(|_| DistGfxError::Initialization("Frame slot count mismatch".to_string()))?;

        let fence = device.create_fence(0)?;
        let fence_event = device.create_fence_event()?;

        debug!(frames_in_flight = FRAMES_IN_FLIGHT, "Frame pipeline created");

        Ok(Self {
            slots,
            fence,
            fence_event,
            frame_count: 0,
            last_signaled: FenceValue::default(),
            drained: false,
        })
    }

    /// 当前帧槽位
    pub fn frame_index(&self) -> usize {
        (self.frame_count % FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 当前帧槽位的命令分配器
    pub fn current_allocator(&self) -> &D::CommandAllocator {
        &self.slots[self.frame_index()].allocator
    }

    /// 最后一次 signal 的 Fence 值
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// GPU 已经完成的 Fence 值
    pub fn completed_value(&self, device: &D) -> FenceValue {
        FenceValue::new(device.completed_value(&self.fence))
    }

    /// 槽位 `index` 上一次占用者 signal 的值
    pub fn slot_fence_value(&self, index: usize) -> FenceValue {
        self.slots[index].fence_value
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// 开始一帧：等待当前槽位可复用，然后重置它的分配器
    ///
    /// 返回当前帧槽位。调用方在此之后才能重置该槽位的逐帧描述符堆。
    pub fn begin_frame(&mut self, device: &D) -> Result<usize> {
        if self.drained {
            return Err(GraphicsError::ContextDrained.into());
        }

        let index = self.frame_index();
        let required = self.slots[index].fence_value;
        self.wait_for(device, required)?;
        device.reset_command_allocator(&self.slots[index].allocator)?;

        trace!(
            frame_count = self.frame_count,
            frame_index = index,
            fence_value = required.value(),
            "Frame slot reused"
        );
        Ok(index)
    }

    /// 结束一帧：signal 新值并记到当前槽位上
    pub fn end_frame(&mut self, device: &D, queue: &D::CommandQueue) -> Result<FenceValue> {
        let value = self.signal(device, queue)?;
        let index = self.frame_index();
        self.slots[index].fence_value = value;
        self.frame_count += 1;

        trace!(
            frame_count = self.frame_count,
            frame_index = index,
            fence_value = value.value(),
            "Frame submitted"
        );
        Ok(value)
    }

    /// 阻塞直到 Fence 到达 `value`；已经到达时不进入等待
    ///
    /// 完成值读到 `u64::MAX` 表示设备已丢失，返回 `GraphicsError::DeviceRemoved`。
    pub fn wait_for(&self, device: &D, value: FenceValue) -> Result<()> {
        let completed = device.completed_value(&self.fence);
        if completed == DEVICE_LOST_FENCE_VALUE {
            return Err(GraphicsError::DeviceRemoved(format!(
                "fence reads {:#x} while waiting for {}",
                completed,
                value.value()
            ))
            .into());
        }
        if completed >= value.value() {
            return Ok(());
        }

        debug!(
            frame_count = self.frame_count,
            fence_value = value.value(),
            completed,
            "Waiting for GPU"
        );
        device.wait_for_value(&self.fence, &self.fence_event, value.value())
    }

    /// signal 并等待 GPU 完成目前提交的所有工作
    ///
    /// 不改变 `frame_count`，所以帧槽位的轮换不受影响。
    pub fn flush(&mut self, device: &D, queue: &D::CommandQueue) -> Result<FenceValue> {
        let value = self.signal(device, queue)?;
        self.wait_for(device, value)?;
        Ok(value)
    }

    /// 关闭前排空 GPU 工作，之后不允许再开始新帧
    pub fn drain(&mut self, device: &D, queue: &D::CommandQueue) -> Result<FenceValue> {
        let value = self.flush(device, queue)?;
        self.drained = true;
        info!(
            frame_count = self.frame_count,
            fence_value = value.value(),
            "Frame pipeline drained"
        );
        Ok(value)
    }

    fn signal(&mut self, device: &D, queue: &D::CommandQueue) -> Result<FenceValue> {
        let value = self.last_signaled.next();
        device.signal(queue, &self.fence, value.value())?;
        self.last_signaled = value;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CompletionMode;
    use crate::gfx::headless::{GpuEvent, HeadlessDevice, HeadlessQueue};

    fn run_frame(
        device: &HeadlessDevice,
        pipeline: &mut FramePipeline<HeadlessDevice>,
        queue: &HeadlessQueue,
    ) -> FenceValue {
        pipeline.begin_frame(device).unwrap();
        pipeline.end_frame(device, queue).unwrap()
    }

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::new(1) < FenceValue::new(2));
        assert_eq!(FenceValue::default().value(), 0);
    }

    #[test]
    fn test_frame_index_alternates() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let queue = device.create_command_queue().unwrap();
        let mut pipeline = FramePipeline::new(&device).unwrap();

        for frame in 0..5u64 {
            assert_eq!(pipeline.frame_index(), (frame % 2) as usize);
            let value = run_frame(&device, &mut pipeline, &queue);
            assert_eq!(value.value(), frame + 1);
        }
        assert_eq!(pipeline.frame_count(), 5);
    }

    #[test]
    fn test_waits_only_on_slot_reuse() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let mut pipeline = FramePipeline::new(&device).unwrap();

        run_frame(&device, &mut pipeline, &queue);
        run_frame(&device, &mut pipeline, &queue);
        assert!(!gpu.events().iter().any(|e| matches!(e, GpuEvent::CpuWait { .. })));
        assert_eq!(pipeline.completed_value(&device).value(), 0);

        // 第三帧复用槽位 0，必须等到第一帧的值
        pipeline.begin_frame(&device).unwrap();
        assert!(gpu
            .events()
            .iter()
            .any(|e| matches!(e, GpuEvent::CpuWait { value: 1, .. })));
        assert_eq!(pipeline.completed_value(&device).value(), 1);
    }

    #[test]
    fn test_flush_does_not_disturb_frame_index() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let queue = device.create_command_queue().unwrap();
        let mut pipeline = FramePipeline::new(&device).unwrap();

        run_frame(&device, &mut pipeline, &queue);
        let flushed = pipeline.flush(&device, &queue).unwrap();
        assert_eq!(flushed.value(), 2);
        assert_eq!(pipeline.frame_index(), 1);
        assert_eq!(pipeline.completed_value(&device), flushed);

        let value = run_frame(&device, &mut pipeline, &queue);
        assert_eq!(value.value(), 3);
        assert_eq!(pipeline.slot_fence_value(1), value);
    }

    #[test]
    fn test_wait_reports_device_loss() {
        let device = HeadlessDevice::with_completion(CompletionMode::Eager);
        let gpu = device.gpu();
        let queue = device.create_command_queue().unwrap();
        let mut pipeline = FramePipeline::new(&device).unwrap();
        run_frame(&device, &mut pipeline, &queue);

        gpu.remove_device("hung");
        // 已完成的值也不能掩盖设备丢失
        let err = pipeline.wait_for(&device, FenceValue::new(1)).unwrap_err();
        assert!(matches!(err, DistGfxError::Graphics(GraphicsError::DeviceRemoved(_))));

        gpu.clear_events();
        let err = pipeline.begin_frame(&device).unwrap_err();
        assert!(matches!(err, DistGfxError::Graphics(GraphicsError::DeviceRemoved(_))));
        assert!(!gpu
            .events()
            .iter()
            .any(|e| matches!(e, GpuEvent::AllocatorReset { .. })));
    }

    #[test]
    fn test_drain_latches() {
        let device = HeadlessDevice::with_completion(CompletionMode::OnWait);
        let queue = device.create_command_queue().unwrap();
        let mut pipeline = FramePipeline::new(&device).unwrap();

        run_frame(&device, &mut pipeline, &queue);
        let last = pipeline.drain(&device, &queue).unwrap();
        assert!(pipeline.is_drained());
        assert_eq!(pipeline.completed_value(&device), last);
        assert_eq!(pipeline.last_signaled(), last);

        let err = pipeline.begin_frame(&device).unwrap_err();
        assert!(matches!(err, DistGfxError::Graphics(GraphicsError::ContextDrained)));
    }
}
