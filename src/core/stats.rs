//! 帧统计模块
//!
//! FrameStats 为每帧提供时间戳和帧间隔，并每秒刷新一次帧率文本。
//! 纯观测用途，对帧同步没有任何影响。

use std::time::{Duration, Instant};

/// 单帧的时间信息
#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    /// 自统计器创建以来的秒数
    pub time: f64,
    /// 距上一帧的秒数
    pub delta_time: f32,
}

/// 帧统计（帧率、帧时间）
pub struct FrameStats {
    start: Instant,
    previous: Instant,
    last_update: Instant,
    frames_since_update: u32,
    fps: f32,
    frame_time_ms: f32,
}

impl FrameStats {
    /// 创建新的帧统计器
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            previous: now,
            last_update: now,
            frames_since_update: 0,
            fps: 0.0,
            frame_time_ms: 0.0,
        }
    }

    /// 记录一帧，返回本帧的时间信息
    ///
    /// 返回 `true` 的第二个值表示帧率文本已刷新（每秒一次）。
    pub fn update(&mut self) -> (FrameTime, bool) {
        self.update_at(Instant::now())
    }

    fn update_at(&mut self, now: Instant) -> (FrameTime, bool) {
        let frame_time = FrameTime {
            time: now.duration_since(self.start).as_secs_f64(),
            delta_time: now.duration_since(self.previous).as_secs_f32(),
        };
        self.previous = now;
        self.frames_since_update += 1;

        let elapsed = now.duration_since(self.last_update);
        let refreshed = elapsed >= Duration::from_secs(1);
        if refreshed {
            self.fps = self.frames_since_update as f32 / elapsed.as_secs_f32();
            self.frame_time_ms = 1000.0 / self.fps;
            self.frames_since_update = 0;
            self.last_update = now;
        }

        (frame_time, refreshed)
    }

    /// 当前 FPS
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// 当前帧时间（毫秒）
    pub fn frame_time_ms(&self) -> f32 {
        self.frame_time_ms
    }

    /// 窗口标题文本，例如 `"DistGfx  60.0 fps  16.67 ms"`
    pub fn title(&self, name: &str) -> String {
        format!("{}  {:.1} fps  {:.2} ms", name, self.fps, self.frame_time_ms)
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_refresh_once_per_second() {
        let mut stats = FrameStats::new();
        let base = stats.start;

        for i in 1..60 {
            let (_, refreshed) = stats.update_at(base + Duration::from_millis(i * 16));
            assert!(!refreshed);
        }

        let (frame, refreshed) = stats.update_at(base + Duration::from_millis(1000));
        assert!(refreshed);
        assert!((stats.fps() - 60.0).abs() < 0.01);
        assert!((frame.time - 1.0).abs() < 1e-9);
        assert!((frame.delta_time - 0.056).abs() < 1e-4);
        assert!(stats.title("DistGfx").starts_with("DistGfx  60.0 fps"));
    }
}
