//! 播放统计模块
//!
//! 在音频回调中收集统计信息，采用降频采样策略减少开销

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 统计采样间隔：每 N 次 callback 才采样一次水位
const SAMPLE_INTERVAL: u64 = 16;

/// 播放统计收集器
///
/// 所有操作都是 lock-free 的，适合在音频回调中使用
pub struct PlaybackStats {
    callback_count: AtomicU64,
    frames_played: AtomicU64,

    // 水位极值（降频采样）
    water_level_min: AtomicUsize,
    water_level_max: AtomicUsize,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self {
            callback_count: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
            water_level_min: AtomicUsize::new(usize::MAX),
            water_level_max: AtomicUsize::new(0),
        }
    }

    /// 在输出回调内调用
    ///
    /// 只在采样点才记录水位，减少热路径开销
    #[inline]
    pub fn on_callback(&self, water_level: usize) {
        let count = self.callback_count.fetch_add(1, Ordering::Relaxed);

        if count % SAMPLE_INTERVAL == 0 {
            self.water_level_min.fetch_min(water_level, Ordering::Relaxed);
            self.water_level_max.fetch_max(water_level, Ordering::Relaxed);
        }
    }

    /// 更新已播放帧数
    #[inline]
    pub fn add_frames_played(&self, frames: u64) {
        self.frames_played.fetch_add(frames, Ordering::Relaxed);
    }

    /// 获取 callback 计数
    #[inline]
    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    /// 获取已播放帧数
    #[inline]
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self, underruns: u64, total_frames: u64) -> StatsReport {
        let min = self.water_level_min.load(Ordering::Relaxed);

        StatsReport {
            callback_count: self.callback_count.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            total_frames,
            water_level_min: if min == usize::MAX { 0 } else { min },
            water_level_max: self.water_level_max.load(Ordering::Relaxed),
            underruns,
        }
    }
}

impl Default for PlaybackStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub callback_count: u64,
    pub frames_played: u64,
    pub total_frames: u64,
    pub water_level_min: usize,
    pub water_level_max: usize,
    pub underruns: u64,
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Playback Statistics")?;
        writeln!(f, "===================")?;
        writeln!(f, "Total callbacks: {}", self.callback_count)?;
        writeln!(
            f,
            "Frames played: {} / {}",
            self.frames_played, self.total_frames
        )?;
        writeln!(f, "Ring buffer water level:")?;
        writeln!(f, "  Min: {} frames", self.water_level_min)?;
        writeln!(f, "  Max: {} frames", self.water_level_max)?;
        writeln!(f, "Underruns: {}", self.underruns)?;

        Ok(())
    }
}
