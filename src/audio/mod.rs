//! 音频核心模块
//!
//! 包含：
//! - Ring Buffer: Lock-free 数据传递
//! - Format: 固定流格式与帧编码
//! - Stats: 播放统计
//! - Output: cpal 拉取式输出

pub mod format;
pub mod output;
pub mod ring_buffer;
pub mod stats;

pub use format::Frame;
pub use output::{AudioOutput, AudioSink, OutputConfig, OutputError, SinkStatus};
pub use ring_buffer::RingBuffer;
pub use stats::{PlaybackStats, StatsReport};
