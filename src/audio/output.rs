//! cpal 音频输出
//!
//! 打开默认（或指定）输出设备，注册拉取式回调。
//! 回调在后端的实时线程上执行；流排空后触发一次性的完成通知。

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig};
use thiserror::Error;

use super::format::{Frame, CHANNELS, FRAMES_PER_BUFFER, SAMPLE_RATE};
use super::ring_buffer::RingBuffer;
use super::stats::PlaybackStats;

/// 输出错误
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no default output device available")]
    NoDevice,

    #[error("output device '{0}' not found")]
    DeviceNotFound(String),

    #[error("cannot enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("cannot query device configurations: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("device supports neither 16-bit integer nor float stereo output at 44100 Hz")]
    UnsupportedFormat,

    #[error("cannot build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("cannot start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("cannot stop output stream: {0}")]
    Stop(#[from] cpal::PauseStreamError),
}

/// 输出配置
#[derive(Clone, Debug, Default)]
pub struct OutputConfig {
    /// 按名称选择输出设备；None 使用系统默认设备
    pub device: Option<String>,
}

/// 回调返回状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStatus {
    /// 流中还有待消费的帧
    Continue,
    /// 全部源帧已消费完毕
    Complete,
}

/// 实时消费者
///
/// 由输出后端按其回调粒度拉取，从 ring buffer 逐帧读出写入输出块。
///
/// **绝对禁止：**
/// - 锁
/// - 分配
/// - I/O
///
/// 唯一允许的操作是 wait-free 的 ring buffer 读取与原子统计更新。
pub struct AudioSink {
    ring: Arc<RingBuffer<Frame>>,
    stats: Arc<PlaybackStats>,
    /// 源文件总帧数，消费达到该值即完成
    total_frames: u64,
    /// 已消费帧数（相对整个 PCM 流）
    consumed: u64,
}

impl AudioSink {
    pub fn new(
        ring: Arc<RingBuffer<Frame>>,
        stats: Arc<PlaybackStats>,
        total_frames: u64,
    ) -> Self {
        Self {
            ring,
            stats,
            total_frames,
            consumed: 0,
        }
    }

    /// 已消费的帧数
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// 复制一个消费计数归零的 sink，用于流构建失败后的重试
    fn clone_fresh(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            stats: Arc::clone(&self.stats),
            total_frames: self.total_frames,
            consumed: 0,
        }
    }

    /// 填充一个输出块
    ///
    /// 每个请求槽位在消费计数达到总帧数之前都从 ring buffer 读取；
    /// 之后的槽位写入静音。完成后的每次调用都继续返回 Complete。
    pub fn render<T>(&mut self, data: &mut [T]) -> SinkStatus
    where
        T: cpal::SizedSample + cpal::FromSample<i16>,
    {
        self.stats.on_callback(self.ring.occupancy());

        let mut rendered = 0u64;
        for slot in data.chunks_mut(CHANNELS as usize) {
            if self.consumed >= self.total_frames {
                for sample in slot {
                    *sample = T::EQUILIBRIUM;
                }
                continue;
            }

            let frame = self.ring.read();
            slot[0] = T::from_sample(frame.left);
            if slot.len() > 1 {
                slot[1] = T::from_sample(frame.right);
            }
            self.consumed += 1;
            rendered += 1;
        }
        self.stats.add_frames_played(rendered);

        if self.consumed >= self.total_frames {
            SinkStatus::Complete
        } else {
            SinkStatus::Continue
        }
    }
}

/// cpal 输出流封装
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// 打开输出设备并协商流配置
    pub fn new(config: &OutputConfig) -> Result<Self, OutputError> {
        let host = cpal::default_host();

        let device = match &config.device {
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().ok().as_deref() == Some(name.as_str()))
                .ok_or_else(|| OutputError::DeviceNotFound(name.clone()))?,
            None => host.default_output_device().ok_or(OutputError::NoDevice)?,
        };

        log::info!(
            "Output device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let (stream_config, sample_format) = Self::pick_config(&device)?;
        log::debug!(
            "Stream config: {}Hz {}ch {:?}, buffer {:?}",
            stream_config.sample_rate.0,
            stream_config.channels,
            sample_format,
            stream_config.buffer_size
        );

        Ok(Self {
            device,
            config: stream_config,
            sample_format,
            stream: None,
        })
    }

    /// 选择设备配置：优先原生 i16，否则回退到 f32（逐样本转换）
    fn pick_config(device: &Device) -> Result<(StreamConfig, SampleFormat), OutputError> {
        let supported: Vec<_> = device.supported_output_configs()?.collect();

        for wanted in [SampleFormat::I16, SampleFormat::F32] {
            let found = supported
                .iter()
                .find(|c| {
                    c.channels() == CHANNELS
                        && c.sample_format() == wanted
                        && c.min_sample_rate().0 <= SAMPLE_RATE
                        && c.max_sample_rate().0 >= SAMPLE_RATE
                })
                .cloned();
            if let Some(range) = found {
                let mut config = range.with_sample_rate(SampleRate(SAMPLE_RATE)).config();
                config.buffer_size = BufferSize::Fixed(FRAMES_PER_BUFFER);
                return Ok((config, wanted));
            }
        }

        Err(OutputError::UnsupportedFormat)
    }

    /// 启动输出流
    ///
    /// `on_finished` 在 sink 首次报告 Complete 时恰好调用一次。
    /// 设备拒绝固定回调块大小时回退到设备默认值并告警。
    pub fn start(
        &mut self,
        sink: AudioSink,
        on_finished: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), OutputError> {
        let stream = match self.build(sink.clone_fresh(), Arc::clone(&on_finished)) {
            Ok(stream) => stream,
            Err(OutputError::Build(e))
                if matches!(self.config.buffer_size, BufferSize::Fixed(_)) =>
            {
                log::warn!(
                    "Device rejected fixed buffer of {} frames, using device default: {}",
                    FRAMES_PER_BUFFER,
                    e
                );
                self.config.buffer_size = BufferSize::Default;
                self.build(sink, on_finished)?
            }
            Err(e) => return Err(e),
        };

        stream.play()?;
        self.stream = Some(stream);
        log::info!("Audio stream started");
        Ok(())
    }

    fn build(
        &self,
        sink: AudioSink,
        on_finished: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Stream, OutputError> {
        match self.sample_format {
            SampleFormat::I16 => self.build_stream::<i16>(sink, on_finished),
            SampleFormat::F32 => self.build_stream::<f32>(sink, on_finished),
            _ => Err(OutputError::UnsupportedFormat),
        }
    }

    fn build_stream<T>(
        &self,
        mut sink: AudioSink,
        on_finished: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Stream, OutputError>
    where
        T: cpal::SizedSample + cpal::FromSample<i16>,
    {
        let mut finished = false;

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let status = sink.render(data);

                // 完成通知只在最后一个音频帧写出之后触发，
                // 此后流中只有静音，通知内部的同步开销不再影响可听输出。
                if status == SinkStatus::Complete && !finished {
                    finished = true;
                    on_finished();
                }
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )?;

        Ok(stream)
    }

    /// 停止并关闭输出流
    pub fn stop(&mut self) -> Result<(), OutputError> {
        if let Some(stream) = self.stream.take() {
            stream.pause()?;
            drop(stream);
            log::info!("Audio stream stopped");
        }
        Ok(())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
