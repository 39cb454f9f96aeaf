//! 播放引擎
//!
//! 整合帧源、环形缓冲、节拍与输出各模块。
//! 核心设计：Reader 线程按节拍补充缓冲，输出回调完全解耦，
//! 通过 lock-free ring buffer 连接；启动会合保证首个节拍
//! 不早于预填充，就绪标志保证消费不早于预填充完成。

pub mod sync;

use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::audio::format::{tick_interval, Frame, FRAMES_PER_BUFFER};
use crate::audio::output::{AudioOutput, AudioSink, OutputConfig, OutputError};
use crate::audio::ring_buffer::RingBuffer;
use crate::audio::stats::{PlaybackStats, StatsReport};
use crate::pcm::{PcmError, PcmFile};
use self::sync::{ReadyFlag, SyncError, TickSignal};

/// 默认 ring buffer 容量（帧数）
pub const DEFAULT_BUFFER_FRAMES: usize = 32 * FRAMES_PER_BUFFER as usize;

/// 引擎配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 输出配置
    pub output: OutputConfig,
    /// Ring buffer 容量（帧数，向上取整到 2 的幂）
    pub buffer_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("decode error: {0}")]
    Pcm(#[from] PcmError),

    #[error("output error: {0}")]
    Output(#[from] OutputError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// 播放上下文
///
/// 跨线程共享状态的唯一载体：由引擎持有，
/// 以引用传递给 Reader、节拍线程与输出回调。
pub struct PlaybackContext {
    ring: Arc<RingBuffer<Frame>>,
    stats: Arc<PlaybackStats>,
    /// 单槽节拍标志，节拍线程置位，Reader 消费
    tick: TickSignal,
    /// Reader（预填充后）与节拍线程（首次睡眠前）的两方会合
    startup: Barrier,
    /// 预填充完成，恰好置位一次
    prefilled: ReadyFlag,
    /// 流结束（排空或中断），恰好置位一次
    finished: ReadyFlag,
    /// 后台线程停止标志，每轮迭代检查
    running: AtomicBool,
}

impl PlaybackContext {
    fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(RingBuffer::new(capacity)),
            stats: Arc::new(PlaybackStats::new()),
            tick: TickSignal::new(),
            startup: Barrier::new(2),
            prefilled: ReadyFlag::new("prefilled"),
            finished: ReadyFlag::new("finished"),
            running: AtomicBool::new(true),
        }
    }
}

/// 终止信号句柄
///
/// 供 Ctrl-C 处理器等外部通知者将播放标记为结束，
/// 唤醒等待终止信号的编排线程。
#[derive(Clone)]
pub struct StopHandle {
    ctx: Arc<PlaybackContext>,
}

impl StopHandle {
    pub fn finish(&self) {
        if let Err(e) = self.ctx.finished.set() {
            log::error!("Cannot signal termination: {}", e);
            process::exit(2);
        }
    }
}

/// 播放引擎（单次播放）
pub struct Engine {
    config: EngineConfig,
    ctx: Arc<PlaybackContext>,
}

impl Engine {
    /// 创建新引擎
    pub fn new(config: EngineConfig) -> Self {
        let capacity = config.buffer_frames.next_power_of_two();
        Self {
            ctx: Arc::new(PlaybackContext::new(capacity)),
            config,
        }
    }

    /// 获取终止信号句柄
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// 播放一个文件直到流排空（或被终止信号打断），返回统计报告
    ///
    /// 编排顺序：打开帧源 → 启动节拍与 Reader 线程 → 等待预填充 →
    /// 打开并启动输出流 → 等待流结束 → 关闭流 → 停止并 join 后台线程。
    /// 编排线程只在条件变量上等待，从不直接触碰 ring buffer。
    pub fn play<P: AsRef<Path>>(self, path: P) -> Result<StatsReport, EngineError> {
        let path = path.as_ref();

        let source = PcmFile::open(path)?;
        let info = source.info().clone();
        log::info!(
            "Loaded: {} | {} frames | {:.1}s @ {}Hz {}ch",
            path.display(),
            info.total_frames,
            info.duration_secs(),
            info.sample_rate,
            info.channels
        );

        self.ctx.ring.lock_memory();

        let timer_ctx = Arc::clone(&self.ctx);
        let timer = thread::Builder::new()
            .name("tick-timer".to_string())
            .spawn(move || timer_main(&timer_ctx, tick_interval()))
            .expect("Failed to spawn timer thread");

        let reader_ctx = Arc::clone(&self.ctx);
        let reader = thread::Builder::new()
            .name("pcm-reader".to_string())
            .spawn(move || reader_main(&reader_ctx, source))
            .expect("Failed to spawn reader thread");

        self.ctx.prefilled.wait()?;
        log::info!(
            "Prefill complete: {} frames buffered",
            self.ctx.ring.occupancy()
        );

        // 输出阶段失败时同样要走线程收尾，避免泄漏后台线程
        let playback = (|| -> Result<(), EngineError> {
            let mut output = AudioOutput::new(&self.config.output)?;
            let sink = AudioSink::new(
                Arc::clone(&self.ctx.ring),
                Arc::clone(&self.ctx.stats),
                info.total_frames,
            );
            let finish = self.stop_handle();
            output.start(sink, Arc::new(move || finish.finish()))?;

            self.ctx.finished.wait()?;
            output.stop()?;
            Ok(())
        })();

        let shutdown = self.shutdown_threads(reader, timer);
        playback?;
        shutdown?;

        Ok(self
            .ctx
            .stats
            .report(self.ctx.ring.underruns(), info.total_frames))
    }

    /// 停止后台线程并 join，确保不泄漏线程
    fn shutdown_threads(
        &self,
        reader: JoinHandle<()>,
        timer: JoinHandle<()>,
    ) -> Result<(), EngineError> {
        self.ctx.running.store(false, Ordering::Release);
        // 唤醒可能在等待节拍的 Reader
        self.ctx.tick.raise()?;

        if reader.join().is_err() {
            log::error!("Reader thread panicked");
        }
        if timer.join().is_err() {
            log::error!("Timer thread panicked");
        }
        Ok(())
    }
}

/// 节拍线程主函数
///
/// 周期为单个输出块的时间预算。首次睡眠前与 Reader 会合，
/// 保证预填充先于任何节拍触发。
fn timer_main(ctx: &PlaybackContext, interval: Duration) {
    ctx.startup.wait();

    while ctx.running.load(Ordering::Acquire) {
        thread::sleep(interval);
        if let Err(e) = ctx.tick.raise() {
            log::error!("Timer thread failed: {}", e);
            process::exit(2);
        }
    }
    log::debug!("Timer thread finished");
}

/// Reader 线程主函数
fn reader_main(ctx: &PlaybackContext, mut source: PcmFile) {
    if let Err(e) = run_reader(ctx, &mut source) {
        log::error!("Reader thread failed: {}", e);
        process::exit(2);
    }
}

/// Reader 主循环
///
/// 阶段一（一次）：与节拍无关地预填充，直到缓冲满或源耗尽，
/// 然后与节拍线程会合并置位预填充标志。
/// 阶段二（循环）：每个节拍补满一次；源耗尽后补充成为空操作，
/// 循环持续到停止标志置位。
fn run_reader(ctx: &PlaybackContext, source: &mut PcmFile) -> Result<(), SyncError> {
    refill(ctx, source);

    ctx.startup.wait();
    ctx.prefilled.set()?;
    log::debug!("Prefill done: {} frames", ctx.ring.occupancy());

    while ctx.running.load(Ordering::Acquire) {
        ctx.tick.next_tick()?;
        refill(ctx, source);
    }
    log::debug!("Reader thread finished");
    Ok(())
}

/// 将缓冲区补至容量上限或源耗尽
///
/// 短读报告后源变为惰性：已缓冲的帧继续播放，
/// 缺失的帧之后表现为 underrun，绝不输出损坏数据。
fn refill(ctx: &PlaybackContext, source: &mut PcmFile) {
    while !ctx.ring.is_full() && !source.is_exhausted() {
        match source.next_frame() {
            Ok(frame) => ctx.ring.write(frame),
            Err(e) => {
                log::error!("Read error, source disabled: {}", e);
                break;
            }
        }
    }
}
