//! PCM Replayer - 实时 PCM 文件播放器
//!
//! 设计目标：
//! - 磁盘读取与实时输出解耦：lock-free ring buffer + 节拍驱动的补充
//! - 消费永不阻塞：underrun 只计数，不产生停顿或崩溃
//! - 启动有序：预填充完成之前输出流不会启动

use std::path::PathBuf;

use clap::Parser;

use pcm_replayer::audio::OutputConfig;
use pcm_replayer::engine::{Engine, EngineConfig, DEFAULT_BUFFER_FRAMES};

/// PCM Replayer - Real-time PCM file player
#[derive(Parser)]
#[command(name = "pcm-replayer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// PCM file to play (44.1kHz 16-bit interleaved stereo, 44-byte header)
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Ring buffer capacity in frames (rounded up to a power of two)
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_FRAMES)]
    buffer_frames: usize,

    /// Select output device by name
    #[arg(short, long)]
    device: Option<String>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let config = EngineConfig {
        output: OutputConfig {
            device: cli.device.clone(),
        },
        buffer_frames: cli.buffer_frames,
    };

    let engine = Engine::new(config);

    // Ctrl+C：把播放标记为结束，走正常的收尾路径（关流、join、报告）
    let handle = engine.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, finishing playback");
        handle.finish();
    })?;

    let report = engine.play(&cli.file)?;
    print!("{}", report);

    Ok(())
}
