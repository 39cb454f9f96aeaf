//! PCM 文件帧源
//!
//! 以固定偏移跳过文件头（内容不解析），顺序读取定长帧。
//! 长度校验在打开时一次完成：文件至少容纳文件头，
//! 且负载必须是帧大小的整数倍，违反即为致命错误。

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use crate::audio::format::{Frame, BYTES_PER_FRAME, CHANNELS, SAMPLE_RATE};

/// 文件头大小（字节），内容忽略
pub const HEADER_SIZE: u64 = 44;

/// 帧源错误
#[derive(Debug, Error)]
pub enum PcmError {
    #[error("cannot open file: {0}")]
    Open(#[source] io::Error),

    #[error("cannot stat file: {0}")]
    Metadata(#[source] io::Error),

    #[error("file is {size} bytes, smaller than the {HEADER_SIZE}-byte header")]
    TooShort { size: u64 },

    #[error("PCM payload of {payload} bytes is not a whole number of frames")]
    Misaligned { payload: u64 },

    #[error("cannot seek past header: {0}")]
    Seek(#[source] io::Error),

    #[error("short read at frame {frame}: {source}")]
    ShortRead {
        frame: u64,
        #[source]
        source: io::Error,
    },
}

/// 流信息
#[derive(Debug, Clone)]
pub struct PcmInfo {
    /// 源文件总帧数
    pub total_frames: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmInfo {
    /// 播放时长（秒）
    pub fn duration_secs(&self) -> f64 {
        self.total_frames as f64 / self.sample_rate as f64
    }
}

/// 顺序 PCM 帧读取器
///
/// 打开后定位一次，之后严格顺序读取，不再 seek。
/// 短读（文件被截断或损坏）报告为错误，绝不静默补零；
/// 出错后源变为惰性，`is_exhausted()` 立即为真。
pub struct PcmFile {
    reader: BufReader<File>,
    info: PcmInfo,
    frames_read: u64,
    failed: bool,
}

impl PcmFile {
    /// 打开并校验输入文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PcmError> {
        let file = File::open(path).map_err(PcmError::Open)?;
        let size = file.metadata().map_err(PcmError::Metadata)?.len();

        if size < HEADER_SIZE {
            return Err(PcmError::TooShort { size });
        }
        let payload = size - HEADER_SIZE;
        if payload % BYTES_PER_FRAME as u64 != 0 {
            return Err(PcmError::Misaligned { payload });
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(HEADER_SIZE))
            .map_err(PcmError::Seek)?;

        Ok(Self {
            reader,
            info: PcmInfo {
                total_frames: payload / BYTES_PER_FRAME as u64,
                sample_rate: SAMPLE_RATE,
                channels: CHANNELS,
            },
            frames_read: 0,
            failed: false,
        })
    }

    pub fn info(&self) -> &PcmInfo {
        &self.info
    }

    /// 已读取的帧数
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// 源是否已无帧可供：读尽，或此前发生过读取错误
    pub fn is_exhausted(&self) -> bool {
        self.failed || self.frames_read >= self.info.total_frames
    }

    /// 读取下一帧
    ///
    /// 调用方应先检查 `is_exhausted()`。
    pub fn next_frame(&mut self) -> Result<Frame, PcmError> {
        let mut buf = [0u8; BYTES_PER_FRAME];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            self.failed = true;
            return Err(PcmError::ShortRead {
                frame: self.frames_read,
                source: e,
            });
        }
        self.frames_read += 1;
        Ok(Frame::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    /// 写一个测试夹具：44 字节文件头 + 指定帧序列 + 可选的尾部垃圾字节
    fn fixture(name: &str, frames: &[Frame], trailing: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "pcm-replayer-pcm-{}-{}",
            std::process::id(),
            name
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0u8; HEADER_SIZE as usize]).unwrap();
        for frame in frames {
            file.write_all(&frame.to_le_bytes()).unwrap();
        }
        file.write_all(trailing).unwrap();
        path
    }

    fn ramp(n: u64) -> Vec<Frame> {
        (0..n)
            .map(|i| Frame {
                left: i as i16,
                right: -(i as i16),
            })
            .collect()
    }

    #[test]
    fn test_open_reads_frames_in_order() {
        let frames = ramp(5);
        let path = fixture("order", &frames, &[]);

        let mut source = PcmFile::open(&path).unwrap();
        assert_eq!(source.info().total_frames, 5);
        assert_eq!(source.info().sample_rate, SAMPLE_RATE);

        for expected in &frames {
            assert!(!source.is_exhausted());
            assert_eq!(source.next_frame().unwrap(), *expected);
        }
        assert!(source.is_exhausted());
        assert_eq!(source.frames_read(), 5);
    }

    #[test]
    fn test_empty_payload_is_valid_and_exhausted() {
        let path = fixture("empty", &[], &[]);
        let source = PcmFile::open(&path).unwrap();
        assert_eq!(source.info().total_frames, 0);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_rejects_file_shorter_than_header() {
        let path = std::env::temp_dir().join(format!(
            "pcm-replayer-pcm-{}-tooshort",
            std::process::id()
        ));
        File::create(&path).unwrap().write_all(&[0u8; 10]).unwrap();

        match PcmFile::open(&path) {
            Err(PcmError::TooShort { size }) => assert_eq!(size, 10),
            other => panic!("expected TooShort, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_rejects_misaligned_payload() {
        let path = fixture("misaligned", &ramp(3), &[0xAB, 0xCD]);

        match PcmFile::open(&path) {
            Err(PcmError::Misaligned { payload }) => assert_eq!(payload, 14),
            other => panic!("expected Misaligned, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_duration() {
        let info = PcmInfo {
            total_frames: SAMPLE_RATE as u64 * 2,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        };
        assert!((info.duration_secs() - 2.0).abs() < 1e-9);
    }
}
