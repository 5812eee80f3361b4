//! 帧源抽象
//!
//! 物理摄像头的采集与编码不在本 crate 范围内；调用方实现 [`FrameSource`]
//! 即可接入。内置两个实现：
//!
//! - [`ImageSequenceSource`]: 循环读取目录中的 JPEG/PNG 文件
//! - [`StillFrameSource`]: 反复返回同一帧（用于探测和测试）

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

/// 编码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
    Unknown,
}

impl FrameFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => FrameFormat::Jpeg,
            Some("png") => FrameFormat::Png,
            _ => FrameFormat::Unknown,
        }
    }
}

/// 一帧已编码的图像
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub captured_at: SystemTime,
    pub format: FrameFormat,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, format: FrameFormat) -> Self {
        Self {
            data: data.into(),
            captured_at: SystemTime::now(),
            format,
        }
    }
}

/// 帧采集错误
#[derive(Error, Debug)]
pub enum CaptureError {
    /// 设备不可用（未连接、被占用、权限不足）
    #[error("Frame source unavailable")]
    Unavailable,
    #[error("Device error: {0}")]
    Device(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 采集到空帧
    #[error("Captured an empty frame")]
    EmptyFrame,
}

/// 帧源
pub trait FrameSource: Send {
    /// 采集并编码一帧
    fn capture(&mut self) -> Result<Frame, CaptureError>;

    /// 设备当前是否可用
    fn is_available(&self) -> bool {
        true
    }

    /// 释放设备。由 `FrameScheduler` 保证只调用一次。
    fn release(&mut self) {}
}

/// 循环读取一组图像文件
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    looping: bool,
    released: bool,
}

impl ImageSequenceSource {
    /// 按文件名排序读取目录下所有 `.jpg`/`.jpeg`/`.png` 文件
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && FrameFormat::from_path(&path) != FrameFormat::Unknown {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::Device(format!(
                "no JPEG/PNG images in {}",
                dir.display()
            )));
        }
        debug!("Image sequence source: {} files from {}", files.len(), dir.display());
        Ok(Self::from_files(files))
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            next: 0,
            looping: true,
            released: false,
        }
    }

    /// 播放一遍后是否从头开始（默认 true）
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if !self.is_available() {
            return Err(CaptureError::Unavailable);
        }

        let path = &self.files[self.next];
        let data = std::fs::read(path)?;
        let format = FrameFormat::from_path(path);

        self.next += 1;
        if self.looping && self.next == self.files.len() {
            self.next = 0;
        }

        if data.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        Ok(Frame::new(data, format))
    }

    fn is_available(&self) -> bool {
        !self.released && self.next < self.files.len()
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// 反复返回同一帧
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    data: Bytes,
    format: FrameFormat,
    released: bool,
}

impl StillFrameSource {
    pub fn new(data: impl Into<Bytes>, format: FrameFormat) -> Self {
        Self {
            data: data.into(),
            format,
            released: false,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        Ok(Self::new(data, FrameFormat::from_path(path)))
    }
}

impl FrameSource for StillFrameSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Unavailable);
        }
        if self.data.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        Ok(Frame::new(self.data.clone(), self.format))
    }

    fn is_available(&self) -> bool {
        !self.released
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_format_from_path() {
        assert_eq!(FrameFormat::from_path(Path::new("a/b.JPG")), FrameFormat::Jpeg);
        assert_eq!(FrameFormat::from_path(Path::new("x.png")), FrameFormat::Png);
        assert_eq!(FrameFormat::from_path(Path::new("notes.txt")), FrameFormat::Unknown);
        assert_eq!(FrameFormat::from_path(Path::new("noext")), FrameFormat::Unknown);
    }

    /// 目录中的图像按文件名顺序循环
    #[test]
    fn test_image_sequence_cycles_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.jpg"), b"second").unwrap();
        fs::write(dir.path().join("a.jpg"), b"first").unwrap();
        fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

        let mut source = ImageSequenceSource::from_dir(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let frames: Vec<Bytes> = (0..3).map(|_| source.capture().unwrap().data).collect();
        assert_eq!(frames[0].as_ref(), b"first");
        assert_eq!(frames[1].as_ref(), b"second");
        assert_eq!(frames[2].as_ref(), b"first");
    }

    #[test]
    fn test_image_sequence_without_looping_runs_dry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("only.png"), b"frame").unwrap();

        let mut source = ImageSequenceSource::from_dir(dir.path()).unwrap().looping(false);
        assert!(source.capture().is_ok());
        assert!(!source.is_available());
        assert!(matches!(source.capture(), Err(CaptureError::Unavailable)));
    }

    #[test]
    fn test_empty_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSequenceSource::from_dir(dir.path()),
            Err(CaptureError::Device(_))
        ));
    }

    #[test]
    fn test_released_source_is_unavailable() {
        let mut source = StillFrameSource::new(&b"jpeg"[..], FrameFormat::Jpeg);
        assert!(source.capture().is_ok());
        source.release();
        assert!(!source.is_available());
        assert!(matches!(source.capture(), Err(CaptureError::Unavailable)));
    }
}
