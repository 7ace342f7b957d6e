//! # 导出模块
//!
//! ## 设计思路
//!
//! 导出只读取 `preview` 槽位的当前快照，交给下载目标（`DownloadSink`）。
//! 没有预览时返回 `NothingToExport`，作为面向用户的前置条件提示，而不是静默失败。
//!
//! ## 实现思路
//!
//! - 文件名 `<stem>.<ext>`，扩展名跟随产物格式
//! - stem 清理掉文件系统不允许的字符；为空时用本地时间戳生成
//! - `DirectorySink` 以 `create_new` 写入，同名时追加 ` (n)` 后缀，从不覆盖

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use super::ledger::ResourceLedger;
use super::{Dimensions, ImageKind, TranscodeError};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// 下载目标（界面层的下载触发器）。
pub trait DownloadSink: Send + Sync {
    /// 交付一个文件，返回实际使用的文件名。
    fn deliver(
        &self,
        file_name: &str,
        mime_type: &'static str,
        bytes: &[u8],
    ) -> Result<String, TranscodeError>;
}

/// 写入本地目录的下载目标。
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(
        &self,
        file_name: &str,
        _mime_type: &'static str,
        bytes: &[u8],
    ) -> Result<String, TranscodeError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TranscodeError::FileSystem(format!("无法创建导出目录：{}", e)))?;

        let (stem, ext) = match file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, Some(ext)),
            None => (file_name, None),
        };

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = match (attempt, ext) {
                (0, _) => file_name.to_string(),
                (n, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
                (n, None) => format!("{} ({})", stem, n),
            };
            let path = self.dir.join(&candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)
                        .map_err(|e| TranscodeError::FileSystem(format!("写入导出文件失败：{}", e)))?;
                    log::info!("💾 已导出 {}（{} bytes）", path.display(), bytes.len());
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(TranscodeError::FileSystem(format!("无法创建导出文件：{}", e)));
                }
            }
        }

        Err(TranscodeError::FileSystem(format!(
            "导出目录中同名文件过多：{}",
            file_name
        )))
    }
}

/// 一次导出的回执。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReceipt {
    pub file_name: String,
    pub format: ImageKind,
    pub dimensions: Dimensions,
    pub byte_len: usize,
}

/// 导出器。
pub struct Exporter<'a> {
    ledger: &'a ResourceLedger,
}

impl<'a> Exporter<'a> {
    pub fn new(ledger: &'a ResourceLedger) -> Self {
        Self { ledger }
    }

    pub fn export_current(
        &self,
        stem: &str,
        sink: &dyn DownloadSink,
    ) -> Result<ExportReceipt, TranscodeError> {
        let artifact = self
            .ledger
            .preview
            .get()
            .ok_or(TranscodeError::NothingToExport)?;

        let file_name = download_file_name(stem, artifact.format());
        let delivered = sink.deliver(&file_name, artifact.format().mime_type(), artifact.bytes())?;

        Ok(ExportReceipt {
            file_name: delivered,
            format: artifact.format(),
            dimensions: artifact.dimensions(),
            byte_len: artifact.byte_len(),
        })
    }
}

/// 生成下载文件名。
pub fn download_file_name(stem: &str, format: ImageKind) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');

    if cleaned.is_empty() {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S");
        format!("resized-{}.{}", timestamp, format.extension())
    } else {
        format!("{}.{}", cleaned, format.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        delivered: Mutex<Vec<(String, &'static str, usize)>>,
    }

    impl DownloadSink for MemorySink {
        fn deliver(
            &self,
            file_name: &str,
            mime_type: &'static str,
            bytes: &[u8],
        ) -> Result<String, TranscodeError> {
            self.delivered
                .lock()
                .expect("sink lock")
                .push((file_name.to_string(), mime_type, bytes.len()));
            Ok(file_name.to_string())
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "image-resizer-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn nothing_to_export_without_preview() {
        let ledger = ResourceLedger::new();
        let sink = MemorySink::default();

        let result = Exporter::new(&ledger).export_current("photo", &sink);

        assert!(matches!(result, Err(TranscodeError::NothingToExport)));
        assert!(sink.delivered.lock().expect("sink lock").is_empty());
    }

    #[test]
    fn file_name_extension_follows_format() {
        assert_eq!(download_file_name("holiday", ImageKind::Png), "holiday.png");
        assert_eq!(download_file_name("holiday", ImageKind::Jpeg), "holiday.jpg");
        assert_eq!(download_file_name("holiday", ImageKind::WebP), "holiday.webp");
    }

    #[test]
    fn file_name_is_sanitised() {
        assert_eq!(download_file_name("a/b:c?", ImageKind::Png), "a_b_c_.png");

        let generated = download_file_name(" .. ", ImageKind::WebP);
        assert!(generated.starts_with("resized-"));
        assert!(generated.ends_with(".webp"));
    }

    #[test]
    fn directory_sink_never_overwrites() {
        let dir = temp_dir("sink");
        let sink = DirectorySink::new(&dir);

        let first = sink.deliver("out.png", "image/png", b"one").expect("first write");
        let second = sink.deliver("out.png", "image/png", b"two").expect("second write");

        assert_eq!(first, "out.png");
        assert_eq!(second, "out (1).png");
        assert_eq!(std::fs::read(dir.join("out.png")).expect("read"), b"one");
        assert_eq!(std::fs::read(dir.join("out (1).png")).expect("read"), b"two");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
