//! # 文件校验模块
//!
//! ## 设计思路
//!
//! 在任何资源分配之前对输入文件做防御性检查，尽快失败：
//! 1. 体积上限（与内容无关，最先检查）
//! 2. 声明的 MIME 类型白名单
//! 3. 文件头签名（magic bytes）嗅探，声明类型永远不单独信任
//!
//! 校验是纯检查，没有副作用；拒绝以 `ValidationVerdict::Rejected` 返回而不是抛出。

use super::{ImageKind, Rejection, SourceFile, TranscodeError};

/// 校验结论。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted { sniffed: ImageKind },
    Rejected { reason: Rejection, detail: String },
}

impl ValidationVerdict {
    /// 转换为 `Result`，便于在编排层使用 `?`。
    pub fn into_result(self) -> Result<ImageKind, TranscodeError> {
        match self {
            Self::Accepted { sniffed } => Ok(sniffed),
            Self::Rejected { reason, detail } => Err(TranscodeError::rejected(reason, detail)),
        }
    }
}

/// 文件守卫。
#[derive(Debug, Clone)]
pub struct FileGuard {
    max_file_size: u64,
}

impl FileGuard {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn validate(&self, file: &SourceFile) -> ValidationVerdict {
        if file.len() > self.max_file_size {
            return ValidationVerdict::Rejected {
                reason: Rejection::Oversized,
                detail: format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    file.len() as f64 / 1024.0 / 1024.0,
                    self.max_file_size as f64 / 1024.0 / 1024.0
                ),
            };
        }

        let Some(declared) = ImageKind::from_mime(file.declared_type()) else {
            return ValidationVerdict::Rejected {
                reason: Rejection::DisallowedDeclaredType,
                detail: format!("不支持的文件类型：{}", file.declared_type()),
            };
        };

        let Some(sniffed) = sniff_signature(file.bytes()) else {
            let actual = if file.is_empty() {
                "空文件".to_string()
            } else {
                infer::get(file.bytes())
                    .map(|kind| kind.mime_type().to_string())
                    .unwrap_or_else(|| "未知".to_string())
            };
            return ValidationVerdict::Rejected {
                reason: Rejection::SignatureMismatch,
                detail: format!("文件签名与声明类型 {} 不符（实际：{}）", declared, actual),
            };
        };

        if sniffed != declared {
            log::warn!(
                "⚠️ 声明类型与文件签名不一致 - 文件: {} 声明: {} 签名: {}，以签名为准",
                file.name(),
                declared,
                sniffed
            );
        }

        ValidationVerdict::Accepted { sniffed }
    }
}

/// 逐一比对允许格式的 magic 序列。
pub(crate) fn sniff_signature(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.is_empty() {
        return None;
    }

    ImageKind::ALL.into_iter().find(|kind| match kind {
        ImageKind::Png => infer::image::is_png(bytes),
        ImageKind::Jpeg => infer::image::is_jpeg(bytes),
        ImageKind::WebP => infer::image::is_webp(bytes),
    })
}
