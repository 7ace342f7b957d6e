//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载转码链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 校验拒绝原因是一个封闭枚举（`Rejection`），上层可以据此给出精确提示。

use serde::Serialize;

/// 文件校验拒绝原因（封闭集合）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rejection {
    /// 字节长度超过上限。
    Oversized,
    /// 声明的 MIME 类型不在白名单内。
    DisallowedDeclaredType,
    /// 文件头签名与任何允许格式都不匹配。
    SignatureMismatch,
    /// 通过校验但解码结果不可用（例如尺寸为 0）。
    CorruptAfterDecode,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Oversized => "oversized",
            Self::DisallowedDeclaredType => "disallowed-declared-type",
            Self::SignatureMismatch => "signature-mismatch",
            Self::CorruptAfterDecode => "corrupt-after-decode",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转码链路统一错误类型。
///
/// 任何错误都不是致命的：在产生它的操作边界返回，内部状态保持上一个可用配置。
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("文件被拒绝（{reason}）：{detail}")]
    Rejected { reason: Rejection, detail: String },

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("绘制错误：{0}")]
    Render(String),

    #[error("编码错误：{0}")]
    Encode(String),

    #[error("还没有可导出的结果")]
    NothingToExport,

    #[error("尚未加载源图片")]
    NoSource,

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("配置错误：{0}")]
    Config(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),
}

impl TranscodeError {
    pub(crate) fn rejected(reason: Rejection, detail: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    /// 稳定错误码，供前端做分支与埋点。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected { reason, .. } => match reason {
                Rejection::Oversized => "E_OVERSIZED",
                Rejection::DisallowedDeclaredType => "E_DISALLOWED_TYPE",
                Rejection::SignatureMismatch => "E_SIGNATURE_MISMATCH",
                Rejection::CorruptAfterDecode => "E_CORRUPT",
            },
            Self::Decode(_) => "E_DECODE",
            Self::Render(_) => "E_RENDER",
            Self::Encode(_) => "E_ENCODE",
            Self::NothingToExport => "E_NOTHING_TO_EXPORT",
            Self::NoSource => "E_NO_SOURCE",
            Self::InvalidFormat(_) => "E_INVALID_FORMAT",
            Self::FileSystem(_) => "E_FILE_SYSTEM",
            Self::Config(_) => "E_CONFIG",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
        }
    }

    /// 错误所属阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Rejected {
                reason: Rejection::CorruptAfterDecode,
                ..
            } => "decode",
            Self::Rejected { .. } | Self::InvalidFormat(_) | Self::FileSystem(_) => "validate",
            Self::Decode(_) => "decode",
            Self::Render(_) | Self::NoSource => "draw",
            Self::Encode(_) => "encode",
            Self::NothingToExport => "export",
            Self::Config(_) => "config",
            Self::ResourceLimit(_) => "limits",
        }
    }

    /// 若为校验拒绝，返回拒绝原因。
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// 提示级别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// 交给提示组件（toast）展示的一次性消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
}

impl Notice {
    pub fn warning(code: &'static str, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            code,
            stage,
            message: message.into(),
        }
    }

    pub fn error(code: &'static str, stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            code,
            stage,
            message: message.into(),
        }
    }
}

impl From<&TranscodeError> for Notice {
    fn from(error: &TranscodeError) -> Self {
        Self {
            level: NoticeLevel::Error,
            code: error.code(),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}
