//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义宿主边界上的 `AppError`，界面层只需要处理这一种错误。
//! 转码链路内部使用 `TranscodeError`，到边界时经 `From` 自动转换。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `TranscodeError` 与 `std::io::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，界面层直接展示。

use serde::Serialize;

use crate::transcode::{Notice, TranscodeError};

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 转码链路错误（校验 / 解码 / 渲染 / 编码 / 导出）
    #[error("{0}")]
    Transcode(#[from] TranscodeError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 宿主配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl AppError {
    /// 转换为界面提示；非转码错误归入 `host` 阶段。
    pub fn to_notice(&self) -> Notice {
        match self {
            Self::Transcode(err) => Notice::from(err),
            Self::Io(_) => Notice::error("E_IO", "host", self.to_string()),
            Self::Config(_) => Notice::error("E_CONFIG", "host", self.to_string()),
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcode_error_converts_and_keeps_message() {
        let err: AppError = TranscodeError::NothingToExport.into();
        assert_eq!(err.to_string(), TranscodeError::NothingToExport.to_string());
        assert_eq!(err.to_notice().code, "E_NOTHING_TO_EXPORT");
    }

    #[test]
    fn serializes_as_plain_string() {
        let err = AppError::Config("缺少字段".to_string());
        let json = serde_json::to_string(&err).expect("serialize");
        assert_eq!(json, "\"配置错误: 缺少字段\"");
    }
}
