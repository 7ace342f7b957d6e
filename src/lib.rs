//! # 图片尺寸调整工具：转码核心库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                界面层（文件选择 · 输入框 · 预览）          │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<T, AppError> / Notice
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            转码核心 (Rust)                       │
//! │                                                          │
//! │  ┌─ error ────── AppError (宿主边界错误类型)              │
//! │  │                                                       │
//! │  └─ transcode                                            │
//! │      ├─ service      配置 + 性能档位 + 会话入口           │
//! │      ├─ session      校验→解码→规划→渲染→导出 编排        │
//! │      ├─ ledger       source / preview 槽位 + 代数         │
//! │      └─ object_url   可撤销预览句柄                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 宿主边界错误类型 `AppError`，可序列化 |
//! | [`transcode`] | 文件校验、解码、尺寸规划、渲染编码、资源账本、导出 |

pub mod error;
pub mod transcode;

/// 初始化日志。
///
/// 默认 `info` 级别，可通过 `RUST_LOG` 覆盖。重复调用是安全的。
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
