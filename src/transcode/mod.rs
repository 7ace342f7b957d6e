//! # 图片转码模块（transcode）
//!
//! ## 设计思路
//!
//! 该模块将“文件校验 → 解码 → 尺寸规划 → 绘制编码 → 预览安装 → 导出”
//! 按职责拆分为多个子模块，所有临时资源统一交给资源账本管理。
//!
//! - `guard`：体积、声明类型、文件签名三层校验（纯检查）
//! - `ledger`：`source` / `preview` 两个槽位与代数协议
//! - `decoder`：方向感知解码与回退路径
//! - `planner`：宽高联动与上限截断（纯函数）
//! - `render`：防抖 → 绘制 → 编码 → 按代数安装
//! - `exporter`：导出当前预览
//! - `session`：编排一次编辑会话
//! - `service`：可注入状态，持有运行时配置
//! - `config/error/source/object_url`：配置、错误、中间数据模型、预览句柄
//!
//! ## 新同事快速上手
//!
//! ```text
//! 界面层选择文件
//!    ↓
//! service.rs（open_session，配置快照）
//!    ↓
//! session.rs（编排 + 阶段耗时日志）
//!    ├─ guard.rs（同步校验，拒绝即返回）
//!    ├─ decoder.rs（阻塞线程池解码 → ledger.source）
//!    ├─ planner.rs（每次宽高编辑）
//!    ├─ render.rs（防抖 + 绘制 + 编码 → ledger.preview）
//!    └─ exporter.rs（读取 ledger.preview → DownloadSink）
//! ```
//!
//! ## 正确性核心
//!
//! 异步解码、编码的完成顺序不保证与发起顺序一致。每个槽位的代数在发起时捕获，
//! 完成时比对：不是最新就释放自己的产物。取消、防抖、会话结束都复用这一机制。

mod config;
mod decoder;
mod error;
mod exporter;
mod guard;
mod ledger;
mod object_url;
mod planner;
mod render;
mod service;
mod session;
mod source;

pub use config::{
    DEFAULT_MAX_DECODED_BYTES, DEFAULT_MAX_FILE_SIZE, ImagePerformanceProfile, ResizeFilter,
    SAFE_MAX_DIMENSION, TranscodeConfig,
};
pub use decoder::{DecodePath, DecodedImage, Decoder};
pub use error::{Notice, NoticeLevel, Rejection, TranscodeError};
pub use exporter::{DirectorySink, DownloadSink, ExportReceipt, Exporter, download_file_name};
pub use guard::{FileGuard, ValidationVerdict};
pub use ledger::{Generation, InstallOutcome, Releasable, ResourceLedger, Slot, SlotName};
pub use object_url::{ObjectUrl, ObjectUrlStore};
pub use planner::{Axis, ResizeTarget, plan};
pub use render::{EncodedArtifact, RenderOutcome, RenderPipeline, RenderTicket};
pub use service::ResizerService;
pub use session::{EditSession, LoadOutcome, LoadReport};
pub use source::{Dimensions, EncodeRequest, ImageKind, Quality, SourceFile};
