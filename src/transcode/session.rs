//! # 编辑会话
//!
//! ## 设计思路
//!
//! `EditSession` 只负责流程编排，不做任何图像运算。一次会话对应界面上的一个
//! 编辑面板，处理链路固定为：
//! 1. 校验（同步，任何资源分配之前）
//! 2. 解码并按代数安装到 `source` 槽位
//! 3. 每次参数编辑经尺寸规划后调度一次带防抖的渲染
//! 4. 按需导出当前预览
//!
//! ## 实现思路
//!
//! - 会话创建时拿到配置快照，整个会话内参数不漂移。
//! - 编辑状态（宽高、锁定、格式、质量）放在一把互斥锁里，锁内只做同步计算。
//! - 新文件安装成功后释放旧预览并把编辑状态重置为新图的自然尺寸。
//! - 记录 `validate/decode/total` 阶段耗时。
//! - 会话被丢弃时释放账本全部槽位，在途任务完成后会自行丢弃结果。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;

use super::decoder::{DecodePath, DecodedImage, Decoder};
use super::exporter::{DownloadSink, ExportReceipt, Exporter};
use super::guard::FileGuard;
use super::ledger::{Generation, InstallOutcome, ResourceLedger};
use super::object_url::ObjectUrlStore;
use super::planner::{self, Axis, ResizeTarget};
use super::render::{EncodedArtifact, RenderOutcome, RenderPipeline, RenderTicket};
use super::{
    Dimensions, EncodeRequest, ImageKind, Notice, Quality, SourceFile, TranscodeConfig,
    TranscodeError,
};

/// 加载成功后的摘要，交给界面层刷新输入框。
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    #[serde(skip)]
    pub generation: Generation,
    pub file_name: String,
    pub kind: ImageKind,
    pub natural: Dimensions,
    pub target: ResizeTarget,
    pub oriented: bool,
    pub warnings: Vec<Notice>,
}

/// `load_file` 的结果。
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(LoadReport),
    /// 解码期间有更新的加载或会话已结束，本次结果已丢弃。
    Superseded { generation: Generation },
}

#[derive(Debug, Clone)]
struct EditState {
    natural: Option<Dimensions>,
    stem: String,
    target: ResizeTarget,
    format: ImageKind,
    quality: Quality,
}

impl EditState {
    fn empty(config: &TranscodeConfig) -> Self {
        Self {
            natural: None,
            stem: String::new(),
            target: ResizeTarget {
                width: 1,
                height: 1,
                aspect_locked: true,
            },
            format: ImageKind::Png,
            quality: Quality::new(config.default_quality as u32),
        }
    }

    fn encode_request(&self) -> EncodeRequest {
        EncodeRequest {
            width: self.target.width,
            height: self.target.height,
            format: self.format,
            quality: self.quality,
        }
    }
}

/// 一次编辑会话。
pub struct EditSession {
    pub(super) config: TranscodeConfig,
    guard: FileGuard,
    decoder: Decoder,
    ledger: Arc<ResourceLedger>,
    pipeline: RenderPipeline,
    state: Mutex<EditState>,
}

impl EditSession {
    pub fn new(config: TranscodeConfig, urls: ObjectUrlStore) -> Self {
        let ledger = Arc::new(ResourceLedger::new());
        let pipeline = RenderPipeline::new(Arc::clone(&ledger), urls, &config);

        Self {
            guard: FileGuard::new(config.max_file_size),
            decoder: Decoder::from_config(&config),
            ledger,
            pipeline,
            state: Mutex::new(EditState::empty(&config)),
            config,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EditState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 加载一个新文件。
    ///
    /// 校验失败、解码失败时返回错误，此前加载的图片与预览保持不变。
    pub async fn load_file(&self, file: SourceFile) -> Result<LoadOutcome, TranscodeError> {
        let total_start = Instant::now();

        let validate_start = Instant::now();
        let kind = self.guard.validate(&file).into_result()?;
        let validate_elapsed = validate_start.elapsed();

        let generation = self.ledger.source.issue();

        let decode_start = Instant::now();
        let decoded = self.decoder.decode(&file, kind).await?;
        let decode_elapsed = decode_start.elapsed();

        let natural = decoded.natural();
        let path = decoded.path();

        if let InstallOutcome::Stale { current, .. } = self.ledger.source.install_for(generation, decoded) {
            log::info!(
                "⏭️ 加载 {} 已被更新的加载 {} 取代：{}",
                generation,
                current,
                file.name()
            );
            return Ok(LoadOutcome::Superseded { generation });
        }

        // 旧预览属于旧图，不再可达。
        self.ledger.preview.release();

        let max = self.config.effective_max_dimension();
        let target = ResizeTarget::initial(natural, max);
        {
            let mut state = self.lock_state();
            *state = EditState {
                natural: Some(natural),
                stem: file.stem().to_string(),
                target,
                format: kind,
                quality: Quality::new(self.config.default_quality as u32),
            };
        }

        let mut warnings = Vec::new();
        if path == DecodePath::Fallback && self.config.warn_on_orientation_fallback {
            warnings.push(Notice::warning(
                "W_ORIENTATION_FALLBACK",
                "decode",
                "当前图片使用通用解码路径，EXIF 方向未校正，预览可能是旋转的",
            ));
        }
        if ImageKind::from_mime(file.declared_type()) != Some(kind) {
            warnings.push(Notice::warning(
                "W_DECLARED_TYPE_MISMATCH",
                "validate",
                format!("文件声明类型 {} 与实际内容 {} 不一致", file.declared_type(), kind),
            ));
        }

        log::info!(
            "✅ 图片加载完成 - {} {} {} validate={}ms decode={}ms total={}ms",
            file.name(),
            kind,
            natural,
            validate_elapsed.as_millis(),
            decode_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(LoadOutcome::Loaded(LoadReport {
            generation,
            file_name: file.name().to_string(),
            kind,
            natural,
            target,
            oriented: path == DecodePath::Oriented,
            warnings,
        }))
    }

    /// 在锁内修改编辑状态并生成渲染参数快照。没有源图片时返回 `NoSource`。
    fn edit(
        &self,
        apply: impl FnOnce(&mut EditState, Dimensions, u32),
    ) -> Result<EncodeRequest, TranscodeError> {
        let mut state = self.lock_state();
        let natural = state.natural.ok_or(TranscodeError::NoSource)?;
        apply(&mut *state, natural, self.config.effective_max_dimension());
        Ok(state.encode_request())
    }

    pub fn set_width(&self, width: u32) -> Result<RenderTicket, TranscodeError> {
        let request = self.edit(|state, natural, max| {
            let edited = Dimensions::new(width, state.target.height);
            state.target = planner::plan(natural, edited, Axis::Width, state.target.aspect_locked, max);
        })?;
        Ok(self.pipeline.request(request))
    }

    pub fn set_height(&self, height: u32) -> Result<RenderTicket, TranscodeError> {
        let request = self.edit(|state, natural, max| {
            let edited = Dimensions::new(state.target.width, height);
            state.target = planner::plan(natural, edited, Axis::Height, state.target.aspect_locked, max);
        })?;
        Ok(self.pipeline.request(request))
    }

    /// 打开锁定时按当前宽度重算高度。
    pub fn set_aspect_locked(&self, locked: bool) -> Result<RenderTicket, TranscodeError> {
        let request = self.edit(|state, natural, max| {
            let current = state.target.dimensions();
            state.target = planner::plan(natural, current, Axis::Width, locked, max);
        })?;
        Ok(self.pipeline.request(request))
    }

    pub fn set_format(&self, format: ImageKind) -> Result<RenderTicket, TranscodeError> {
        let request = self.edit(|state, _, _| state.format = format)?;
        Ok(self.pipeline.request(request))
    }

    pub fn set_quality(&self, quality: u32) -> Result<RenderTicket, TranscodeError> {
        let request = self.edit(|state, _, _| state.quality = Quality::new(quality))?;
        Ok(self.pipeline.request(request))
    }

    /// 以当前参数立即渲染，跳过防抖。
    pub async fn render_now(&self) -> Result<RenderOutcome, TranscodeError> {
        let request = self.edit(|_, _, _| {})?;
        self.pipeline.render(request).await
    }

    pub fn target(&self) -> Option<ResizeTarget> {
        let state = self.lock_state();
        state.natural.map(|_| state.target)
    }

    pub fn encode_request(&self) -> Option<EncodeRequest> {
        let state = self.lock_state();
        state.natural.map(|_| state.encode_request())
    }

    pub fn source(&self) -> Option<Arc<DecodedImage>> {
        self.ledger.source.get()
    }

    pub fn preview(&self) -> Option<Arc<EncodedArtifact>> {
        self.ledger.preview.get()
    }

    /// 导出当前预览，文件名取自源文件名。
    pub fn export(&self, sink: &dyn DownloadSink) -> Result<ExportReceipt, TranscodeError> {
        let stem = self.lock_state().stem.clone();
        let receipt = Exporter::new(&self.ledger).export_current(&stem, sink)?;

        log::info!(
            "📤 导出完成 - {} {} {} bytes",
            receipt.file_name,
            receipt.dimensions,
            receipt.byte_len
        );
        Ok(receipt)
    }

    /// 结束会话：释放全部资源并清空编辑状态。会话之后仍可加载新文件。
    pub fn teardown(&self) {
        self.ledger.release_all();
        *self.lock_state() = EditState::empty(&self.config);
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.ledger.release_all();
    }
}
