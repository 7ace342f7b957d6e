//! # 渲染流水线
//!
//! ## 设计思路
//!
//! 参数变化频繁（拖动质量滑块、逐字输入宽度），每次变化都触发一次渲染周期：
//!
//! ```text
//! 防抖 → 绘制（缩放） → 编码 → 安装到 preview 槽位
//! ```
//!
//! 多个周期可能同时在途，完成顺序不保证与发起顺序一致。正确性完全由 `preview`
//! 槽位的代数保证：周期在发起时取得代数，只有完成时代数仍为最新才能安装，
//! 否则释放自己的产物（撤销句柄）。防抖只是限流，复用同一个代数判断。
//!
//! ## 实现思路
//!
//! - 防抖：睡眠静默窗口后检查代数，已被更新的请求直接返回 `Coalesced`，不绘制
//! - 绘制：`fast_image_resize` 卷积缩放，失败时回退 `image::resize_exact`
//! - 编码：PNG 不带质量参数；JPEG 去掉 alpha 后按质量编码；WebP 走 libwebp 有损编码
//! - 绘制与编码都在阻塞线程池执行
//! - 任何阶段失败都直接结束本周期，不触碰任何槽位

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgba};
use tokio::task::JoinHandle;

use super::ledger::{Generation, InstallOutcome, Releasable, ResourceLedger};
use super::object_url::{ObjectUrl, ObjectUrlStore};
use super::{Dimensions, EncodeRequest, ImageKind, Quality, ResizeFilter, TranscodeConfig, TranscodeError};

/// 编码产物，`preview` 槽位的句柄。
///
/// 释放时撤销对应的对象句柄。
pub struct EncodedArtifact {
    bytes: Bytes,
    format: ImageKind,
    dimensions: Dimensions,
    url: ObjectUrl,
    store: ObjectUrlStore,
}

impl EncodedArtifact {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn format(&self) -> ImageKind {
        self.format
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn url(&self) -> &ObjectUrl {
        &self.url
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl Releasable for EncodedArtifact {
    fn release(&self) {
        self.store.revoke(&self.url);
    }
}

impl std::fmt::Debug for EncodedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedArtifact")
            .field("format", &self.format)
            .field("dimensions", &self.dimensions)
            .field("url", &self.url)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// 单个渲染周期的结局。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// 产物已成为当前预览。
    Installed {
        generation: Generation,
        dimensions: Dimensions,
        url: ObjectUrl,
        byte_len: usize,
    },
    /// 防抖窗口内出现了更新的请求，本周期未绘制。
    Coalesced { generation: Generation },
    /// 完成时已有更新的周期，产物已释放。
    Stale { generation: Generation },
}

impl RenderOutcome {
    pub fn generation(&self) -> Generation {
        match self {
            Self::Installed { generation, .. }
            | Self::Coalesced { generation }
            | Self::Stale { generation } => *generation,
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }
}

/// 已调度的渲染周期。
///
/// 丢弃 ticket 不会取消任务，任务照常完成并按代数决定是否安装。
#[derive(Debug)]
pub struct RenderTicket {
    generation: Generation,
    handle: JoinHandle<Result<RenderOutcome, TranscodeError>>,
}

impl RenderTicket {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub async fn wait(self) -> Result<RenderOutcome, TranscodeError> {
        self.handle
            .await
            .map_err(|e| TranscodeError::Render(format!("渲染任务异常退出：{}", e)))?
    }
}

#[derive(Debug, Clone, Copy)]
struct RenderSettings {
    debounce: Duration,
    filter: ResizeFilter,
    max_surface_bytes: u64,
}

/// 渲染流水线，克隆后共享同一个账本。
#[derive(Clone)]
pub struct RenderPipeline {
    ledger: Arc<ResourceLedger>,
    urls: ObjectUrlStore,
    settings: RenderSettings,
}

impl RenderPipeline {
    pub fn new(ledger: Arc<ResourceLedger>, urls: ObjectUrlStore, config: &TranscodeConfig) -> Self {
        Self {
            ledger,
            urls,
            settings: RenderSettings {
                debounce: Duration::from_millis(config.debounce_ms),
                filter: config.resize_filter,
                max_surface_bytes: config.max_decoded_bytes,
            },
        }
    }

    /// 调度一个带防抖的渲染周期。需要在 tokio 运行时内调用。
    pub fn request(&self, request: EncodeRequest) -> RenderTicket {
        let generation = self.ledger.preview.issue();
        let pipeline = self.clone();
        let handle = tokio::spawn(async move { pipeline.run(generation, request, true).await });

        RenderTicket { generation, handle }
    }

    /// 立即渲染，不经过防抖窗口。
    pub async fn render(&self, request: EncodeRequest) -> Result<RenderOutcome, TranscodeError> {
        let generation = self.ledger.preview.issue();
        self.run(generation, request, false).await
    }

    async fn run(
        &self,
        generation: Generation,
        request: EncodeRequest,
        debounce: bool,
    ) -> Result<RenderOutcome, TranscodeError> {
        if debounce && !self.settings.debounce.is_zero() {
            tokio::time::sleep(self.settings.debounce).await;
            if !self.ledger.preview.is_current(generation) {
                log::debug!("⏭️ 渲染请求 {} 在防抖窗口内被合并", generation);
                return Ok(RenderOutcome::Coalesced { generation });
            }
        }

        let total_start = Instant::now();
        let target = Dimensions::new(request.width.max(1), request.height.max(1));

        let surface_bytes = target
            .rgba_bytes()
            .ok_or_else(|| TranscodeError::Render("绘制缓冲估算溢出".to_string()))?;
        if surface_bytes > self.settings.max_surface_bytes {
            return Err(TranscodeError::Render(format!(
                "绘制缓冲过大：{:.2} MB（限制：{:.2} MB）",
                surface_bytes as f64 / 1024.0 / 1024.0,
                self.settings.max_surface_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        // 只在本次调用内持有位图快照。
        let bitmap = {
            let source = self
                .ledger
                .source
                .get()
                .ok_or_else(|| TranscodeError::Render("没有可绘制的源图片".to_string()))?;
            if source.is_released() {
                return Err(TranscodeError::Render("源图片已释放".to_string()));
            }
            source.bitmap()
        };

        let draw_start = Instant::now();
        let filter = self.settings.filter;
        let surface = tokio::task::spawn_blocking(move || draw(&bitmap, target, filter))
            .await
            .map_err(|e| TranscodeError::Render(format!("绘制任务异常退出：{}", e)))??;
        let draw_ms = draw_start.elapsed().as_millis();

        let encode_start = Instant::now();
        let format = request.format;
        let quality = request.quality;
        let encoded = tokio::task::spawn_blocking(move || encode(&surface, format, quality))
            .await
            .map_err(|e| TranscodeError::Encode(format!("编码任务异常退出：{}", e)))??;
        let encode_ms = encode_start.elapsed().as_millis();

        let outcome = self.complete(generation, format, target, encoded);

        // PNG 忽略质量参数
        let quality_label = if format.is_lossy() {
            quality.value().to_string()
        } else {
            "-".to_string()
        };
        log::info!(
            "🖼️ 渲染周期 {} 结束 - {} {} q={} draw={}ms encode={}ms total={}ms 安装={}",
            generation,
            target,
            format,
            quality_label,
            draw_ms,
            encode_ms,
            total_start.elapsed().as_millis(),
            outcome.is_installed()
        );

        Ok(outcome)
    }

    /// 登记句柄并按代数提交到 `preview` 槽位。
    pub(crate) fn complete(
        &self,
        generation: Generation,
        format: ImageKind,
        dimensions: Dimensions,
        encoded: Vec<u8>,
    ) -> RenderOutcome {
        let bytes = Bytes::from(encoded);
        let byte_len = bytes.len();
        let url = self.urls.create(bytes.clone(), format.mime_type());

        let artifact = EncodedArtifact {
            bytes,
            format,
            dimensions,
            url: url.clone(),
            store: self.urls.clone(),
        };

        match self.ledger.preview.install_for(generation, artifact) {
            InstallOutcome::Installed { .. } => RenderOutcome::Installed {
                generation,
                dimensions,
                url,
                byte_len,
            },
            InstallOutcome::Stale { .. } => RenderOutcome::Stale { generation },
        }
    }
}

fn draw(
    bitmap: &DynamicImage,
    target: Dimensions,
    filter: ResizeFilter,
) -> Result<DynamicImage, TranscodeError> {
    let (width, height) = bitmap.dimensions();
    if width == target.width && height == target.height {
        return Ok(bitmap.clone());
    }

    match resize_with_fast_image_resize(bitmap, target, filter) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            log::warn!("⚠️ fast_image_resize 缩放失败，回退 image::resize_exact：{}", err);
            Ok(bitmap.resize_exact(target.width, target.height, filter.to_image_filter()))
        }
    }
}

fn resize_with_fast_image_resize(
    bitmap: &DynamicImage,
    target: Dimensions,
    filter: ResizeFilter,
) -> Result<DynamicImage, TranscodeError> {
    let src = bitmap.to_rgba8();
    let (src_width, src_height) = src.dimensions();

    let src_image =
        fr::images::Image::from_vec_u8(src_width, src_height, src.into_raw(), fr::PixelType::U8x4)
            .map_err(|e| TranscodeError::Render(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target.width, target.height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| TranscodeError::Render(format!("fast_image_resize 执行失败：{}", e)))?;

    let rgba =
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target.width, target.height, dst_image.into_vec())
            .ok_or_else(|| TranscodeError::Render("fast_image_resize 输出缓冲长度异常".to_string()))?;

    Ok(DynamicImage::ImageRgba8(rgba))
}

fn encode(
    surface: &DynamicImage,
    format: ImageKind,
    quality: Quality,
) -> Result<Vec<u8>, TranscodeError> {
    match format {
        ImageKind::Png => {
            let mut cursor = Cursor::new(Vec::new());
            surface
                .write_to(&mut cursor, ImageFormat::Png)
                .map_err(|e| TranscodeError::Encode(format!("PNG 编码失败：{}", e)))?;
            Ok(cursor.into_inner())
        }
        ImageKind::Jpeg => {
            // JPEG 不支持 alpha 通道
            let rgb = surface.to_rgb8();
            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut out, quality.value());
            rgb.write_with_encoder(encoder)
                .map_err(|e| TranscodeError::Encode(format!("JPEG 编码失败：{}", e)))?;
            Ok(out)
        }
        ImageKind::WebP => {
            let rgba = DynamicImage::ImageRgba8(surface.to_rgba8());
            let encoder = webp::Encoder::from_image(&rgba)
                .map_err(|e| TranscodeError::Encode(format!("WebP 编码器创建失败：{}", e)))?;
            let memory = encoder.encode(quality.value() as f32);
            if memory.is_empty() {
                return Err(TranscodeError::Encode("WebP 编码结果为空".to_string()));
            }
            Ok(memory.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::decoder::tests::encode_test_image;
    use crate::transcode::{Decoder, SourceFile};

    fn config(debounce_ms: u64) -> TranscodeConfig {
        TranscodeConfig {
            debounce_ms,
            ..TranscodeConfig::default()
        }
    }

    async fn pipeline_with_source(
        width: u32,
        height: u32,
        debounce_ms: u64,
    ) -> (RenderPipeline, Arc<ResourceLedger>, ObjectUrlStore) {
        let config = config(debounce_ms);
        let ledger = Arc::new(ResourceLedger::new());
        let urls = ObjectUrlStore::new();

        let file = SourceFile::new("s.png", "image/png", encode_test_image(width, height, ImageFormat::Png));
        let decoded = Decoder::from_config(&config)
            .decode(&file, ImageKind::Png)
            .await
            .expect("test source should decode");
        ledger.source.install(decoded);

        let pipeline = RenderPipeline::new(Arc::clone(&ledger), urls.clone(), &config);
        (pipeline, ledger, urls)
    }

    fn request(width: u32, height: u32, format: ImageKind) -> EncodeRequest {
        EncodeRequest {
            width,
            height,
            format,
            quality: Quality::new(80),
        }
    }

    #[tokio::test]
    async fn renders_each_format_at_target_size() {
        let (pipeline, ledger, urls) = pipeline_with_source(64, 48, 0).await;

        for (format, expected) in [
            (ImageKind::Png, ImageFormat::Png),
            (ImageKind::Jpeg, ImageFormat::Jpeg),
            (ImageKind::WebP, ImageFormat::WebP),
        ] {
            let outcome = pipeline
                .render(request(32, 24, format))
                .await
                .expect("render should succeed");
            assert!(outcome.is_installed());

            let preview = ledger.preview.get().expect("preview installed");
            assert_eq!(preview.format(), format);
            assert_eq!(image::guess_format(preview.bytes()).expect("known format"), expected);

            let decoded = image::load_from_memory(preview.bytes()).expect("preview decodes");
            assert_eq!(decoded.dimensions(), (32, 24));
        }

        assert_eq!(urls.live_count(), 1);
    }

    #[tokio::test]
    async fn png_round_trip_keeps_natural_dimensions() {
        let (pipeline, ledger, _urls) = pipeline_with_source(40, 30, 0).await;

        pipeline
            .render(request(40, 30, ImageKind::Png))
            .await
            .expect("render should succeed");

        let preview = ledger.preview.get().expect("preview installed");
        let decoded = image::load_from_memory(preview.bytes()).expect("preview decodes");
        assert_eq!(decoded.dimensions(), (40, 30));
    }

    #[tokio::test]
    async fn older_completion_after_newer_install_is_discarded() {
        let (pipeline, ledger, urls) = pipeline_with_source(8, 8, 0).await;

        let a = ledger.preview.issue();
        let b = ledger.preview.issue();

        let newer = pipeline.complete(b, ImageKind::Png, Dimensions::new(8, 8), vec![2; 16]);
        assert!(newer.is_installed());

        let older = pipeline.complete(a, ImageKind::Png, Dimensions::new(4, 4), vec![1; 16]);
        assert_eq!(older, RenderOutcome::Stale { generation: a });

        let preview = ledger.preview.get().expect("newer preview stays");
        assert_eq!(preview.dimensions(), Dimensions::new(8, 8));
        assert_eq!(urls.live_count(), 1);
        assert!(urls.resolve(preview.url().as_str()).is_some());
    }

    #[tokio::test]
    async fn rapid_requests_coalesce_to_last() {
        let (pipeline, ledger, urls) = pipeline_with_source(16, 16, 40).await;

        let tickets: Vec<_> = (1..=5)
            .map(|w| pipeline.request(request(w * 2, w * 2, ImageKind::Png)))
            .collect();

        let mut outcomes = Vec::new();
        for ticket in tickets {
            outcomes.push(ticket.wait().await.expect("cycle should finish"));
        }

        let installed: Vec<_> = outcomes.iter().filter(|o| o.is_installed()).collect();
        assert_eq!(installed.len(), 1);
        assert!(outcomes.last().is_some_and(RenderOutcome::is_installed));
        assert!(
            outcomes[..4]
                .iter()
                .all(|o| matches!(o, RenderOutcome::Coalesced { .. }))
        );

        let preview = ledger.preview.get().expect("preview installed");
        assert_eq!(preview.dimensions(), Dimensions::new(10, 10));
        assert_eq!(urls.live_count(), 1);
    }

    #[tokio::test]
    async fn missing_source_is_a_render_error_and_keeps_preview() {
        let (pipeline, ledger, _urls) = pipeline_with_source(8, 8, 0).await;
        pipeline
            .render(request(8, 8, ImageKind::Png))
            .await
            .expect("first render should succeed");
        let before = ledger.preview.get().expect("preview installed").url().clone();

        ledger.source.release();
        let result = pipeline.render(request(4, 4, ImageKind::Png)).await;

        assert!(matches!(result, Err(TranscodeError::Render(_))));
        assert_eq!(ledger.preview.get().map(|p| p.url().clone()), Some(before));
    }

    #[tokio::test]
    async fn oversized_surface_is_rejected_before_drawing() {
        let config = TranscodeConfig {
            debounce_ms: 0,
            max_decoded_bytes: 1024,
            ..TranscodeConfig::default()
        };
        let ledger = Arc::new(ResourceLedger::new());
        let pipeline = RenderPipeline::new(Arc::clone(&ledger), ObjectUrlStore::new(), &config);

        let result = pipeline.render(request(100, 100, ImageKind::Png)).await;
        assert!(matches!(result, Err(TranscodeError::Render(_))));
        assert!(ledger.preview.get().is_none());
    }

    #[test]
    fn jpeg_encode_drops_alpha() {
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(4, 4, Rgba([10, 20, 30, 0])));
        let bytes = encode(&rgba, ImageKind::Jpeg, Quality::new(50)).expect("jpeg encodes");
        assert_eq!(image::guess_format(&bytes).expect("format"), ImageFormat::Jpeg);
    }

    #[test]
    fn lower_quality_produces_smaller_jpeg() {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_fn(64, 64, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8, 255])
        }));
        let high = encode(&img, ImageKind::Jpeg, Quality::new(95)).expect("jpeg encodes");
        let low = encode(&img, ImageKind::Jpeg, Quality::new(10)).expect("jpeg encodes");
        assert!(low.len() < high.len());
    }
}
