//! # 解码模块
//!
//! ## 设计思路
//!
//! 将“已校验字节 → 可绘制位图”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 首选路径：读取解码器给出的 EXIF 方向并应用，产出“正向”位图
//! 2. 首选路径不可用（配置关闭）或失败时，走通用解码回退路径，不做方向校正
//! 3. 两条路径都先读 header 尺寸做像素/内存上限检查，资源超限不触发回退
//! 4. 解码在阻塞线程池执行，不阻塞调用方
//!
//! 回退路径不校正方向是已知限制，结果上会标记 `DecodePath::Fallback`。

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader};

use super::ledger::Releasable;
use super::{Dimensions, ImageKind, Rejection, SourceFile, TranscodeConfig, TranscodeError};

/// 实际使用的解码路径。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    /// 已按 EXIF 方向校正。
    Oriented,
    /// 通用解码，未校正方向。
    Fallback,
}

/// 解码结果：共享位图与自然尺寸。
///
/// 由账本 `source` 槽位独占持有。
pub struct DecodedImage {
    bitmap: Arc<DynamicImage>,
    natural: Dimensions,
    kind: ImageKind,
    path: DecodePath,
    released: AtomicBool,
}

impl DecodedImage {
    pub fn natural(&self) -> Dimensions {
        self.natural
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn path(&self) -> DecodePath {
        self.path
    }

    pub(crate) fn bitmap(&self) -> Arc<DynamicImage> {
        Arc::clone(&self.bitmap)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Releasable for DecodedImage {
    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        log::debug!("🧹 释放源位图 {}（{}）", self.natural, self.kind);
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("natural", &self.natural)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct DecodeLimits {
    max_decoded_pixels: u64,
    max_decoded_bytes: u64,
    prefer_oriented: bool,
}

/// 解码器。
#[derive(Debug, Clone)]
pub struct Decoder {
    limits: DecodeLimits,
}

impl Decoder {
    pub fn from_config(config: &TranscodeConfig) -> Self {
        Self {
            limits: DecodeLimits {
                max_decoded_pixels: config.max_decoded_pixels,
                max_decoded_bytes: config.max_decoded_bytes,
                prefer_oriented: config.prefer_oriented_decode,
            },
        }
    }

    /// 异步解码已通过校验的文件。
    ///
    /// 不接触任何槽位，安装由调用方按代数决定。
    pub async fn decode(
        &self,
        file: &SourceFile,
        kind: ImageKind,
    ) -> Result<DecodedImage, TranscodeError> {
        let bytes = file.bytes().clone();
        let limits = self.limits;

        tokio::task::spawn_blocking(move || decode_blocking(&bytes, kind, limits))
            .await
            .map_err(|e| TranscodeError::Decode(format!("解码任务异常退出：{}", e)))?
    }
}

fn decode_blocking(
    bytes: &[u8],
    kind: ImageKind,
    limits: DecodeLimits,
) -> Result<DecodedImage, TranscodeError> {
    if limits.prefer_oriented {
        match decode_oriented(bytes, kind, &limits) {
            Ok(image) => return finish(image, kind, DecodePath::Oriented, &limits),
            Err(err @ TranscodeError::ResourceLimit(_)) => return Err(err),
            Err(err) => {
                log::warn!("⚠️ 方向感知解码失败，回退通用解码（不校正方向）：{}", err);
            }
        }
    }

    let (header_width, header_height) = inspect_dimensions(bytes, kind)?;
    validate_limits(&limits, header_width, header_height)?;

    let image = image::load_from_memory_with_format(bytes, kind.image_format())
        .map_err(|e| TranscodeError::Decode(format!("图片解码失败：{}", e)))?;

    finish(image, kind, DecodePath::Fallback, &limits)
}

fn decode_oriented(
    bytes: &[u8],
    kind: ImageKind,
    limits: &DecodeLimits,
) -> Result<DynamicImage, TranscodeError> {
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), kind.image_format())
        .into_decoder()
        .map_err(|e| TranscodeError::Decode(format!("无法创建解码器：{}", e)))?;

    let (header_width, header_height) = decoder.dimensions();
    validate_limits(limits, header_width, header_height)?;

    let orientation = decoder.orientation().unwrap_or_else(|e| {
        log::debug!("读取 EXIF 方向失败，按无变换处理：{}", e);
        Orientation::NoTransforms
    });

    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| TranscodeError::Decode(format!("图片解码失败：{}", e)))?;

    if orientation != Orientation::NoTransforms {
        log::debug!("🔄 应用 EXIF 方向：{:?}", orientation);
        image.apply_orientation(orientation);
    }

    Ok(image)
}

/// 仅读取 header 中的宽高，用于完整解码前的上限检查。
fn inspect_dimensions(bytes: &[u8], kind: ImageKind) -> Result<(u32, u32), TranscodeError> {
    ImageReader::with_format(Cursor::new(bytes), kind.image_format())
        .into_dimensions()
        .map_err(|e| TranscodeError::Decode(format!("无法读取图片尺寸：{}", e)))
}

fn validate_limits(limits: &DecodeLimits, width: u32, height: u32) -> Result<(), TranscodeError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| TranscodeError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > limits.max_decoded_pixels {
        return Err(TranscodeError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, limits.max_decoded_pixels
        )));
    }

    let estimated = Dimensions::new(width, height)
        .rgba_bytes()
        .ok_or_else(|| TranscodeError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > limits.max_decoded_bytes {
        return Err(TranscodeError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            limits.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

fn finish(
    image: DynamicImage,
    kind: ImageKind,
    path: DecodePath,
    limits: &DecodeLimits,
) -> Result<DecodedImage, TranscodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(TranscodeError::rejected(
            Rejection::CorruptAfterDecode,
            format!("解码结果尺寸异常：{}x{}", width, height),
        ));
    }
    validate_limits(limits, width, height)?;

    log::info!(
        "✅ 图片解码成功 - 格式: {} 尺寸: {}x{} 路径: {:?}",
        kind,
        width,
        height,
        path
    );

    Ok(DecodedImage {
        bitmap: Arc::new(image),
        natural: Dimensions::new(width, height),
        kind,
        path,
        released: AtomicBool::new(false),
    })
}
