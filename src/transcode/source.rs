//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入”和“流水线中间值”解耦：
//! - `SourceFile` 表示用户选择的原始文件（不可变，只创建一次）
//! - `ImageKind` 是输入嗅探与输出格式共用的白名单
//! - `EncodeRequest` 是交给渲染流水线的值快照

use std::collections::HashMap;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::ImageFormat;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::{Rejection, TranscodeError};

/// 允许的栅格格式：一种无损（PNG）与两种有损（JPEG / WebP）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    #[serde(rename = "webp")]
    WebP,
}

static MIME_TABLE: Lazy<HashMap<&'static str, ImageKind>> = Lazy::new(|| {
    HashMap::from([
        ("image/png", ImageKind::Png),
        ("image/jpeg", ImageKind::Jpeg),
        ("image/jpg", ImageKind::Jpeg),
        ("image/pjpeg", ImageKind::Jpeg),
        ("image/webp", ImageKind::WebP),
    ])
});

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [ImageKind::Png, ImageKind::Jpeg, ImageKind::WebP];

    /// 规范 MIME 类型。
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }

    /// 下载文件扩展名。
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// 质量参数只对有损格式生效。
    pub fn is_lossy(self) -> bool {
        !matches!(self, Self::Png)
    }

    pub(crate) fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::WebP => ImageFormat::WebP,
        }
    }

    /// 从声明的内容类型解析（忽略参数与大小写），不在白名单内返回 `None`。
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let base = content_type.split(';').next()?.trim().to_ascii_lowercase();
        MIME_TABLE.get(base.as_str()).copied()
    }

    /// 从文件扩展名推断。
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" | "jpe" => Some(Self::Jpeg),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// 解析界面下拉框中的格式值。
    pub fn parse(value: &str) -> Result<Self, TranscodeError> {
        Self::from_extension(value)
            .or_else(|| Self::from_mime(value))
            .ok_or_else(|| {
                TranscodeError::InvalidFormat(format!(
                    "不支持的输出格式：{}（可选：png / jpeg / webp）",
                    value
                ))
            })
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// 像素尺寸。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// RGBA 缓冲预计字节数，溢出时返回 `None`。
    pub(crate) fn rgba_bytes(self) -> Option<u64> {
        (self.width as u64)
            .checked_mul(self.height as u64)
            .and_then(|pixels| pixels.checked_mul(4))
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// 有损编码质量（1-100）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// 交给渲染流水线的参数快照。
///
/// `quality` 只在有损格式下有意义，PNG 编码时直接忽略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeRequest {
    pub width: u32,
    pub height: u32,
    pub format: ImageKind,
    pub quality: Quality,
}

/// 用户提供的原始文件。
///
/// 创建后不可变；被解码或被拒绝后即可丢弃。
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    declared_type: String,
    bytes: Bytes,
}

impl SourceFile {
    pub fn new(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 去掉扩展名后的文件名，用于生成下载文件名。
    pub fn stem(&self) -> &str {
        let base = self
            .name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.name.as_str());
        match base.rfind('.') {
            Some(idx) if idx > 0 => &base[..idx],
            _ => base,
        }
    }

    /// 从本地路径读取。
    ///
    /// 先用 metadata 做体积检查，超限时不读取文件内容。声明类型按扩展名推断。
    pub fn from_path(path: &Path, max_file_size: u64) -> Result<Self, TranscodeError> {
        log::info!("📁 开始读取本地图片 - 路径: {}", path.display());

        let metadata = std::fs::metadata(path)
            .map_err(|e| TranscodeError::FileSystem(format!("无法读取文件信息：{}", e)))?;

        if metadata.len() > max_file_size {
            return Err(TranscodeError::rejected(
                Rejection::Oversized,
                format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    metadata.len() as f64 / 1024.0 / 1024.0,
                    max_file_size as f64 / 1024.0 / 1024.0
                ),
            ));
        }

        let bytes = std::fs::read(path)
            .map_err(|e| TranscodeError::FileSystem(format!("无法读取图片文件：{}", e)))?;

        let declared_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageKind::from_extension)
            .map(ImageKind::mime_type)
            .unwrap_or("application/octet-stream");

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(name, declared_type, bytes))
    }

    /// 从 `data:image/...;base64,` 形式的 Data URL 构建（拖放或粘贴场景）。
    ///
    /// 解码前先按 Base64 长度估算体积上限，超限直接拒绝。
    pub fn from_data_url(
        name: impl Into<String>,
        data_url: &str,
        max_file_size: u64,
    ) -> Result<Self, TranscodeError> {
        let normalized = data_url.trim();
        let rest = normalized
            .strip_prefix("data:")
            .ok_or_else(|| TranscodeError::InvalidFormat("不是 Data URL".to_string()))?;
        let marker = rest
            .find(";base64,")
            .ok_or_else(|| TranscodeError::InvalidFormat("缺少 base64 标记".to_string()))?;

        let declared_type = &rest[..marker];
        let payload = &rest[marker + 8..];

        let estimated_len = estimate_base64_decoded_upper_bound_len(payload)?;
        if estimated_len > max_file_size {
            return Err(TranscodeError::rejected(
                Rejection::Oversized,
                format!(
                    "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
                    estimated_len as f64 / 1024.0 / 1024.0,
                    max_file_size as f64 / 1024.0 / 1024.0
                ),
            ));
        }

        let bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| TranscodeError::InvalidFormat(format!("Base64 解码失败：{}", e)))?;

        Ok(Self::new(name, declared_type, bytes))
    }
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, TranscodeError> {
    let len = base64_data.trim().len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| TranscodeError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| TranscodeError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_parser_ignores_parameters_and_case() {
        assert_eq!(ImageKind::from_mime("IMAGE/PNG; charset=binary"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_mime("image/jpg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_mime("image/gif"), None);
        assert_eq!(ImageKind::from_mime(""), None);
    }

    #[test]
    fn only_png_is_lossless() {
        assert!(!ImageKind::Png.is_lossy());
        assert!(ImageKind::Jpeg.is_lossy());
        assert!(ImageKind::WebP.is_lossy());
    }

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(55).value(), 55);
        assert_eq!(Quality::new(400).value(), 100);
    }

    #[test]
    fn stem_strips_directories_and_extension() {
        let file = SourceFile::new("C:\\photos\\holiday.beach.jpg", "image/jpeg", Vec::new());
        assert_eq!(file.stem(), "holiday.beach");

        let hidden = SourceFile::new(".png", "image/png", Vec::new());
        assert_eq!(hidden.stem(), ".png");
    }

    #[test]
    fn data_url_keeps_declared_type() {
        let file = SourceFile::from_data_url("pasted", "data:image/webp;base64,AAEC", 1024)
            .expect("data url should parse");

        assert_eq!(file.declared_type(), "image/webp");
        assert_eq!(file.bytes().as_ref(), &[0u8, 1, 2]);
    }

    #[test]
    fn data_url_rejects_large_payload_before_decode() {
        let huge = format!("data:image/png;base64,{}", "A".repeat(1024 * 1024));
        let result = SourceFile::from_data_url("huge", &huge, 32);

        assert_eq!(
            result.err().and_then(|e| e.rejection()),
            Some(Rejection::Oversized)
        );
    }

    #[test]
    fn parse_accepts_extensions_and_mime_types() {
        assert_eq!(ImageKind::parse("jpeg").expect("jpeg"), ImageKind::Jpeg);
        assert_eq!(ImageKind::parse("image/webp").expect("webp"), ImageKind::WebP);
        assert!(matches!(ImageKind::parse("bmp"), Err(TranscodeError::InvalidFormat(_))));
    }
}
