//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `TranscodeConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到底层参数组合。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的平衡配置。
//! - `validate` 统一做范围校验，JSON 加载与运行时修改都走这一入口。
//! - `ImagePerformanceProfile` 负责档位字符串解析与反向输出。
//! - `apply_performance_profile` / `infer_performance_profile` 互为逆操作。

use std::path::Path;

use fast_image_resize as fr;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::{Dimensions, TranscodeError};

/// 光栅操作的安全尺寸上限（单边像素）。
///
/// 与界面暴露的上限取较小者。上限见方的 RGBA 绘制缓冲必须落在
/// `max_decoded_bytes` 之内，`validate` 会检查这一点。
pub const SAFE_MAX_DIMENSION: u32 = 8192;

/// 默认解码/绘制内存上限：256 MiB，恰好容纳 8192×8192 的 RGBA 缓冲。
pub const DEFAULT_MAX_DECODED_BYTES: u64 = 256 * 1024 * 1024;

/// 默认文件体积上限：10 MiB。
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// 重采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_fast_filter(self) -> fr::FilterType {
        match self {
            Self::Nearest => fr::FilterType::Box,
            Self::Triangle => fr::FilterType::Bilinear,
            Self::CatmullRom => fr::FilterType::CatmullRom,
            Self::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }
}

/// 转码配置。
///
/// 字段覆盖了校验、解码、尺寸规划、渲染防抖四个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// 输入文件允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码/绘制阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// 光栅操作的安全单边上限。
    pub safe_max_dimension: u32,
    /// 界面允许输入的单边上限，可能大于安全上限。
    pub ui_max_dimension: u32,
    /// 参数变更触发重绘的静默窗口（毫秒）。
    pub debounce_ms: u64,
    /// 绘制阶段的重采样滤镜。
    pub resize_filter: ResizeFilter,
    /// 有损格式的默认质量（1-100）。
    pub default_quality: u8,
    /// 是否优先走带方向校正的解码路径。
    pub prefer_oriented_decode: bool,
    /// 回退解码（不校正方向）时是否给出提示。
    pub warn_on_orientation_fallback: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: DEFAULT_MAX_DECODED_BYTES,
            safe_max_dimension: SAFE_MAX_DIMENSION,
            ui_max_dimension: 10_000,
            debounce_ms: 150,
            resize_filter: ResizeFilter::Lanczos3,
            default_quality: 90,
            prefer_oriented_decode: true,
            warn_on_orientation_fallback: true,
        }
    }
}

impl TranscodeConfig {
    /// 实际生效的单边上限：安全上限与界面上限取较小者。
    pub fn effective_max_dimension(&self) -> u32 {
        self.safe_max_dimension.min(self.ui_max_dimension).max(1)
    }

    /// 范围校验。
    pub fn validate(&self) -> Result<(), TranscodeError> {
        if self.max_file_size == 0 {
            return Err(TranscodeError::Config("max_file_size 必须大于 0".to_string()));
        }
        if self.max_decoded_bytes < 8 * 1024 * 1024 {
            return Err(TranscodeError::Config("max_decoded_bytes 不能小于 8MB".to_string()));
        }
        if self.max_decoded_pixels == 0 {
            return Err(TranscodeError::Config("max_decoded_pixels 必须大于 0".to_string()));
        }
        if !(1..=SAFE_MAX_DIMENSION).contains(&self.safe_max_dimension) {
            return Err(TranscodeError::Config(format!(
                "safe_max_dimension 必须在 1~{} 之间",
                SAFE_MAX_DIMENSION
            )));
        }
        if self.ui_max_dimension == 0 {
            return Err(TranscodeError::Config("ui_max_dimension 必须大于 0".to_string()));
        }
        let max = self.effective_max_dimension();
        let surface = Dimensions::new(max, max)
            .rgba_bytes()
            .ok_or_else(|| TranscodeError::Config("绘制缓冲估算溢出".to_string()))?;
        if surface > self.max_decoded_bytes {
            return Err(TranscodeError::Config(format!(
                "单边上限 {} 的绘制缓冲需要 {:.2} MB，超过 max_decoded_bytes（{:.2} MB）",
                max,
                surface as f64 / 1024.0 / 1024.0,
                self.max_decoded_bytes as f64 / 1024.0 / 1024.0
            )));
        }
        if self.debounce_ms > 5_000 {
            return Err(TranscodeError::Config("debounce_ms 必须在 0~5000 毫秒之间".to_string()));
        }
        if !(1..=100).contains(&self.default_quality) {
            return Err(TranscodeError::Config("default_quality 必须在 1~100 之间".to_string()));
        }
        Ok(())
    }

    /// 从 JSON 字符串解析并校验配置，缺省字段取默认值。
    pub fn from_json(text: &str) -> Result<Self, TranscodeError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| TranscodeError::Config(format!("解析配置失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载配置。
    pub fn load_json(path: &Path) -> Result<Self, TranscodeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TranscodeError::FileSystem(format!("无法读取配置文件：{}", e)))?;
        Self::from_json(&text)
    }
}

/// 性能档位（面向产品/用户语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先响应速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePerformanceProfile {
    Quality,
    Balanced,
    Speed,
}

impl ImagePerformanceProfile {
    pub const ALL: [Self; 3] = [Self::Quality, Self::Balanced, Self::Speed];

    /// 将档位输出为稳定字符串，供前端展示与持久化。
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl std::str::FromStr for ImagePerformanceProfile {
    type Err = TranscodeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let wanted = text.trim();
        Self::ALL
            .into_iter()
            .find(|profile| profile.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                TranscodeError::InvalidFormat(format!(
                    "无法识别的性能档位“{}”，可用档位：quality、balanced、speed",
                    wanted
                ))
            })
    }
}

impl TranscodeConfig {
    /// 基于当前参数反推性能档位。
    pub(crate) fn infer_performance_profile(&self) -> ImagePerformanceProfile {
        match self.resize_filter {
            ResizeFilter::Lanczos3 => ImagePerformanceProfile::Quality,
            ResizeFilter::CatmullRom => ImagePerformanceProfile::Balanced,
            ResizeFilter::Triangle | ResizeFilter::Nearest => ImagePerformanceProfile::Speed,
        }
    }

    /// 应用指定性能档位到实际参数。
    pub(crate) fn apply_performance_profile(&mut self, profile: ImagePerformanceProfile) {
        match profile {
            ImagePerformanceProfile::Quality => {
                self.resize_filter = ResizeFilter::Lanczos3;
                self.debounce_ms = 150;
            }
            ImagePerformanceProfile::Balanced => {
                self.resize_filter = ResizeFilter::CatmullRom;
                self.debounce_ms = 150;
            }
            ImagePerformanceProfile::Speed => {
                self.resize_filter = ResizeFilter::Triangle;
                self.debounce_ms = 250;
            }
        }
    }
}
