//! # 服务层（可注入状态）
//!
//! ## 设计思路
//!
//! `ResizerService` 作为宿主注入的长生命周期状态，持有运行时配置与全局共享的
//! 对象句柄注册表。每个编辑面板通过 `open_session` 拿到独立会话。
//!
//! ## 实现思路
//!
//! 对外仅暴露少量稳定 API：
//! - `open_session`：以当前配置快照创建会话，之后的切档不影响已打开的会话
//! - `set_performance_profile` / `get_performance_profile`：切换、读取性能档位
//! - `object_urls`：界面层凭预览句柄取回字节

use std::path::Path;
use std::sync::{Arc, RwLock};

use super::{
    EditSession, ImagePerformanceProfile, ObjectUrlStore, TranscodeConfig, TranscodeError,
};
use crate::error::AppError;

pub struct ResizerService {
    config: Arc<RwLock<TranscodeConfig>>,
    urls: ObjectUrlStore,
}

impl ResizerService {
    /// 使用默认配置创建服务。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_resizer::transcode::ResizerService;
    ///
    /// let service = ResizerService::new();
    /// let _session = service.open_session()?;
    /// # Ok::<(), image_resizer::transcode::TranscodeError>(())
    /// ```
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(TranscodeConfig::default())),
            urls: ObjectUrlStore::new(),
        }
    }

    /// 使用自定义配置创建服务，配置先经过范围校验。
    pub fn with_config(config: TranscodeConfig) -> Result<Self, TranscodeError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            urls: ObjectUrlStore::new(),
        })
    }

    /// 从 JSON 配置文件创建服务。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_resizer::transcode::ResizerService;
    ///
    /// let service = ResizerService::from_config_file("resizer.json".as_ref())?;
    /// # Ok::<(), image_resizer::error::AppError>(())
    /// ```
    pub fn from_config_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        let config = TranscodeConfig::from_json(&text)?;
        log::info!("⚙️ 已加载配置文件：{}", path.display());
        Ok(Self::with_config(config)?)
    }

    /// 获取配置快照。
    pub fn config_snapshot(&self) -> Result<TranscodeConfig, TranscodeError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| TranscodeError::ResourceLimit("配置读取锁已中毒".to_string()))
    }

    /// 打开一个新的编辑会话。
    pub fn open_session(&self) -> Result<EditSession, TranscodeError> {
        let config = self.config_snapshot()?;
        Ok(EditSession::new(config, self.urls.clone()))
    }

    /// 设置性能档位（`quality` / `balanced` / `speed`）。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_resizer::transcode::ResizerService;
    ///
    /// let service = ResizerService::new();
    /// service.set_performance_profile("speed")?;
    /// # Ok::<(), image_resizer::transcode::TranscodeError>(())
    /// ```
    pub fn set_performance_profile(&self, profile: &str) -> Result<(), TranscodeError> {
        let profile: ImagePerformanceProfile = profile.parse()?;
        let mut config = self
            .config
            .write()
            .map_err(|_| TranscodeError::ResourceLimit("配置写入锁已中毒".to_string()))?;
        config.apply_performance_profile(profile);

        log::info!(
            "⚙️ 已切换图片性能档位：{:?}（filter={:?}, debounce={}ms）",
            profile,
            config.resize_filter,
            config.debounce_ms
        );

        Ok(())
    }

    /// 获取当前生效档位（字符串）。
    pub fn get_performance_profile(&self) -> Result<String, TranscodeError> {
        let config = self
            .config
            .read()
            .map_err(|_| TranscodeError::ResourceLimit("配置读取锁已中毒".to_string()))?;
        Ok(config.infer_performance_profile().as_str().to_string())
    }

    pub fn object_urls(&self) -> &ObjectUrlStore {
        &self.urls
    }
}

impl Default for ResizerService {
    fn default() -> Self {
        Self::new()
    }
}
