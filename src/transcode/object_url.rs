//! # 可撤销句柄存储
//!
//! ## 设计思路
//!
//! 预览结果以 `blob:` 风格的字符串句柄交给界面层，界面层凭句柄取回字节。
//! 句柄一旦撤销就再也解析不到内容，对应浏览器中 `revokeObjectURL` 的语义。
//!
//! ## 实现思路
//!
//! - `Arc<Mutex<HashMap>>` 保存句柄到字节的映射，克隆 store 即共享同一份映射。
//! - 递增计数器生成句柄编号，句柄永不复用。
//! - 锁中毒时取回内部数据继续工作：映射本身在任何时刻都是一致的。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;

const URL_PREFIX: &str = "blob:image-resizer/";

/// 可撤销的引用句柄。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct ObjectUrlEntry {
    created_at: Instant,
    mime_type: &'static str,
    bytes: Bytes,
}

/// 句柄注册表。
#[derive(Clone, Default)]
pub struct ObjectUrlStore {
    entries: Arc<Mutex<HashMap<String, ObjectUrlEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ObjectUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ObjectUrlEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册一段字节，返回新句柄。
    pub fn create(&self, bytes: Bytes, mime_type: &'static str) -> ObjectUrl {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("{}{}", URL_PREFIX, id);

        self.lock().insert(
            url.clone(),
            ObjectUrlEntry {
                created_at: Instant::now(),
                mime_type,
                bytes,
            },
        );

        ObjectUrl(url)
    }

    /// 解析句柄；已撤销或未知句柄返回 `None`。
    pub fn resolve(&self, url: &str) -> Option<(Bytes, &'static str)> {
        self.lock()
            .get(url)
            .map(|entry| (entry.bytes.clone(), entry.mime_type))
    }

    /// 撤销句柄，返回句柄此前是否存活。
    pub fn revoke(&self, url: &ObjectUrl) -> bool {
        match self.lock().remove(url.as_str()) {
            Some(entry) => {
                log::debug!(
                    "🧹 撤销句柄 {}（存活 {}ms，{} bytes）",
                    url,
                    entry.created_at.elapsed().as_millis(),
                    entry.bytes.len()
                );
                true
            }
            None => false,
        }
    }

    /// 当前存活句柄数量。
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }
}

impl std::fmt::Debug for ObjectUrlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectUrlStore")
            .field("live", &self.live_count())
            .finish()
    }
}
