//! # 资源账本
//!
//! ## 设计思路
//!
//! 一次编辑会话内所有临时资源（解码位图、预览句柄）都由账本独占持有。
//! 每个槽位同一时刻最多只有一个可达句柄；被替换、被判定过期或会话结束时，
//! 句柄恰好释放一次。
//!
//! ## 实现思路
//!
//! - 每个槽位带单调递增的代数（generation）。异步任务发起时 `issue` 取得代数，
//!   完成时用 `install_for` 提交：代数仍是最新才安装，否则立即释放自己的结果。
//! - 替换旧句柄时在持锁状态下释放，任何读取都看不到两个句柄同时存在。
//! - `release_all` 释放全部槽位并推进代数，仍在途中的任务完成后会自行丢弃结果。
//! - 读取返回 `Arc` 快照，永不等待在途任务。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{DecodedImage, EncodedArtifact};

/// 可被账本释放的资源。
///
/// 账本保证每个句柄只调用一次 `release`。
pub trait Releasable: Send + Sync + 'static {
    fn release(&self);
}

/// 槽位代数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 槽位名称，仅用于日志与诊断。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotName {
    Source,
    Preview,
}

impl SlotName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Preview => "preview",
        }
    }
}

/// `install_for` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// 已安装；`replaced` 表示是否释放了旧句柄。
    Installed { generation: Generation, replaced: bool },
    /// 代数已过期，传入的句柄已被释放。
    Stale { generation: Generation, current: Generation },
}

impl InstallOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }
}

struct SlotState<T> {
    generation: u64,
    handle: Option<Arc<T>>,
}

/// 单个具名槽位。
pub struct Slot<T: Releasable> {
    name: SlotName,
    state: Mutex<SlotState<T>>,
}

impl<T: Releasable> Slot<T> {
    pub fn new(name: SlotName) -> Self {
        Self {
            name,
            state: Mutex::new(SlotState {
                generation: 0,
                handle: None,
            }),
        }
    }

    pub fn name(&self) -> SlotName {
        self.name
    }

    // 每次修改后槽位状态都是一致的，锁中毒时直接取回内部数据。
    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 发起一次新的写入，返回其代数。之前发起的写入随之过期。
    pub fn issue(&self) -> Generation {
        let mut state = self.lock();
        state.generation += 1;
        Generation(state.generation)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.lock().generation == generation.0
    }

    /// 同步安装：取得新代数并立即安装。
    pub fn install(&self, handle: T) -> Generation {
        let mut state = self.lock();
        state.generation += 1;
        let generation = Generation(state.generation);
        self.swap_locked(&mut state, handle);
        generation
    }

    /// 以发起时的代数提交结果。
    pub fn install_for(&self, generation: Generation, handle: T) -> InstallOutcome {
        let mut state = self.lock();

        if state.generation != generation.0 {
            let current = Generation(state.generation);
            drop(state);
            log::debug!(
                "♻️ 丢弃过期结果 - 槽位: {} 结果代数: {} 当前代数: {}",
                self.name.as_str(),
                generation,
                current
            );
            handle.release();
            return InstallOutcome::Stale {
                generation,
                current,
            };
        }

        let replaced = self.swap_locked(&mut state, handle);
        InstallOutcome::Installed {
            generation,
            replaced,
        }
    }

    fn swap_locked(&self, state: &mut SlotState<T>, handle: T) -> bool {
        match state.handle.replace(Arc::new(handle)) {
            Some(previous) => {
                previous.release();
                true
            }
            None => false,
        }
    }

    /// 快照读取当前句柄。
    pub fn get(&self) -> Option<Arc<T>> {
        self.lock().handle.clone()
    }

    /// 释放当前句柄并推进代数，返回是否释放了句柄。
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        state.generation += 1;
        match state.handle.take() {
            Some(handle) => {
                handle.release();
                true
            }
            None => false,
        }
    }
}

/// 一次编辑会话的资源账本。
pub struct ResourceLedger {
    pub source: Slot<DecodedImage>,
    pub preview: Slot<EncodedArtifact>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self {
            source: Slot::new(SlotName::Source),
            preview: Slot::new(SlotName::Preview),
        }
    }

    /// 会话结束：无条件释放全部槽位。
    pub fn release_all(&self) {
        let preview = self.preview.release();
        let source = self.source.release();
        if preview || source {
            log::info!(
                "🧹 账本已清空 - 释放 source={} preview={}",
                source,
                preview
            );
        }
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        self.release_all();
    }
}
