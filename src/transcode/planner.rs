//! # 尺寸规划
//!
//! 宽高输入框之间不共享任何可变状态，每次编辑都由 [`plan`] 从自然尺寸、
//! 本次编辑值和锁定状态重新计算目标尺寸。纯函数，每次按键都可以调用。

use serde::{Deserialize, Serialize};

use super::Dimensions;

/// 本次编辑的是哪一维。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Width,
    Height,
}

/// 目标尺寸，两个维度都落在 `[1, max_dimension]` 内。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeTarget {
    pub width: u32,
    pub height: u32,
    pub aspect_locked: bool,
}

impl ResizeTarget {
    /// 新图加载后的初始目标：自然尺寸等比缩进上限内，默认锁定宽高比。
    pub fn initial(natural: Dimensions, max_dimension: u32) -> Self {
        let max = max_dimension.max(1);
        let longest = natural.width.max(natural.height);

        if longest <= max {
            return Self {
                width: clamp(natural.width, max),
                height: clamp(natural.height, max),
                aspect_locked: true,
            };
        }

        let scale = max as f64 / longest as f64;
        Self {
            width: clamp_f64(natural.width as f64 * scale, max),
            height: clamp_f64(natural.height as f64 * scale, max),
            aspect_locked: true,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// 根据一次编辑计算新的目标尺寸。
///
/// - 锁定时另一维按自然宽高比四舍五入重算
/// - 重算出的维度超过上限时被截到上限，被编辑的维度再按比例反推
/// - 未锁定时两维各自截断到 `[1, max_dimension]`
pub fn plan(
    natural: Dimensions,
    edited: Dimensions,
    changed: Axis,
    aspect_locked: bool,
    max_dimension: u32,
) -> ResizeTarget {
    let max = max_dimension.max(1);

    if !aspect_locked || natural.width == 0 || natural.height == 0 {
        return ResizeTarget {
            width: clamp(edited.width, max),
            height: clamp(edited.height, max),
            aspect_locked,
        };
    }

    let (nw, nh) = (natural.width as f64, natural.height as f64);

    let (width, height) = match changed {
        Axis::Width => {
            let width = clamp(edited.width, max);
            let height = width as f64 * nh / nw;
            if height.round() > max as f64 {
                (clamp_f64(max as f64 * nw / nh, max), max)
            } else {
                (width, clamp_f64(height, max))
            }
        }
        Axis::Height => {
            let height = clamp(edited.height, max);
            let width = height as f64 * nw / nh;
            if width.round() > max as f64 {
                (max, clamp_f64(max as f64 * nh / nw, max))
            } else {
                (clamp_f64(width, max), height)
            }
        }
    };

    ResizeTarget {
        width,
        height,
        aspect_locked: true,
    }
}

fn clamp(value: u32, max: u32) -> u32 {
    value.clamp(1, max)
}

fn clamp_f64(value: f64, max: u32) -> u32 {
    if !value.is_finite() {
        return max;
    }
    value.round().clamp(1.0, max as f64) as u32
}
