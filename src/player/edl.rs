use crate::core::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 剪辑区间的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutAction {
    /// 硬剪：丢包并自动跳过
    Cut,
    /// 静音
    Mute,
    /// 广告段：自动跳过，可回退
    CommBreak,
}

/// 一个剪辑区间（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cut {
    pub start: i64,
    pub end: i64,
    pub action: CutAction,
}

impl Cut {
    pub fn contains(&self, time_ms: i64) -> bool {
        time_ms >= self.start && time_ms <= self.end
    }
}

/// 剪辑列表提供者
pub trait CutList: Send {
    fn has_cut(&self) -> bool;
    fn has_scene_marker(&self) -> bool;
    /// 时间点所在的剪辑区间
    fn in_cut(&self, time_ms: i64) -> Option<Cut>;
    /// 前后方向最近的场景标记
    fn next_scene_marker(&self, forward: bool, time_ms: i64) -> Option<i64>;
    /// 真实时间 -> 去掉硬剪后的时间
    fn remove_cut_time(&self, time_ms: i64) -> i64;
    /// 去掉硬剪后的时间 -> 真实时间
    fn restore_cut_time(&self, time_ms: i64) -> i64;
}

/// 编辑决策列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Edl {
    pub cuts: Vec<Cut>,
    pub scene_markers: Vec<i64>,
}

impl Edl {
    pub fn new(mut cuts: Vec<Cut>, mut scene_markers: Vec<i64>) -> Self {
        cuts.sort_by_key(|c| c.start);
        scene_markers.sort_unstable();
        Self { cuts, scene_markers }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let edl: Edl = serde_json::from_str(text)?;
        Ok(Self::new(edl.cuts, edl.scene_markers))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let edl = Self::from_json(&fs::read_to_string(path)?)?;
        info!("✂️ 已加载剪辑列表: {} 段, {} 个场景标记", edl.cuts.len(), edl.scene_markers.len());
        Ok(edl)
    }
}

impl CutList for Edl {
    fn has_cut(&self) -> bool {
        !self.cuts.is_empty()
    }

    fn has_scene_marker(&self) -> bool {
        !self.scene_markers.is_empty()
    }

    fn in_cut(&self, time_ms: i64) -> Option<Cut> {
        self.cuts.iter().find(|c| c.contains(time_ms)).copied()
    }

    fn next_scene_marker(&self, forward: bool, time_ms: i64) -> Option<i64> {
        let marker = if forward {
            self.scene_markers.iter().copied().find(|m| *m > time_ms)
        } else {
            self.scene_markers.iter().rev().copied().find(|m| *m < time_ms)
        }?;

        // 落在硬剪里的标记移到剪辑边界
        match self.in_cut(marker) {
            Some(cut) if cut.action == CutAction::Cut => Some(if forward { cut.end } else { cut.start }),
            _ => Some(marker),
        }
    }

    fn remove_cut_time(&self, time_ms: i64) -> i64 {
        let removed: i64 = self
            .cuts
            .iter()
            .filter(|c| c.action == CutAction::Cut && c.end <= time_ms)
            .map(|c| c.end - c.start)
            .sum();
        time_ms - removed
    }

    fn restore_cut_time(&self, time_ms: i64) -> i64 {
        let mut time = time_ms;
        for cut in self.cuts.iter().filter(|c| c.action == CutAction::Cut) {
            if time >= cut.start {
                time += cut.end - cut.start;
            }
        }
        time
    }
}

/// 自动跳过的记录，防止同一区间反复触发
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoSkipMarkers {
    /// 最近跳过的硬剪起点
    pub cut: Option<i64>,
    pub commbreak_start: Option<i64>,
    pub commbreak_end: Option<i64>,
    /// 大步后退时允许回到广告段开头一次
    pub seek_to_start: bool,
    /// 当前处于静音区间
    pub mute: bool,
}

impl AutoSkipMarkers {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
