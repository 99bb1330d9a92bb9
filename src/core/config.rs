use super::error::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 播放器设置（对应宿主程序的全局设置）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// 首选音频语言，"original" 表示不按语言挑选
    pub audio_language: String,
    /// 首选字幕语言
    pub subtitle_language: String,
    /// 全局字幕开关
    pub subtitle_on: bool,
    /// 上次会话记住的音频流序号，-1 表示没有
    pub audio_stream: i32,
    /// 上次会话记住的字幕流序号，-1 表示没有
    pub subtitle_stream: i32,
    /// 音视频延迟（秒）
    pub audio_delay: f32,
    /// 字幕延迟（秒）
    pub subtitle_delay: f32,
    pub volume: f32,

    // 按时间跳转的步长（秒）
    pub use_time_seeking: bool,
    pub time_seek_forward: i32,
    pub time_seek_backward: i32,
    pub time_seek_forward_big: i32,
    pub time_seek_backward_big: i32,

    // 按百分比跳转的步长
    pub percent_seek_forward: f32,
    pub percent_seek_backward: f32,
    pub percent_seek_forward_big: f32,
    pub percent_seek_backward_big: f32,
    /// 大步跳转优先按章节
    pub chapter_seeking: bool,

    /// 直播缓冲：每种流至少达到的缓冲百分比
    pub pvr_min_audio_cache_level: i32,
    pub pvr_min_video_cache_level: i32,
    /// 直播源是否在播放器内缓冲
    pub pvr_cache_in_player: bool,
    /// 频道预览确认超时（毫秒），0 表示不预览
    pub channel_entry_timeout_ms: i64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            audio_language: "original".to_string(),
            subtitle_language: "original".to_string(),
            subtitle_on: true,
            audio_stream: -1,
            subtitle_stream: -1,
            audio_delay: 0.0,
            subtitle_delay: 0.0,
            volume: 1.0,
            use_time_seeking: true,
            time_seek_forward: 30,
            time_seek_backward: -30,
            time_seek_forward_big: 600,
            time_seek_backward_big: -600,
            percent_seek_forward: 2.0,
            percent_seek_backward: -2.0,
            percent_seek_forward_big: 10.0,
            percent_seek_backward_big: -10.0,
            chapter_seeking: true,
            pvr_min_audio_cache_level: 10,
            pvr_min_video_cache_level: 5,
            pvr_cache_in_player: true,
            channel_entry_timeout_ms: 0,
        }
    }
}

impl PlayerSettings {
    /// 从 JSON 文件加载设置，缺失的字段取默认值
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        info!("📄 已加载播放器设置: {}", path.display());
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// 单次 OpenFile 的选项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// 起播时间（秒）
    pub start_time: f64,
    /// 起播百分比
    pub start_percent: f64,
    /// 只播视频
    pub video_only: bool,
    /// 上次保存的导航器状态
    pub state: String,
}

/// 要播放的媒体项
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaItem {
    pub path: String,
    /// 外部字幕文件
    pub subtitles: Vec<String>,
    /// 直播源
    pub live: bool,
}

impl MediaItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}
