use serde::{Deserialize, Serialize};

/// 内部时间基：1 秒 = 1_000_000 个单位（微秒）
pub const TIME_BASE: f64 = 1_000_000.0;

/// 暂停速度
pub const PLAYSPEED_PAUSE: i32 = 0;
/// 正常速度（千分比）
pub const PLAYSPEED_NORMAL: i32 = 1000;

/// 流表变化的特殊 stream id
pub const STREAM_CHANGE_ID: i32 = -11;

/// 毫秒 -> 内部时间
pub fn msec_to_time(ms: f64) -> f64 {
    ms * (TIME_BASE / 1000.0)
}

/// 秒 -> 内部时间
pub fn sec_to_time(sec: f64) -> f64 {
    sec * TIME_BASE
}

/// 内部时间 -> 毫秒
pub fn time_to_msec(time: f64) -> f64 {
    time / (TIME_BASE / 1000.0)
}

/// 基本流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    None,
    Audio,
    Video,
    Subtitle,
    Teletext,
}

impl Default for StreamType {
    fn default() -> Self {
        StreamType::None
    }
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::None => "none",
            StreamType::Audio => "audio",
            StreamType::Video => "video",
            StreamType::Subtitle => "subtitle",
            StreamType::Teletext => "teletext",
        }
    }
}

/// 流来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    None,
    /// 外部文本字幕
    Text,
    /// 主 demuxer
    Demux,
    /// 字幕 demuxer（vobsub 等）
    DemuxSub,
    /// 导航器（光盘菜单源）
    Nav,
}

/// 流来源 = 来源类型 + 同类实例序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamSource {
    pub kind: SourceKind,
    pub index: u16,
}

impl StreamSource {
    pub const NONE: StreamSource = StreamSource { kind: SourceKind::None, index: 0 };

    pub fn new(kind: SourceKind, index: u16) -> Self {
        Self { kind, index }
    }

    pub fn of(kind: SourceKind) -> Self {
        Self { kind, index: 0 }
    }

    pub fn is_none(&self) -> bool {
        self.kind == SourceKind::None
    }
}

impl Default for StreamSource {
    fn default() -> Self {
        Self::NONE
    }
}

/// 流标志位（default / forced）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFlags {
    pub default: bool,
    pub forced: bool,
}

impl StreamFlags {
    pub const DEFAULT: StreamFlags = StreamFlags { default: true, forced: false };
    pub const FORCED: StreamFlags = StreamFlags { default: false, forced: true };
}

/// 解封装后的数据包
///
/// 时间戳为内部时间基，`None` 表示未知。
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxPacket {
    pub stream_id: i32,
    pub data: Vec<u8>,
    pub dts: Option<f64>,
    pub pts: Option<f64>,
    pub duration: Option<f64>,
    /// 导航源用来区分无缝片段
    pub group_id: i32,
}

impl DemuxPacket {
    pub fn new(stream_id: i32, dts: Option<f64>, pts: Option<f64>) -> Self {
        Self {
            stream_id,
            data: Vec::new(),
            dts,
            pts,
            duration: None,
            group_id: 0,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 扣除累计的时间戳校正量
    pub fn apply_correction(&mut self, correction: f64) {
        if let Some(dts) = self.dts.as_mut() {
            *dts -= correction;
        }
        if let Some(pts) = self.pts.as_mut() {
            *pts -= correction;
        }
    }
}

/// 打开解码管线所需的格式提示
///
/// 两个提示不相等时需要重新打开管线。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamHint {
    pub stream_type: Option<StreamType>,
    pub codec: String,
    pub channels: u32,
    pub sample_rate: u32,
    pub width: u32,
    pub height: u32,
    pub fps_rate: u32,
    pub fps_scale: u32,
    pub extradata: Vec<u8>,
    /// 外部文本字幕文件
    pub filename: Option<String>,
}

/// 注册表中流的简要描述（对外查询用）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub name: String,
    pub language: String,
    pub codec: String,
    pub channels: u32,
}
