use crate::core::{StreamHint, StreamSource, StreamType};

/// 标识 demuxer 里的一个流对象
///
/// demuxer 每次重建都会换代，旧的标识随之失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamToken {
    pub generation: u64,
    pub from_subtitle_demuxer: bool,
    pub id: i32,
}

/// 每种基本流一个的游标：当前打开的流及其时间状态
#[derive(Debug, Clone)]
pub struct CurrentStream {
    pub stream_type: StreamType,
    pub id: i32,
    pub source: StreamSource,
    pub dts: Option<f64>,
    /// 包时长的平滑估计
    pub dur: f64,
    /// seek 目标，之前的包打上丢弃标记
    pub startpts: Option<f64>,
    pub hint: StreamHint,
    pub token: Option<StreamToken>,
    pub changes: u32,
    pub inited: bool,
    pub started: bool,
}

impl CurrentStream {
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            id: -1,
            source: StreamSource::NONE,
            dts: None,
            dur: 0.0,
            startpts: None,
            hint: StreamHint::default(),
            token: None,
            changes: 0,
            inited: false,
            started: false,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.stream_type);
    }

    pub fn is_open(&self) -> bool {
        self.id >= 0
    }

    /// 是否就是这个 (id, source) 的流
    pub fn matches(&self, id: i32, source: StreamSource) -> bool {
        self.id == id && self.source == source
    }

    /// 当前包的预计结束时间
    pub fn dts_end(&self) -> Option<f64> {
        self.dts.map(|dts| dts + self.dur)
    }

    /// 更新时间戳和时长估计
    ///
    /// 没有 dts 用 pts；包没有时长时按相邻 dts 差做 0.1 权重的平滑。
    pub fn update_timestamps(&mut self, dts: Option<f64>, pts: Option<f64>, duration: Option<f64>) {
        let new_dts = dts.or(pts).or(self.dts);
        match (duration, new_dts, self.dts) {
            (Some(d), _, _) => self.dur = d,
            (None, Some(new), Some(old)) => self.dur = 0.1 * (self.dur * 9.0 + (new - old)),
            _ => {}
        }
        self.dts = new_dts;
    }
}
