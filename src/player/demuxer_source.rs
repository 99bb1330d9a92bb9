use crate::core::{DemuxPacket, Result, StreamFlags, StreamHint, StreamSource, StreamType};

/// Demuxer 报告的单个基本流
#[derive(Debug, Clone, Default)]
pub struct DemuxStream {
    pub id: i32,
    pub stream_type: StreamType,
    /// 由选择注册表回写
    pub source: StreamSource,
    pub codec: String,
    pub language: String,
    pub name: String,
    pub flags: StreamFlags,
    pub channels: u32,
    pub sample_rate: u32,
    pub width: u32,
    pub height: u32,
    pub fps_rate: u32,
    pub fps_scale: u32,
    pub extradata: Vec<u8>,
    /// 导航源上的物理流号
    pub physical_id: i32,
    /// 管线打开失败后永久禁用
    pub disabled: bool,
    /// 没有管线消费时丢弃
    pub discard: bool,
    /// 格式变化计数，变化时需要重新比较提示
    pub changes: u32,
}

impl DemuxStream {
    pub fn new(id: i32, stream_type: StreamType, codec: impl Into<String>) -> Self {
        Self {
            id,
            stream_type,
            codec: codec.into(),
            physical_id: id,
            ..Default::default()
        }
    }

    pub fn kind(&self) -> StreamType {
        self.stream_type
    }

    /// 根据当前格式信息生成管线提示
    pub fn hint(&self) -> StreamHint {
        StreamHint {
            stream_type: Some(self.stream_type),
            codec: self.codec.clone(),
            channels: self.channels,
            sample_rate: self.sample_rate,
            width: self.width,
            height: self.height,
            fps_rate: self.fps_rate,
            fps_scale: self.fps_scale,
            extradata: self.extradata.clone(),
            filename: None,
        }
    }

    /// 音频流的类型描述，拼在显示名后面
    pub fn stream_info(&self) -> String {
        match self.kind() {
            StreamType::Audio => format!("{} {}ch", self.codec, self.channels),
            StreamType::Video => format!("{} {}x{}", self.codec, self.width, self.height),
            _ => self.codec.clone(),
        }
    }
}

/// Demuxer 数据源抽象接口
///
/// 主 demuxer 和字幕 demuxer 都实现这个接口。
pub trait DemuxerSource: Send {
    /// 读取下一个包，`None` 表示暂时没有数据或到达末尾
    fn read(&mut self) -> Option<DemuxPacket>;

    /// 当前所有流的 id
    fn stream_ids(&self) -> Vec<i32>;

    fn nr_of_streams(&self) -> usize {
        self.stream_ids().len()
    }

    fn stream(&self, id: i32) -> Option<&DemuxStream>;

    fn stream_mut(&mut self, id: i32) -> Option<&mut DemuxStream>;

    /// Seek 到指定时间（毫秒）
    ///
    /// 成功时返回 seek 后第一个包的起始时间（可能未知）。
    fn seek_time(&mut self, time_ms: i64, backward: bool) -> Result<Option<f64>>;

    /// 跳到章节，默认不支持
    fn seek_chapter(&mut self, _chapter: i32) -> Result<Option<f64>> {
        Ok(None)
    }

    fn reset(&mut self);

    fn abort(&mut self) {}

    fn set_speed(&mut self, _speed: i32) {}

    /// 总时长（毫秒）
    fn stream_length(&self) -> i64;

    fn chapter(&self) -> i32 {
        0
    }

    fn chapter_count(&self) -> i32 {
        0
    }

    fn chapter_name(&self) -> String {
        String::new()
    }

    fn file_name(&self) -> String;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String {
        self.file_name()
    }

    /// 某类型流的个数
    fn count_of(&self, kind: StreamType) -> usize {
        self.stream_ids()
            .into_iter()
            .filter(|id| self.stream(*id).map(|s| s.kind() == kind).unwrap_or(false))
            .count()
    }
}
