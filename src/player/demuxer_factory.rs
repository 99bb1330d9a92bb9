use crate::core::{MediaItem, Result};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::input::InputStream;

/// Demuxer 工厂 - 负责按媒体项创建输入流和 demuxer
///
/// 播放线程在启动、`NextStream::Open` 以及加载 vobsub 字幕时调用，
/// 创建失败由调用方按错误等级处理。
pub trait DemuxerFactory: Send {
    /// 为媒体项创建输入流（尚未打开）
    fn create_input(&mut self, item: &MediaItem) -> Result<Box<dyn InputStream>>;

    /// 在已打开的输入流上创建主 demuxer
    fn create_demuxer(&mut self, input: &mut dyn InputStream) -> Result<Box<dyn DemuxerSource>>;

    /// 打开 vobsub 之类的字幕 demuxer（idx + sub）
    fn create_subtitle_demuxer(&mut self, filename: &str, filename2: &str) -> Result<Box<dyn DemuxerSource>>;
}
