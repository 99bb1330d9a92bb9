//! 内存里的输入源、demuxer 和管线
//!
//! 不依赖任何真实文件或解码器，播放线程可以完整地跑起来。
//! 测试和演示程序都用它们。

use crate::core::{msec_to_time, DemuxPacket, MediaItem, PlayerError, Result, StreamHint, StreamType};
use crate::player::callback::PlayerCallback;
use crate::player::demuxer_factory::DemuxerFactory;
use crate::player::demuxer_source::{DemuxStream, DemuxerSource};
use crate::player::input::{CacheStatus, Channel, InputStream, Menus, NavEvent, Navigator, NextStream};
use crate::player::messages::{MessageQueue, PlayerMessage};
use crate::player::pipeline::{PipelineMessage, StreamPipeline};
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// ==================== Demuxer ====================

/// 预先装好数据包的 demuxer
///
/// `seek_time` 定位到第一个 dts 不小于目标的包，所有 seek 记录在共享日志里。
#[derive(Clone)]
pub struct MemoryDemuxer {
    file_name: String,
    length_ms: i64,
    streams: Vec<DemuxStream>,
    packets: Vec<DemuxPacket>,
    cursor: usize,
    /// (名称, 起始毫秒)
    chapters: Vec<(String, i64)>,
    chapter: i32,
    speed: i32,
    seeks: Arc<Mutex<Vec<i64>>>,
}

impl MemoryDemuxer {
    pub fn new(file_name: impl Into<String>, length_ms: i64) -> Self {
        Self {
            file_name: file_name.into(),
            length_ms,
            streams: Vec::new(),
            packets: Vec::new(),
            cursor: 0,
            chapters: Vec::new(),
            chapter: 0,
            speed: 1000,
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 同 id 的流会被替换
    pub fn add_stream(&mut self, stream: DemuxStream) {
        self.streams.retain(|s| s.id != stream.id);
        self.streams.push(stream);
    }

    pub fn push_packet(&mut self, packet: DemuxPacket) {
        self.packets.push(packet);
    }

    /// 按毫秒时间戳批量追加一个流的包
    pub fn push_packets(&mut self, stream_id: i32, dts_ms: &[f64], duration_ms: f64) {
        for dts in dts_ms {
            let time = msec_to_time(*dts);
            self.packets.push(
                DemuxPacket::new(stream_id, Some(time), Some(time))
                    .with_duration(msec_to_time(duration_ms))
                    .with_data(vec![0; 16]),
            );
        }
    }

    pub fn add_chapter(&mut self, name: impl Into<String>, start_ms: i64) {
        self.chapters.push((name.into(), start_ms));
        if self.chapter == 0 {
            self.chapter = 1;
        }
    }

    /// 所有 seek 目标（毫秒），克隆出来的 demuxer 共享同一份
    pub fn seek_log(&self) -> Arc<Mutex<Vec<i64>>> {
        self.seeks.clone()
    }

    pub fn remaining(&self) -> usize {
        self.packets.len() - self.cursor
    }

    fn position_at(&mut self, time: f64) {
        self.cursor = self
            .packets
            .iter()
            .position(|p| p.dts.or(p.pts).map(|t| t >= time).unwrap_or(false))
            .unwrap_or(self.packets.len());
    }
}

impl DemuxerSource for MemoryDemuxer {
    fn read(&mut self) -> Option<DemuxPacket> {
        let packet = self.packets.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(packet)
    }

    fn stream_ids(&self) -> Vec<i32> {
        self.streams.iter().map(|s| s.id).collect()
    }

    fn stream(&self, id: i32) -> Option<&DemuxStream> {
        self.streams.iter().find(|s| s.id == id)
    }

    fn stream_mut(&mut self, id: i32) -> Option<&mut DemuxStream> {
        self.streams.iter_mut().find(|s| s.id == id)
    }

    fn seek_time(&mut self, time_ms: i64, backward: bool) -> Result<Option<f64>> {
        debug!("MemoryDemuxer seek {} ms (backward={})", time_ms, backward);
        self.seeks.lock().push(time_ms);
        let target = msec_to_time(time_ms as f64);
        self.position_at(target);
        Ok(Some(target))
    }

    fn seek_chapter(&mut self, chapter: i32) -> Result<Option<f64>> {
        let start = usize::try_from(chapter - 1)
            .ok()
            .and_then(|i| self.chapters.get(i))
            .map(|(_, start)| *start);
        let Some(start) = start else {
            return Err(PlayerError::SeekError(format!("章节 {} 不存在", chapter)));
        };
        self.chapter = chapter;
        self.seeks.lock().push(start);
        let target = msec_to_time(start as f64);
        self.position_at(target);
        Ok(Some(target))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn set_speed(&mut self, speed: i32) {
        self.speed = speed;
    }

    fn stream_length(&self) -> i64 {
        self.length_ms
    }

    fn chapter(&self) -> i32 {
        self.chapter
    }

    fn chapter_count(&self) -> i32 {
        self.chapters.len() as i32
    }

    fn chapter_name(&self) -> String {
        self.chapters
            .get((self.chapter - 1).max(0) as usize)
            .map(|(name, _)| name.clone())
            .unwrap_or_default()
    }

    fn file_name(&self) -> String {
        self.file_name.clone()
    }
}

// ==================== 输入源能力 ====================

/// 频道列表
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    pub channels: Vec<i32>,
    pub current: usize,
    pub can_record: bool,
    pub recording: bool,
    pub paused: bool,
    /// 切台一律失败
    pub fail: bool,
}

impl MemoryChannel {
    pub fn new(channels: Vec<i32>) -> Self {
        Self {
            channels,
            can_record: true,
            ..Default::default()
        }
    }

    fn step(&mut self, forward: bool) -> bool {
        if self.fail || self.channels.is_empty() {
            return false;
        }
        let count = self.channels.len();
        self.current = if forward { (self.current + 1) % count } else { (self.current + count - 1) % count };
        true
    }
}

impl Channel for MemoryChannel {
    fn select_channel(&mut self, number: i32) -> bool {
        if self.fail {
            return false;
        }
        match self.channels.iter().position(|c| *c == number) {
            Some(index) => {
                self.current = index;
                true
            }
            None => false,
        }
    }

    fn next_channel(&mut self, _preview: bool) -> bool {
        self.step(true)
    }

    fn prev_channel(&mut self, _preview: bool) -> bool {
        self.step(false)
    }

    fn current_channel(&self) -> i32 {
        self.channels.get(self.current).copied().unwrap_or(-1)
    }

    fn can_record(&self) -> bool {
        self.can_record
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn record(&mut self, on: bool) -> bool {
        if !self.can_record {
            return false;
        }
        self.recording = on;
        true
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
    }
}

/// 光盘式的菜单 + 导航器
///
/// 调用记录写进共享的 `calls`，方便在输入源被播放线程拿走后检查。
#[derive(Debug, Clone, Default)]
pub struct MemoryNavigator {
    pub in_menu: bool,
    pub buttons: i32,
    pub events: VecDeque<NavEvent>,
    pub audio_languages: Vec<String>,
    pub subtitle_languages: Vec<String>,
    pub active_audio: i32,
    pub active_subtitle: i32,
    pub subtitle_enabled: bool,
    pub state: String,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MemoryNavigator {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl Menus for MemoryNavigator {
    fn is_in_menu(&self) -> bool {
        self.in_menu
    }

    fn skip_still(&mut self) {
        self.record("skip_still");
    }

    fn on_menu(&mut self) -> bool {
        self.record("menu");
        self.in_menu = true;
        true
    }

    fn on_back(&mut self) -> bool {
        self.record("back");
        true
    }

    fn on_up(&mut self) {
        self.record("up");
    }

    fn on_down(&mut self) {
        self.record("down");
    }

    fn on_left(&mut self) {
        self.record("left");
    }

    fn on_right(&mut self) {
        self.record("right");
    }

    fn on_next(&mut self) {
        self.record("next");
    }

    fn on_previous(&mut self) {
        self.record("previous");
    }

    fn activate_button(&mut self) {
        self.record("activate");
    }

    fn select_button(&mut self, button: i32) {
        self.record(format!("select {}", button));
    }

    fn poll_event(&mut self) -> Option<NavEvent> {
        self.events.pop_front()
    }

    fn total_buttons(&self) -> i32 {
        self.buttons
    }
}

impl Navigator for MemoryNavigator {
    fn audio_stream_count(&self) -> i32 {
        self.audio_languages.len() as i32
    }

    fn audio_stream_language(&self, index: i32) -> String {
        self.audio_languages.get(index as usize).cloned().unwrap_or_default()
    }

    fn active_audio_stream(&self) -> i32 {
        self.active_audio
    }

    fn set_active_audio_stream(&mut self, index: i32) -> bool {
        if index < 0 || index >= self.audio_stream_count() {
            return false;
        }
        self.active_audio = index;
        true
    }

    fn subtitle_stream_count(&self) -> i32 {
        self.subtitle_languages.len() as i32
    }

    fn subtitle_stream_language(&self, index: i32) -> String {
        self.subtitle_languages.get(index as usize).cloned().unwrap_or_default()
    }

    fn active_subtitle_stream(&self) -> i32 {
        self.active_subtitle
    }

    fn set_active_subtitle_stream(&mut self, index: i32) -> bool {
        if index < 0 || index >= self.subtitle_stream_count() {
            return false;
        }
        self.active_subtitle = index;
        true
    }

    fn enable_subtitle_stream(&mut self, enable: bool) {
        self.subtitle_enabled = enable;
    }

    fn is_subtitle_stream_enabled(&self) -> bool {
        self.subtitle_enabled
    }

    fn navigator_state(&self) -> Option<String> {
        Some(self.state.clone())
    }

    fn set_navigator_state(&mut self, state: &str) -> bool {
        self.record(format!("state {}", state));
        self.state = state.to_string();
        true
    }
}

// ==================== 输入源 ====================

/// 内存输入源
///
/// `next_stream` 每次调用弹出一个预设回答，用完后回答 `None`。
#[derive(Default)]
pub struct MemoryInput {
    pub file_name: String,
    pub next_streams: VecDeque<NextStream>,
    pub eof: bool,
    pub length: i64,
    pub position: i64,
    pub cache: Option<CacheStatus>,
    pub live: bool,
    pub fail_open: bool,
    pub channel: Option<MemoryChannel>,
    pub navigator: Option<MemoryNavigator>,
}

impl MemoryInput {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: MemoryChannel) -> Self {
        self.live = true;
        self.channel = Some(channel);
        self
    }

    pub fn with_navigator(mut self, navigator: MemoryNavigator) -> Self {
        self.navigator = Some(navigator);
        self
    }
}

impl InputStream for MemoryInput {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(PlayerError::OpenError(self.file_name.clone()));
        }
        Ok(())
    }

    fn file_name(&self) -> String {
        self.file_name.clone()
    }

    fn next_stream(&mut self) -> NextStream {
        self.next_streams.pop_front().unwrap_or(NextStream::None)
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn length(&self) -> i64 {
        self.length
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn cache_status(&self) -> Option<CacheStatus> {
        self.cache
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn menus(&mut self) -> Option<&mut dyn Menus> {
        self.navigator.as_mut().map(|n| n as &mut dyn Menus)
    }

    fn menus_ref(&self) -> Option<&dyn Menus> {
        self.navigator.as_ref().map(|n| n as &dyn Menus)
    }

    fn navigator(&mut self) -> Option<&mut dyn Navigator> {
        self.navigator.as_mut().map(|n| n as &mut dyn Navigator)
    }

    fn navigator_ref(&self) -> Option<&dyn Navigator> {
        self.navigator.as_ref().map(|n| n as &dyn Navigator)
    }

    fn channel(&mut self) -> Option<&mut dyn Channel> {
        self.channel.as_mut().map(|c| c as &mut dyn Channel)
    }

    fn channel_ref(&self) -> Option<&dyn Channel> {
        self.channel.as_ref().map(|c| c as &dyn Channel)
    }
}

// ==================== 工厂 ====================

/// 按顺序交出预先准备好的输入源和 demuxer
#[derive(Default)]
pub struct MemoryFactory {
    inputs: VecDeque<MemoryInput>,
    demuxers: VecDeque<MemoryDemuxer>,
    /// 字幕 demuxer 按文件名索引，每次打开给一份克隆
    subtitle_demuxers: HashMap<String, MemoryDemuxer>,
    created: Arc<Mutex<usize>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: MemoryInput) -> Self {
        self.inputs.push_back(input);
        self
    }

    pub fn with_demuxer(mut self, demuxer: MemoryDemuxer) -> Self {
        self.demuxers.push_back(demuxer);
        self
    }

    pub fn with_subtitle_demuxer(mut self, demuxer: MemoryDemuxer) -> Self {
        self.subtitle_demuxers.insert(demuxer.file_name(), demuxer);
        self
    }

    /// 已经交出去的主 demuxer 个数
    pub fn created_counter(&self) -> Arc<Mutex<usize>> {
        self.created.clone()
    }
}

impl DemuxerFactory for MemoryFactory {
    fn create_input(&mut self, item: &MediaItem) -> Result<Box<dyn InputStream>> {
        let input = self
            .inputs
            .pop_front()
            .ok_or_else(|| PlayerError::OpenError(item.path.clone()))?;
        Ok(Box::new(input))
    }

    fn create_demuxer(&mut self, input: &mut dyn InputStream) -> Result<Box<dyn DemuxerSource>> {
        let demuxer = self
            .demuxers
            .pop_front()
            .ok_or_else(|| PlayerError::DemuxerError(input.file_name()))?;
        *self.created.lock() += 1;
        Ok(Box::new(demuxer))
    }

    fn create_subtitle_demuxer(&mut self, filename: &str, _filename2: &str) -> Result<Box<dyn DemuxerSource>> {
        let demuxer = self
            .subtitle_demuxers
            .get(filename)
            .cloned()
            .ok_or_else(|| PlayerError::DemuxerError(filename.to_string()))?;
        Ok(Box::new(demuxer))
    }
}

// ==================== 管线 ====================

/// 管线对外暴露的状态，测试随时可以改
#[derive(Debug, Clone)]
pub struct ProbeState {
    pub messages: Vec<PipelineMessage>,
    /// 每次 open_stream 的提示，包括被拒绝的
    pub opened: Vec<StreamHint>,
    pub closed: usize,
    pub flushes: usize,
    pub speed: i32,
    pub accepts_data: bool,
    pub has_data: bool,
    pub stalled: bool,
    pub eos: bool,
    pub inited: bool,
    pub level: i32,
    pub current_pts: Option<f64>,
    pub volume: f32,
    pub delay: f64,
    pub subtitle_delay: f64,
    /// 这些编码一律打开失败
    pub reject_codecs: Vec<String>,
    /// 收到 PlayerStarted 请求后立即回报
    pub auto_start: bool,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            opened: Vec::new(),
            closed: 0,
            flushes: 0,
            speed: 1000,
            accepts_data: true,
            has_data: false,
            stalled: false,
            eos: true,
            inited: true,
            level: 0,
            current_pts: None,
            volume: 1.0,
            delay: 0.0,
            subtitle_delay: 0.0,
            reject_codecs: Vec::new(),
            auto_start: true,
        }
    }
}

/// 管线状态的共享句柄
#[derive(Clone, Default)]
pub struct PipelineProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl PipelineProbe {
    pub fn with<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn messages(&self) -> Vec<PipelineMessage> {
        self.state.lock().messages.clone()
    }

    /// 收到的数据包 (dts, drop)
    pub fn packets(&self) -> Vec<(Option<f64>, bool)> {
        self.state
            .lock()
            .messages
            .iter()
            .filter_map(|m| match m {
                PipelineMessage::Packet { packet, drop } => Some((packet.dts, *drop)),
                _ => None,
            })
            .collect()
    }

    pub fn open_attempts(&self) -> usize {
        self.state.lock().opened.len()
    }

    pub fn clear_messages(&self) {
        self.state.lock().messages.clear();
    }
}

/// 只记录消息的管线
pub struct RecordingPipeline {
    kind: StreamType,
    probe: PipelineProbe,
    queue: Option<MessageQueue>,
    /// 清空后第一个包到来时再回报一次开始
    reported: bool,
}

impl RecordingPipeline {
    pub fn new(kind: StreamType) -> (Self, PipelineProbe) {
        let probe = PipelineProbe::default();
        let pipeline = Self {
            kind,
            probe: probe.clone(),
            queue: None,
            reported: false,
        };
        (pipeline, probe)
    }

    /// 带回报队列：PlayerStarted 请求会回送给播放线程
    pub fn with_queue(kind: StreamType, queue: MessageQueue) -> (Self, PipelineProbe) {
        let (mut pipeline, probe) = Self::new(kind);
        pipeline.queue = Some(queue);
        (pipeline, probe)
    }
}

impl RecordingPipeline {
    fn report_started(&mut self) {
        if let Some(queue) = &self.queue {
            queue.put(PlayerMessage::PlayerStarted(self.kind));
            self.reported = true;
        }
    }
}

impl StreamPipeline for RecordingPipeline {
    fn open_stream(&mut self, hint: &StreamHint) -> bool {
        let mut state = self.probe.state.lock();
        state.opened.push(hint.clone());
        !state.reject_codecs.iter().any(|c| *c == hint.codec)
    }

    fn close_stream(&mut self, _wait_for_buffers: bool) {
        self.probe.state.lock().closed += 1;
    }

    fn send(&mut self, msg: PipelineMessage) {
        let auto_start = {
            let mut state = self.probe.state.lock();
            state.messages.push(msg.clone());
            state.auto_start
        };
        match msg {
            PipelineMessage::Synchronize(barrier) => barrier.acknowledge(),
            PipelineMessage::PlayerStarted if auto_start => self.report_started(),
            PipelineMessage::Packet { .. } if auto_start && !self.reported => self.report_started(),
            _ => {}
        }
    }

    fn flush(&mut self) {
        self.reported = false;
        self.probe.state.lock().flushes += 1;
    }

    fn set_speed(&mut self, speed: i32) {
        self.probe.state.lock().speed = speed;
    }

    fn accepts_data(&self) -> bool {
        self.probe.state.lock().accepts_data
    }

    fn has_data(&self) -> bool {
        self.probe.state.lock().has_data
    }

    fn is_stalled(&self) -> bool {
        self.probe.state.lock().stalled
    }

    fn is_eos(&self) -> bool {
        self.probe.state.lock().eos
    }

    fn level(&self) -> i32 {
        self.probe.state.lock().level
    }

    fn is_inited(&self) -> bool {
        self.probe.state.lock().inited
    }

    fn current_pts(&self) -> Option<f64> {
        self.probe.state.lock().current_pts
    }

    fn set_delay(&mut self, delay: f64) {
        self.probe.state.lock().delay = delay;
    }

    fn set_subtitle_delay(&mut self, delay: f64) {
        self.probe.state.lock().subtitle_delay = delay;
    }

    fn set_volume(&mut self, volume: f32) {
        self.probe.state.lock().volume = volume;
    }
}

// ==================== 回调 ====================

/// 把收到的回调按名字记下来
#[derive(Clone, Default)]
pub struct RecordingCallback {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl PlayerCallback for RecordingCallback {
    fn on_playback_started(&self) {
        self.push("started".into());
    }

    fn on_playback_ended(&self) {
        self.push("ended".into());
    }

    fn on_playback_stopped(&self) {
        self.push("stopped".into());
    }

    fn on_playback_paused(&self) {
        self.push("paused".into());
    }

    fn on_playback_resumed(&self) {
        self.push("resumed".into());
    }

    fn on_playback_seek(&self, time_ms: i64, _offset_ms: i64) {
        self.push(format!("seek {}", time_ms));
    }

    fn on_playback_seek_chapter(&self, chapter: i32) {
        self.push(format!("chapter {}", chapter));
    }

    fn on_playback_speed_changed(&self, speed: i32) {
        self.push(format!("speed {}", speed));
    }

    fn on_seek_target_abandoned(&self, stream: StreamType, _target: f64, _dts: f64) {
        self.push(format!("abandoned {}", stream.as_str()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demuxer_seek_positions_at_target() {
        let mut demuxer = MemoryDemuxer::new("a.ts", 1000);
        demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "h264"));
        demuxer.push_packets(0, &[0.0, 40.0, 80.0, 120.0], 40.0);

        demuxer.seek_time(70, true).unwrap();
        assert_eq!(demuxer.read().and_then(|p| p.dts), Some(msec_to_time(80.0)));
        assert_eq!(*demuxer.seek_log().lock(), vec![70]);

        demuxer.seek_time(500, false).unwrap();
        assert!(demuxer.read().is_none());
    }

    #[test]
    fn test_recording_pipeline_rejects_codec_and_acks_barrier() {
        let queue = MessageQueue::new();
        let (mut pipeline, probe) = RecordingPipeline::with_queue(StreamType::Audio, queue.clone());
        probe.with(|s| s.reject_codecs.push("dts".into()));

        let hint = StreamHint {
            codec: "dts".into(),
            ..Default::default()
        };
        assert!(!pipeline.open_stream(&hint));
        assert_eq!(probe.open_attempts(), 1);

        pipeline.send(PipelineMessage::PlayerStarted);
        assert!(matches!(queue.try_get(), Some(PlayerMessage::PlayerStarted(StreamType::Audio))));

        let barrier = crate::player::messages::SyncBarrier::new(1);
        pipeline.send(PipelineMessage::Synchronize(barrier.clone()));
        let abort = std::sync::atomic::AtomicBool::new(false);
        assert!(barrier.wait(std::time::Duration::from_millis(100), &abort));
    }

    #[test]
    fn test_channel_wraps_around() {
        let mut channel = MemoryChannel::new(vec![1, 2, 3]);
        assert!(channel.prev_channel(false));
        assert_eq!(channel.current_channel(), 3);
        assert!(channel.select_channel(2));
        assert!(!channel.select_channel(9));
        assert_eq!(channel.current_channel(), 2);
    }
}
