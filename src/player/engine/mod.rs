//! 播放线程的核心状态机
//!
//! `Engine` 独占 demuxer、选择流注册表和各类型的流游标，
//! 每次 `tick()` 依次处理消息、评估缓冲和倍速、读取并分发一个包。
//! 其他线程只通过消息队列、共享快照和 abort 标志与它交互。

mod control;
mod read;
mod route;
mod streams;

use crate::core::{
    msec_to_time, time_to_msec, MediaItem, PlaybackClock, PlayerError, PlayerOptions, PlayerSettings, Result,
    ErrorKind, SourceKind, StreamType, PLAYSPEED_NORMAL,
};
use crate::player::caching::{caching_times, queue_time_ms, CachingState, CachingTimes};
use crate::player::callback::{NullCallback, PlayerCallback};
use crate::player::current_stream::CurrentStream;
use crate::player::demuxer_factory::DemuxerFactory;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::edl::{AutoSkipMarkers, CutAction, CutList, Edl};
use crate::player::input::InputStream;
use crate::player::messages::MessageQueue;
use crate::player::pipeline::StreamPipeline;
use crate::player::selection::SelectionStreams;
use crate::player::state::{PlayerStateSnapshot, SharedState};
use log::{error, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 一次播放会话需要的外部协作者
pub struct EngineContext {
    pub item: MediaItem,
    pub options: PlayerOptions,
    pub settings: PlayerSettings,
    pub factory: Box<dyn DemuxerFactory>,
    pub audio: Box<dyn StreamPipeline>,
    pub video: Box<dyn StreamPipeline>,
    pub subtitle: Box<dyn StreamPipeline>,
    pub cut_list: Box<dyn CutList>,
    pub callback: Arc<dyn PlayerCallback>,
}

impl EngineContext {
    pub fn new(
        item: MediaItem,
        settings: PlayerSettings,
        factory: Box<dyn DemuxerFactory>,
        audio: Box<dyn StreamPipeline>,
        video: Box<dyn StreamPipeline>,
        subtitle: Box<dyn StreamPipeline>,
    ) -> Self {
        Self {
            item,
            options: PlayerOptions::default(),
            settings,
            factory,
            audio,
            video,
            subtitle,
            cut_list: Box::new(Edl::default()),
            callback: Arc::new(NullCallback),
        }
    }

    pub fn with_options(mut self, options: PlayerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cut_list(mut self, cut_list: Box<dyn CutList>) -> Self {
        self.cut_list = cut_list;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn PlayerCallback>) -> Self {
        self.callback = callback;
        self
    }
}

/// 播放线程与控制线程共享的句柄
#[derive(Clone)]
pub struct EngineHandles {
    pub clock: PlaybackClock,
    pub queue: MessageQueue,
    pub shared: SharedState,
    pub abort: Arc<AtomicBool>,
}

impl EngineHandles {
    pub fn new(clock: PlaybackClock) -> Self {
        Self {
            clock,
            queue: MessageQueue::new(),
            shared: SharedState::new(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for EngineHandles {
    fn default() -> Self {
        Self::new(PlaybackClock::new())
    }
}

/// 会话结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// 自然播完
    Ended,
    /// 被中止或出错
    Aborted,
}

/// 一次 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// 调度方应休眠后再 tick
    Idle(Duration),
    Finished(FinishReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavMode {
    Normal,
    Still,
    Seek,
}

/// 导航源（光盘菜单）的状态
#[derive(Debug, Clone)]
struct NavState {
    mode: NavMode,
    still_start_ms: i64,
    /// 0 表示无限静帧
    still_time_ms: i64,
    /// 导航器选中的物理流号，-1 表示没有
    selected_audio: i32,
    selected_subtitle: i32,
}

impl Default for NavState {
    fn default() -> Self {
        Self {
            mode: NavMode::Normal,
            still_start_ms: 0,
            still_time_ms: 0,
            selected_audio: -1,
            selected_subtitle: -1,
        }
    }
}

// 倍速追赶时上一次的测量点
#[derive(Debug, Default)]
struct SpeedProbe {
    last_pts: Option<f64>,
    last_time: Option<i64>,
}

/// 播放引擎
pub struct Engine {
    item: MediaItem,
    options: PlayerOptions,
    settings: PlayerSettings,
    factory: Box<dyn DemuxerFactory>,
    audio: Box<dyn StreamPipeline>,
    video: Box<dyn StreamPipeline>,
    subtitle: Box<dyn StreamPipeline>,
    cut_list: Box<dyn CutList>,
    callback: Arc<dyn PlayerCallback>,

    clock: PlaybackClock,
    queue: MessageQueue,
    shared: SharedState,
    abort: Arc<AtomicBool>,

    input: Option<Box<dyn InputStream>>,
    demuxer: Option<Box<dyn DemuxerSource>>,
    subtitle_demuxer: Option<Box<dyn DemuxerSource>>,
    /// demuxer 每次重建加一，旧的流标识随之失效
    generation: u64,
    subtitle_generation: u64,

    streams: SelectionStreams,
    // 图文电视流只登记不路由，没有游标
    current_audio: CurrentStream,
    current_video: CurrentStream,
    current_subtitle: CurrentStream,

    caching: CachingState,
    play_speed: i32,
    /// 连续性校正的累计量
    offset_pts: f64,
    state: PlayerStateSnapshot,
    markers: AutoSkipMarkers,
    nav: NavState,
    speed_probe: SpeedProbe,

    subtitle_visible: bool,
    av_delay: f32,
    subtitle_delay: f32,
    volume: f32,
    change_volume: bool,
    /// 频道预览到期时刻（绝对时钟毫秒）
    channel_entry_deadline: Option<i64>,
    /// 连续从字幕 demuxer 读到的包数
    subtitle_streak: u32,
    finished: Option<FinishReason>,
}

impl Engine {
    pub fn new(ctx: EngineContext, handles: EngineHandles) -> Self {
        let settings = ctx.settings;
        Self {
            item: ctx.item,
            options: ctx.options,
            factory: ctx.factory,
            audio: ctx.audio,
            video: ctx.video,
            subtitle: ctx.subtitle,
            cut_list: ctx.cut_list,
            callback: ctx.callback,
            clock: handles.clock,
            queue: handles.queue,
            shared: handles.shared,
            abort: handles.abort,
            input: None,
            demuxer: None,
            subtitle_demuxer: None,
            generation: 0,
            subtitle_generation: 0,
            streams: SelectionStreams::new(),
            current_audio: CurrentStream::new(StreamType::Audio),
            current_video: CurrentStream::new(StreamType::Video),
            current_subtitle: CurrentStream::new(StreamType::Subtitle),
            caching: CachingState::Done,
            play_speed: PLAYSPEED_NORMAL,
            offset_pts: 0.0,
            state: PlayerStateSnapshot::default(),
            markers: AutoSkipMarkers::default(),
            nav: NavState::default(),
            speed_probe: SpeedProbe::default(),
            subtitle_visible: settings.subtitle_on,
            av_delay: settings.audio_delay,
            subtitle_delay: settings.subtitle_delay,
            volume: settings.volume,
            change_volume: true,
            channel_entry_deadline: None,
            subtitle_streak: 0,
            finished: None,
            settings,
        }
    }

    // ==================== 会话生命周期 ====================

    /// 打开输入和 demuxer、选默认流、处理起播位置
    ///
    /// 失败时设置 abort 标志，调用方随后应调用 `exit()`。
    pub fn startup(&mut self) -> Result<()> {
        info!("{} 🎬 开始播放: {}", log_ctx(), self.item.path);
        self.shared.set_play_speed(self.play_speed);
        self.shared.set_caching(self.caching);

        let result = self.prepare();
        if let Err(e) = &result {
            error!("{} ❌ 启动失败: {}", log_ctx(), e);
            self.abort.store(true, Ordering::SeqCst);
        }
        result
    }

    fn prepare(&mut self) -> Result<()> {
        self.open_input_stream()?;

        // 导航源从头播放，恢复保存的导航状态
        let subtitle_on = self.settings.subtitle_on;
        if let Some(nav) = self.input.as_mut().and_then(|i| i.navigator()) {
            self.options.start_time = 0.0;
            if !self.options.state.is_empty() {
                if !nav.set_navigator_state(&self.options.state) {
                    warn!("{} ⚠️ 无法恢复导航器状态", log_ctx());
                }
            } else {
                nav.enable_subtitle_stream(subtitle_on);
            }
        }

        self.open_demux_stream()?;
        self.open_default_streams();
        self.markers.clear();

        let start = self.start_offset_ms();
        if start > 0 {
            info!("{} ⏩ 起播位置 {} ms", log_ctx(), start);
            if let Some(demuxer) = self.demuxer.as_mut() {
                if let Err(e) = demuxer.seek_time(start, false) {
                    warn!("{} ⚠️ 起播 seek 失败: {}", log_ctx(), e);
                }
            }
            if let Some(demuxer) = self.subtitle_demuxer.as_mut() {
                if let Err(e) = demuxer.seek_time(start, false) {
                    warn!("{} ⚠️ 字幕 demuxer 起播 seek 失败: {}", log_ctx(), e);
                }
            }
        }

        let pvr = self.pvr_caching();
        if pvr {
            self.set_caching(CachingState::Pvr);
        }
        self.update_play_state(0.0);
        self.callback.on_playback_started();
        if !pvr {
            self.set_caching(CachingState::Flush);
        }
        Ok(())
    }

    // 起播偏移：选项优先，否则跳过开头的剪辑区间
    fn start_offset_ms(&mut self) -> i64 {
        if self.options.start_time > 0.0 || self.options.start_percent > 0.0 {
            if self.options.start_percent > 0.0 {
                let length = self.demuxer.as_ref().map(|d| d.stream_length()).unwrap_or(0) as f64;
                return self
                    .cut_list
                    .restore_cut_time((length * self.options.start_percent / 100.0) as i64);
            }
            return self.cut_list.restore_cut_time((self.options.start_time * 1000.0) as i64);
        }

        match self.cut_list.in_cut(0) {
            Some(cut) if cut.action == CutAction::Cut => cut.end,
            Some(cut) if cut.action == CutAction::CommBreak => {
                self.markers.commbreak_start = Some(cut.start);
                self.markers.commbreak_end = Some(cut.end);
                self.markers.seek_to_start = true;
                cut.end
            }
            _ => 0,
        }
    }

    fn pvr_caching(&self) -> bool {
        self.settings.pvr_cache_in_player && self.input.as_ref().map(|i| i.is_live()).unwrap_or(false)
    }

    /// 执行一轮循环
    pub fn tick(&mut self) -> TickOutcome {
        if let Some(reason) = self.finished {
            return TickOutcome::Finished(reason);
        }
        if self.aborted() {
            return self.finish();
        }

        // ========== 步骤1: 处理消息 ==========
        self.handle_messages();
        if self.aborted() {
            return self.finish();
        }

        // ========== 步骤2: 保证输入和 demuxer 存在 ==========
        if self.input.is_none() {
            if let Err(e) = self.open_input_stream() {
                self.escalate(e);
                return self.finish();
            }
        }

        if self.demuxer.is_none() {
            let ended = match self.input.as_mut() {
                Some(input) => input.next_stream() == crate::player::input::NextStream::None || input.is_eof(),
                None => true,
            };
            if ended {
                info!("{} 🏁 输入没有后续片段", log_ctx());
                return self.finish();
            }
            if let Err(e) = self.open_demux_stream() {
                self.escalate(e);
                return self.finish();
            }
            self.open_default_streams();
            if self.pvr_caching() {
                self.set_caching(CachingState::Pvr);
            }
            self.update_play_state(0.0);
        }

        // ========== 步骤3: 缓冲和倍速 ==========
        self.handle_play_speed();
        self.update_play_state(200.0);
        self.poll_navigator();

        if self.check_delayed_channel_entry() {
            return TickOutcome::Continue;
        }

        // 管线满时不读
        if (!self.audio.accepts_data() && self.current_audio.is_open())
            || (!self.video.accepts_data() && self.current_video.is_open())
        {
            return TickOutcome::Idle(Duration::from_millis(10));
        }

        // ========== 步骤4: 读取并分发一个包 ==========
        let (packet, stream, from_subtitle_demuxer) = match self.read_packet() {
            read::ReadOutcome::Empty => return self.handle_end_of_stream(),
            read::ReadOutcome::Skipped => return TickOutcome::Continue,
            read::ReadOutcome::Packet {
                packet,
                stream,
                from_subtitle_demuxer,
            } => (packet, stream, from_subtitle_demuxer),
        };

        self.close_invalid_streams();
        for kind in [StreamType::Audio, StreamType::Video, StreamType::Subtitle] {
            if self.is_better_stream(kind, &stream) {
                if let Err(e) = self.open_stream(kind, stream.id, stream.source) {
                    self.escalate(e);
                }
            }
        }

        if self.change_volume {
            self.audio.set_volume(self.volume);
            self.change_volume = false;
        }

        self.process_packet(&stream, from_subtitle_demuxer, packet);

        // ========== 步骤5: 自动跳过剪辑区间 ==========
        self.check_auto_scene_skip();
        TickOutcome::Continue
    }

    /// 在当前线程上一直 tick 到会话结束
    ///
    /// 空闲时在消息队列上等待，新消息或关闭时的唤醒会提前结束空闲。
    pub fn run(&mut self) -> FinishReason {
        loop {
            match self.tick() {
                TickOutcome::Continue => {}
                TickOutcome::Idle(duration) => {
                    self.queue.wait(duration);
                }
                TickOutcome::Finished(reason) => return reason,
            }
        }
    }

    fn finish(&mut self) -> TickOutcome {
        TickOutcome::Finished(self.exit())
    }

    /// 收尾：关闭所有流、释放 demuxer 和输入、通知回调，只执行一次
    pub fn exit(&mut self) -> FinishReason {
        if let Some(reason) = self.finished {
            return reason;
        }
        let aborted = self.aborted();
        let reason = if aborted { FinishReason::Aborted } else { FinishReason::Ended };
        info!("{} ⏹️ 播放结束 ({:?})", log_ctx(), reason);

        self.set_caching(CachingState::Done);
        self.close_stream(StreamType::Audio, !aborted);
        self.close_stream(StreamType::Video, !aborted);
        self.close_subtitle_stream(!aborted);

        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.abort();
        }
        self.demuxer = None;
        self.subtitle_demuxer = None;
        self.input = None;
        self.streams.clear(StreamType::None, SourceKind::None);

        if aborted {
            self.callback.on_playback_stopped();
        } else {
            self.callback.on_playback_ended();
        }
        self.finished = Some(reason);
        reason
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// 按错误等级处理：致命错误中止会话，其余记录后继续
    fn escalate(&mut self, err: PlayerError) {
        match err.kind() {
            ErrorKind::Fatal => {
                error!("{} ❌ 致命错误，中止播放: {}", log_ctx(), err);
                self.abort.store(true, Ordering::SeqCst);
            }
            ErrorKind::StreamLocal => warn!("{} ⚠️ {}", log_ctx(), err),
            ErrorKind::Transient => info!("{} ⏳ {}", log_ctx(), err),
        }
    }

    // ==================== 小工具 ====================

    fn cursor(&self, kind: StreamType) -> &CurrentStream {
        match kind {
            StreamType::Audio => &self.current_audio,
            StreamType::Video => &self.current_video,
            _ => &self.current_subtitle,
        }
    }

    fn cursor_mut(&mut self, kind: StreamType) -> &mut CurrentStream {
        match kind {
            StreamType::Audio => &mut self.current_audio,
            StreamType::Video => &mut self.current_video,
            _ => &mut self.current_subtitle,
        }
    }

    fn pipeline(&self, kind: StreamType) -> &dyn StreamPipeline {
        match kind {
            StreamType::Audio => self.audio.as_ref(),
            StreamType::Video => self.video.as_ref(),
            _ => self.subtitle.as_ref(),
        }
    }

    fn pipeline_mut(&mut self, kind: StreamType) -> &mut dyn StreamPipeline {
        match kind {
            StreamType::Audio => self.audio.as_mut(),
            StreamType::Video => self.video.as_mut(),
            _ => self.subtitle.as_mut(),
        }
    }

    /// 绝对时钟（毫秒）
    fn now_ms(&self) -> i64 {
        time_to_msec(self.clock.absolute()) as i64
    }

    /// 外推后的当前位置（毫秒）
    fn get_time(&self) -> i64 {
        self.state.time_at(self.clock.absolute(), self.play_speed) as i64
    }

    fn has_navigator(&self) -> bool {
        self.input.as_ref().map(|i| i.navigator_ref().is_some()).unwrap_or(false)
    }

    fn is_in_menu(&self) -> bool {
        if self.nav.mode == NavMode::Still {
            return true;
        }
        self.input
            .as_ref()
            .and_then(|i| i.menus_ref())
            .map(|m| m.is_in_menu())
            .unwrap_or(false)
    }

    fn has_video(&self) -> bool {
        self.has_navigator() || self.streams.count(StreamType::Video) > 0
    }

    fn has_audio(&self) -> bool {
        self.streams.count(StreamType::Audio) > 0
    }

    fn queue_time_ms(&self) -> f64 {
        queue_time_ms(self.audio.level(), self.video.level())
    }

    fn caching_times(&self) -> Option<CachingTimes> {
        let input = self.input.as_ref()?;
        let demuxer = self.demuxer.as_ref()?;
        let status = input.cache_status()?;
        caching_times(
            status,
            input.length(),
            input.position(),
            demuxer.stream_length(),
            self.queue_time_ms(),
        )
    }

    /// 当前打开流在注册表中的序号
    fn current_index(&self, kind: StreamType) -> i32 {
        if let Some(nav) = self.input.as_ref().and_then(|i| i.navigator_ref()) {
            let active = match kind {
                StreamType::Audio => nav.active_audio_stream(),
                _ => nav.active_subtitle_stream(),
            };
            let filename = self.input.as_ref().map(|i| i.file_name()).unwrap_or_default();
            return self
                .streams
                .index_of(kind, self.streams.source(SourceKind::Nav, &filename), active);
        }
        let cursor = self.cursor(kind);
        self.streams.index_of(kind, cursor.source, cursor.id)
    }

    // ==================== 状态快照 ====================

    /// 重算状态快照，距上次不足 `timeout_ms` 时跳过
    fn update_play_state(&mut self, timeout_ms: f64) {
        let now = self.clock.absolute();
        if let Some(timestamp) = self.state.timestamp {
            if timestamp + msec_to_time(timeout_ms) > now {
                return;
            }
        }

        let mut st = self.state.clone();
        st.dts = self
            .current_video
            .dts
            .or(self.current_audio.dts)
            .or(Some(self.clock.clock()));

        if let Some(demuxer) = self.demuxer.as_ref() {
            st.chapter = demuxer.chapter();
            st.chapter_count = demuxer.chapter_count();
            st.chapter_name = demuxer.chapter_name();
            st.time = time_to_msec(self.clock.clock() + self.offset_pts).round();
            st.time_total = demuxer.stream_length() as f64;
        }

        if let Some(input) = self.input.as_ref() {
            if let Some(channel) = input.channel_ref() {
                st.can_record = channel.can_record();
                st.recording = channel.is_recording();
            } else {
                st.can_record = false;
                st.recording = false;
            }

            if let Some(display) = input.display_time() {
                if display.total_time() > 0 {
                    st.time = display.time() as f64;
                    st.time_total = display.total_time() as f64;
                }
            }

            if input.menus_ref().is_some() && self.nav.mode == NavMode::Still {
                st.time = (self.now_ms() - self.nav.still_start_ms) as f64;
                st.time_total = self.nav.still_time_ms as f64;
            }

            match input.channel_ref().filter(|_| input.is_live()) {
                Some(channel) => {
                    st.can_pause = channel.can_pause();
                    st.can_seek = channel.can_seek();
                }
                None => {
                    st.can_seek = st.time_total > 0.0;
                    st.can_pause = true;
                }
            }
        }

        if self.cut_list.has_cut() {
            st.time = self.cut_list.remove_cut_time(st.time as i64) as f64;
            st.time_total = self.cut_list.remove_cut_time(st.time_total as i64) as f64;
        }

        match self.input.as_ref().and_then(|i| i.navigator_ref()) {
            Some(nav) => {
                st.time_offset = msec_to_time(st.time) - st.dts.unwrap_or(0.0);
                st.player_state = nav.navigator_state().unwrap_or_default();
            }
            None => {
                st.time_offset = 0.0;
                st.player_state.clear();
            }
        }

        st.demux_audio = self.demux_stream_info(StreamType::Audio);
        st.demux_video = self.demux_stream_info(StreamType::Video);

        let queue_time = self.queue_time_ms();
        match self.caching_times() {
            Some(times) => {
                st.cache_delay = times.delay.max(0.0);
                st.cache_level = times.level.clamp(0.0, 1.0);
                st.cache_offset = times.offset;
            }
            None => {
                st.cache_delay = 0.0;
                st.cache_level = (queue_time / 8000.0).min(1.0);
                st.cache_offset = if st.time_total > 0.0 { queue_time / st.time_total } else { 0.0 };
            }
        }

        st.cache_bytes = match self.input.as_ref().and_then(|i| i.cache_status().map(|c| (i.length(), c))) {
            Some((length, status)) if st.time_total > 0.0 => {
                status.forward + (length as f64 * queue_time / st.time_total) as i64
            }
            Some((_, status)) => status.forward,
            None => 0,
        };

        st.has_video = self.has_video();
        st.has_audio = self.has_audio();
        st.audio_streams = self.streams.summaries(StreamType::Audio);
        st.subtitle_streams = self.streams.summaries(StreamType::Subtitle);
        st.current_audio = self.current_index(StreamType::Audio);
        st.current_subtitle = self.current_index(StreamType::Subtitle);
        st.subtitle_visible = self.subtitle_visible_state();
        st.audio_bitrate = self.audio.bitrate();
        st.video_bitrate = self.video.bitrate();
        st.av_delay = self.av_delay;
        st.subtitle_delay = self.subtitle_delay;

        st.timestamp = Some(now);
        self.state = st.clone();
        self.shared.replace(st);
    }

    fn demux_stream_info(&self, kind: StreamType) -> String {
        let cursor = self.cursor(kind);
        if !cursor.is_open() {
            return String::new();
        }
        self.demuxer
            .as_ref()
            .and_then(|d| d.stream(cursor.id))
            .filter(|s| s.kind() == kind)
            .map(|s| s.stream_info())
            .unwrap_or_default()
    }

    fn subtitle_visible_state(&self) -> bool {
        let Some(input) = self.input.as_ref() else {
            return self.subtitle_visible;
        };
        match input.navigator_ref() {
            Some(_) if input.menus_ref().map(|m| m.is_in_menu()).unwrap_or(false) => self.settings.subtitle_on,
            Some(nav) => nav.is_subtitle_stream_enabled(),
            None => self.subtitle_visible,
        }
    }
}

#[cfg(test)]
mod tests;
