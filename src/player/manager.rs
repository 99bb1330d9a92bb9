use crate::core::{PlaybackClock, PlayerError, PlayerSettings, Result, PLAYSPEED_NORMAL, PLAYSPEED_PAUSE};
use crate::player::caching::CachingState;
use crate::player::callback::{NullCallback, PlayerCallback};
use crate::player::engine::{log_ctx, Engine, EngineContext, EngineHandles, FinishReason};
use crate::player::messages::{Action, MessageQueue, PlayerMessage, SeekRequest, SyncBarrier};
use crate::player::state::PlayerStateSnapshot;
use crossbeam_channel::bounded;
use log::{debug, error, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 调用方等待播放线程处理命令的默认时长
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);

/// 播放管理器 - 对外的控制面
///
/// 每次 `open_file` 启动一个播放线程运行 [`Engine`]，
/// 之后所有命令都以消息的形式投递给它，查询只读共享快照。
pub struct PlaybackManager {
    handles: EngineHandles,
    settings: PlayerSettings,
    callback: Arc<dyn PlayerCallback>,
    playback_thread: Option<thread::JoinHandle<FinishReason>>,
}

impl PlaybackManager {
    pub fn new() -> Self {
        Self::with_clock(PlaybackClock::new())
    }

    pub fn with_clock(clock: PlaybackClock) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        Self {
            handles: EngineHandles::new(clock),
            settings: PlayerSettings::default(),
            callback: Arc::new(NullCallback),
            playback_thread: None,
        }
    }

    /// 管线回报 PlayerStarted 用的队列，跨会话不变
    pub fn message_queue(&self) -> MessageQueue {
        self.handles.queue.clone()
    }

    pub fn clock(&self) -> PlaybackClock {
        self.handles.clock.clone()
    }

    // ==================== 会话 ====================

    /// 打开媒体并启动播放线程
    ///
    /// 等到播放线程完成起播才返回；起播失败时线程已经退出，不会留下会话。
    pub fn open_file(&mut self, ctx: EngineContext) -> Result<()> {
        self.close_file();
        info!("{} 📂 打开: {}", log_ctx(), ctx.item.path);

        // ========== 步骤1: 重置共享句柄 ==========
        self.handles.abort.store(false, Ordering::SeqCst);
        self.handles.queue.clear();
        self.handles.shared.replace(PlayerStateSnapshot::default());
        self.handles.shared.set_play_speed(PLAYSPEED_NORMAL);
        self.handles.shared.set_caching(CachingState::Done);
        self.settings = ctx.settings.clone();
        self.callback = ctx.callback.clone();

        // ========== 步骤2: 启动播放线程 ==========
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let handles = self.handles.clone();
        let playback_thread = thread::Builder::new()
            .name("myy-playback".into())
            .spawn(move || {
                let mut engine = Engine::new(ctx, handles);
                let started = engine.startup();
                let failed = started.is_err();
                let _ = ready_tx.send(started);
                if failed {
                    return engine.exit();
                }
                engine.run()
            })?;

        // ========== 步骤3: 等待起播结果 ==========
        let outcome = ready_rx.recv().unwrap_or(Err(PlayerError::Aborted));
        match outcome {
            Ok(()) => {
                info!("{} ✅ 播放线程已启动", log_ctx());
                self.playback_thread = Some(playback_thread);
                Ok(())
            }
            Err(e) => {
                error!("{} ❌ 打开失败: {}", log_ctx(), e);
                let _ = playback_thread.join();
                Err(e)
            }
        }
    }

    /// 停止播放并等待播放线程结束
    pub fn close_file(&mut self) -> Option<FinishReason> {
        let playback_thread = self.playback_thread.take()?;
        info!("{} ⏹️  停止播放", log_ctx());
        self.handles.abort.store(true, Ordering::SeqCst);
        self.handles.queue.wake();

        match playback_thread.join() {
            Ok(reason) => {
                info!("{} ✅ 播放线程已结束 ({:?})", log_ctx(), reason);
                Some(reason)
            }
            Err(_) => {
                error!("{} ❌ 播放线程异常退出", log_ctx());
                None
            }
        }
    }

    /// 播放线程还在运行
    pub fn is_playing(&self) -> bool {
        self.playback_thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// 等播放线程把队列处理到当前位置，超时或中止返回 false
    pub fn synchronize_demuxer(&self, timeout: Duration) -> bool {
        if !self.is_playing() {
            return false;
        }
        let barrier = SyncBarrier::new(1);
        self.handles.queue.put(PlayerMessage::Synchronize(barrier.clone()));
        let done = barrier.wait(timeout, &self.handles.abort);
        if !done {
            debug!("{} 同步播放线程超时", log_ctx());
        }
        done
    }

    fn post(&self, msg: PlayerMessage) {
        if self.playback_thread.is_none() {
            debug!("{} 没有会话，忽略 {:?}", log_ctx(), msg.kind());
            return;
        }
        self.handles.queue.put(msg);
    }

    // ==================== 播放控制 ====================

    /// 暂停 / 继续
    ///
    /// 缓冲中按暂停只是提前结束缓冲。
    pub fn pause(&self) {
        let snapshot = self.handles.shared.snapshot();
        if !snapshot.can_pause {
            warn!("{} ⚠️ 当前源不能暂停", log_ctx());
            return;
        }

        let speed = self.handles.shared.play_speed();
        if speed != PLAYSPEED_PAUSE && self.is_caching() {
            info!("{} ⏩ 提前结束缓冲", log_ctx());
            self.post(PlayerMessage::EndCaching);
            return;
        }

        if speed == PLAYSPEED_PAUSE {
            info!("{} ▶️ 继续播放", log_ctx());
            self.set_play_speed(PLAYSPEED_NORMAL);
            self.callback.on_playback_resumed();
        } else {
            info!("{} ⏸️ 暂停", log_ctx());
            self.set_play_speed(PLAYSPEED_PAUSE);
            self.callback.on_playback_paused();
        }
    }

    /// 只接受暂停和正常速度，快进快退走引擎内部的倍速追赶
    pub fn set_play_speed(&self, speed: i32) {
        if speed != PLAYSPEED_PAUSE && speed != PLAYSPEED_NORMAL {
            warn!("{} ⚠️ 不支持的播放速度 {}", log_ctx(), speed);
            return;
        }
        self.post(PlayerMessage::SetSpeed(speed));
        self.synchronize_demuxer(SYNC_TIMEOUT);
    }

    pub fn play_speed(&self) -> i32 {
        self.handles.shared.play_speed()
    }

    pub fn set_volume(&self, volume: f32) {
        self.post(PlayerMessage::SetVolume(volume.clamp(0.0, 1.0)));
    }

    /// 音画延迟（秒）
    pub fn set_av_delay(&self, seconds: f32) {
        self.post(PlayerMessage::SetAvDelay(seconds));
    }

    pub fn set_subtitle_delay(&self, seconds: f32) {
        self.post(PlayerMessage::SetSubtitleDelay(seconds));
    }

    pub fn record(&self, on: bool) {
        self.post(PlayerMessage::SetRecord(on));
    }

    /// 菜单 / 遥控器输入，没有会话时返回 false
    pub fn on_action(&self, action: Action) -> bool {
        if !self.is_playing() {
            return false;
        }
        self.post(PlayerMessage::GuiAction(action));
        true
    }

    // ==================== Seek ====================

    /// 按设置的步长前后跳
    pub fn seek(&self, forward: bool, large: bool) {
        self.post(PlayerMessage::SeekStep { forward, large });
    }

    /// 跳到指定时间（毫秒，去掉剪辑后的时间）
    pub fn seek_time(&self, time_ms: i64) {
        let now = self.time();
        let target = time_ms.max(0);
        info!("{} 🎯 Seek 到: {} ms", log_ctx(), target);
        self.post(PlayerMessage::Seek(SeekRequest::new(target)));
        self.synchronize_demuxer(SYNC_TIMEOUT);
        self.callback.on_playback_seek(target, target - now);
    }

    pub fn seek_percentage(&self, percent: f32) {
        self.post(PlayerMessage::SeekPercentage(percent));
        self.synchronize_demuxer(SYNC_TIMEOUT);
    }

    pub fn seek_chapter(&self, chapter: i32) {
        self.post(PlayerMessage::SeekChapter(chapter));
        self.synchronize_demuxer(SYNC_TIMEOUT);
    }

    pub fn seek_scene(&self, forward: bool) {
        self.post(PlayerMessage::SeekScene(forward));
    }

    // ==================== 流切换 ====================

    pub fn set_audio_stream(&self, index: i32) {
        self.post(PlayerMessage::SetAudioStream(index));
        self.synchronize_demuxer(SYNC_TIMEOUT);
    }

    pub fn set_subtitle(&self, index: i32) {
        self.post(PlayerMessage::SetSubtitleStream(index));
    }

    pub fn set_subtitle_visible(&self, visible: bool) {
        self.post(PlayerMessage::SetSubtitleVisible(visible));
    }

    pub fn add_subtitle(&self, filename: &str) {
        self.post(PlayerMessage::AddSubtitle(filename.to_string()));
    }

    /// 恢复导航器状态串
    pub fn set_player_state(&self, state: &str) {
        self.post(PlayerMessage::SetState(state.to_string()));
    }

    // ==================== 查询 ====================

    pub fn snapshot(&self) -> PlayerStateSnapshot {
        self.handles.shared.snapshot()
    }

    pub fn is_paused(&self) -> bool {
        self.play_speed() == PLAYSPEED_PAUSE || self.is_caching()
    }

    pub fn is_caching(&self) -> bool {
        matches!(self.handles.shared.caching(), CachingState::Full | CachingState::Pvr)
    }

    /// 当前位置（毫秒），按快照之后流逝的时间外推
    pub fn time(&self) -> i64 {
        let snapshot = self.handles.shared.snapshot();
        snapshot.time_at(self.handles.clock.absolute(), self.play_speed()) as i64
    }

    pub fn total_time(&self) -> i64 {
        self.handles.shared.snapshot().time_total as i64
    }

    pub fn percentage(&self) -> f32 {
        let total = self.total_time();
        if total <= 0 {
            return 0.0;
        }
        self.time() as f32 * 100.0 / total as f32
    }

    pub fn cache_percentage(&self) -> f32 {
        let offset = self.handles.shared.snapshot().cache_offset as f32;
        (self.percentage() + offset * 100.0).min(100.0)
    }

    /// 缓冲水位 0..=100
    pub fn cache_level(&self) -> i32 {
        (self.handles.shared.snapshot().cache_level * 100.0) as i32
    }

    pub fn can_seek(&self) -> bool {
        self.handles.shared.snapshot().can_seek
    }

    pub fn can_pause(&self) -> bool {
        self.handles.shared.snapshot().can_pause
    }

    pub fn can_record(&self) -> bool {
        self.handles.shared.snapshot().can_record
    }

    pub fn is_recording(&self) -> bool {
        self.handles.shared.snapshot().recording
    }

    pub fn has_video(&self) -> bool {
        self.handles.shared.snapshot().has_video
    }

    pub fn has_audio(&self) -> bool {
        self.handles.shared.snapshot().has_audio
    }

    pub fn chapter(&self) -> i32 {
        self.handles.shared.snapshot().chapter
    }

    pub fn chapter_count(&self) -> i32 {
        self.handles.shared.snapshot().chapter_count
    }

    pub fn chapter_name(&self) -> String {
        self.handles.shared.snapshot().chapter_name
    }

    pub fn audio_stream_count(&self) -> usize {
        self.handles.shared.snapshot().audio_streams.len()
    }

    pub fn audio_stream_name(&self, index: usize) -> Option<String> {
        self.handles.shared.snapshot().audio_streams.get(index).map(|s| s.name.clone())
    }

    pub fn audio_stream_language(&self, index: usize) -> Option<String> {
        self.handles.shared.snapshot().audio_streams.get(index).map(|s| s.language.clone())
    }

    pub fn current_audio_stream(&self) -> i32 {
        self.handles.shared.snapshot().current_audio
    }

    pub fn subtitle_count(&self) -> usize {
        self.handles.shared.snapshot().subtitle_streams.len()
    }

    pub fn subtitle_name(&self, index: usize) -> Option<String> {
        self.handles.shared.snapshot().subtitle_streams.get(index).map(|s| s.name.clone())
    }

    pub fn subtitle_language(&self, index: usize) -> Option<String> {
        self.handles.shared.snapshot().subtitle_streams.get(index).map(|s| s.language.clone())
    }

    pub fn current_subtitle(&self) -> i32 {
        self.handles.shared.snapshot().current_subtitle
    }

    pub fn subtitle_visible(&self) -> bool {
        self.handles.shared.snapshot().subtitle_visible
    }

    pub fn av_delay(&self) -> f32 {
        self.handles.shared.snapshot().av_delay
    }

    pub fn subtitle_delay(&self) -> f32 {
        self.handles.shared.snapshot().subtitle_delay
    }

    pub fn audio_bitrate(&self) -> i32 {
        self.handles.shared.snapshot().audio_bitrate
    }

    pub fn video_bitrate(&self) -> i32 {
        self.handles.shared.snapshot().video_bitrate
    }

    /// 导航器状态串，普通源为空
    pub fn player_state(&self) -> String {
        self.handles.shared.snapshot().player_state
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }
}

impl Default for PlaybackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close_file();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MediaItem, StreamType};
    use crate::player::demuxer_source::DemuxStream;
    use crate::player::memory::{MemoryDemuxer, MemoryFactory, MemoryInput, PipelineProbe, RecordingCallback, RecordingPipeline};
    use std::time::Instant;

    fn session(manager: &PlaybackManager, path: &str, packets: usize) -> (EngineContext, PipelineProbe, RecordingCallback) {
        let mut demuxer = MemoryDemuxer::new(path, 10_000);
        demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "h264"));
        demuxer.add_stream(DemuxStream::new(1, StreamType::Audio, "aac"));
        for i in 0..packets {
            let t = i as f64 * 40.0;
            demuxer.push_packets(0, &[t], 40.0);
            demuxer.push_packets(1, &[t], 40.0);
        }
        let factory = MemoryFactory::new()
            .with_input(MemoryInput::new(path))
            .with_demuxer(demuxer);

        let queue = manager.message_queue();
        let (audio, _) = RecordingPipeline::with_queue(StreamType::Audio, queue.clone());
        let (video, video_probe) = RecordingPipeline::with_queue(StreamType::Video, queue.clone());
        let (subtitle, _) = RecordingPipeline::with_queue(StreamType::Subtitle, queue);
        let callback = RecordingCallback::new();

        let ctx = EngineContext::new(
            MediaItem::new(path),
            PlayerSettings::default(),
            Box::new(factory),
            Box::new(audio),
            Box::new(video),
            Box::new(subtitle),
        )
        .with_callback(Arc::new(callback.clone()));
        (ctx, video_probe, callback)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_open_and_play_to_end() {
        let mut manager = PlaybackManager::new();
        let (ctx, video, callback) = session(&manager, "movie.mkv", 25);
        manager.open_file(ctx).unwrap();

        assert!(manager.has_video());
        assert!(manager.has_audio());
        assert_eq!(manager.total_time(), 10_000);
        assert_eq!(manager.subtitle_count(), 0);

        assert!(wait_for(|| callback.events().contains(&"ended".to_string())));
        assert_eq!(video.packets().len(), 25);
        assert_eq!(manager.close_file(), Some(FinishReason::Ended));
        assert!(!manager.is_playing());
    }

    #[test]
    fn test_open_failure_leaves_no_session() {
        let mut manager = PlaybackManager::new();
        let (mut ctx, _, callback) = session(&manager, "movie.mkv", 1);
        ctx.factory = Box::new(MemoryFactory::new().with_input(MemoryInput::new("movie.mkv")));

        assert!(manager.open_file(ctx).is_err());
        assert!(!manager.is_playing());
        assert_eq!(manager.close_file(), None);
        assert_eq!(callback.events(), vec!["stopped".to_string()]);
    }

    #[test]
    fn test_pause_resume_and_close() {
        let mut manager = PlaybackManager::new();
        let (ctx, video, callback) = session(&manager, "movie.mkv", 5);
        // 管线一直有数据，会话不会自然结束
        video.with(|s| s.has_data = true);
        manager.open_file(ctx).unwrap();
        assert!(manager.can_pause());

        manager.pause();
        assert!(wait_for(|| manager.play_speed() == PLAYSPEED_PAUSE));
        assert!(manager.is_paused());

        manager.pause();
        assert!(wait_for(|| manager.play_speed() == PLAYSPEED_NORMAL));

        // 不支持的速度被忽略
        manager.set_play_speed(2 * PLAYSPEED_NORMAL);
        assert!(manager.synchronize_demuxer(Duration::from_secs(1)));
        assert_eq!(manager.play_speed(), PLAYSPEED_NORMAL);

        assert_eq!(manager.close_file(), Some(FinishReason::Aborted));
        let events = callback.events();
        assert!(events.contains(&"paused".to_string()));
        assert!(events.contains(&"resumed".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("stopped"));
    }
}
