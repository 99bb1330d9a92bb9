use super::{log_ctx, Engine, NavMode};
use crate::core::{
    msec_to_time, sec_to_time, time_to_msec, SourceKind, StreamFlags, StreamType, PLAYSPEED_NORMAL, PLAYSPEED_PAUSE,
};
use crate::player::caching::{evaluate, resolve_flush, CachingInputs, CachingState, PipelineStatus};
use crate::player::input::NavEvent;
use crate::player::messages::{Action, MessageKind, PlayerMessage, SeekRequest, SyncBarrier};
use crate::player::pipeline::PipelineMessage;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::time::Duration;

/// 清空缓冲时等待音视频管线应答的上限
const FLUSH_SYNC_TIMEOUT: Duration = Duration::from_millis(1000);

impl Engine {
    // ==================== 消息处理 ====================

    /// 取空消息队列，每条消息处理完再取下一条
    pub(super) fn handle_messages(&mut self) {
        while let Some(msg) = self.queue.try_get() {
            if self.aborted() {
                return;
            }
            match msg {
                PlayerMessage::Seek(request) => {
                    // 后面还有 seek 时这一条作废
                    if self.seek_pending() {
                        debug!("{} 跳过被覆盖的 seek {} ms", log_ctx(), request.time_ms);
                        continue;
                    }
                    self.handle_seek(request);
                }
                PlayerMessage::SeekChapter(chapter) => {
                    if self.seek_pending() {
                        continue;
                    }
                    self.handle_seek_chapter(chapter);
                }
                PlayerMessage::SeekStep { forward, large } => self.seek_step(forward, large),
                PlayerMessage::SeekPercentage(percent) => self.seek_percentage(percent),
                PlayerMessage::SeekScene(forward) => {
                    self.seek_scene(forward);
                }
                PlayerMessage::DemuxerReset => {
                    info!("{} 🔄 重置 demuxer", log_ctx());
                    self.current_audio.token = None;
                    self.current_video.token = None;
                    self.current_subtitle.token = None;
                    if let Some(demuxer) = self.demuxer.as_mut() {
                        demuxer.reset();
                    }
                    if let Some(demuxer) = self.subtitle_demuxer.as_mut() {
                        demuxer.reset();
                    }
                }
                PlayerMessage::SetAudioStream(index) => self.handle_set_stream(StreamType::Audio, index),
                PlayerMessage::SetSubtitleStream(index) => self.handle_set_stream(StreamType::Subtitle, index),
                PlayerMessage::SetSubtitleVisible(visible) => {
                    self.subtitle_visible = visible;
                    self.video.send(PipelineMessage::SubtitleVisible(visible));
                    if let Some(nav) = self.input.as_mut().and_then(|i| i.navigator()) {
                        nav.enable_subtitle_stream(visible);
                    }
                }
                PlayerMessage::SetState(state) => {
                    self.set_caching(CachingState::Flush);
                    if let Some(nav) = self.input.as_mut().and_then(|i| i.navigator()) {
                        if !nav.set_navigator_state(&state) {
                            warn!("{} ⚠️ 导航器拒绝了状态串", log_ctx());
                        }
                        self.nav.mode = NavMode::Normal;
                        self.nav.still_start_ms = 0;
                        self.nav.still_time_ms = 0;
                    }
                }
                PlayerMessage::SetRecord(on) => {
                    if let Some(channel) = self.input.as_mut().and_then(|i| i.channel()) {
                        info!("{} ⏺️ 录制: {}", log_ctx(), on);
                        channel.record(on);
                    }
                }
                PlayerMessage::Flush => self.flush_buffers(false, None, false),
                PlayerMessage::SetSpeed(speed) => self.apply_speed(speed),
                PlayerMessage::SetAvDelay(delay) => {
                    self.av_delay = delay;
                    self.video.set_delay(sec_to_time(delay as f64));
                }
                PlayerMessage::SetSubtitleDelay(delay) => {
                    self.subtitle_delay = delay;
                    self.subtitle.set_subtitle_delay(sec_to_time(delay as f64));
                }
                PlayerMessage::SetVolume(volume) => {
                    self.volume = volume;
                    self.change_volume = true;
                }
                PlayerMessage::AddSubtitle(path) => {
                    self.add_subtitle_file(&path, "", StreamFlags::default());
                }
                PlayerMessage::ChannelSelectNumber(number) => {
                    if self.queue.count(MessageKind::ChannelSelectNumber) == 0 {
                        self.select_channel(number);
                    }
                }
                PlayerMessage::ChannelNext => self.step_channel(true),
                PlayerMessage::ChannelPrev => self.step_channel(false),
                PlayerMessage::GuiAction(action) => {
                    self.on_action(action);
                }
                PlayerMessage::EndCaching => self.set_caching(CachingState::Done),
                PlayerMessage::PlayerStarted(kind) => {
                    debug!("{} {}管线已开始输出", log_ctx(), kind.as_str());
                    if matches!(kind, StreamType::Audio | StreamType::Video) {
                        self.cursor_mut(kind).started = true;
                    }
                }
                PlayerMessage::Synchronize(barrier) => barrier.acknowledge(),
            }
        }
    }

    fn seek_pending(&self) -> bool {
        self.queue.count(MessageKind::Seek) > 0 || self.queue.count(MessageKind::SeekChapter) > 0
    }

    // ==================== Seek ====================

    fn handle_seek(&mut self, request: SeekRequest) {
        if !self.state.can_seek {
            debug!("{} 当前输入不能 seek，忽略", log_ctx());
            return;
        }

        if !request.trickplay && request.flush {
            self.set_caching(CachingState::Flush);
        }

        let time = if request.restore {
            self.cut_list.restore_cut_time(request.time_ms)
        } else {
            request.time_ms
        }
        .max(0);

        info!("{} ⏩ demuxer seek 到 {} ms", log_ctx(), time);
        let result = match self.demuxer.as_mut() {
            Some(demuxer) => demuxer.seek_time(time, request.backward),
            None => return,
        };
        match result {
            Ok(start) => {
                if let Some(demuxer) = self.subtitle_demuxer.as_mut() {
                    if let Err(e) = demuxer.seek_time(time, request.backward) {
                        debug!("{} 字幕 demuxer seek 失败: {}", log_ctx(), e);
                    }
                }
                self.flush_buffers(!request.flush, start, request.accurate);
            }
            Err(e) => warn!("{} ⚠️ seek 出错: {}", log_ctx(), e),
        }

        // 导航器会在 seek 后发一次 HopChannel，需要跳过
        if self.has_navigator() {
            self.nav.mode = NavMode::Seek;
        }
    }

    fn handle_seek_chapter(&mut self, chapter: i32) {
        let count = self.demuxer.as_ref().map(|d| d.chapter_count()).unwrap_or(0);
        if count <= 0 {
            // 没有章节时当作大步长跳转
            let current = self.state.chapter;
            self.seek_step(current > 0 && chapter > current, true);
            return;
        }
        let chapter = chapter.max(0);
        if chapter > count {
            return;
        }

        self.set_caching(CachingState::Flush);
        let result = match self.demuxer.as_mut() {
            Some(demuxer) => demuxer.seek_chapter(chapter),
            None => return,
        };
        match result {
            Ok(start) => {
                info!("{} 📖 跳到第 {} 章", log_ctx(), chapter);
                self.flush_buffers(false, start, true);
                self.callback.on_playback_seek_chapter(chapter);
            }
            Err(e) => warn!("{} ⚠️ 章节跳转失败: {}", log_ctx(), e),
        }
    }

    /// 按设置的步长前后跳：有章节的大步长跳章节，其余按时间或百分比
    pub(super) fn seek_step(&mut self, forward: bool, large: bool) {
        if !self.state.can_seek {
            return;
        }

        let chapter = self.state.chapter;
        let chapter_count = self.state.chapter_count;
        if large
            && self.settings.chapter_seeking
            && ((forward && chapter < chapter_count) || (!forward && chapter > 1))
        {
            let target = if forward { chapter + 1 } else { chapter - 1 };
            self.queue.put(PlayerMessage::SeekChapter(target));
            return;
        }

        let total = self.state.time_total;
        let now = self.get_time();
        let s = &self.settings;
        let mut seek = if s.use_time_seeking && total > 2000.0 * s.time_seek_forward_big as f64 {
            let step = match (forward, large) {
                (true, true) => s.time_seek_forward_big,
                (false, true) => s.time_seek_backward_big,
                (true, false) => s.time_seek_forward,
                (false, false) => s.time_seek_backward,
            };
            step as i64 * 1000 + now
        } else {
            let step = match (forward, large) {
                (true, true) => s.percent_seek_forward_big,
                (false, true) => s.percent_seek_backward_big,
                (true, false) => s.percent_seek_forward,
                (false, false) => s.percent_seek_backward,
            } as f64;
            let percentage = if total > 0.0 { now as f64 * 100.0 / total } else { 0.0 };
            (total * (percentage + step) / 100.0) as i64
        };

        let mut restore = true;
        if self.cut_list.has_cut() && large {
            let clock = time_to_msec(self.clock.clock()) as i64;
            let markers = &mut self.markers;
            match (markers.commbreak_start, markers.commbreak_end) {
                // 自动跳过广告后 10 秒内大步后退：认为广告段标错了，退回段首，只做一次
                (Some(start), Some(end)) if !forward && markers.seek_to_start && clock >= end && clock <= end + 10_000 => {
                    info!("{} 📺 退回广告段开头 [{} - {}]", log_ctx(), start, end);
                    seek = start;
                    restore = false;
                    markers.seek_to_start = false;
                }
                // 在退回过的广告段里大步前进：直接跳到段尾
                (Some(start), Some(end)) if forward && clock >= start && clock <= end => {
                    info!("{} 📺 跳到广告段结尾 [{} - {}]", log_ctx(), start, end);
                    seek = end;
                    restore = false;
                }
                _ => {}
            }
        }

        self.queue.put(PlayerMessage::Seek(SeekRequest {
            time_ms: seek,
            backward: !forward,
            flush: true,
            accurate: false,
            restore,
            trickplay: false,
        }));
        let seek = seek.max(0);
        self.callback.on_playback_seek(seek, seek - now);
    }

    fn seek_percentage(&mut self, percent: f32) {
        let total = self.state.time_total;
        if total <= 0.0 {
            return;
        }
        let time = (total * percent as f64 / 100.0) as i64;
        let offset = time - self.get_time();
        self.queue.put(PlayerMessage::Seek(SeekRequest::new(time)));
        self.callback.on_playback_seek(time, offset);
    }

    /// 跳到前后最近的场景标记；后退时留 5 秒余量，否则永远越不过当前标记
    pub(super) fn seek_scene(&mut self, forward: bool) -> bool {
        if !self.cut_list.has_scene_marker() {
            return false;
        }
        let mut clock = self.get_time();
        if !forward && clock > 5000 {
            clock -= 5000;
        }
        match self.cut_list.next_scene_marker(forward, clock) {
            Some(marker) => {
                info!("{} 🎬 跳到场景标记 {} ms", log_ctx(), marker);
                self.queue.put(PlayerMessage::Seek(SeekRequest {
                    time_ms: marker,
                    backward: !forward,
                    flush: true,
                    accurate: false,
                    restore: false,
                    trickplay: false,
                }));
                true
            }
            None => false,
        }
    }

    /// 清空或排队复位所有管线，所有游标回到未初始化
    ///
    /// `queued` 为真时只发 Reset 让管线按顺序处理；否则立即清空，
    /// 正常或暂停速度下再用屏障等音视频管线排空，然后重新进入缓冲。
    pub(super) fn flush_buffers(&mut self, queued: bool, pts: Option<f64>, accurate: bool) {
        let startpts = if accurate { pts.map(|p| p - self.offset_pts) } else { None };
        debug!("{} 清空缓冲 queued={} startpts={:?}", log_ctx(), queued, startpts);

        for cursor in [&mut self.current_audio, &mut self.current_video, &mut self.current_subtitle] {
            cursor.inited = false;
            cursor.dts = None;
            cursor.startpts = startpts;
        }

        if queued {
            self.audio.send(PipelineMessage::Reset);
            self.video.send(PipelineMessage::Reset);
            self.video.send(PipelineMessage::NoSkip);
            self.subtitle.send(PipelineMessage::Reset);
            self.synchronize_players();
            return;
        }

        self.video.flush();
        self.audio.flush();
        self.subtitle.flush();

        if self.play_speed == PLAYSPEED_NORMAL || self.play_speed == PLAYSPEED_PAUSE {
            let barrier = SyncBarrier::new(2);
            self.video.send(PipelineMessage::Synchronize(barrier.clone()));
            self.audio.send(PipelineMessage::Synchronize(barrier.clone()));
            if !barrier.wait(FLUSH_SYNC_TIMEOUT, &self.abort) {
                warn!("{} ⚠️ 等待管线排空超时", log_ctx());
            }

            // 清空前的开始回报已经没有意义
            self.queue.flush(MessageKind::PlayerStarted);
            self.set_caching(CachingState::Flush);
            self.current_audio.started = false;
            self.current_video.started = false;
            self.current_subtitle.started = false;
        }

        if let Some(pts) = pts {
            self.clock.discontinuity(pts);
        }
        self.update_play_state(0.0);
    }

    // ==================== 缓冲与倍速 ====================

    /// 切换缓冲状态；进入 Full/Init/Pvr 时暂停时钟和管线，回到播放时恢复速度
    pub(super) fn set_caching(&mut self, state: CachingState) {
        let state = match state {
            CachingState::Flush => resolve_flush(self.caching_times().is_some()),
            other => other,
        };
        if self.caching == state {
            return;
        }

        info!("{} ⏳ 缓冲状态 {} -> {}", log_ctx(), self.caching.as_str(), state.as_str());
        if state.holds_playback() {
            self.clock.set_speed(PLAYSPEED_PAUSE);
            self.audio.set_speed(PLAYSPEED_PAUSE);
            self.audio.send(PipelineMessage::PlayerStarted);
            self.video.set_speed(PLAYSPEED_PAUSE);
            self.video.send(PipelineMessage::PlayerStarted);
        }

        if state == CachingState::Play || (state == CachingState::Done && self.caching != CachingState::Play) {
            self.clock.set_speed(self.play_speed);
            self.audio.set_speed(self.play_speed);
            self.video.set_speed(self.play_speed);
        }

        self.caching = state;
        self.shared.set_caching(state);
    }

    fn pipeline_status(&self, kind: StreamType) -> PipelineStatus {
        let cursor = self.cursor(kind);
        let pipeline = self.pipeline(kind);
        PipelineStatus {
            open: cursor.is_open(),
            started: cursor.started,
            accepts_data: pipeline.accepts_data(),
            stalled: pipeline.is_stalled(),
            level: pipeline.level(),
            present: self.demuxer.as_ref().map(|d| d.count_of(kind) > 0).unwrap_or(false),
        }
    }

    /// 每轮评估缓冲状态机，倍速播放时检查视频是否跟上时钟
    pub(super) fn handle_play_speed(&mut self) {
        let in_menu = self.is_in_menu();
        let inputs = CachingInputs {
            in_menu,
            times: self.caching_times(),
            audio: self.pipeline_status(StreamType::Audio),
            video: self.pipeline_status(StreamType::Video),
            pvr_min_audio_level: self.settings.pvr_min_audio_cache_level,
            pvr_min_video_level: self.settings.pvr_min_video_cache_level,
        };
        let decision = evaluate(self.caching, &inputs);

        // 直播缓冲没攒够：已经自己开始的管线先停下
        if decision.pause_started {
            if self.current_audio.started {
                self.audio.set_speed(PLAYSPEED_PAUSE);
            }
            if self.current_video.started {
                self.video.set_speed(PLAYSPEED_PAUSE);
            }
        }
        if decision.next != self.caching {
            self.set_caching(decision.next);
        }

        if self.play_speed == PLAYSPEED_NORMAL || self.play_speed == PLAYSPEED_PAUSE {
            return;
        }
        if in_menu {
            info!("{} 菜单中不能倍速，恢复正常速度", log_ctx());
            self.apply_speed(PLAYSPEED_NORMAL);
            return;
        }
        self.check_trickplay_drift();
    }

    // 倍速时视频落后时钟超过 1 秒就往前 seek 一段，而不是一帧帧解过去
    fn check_trickplay_drift(&mut self) {
        if !self.current_video.is_open() || !self.current_video.inited {
            return;
        }
        let Some(pts) = self.video.current_pts() else {
            return;
        };
        let now = self.get_time();
        if self.speed_probe.last_pts == Some(pts) || self.speed_probe.last_time == Some(now) {
            return;
        }
        self.speed_probe.last_pts = Some(pts);
        self.speed_probe.last_time = Some(now);

        let direction = self.play_speed.signum() as f64;
        let error = (self.clock.clock() - pts) * direction;
        if error > msec_to_time(1000.0) {
            let lookahead = 500_000.0 * self.play_speed as f64 / PLAYSPEED_NORMAL as f64;
            let time = time_to_msec(self.clock.clock() + self.state.time_offset + lookahead) as i64;
            debug!("{} 倍速追赶: 视频落后 {:.0} ms，seek 到 {} ms", log_ctx(), time_to_msec(error), time);
            self.queue.put(PlayerMessage::Seek(SeekRequest {
                time_ms: time,
                backward: self.play_speed < 0,
                flush: true,
                accurate: false,
                restore: false,
                trickplay: true,
            }));
        }
    }

    /// 应用新的播放速度
    fn apply_speed(&mut self, speed: i32) {
        // 先按旧速度把快照时间结算到现在
        let absolute = self.clock.absolute();
        if let Some(timestamp) = self.state.timestamp {
            let limit = msec_to_time(1000.0);
            let offset = ((absolute - timestamp) * self.play_speed as f64 / PLAYSPEED_NORMAL as f64).clamp(-limit, limit);
            self.state.time += time_to_msec(offset);
            self.state.timestamp = Some(absolute);
        }

        if speed != PLAYSPEED_PAUSE && self.play_speed != PLAYSPEED_PAUSE && speed != self.play_speed {
            self.callback.on_playback_speed_changed(speed / PLAYSPEED_NORMAL);
        }

        if speed != self.play_speed {
            if let Some(input) = self.input.as_mut().filter(|i| i.is_live()) {
                if let Some(channel) = input.channel() {
                    channel.pause(speed == PLAYSPEED_PAUSE);
                }
            }
        }

        info!("{} 🎚️ 播放速度 {} -> {}", log_ctx(), self.play_speed, speed);
        self.play_speed = speed;
        self.caching = CachingState::Done;
        self.clock.set_speed(speed);
        self.audio.set_speed(speed);
        self.video.set_speed(speed);
        if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.set_speed(speed);
        }
        self.shared.set_play_speed(speed);
        self.shared.set_caching(CachingState::Done);
    }

    // ==================== 换流 ====================

    fn handle_set_stream(&mut self, kind: StreamType, index: i32) {
        let st = self.streams.get(kind, index).clone();
        if st.source.is_none() {
            warn!("{} ⚠️ 没有序号为 {} 的{}流", log_ctx(), index, kind.as_str());
            return;
        }
        info!("{} 🔀 切换{}流到 {} ({})", log_ctx(), kind.as_str(), index, st.name);

        if st.source.kind == SourceKind::Nav {
            let switched = match self.input.as_mut().and_then(|i| i.navigator()) {
                Some(nav) if kind == StreamType::Audio => nav.set_active_audio_stream(st.id),
                Some(nav) => nav.set_active_subtitle_stream(st.id),
                None => false,
            };
            if !switched {
                return;
            }
            if kind == StreamType::Audio {
                self.nav.selected_audio = -1;
                self.close_stream(StreamType::Audio, false);
                self.queue.put(PlayerMessage::Seek(SeekRequest::new(self.get_time())));
            } else {
                self.nav.selected_subtitle = -1;
                self.close_subtitle_stream(false);
            }
            return;
        }

        if kind == StreamType::Audio {
            self.close_stream(StreamType::Audio, false);
        } else {
            self.close_subtitle_stream(false);
        }
        if let Err(e) = self.open_stream(kind, st.id, st.source) {
            self.escalate(e);
        }
        if kind == StreamType::Audio {
            self.queue.put(PlayerMessage::Seek(SeekRequest::new(self.get_time())));
        }
    }

    // ==================== 频道 ====================

    fn channel_failed(&mut self) {
        warn!("{} ⚠️ 切换频道失败，停止播放", log_ctx());
        self.abort.store(true, Ordering::SeqCst);
    }

    fn select_channel(&mut self, number: i32) {
        if self.input.as_ref().and_then(|i| i.channel_ref()).is_none() {
            return;
        }
        self.flush_buffers(false, None, false);
        let switched = self
            .input
            .as_mut()
            .and_then(|i| i.channel())
            .map(|c| c.select_channel(number))
            .unwrap_or(false);
        if switched {
            info!("{} 📡 切换到频道 {}", log_ctx(), number);
            self.demuxer = None;
        } else {
            self.channel_failed();
        }
    }

    fn step_channel(&mut self, next: bool) {
        if self.input.as_ref().and_then(|i| i.channel_ref()).is_none() {
            return;
        }
        let timeout = self.settings.channel_entry_timeout_ms;
        let preview = timeout > 0;
        if !preview {
            self.flush_buffers(false, None, false);
        }

        let switched = match self.input.as_mut().and_then(|i| i.channel()) {
            Some(channel) if next => channel.next_channel(preview),
            Some(channel) => channel.prev_channel(preview),
            None => false,
        };
        if !switched {
            self.channel_failed();
            return;
        }

        if preview {
            // 预览期间不换流，到期后再真正切过去
            self.channel_entry_deadline = Some(self.now_ms() + timeout);
            info!("{} 📡 频道预览，{} ms 后切换", log_ctx(), timeout);
        } else {
            self.channel_entry_deadline = None;
            self.demuxer = None;
        }
    }

    /// 频道预览到期时切到当前频道
    pub(super) fn check_delayed_channel_entry(&mut self) -> bool {
        let Some(deadline) = self.channel_entry_deadline else {
            return false;
        };
        if self.now_ms() < deadline {
            return false;
        }
        self.channel_entry_deadline = None;
        if let Some(channel) = self.input.as_ref().and_then(|i| i.channel_ref()) {
            self.queue.put(PlayerMessage::ChannelSelectNumber(channel.current_channel()));
        }
        true
    }

    // ==================== 菜单与遥控器 ====================

    /// 处理遥控器动作，返回是否被消费
    pub(super) fn on_action(&mut self, action: Action) -> bool {
        let has_menus = self.input.as_ref().and_then(|i| i.menus_ref()).is_some();
        if has_menus {
            let in_still = self.nav.mode == NavMode::Still && self.nav.still_time_ms != 0;
            let buttons = self
                .input
                .as_ref()
                .and_then(|i| i.menus_ref())
                .map(|m| m.total_buttons())
                .unwrap_or(0);
            if in_still
                && buttons == 0
                && matches!(action, Action::NextItem | Action::MoveRight | Action::MoveUp | Action::SelectItem)
            {
                debug!("{} 用户要求结束静帧", log_ctx());
                self.nav.still_start_ms = 0;
                self.nav.still_time_ms = 1;
                return true;
            }

            let Some(menus) = self.input.as_mut().and_then(|i| i.menus()) else {
                return false;
            };
            if action == Action::ShowVideoMenu {
                info!("{} 📋 打开菜单", log_ctx());
                menus.on_menu();
                return true;
            }
            if menus.is_in_menu() {
                debug!("{} 菜单动作 {:?}", log_ctx(), action);
                match action {
                    Action::NextItem => menus.on_next(),
                    Action::PrevItem => menus.on_previous(),
                    Action::PreviousMenu | Action::NavBack => {
                        menus.on_back();
                    }
                    Action::MoveLeft => menus.on_left(),
                    Action::MoveRight => menus.on_right(),
                    Action::MoveUp => menus.on_up(),
                    Action::MoveDown => menus.on_down(),
                    Action::SelectItem => menus.activate_button(),
                    Action::Number(button) => menus.select_button(button),
                    _ => return false,
                }
                return true;
            }
        }

        if self.input.as_ref().and_then(|i| i.channel_ref()).is_some() {
            match action {
                Action::MoveUp | Action::NextItem => {
                    self.queue.put(PlayerMessage::ChannelNext);
                    return true;
                }
                Action::MoveDown | Action::PrevItem => {
                    self.queue.put(PlayerMessage::ChannelPrev);
                    return true;
                }
                Action::ChannelSwitch(number) => {
                    self.queue.put(PlayerMessage::ChannelSelectNumber(number));
                    return true;
                }
                _ => {}
            }
        }

        let chapter = self.state.chapter;
        if self.state.chapter_count > 0 {
            match action {
                Action::NextItem => {
                    self.queue.put(PlayerMessage::SeekChapter(chapter + 1));
                    return true;
                }
                Action::PrevItem => {
                    self.queue.put(PlayerMessage::SeekChapter(chapter - 1));
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    // ==================== 导航器事件 ====================

    /// 取出导航器积压的事件并处理
    pub(super) fn poll_navigator(&mut self) {
        while let Some(event) = self.input.as_mut().and_then(|i| i.menus()).and_then(|m| m.poll_event()) {
            self.handle_nav_event(event);
        }
    }

    fn handle_nav_event(&mut self, event: NavEvent) {
        match event {
            NavEvent::StillFrame(length) => {
                if self.nav.mode == NavMode::Still {
                    return;
                }
                self.nav.still_time_ms = if length < 0xff { length as i64 * 1000 } else { 0 };
                self.nav.still_start_ms = self.now_ms();
                if self.nav.still_time_ms > 0 {
                    // 还在输出队列里的画面也算静帧时间
                    let delay = time_to_msec(self.video.output_delay());
                    if delay > 0.0 && delay < 10_000.0 {
                        self.nav.still_time_ms += delay as i64;
                    }
                }
                self.nav.mode = NavMode::Still;
                info!("{} 🖼️ 静帧 {} ms (0 为无限)", log_ctx(), self.nav.still_time_ms);
            }
            NavEvent::SubtitleStreamChange(stream) => {
                let visible = stream & 0x80 == 0;
                self.subtitle_visible = visible;
                self.video.send(PipelineMessage::SubtitleVisible(visible));
                self.nav.selected_subtitle = if stream >= 0 { stream & !0x80 } else { -1 };
                self.current_subtitle.token = None;
                debug!("{} 导航器字幕流 -> {}", log_ctx(), self.nav.selected_subtitle);
            }
            NavEvent::AudioStreamChange(physical) => {
                self.nav.selected_audio = if physical >= 0 { physical } else { -1 };
                self.current_audio.token = None;
                debug!("{} 导航器音频流 -> {}", log_ctx(), self.nav.selected_audio);
            }
            NavEvent::CellChange => {
                self.nav.mode = NavMode::Normal;
                if self.current_video.inited {
                    self.video.send(PipelineMessage::NoSkip);
                }
            }
            NavEvent::HopChannel => {
                if self.nav.mode == NavMode::Seek {
                    self.nav.mode = NavMode::Normal;
                } else {
                    self.queue.put(PlayerMessage::Flush);
                }
            }
            NavEvent::TitleChange => {
                info!("{} 📀 标题切换，刷新流表", log_ctx());
                self.streams.clear(StreamType::None, SourceKind::Nav);
                self.streams.update_from(self.input.as_deref(), self.demuxer.as_deref_mut());
            }
            NavEvent::Stop => {
                self.nav.mode = NavMode::Normal;
            }
        }
    }
}
