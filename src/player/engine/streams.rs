use super::{log_ctx, Engine};
use crate::core::{
    sec_to_time, time_to_msec, PlayerError, Result, SourceKind, StreamFlags, StreamHint, StreamSource, StreamType,
    PLAYSPEED_NORMAL,
};
use crate::player::caching::CachingState;
use crate::player::demuxer_source::DemuxStream;
use crate::player::input::NextStream;
use crate::player::messages::SyncBarrier;
use crate::player::pipeline::PipelineMessage;
use crate::player::selection::{audio_priority, subtitle_priority, video_priority, SelectionStream};
use log::{debug, error, info, warn};
use std::path::Path;

/// 创建 demuxer 的最多尝试次数
const DEMUXER_OPEN_ATTEMPTS: u32 = 10;

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

fn with_extension(filename: &str, ext: &str) -> String {
    Path::new(filename).with_extension(ext).to_string_lossy().into_owned()
}

impl Engine {
    // ==================== 输入和 demuxer ====================

    /// 创建并打开输入源，登记外挂字幕
    pub(super) fn open_input_stream(&mut self) -> Result<()> {
        self.input = None;
        info!("{} 📂 创建输入源: {}", log_ctx(), self.item.path);

        let mut input = self.factory.create_input(&self.item)?;
        input.open().map_err(|e| {
            error!("{} ❌ 无法打开输入源 {}: {}", log_ctx(), self.item.path, e);
            e
        })?;

        // 光盘和直播源没有外挂字幕
        let scan_subtitles = input.navigator_ref().is_none() && !input.is_live();
        self.input = Some(input);

        if scan_subtitles {
            // `.sub` 有同名 `.idx` 时由 add_subtitle_file 跳过
            for file in self.item.subtitles.clone() {
                self.add_subtitle_file(&file, "", StreamFlags::default());
            }
        }

        self.video.set_delay(sec_to_time(self.av_delay as f64));
        self.subtitle
            .set_subtitle_delay(sec_to_time(self.subtitle_delay as f64));
        self.nav = Default::default();
        self.channel_entry_deadline = None;
        Ok(())
    }

    /// 登记一个外挂字幕文件，返回它在字幕流中的序号，失败返回 -1
    ///
    /// `.idx` 通过字幕 demuxer 打开；有同名 `.idx` 的 `.sub` 跳过；其余按文本字幕处理。
    pub(super) fn add_subtitle_file(&mut self, filename: &str, filename2: &str, flags: StreamFlags) -> i32 {
        let ext = extension_of(filename);
        if ext == ".idx" {
            let vobsub = if filename2.is_empty() {
                with_extension(filename, "sub")
            } else {
                filename2.to_string()
            };
            let mut demuxer = match self.factory.create_subtitle_demuxer(filename, &vobsub) {
                Ok(demuxer) => demuxer,
                Err(e) => {
                    warn!("{} ⚠️ 无法打开字幕文件 {}: {}", log_ctx(), filename, e);
                    return -1;
                }
            };
            self.streams.update_from(None, Some(demuxer.as_mut()));

            let first_id = demuxer
                .stream_ids()
                .into_iter()
                .filter(|id| demuxer.stream(*id).map(|s| s.kind() == StreamType::Subtitle).unwrap_or(false))
                .min()
                .unwrap_or(0);
            let source = self.streams.source(SourceKind::DemuxSub, filename);
            let index = self.streams.index_of(StreamType::Subtitle, source, first_id);
            if let Some(entry) = self.streams.get_mut(StreamType::Subtitle, index) {
                entry.flags = flags;
                entry.filename2 = vobsub;
            }
            info!("{} 💬 已登记字幕文件 {} (序号 {})", log_ctx(), filename, index);
            return index;
        }

        if ext == ".sub" {
            let idx = with_extension(filename, "idx");
            if self.item.subtitles.iter().any(|f| *f == idx) || Path::new(&idx).exists() {
                return -1;
            }
        }

        let source = self.streams.source(SourceKind::Text, filename);
        let name = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        self.streams.update(SelectionStream {
            stream_type: StreamType::Subtitle,
            source,
            id: 0,
            filename: filename.to_string(),
            name,
            flags,
            ..Default::default()
        });
        let index = self.streams.index_of(StreamType::Subtitle, source, 0);
        info!("{} 💬 已登记文本字幕 {} (序号 {})", log_ctx(), filename, index);
        index
    }

    /// 在当前输入上创建主 demuxer 并重建注册表
    pub(super) fn open_demux_stream(&mut self) -> Result<()> {
        self.demuxer = None;
        info!("{} 🎞️ 创建 demuxer", log_ctx());

        let mut last_error = None;
        let mut attempts = DEMUXER_OPEN_ATTEMPTS;
        while !self.aborted() && attempts > 0 {
            attempts -= 1;
            let Some(input) = self.input.as_mut() else {
                return Err(PlayerError::OpenError(self.item.path.clone()));
            };
            match self.factory.create_demuxer(input.as_mut()) {
                Ok(demuxer) => {
                    self.demuxer = Some(demuxer);
                    break;
                }
                Err(e) => {
                    if input.is_live() {
                        debug!("{} 直播源还没有数据，重试创建 demuxer", log_ctx());
                        last_error = Some(e);
                        continue;
                    }
                    if input.next_stream() != NextStream::None {
                        debug!("{} 输入有新片段，重试创建 demuxer", log_ctx());
                        last_error = Some(e);
                        continue;
                    }
                    last_error = Some(e);
                    break;
                }
            }
        }

        if self.demuxer.is_none() {
            let err = last_error.unwrap_or_else(|| PlayerError::DemuxerError(self.item.path.clone()));
            error!("{} ❌ 创建 demuxer 失败: {}", log_ctx(), err);
            return Err(err);
        }

        self.generation += 1;
        self.streams.clear(StreamType::None, SourceKind::Demux);
        self.streams.clear(StreamType::None, SourceKind::Nav);
        self.streams.update_from(self.input.as_deref(), self.demuxer.as_deref_mut());
        Ok(())
    }

    // ==================== 默认流 ====================

    /// 按优先级依次尝试打开视频、音频、字幕，导航源由导航器决定
    pub(super) fn open_default_streams(&mut self) {
        if self.has_navigator() {
            return;
        }

        // ========== 视频 ==========
        let candidates = self.streams.by_priority(StreamType::Video, video_priority());
        if !self.open_first_of(StreamType::Video, &candidates) {
            self.close_stream(StreamType::Video, true);
        }

        // ========== 音频 ==========
        let candidates = if self.options.video_only {
            Vec::new()
        } else {
            self.streams.by_priority(StreamType::Audio, audio_priority(&self.settings))
        };
        if !self.open_first_of(StreamType::Audio, &candidates) {
            self.close_stream(StreamType::Audio, true);
        }

        // ========== 字幕 ==========
        self.subtitle_visible = self.settings.subtitle_on;
        self.video
            .send(PipelineMessage::SubtitleVisible(self.subtitle_visible));

        let candidates = self
            .streams
            .by_priority(StreamType::Subtitle, subtitle_priority(&self.settings));
        let mut valid = false;
        for st in &candidates {
            match self.open_stream(StreamType::Subtitle, st.id, st.source) {
                Ok(()) => {
                    valid = true;
                    // 字幕关闭时选中了强制字幕，仍然要显示
                    if st.flags.forced && !self.subtitle_visible {
                        self.subtitle_visible = true;
                        self.video.send(PipelineMessage::SubtitleVisible(true));
                    }
                    break;
                }
                Err(e) => self.escalate(e),
            }
        }
        if !valid {
            self.close_subtitle_stream(true);
        }
    }

    fn open_first_of(&mut self, kind: StreamType, candidates: &[SelectionStream]) -> bool {
        for st in candidates {
            match self.open_stream(kind, st.id, st.source) {
                Ok(()) => return true,
                Err(e) => self.escalate(e),
            }
        }
        false
    }

    // ==================== 打开 / 关闭 ====================

    pub(super) fn open_stream(&mut self, kind: StreamType, id: i32, source: StreamSource) -> Result<()> {
        match kind {
            StreamType::Audio => self.open_audio_stream(id, source),
            StreamType::Video => self.open_video_stream(id, source),
            StreamType::Subtitle => self.open_subtitle_stream(id, source),
            _ => Err(PlayerError::StreamNotFound(id)),
        }
    }

    // 主 demuxer 中可用（未禁用）的流
    fn usable_stream(&self, id: i32) -> Result<&DemuxStream> {
        self.demuxer
            .as_ref()
            .and_then(|d| d.stream(id))
            .filter(|s| !s.disabled)
            .ok_or(PlayerError::StreamNotFound(id))
    }

    /// 管线拒绝后永久禁用这个流
    fn disable_stream(&mut self, from_subtitle_demuxer: bool, id: i32) {
        let demuxer = if from_subtitle_demuxer {
            self.subtitle_demuxer.as_mut()
        } else {
            self.demuxer.as_mut()
        };
        if let Some(stream) = demuxer.and_then(|d| d.stream_mut(id)) {
            stream.disabled = true;
            stream.discard = true;
        }
    }

    /// 打开音视频管线，格式未变时只发 Reset
    fn open_av_stream(&mut self, kind: StreamType, id: i32, source: StreamSource) -> Result<()> {
        info!("{} 🔓 打开{}流: id={} source={:?}", log_ctx(), kind.as_str(), id, source);

        let stream = self.usable_stream(id)?;
        let hint = stream.hint();
        let changes = stream.changes;

        let cursor = self.cursor(kind);
        if !cursor.is_open() || cursor.hint != hint {
            if !self.pipeline_mut(kind).open_stream(&hint) {
                warn!("{} ⚠️ 不支持的{}流 {}，已禁用", log_ctx(), kind.as_str(), id);
                self.disable_stream(false, id);
                return Err(PlayerError::StreamOpen {
                    kind,
                    id,
                    reason: format!("管线拒绝编码 {}", hint.codec),
                });
            }
            if !self.caching.holds_playback() {
                self.pipeline_mut(kind).set_speed(PLAYSPEED_NORMAL);
            }
        } else {
            self.pipeline_mut(kind).send(PipelineMessage::Reset);
        }

        let token = self.token_for(false, id);
        let cursor = self.cursor_mut(kind);
        cursor.id = id;
        cursor.source = source;
        cursor.hint = hint;
        cursor.token = Some(token);
        cursor.changes = changes;
        cursor.started = false;

        // 等管线开始输出后回报
        self.pipeline_mut(kind).send(PipelineMessage::PlayerStarted);
        Ok(())
    }

    fn open_audio_stream(&mut self, id: i32, source: StreamSource) -> Result<()> {
        self.usable_stream(id)?;
        // 之前只有视频：新的音频和队列里的视频没有关系，先让两边对齐
        if !self.current_audio.is_open() && self.current_video.is_open() {
            self.synchronize_players();
        }
        self.open_av_stream(StreamType::Audio, id, source)
    }

    fn open_video_stream(&mut self, id: i32, source: StreamSource) -> Result<()> {
        self.usable_stream(id)?;
        if let Some(stream) = self.demuxer.as_mut().and_then(|d| d.stream_mut(id)) {
            stream.discard = false;
        }
        self.open_av_stream(StreamType::Video, id, source)
    }

    fn open_subtitle_stream(&mut self, id: i32, source: StreamSource) -> Result<()> {
        info!("{} 🔓 打开字幕流: id={} source={:?}", log_ctx(), id, source);

        let (hint, from_subtitle_demuxer) = match source.kind {
            SourceKind::DemuxSub => (self.prepare_subtitle_demuxer(id, source)?, true),
            SourceKind::Text => {
                let index = self.streams.index_of(StreamType::Subtitle, source, id);
                if index < 0 {
                    return Err(PlayerError::StreamNotFound(id));
                }
                let filename = self.streams.get(StreamType::Subtitle, index).filename.clone();
                let hint = StreamHint {
                    stream_type: Some(StreamType::Subtitle),
                    fps_rate: self.current_video.hint.fps_rate,
                    fps_scale: self.current_video.hint.fps_scale,
                    filename: Some(filename),
                    ..Default::default()
                };
                (hint, false)
            }
            _ => {
                let hint = self.usable_stream(id)?.hint();
                if let Some(stream) = self.demuxer.as_mut().and_then(|d| d.stream_mut(id)) {
                    stream.discard = false;
                }
                (hint, false)
            }
        };

        if !self.current_subtitle.is_open() || self.current_subtitle.hint != hint {
            if self.current_subtitle.is_open() {
                debug!("{} 字幕格式变化，先关闭旧的字幕流", log_ctx());
                self.close_subtitle_stream(false);
            }
            if !self.subtitle.open_stream(&hint) {
                warn!("{} ⚠️ 不支持的字幕流 {}，已禁用", log_ctx(), id);
                if source.kind != SourceKind::Text {
                    self.disable_stream(from_subtitle_demuxer, id);
                }
                return Err(PlayerError::StreamOpen {
                    kind: StreamType::Subtitle,
                    id,
                    reason: format!("管线拒绝编码 {}", hint.codec),
                });
            }
        } else {
            self.subtitle.send(PipelineMessage::Reset);
        }

        // 文本字幕由管线自己读文件，不会有包
        let token = (source.kind != SourceKind::Text).then(|| self.token_for(from_subtitle_demuxer, id));
        let cursor = &mut self.current_subtitle;
        cursor.id = id;
        cursor.source = source;
        cursor.hint = hint;
        cursor.token = token;
        cursor.started = false;
        Ok(())
    }

    /// 需要时换掉字幕 demuxer，并 seek 到当前播放位置
    fn prepare_subtitle_demuxer(&mut self, id: i32, source: StreamSource) -> Result<StreamHint> {
        let index = self.streams.index_of(StreamType::Subtitle, source, id);
        if index < 0 {
            return Err(PlayerError::StreamNotFound(id));
        }
        let st = self.streams.get(StreamType::Subtitle, index).clone();

        let current = self.subtitle_demuxer.as_ref().map(|d| d.file_name());
        if current.as_deref() != Some(st.filename.as_str()) {
            info!("{} 💬 打开字幕文件: {}", log_ctx(), st.filename);
            let mut demuxer = self
                .factory
                .create_subtitle_demuxer(&st.filename, &st.filename2)
                .map_err(|e| PlayerError::StreamOpen {
                    kind: StreamType::Subtitle,
                    id,
                    reason: e.to_string(),
                })?;
            for sid in demuxer.stream_ids() {
                if let Some(stream) = demuxer.stream_mut(sid) {
                    stream.source = source;
                }
            }
            self.subtitle_generation += 1;
            self.subtitle_demuxer = Some(demuxer);
        }

        let pts = self
            .video
            .current_pts()
            .or(self.current_video.dts)
            .unwrap_or(0.0)
            + self.offset_pts;

        let Some(demuxer) = self.subtitle_demuxer.as_mut() else {
            return Err(PlayerError::StreamNotFound(id));
        };
        let hint = match demuxer.stream_mut(id).filter(|s| !s.disabled) {
            Some(stream) => {
                stream.discard = false;
                stream.hint()
            }
            None => return Err(PlayerError::StreamNotFound(id)),
        };
        if let Err(e) = demuxer.seek_time(time_to_msec(pts) as i64, true) {
            debug!("{} 字幕 demuxer seek 失败: {}", log_ctx(), e);
        }
        Ok(hint)
    }

    /// 关闭音视频流，`wait` 时先结束缓冲并等管线播完
    pub(super) fn close_stream(&mut self, kind: StreamType, wait: bool) -> bool {
        if kind == StreamType::Subtitle {
            return self.close_subtitle_stream(!wait);
        }
        if !self.cursor(kind).is_open() {
            return false;
        }
        info!("{} 🔒 关闭{}流", log_ctx(), kind.as_str());
        if wait {
            self.set_caching(CachingState::Done);
        }
        self.pipeline_mut(kind).close_stream(wait);
        self.cursor_mut(kind).clear();
        true
    }

    pub(super) fn close_subtitle_stream(&mut self, keep_overlays: bool) -> bool {
        if !self.current_subtitle.is_open() {
            return false;
        }
        info!("{} 🔒 关闭字幕流", log_ctx());
        self.subtitle.close_stream(!keep_overlays);
        self.current_subtitle.clear();
        true
    }

    /// 游标指向的流已经不存在或被禁用，且管线已经饿死时关闭
    pub(super) fn close_invalid_streams(&mut self) {
        for kind in [StreamType::Audio, StreamType::Video, StreamType::Subtitle] {
            if !self.is_valid_stream(kind) && self.pipeline(kind).is_stalled() {
                warn!("{} ⚠️ {}流已失效，关闭", log_ctx(), kind.as_str());
                self.close_stream(kind, true);
            }
        }
    }

    pub(super) fn is_valid_stream(&self, kind: StreamType) -> bool {
        let cursor = self.cursor(kind);
        if !cursor.is_open() {
            return true;
        }

        let demuxer = match cursor.source.kind {
            SourceKind::Text => return true,
            SourceKind::DemuxSub => self.subtitle_demuxer.as_ref(),
            SourceKind::Demux => self.demuxer.as_ref(),
            _ => return false,
        };
        let Some(stream) = demuxer.and_then(|d| d.stream(cursor.id)) else {
            return false;
        };
        if stream.disabled || stream.kind() != kind {
            return false;
        }

        // 导航源：必须是导航器选中的物理流
        if cursor.source.kind == SourceKind::Demux && self.has_navigator() {
            if kind == StreamType::Audio && stream.physical_id != self.nav.selected_audio {
                return false;
            }
            if kind == StreamType::Subtitle && stream.physical_id != self.nav.selected_subtitle {
                return false;
            }
        }
        true
    }

    /// 播放中出现的流是否应该替换当前的流
    pub(super) fn is_better_stream(&self, kind: StreamType, stream: &DemuxStream) -> bool {
        if self.options.video_only && kind != StreamType::Video {
            return false;
        }
        let cursor = self.cursor(kind);

        if self.has_navigator() {
            if !matches!(cursor.source.kind, SourceKind::Demux | SourceKind::None) {
                return false;
            }
            if stream.source.kind != SourceKind::Demux || stream.kind() != kind || stream.id == cursor.id {
                return false;
            }
            return match kind {
                StreamType::Audio => stream.physical_id == self.nav.selected_audio,
                StreamType::Subtitle => stream.physical_id == self.nav.selected_subtitle,
                StreamType::Video => !cursor.is_open(),
                _ => false,
            };
        }

        if stream.source == cursor.source && stream.id == cursor.id {
            return false;
        }
        if stream.disabled || stream.kind() != kind {
            return false;
        }
        // 字幕一旦选定不自动替换
        if kind == StreamType::Subtitle {
            return false;
        }
        !cursor.is_open()
    }

    /// 让打开的音视频管线在同一个屏障上对齐，不等待
    pub(super) fn synchronize_players(&mut self) {
        let targets: Vec<StreamType> = [StreamType::Audio, StreamType::Video]
            .into_iter()
            .filter(|k| self.cursor(*k).is_open())
            .collect();
        if targets.is_empty() {
            return;
        }
        let barrier = SyncBarrier::new(targets.len());
        for kind in targets {
            self.pipeline_mut(kind)
                .send(PipelineMessage::Synchronize(barrier.clone()));
        }
    }
}
