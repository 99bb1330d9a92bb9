use super::{log_ctx, Engine, NavMode, TickOutcome};
use crate::core::{DemuxPacket, SourceKind, StreamType, PLAYSPEED_PAUSE, STREAM_CHANGE_ID};
use crate::player::caching::CachingState;
use crate::player::demuxer_source::DemuxStream;
use crate::player::input::NextStream;
use crate::player::pipeline::PipelineMessage;
use log::{debug, error, info};
use std::time::Duration;

/// 字幕 demuxer 连续读包的上限，到了就让主 demuxer 读一次
const SUBTITLE_READ_STREAK: u32 = 8;

pub(super) enum ReadOutcome {
    /// 两个 demuxer 都没有数据
    Empty,
    /// 读到了包，但这一轮不需要分发
    Skipped,
    Packet {
        packet: DemuxPacket,
        stream: DemuxStream,
        from_subtitle_demuxer: bool,
    },
}

impl Engine {
    /// 读一个包：字幕管线能收时字幕 demuxer 优先
    pub(super) fn read_packet(&mut self) -> ReadOutcome {
        if self.subtitle_demuxer.is_some() && self.subtitle.accepts_data() {
            if self.subtitle_streak < SUBTITLE_READ_STREAK {
                if let Some(outcome) = self.read_subtitle_packet() {
                    self.subtitle_streak += 1;
                    return outcome;
                }
            } else {
                debug!("{} 字幕 demuxer 已连续读 {} 个包，轮到主 demuxer", log_ctx(), self.subtitle_streak);
            }
        }
        self.subtitle_streak = 0;
        self.read_primary_packet()
    }

    fn read_subtitle_packet(&mut self) -> Option<ReadOutcome> {
        let mut packet = self.subtitle_demuxer.as_mut()?.read()?;
        packet.apply_correction(self.offset_pts);

        // 保活包
        if packet.stream_id < 0 {
            return Some(ReadOutcome::Skipped);
        }

        let demuxer = self.subtitle_demuxer.as_ref()?;
        let Some(stream) = demuxer.stream(packet.stream_id) else {
            error!("{} ❌ 字幕 demuxer 中找不到流 {}", log_ctx(), packet.stream_id);
            return Some(ReadOutcome::Skipped);
        };

        // 新打开的字幕 demuxer，注册表还没有它的流
        if stream.source.is_none() {
            self.streams.clear(StreamType::None, SourceKind::DemuxSub);
            self.streams.update_from(None, self.subtitle_demuxer.as_deref_mut());
        }

        let stream = self.subtitle_demuxer.as_ref()?.stream(packet.stream_id)?.clone();
        Some(ReadOutcome::Packet {
            packet,
            stream,
            from_subtitle_demuxer: true,
        })
    }

    fn read_primary_packet(&mut self) -> ReadOutcome {
        let Some(demuxer) = self.demuxer.as_mut() else {
            return ReadOutcome::Empty;
        };
        let Some(mut packet) = demuxer.read() else {
            return ReadOutcome::Empty;
        };

        if packet.stream_id == STREAM_CHANGE_ID {
            info!("{} 🔀 流表变化，重建注册表", log_ctx());
            self.streams.clear(StreamType::None, SourceKind::Demux);
            self.streams.update_from(self.input.as_deref(), self.demuxer.as_deref_mut());
            self.open_default_streams();
            return ReadOutcome::Skipped;
        }

        packet.apply_correction(self.offset_pts);
        if let Some(input) = self.input.as_ref() {
            packet.group_id = input.current_group_id();
        }

        if packet.stream_id < 0 {
            return ReadOutcome::Skipped;
        }

        let source_missing = match self.demuxer.as_ref().and_then(|d| d.stream(packet.stream_id)) {
            Some(stream) => stream.source.is_none(),
            None => {
                error!("{} ❌ demuxer 中找不到流 {}", log_ctx(), packet.stream_id);
                return ReadOutcome::Skipped;
            }
        };
        if source_missing {
            self.streams.clear(StreamType::None, SourceKind::Demux);
            self.streams.update_from(self.input.as_deref(), self.demuxer.as_deref_mut());
        }

        match self.demuxer.as_ref().and_then(|d| d.stream(packet.stream_id)) {
            Some(stream) => ReadOutcome::Packet {
                stream: stream.clone(),
                packet,
                from_subtitle_demuxer: false,
            },
            None => ReadOutcome::Skipped,
        }
    }

    /// 两个 demuxer 都读空时的处理
    ///
    /// 先看静帧和后续片段；真正到头时给初始化过的管线发 EOF，
    /// 然后等所有管线排空才结束会话，期间仍然可以 seek 回去。
    pub(super) fn handle_end_of_stream(&mut self) -> TickOutcome {
        if self.play_speed == PLAYSPEED_PAUSE {
            return TickOutcome::Idle(Duration::from_millis(10));
        }

        // 静帧到时，通知导航器跳过
        if self.nav.mode == NavMode::Still
            && self.nav.still_time_ms > 0
            && self.now_ms() - self.nav.still_start_ms >= self.nav.still_time_ms
        {
            self.nav.still_time_ms = 0;
            self.nav.still_start_ms = 0;
            self.nav.mode = NavMode::Normal;
            if let Some(menus) = self.input.as_mut().and_then(|i| i.menus()) {
                menus.skip_still();
            }
            return TickOutcome::Continue;
        }

        let next = self
            .input
            .as_mut()
            .map(|i| i.next_stream())
            .unwrap_or(NextStream::None);
        match next {
            NextStream::Open => {
                info!("{} 🔁 输入有新片段，重建 demuxer", log_ctx());
                self.demuxer = None;
                self.current_audio.token = None;
                self.current_video.token = None;
                self.current_subtitle.token = None;
                return TickOutcome::Continue;
            }
            NextStream::Retry => return TickOutcome::Idle(Duration::from_millis(100)),
            NextStream::None => {}
        }

        // ========== 真正的流末尾 ==========
        for kind in [StreamType::Audio, StreamType::Video, StreamType::Subtitle] {
            if self.cursor(kind).inited {
                self.pipeline_mut(kind).send(PipelineMessage::Eof);
            }
            let cursor = self.cursor_mut(kind);
            cursor.inited = false;
            cursor.started = false;
        }
        self.set_caching(CachingState::Done);

        // 管线里还有数据时不退出
        if self.video.has_data() || self.audio.has_data() {
            return TickOutcome::Idle(Duration::from_millis(100));
        }
        if self.has_video() && !self.video.is_eos() {
            return TickOutcome::Idle(Duration::from_millis(100));
        }
        if self.has_audio() && !self.audio.is_eos() {
            return TickOutcome::Idle(Duration::from_millis(100));
        }

        if !self.input.as_ref().map(|i| i.is_eof()).unwrap_or(true) {
            info!("{} 🏁 demuxer 读空，但输入尚未报告 EOF", log_ctx());
        }
        self.finish()
    }
}
