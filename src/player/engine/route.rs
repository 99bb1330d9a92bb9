use super::{log_ctx, Engine};
use crate::core::{
    msec_to_time, sec_to_time, time_to_msec, DemuxPacket, StreamType, PLAYSPEED_NORMAL, PLAYSPEED_PAUSE,
};
use crate::player::caching::CachingState;
use crate::player::current_stream::StreamToken;
use crate::player::demuxer_source::DemuxStream;
use crate::player::edl::CutAction;
use crate::player::messages::{PlayerMessage, SeekRequest};
use crate::player::pipeline::PipelineMessage;
use log::{debug, info, warn};

/// 视频"静帧结束"哨兵包的大小
const STILL_FRAME_EOF_SIZE: usize = 4;

impl Engine {
    pub(super) fn token_for(&self, from_subtitle_demuxer: bool, id: i32) -> StreamToken {
        StreamToken {
            generation: if from_subtitle_demuxer {
                self.subtitle_generation
            } else {
                self.generation
            },
            from_subtitle_demuxer,
            id,
        }
    }

    /// 按游标把包交给对应的管线，没有游标认领的流标记为丢弃
    ///
    /// 被禁用的流视同没有游标。
    pub(super) fn process_packet(&mut self, stream: &DemuxStream, from_subtitle_demuxer: bool, packet: DemuxPacket) {
        let id = packet.stream_id;
        let kind = stream.kind();
        let disabled = stream.disabled || self.is_stream_disabled(from_subtitle_demuxer, id);
        let target = [StreamType::Audio, StreamType::Video, StreamType::Subtitle]
            .into_iter()
            .find(|k| !disabled && *k == kind && self.cursor(*k).matches(id, stream.source));

        match target {
            Some(kind) => self.process_stream_data(kind, stream, from_subtitle_demuxer, packet),
            None => {
                let demuxer = if from_subtitle_demuxer {
                    self.subtitle_demuxer.as_mut()
                } else {
                    self.demuxer.as_mut()
                };
                if let Some(s) = demuxer.and_then(|d| d.stream_mut(id)) {
                    s.discard = true;
                }
            }
        }
    }

    fn is_stream_disabled(&self, from_subtitle_demuxer: bool, id: i32) -> bool {
        let demuxer = if from_subtitle_demuxer {
            self.subtitle_demuxer.as_ref()
        } else {
            self.demuxer.as_ref()
        };
        demuxer.and_then(|d| d.stream(id)).map(|s| s.disabled).unwrap_or(false)
    }

    fn process_stream_data(
        &mut self,
        kind: StreamType,
        stream: &DemuxStream,
        from_subtitle_demuxer: bool,
        mut packet: DemuxPacket,
    ) {
        let token = self.token_for(from_subtitle_demuxer, stream.id);
        let cursor = self.cursor(kind);
        if cursor.token != Some(token) || cursor.changes != stream.changes {
            // 流对象或格式变了，提示不同时重新打开
            if cursor.hint != stream.hint() {
                if let Err(e) = self.open_stream(kind, packet.stream_id, stream.source) {
                    self.escalate(e);
                    // 新格式打不开，旧游标作废，包不再下发
                    self.close_stream(kind, false);
                    return;
                }
            }
            let cursor = self.cursor_mut(kind);
            cursor.token = Some(token);
            cursor.changes = stream.changes;
        }

        if kind != StreamType::Subtitle {
            self.check_start_caching(kind);
        }

        let still_eof = kind == StreamType::Video && packet.size() == STILL_FRAME_EOF_SIZE;
        if kind != StreamType::Subtitle && !still_eof {
            self.check_continuity(kind, &mut packet);
        }
        if !still_eof {
            self.cursor_mut(kind)
                .update_timestamps(packet.dts, packet.pts, packet.duration);
        }

        let mut drop = self.check_player_init(kind);
        if self.check_scene_skip(kind) {
            drop = true;
        } else if kind == StreamType::Audio {
            self.check_edl_mute();
        }

        self.pipeline_mut(kind).send(PipelineMessage::Packet { packet, drop });
    }

    // ==================== 时间戳连续性 ====================

    /// 检测时间戳跳变，把跳变量吸收进累计校正
    ///
    /// 向前跳超过 1 秒或向后重叠超过 100 毫秒才校正；普通的回绕只记录。
    pub(super) fn check_continuity(&mut self, kind: StreamType, packet: &mut DemuxPacket) {
        if self.play_speed <= PLAYSPEED_PAUSE {
            return;
        }
        let (Some(dts), Some(_)) = (packet.dts, self.cursor(kind).dts) else {
            return;
        };

        let bounds = [
            self.current_audio.dts,
            self.current_video.dts,
            self.current_audio.dts_end(),
            self.current_video.dts_end(),
        ];
        let Some(max_dts) = bounds.iter().flatten().copied().reduce(f64::max) else {
            return;
        };

        let cursor = self.cursor(kind);
        let current_end = cursor.dts_end().unwrap_or(max_dts);
        let mut correction = 0.0;
        if dts > max_dts + msec_to_time(1000.0) {
            debug!(
                "{} 向前跳变 {}: prev {:.0} curr {:.0} diff {:.0}",
                log_ctx(),
                kind.as_str(),
                max_dts,
                dts,
                dts - max_dts
            );
            correction = dts - max_dts;
        }

        if dts + msec_to_time(100.0) < current_end {
            debug!(
                "{} 向后跳变 {}: prev {:.0} curr {:.0} diff {:.0}",
                log_ctx(),
                kind.as_str(),
                current_end,
                dts,
                dts - current_end
            );
            correction = dts - current_end;
        } else if cursor.dts.map(|d| dts < d).unwrap_or(false) {
            warn!("{} ⚠️ {} 时间戳回绕: {:.0}", log_ctx(), kind.as_str(), dts);
        }

        if correction != 0.0 {
            // 另一种流的时间戳作废，避免两边来回校正
            if kind != StreamType::Audio {
                self.current_audio.dts = None;
            }
            if kind != StreamType::Video {
                self.current_video.dts = None;
            }
            self.offset_pts += correction;
            packet.apply_correction(correction);
            info!(
                "{} 🔧 时间戳校正 {:.0} ms，累计 {:.0} ms",
                log_ctx(),
                time_to_msec(correction),
                time_to_msec(self.offset_pts)
            );
        }
    }

    // ==================== 初始化与重同步 ====================

    /// 未初始化的流：丢弃 seek 目标之前的包，到达后发送重同步
    ///
    /// 返回 true 表示这个包应当丢弃。
    pub(super) fn check_player_init(&mut self, kind: StreamType) -> bool {
        let cursor = self.cursor(kind);
        if cursor.inited {
            return false;
        }

        if let Some(startpts) = cursor.startpts {
            let Some(dts) = cursor.dts else {
                debug!("{} 丢弃 {} 包：没有时间戳，目标 {:.0}", log_ctx(), kind.as_str(), startpts);
                return true;
            };

            if startpts - dts > sec_to_time(20.0) {
                warn!(
                    "{} ⚠️ {} 离 seek 目标太远 ({:.0} -> {:.0})，放弃目标",
                    log_ctx(),
                    kind.as_str(),
                    dts,
                    startpts
                );
                self.callback.on_seek_target_abandoned(kind, startpts, dts);
                for cursor in [&mut self.current_audio, &mut self.current_video, &mut self.current_subtitle] {
                    if cursor.startpts.is_some() {
                        cursor.startpts = Some(dts);
                    }
                }
            }

            let cursor = self.cursor(kind);
            if cursor.startpts.map(|s| dts < s).unwrap_or(false) {
                debug!("{} 丢弃 {} 包 {:.0}：未到 seek 目标", log_ctx(), kind.as_str(), dts);
                return true;
            }
        }

        let Some(dts) = self.cursor(kind).dts else {
            return false;
        };

        // 第一个有效包，作为重同步点
        let cursor = self.cursor_mut(kind);
        cursor.inited = true;
        cursor.startpts = Some(dts);

        let set_clock = if self.play_speed == PLAYSPEED_NORMAL {
            match kind {
                StreamType::Audio => !self.current_video.inited,
                StreamType::Video => !self.current_audio.inited,
                _ => false,
            }
        } else {
            kind == StreamType::Video
        };

        let mut start = dts;
        for other in [&self.current_audio, &self.current_video] {
            if other.inited {
                if let Some(s) = other.startpts {
                    start = start.min(s);
                }
            }
        }

        let delay = dts - start;
        if delay > 0.0 && set_clock {
            if delay > sec_to_time(2.0) {
                warn!("{} ⚠️ {} 忽略过大的延迟 {:.0}", log_ctx(), kind.as_str(), delay);
            } else {
                self.pipeline_mut(kind).send(PipelineMessage::Delay(delay));
            }
        }

        info!("{} ▶️ {} 重同步 dts={:.0} set_clock={}", log_ctx(), kind.as_str(), dts, set_clock);
        self.pipeline_mut(kind)
            .send(PipelineMessage::Resync { dts, set_clock });
        false
    }

    // ==================== 剪辑区间 ====================

    /// 游标位置落在硬剪区间里
    pub(super) fn check_scene_skip(&self, kind: StreamType) -> bool {
        if !self.cut_list.has_cut() {
            return false;
        }
        let cursor = self.cursor(kind);
        let Some(dts) = cursor.dts else {
            return false;
        };
        if !cursor.inited {
            return false;
        }
        let position = time_to_msec(dts + self.offset_pts) as i64;
        matches!(self.cut_list.in_cut(position), Some(cut) if cut.action == CutAction::Cut)
    }

    /// 静音区间的进出各发一次 Silence
    fn check_edl_mute(&mut self) {
        let Some(dts) = self.current_audio.dts else {
            return;
        };
        let position = time_to_msec(dts + self.offset_pts) as i64;
        match self.cut_list.in_cut(position) {
            Some(cut) if cut.action == CutAction::Mute && !self.markers.mute => {
                info!("{} 🔇 进入静音区间 [{} - {}]", log_ctx(), cut.start, cut.end);
                self.audio.send(PipelineMessage::Silence(true));
                self.markers.mute = true;
            }
            None if self.markers.mute => {
                info!("{} 🔈 离开静音区间", log_ctx());
                self.audio.send(PipelineMessage::Silence(false));
                self.markers.mute = false;
            }
            _ => {}
        }
    }

    /// 音视频都初始化后，位置进入硬剪或广告段时自动跳过
    pub(super) fn check_auto_scene_skip(&mut self) {
        if !self.cut_list.has_cut() {
            return;
        }
        if !self.current_audio.is_open() || !self.current_video.is_open() {
            return;
        }
        if !self.current_audio.inited || !self.current_video.inited {
            return;
        }
        let (Some(audio_dts), Some(video_dts)) = (self.current_audio.dts, self.current_video.dts) else {
            return;
        };

        let clock = time_to_msec(audio_dts.min(video_dts) + self.offset_pts) as i64;
        let Some(cut) = self.cut_list.in_cut(clock) else {
            return;
        };
        let forward = self.play_speed >= 0;

        if cut.action == CutAction::Cut && self.markers.cut != Some(cut.end) && self.markers.cut != Some(cut.start) {
            let seek = if forward { cut.end } else { cut.start };
            info!(
                "{} ✂️ 位置 {} 在剪辑区间 [{} - {}]，自动跳到 {}",
                log_ctx(),
                clock,
                cut.start,
                cut.end,
                seek
            );
            // 不清空缓冲，保留已读到的数据
            self.queue.put(PlayerMessage::Seek(SeekRequest {
                time_ms: seek,
                backward: true,
                flush: false,
                accurate: true,
                restore: false,
                trickplay: true,
            }));
            self.markers.cut = Some(seek);
        } else if cut.action == CutAction::CommBreak
            && forward
            && self.markers.commbreak_end.map(|end| cut.start > end).unwrap_or(true)
        {
            info!(
                "{} 📺 位置 {} 在广告段 [{} - {}]，跳到结尾",
                log_ctx(),
                clock,
                cut.start,
                cut.end
            );
            self.queue.put(PlayerMessage::Seek(SeekRequest {
                time_ms: cut.end + 1,
                backward: true,
                flush: false,
                accurate: true,
                restore: false,
                trickplay: true,
            }));
            self.markers.commbreak_start = Some(cut.start);
            self.markers.commbreak_end = Some(cut.end);
            self.markers.seek_to_start = true;
        }
    }

    // ==================== 饿死检测 ====================

    /// 正常播放中某条管线饿死时主动进入缓冲
    ///
    /// 另一条管线还有不少数据时只当作单流卡顿，不进入缓冲。
    pub(super) fn check_start_caching(&mut self, kind: StreamType) -> bool {
        if self.caching != CachingState::Done || self.play_speed != PLAYSPEED_NORMAL {
            return false;
        }
        if self.is_in_menu() {
            return false;
        }
        if !self.pipeline(kind).is_stalled() {
            return false;
        }

        if self.pvr_caching() {
            if self.cursor(kind).started && self.pipeline(kind).level() == 0 {
                info!("{} ⏳ {} 管线饿死，进入直播缓冲", log_ctx(), kind.as_str());
                self.set_caching(CachingState::Pvr);
            }
            return true;
        }

        if self.audio.level() > 50 || self.video.level() > 50 {
            return false;
        }

        info!("{} ⏳ {} 管线饿死，开始缓冲", log_ctx(), kind.as_str());
        if self.cursor(kind).inited {
            self.set_caching(CachingState::Full);
        } else {
            self.set_caching(CachingState::Init);
        }
        true
    }
}
