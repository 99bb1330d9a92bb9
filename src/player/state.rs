use crate::core::{msec_to_time, time_to_msec, StreamSummary, PLAYSPEED_NORMAL};
use crate::player::caching::CachingState;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

/// 播放状态快照
///
/// 播放线程整体替换，其他线程只拿副本。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStateSnapshot {
    /// 计算时的绝对时钟，`None` 表示还没算过
    pub timestamp: Option<f64>,
    /// 当前位置（毫秒，已去掉硬剪）
    pub time: f64,
    /// 总时长（毫秒）
    pub time_total: f64,
    /// 时钟到真实时间的偏移（内部时间）
    pub time_offset: f64,
    pub dts: Option<f64>,

    pub chapter: i32,
    pub chapter_count: i32,
    pub chapter_name: String,

    /// 导航器状态串
    pub player_state: String,

    pub can_record: bool,
    pub recording: bool,
    pub can_seek: bool,
    pub can_pause: bool,

    pub cache_bytes: i64,
    pub cache_level: f64,
    pub cache_delay: f64,
    pub cache_offset: f64,

    pub demux_video: String,
    pub demux_audio: String,

    pub has_video: bool,
    pub has_audio: bool,
    pub audio_streams: Vec<StreamSummary>,
    pub subtitle_streams: Vec<StreamSummary>,
    pub current_audio: i32,
    pub current_subtitle: i32,
    pub subtitle_visible: bool,
    pub audio_bitrate: i32,
    pub video_bitrate: i32,
    pub av_delay: f32,
    pub subtitle_delay: f32,
}

impl PlayerStateSnapshot {
    /// 按快照之后流逝的时间外推当前位置（毫秒），外推量限制在 ±1 秒
    pub fn time_at(&self, absolute: f64, play_speed: i32) -> f64 {
        let mut offset = 0.0;
        if let Some(timestamp) = self.timestamp {
            let limit = msec_to_time(1000.0);
            offset = (absolute - timestamp) * play_speed as f64 / PLAYSPEED_NORMAL as f64;
            offset = offset.clamp(-limit, limit);
        }
        (self.time + time_to_msec(offset)).round()
    }
}

/// 跨线程共享的播放状态
#[derive(Clone)]
pub struct SharedState {
    snapshot: Arc<RwLock<PlayerStateSnapshot>>,
    play_speed: Arc<AtomicI32>,
    caching: Arc<AtomicU8>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(PlayerStateSnapshot::default())),
            play_speed: Arc::new(AtomicI32::new(PLAYSPEED_NORMAL)),
            caching: Arc::new(AtomicU8::new(CachingState::Done.to_u8())),
        }
    }

    /// 拿一份完整副本
    pub fn snapshot(&self) -> PlayerStateSnapshot {
        self.snapshot.read().clone()
    }

    pub fn replace(&self, snapshot: PlayerStateSnapshot) {
        *self.snapshot.write() = snapshot;
    }

    pub fn play_speed(&self) -> i32 {
        self.play_speed.load(Ordering::SeqCst)
    }

    pub fn set_play_speed(&self, speed: i32) {
        self.play_speed.store(speed, Ordering::SeqCst);
    }

    pub fn caching(&self) -> CachingState {
        CachingState::from_u8(self.caching.load(Ordering::SeqCst))
    }

    pub fn set_caching(&self, state: CachingState) {
        self.caching.store(state.to_u8(), Ordering::SeqCst);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_extrapolation_is_clamped() {
        let snapshot = PlayerStateSnapshot {
            timestamp: Some(msec_to_time(1000.0)),
            time: 5000.0,
            ..Default::default()
        };
        assert_eq!(snapshot.time_at(msec_to_time(1200.0), PLAYSPEED_NORMAL), 5200.0);
        assert_eq!(snapshot.time_at(msec_to_time(9000.0), PLAYSPEED_NORMAL), 6000.0);
        assert_eq!(snapshot.time_at(msec_to_time(9000.0), 0), 5000.0);
        assert_eq!(snapshot.time_at(msec_to_time(9000.0), -2 * PLAYSPEED_NORMAL), 4000.0);
    }

    #[test]
    fn test_snapshot_without_timestamp() {
        let snapshot = PlayerStateSnapshot {
            time: 42.0,
            ..Default::default()
        };
        assert_eq!(snapshot.time_at(msec_to_time(5000.0), PLAYSPEED_NORMAL), 42.0);
    }

    #[test]
    fn test_shared_state_copy_out() {
        let shared = SharedState::new();
        let mut snap = shared.snapshot();
        snap.time_total = 10_000.0;
        assert_eq!(shared.snapshot().time_total, 0.0);
        shared.replace(snap);
        assert_eq!(shared.snapshot().time_total, 10_000.0);

        shared.set_caching(CachingState::Init);
        assert_eq!(shared.caching(), CachingState::Init);
        shared.set_play_speed(0);
        assert_eq!(shared.play_speed(), 0);
    }
}
