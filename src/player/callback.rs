use crate::core::StreamType;

/// 播放事件回调，默认全部为空实现
pub trait PlayerCallback: Send + Sync {
    fn on_playback_started(&self) {}
    /// 自然播完
    fn on_playback_ended(&self) {}
    /// 被中止或出错
    fn on_playback_stopped(&self) {}
    fn on_playback_paused(&self) {}
    fn on_playback_resumed(&self) {}
    fn on_playback_seek(&self, _time_ms: i64, _offset_ms: i64) {}
    fn on_playback_seek_chapter(&self, _chapter: i32) {}
    fn on_playback_speed_changed(&self, _speed: i32) {}
    /// 离 seek 目标太远，目标被放弃
    fn on_seek_target_abandoned(&self, _stream: StreamType, _target: f64, _dts: f64) {}
}

/// 不关心任何事件
pub struct NullCallback;

impl PlayerCallback for NullCallback {}
