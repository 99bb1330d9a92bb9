use super::types::{PLAYSPEED_NORMAL, PLAYSPEED_PAUSE, TIME_BASE};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 用于音视频同步
///
/// 所有时间均为内部时间基（微秒）。`clock()` 按 speed/1000 的倍率推进，
/// speed 为 0 时冻结。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

/// 绝对时间来源
enum TimeSource {
    System(Instant),
    /// 测试用：手动推进
    Manual(f64),
}

struct ClockInner {
    source: TimeSource,
    base_pts: f64,      // 基准媒体时间
    base_abs: f64,      // 基准绝对时间
    speed: i32,         // 千分比速度
}

impl ClockInner {
    fn absolute(&self) -> f64 {
        match &self.source {
            TimeSource::System(start) => start.elapsed().as_secs_f64() * TIME_BASE,
            TimeSource::Manual(now) => *now,
        }
    }

    fn clock(&self) -> f64 {
        let elapsed = self.absolute() - self.base_abs;
        self.base_pts + elapsed * self.speed as f64 / PLAYSPEED_NORMAL as f64
    }

    fn rebase(&mut self) {
        self.base_pts = self.clock();
        self.base_abs = self.absolute();
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::with_source(TimeSource::System(Instant::now()))
    }

    /// 手动推进的时钟，测试中用来获得确定的时间
    pub fn manual() -> Self {
        Self::with_source(TimeSource::Manual(0.0))
    }

    fn with_source(source: TimeSource) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                source,
                base_pts: 0.0,
                base_abs: 0.0,
                speed: PLAYSPEED_NORMAL,
            })),
        }
    }

    /// 单调绝对时间
    pub fn absolute(&self) -> f64 {
        self.inner.lock().absolute()
    }

    /// 当前媒体时间
    pub fn clock(&self) -> f64 {
        self.inner.lock().clock()
    }

    /// 时间戳跳变：把媒体时间直接设为 pts
    pub fn discontinuity(&self, pts: f64) {
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_abs = inner.absolute();
    }

    /// 设置速度（千分比），先按旧速度结算已走过的时间
    pub fn set_speed(&self, speed: i32) {
        let mut inner = self.inner.lock();
        inner.rebase();
        inner.speed = speed;
    }

    pub fn speed(&self) -> i32 {
        self.inner.lock().speed
    }

    pub fn is_paused(&self) -> bool {
        self.speed() == PLAYSPEED_PAUSE
    }

    /// 推进手动时钟（微秒），系统时钟忽略
    pub fn advance(&self, delta: f64) {
        let mut inner = self.inner.lock();
        if let TimeSource::Manual(now) = &mut inner.source {
            *now += delta;
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::msec_to_time;

    #[test]
    fn test_manual_clock_follows_speed() {
        let clock = PlaybackClock::manual();
        clock.advance(msec_to_time(100.0));
        assert_eq!(clock.clock(), msec_to_time(100.0));

        clock.set_speed(2 * PLAYSPEED_NORMAL);
        clock.advance(msec_to_time(100.0));
        assert_eq!(clock.clock(), msec_to_time(300.0));

        clock.set_speed(PLAYSPEED_PAUSE);
        clock.advance(msec_to_time(500.0));
        assert_eq!(clock.clock(), msec_to_time(300.0));
        assert!(clock.is_paused());
    }

    #[test]
    fn test_discontinuity_rebases() {
        let clock = PlaybackClock::manual();
        clock.advance(msec_to_time(1000.0));
        clock.discontinuity(msec_to_time(40.0));
        assert_eq!(clock.clock(), msec_to_time(40.0));
        clock.advance(msec_to_time(10.0));
        assert_eq!(clock.clock(), msec_to_time(50.0));
        assert_eq!(clock.absolute(), msec_to_time(1010.0));
    }

    #[test]
    fn test_negative_speed_runs_backwards() {
        let clock = PlaybackClock::manual();
        clock.discontinuity(msec_to_time(10_000.0));
        clock.set_speed(-4 * PLAYSPEED_NORMAL);
        clock.advance(msec_to_time(1000.0));
        assert_eq!(clock.clock(), msec_to_time(6000.0));
    }
}
