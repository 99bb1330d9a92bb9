use crate::core::TIME_BASE;
use crate::player::input::CacheStatus;
use serde::Serialize;

/// 缓冲状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CachingState {
    /// 正常播放
    Done,
    /// 按输入缓存估计等待
    Full,
    /// 等待所有打开的流开始输出
    Init,
    /// 已开始输出，等管线不再饿死
    Play,
    /// 临时状态，立即解析成 Full 或 Init
    Flush,
    /// 直播缓冲
    Pvr,
}

impl CachingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachingState::Done => "done",
            CachingState::Full => "full",
            CachingState::Init => "init",
            CachingState::Play => "play",
            CachingState::Flush => "flush",
            CachingState::Pvr => "pvr",
        }
    }

    /// 进入这些状态时时钟和管线速度置零
    pub fn holds_playback(&self) -> bool {
        matches!(self, CachingState::Full | CachingState::Init | CachingState::Pvr)
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CachingState::Full,
            2 => CachingState::Init,
            3 => CachingState::Play,
            4 => CachingState::Flush,
            5 => CachingState::Pvr,
            _ => CachingState::Done,
        }
    }
}

/// 缓存时间估计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CachingTimes {
    /// 缓冲充足度，>= 1.0 为足够，< 0 表示缓存满但速率不足
    pub level: f64,
    /// 预计还要等待的时间（内部时间）
    pub delay: f64,
    /// 已缓存位置占总长的比例
    pub offset: f64,
}

/// 根据输入缓存状态估算缓冲时间
///
/// `queue_time_ms` 是管线队列里已有的播放时长。
pub fn caching_times(
    status: CacheStatus,
    length: i64,
    position: i64,
    stream_length_ms: i64,
    queue_time_ms: f64,
) -> Option<CachingTimes> {
    let cached = status.forward;
    let remain = length - position;
    if cached < 0 || length <= 0 || remain < 0 || stream_length_ms <= 0 {
        return None;
    }

    // 每字节的播放时长
    let play_sbp = stream_length_ms as f64 * (TIME_BASE / 1000.0) / length as f64;
    let queued = 1000.0 * queue_time_ms / play_sbp;

    let mut times = CachingTimes {
        level: 0.0,
        delay: 0.0,
        offset: (cached as f64 + queued) / length as f64,
    };
    if status.current_rate == 0 {
        return Some(times);
    }

    // 低估 10% 的下载速率
    let cache_sbp = 1.1 * TIME_BASE / status.current_rate as f64;
    let remain = remain as f64;
    let cached = cached as f64;
    let play_left = play_sbp * (remain + queued);
    let cache_left = cache_sbp * (remain - cached);
    let cache_need = (remain - play_left / cache_sbp).max(0.0);

    times.delay = cache_left - play_left;
    times.level = if status.full && status.current_rate < status.max_rate {
        -1.0
    } else {
        (cached + queued) / (cache_need + queued)
    };
    Some(times)
}

/// 管线队列时长估计（毫秒）：最高水位按 8 秒满量折算
pub fn queue_time_ms(audio_level: i32, video_level: i32) -> f64 {
    audio_level.max(video_level) as f64 * 8000.0 / 100.0
}

/// 一种流在状态机眼里的样子
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineStatus {
    /// 游标打开了流
    pub open: bool,
    pub started: bool,
    pub accepts_data: bool,
    pub stalled: bool,
    pub level: i32,
    /// demuxer 里有这种类型的流
    pub present: bool,
}

/// 一次状态机评估的输入
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CachingInputs {
    pub in_menu: bool,
    pub times: Option<CachingTimes>,
    pub audio: PipelineStatus,
    pub video: PipelineStatus,
    pub pvr_min_audio_level: i32,
    pub pvr_min_video_level: i32,
}

/// 评估结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachingDecision {
    pub next: CachingState,
    /// 直播缓冲未完成：已启动的管线要暂停
    pub pause_started: bool,
}

/// Flush 解析成的实际状态
pub fn resolve_flush(times_available: bool) -> CachingState {
    if times_available {
        CachingState::Full
    } else {
        CachingState::Init
    }
}

/// 每轮循环的状态转换
///
/// 状态按 Full -> Init -> Pvr -> Play 的顺序依次检查，一轮里可以连续前进。
pub fn evaluate(current: CachingState, inputs: &CachingInputs) -> CachingDecision {
    let audio = &inputs.audio;
    let video = &inputs.video;
    let mut state = current;
    let mut pause_started = false;

    if inputs.in_menu && state != CachingState::Done {
        state = CachingState::Done;
    }

    if state == CachingState::Full {
        match inputs.times {
            Some(times) => {
                if times.level < 0.0 || times.level >= 1.0 {
                    state = CachingState::Init;
                }
            }
            None => {
                if (!audio.accepts_data && audio.open) || (!video.accepts_data && video.open) {
                    state = CachingState::Init;
                }
            }
        }
    }

    if state == CachingState::Init {
        if (!video.open || video.started) && (!audio.open || audio.started) {
            state = CachingState::Play;
        }

        // 一路流一直不出数据时不能死等
        if audio.open && video.open {
            if (!audio.accepts_data && !video.started) || (!video.accepts_data && !audio.started) {
                state = CachingState::Done;
            }
        }
    }

    if state == CachingState::Pvr {
        let audio_ok = audio.level > inputs.pvr_min_audio_level;
        let video_ok = video.level > inputs.pvr_min_video_level;
        let levels_ok = (video.present || audio.present) && (!audio.present || audio_ok) && (!video.present || video_ok);
        let any_full = !audio.accepts_data || !video.accepts_data;
        if levels_ok || any_full {
            state = CachingState::Done;
        } else {
            pause_started = true;
        }
    }

    if state == CachingState::Play {
        if (!video.open || !video.stalled) && (!audio.open || !audio.stalled) {
            state = CachingState::Done;
        }
    }

    CachingDecision { next: state, pause_started }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(started: bool) -> PipelineStatus {
        PipelineStatus {
            open: true,
            started,
            accepts_data: true,
            stalled: false,
            level: 0,
            present: true,
        }
    }

    #[test]
    fn test_done_never_jumps_to_play() {
        // 穷举所有布尔组合
        for bits in 0u32..(1 << 10) {
            let flag = |i: u32| bits & (1 << i) != 0;
            let inputs = CachingInputs {
                in_menu: flag(0),
                times: if flag(1) { Some(CachingTimes { level: 2.0, ..Default::default() }) } else { None },
                audio: PipelineStatus {
                    open: flag(2),
                    started: flag(3),
                    accepts_data: flag(4),
                    stalled: flag(5),
                    level: 0,
                    present: true,
                },
                video: PipelineStatus {
                    open: flag(6),
                    started: flag(7),
                    accepts_data: flag(8),
                    stalled: flag(9),
                    level: 0,
                    present: true,
                },
                ..Default::default()
            };
            let decision = evaluate(CachingState::Done, &inputs);
            assert_eq!(decision.next, CachingState::Done);
        }
    }

    #[test]
    fn test_full_exits_when_estimate_says_enough() {
        let mut inputs = CachingInputs {
            times: Some(CachingTimes { level: 0.5, ..Default::default() }),
            audio: open(false),
            video: open(false),
            ..Default::default()
        };
        assert_eq!(evaluate(CachingState::Full, &inputs).next, CachingState::Full);

        inputs.times = Some(CachingTimes { level: 1.0, ..Default::default() });
        assert_eq!(evaluate(CachingState::Full, &inputs).next, CachingState::Init);

        inputs.times = Some(CachingTimes { level: -1.0, ..Default::default() });
        assert_eq!(evaluate(CachingState::Full, &inputs).next, CachingState::Init);
    }

    #[test]
    fn test_full_without_estimate_waits_for_full_queue() {
        let mut inputs = CachingInputs {
            audio: open(false),
            video: open(false),
            ..Default::default()
        };
        assert_eq!(evaluate(CachingState::Full, &inputs).next, CachingState::Full);
        inputs.video.accepts_data = false;
        assert_eq!(evaluate(CachingState::Full, &inputs).next, CachingState::Done);
    }

    #[test]
    fn test_init_to_play_to_done() {
        let mut inputs = CachingInputs {
            audio: open(true),
            video: open(false),
            ..Default::default()
        };
        assert_eq!(evaluate(CachingState::Init, &inputs).next, CachingState::Init);

        inputs.video.started = true;
        inputs.video.stalled = true;
        assert_eq!(evaluate(CachingState::Init, &inputs).next, CachingState::Play);

        inputs.video.stalled = false;
        assert_eq!(evaluate(CachingState::Init, &inputs).next, CachingState::Done);
    }

    #[test]
    fn test_init_collapses_when_one_stream_never_starts() {
        let inputs = CachingInputs {
            audio: PipelineStatus {
                accepts_data: false,
                ..open(false)
            },
            video: open(false),
            ..Default::default()
        };
        assert_eq!(evaluate(CachingState::Init, &inputs).next, CachingState::Done);
    }

    #[test]
    fn test_menu_forces_done() {
        let inputs = CachingInputs {
            in_menu: true,
            audio: open(false),
            ..Default::default()
        };
        assert_eq!(evaluate(CachingState::Full, &inputs).next, CachingState::Done);
    }

    #[test]
    fn test_pvr_waits_for_min_levels() {
        let mut inputs = CachingInputs {
            audio: PipelineStatus { level: 5, ..open(true) },
            video: PipelineStatus { level: 50, ..open(true) },
            pvr_min_audio_level: 10,
            pvr_min_video_level: 5,
            ..Default::default()
        };
        let decision = evaluate(CachingState::Pvr, &inputs);
        assert_eq!(decision.next, CachingState::Pvr);
        assert!(decision.pause_started);

        inputs.audio.level = 11;
        assert_eq!(evaluate(CachingState::Pvr, &inputs).next, CachingState::Done);

        inputs.audio.level = 0;
        inputs.video.accepts_data = false;
        assert_eq!(evaluate(CachingState::Pvr, &inputs).next, CachingState::Done);
    }

    #[test]
    fn test_caching_times() {
        assert!(caching_times(CacheStatus::default(), 0, 0, 1000, 0.0).is_none());

        // 10 MB、100 秒的流，已缓存 1 MB，下载速率 50 KB/s
        let status = CacheStatus {
            forward: 1_000_000,
            current_rate: 50_000,
            max_rate: 400_000,
            full: false,
        };
        let times = caching_times(status, 10_000_000, 0, 100_000, 0.0).unwrap();
        assert!((times.offset - 0.1).abs() < 1e-9);
        assert!(times.level > 0.0 && times.level < 1.0);
        assert!(times.delay > 0.0);

        let full = CacheStatus { full: true, ..status };
        assert_eq!(caching_times(full, 10_000_000, 0, 100_000, 0.0).unwrap().level, -1.0);
    }

    #[test]
    fn test_queue_time() {
        assert_eq!(queue_time_ms(50, 25), 4000.0);
        assert_eq!(queue_time_ms(0, 0), 0.0);
    }

    #[test]
    fn test_state_u8_round_trip() {
        for state in [
            CachingState::Done,
            CachingState::Full,
            CachingState::Init,
            CachingState::Play,
            CachingState::Flush,
            CachingState::Pvr,
        ] {
            assert_eq!(CachingState::from_u8(state.to_u8()), state);
        }
    }
}
