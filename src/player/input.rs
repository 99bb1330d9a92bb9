use crate::core::Result;

/// 输入源对"下一段"的回答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStream {
    /// 没有后续，正常结束
    None,
    /// 有新的片段，需要重新创建 demuxer
    Open,
    /// 暂时不可读，稍后重试
    Retry,
}

/// 输入缓存状态（网络源）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStatus {
    /// 已缓存但尚未读取的字节数
    pub forward: i64,
    /// 当前下载速率（字节/秒）
    pub current_rate: u32,
    /// 最大下载速率
    pub max_rate: u32,
    /// 缓存已满
    pub full: bool,
}

/// 导航器事件（光盘菜单源）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavEvent {
    /// 静帧，时长秒，0xff 表示无限
    StillFrame(u32),
    /// 导航器切换了物理音频流，负数表示无
    AudioStreamChange(i32),
    /// 导航器切换了物理字幕流，最高位 0x80 表示隐藏
    SubtitleStreamChange(i32),
    /// 片段切换，静帧结束
    CellChange,
    /// 跳转了节目链，正在 seek 时结束 seek 状态，否则清空缓冲
    HopChannel,
    /// 标题切换，导航器的流表变了
    TitleChange,
    Stop,
}

/// 菜单能力
pub trait Menus {
    fn is_in_menu(&self) -> bool;
    fn skip_still(&mut self);
    fn on_menu(&mut self) -> bool;
    fn on_back(&mut self) -> bool;
    fn on_up(&mut self);
    fn on_down(&mut self);
    fn on_left(&mut self);
    fn on_right(&mut self);
    fn on_next(&mut self);
    fn on_previous(&mut self);
    fn activate_button(&mut self);
    fn select_button(&mut self, button: i32);
    fn poll_event(&mut self) -> Option<NavEvent>;
    /// 当前菜单的按钮数
    fn total_buttons(&self) -> i32 {
        0
    }
}

/// 导航器能力：音频/字幕流由导航器而不是 demuxer 管理
pub trait Navigator {
    fn audio_stream_count(&self) -> i32;
    fn audio_stream_language(&self, index: i32) -> String;
    fn active_audio_stream(&self) -> i32;
    fn set_active_audio_stream(&mut self, index: i32) -> bool;
    fn subtitle_stream_count(&self) -> i32;
    fn subtitle_stream_language(&self, index: i32) -> String;
    fn active_subtitle_stream(&self) -> i32;
    fn set_active_subtitle_stream(&mut self, index: i32) -> bool;
    fn enable_subtitle_stream(&mut self, enable: bool);
    fn is_subtitle_stream_enabled(&self) -> bool;
    fn navigator_state(&self) -> Option<String>;
    fn set_navigator_state(&mut self, state: &str) -> bool;
}

/// 直播频道能力
pub trait Channel {
    fn select_channel(&mut self, number: i32) -> bool;
    fn next_channel(&mut self, preview: bool) -> bool;
    fn prev_channel(&mut self, preview: bool) -> bool;
    fn current_channel(&self) -> i32;
    fn can_record(&self) -> bool;
    fn is_recording(&self) -> bool;
    fn record(&mut self, on: bool) -> bool;
    fn can_pause(&self) -> bool {
        true
    }
    fn can_seek(&self) -> bool {
        true
    }
    fn pause(&mut self, _paused: bool) {}
}

/// 外部权威的播放位置（毫秒）
pub trait DisplayTime {
    fn time(&self) -> i64;
    fn total_time(&self) -> i64;
}

/// 输入流抽象
///
/// 可选能力通过返回 `Option` 的查询方法暴露，`None` 表示不支持。
pub trait InputStream: Send {
    fn open(&mut self) -> Result<()>;

    fn file_name(&self) -> String;

    fn next_stream(&mut self) -> NextStream {
        NextStream::None
    }

    fn is_eof(&self) -> bool;

    /// 总字节数，未知时为 0
    fn length(&self) -> i64 {
        0
    }

    /// 当前读取位置（字节）
    fn position(&self) -> i64 {
        0
    }

    fn cache_status(&self) -> Option<CacheStatus> {
        None
    }

    /// 无缝片段的分组号
    fn current_group_id(&self) -> i32 {
        0
    }

    /// 直播源
    fn is_live(&self) -> bool {
        false
    }

    fn menus(&mut self) -> Option<&mut dyn Menus> {
        None
    }

    fn menus_ref(&self) -> Option<&dyn Menus> {
        None
    }

    fn navigator(&mut self) -> Option<&mut dyn Navigator> {
        None
    }

    fn navigator_ref(&self) -> Option<&dyn Navigator> {
        None
    }

    fn channel(&mut self) -> Option<&mut dyn Channel> {
        None
    }

    fn channel_ref(&self) -> Option<&dyn Channel> {
        None
    }

    fn display_time(&self) -> Option<&dyn DisplayTime> {
        None
    }
}
