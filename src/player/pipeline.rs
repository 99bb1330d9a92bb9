use crate::core::{DemuxPacket, StreamHint};
use crate::player::messages::SyncBarrier;

/// 发给下游解码管线的消息
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// 数据包；`drop` 为真时管线做完记账后丢弃
    Packet { packet: DemuxPacket, drop: bool },
    /// 轻量复位，不重新初始化解码器
    Reset,
    /// 时间戳跳变后的重同步，必定先于第一个数据包
    Resync { dts: f64, set_clock: bool },
    Eof,
    /// 与其他已初始化流对齐的延迟
    Delay(f64),
    /// 请求管线在开始出画/出声后回报 PlayerStarted
    PlayerStarted,
    /// 同步屏障，处理到这里时应答
    Synchronize(SyncBarrier),
    /// 剪辑静音区间
    Silence(bool),
    SubtitleVisible(bool),
    /// 视频：关闭丢帧
    NoSkip,
}

/// 解码管线接口
///
/// 管线内部的并发不在这里规定；这里只关心排队、背压和完成信号。
pub trait StreamPipeline: Send {
    /// 用新的格式提示打开管线，失败返回 false
    fn open_stream(&mut self, hint: &StreamHint) -> bool;

    fn close_stream(&mut self, wait_for_buffers: bool);

    /// 非阻塞发送
    fn send(&mut self, msg: PipelineMessage);

    fn flush(&mut self);

    fn set_speed(&mut self, speed: i32);

    /// 队列还能接收数据
    fn accepts_data(&self) -> bool;

    /// 队列里还有未处理的数据
    fn has_data(&self) -> bool;

    /// 饿死：需要数据但队列为空
    fn is_stalled(&self) -> bool;

    /// 已确认到达流末尾
    fn is_eos(&self) -> bool {
        true
    }

    /// 缓冲水位，0..=100
    fn level(&self) -> i32;

    fn is_inited(&self) -> bool {
        true
    }

    /// 当前出画/出声的时间戳
    fn current_pts(&self) -> Option<f64> {
        None
    }

    fn bitrate(&self) -> i32 {
        0
    }

    /// 音视频延迟（内部时间）
    fn set_delay(&mut self, _delay: f64) {}

    fn set_subtitle_delay(&mut self, _delay: f64) {}

    fn set_volume(&mut self, _volume: f32) {}

    /// 输出队列里的延迟（内部时间）
    fn output_delay(&self) -> f64 {
        0.0
    }
}
