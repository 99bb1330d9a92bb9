use crate::core::StreamType;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 菜单 / 遥控器输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ShowVideoMenu,
    PreviousMenu,
    NavBack,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
    SelectItem,
    NextItem,
    PrevItem,
    /// 数字键 0..=9
    Number(i32),
    /// 直接切到某频道
    ChannelSwitch(i32),
}

/// Seek 请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    /// 目标时间（毫秒）
    pub time_ms: i64,
    pub backward: bool,
    /// 为假时排队复位而不是立即清空
    pub flush: bool,
    /// 精确 seek：丢弃目标之前的包
    pub accurate: bool,
    /// 目标是去掉剪辑后的时间，需要还原
    pub restore: bool,
    pub trickplay: bool,
}

impl SeekRequest {
    pub fn new(time_ms: i64) -> Self {
        Self {
            time_ms,
            backward: true,
            flush: true,
            accurate: true,
            restore: true,
            trickplay: false,
        }
    }
}

/// 播放线程的入站消息
#[derive(Debug, Clone)]
pub enum PlayerMessage {
    Seek(SeekRequest),
    SeekChapter(i32),
    /// 按设置的步长前后跳
    SeekStep { forward: bool, large: bool },
    SeekPercentage(f32),
    SeekScene(bool),
    DemuxerReset,
    SetAudioStream(i32),
    SetSubtitleStream(i32),
    SetSubtitleVisible(bool),
    SetState(String),
    SetRecord(bool),
    Flush,
    SetSpeed(i32),
    SetAvDelay(f32),
    SetSubtitleDelay(f32),
    SetVolume(f32),
    AddSubtitle(String),
    ChannelSelectNumber(i32),
    ChannelNext,
    ChannelPrev,
    GuiAction(Action),
    /// 暂停键在缓冲中按下：提前结束缓冲
    EndCaching,
    /// 管线回报已开始输出
    PlayerStarted(StreamType),
    /// 调用线程等待播放线程处理到这里
    Synchronize(SyncBarrier),
}

/// 用于合并/清除同类消息的消息种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Seek,
    SeekChapter,
    SeekStep,
    SeekPercentage,
    SeekScene,
    DemuxerReset,
    SetAudioStream,
    SetSubtitleStream,
    SetSubtitleVisible,
    SetState,
    SetRecord,
    Flush,
    SetSpeed,
    SetAvDelay,
    SetSubtitleDelay,
    SetVolume,
    AddSubtitle,
    ChannelSelectNumber,
    ChannelNext,
    ChannelPrev,
    GuiAction,
    EndCaching,
    PlayerStarted,
    Synchronize,
}

impl PlayerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            PlayerMessage::Seek(_) => MessageKind::Seek,
            PlayerMessage::SeekChapter(_) => MessageKind::SeekChapter,
            PlayerMessage::SeekStep { .. } => MessageKind::SeekStep,
            PlayerMessage::SeekPercentage(_) => MessageKind::SeekPercentage,
            PlayerMessage::SeekScene(_) => MessageKind::SeekScene,
            PlayerMessage::DemuxerReset => MessageKind::DemuxerReset,
            PlayerMessage::SetAudioStream(_) => MessageKind::SetAudioStream,
            PlayerMessage::SetSubtitleStream(_) => MessageKind::SetSubtitleStream,
            PlayerMessage::SetSubtitleVisible(_) => MessageKind::SetSubtitleVisible,
            PlayerMessage::SetState(_) => MessageKind::SetState,
            PlayerMessage::SetRecord(_) => MessageKind::SetRecord,
            PlayerMessage::Flush => MessageKind::Flush,
            PlayerMessage::SetSpeed(_) => MessageKind::SetSpeed,
            PlayerMessage::SetAvDelay(_) => MessageKind::SetAvDelay,
            PlayerMessage::SetSubtitleDelay(_) => MessageKind::SetSubtitleDelay,
            PlayerMessage::SetVolume(_) => MessageKind::SetVolume,
            PlayerMessage::AddSubtitle(_) => MessageKind::AddSubtitle,
            PlayerMessage::ChannelSelectNumber(_) => MessageKind::ChannelSelectNumber,
            PlayerMessage::ChannelNext => MessageKind::ChannelNext,
            PlayerMessage::ChannelPrev => MessageKind::ChannelPrev,
            PlayerMessage::GuiAction(_) => MessageKind::GuiAction,
            PlayerMessage::EndCaching => MessageKind::EndCaching,
            PlayerMessage::PlayerStarted(_) => MessageKind::PlayerStarted,
            PlayerMessage::Synchronize(_) => MessageKind::Synchronize,
        }
    }
}

struct QueueInner {
    queue: Mutex<VecDeque<PlayerMessage>>,
    cond: Condvar,
}

/// 线程安全的有序消息队列，只有播放线程消费
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<QueueInner>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                queue: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn put(&self, msg: PlayerMessage) {
        self.inner.queue.lock().push_back(msg);
        self.inner.cond.notify_one();
    }

    /// 非阻塞取出队首
    pub fn try_get(&self) -> Option<PlayerMessage> {
        self.inner.queue.lock().pop_front()
    }

    /// 队列为空时最多等待 timeout，新消息或 `wake` 会提前结束等待
    ///
    /// 不取出消息，返回队列是否非空。
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut queue = self.inner.queue.lock();
        if queue.is_empty() {
            self.inner.cond.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }

    /// 队列中某种消息的个数
    pub fn count(&self, kind: MessageKind) -> usize {
        self.inner.queue.lock().iter().filter(|m| m.kind() == kind).count()
    }

    /// 清除某种消息
    pub fn flush(&self, kind: MessageKind) {
        self.inner.queue.lock().retain(|m| m.kind() != kind);
    }

    pub fn clear(&self) {
        self.inner.queue.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 唤醒所有等待者
    pub fn wake(&self) {
        self.inner.cond.notify_all();
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// 同步屏障：发给 N 个接收方，等待全部应答或超时
#[derive(Debug, Clone)]
pub struct SyncBarrier {
    tx: Sender<()>,
    rx: Receiver<()>,
    expected: usize,
}

impl SyncBarrier {
    pub fn new(expected: usize) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, expected }
    }

    /// 接收方处理到屏障时调用
    pub fn acknowledge(&self) {
        let _ = self.tx.send(());
    }

    /// 等待全部应答；超时或 abort 时返回 false
    pub fn wait(&self, timeout: Duration, abort: &AtomicBool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut received = 0;
        while received < self.expected {
            if abort.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(10));
            match self.rx.recv_timeout(slice) {
                Ok(()) => received += 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_queue_is_fifo() {
        let queue = MessageQueue::new();
        queue.put(PlayerMessage::SetSpeed(0));
        queue.put(PlayerMessage::Flush);
        assert_eq!(queue.len(), 2);
        assert!(matches!(queue.try_get(), Some(PlayerMessage::SetSpeed(0))));
        assert!(matches!(queue.try_get(), Some(PlayerMessage::Flush)));
        assert!(queue.try_get().is_none());
    }

    #[test]
    fn test_count_and_flush_by_kind() {
        let queue = MessageQueue::new();
        queue.put(PlayerMessage::Seek(SeekRequest::new(1000)));
        queue.put(PlayerMessage::PlayerStarted(StreamType::Audio));
        queue.put(PlayerMessage::Seek(SeekRequest::new(2000)));
        assert_eq!(queue.count(MessageKind::Seek), 2);

        queue.flush(MessageKind::PlayerStarted);
        assert_eq!(queue.count(MessageKind::PlayerStarted), 0);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_wait_wakes_on_put() {
        let queue = MessageQueue::new();
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(PlayerMessage::ChannelNext);
        });
        let start = Instant::now();
        assert!(queue.wait(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(matches!(queue.try_get(), Some(PlayerMessage::ChannelNext)));
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let queue = MessageQueue::new();
        let waker = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake();
        });
        let start = Instant::now();
        assert!(!queue.wait(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_wait_returns_at_once_when_not_empty() {
        let queue = MessageQueue::new();
        queue.put(PlayerMessage::Flush);
        let start = Instant::now();
        assert!(queue.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_barrier_waits_for_all() {
        let barrier = SyncBarrier::new(2);
        let abort = AtomicBool::new(false);
        barrier.acknowledge();
        assert!(!barrier.wait(Duration::from_millis(30), &abort));

        let barrier = SyncBarrier::new(2);
        let remote = barrier.clone();
        let handle = thread::spawn(move || {
            remote.acknowledge();
            remote.acknowledge();
        });
        assert!(barrier.wait(Duration::from_secs(1), &abort));
        handle.join().unwrap();
    }

    #[test]
    fn test_barrier_cancelled_by_abort() {
        let barrier = SyncBarrier::new(1);
        let abort = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!barrier.wait(Duration::from_secs(10), &abort));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
