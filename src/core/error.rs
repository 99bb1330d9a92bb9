use crate::core::types::StreamType;
use thiserror::Error;

/// 错误分级，决定播放循环的恢复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 短暂性错误：睡眠后重试
    Transient,
    /// 单个流的错误：丢弃该流或该包，继续播放
    StreamLocal,
    /// 会话级错误：设置 abort 标志并结束会话
    Fatal,
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    ConfigError(#[from] serde_json::Error),

    #[error("无法打开输入流: {0}")]
    OpenError(String),

    #[error("无法创建 demuxer: {0}")]
    DemuxerError(String),

    #[error("无法打开{kind:?}流 {id}: {reason}")]
    StreamOpen {
        kind: StreamType,
        id: i32,
        reason: String,
    },

    #[error("找不到流 {0}")]
    StreamNotFound(i32),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("输入暂时不可读")]
    Retry,

    #[error("播放已中止")]
    Aborted,

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::Retry => ErrorKind::Transient,
            PlayerError::StreamOpen { .. }
            | PlayerError::StreamNotFound(_)
            | PlayerError::SeekError(_) => ErrorKind::StreamLocal,
            PlayerError::IoError(_)
            | PlayerError::ConfigError(_)
            | PlayerError::OpenError(_)
            | PlayerError::DemuxerError(_)
            | PlayerError::Aborted
            | PlayerError::Other(_)
            | PlayerError::AnyhowError(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(PlayerError::Retry.kind(), ErrorKind::Transient);
        assert_eq!(PlayerError::StreamNotFound(3).kind(), ErrorKind::StreamLocal);
        let err = PlayerError::StreamOpen {
            kind: StreamType::Video,
            id: 0,
            reason: "codec".into(),
        };
        assert_eq!(err.kind(), ErrorKind::StreamLocal);
        assert_eq!(PlayerError::OpenError("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(PlayerError::from(anyhow::anyhow!("boom")).kind(), ErrorKind::Fatal);
    }
}
