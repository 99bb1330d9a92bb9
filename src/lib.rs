//! 播放同步核心
//!
//! 把容器拆成的各路基本流分发给音频、视频、字幕管线，
//! 并在 seek、切流、倍速和缓冲时保持它们与时钟同步。

pub mod core;
pub mod player;
