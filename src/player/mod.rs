// 播放器核心模块

pub mod caching;
pub mod callback;
pub mod current_stream;
pub mod demuxer_factory;
pub mod demuxer_source;
pub mod edl;
pub mod engine;
pub mod input;
pub mod manager;
pub mod memory;
pub mod messages;
pub mod pipeline;
pub mod selection;
pub mod state;

pub use callback::PlayerCallback;
pub use demuxer_factory::DemuxerFactory;
pub use demuxer_source::DemuxerSource;
pub use edl::{CutList, Edl};
pub use engine::{Engine, EngineContext, EngineHandles, FinishReason, TickOutcome};
pub use input::InputStream;
pub use manager::PlaybackManager;
pub use pipeline::StreamPipeline;
pub use state::PlayerStateSnapshot;
