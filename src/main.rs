use anyhow::Result;
use log::info;
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use myy_playback::core::{MediaItem, PlayerSettings, StreamType};
use myy_playback::player::demuxer_source::DemuxStream;
use myy_playback::player::memory::{MemoryDemuxer, MemoryFactory, MemoryInput, RecordingPipeline};
use myy_playback::player::{Edl, EngineContext, PlaybackManager, PlayerCallback};

/// 把播放事件打到日志里
struct LogCallback;

impl PlayerCallback for LogCallback {
    fn on_playback_started(&self) {
        info!("▶️ 开始播放");
    }

    fn on_playback_ended(&self) {
        info!("🏁 播放完毕");
    }

    fn on_playback_stopped(&self) {
        info!("⏹️ 播放停止");
    }

    fn on_playback_seek(&self, time_ms: i64, offset_ms: i64) {
        info!("🎯 Seek 到 {} ms (偏移 {} ms)", time_ms, offset_ms);
    }

    fn on_seek_target_abandoned(&self, stream: StreamType, target: f64, dts: f64) {
        info!("⚠️ {} 流放弃 seek 目标 {:.0} (dts {:.0})", stream.as_str(), target, dts);
    }
}

/// 合成一段 10 秒的音视频
fn synthetic_demuxer(path: &str) -> MemoryDemuxer {
    let mut demuxer = MemoryDemuxer::new(path, 10_000);
    let mut video = DemuxStream::new(0, StreamType::Video, "h264");
    video.width = 1920;
    video.height = 1080;
    video.fps_rate = 25;
    video.fps_scale = 1;
    demuxer.add_stream(video);

    let mut audio = DemuxStream::new(1, StreamType::Audio, "aac");
    audio.channels = 2;
    audio.sample_rate = 48_000;
    audio.language = "eng".into();
    demuxer.add_stream(audio);

    for i in 0..250 {
        let t = i as f64 * 40.0;
        demuxer.push_packets(0, &[t], 40.0);
        demuxer.push_packets(1, &[t], 40.0);
    }
    demuxer.add_chapter("开头", 0);
    demuxer.add_chapter("正片", 5_000);
    demuxer
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Playback 演示启动");

    // 参数: [设置 JSON] [剪辑列表 JSON]
    let mut args = env::args().skip(1);
    let settings = match args.next() {
        Some(path) => PlayerSettings::load(path)?,
        None => PlayerSettings::default(),
    };
    let cut_list = match args.next() {
        Some(path) => Edl::load(path)?,
        None => Edl::default(),
    };

    let path = "demo://synthetic.mkv";
    let mut manager = PlaybackManager::new();
    let queue = manager.message_queue();
    let (audio, _) = RecordingPipeline::with_queue(StreamType::Audio, queue.clone());
    let (video, video_probe) = RecordingPipeline::with_queue(StreamType::Video, queue.clone());
    let (subtitle, _) = RecordingPipeline::with_queue(StreamType::Subtitle, queue);

    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new(path))
        .with_demuxer(synthetic_demuxer(path));
    let ctx = EngineContext::new(
        MediaItem::new(path),
        settings,
        Box::new(factory),
        Box::new(audio),
        Box::new(video),
        Box::new(subtitle),
    )
    .with_cut_list(Box::new(cut_list))
    .with_callback(Arc::new(LogCallback));

    manager.open_file(ctx)?;
    info!(
        "📊 总时长 {} ms, 音轨 {} 条, 章节 {} 个",
        manager.total_time(),
        manager.audio_stream_count(),
        manager.chapter_count()
    );

    manager.seek_time(5_000);
    while manager.is_playing() {
        thread::sleep(Duration::from_millis(10));
    }

    let reason = manager.close_file();
    info!("✅ 会话结束: {:?}, 视频管线收到 {} 个包", reason, video_probe.packets().len());
    println!("{}", serde_json::to_string_pretty(&manager.snapshot())?);
    Ok(())
}
