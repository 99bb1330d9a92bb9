use super::*;
use crate::core::StreamFlags;
use crate::player::demuxer_source::DemuxStream;
use crate::player::edl::Cut;
use crate::player::input::{NavEvent, NextStream};
use crate::player::memory::{
    MemoryChannel, MemoryDemuxer, MemoryFactory, MemoryInput, MemoryNavigator, PipelineProbe, RecordingCallback,
    RecordingPipeline,
};
use crate::player::messages::{Action, PlayerMessage, SeekRequest};
use crate::player::pipeline::PipelineMessage;

fn ms(value: f64) -> f64 {
    msec_to_time(value)
}

/// 一路视频一路音频，交错排列
fn av_demuxer(name: &str, length_ms: i64, count: usize, step_ms: f64) -> MemoryDemuxer {
    let mut demuxer = MemoryDemuxer::new(name, length_ms);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "h264"));
    demuxer.add_stream(DemuxStream::new(1, StreamType::Audio, "aac"));
    for i in 0..count {
        let t = i as f64 * step_ms;
        demuxer.push_packets(0, &[t], step_ms);
        demuxer.push_packets(1, &[t], step_ms);
    }
    demuxer
}

struct Harness {
    engine: Engine,
    handles: EngineHandles,
    audio: PipelineProbe,
    video: PipelineProbe,
    subtitle: PipelineProbe,
    callback: RecordingCallback,
}

impl Harness {
    fn new(factory: MemoryFactory) -> Self {
        Self::build(factory, MediaItem::new("movie.mkv"), PlayerSettings::default(), Box::new(Edl::default()))
    }

    fn build(factory: MemoryFactory, item: MediaItem, settings: PlayerSettings, cut_list: Box<dyn CutList>) -> Self {
        let handles = EngineHandles::new(PlaybackClock::manual());
        let (audio, audio_probe) = RecordingPipeline::with_queue(StreamType::Audio, handles.queue.clone());
        let (video, video_probe) = RecordingPipeline::with_queue(StreamType::Video, handles.queue.clone());
        let (subtitle, subtitle_probe) = RecordingPipeline::with_queue(StreamType::Subtitle, handles.queue.clone());
        let callback = RecordingCallback::new();

        let ctx = EngineContext::new(
            item,
            settings,
            Box::new(factory),
            Box::new(audio),
            Box::new(video),
            Box::new(subtitle),
        )
        .with_cut_list(cut_list)
        .with_callback(Arc::new(callback.clone()));

        Self {
            engine: Engine::new(ctx, handles.clone()),
            handles,
            audio: audio_probe,
            video: video_probe,
            subtitle: subtitle_probe,
            callback,
        }
    }

    fn tick_n(&mut self, n: usize) {
        for _ in 0..n {
            self.engine.tick();
        }
    }

    fn run(&mut self, max_ticks: usize) -> Option<FinishReason> {
        for _ in 0..max_ticks {
            if let TickOutcome::Finished(reason) = self.engine.tick() {
                return Some(reason);
            }
        }
        None
    }

    fn put(&self, msg: PlayerMessage) {
        self.handles.queue.put(msg);
    }
}

#[test]
fn test_simple_playback() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 10_000, 50, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();

    let snapshot = h.handles.shared.snapshot();
    assert!(snapshot.has_video);
    assert!(snapshot.has_audio);
    assert_eq!(snapshot.audio_streams.len(), 1);
    assert!(snapshot.subtitle_streams.is_empty());
    assert_eq!(snapshot.time_total, 10_000.0);

    h.tick_n(2);
    assert_eq!(h.handles.shared.caching(), CachingState::Done);

    assert_eq!(h.run(1000), Some(FinishReason::Ended));
    assert_eq!(h.video.packets().len(), 50);
    assert_eq!(h.audio.packets().len(), 50);

    // 重同步在第一个数据包之前
    let messages = h.video.messages();
    let resync = messages
        .iter()
        .position(|m| matches!(m, PipelineMessage::Resync { .. }))
        .unwrap();
    let first_packet = messages
        .iter()
        .position(|m| matches!(m, PipelineMessage::Packet { .. }))
        .unwrap();
    assert!(resync < first_packet);
    assert!(messages.iter().any(|m| matches!(m, PipelineMessage::Eof)));

    let events = h.callback.events();
    assert_eq!(events.first().map(String::as_str), Some("started"));
    assert_eq!(events.last().map(String::as_str), Some("ended"));
}

#[test]
fn test_startup_fails_without_demuxer() {
    let factory = MemoryFactory::new().with_input(MemoryInput::new("broken.mkv"));
    let mut h = Harness::new(factory);
    assert!(h.engine.startup().is_err());
    assert!(h.handles.abort.load(Ordering::SeqCst));
    assert_eq!(h.run(1), Some(FinishReason::Aborted));
    assert_eq!(h.callback.events(), vec!["stopped".to_string()]);
}

#[test]
fn test_negative_seek_is_clamped_to_zero() {
    let demuxer = av_demuxer("movie.mkv", 10_000, 100, 40.0);
    let seeks = demuxer.seek_log();
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(5);

    h.put(PlayerMessage::Seek(SeekRequest::new(-500)));
    h.tick_n(1);
    assert_eq!(*seeks.lock(), vec![0]);
}

#[test]
fn test_seek_requests_are_coalesced() {
    let demuxer = av_demuxer("movie.mkv", 10_000, 100, 40.0);
    let seeks = demuxer.seek_log();
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(5);
    h.video.clear_messages();

    for time in [1000, 2000, 3000] {
        h.put(PlayerMessage::Seek(SeekRequest::new(time)));
    }
    h.tick_n(10);

    assert_eq!(*seeks.lock(), vec![3000]);
    assert!(h.video.with(|s| s.flushes) >= 1);
    let packets = h.video.packets();
    assert!(!packets.is_empty());
    assert!(packets.iter().all(|(dts, _)| dts.unwrap() >= ms(3000.0)));
}

#[test]
fn test_rejected_codec_disables_stream() {
    let mut demuxer = MemoryDemuxer::new("movie.mkv", 2000);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "h264"));
    demuxer.add_stream(DemuxStream::new(1, StreamType::Audio, "dts"));
    for i in 0..50 {
        let t = i as f64 * 40.0;
        demuxer.push_packets(0, &[t], 40.0);
        demuxer.push_packets(1, &[t], 40.0);
    }
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.audio.with(|s| s.reject_codecs.push("dts".into()));

    h.engine.startup().unwrap();
    assert!(!h.engine.current_audio.is_open());
    assert_eq!(h.run(1000), Some(FinishReason::Ended));

    assert_eq!(h.audio.open_attempts(), 1);
    assert!(h.audio.packets().is_empty());
    assert_eq!(h.video.packets().len(), 50);
}

#[test]
fn test_forward_jump_is_absorbed() {
    let mut demuxer = MemoryDemuxer::new("jump.ts", 6000);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "mpeg2video"));
    demuxer.push_packets(0, &[0.0, 40.0, 80.0, 5080.0, 5120.0], 40.0);
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("jump.ts"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    assert_eq!(h.run(100), Some(FinishReason::Ended));

    let dts: Vec<Option<f64>> = h.video.packets().into_iter().map(|(dts, _)| dts).collect();
    let expected: Vec<Option<f64>> = [0.0, 40.0, 80.0, 120.0, 160.0].iter().map(|t| Some(ms(*t))).collect();
    assert_eq!(dts, expected);
    assert_eq!(h.engine.offset_pts, ms(4960.0));
}

#[test]
fn test_end_of_stream_waits_for_pipelines_to_drain() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 1000, 10, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.video.with(|s| s.has_data = true);

    for _ in 0..200 {
        assert!(!matches!(h.engine.tick(), TickOutcome::Finished(_)));
    }
    assert_eq!(h.handles.shared.caching(), CachingState::Done);
    assert!(h.video.messages().iter().any(|m| matches!(m, PipelineMessage::Eof)));

    h.video.with(|s| s.has_data = false);
    assert_eq!(h.engine.tick(), TickOutcome::Finished(FinishReason::Ended));
}

#[test]
fn test_subtitle_demuxer_does_not_starve_primary() {
    let mut primary = MemoryDemuxer::new("movie.mkv", 10_000);
    primary.add_stream(DemuxStream::new(0, StreamType::Video, "h264"));
    let times: Vec<f64> = (0..200).map(|i| i as f64 * 40.0).collect();
    primary.push_packets(0, &times, 40.0);

    let mut vobsub = MemoryDemuxer::new("movie.idx", 10_000);
    vobsub.add_stream(DemuxStream::new(0, StreamType::Subtitle, "dvdsub"));
    let times: Vec<f64> = (0..1000).map(|i| i as f64 * 5.0).collect();
    vobsub.push_packets(0, &times, 5.0);

    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(primary)
        .with_subtitle_demuxer(vobsub);
    let mut item = MediaItem::new("movie.mkv");
    item.subtitles = vec!["movie.idx".into(), "movie.sub".into()];
    let mut h = Harness::build(factory, item, PlayerSettings::default(), Box::new(Edl::default()));
    h.engine.startup().unwrap();

    // .sub 跟着 .idx，只登记一条
    assert_eq!(h.handles.shared.snapshot().subtitle_streams.len(), 1);
    assert!(h.engine.current_subtitle.is_open());

    h.tick_n(90);
    assert!(h.video.packets().len() >= 9);
    assert!(!h.subtitle.packets().is_empty());
}

#[test]
fn test_text_subtitle_has_no_packets() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 1000, 10, 40.0));
    let mut item = MediaItem::new("movie.mkv");
    item.subtitles = vec!["/subs/movie.srt".into()];
    let mut h = Harness::build(factory, item, PlayerSettings::default(), Box::new(Edl::default()));
    h.engine.startup().unwrap();

    let snapshot = h.handles.shared.snapshot();
    assert_eq!(snapshot.subtitle_streams.len(), 1);
    assert_eq!(snapshot.subtitle_streams[0].name, "movie.srt");
    assert!(h.engine.current_subtitle.is_open());
    assert_eq!(h.engine.current_subtitle.token, None);
    let opened = h.subtitle.with(|s| s.opened.clone());
    assert_eq!(opened[0].filename.as_deref(), Some("/subs/movie.srt"));
}

#[test]
fn test_set_audio_stream_reopens_and_seeks() {
    let mut demuxer = av_demuxer("movie.mkv", 10_000, 100, 40.0);
    let mut surround = DemuxStream::new(2, StreamType::Audio, "ac3");
    surround.channels = 6;
    demuxer.add_stream(surround);
    let seeks = demuxer.seek_log();
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();

    // 声道多的优先
    assert_eq!(h.engine.current_audio.id, 2);
    h.tick_n(5);

    h.put(PlayerMessage::SetAudioStream(0));
    h.tick_n(2);
    assert_eq!(h.engine.current_audio.id, 1);
    assert_eq!(seeks.lock().len(), 1);
}

#[test]
fn test_trickplay_catches_up_with_seek() {
    let demuxer = av_demuxer("movie.mkv", 10_000, 250, 40.0);
    let seeks = demuxer.seek_log();
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(10);

    h.put(PlayerMessage::SetSpeed(4 * PLAYSPEED_NORMAL));
    h.tick_n(1);
    assert_eq!(h.handles.shared.play_speed(), 4000);
    assert!(h.callback.events().contains(&"speed 4".to_string()));

    // 视频停在 0，时钟已经走到 8 秒
    h.video.with(|s| s.current_pts = Some(0.0));
    h.handles.clock.advance(ms(2000.0));
    h.tick_n(2);

    let log = seeks.lock().clone();
    assert_eq!(log.len(), 1);
    assert!(log[0] > 2000);
}

#[test]
fn test_edl_mute_toggles_silence_once() {
    let edl = Edl::new(
        vec![Cut {
            start: 1000,
            end: 2000,
            action: CutAction::Mute,
        }],
        Vec::new(),
    );
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 4000, 40, 100.0));
    let mut h = Harness::build(factory, MediaItem::new("movie.mkv"), PlayerSettings::default(), Box::new(edl));
    h.engine.startup().unwrap();
    assert_eq!(h.run(1000), Some(FinishReason::Ended));

    let silence: Vec<bool> = h
        .audio
        .messages()
        .iter()
        .filter_map(|m| match m {
            PipelineMessage::Silence(on) => Some(*on),
            _ => None,
        })
        .collect();
    assert_eq!(silence, vec![true, false]);
}

#[test]
fn test_cut_is_skipped_automatically() {
    let edl = Edl::new(
        vec![Cut {
            start: 1000,
            end: 3000,
            action: CutAction::Cut,
        }],
        Vec::new(),
    );
    let demuxer = av_demuxer("movie.mkv", 6000, 60, 100.0);
    let seeks = demuxer.seek_log();
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::build(factory, MediaItem::new("movie.mkv"), PlayerSettings::default(), Box::new(edl));
    h.engine.startup().unwrap();
    assert_eq!(h.run(1000), Some(FinishReason::Ended));

    assert_eq!(*seeks.lock(), vec![3000]);
    let packets = h.video.packets();
    assert!(packets
        .iter()
        .filter(|(dts, _)| dts.map(|d| d >= ms(1000.0) && d < ms(3000.0)).unwrap_or(false))
        .all(|(_, drop)| *drop));
    assert!(packets
        .iter()
        .any(|(dts, drop)| !*drop && dts.map(|d| d >= ms(3100.0)).unwrap_or(false)));
}

#[test]
fn test_far_seek_target_is_abandoned() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 10_000, 100, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();

    // 目标在 30 秒，实际包从 0 开始
    h.engine.flush_buffers(false, Some(ms(30_000.0)), true);
    h.tick_n(20);

    assert!(h.callback.events().contains(&"abandoned video".to_string()));
    let packets = h.video.packets();
    assert_eq!(packets.first(), Some(&(Some(0.0), false)));
}

fn live_settings() -> PlayerSettings {
    PlayerSettings {
        pvr_cache_in_player: false,
        ..Default::default()
    }
}

fn live_factory(channel: MemoryChannel) -> (MemoryFactory, Arc<parking_lot::Mutex<usize>>) {
    let mut input = MemoryInput::new("pvr://channels/1").with_channel(channel);
    input.next_streams.push_back(NextStream::Open);
    let factory = MemoryFactory::new()
        .with_input(input)
        .with_demuxer(av_demuxer("pvr://channels/1", 0, 200, 40.0))
        .with_demuxer(av_demuxer("pvr://channels/2", 0, 200, 40.0));
    let created = factory.created_counter();
    (factory, created)
}

#[test]
fn test_channel_next_recreates_demuxer() {
    let (factory, created) = live_factory(MemoryChannel::new(vec![1, 2, 3]));
    let mut h = Harness::build(factory, MediaItem::new("pvr://channels/1"), live_settings(), Box::new(Edl::default()));
    h.engine.startup().unwrap();
    assert!(h.handles.shared.snapshot().can_record);
    h.tick_n(3);

    h.put(PlayerMessage::ChannelNext);
    h.tick_n(1);
    assert_eq!(*created.lock(), 2);
    assert!(!h.handles.abort.load(Ordering::SeqCst));
}

#[test]
fn test_channel_preview_switches_after_timeout() {
    let (factory, created) = live_factory(MemoryChannel::new(vec![1, 2, 3]));
    let settings = PlayerSettings {
        channel_entry_timeout_ms: 500,
        ..live_settings()
    };
    let mut h = Harness::build(factory, MediaItem::new("pvr://channels/1"), settings, Box::new(Edl::default()));
    h.engine.startup().unwrap();
    h.tick_n(3);

    h.put(PlayerMessage::ChannelNext);
    h.tick_n(1);
    assert_eq!(*created.lock(), 1);
    assert!(h.engine.channel_entry_deadline.is_some());

    h.handles.clock.advance(ms(600.0));
    h.tick_n(2);
    assert_eq!(*created.lock(), 2);
    assert!(h.engine.channel_entry_deadline.is_none());
}

#[test]
fn test_failed_channel_switch_stops_playback() {
    let channel = MemoryChannel {
        fail: true,
        ..MemoryChannel::new(vec![1, 2])
    };
    let (factory, _) = live_factory(channel);
    let mut h = Harness::build(factory, MediaItem::new("pvr://channels/1"), live_settings(), Box::new(Edl::default()));
    h.engine.startup().unwrap();
    h.tick_n(2);

    h.put(PlayerMessage::GuiAction(Action::MoveUp));
    assert_eq!(h.run(5), Some(FinishReason::Aborted));
    assert!(h.callback.events().contains(&"stopped".to_string()));
}

#[test]
fn test_navigator_still_frame_and_menu() {
    let navigator = MemoryNavigator {
        in_menu: true,
        events: [NavEvent::StillFrame(2)].into_iter().collect(),
        ..Default::default()
    };
    let calls = navigator.calls.clone();
    let mut input = MemoryInput::new("dvd://disc").with_navigator(navigator);
    input.next_streams = std::iter::repeat(NextStream::Retry).take(50).collect();

    let mut demuxer = MemoryDemuxer::new("dvd://disc", 60_000);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "mpeg2video"));
    demuxer.push_packets(0, &[0.0, 40.0, 80.0, 120.0], 40.0);
    let factory = MemoryFactory::new().with_input(input).with_demuxer(demuxer);

    let mut h = Harness::build(factory, MediaItem::new("dvd://disc"), PlayerSettings::default(), Box::new(Edl::default()));
    h.engine.startup().unwrap();
    // 导航源不自动选流，视频由路由打开
    assert!(!h.engine.current_video.is_open());

    h.tick_n(8);
    assert!(h.engine.current_video.is_open());
    assert_eq!(h.engine.nav.mode, NavMode::Still);
    assert_eq!(h.engine.nav.still_time_ms, 2000);
    assert!(!calls.lock().contains(&"skip_still".to_string()));

    h.handles.clock.advance(ms(2500.0));
    h.tick_n(1);
    assert!(calls.lock().contains(&"skip_still".to_string()));
    assert_eq!(h.engine.nav.mode, NavMode::Normal);

    h.put(PlayerMessage::GuiAction(Action::MoveLeft));
    h.put(PlayerMessage::GuiAction(Action::Number(3)));
    h.tick_n(1);
    let calls = calls.lock().clone();
    assert!(calls.contains(&"left".to_string()));
    assert!(calls.contains(&"select 3".to_string()));
}

#[test]
fn test_add_subtitle_message_registers_text_stream() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 1000, 10, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();

    h.put(PlayerMessage::AddSubtitle("extra.ass".into()));
    h.tick_n(1);
    assert_eq!(h.engine.streams.count(StreamType::Subtitle), 1);
    assert_eq!(
        h.engine.add_subtitle_file("missing.idx", "", StreamFlags::default()),
        -1
    );
}

/// 改写 demuxer 里某个流的编码并记一次格式变化
fn change_codec(h: &mut Harness, id: i32, codec: &str) {
    let stream = h.engine.demuxer.as_mut().and_then(|d| d.stream_mut(id)).unwrap();
    stream.codec = codec.into();
    stream.changes += 1;
}

#[test]
fn test_backward_jump_is_corrected() {
    let mut demuxer = MemoryDemuxer::new("loop.ts", 6000);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "mpeg2video"));
    demuxer.push_packets(0, &[0.0, 40.0, 80.0, 120.0, 0.0, 40.0, 150.0, 140.0], 40.0);
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("loop.ts"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    assert_eq!(h.run(100), Some(FinishReason::Ended));

    // 回到 0 的重叠被校正；最后一个包只是小幅回绕，不校正
    let dts: Vec<Option<f64>> = h.video.packets().into_iter().map(|(dts, _)| dts).collect();
    let expected: Vec<Option<f64>> = [0.0, 40.0, 80.0, 120.0, 160.0, 200.0, 310.0, 300.0]
        .iter()
        .map(|t| Some(ms(*t)))
        .collect();
    assert_eq!(dts, expected);
    assert_eq!(h.engine.offset_pts, ms(-160.0));
}

#[test]
fn test_disabled_stream_is_never_better() {
    let mut demuxer = MemoryDemuxer::new("movie.mkv", 2000);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "h264"));
    demuxer.add_stream(DemuxStream::new(1, StreamType::Audio, "dts"));
    for i in 0..50 {
        let t = i as f64 * 40.0;
        demuxer.push_packets(0, &[t], 40.0);
        demuxer.push_packets(1, &[t], 40.0);
    }
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.audio.with(|s| s.reject_codecs.push("dts".into()));
    h.engine.startup().unwrap();

    let stream = h.engine.demuxer.as_ref().and_then(|d| d.stream(1)).cloned().unwrap();
    assert!(stream.disabled);
    assert!(!h.engine.current_audio.is_open());
    assert!(!h.engine.is_better_stream(StreamType::Audio, &stream));

    // 同一个流没被禁用时，音频游标空着就会接手
    let mut usable = stream.clone();
    usable.disabled = false;
    assert!(h.engine.is_better_stream(StreamType::Audio, &usable));

    h.tick_n(40);
    assert_eq!(h.audio.open_attempts(), 1);
    assert!(!h.engine.current_audio.is_open());
    assert!(h.audio.packets().is_empty());
}

#[test]
fn test_starved_pipeline_starts_caching() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 8000, 200, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(6);
    assert_eq!(h.handles.shared.caching(), CachingState::Done);
    assert!(h.engine.current_video.inited);

    // 音频还有很多数据，视频卡住只算单流卡顿
    h.video.with(|s| s.stalled = true);
    h.audio.with(|s| s.level = 80);
    h.tick_n(4);
    assert_eq!(h.handles.shared.caching(), CachingState::Done);

    h.audio.with(|s| s.level = 0);
    h.tick_n(2);
    assert_eq!(h.handles.shared.caching(), CachingState::Full);
}

#[test]
fn test_starved_uninitialised_stream_caches_from_init() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 8000, 200, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(6);
    assert_eq!(h.handles.shared.caching(), CachingState::Done);

    // 不清空缓冲的 seek 只让游标重新初始化，缓冲状态不变
    h.video.with(|s| s.stalled = true);
    h.put(PlayerMessage::Seek(SeekRequest {
        time_ms: 2000,
        backward: true,
        flush: false,
        accurate: true,
        restore: false,
        trickplay: true,
    }));
    h.tick_n(1);
    assert_eq!(h.handles.shared.caching(), CachingState::Init);
}

#[test]
fn test_format_change_reopens_stream() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 4000, 100, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(10);
    assert_eq!(h.audio.open_attempts(), 1);
    let before = h.audio.packets().len();

    change_codec(&mut h, 1, "ac3");
    h.tick_n(10);

    assert_eq!(h.audio.open_attempts(), 2);
    assert_eq!(h.audio.with(|s| s.opened[1].codec.clone()), "ac3");
    assert_eq!(h.engine.current_audio.hint.codec, "ac3");
    assert_eq!(h.engine.current_audio.changes, 1);
    assert!(h.audio.packets().len() > before);
}

#[test]
fn test_stream_disabled_mid_playback_gets_no_packets() {
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("movie.mkv"))
        .with_demuxer(av_demuxer("movie.mkv", 4000, 100, 40.0));
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    h.tick_n(10);
    let before = h.audio.packets().len();
    assert!(before > 0);

    h.audio.with(|s| s.reject_codecs.push("dts".into()));
    change_codec(&mut h, 1, "dts");
    h.tick_n(40);

    let disabled = h.engine.demuxer.as_ref().and_then(|d| d.stream(1)).map(|s| s.disabled);
    assert_eq!(disabled, Some(true));
    assert!(!h.engine.current_audio.is_open());
    assert_eq!(h.audio.open_attempts(), 2);
    assert!(h.audio.with(|s| s.closed) >= 1);
    assert_eq!(h.audio.packets().len(), before);

    assert_eq!(h.run(1000), Some(FinishReason::Ended));
    assert_eq!(h.audio.packets().len(), before);
    assert_eq!(h.video.packets().len(), 100);
}

#[test]
fn test_teletext_is_registered_but_not_routed() {
    let mut demuxer = MemoryDemuxer::new("broadcast.ts", 2000);
    demuxer.add_stream(DemuxStream::new(0, StreamType::Video, "mpeg2video"));
    demuxer.add_stream(DemuxStream::new(2, StreamType::Teletext, "dvb_teletext"));
    demuxer.push_packets(2, &[0.0, 40.0, 80.0], 40.0);
    demuxer.push_packets(0, &[0.0, 40.0, 80.0, 120.0], 40.0);
    let factory = MemoryFactory::new()
        .with_input(MemoryInput::new("broadcast.ts"))
        .with_demuxer(demuxer);
    let mut h = Harness::new(factory);
    h.engine.startup().unwrap();
    assert_eq!(h.engine.streams.count(StreamType::Teletext), 1);

    h.tick_n(5);
    let discard = h.engine.demuxer.as_ref().and_then(|d| d.stream(2)).map(|s| s.discard);
    assert_eq!(discard, Some(true));
    assert!(h.audio.packets().is_empty());
    assert!(h.subtitle.packets().is_empty());
    assert!(!h.video.packets().is_empty());
}
