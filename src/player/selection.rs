use crate::core::{PlayerSettings, SourceKind, StreamFlags, StreamSource, StreamSummary, StreamType};
use crate::player::demuxer_source::DemuxerSource;
use crate::player::input::InputStream;
use log::{debug, error};
use std::cmp::Ordering;

/// 注册表中的一个基本流
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionStream {
    pub stream_type: StreamType,
    /// 同类型内的稠密序号，对外寻址用
    pub type_index: usize,
    pub filename: String,
    pub filename2: String,
    pub language: String,
    pub name: String,
    pub codec: String,
    pub channels: u32,
    pub flags: StreamFlags,
    pub source: StreamSource,
    pub id: i32,
}

impl SelectionStream {
    /// 找不到时返回的哨兵
    pub fn invalid() -> Self {
        Self {
            id: -1,
            ..Default::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.stream_type != StreamType::None
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            name: self.name.clone(),
            language: self.language.clone(),
            codec: self.codec.clone(),
            channels: self.channels,
        }
    }
}

/// 选择流注册表
///
/// 由播放线程独占。`(type, source, id)` 唯一，`type_index` 按类型稠密编号。
#[derive(Debug, Default)]
pub struct SelectionStreams {
    streams: Vec<SelectionStream>,
    invalid: SelectionStream,
}

impl SelectionStreams {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            invalid: SelectionStream::invalid(),
        }
    }

    /// 按类型和来源类型批量清除，`None` 表示不过滤
    pub fn clear(&mut self, kind: StreamType, source: SourceKind) {
        self.streams.retain(|s| {
            let type_match = kind == StreamType::None || s.stream_type == kind;
            let source_match = source == SourceKind::None || s.source.kind == source;
            !(type_match && source_match)
        });
        self.renumber();
    }

    // 删除后重新压实每种类型的序号
    fn renumber(&mut self) {
        for kind in [StreamType::Audio, StreamType::Video, StreamType::Subtitle, StreamType::Teletext] {
            let mut next = 0;
            for s in self.streams.iter_mut().filter(|s| s.stream_type == kind) {
                s.type_index = next;
                next += 1;
            }
        }
    }

    pub fn get(&self, kind: StreamType, index: i32) -> &SelectionStream {
        if index >= 0 {
            if let Some(s) = self.of_type(kind).nth(index as usize) {
                return s;
            }
        }
        error!("SelectionStreams::get - failed to get stream {} of type {}", index, kind.as_str());
        &self.invalid
    }

    pub fn get_mut(&mut self, kind: StreamType, index: i32) -> Option<&mut SelectionStream> {
        if index < 0 {
            return None;
        }
        self.streams
            .iter_mut()
            .filter(|s| s.stream_type == kind)
            .nth(index as usize)
    }

    fn of_type(&self, kind: StreamType) -> impl Iterator<Item = &SelectionStream> {
        self.streams.iter().filter(move |s| s.stream_type == kind)
    }

    /// 某类型的流按优先级从高到低排列，同级保持注册顺序
    pub fn by_priority<F>(&self, kind: StreamType, better: F) -> Vec<SelectionStream>
    where
        F: Fn(&SelectionStream, &SelectionStream) -> Ordering,
    {
        let mut streams: Vec<SelectionStream> = self.of_type(kind).cloned().collect();
        streams.sort_by(|a, b| better(b, a));
        streams
    }

    /// 同类型中的序号；`id < 0` 时返回该类型最后一个的序号
    pub fn index_of(&self, kind: StreamType, source: StreamSource, id: i32) -> i32 {
        let mut count = -1;
        for s in self.of_type(kind) {
            count += 1;
            if !source.is_none() && s.source != source {
                continue;
            }
            if id < 0 {
                continue;
            }
            if s.id == id {
                return count;
            }
        }
        if id < 0 {
            count
        } else {
            -1
        }
    }

    /// 取得来源：文件名相同则复用，否则分配下一个序号
    pub fn source(&self, kind: SourceKind, filename: &str) -> StreamSource {
        let mut next = 0u16;
        for s in self.streams.iter().filter(|s| s.source.kind == kind) {
            if !filename.is_empty() && s.filename == filename {
                return s.source;
            }
            next = next.max(s.source.index + 1);
        }
        StreamSource::new(kind, next)
    }

    /// 按 `(type, source, id)` 插入或原地更新，更新时保留 `type_index`
    pub fn update(&mut self, mut stream: SelectionStream) {
        if let Some(existing) = self
            .streams
            .iter_mut()
            .find(|s| s.stream_type == stream.stream_type && s.source == stream.source && s.id == stream.id)
        {
            stream.type_index = existing.type_index;
            *existing = stream;
            return;
        }
        stream.type_index = self.count(stream.stream_type);
        debug!(
            "注册{}流: id={} source={:?} index={}",
            stream.stream_type.as_str(),
            stream.id,
            stream.source,
            stream.type_index
        );
        self.streams.push(stream);
    }

    /// 从导航器或 demuxer 同步流列表
    ///
    /// 有 input 时 demuxer 视为主 demuxer，否则视为字幕 demuxer。
    /// demuxer 流的 source 会被回写。
    pub fn update_from(
        &mut self,
        input: Option<&dyn InputStream>,
        demuxer: Option<&mut (dyn DemuxerSource + 'static)>,
    ) {
        if let Some(nav) = input.and_then(|i| i.navigator_ref()) {
            let filename = input.map(|i| i.file_name()).unwrap_or_default();
            let source = self.source(SourceKind::Nav, &filename);

            for i in 0..nav.audio_stream_count() {
                let language = nav.audio_stream_language(i);
                self.update(SelectionStream {
                    stream_type: StreamType::Audio,
                    source,
                    id: i,
                    name: language.clone(),
                    language,
                    filename: filename.clone(),
                    ..Default::default()
                });
            }
            for i in 0..nav.subtitle_stream_count() {
                let language = nav.subtitle_stream_language(i);
                self.update(SelectionStream {
                    stream_type: StreamType::Subtitle,
                    source,
                    id: i,
                    name: language.clone(),
                    language,
                    filename: filename.clone(),
                    ..Default::default()
                });
            }

            // 导航源的 demuxer 流不入表，只回写来源供路由比较
            if let Some(demuxer) = demuxer {
                let source = self.source(SourceKind::Demux, &demuxer.file_name());
                for id in demuxer.stream_ids() {
                    if let Some(stream) = demuxer.stream_mut(id) {
                        stream.source = source;
                    }
                }
            }
        } else if let Some(demuxer) = demuxer {
            let filename = demuxer.file_name();
            let kind = if input.is_some() { SourceKind::Demux } else { SourceKind::DemuxSub };
            let source = self.source(kind, &filename);

            for id in demuxer.stream_ids() {
                let Some(stream) = demuxer.stream_mut(id) else {
                    continue;
                };
                stream.source = source;

                let mut name = stream.name.clone();
                if stream.kind() == StreamType::Audio {
                    if !name.is_empty() {
                        name.push_str(" - ");
                    }
                    name.push_str(&stream.stream_info());
                }
                let entry = SelectionStream {
                    stream_type: stream.kind(),
                    source,
                    id,
                    language: stream.language.clone(),
                    flags: stream.flags,
                    filename: filename.clone(),
                    name,
                    codec: stream.codec.clone(),
                    channels: stream.channels,
                    ..Default::default()
                };
                self.update(entry);
            }
        }
    }

    pub fn count(&self, kind: StreamType) -> usize {
        self.of_type(kind).count()
    }

    pub fn summaries(&self, kind: StreamType) -> Vec<StreamSummary> {
        self.of_type(kind).map(SelectionStream::summary).collect()
    }
}

/// 静态的编码偏好排名
pub fn codec_priority(codec: &str) -> i32 {
    match codec.to_ascii_lowercase().as_str() {
        "flac" | "wav" | "pcm" | "pcm_s16le" | "pcm_s24le" | "pcm_s32le" | "pcm_f32le" | "pcm_bluray" => 7,
        "truehd" => 6,
        "dtshd_ma" => 5,
        "dtshd_hra" => 4,
        "eac3" => 3,
        "dca" | "dts" => 2,
        "ac3" => 1,
        _ => 0,
    }
}

// true 优先
fn prefer(lh: bool, rh: bool) -> Ordering {
    lh.cmp(&rh)
}

fn language_matches(language: &str, preferred: &str) -> bool {
    !language.is_empty() && language.eq_ignore_ascii_case(preferred)
}

/// 音频流优先级：记住的序号 > 首选语言 > default > 声道数 > 编码排名
pub fn audio_priority(settings: &PlayerSettings) -> impl Fn(&SelectionStream, &SelectionStream) -> Ordering {
    let remembered = settings.audio_stream;
    let language = settings.audio_language.clone();
    move |lh, rh| {
        prefer(lh.type_index as i32 == remembered, rh.type_index as i32 == remembered)
            .then_with(|| {
                if language.eq_ignore_ascii_case("original") {
                    Ordering::Equal
                } else {
                    prefer(language_matches(&lh.language, &language), language_matches(&rh.language, &language))
                }
            })
            .then_with(|| prefer(lh.flags.default, rh.flags.default))
            .then_with(|| lh.channels.cmp(&rh.channels))
            .then_with(|| codec_priority(&lh.codec).cmp(&codec_priority(&rh.codec)))
    }
}

/// 字幕优先级
///
/// 字幕关闭时只看 forced 标志；否则依次看记住的序号、外挂源的语言、
/// 来源类型、语言和 default 标志。
pub fn subtitle_priority(settings: &PlayerSettings) -> impl Fn(&SelectionStream, &SelectionStream) -> Ordering {
    let remembered = settings.subtitle_stream;
    let language = settings.subtitle_language.clone();
    let subtitle_on = settings.subtitle_on;
    move |lh, rh| {
        let external = |s: &SelectionStream| matches!(s.source.kind, SourceKind::DemuxSub | SourceKind::Text);
        let lang = |s: &SelectionStream| language_matches(&s.language, &language);

        let forced = if subtitle_on {
            Ordering::Equal
        } else {
            prefer(lh.flags.forced, rh.flags.forced)
        };
        forced
            .then_with(|| prefer(lh.type_index as i32 == remembered, rh.type_index as i32 == remembered))
            .then_with(|| prefer(external(lh) && lang(lh), external(rh) && lang(rh)))
            .then_with(|| prefer(lh.source.kind == SourceKind::DemuxSub, rh.source.kind == SourceKind::DemuxSub))
            .then_with(|| prefer(lh.source.kind == SourceKind::Text, rh.source.kind == SourceKind::Text))
            .then_with(|| prefer(lang(lh), lang(rh)))
            .then_with(|| prefer(lh.flags.default, rh.flags.default))
    }
}

/// 视频优先级：只看 default 标志
pub fn video_priority() -> impl Fn(&SelectionStream, &SelectionStream) -> Ordering {
    |lh, rh| prefer(lh.flags.default, rh.flags.default)
}
