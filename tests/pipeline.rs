//! Pipeline integration tests.
//!
//! Runs are driven by the scripted engine in `tests/common` so every call
//! reaching the muxer can be checked.

mod common;

use std::time::{Duration, Instant};

use common::{
    Event, MockEngine, MockPacket, Script, assert_strictly_increasing, audio_packets, audio_stream,
    encoder, subtitle_stream, video_packets, video_stream,
};
use transpipe::{
    EncoderParameters, EngineError, MediaKind, Pipeline, Rational, StopReason, StreamDescriptor,
    TranscodeError, TranscodeOptions, TranscoderState,
};

fn av_script(video: usize, audio: usize) -> Script {
    Script::new(vec![video_stream(0), audio_stream(1)])
        .with_packets(vec![video_packets(0, video), audio_packets(1, audio)])
}

fn unbounded() -> TranscodeOptions {
    TranscodeOptions::new("input.mkv", "output.mkv").with_duration(None)
}

// ── End to end ─────────────────────────────────────────────────────

#[test]
fn window_with_seek_and_ceiling() {
    let (engine, recorder) = MockEngine::new(av_script(250, 469));
    let options = TranscodeOptions::new("input.mkv", "output.mkv")
        .with_start_time(Duration::from_secs(2))
        .with_duration(Some(Duration::from_secs(5)))
        .with_retries(50);

    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let recorder = recorder.borrow();

    assert_eq!(recorder.seeks, vec![2_000_000]);
    assert_eq!(recorder.events[0], Event::AvoidNegativeTimestamps);
    assert_eq!(
        recorder.added_streams(),
        vec![(0, "h264".to_string()), (1, "aac".to_string())]
    );
    assert_eq!(recorder.events[3], Event::Header);
    assert_eq!(recorder.events.last(), Some(&Event::Trailer));

    // The first frame of each stream after the seek point.
    assert_eq!(recorder.packets_after_header()[..2], [(0, 50), (1, 94 * 1_024)]);

    assert_eq!(summary.stop_reason, StopReason::DurationReached);
    assert!(summary.header_written);
    assert!(summary.trailer_written);
    assert!(!summary.retries_exhausted());

    let muxed = summary.muxed_duration.expect("video duration missing");
    assert!(
        (muxed.as_millis() as i64 - 5_000).abs() <= 40,
        "muxed {muxed:?}, expected 5s within one frame"
    );
    assert_eq!(recorder.packets(0).len(), 126);
    assert_eq!(recorder.packets(1).len(), 235);
    assert_strictly_increasing(&recorder);
}

#[test]
fn streams_report_final_state() {
    let (engine, _recorder) = MockEngine::new(av_script(10, 19));

    let summary = Pipeline::new(engine, unbounded()).run().expect("run failed");

    assert_eq!(summary.stop_reason, StopReason::EndOfInput);
    assert_eq!(summary.packets_read, 29);
    assert_eq!(summary.packets_muxed, 29);
    assert_eq!(summary.retries_remaining, transpipe::DEFAULT_RETRIES);
    assert_eq!(summary.streams.len(), 2);

    let video = &summary.streams[0];
    assert_eq!(video.kind, MediaKind::Video);
    assert_eq!(video.output_index, Some(0));
    assert_eq!(video.output_time_base, Some(Rational::new(1, 25)));
    assert_eq!(video.packets_written, 10);
    assert_eq!(video.state, TranscoderState::Closed);

    let audio = &summary.streams[1];
    assert_eq!(audio.output_time_base, Some(Rational::new(1, 48_000)));
    assert_eq!(audio.packets_written, 19);
}

#[test]
fn missing_audio_encoder_is_fatal() {
    let script =
        av_script(10, 19).with_encoders(vec![encoder("libx264", "h264", &["yuv420p"], &[])]);
    let (engine, recorder) = MockEngine::new(script);

    let error = Pipeline::new(engine, unbounded()).run().unwrap_err();

    assert!(
        matches!(
            error,
            TranscodeError::StreamSetup {
                stream: 1,
                kind: MediaKind::Audio,
                ..
            }
        ),
        "unexpected error: {error}"
    );
    assert_eq!(recorder.borrow().header_position(), None);
    assert_eq!(recorder.borrow().packet_count(), 0);
}

#[test]
fn excluded_audio_leaves_video_only() {
    let script =
        av_script(10, 19).with_encoders(vec![encoder("libx264", "h264", &["yuv420p"], &[])]);
    let (engine, recorder) = MockEngine::new(script);
    let options = unbounded().with_excluded_streams([1]);

    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let recorder = recorder.borrow();

    assert_eq!(summary.streams.len(), 1);
    assert_eq!(summary.streams[0].kind, MediaKind::Video);
    assert_eq!(recorder.added_streams(), vec![(0, "h264".to_string())]);
    assert_eq!(recorder.sends_to(1), 0);
    assert_eq!(recorder.packets(0).len(), 10);
}

#[test]
fn included_streams_filter_input() {
    let (engine, recorder) = MockEngine::new(av_script(10, 19));
    let options = unbounded().with_included_streams([1]);

    let summary = Pipeline::new(engine, options).run().expect("run failed");

    assert_eq!(summary.streams.len(), 1);
    assert_eq!(summary.streams[0].kind, MediaKind::Audio);
    assert_eq!(recorder.borrow().sends_to(0), 0);
}

#[test]
fn data_streams_are_ignored() {
    let data = StreamDescriptor::new(2, MediaKind::Data, "bin_data", Rational::new(1, 1_000));
    let script = Script::new(vec![video_stream(0), audio_stream(1), data]).with_packets(vec![
        video_packets(0, 5),
        audio_packets(1, 9),
        vec![MockPacket::new(2, 0, 10), MockPacket::new(2, 100, 10)],
    ]);
    let (engine, recorder) = MockEngine::new(script);

    let summary = Pipeline::new(engine, unbounded()).run().expect("run failed");

    assert_eq!(summary.streams.len(), 2);
    assert_eq!(summary.packets_read, 14);
    assert_eq!(recorder.borrow().added_streams().len(), 2);
}

#[test]
fn thumbnail_streams_do_not_keep_the_run_alive() {
    let mut thumbnail = video_stream(1);
    thumbnail.codec = "mjpeg".to_string();
    let mut script = Script::new(vec![video_stream(0), thumbnail]).with_packets(vec![
        video_packets(0, 250),
        vec![MockPacket::new(1, 0, 3_600)],
    ]);
    script.supported_codecs.insert("mjpeg".to_string());
    script.encoders.push(encoder("mjpeg", "mjpeg", &["yuv420p"], &[]));
    let (engine, recorder) = MockEngine::new(script);
    let options = TranscodeOptions::new("input.mkv", "output.mkv")
        .with_duration(Some(Duration::from_secs(2)));

    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let recorder = recorder.borrow();

    assert_eq!(summary.stop_reason, StopReason::DurationReached);
    // Reading stops right after the h264 stream crosses the ceiling.
    assert_eq!(summary.packets_read, 53);
    assert_eq!(recorder.packets(0).len(), 51);
    assert_eq!(recorder.packets(1).len(), 1);
    assert!(summary.trailer_written);
}

// ── Header and cache ───────────────────────────────────────────────

#[test]
fn nothing_is_written_before_the_header() {
    let script = av_script(10, 19).with_decoder_delay(0, 2);
    let (engine, recorder) = MockEngine::new(script);

    Pipeline::new(engine, unbounded()).run().expect("run failed");
    let recorder = recorder.borrow();

    let header = recorder.header_position().expect("header never written");
    assert!(
        recorder.events[..header]
            .iter()
            .all(|event| !matches!(event, Event::Packet { .. }))
    );

    // Audio was ready first; its packets were cached ahead of the first
    // video packet and come back out in that order.
    assert_eq!(
        recorder.packets_after_header()[..5],
        [(1, 0), (1, 1_024), (1, 2_048), (1, 3_072), (0, 0)]
    );
    assert_eq!(recorder.packets(0).len(), 10);
    assert_eq!(recorder.packets(1).len(), 19);
    assert_strictly_increasing(&recorder);
}

#[test]
fn cache_overflow_forces_eager_setup() {
    let script = av_script(10, 20).with_decoder_delay(0, usize::MAX);
    let (engine, recorder) = MockEngine::new(script);
    let options = unbounded().with_max_cached_packets(5);

    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let recorder = recorder.borrow();

    assert!(summary.header_written);
    let replayed = recorder.packets_after_header();
    let expected: Vec<(usize, i64)> = (0..6).map(|i| (1, i * 1_024)).collect();
    assert_eq!(replayed[..6], expected[..]);

    // The video encoder was configured from the stream metadata.
    let (name, parameters) = &recorder.encoders[1];
    assert_eq!(name, "libx264");
    let EncoderParameters::Video(video) = parameters else {
        panic!("expected video parameters, got {parameters:?}");
    };
    assert_eq!((video.width, video.height), (1280, 720));
    assert_eq!(video.pixel_format.name, "yuv420p");
    assert_eq!(video.frame_rate, Some(Rational::new(25, 1)));
    assert_eq!(video.time_base, Rational::new(1, 25));

    // Frames held back by the decoder still reach the output on drain.
    assert_eq!(recorder.packets(0).len(), 10);
    assert_eq!(recorder.packets(1).len(), 20);
    assert_strictly_increasing(&recorder);
}

#[test]
fn stream_without_frames_is_configured_at_end_of_input() {
    let script = Script::new(vec![video_stream(0), audio_stream(1)])
        .with_packets(vec![audio_packets(1, 10)]);
    let (engine, recorder) = MockEngine::new(script);
    let options = unbounded().with_max_cached_packets(1_000);

    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let recorder = recorder.borrow();

    assert!(summary.header_written);
    assert!(summary.trailer_written);
    assert_eq!(recorder.added_streams().len(), 2);
    assert_eq!(recorder.packets(0).len(), 0);
    assert_eq!(recorder.packets(1).len(), 10);
}

#[test]
fn empty_video_packets_are_skipped() {
    let mut packets = video_packets(0, 6);
    packets[3] = packets[3].clone().with_size(0);
    let script = Script::new(vec![video_stream(0)]).with_packets(vec![packets]);
    let (engine, recorder) = MockEngine::new(script);

    Pipeline::new(engine, unbounded()).run().expect("run failed");

    assert_eq!(recorder.borrow().sends_to(0), 5);
    assert_eq!(recorder.borrow().packets(0).len(), 5);
}

// ── Streaming ──────────────────────────────────────────────────────

fn four_seconds_of_video() -> Script {
    Script::new(vec![video_stream(0)]).with_packets(vec![video_packets(0, 100)])
}

#[test]
fn streaming_holds_output_near_real_time() {
    let (engine, recorder) = MockEngine::new(four_seconds_of_video());
    let options = unbounded().with_streaming(true);

    let started = Instant::now();
    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let elapsed = started.elapsed();

    assert_eq!(summary.stop_reason, StopReason::EndOfInput);
    assert_eq!(recorder.borrow().packets(0).len(), 100);
    assert!(elapsed >= Duration::from_millis(1_500), "finished in {elapsed:?}");
}

#[test]
fn without_streaming_output_is_not_paced() {
    let (engine, recorder) = MockEngine::new(four_seconds_of_video());

    let started = Instant::now();
    let summary = Pipeline::new(engine, unbounded()).run().expect("run failed");
    let elapsed = started.elapsed();

    assert_eq!(summary.stop_reason, StopReason::EndOfInput);
    assert_eq!(recorder.borrow().packets(0).len(), 100);
    assert!(elapsed < Duration::from_secs(1), "took {elapsed:?}");
}

// ── Timestamps ─────────────────────────────────────────────────────

#[test]
fn colliding_timestamps_are_bumped() {
    // 100 packets per second into a 25 fps encoder: several source ticks
    // land on the same destination tick.
    let mut stream = video_stream(0);
    stream.time_base = Rational::new(1, 1_000);
    let packets = (0..12).map(|i| MockPacket::new(0, i * 10, 10)).collect();
    let script = Script::new(vec![stream]).with_packets(vec![packets]);
    let (engine, recorder) = MockEngine::new(script);

    Pipeline::new(engine, unbounded()).run().expect("run failed");
    let recorder = recorder.borrow();

    let pts: Vec<i64> = recorder.packets(0).iter().map(|(pts, _)| *pts).collect();
    assert_eq!(pts, (0..12).collect::<Vec<i64>>());
    assert_strictly_increasing(&recorder);
}

#[test]
fn container_start_time_is_subtracted() {
    let mut script = Script::new(vec![video_stream(0)]);
    script.start_time = 1_000_000;
    let packets = (0..5)
        .map(|i| MockPacket::new(0, 90_000 + i * 3_600, 3_600))
        .collect();
    let script = script.with_packets(vec![packets]);
    let (engine, recorder) = MockEngine::new(script);

    Pipeline::new(engine, unbounded()).run().expect("run failed");

    let pts: Vec<i64> = recorder.borrow().packets(0).iter().map(|(pts, _)| *pts).collect();
    assert_eq!(pts, vec![0, 1, 2, 3, 4]);
}

#[test]
fn ceiling_follows_header_time_base() {
    let mut script = Script::new(vec![video_stream(0)]).with_packets(vec![video_packets(0, 50)]);
    script.header_time_base = Some(Rational::new(1, 1_000));
    let (engine, recorder) = MockEngine::new(script);
    let options = TranscodeOptions::new("input.mkv", "output.mkv")
        .with_duration(Some(Duration::from_secs(1)));

    let summary = Pipeline::new(engine, options).run().expect("run failed");
    let packets = recorder.borrow().packets(0);

    assert_eq!(summary.stop_reason, StopReason::DurationReached);
    assert_eq!(packets.len(), 26);
    assert_eq!(packets[1], (40, 40));
    assert_eq!(
        summary.streams[0].output_time_base,
        Some(Rational::new(1, 1_000))
    );
}

// ── Retry budget ───────────────────────────────────────────────────

#[test]
fn fatal_decode_error_stops_at_once() {
    let script = av_script(10, 19).with_decode_error(0, 2, EngineError::InvalidArgument);
    let (engine, recorder) = MockEngine::new(script);

    let summary = Pipeline::new(engine, unbounded()).run().expect("run failed");
    let recorder = recorder.borrow();

    // V0 A0 A1 V1: the second video packet fails and nothing else is read.
    assert_eq!(summary.packets_read, 4);
    assert_eq!(summary.stop_reason, StopReason::RetriesExhausted);
    assert!(summary.retries_exhausted());
    assert_eq!(summary.retries_remaining, 0);
    assert_eq!(recorder.sends_to(0), 2);
    assert_eq!(recorder.sends_to(1), 2);
}

#[test]
fn recoverable_errors_cost_one_retry_each() {
    let script = av_script(10, 19)
        .with_decode_error(0, 3, EngineError::other("corrupt frame"))
        .with_decode_error(0, 5, EngineError::other("corrupt frame"));
    let (engine, recorder) = MockEngine::new(script);

    let summary = Pipeline::new(engine, unbounded()).run().expect("run failed");

    assert_eq!(summary.stop_reason, StopReason::EndOfInput);
    assert_eq!(summary.retries_remaining, transpipe::DEFAULT_RETRIES - 2);
    assert_eq!(recorder.borrow().packets(0).len(), 8);
    assert_eq!(recorder.borrow().packets(1).len(), 19);
}

#[test]
fn spent_budget_ends_the_run() {
    let script = av_script(10, 19)
        .with_decode_error(0, 2, EngineError::other("corrupt frame"))
        .with_decode_error(0, 3, EngineError::other("corrupt frame"));
    let (engine, recorder) = MockEngine::new(script);
    let options = unbounded().with_retries(2);

    let summary = Pipeline::new(engine, options).run().expect("run failed");

    assert_eq!(summary.stop_reason, StopReason::RetriesExhausted);
    assert_eq!(recorder.borrow().sends_to(0), 3);
    assert!(summary.packets_read < 29);
}

#[test]
fn failed_writes_are_charged() {
    let mut script = av_script(10, 10);
    script.failing_writes = 3;
    let (engine, recorder) = MockEngine::new(script);
    let options = unbounded().with_retries(10);

    let summary = Pipeline::new(engine, options).run().expect("run failed");

    assert_eq!(summary.retries_remaining, 7);
    assert_eq!(summary.packets_muxed, 17);
    assert_eq!(recorder.borrow().packet_count(), 17);
}

#[test]
fn read_error_drains_and_finishes() {
    let mut script = av_script(10, 19);
    script.read_error_at = Some(8);
    let (engine, recorder) = MockEngine::new(script);

    let summary = Pipeline::new(engine, unbounded()).run().expect("run failed");

    assert!(matches!(summary.stop_reason, StopReason::ReadError(_)));
    assert_eq!(summary.packets_read, 8);
    assert_eq!(summary.packets_muxed, 8);
    assert!(summary.trailer_written);
    assert_eq!(recorder.borrow().events.last(), Some(&Event::Trailer));
}

// ── Setup failures ─────────────────────────────────────────────────

#[test]
fn invalid_options_touch_nothing() {
    let (engine, recorder) = MockEngine::new(av_script(10, 19));
    let options = unbounded().with_retries(0);

    let error = Pipeline::new(engine, options).run().unwrap_err();

    assert!(matches!(error, TranscodeError::InvalidOptions(_)));
    assert!(recorder.borrow().events.is_empty());
}

#[test]
fn unreadable_input() {
    let mut script = av_script(10, 19);
    script.fail_open_input = true;
    let (engine, _recorder) = MockEngine::new(script);

    let error = Pipeline::new(engine, unbounded()).run().unwrap_err();

    assert!(matches!(error, TranscodeError::InputOpen { .. }));
    assert!(error.to_string().contains("input.mkv"));
}

#[test]
fn subtitles_alone_are_not_enough() {
    let script = Script::new(vec![subtitle_stream(0, "subrip")])
        .with_packets(vec![vec![MockPacket::new(0, 0, 1_000)]]);
    let (engine, recorder) = MockEngine::new(script);

    let error = Pipeline::new(engine, unbounded()).run().unwrap_err();

    assert!(matches!(error, TranscodeError::NoAudioVideo));
    assert_eq!(recorder.borrow().header_position(), None);
}

#[test]
fn unsupported_video_codec_without_tag() {
    let mut script = av_script(10, 19);
    script.supported_codecs.remove("h264");
    let (engine, _recorder) = MockEngine::new(script);

    let error = Pipeline::new(engine, unbounded()).run().unwrap_err();

    assert!(matches!(
        error,
        TranscodeError::UnsupportedOutputCodec { stream: 0, .. }
    ));
}

#[test]
fn unsupported_video_codec_with_tag() {
    let mut script = av_script(10, 19);
    script.supported_codecs.remove("h264");
    script.codec_tags.insert("h264".to_string(), 0x3436_3248);
    let (engine, recorder) = MockEngine::new(script);

    Pipeline::new(engine, unbounded()).run().expect("run failed");

    let recorder = recorder.borrow();
    let Some(Event::AddStream { codec_tag, .. }) = recorder
        .events
        .iter()
        .find(|event| matches!(event, Event::AddStream { index: 0, .. }))
    else {
        panic!("video stream never added");
    };
    assert_eq!(*codec_tag, Some(0x3436_3248));
}

#[test]
fn audio_frame_size_mismatch() {
    let mut script = av_script(10, 19);
    script.audio_encoder_frame_size = 1_152;
    let (engine, _recorder) = MockEngine::new(script);

    let error = Pipeline::new(engine, unbounded()).run().unwrap_err();

    assert!(matches!(
        error,
        TranscodeError::FrameSizeMismatch {
            stream: 1,
            encoder: 1_152,
            decoded: 1_024,
        }
    ));
}

#[test]
fn audio_stream_keeps_its_language() {
    let (engine, recorder) = MockEngine::new(av_script(5, 9));

    Pipeline::new(engine, unbounded()).run().expect("run failed");

    let recorder = recorder.borrow();
    assert!(recorder.events.iter().any(|event| matches!(
        event,
        Event::AddStream { index: 1, language: Some(language), .. } if language == "eng"
    )));
}
