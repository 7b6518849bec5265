//! End-to-end runs of the threaded pipeline with synthetic devices.

use framepipe::codec::{MockVideoEncoder, MulawEncoder, RawVideoEncoder};
use framepipe::device::{SyntheticCapture, ToneSource, stamped_frame_number};
use framepipe::format::{Resolution, VideoStandard};
use framepipe::pipeline::{
    CollectingReporter, ControlOptions, Pipeline, PipelineConfig, PipelineOutcome, PipelineUnits,
    StopReason,
};
use framepipe::sink::{CollectorSink, snapshot_slot};
use framepipe::{ErrorCategory, PipelineHandle};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn small_config() -> PipelineConfig {
    PipelineConfig {
        resolution: Some(Resolution::aligned(32, 32).unwrap()),
        ..PipelineConfig::default()
    }
}

/// Runs `finish` on another thread and fails the test if it hangs.
fn finish_within(
    handle: PipelineHandle,
    limit: Duration,
    finish: fn(PipelineHandle) -> PipelineOutcome,
) -> PipelineOutcome {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(finish(handle));
    });
    rx.recv_timeout(limit)
        .unwrap_or_else(|_| panic!("pipeline did not stop within {limit:?}"))
}

fn wait_default(handle: PipelineHandle) -> PipelineOutcome {
    handle.wait(ControlOptions::default())
}

#[test]
fn frames_arrive_in_capture_order() {
    let sink = CollectorSink::new();
    let collected = sink.collected();
    let finished = sink.clone();
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::D1Ntsc).with_frame_limit(10)),
        Box::new(RawVideoEncoder::new()),
        Box::new(sink),
    );

    let handle = Pipeline::new(small_config()).start(units).unwrap();
    let outcome = finish_within(handle, Duration::from_secs(10), wait_default);

    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.stats.frames, 10);
    assert_eq!(outcome.stats.image_width, Some(32));
    assert_eq!(outcome.stats.image_height, Some(32));
    assert!(finished.is_finished());

    let frames = collected.lock();
    let numbers: Vec<u64> = frames
        .iter()
        .filter_map(|f| stamped_frame_number(f))
        .collect();
    assert_eq!(numbers, (0..10).collect::<Vec<_>>());
}

#[test]
fn smaller_resolution_is_cropped_row_by_row() {
    let sink = CollectorSink::new();
    let collected = sink.collected();
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::D1Ntsc).with_frame_limit(4)),
        Box::new(RawVideoEncoder::new()),
        Box::new(sink),
    );

    let handle = Pipeline::new(small_config()).start(units).unwrap();
    let outcome = finish_within(handle, Duration::from_secs(10), wait_default);
    assert!(outcome.is_success(), "{:?}", outcome.first_failure());

    let frames = collected.lock();
    assert_eq!(frames.len(), 4);
    for (n, frame) in frames.iter().enumerate() {
        assert_eq!(frame.len(), 32 * 32 * 3 / 2);
        let (luma, chroma) = frame.split_at(32 * 32);
        assert!(chroma.iter().all(|&b| b == 128), "frame {n} chroma: {:?}", &chroma[..8]);

        // The synthetic source draws a white line on row 4 * n.
        for (row, line) in luma.chunks(32).enumerate() {
            let pixels = if row == 0 { &line[8..] } else { line };
            let expected = if row == 4 * n { 235 } else { 16 };
            assert!(
                pixels.iter().all(|&b| b == expected),
                "frame {n} row {row}: {pixels:?}"
            );
        }
    }
}

#[test]
fn full_720p_frames_travel_without_copy() {
    let sink = CollectorSink::new();
    let collected = sink.collected();
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::P720x60).with_frame_limit(10)),
        Box::new(RawVideoEncoder::new()),
        Box::new(sink),
    );

    let handle = Pipeline::new(PipelineConfig::default()).start(units).unwrap();
    let outcome = finish_within(handle, Duration::from_secs(20), wait_default);

    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.stats.frames, 10);
    assert_eq!(outcome.stats.image_width, Some(1280));
    assert_eq!(outcome.stats.image_height, Some(720));

    let frames = collected.lock();
    assert!(frames.iter().all(|f| f.len() == 1280 * 720 * 3 / 2));
    let numbers: Vec<u64> = frames
        .iter()
        .filter_map(|f| stamped_frame_number(f))
        .collect();
    assert_eq!(numbers, (0..10).collect::<Vec<_>>());
}

#[test]
fn quit_releases_zero_copy_capture_waiting_for_returns() {
    let capture = SyntheticCapture::new(VideoStandard::P720x60)
        .with_frame_interval(Duration::from_millis(20));
    let units = PipelineUnits::new().with_video(
        Box::new(capture),
        Box::new(RawVideoEncoder::new()),
        Box::new(CollectorSink::new()),
    );

    let handle = Pipeline::new(PipelineConfig::default()).start(units).unwrap();
    thread::sleep(Duration::from_millis(150));
    let outcome = finish_within(handle, Duration::from_secs(5), PipelineHandle::stop);

    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
    assert_eq!(outcome.stop_reason, StopReason::QuitRequested);
    assert_eq!(outcome.reports.len(), 3);
    assert!(outcome.stats.frames > 0);
}

#[test]
fn quit_releases_stages_blocked_on_empty_channels() {
    // One frame every half second: video and writer spend the run in `get`.
    let capture = SyntheticCapture::new(VideoStandard::D1Pal)
        .with_frame_interval(Duration::from_millis(500));
    let units = PipelineUnits::new().with_video(
        Box::new(capture),
        Box::new(RawVideoEncoder::new()),
        Box::new(CollectorSink::new()),
    );

    let handle = Pipeline::new(small_config()).start(units).unwrap();
    thread::sleep(Duration::from_millis(100));
    let outcome = finish_within(handle, Duration::from_secs(5), PipelineHandle::stop);

    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
    assert_eq!(outcome.stop_reason, StopReason::QuitRequested);
    assert_eq!(outcome.reports.len(), 3);
}

#[test]
fn quit_releases_paused_stages() {
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::D1Ntsc)),
        Box::new(RawVideoEncoder::new()),
        Box::new(CollectorSink::new()),
    );
    let handle = Pipeline::new(small_config()).start(units).unwrap();
    let controller = handle.controller();
    controller.pause();
    thread::sleep(Duration::from_millis(50));

    let outcome = finish_within(handle, Duration::from_secs(5), PipelineHandle::stop);
    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
}

#[test]
fn pause_holds_frames_until_resume() {
    let units = PipelineUnits::new().with_video(
        Box::new(
            SyntheticCapture::new(VideoStandard::D1Ntsc)
                .with_frame_interval(Duration::from_millis(5)),
        ),
        Box::new(RawVideoEncoder::new()),
        Box::new(CollectorSink::new()),
    );
    let handle = Pipeline::new(small_config()).start(units).unwrap();
    let controller = handle.controller();

    thread::sleep(Duration::from_millis(50));
    controller.pause();
    assert!(controller.is_paused());
    // Let in-flight steps settle.
    thread::sleep(Duration::from_millis(50));
    let held = controller.stats().frames;
    thread::sleep(Duration::from_millis(100));
    assert!(controller.stats().frames <= held + 1);

    controller.resume();
    thread::sleep(Duration::from_millis(100));
    assert!(controller.stats().frames > held + 1);

    let outcome = finish_within(handle, Duration::from_secs(5), PipelineHandle::stop);
    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
}

#[test]
fn encoder_failure_stops_every_stage() {
    let reporter = Arc::new(CollectingReporter::new());
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::D1Pal)),
        Box::new(MockVideoEncoder::new().with_failure_at(5)),
        Box::new(CollectorSink::new()),
    );

    let handle = Pipeline::new(small_config())
        .with_error_reporter(reporter.clone())
        .start(units)
        .unwrap();
    let outcome = finish_within(handle, Duration::from_secs(10), wait_default);

    assert!(!outcome.is_success());
    assert_eq!(outcome.reports.len(), 3);
    assert!(outcome.stats.quit_requested);
    let first = outcome.first_failure().unwrap();
    assert_eq!(first.stage, "video");
    assert_eq!(
        first.result.as_ref().unwrap_err().category(),
        ErrorCategory::Processing
    );

    let reports = reporter.reports();
    assert_eq!(reports.len(), 1, "{reports:?}");
    assert_eq!(reports[0].0, "video");
    assert_eq!(reports[0].2, ErrorCategory::Processing);
}

#[test]
fn interlaced_input_fails_startup() {
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::I1080x30)),
        Box::new(RawVideoEncoder::new()),
        Box::new(CollectorSink::new()),
    );

    let err = Pipeline::new(PipelineConfig::default())
        .start(units)
        .err()
        .unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn speech_only_run_drains_source() {
    let sink = CollectorSink::new();
    let collected = sink.collected();
    let units = PipelineUnits::new().with_speech(
        Box::new(ToneSource::new(8000, 440.0).with_block_limit(10)),
        Box::new(MulawEncoder::new()),
        Box::new(sink),
    );

    let handle = Pipeline::new(PipelineConfig::default())
        .start(units)
        .unwrap();
    let outcome = finish_within(handle, Duration::from_secs(10), wait_default);

    assert!(outcome.is_success(), "{:?}", outcome.first_failure());
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.stats.frames, 0);
    let blocks = collected.lock();
    assert_eq!(blocks.len(), 10);
    let written: usize = blocks.iter().map(Vec::len).sum();
    assert_eq!(outcome.stats.speech_bytes, written as u64);
}

#[test]
fn snapshot_side_channel_sees_encoded_frames() {
    let (slot, reader) = snapshot_slot(64);
    let config = PipelineConfig {
        side_channel: Some(Arc::new(slot)),
        ..small_config()
    };
    let units = PipelineUnits::new().with_video(
        Box::new(SyntheticCapture::new(VideoStandard::D1Ntsc).with_frame_limit(4)),
        Box::new(RawVideoEncoder::new()),
        Box::new(CollectorSink::new()),
    );

    let handle = Pipeline::new(config).start(units).unwrap();
    let outcome = finish_within(handle, Duration::from_secs(10), wait_default);
    assert!(outcome.is_success(), "{:?}", outcome.first_failure());

    // Nobody read during the run, so the first frame is still in the slot.
    let snapshot = reader.try_take().unwrap();
    assert_eq!(snapshot.len(), 64);
    assert_eq!(stamped_frame_number(&snapshot), Some(0));
}
