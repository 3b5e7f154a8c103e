// End-to-end queue runs against fake ffmpeg/ffprobe scripts

use crate::common::{FakeMedia, file_results, run_queue, serial, test_options};
use hevc_batch::engine::worker::{NoPromptChooser, QueueEvent, SubtitleChooser};
use hevc_batch::engine::{EncodeOptions, SubtitleTrack};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Records how often it was asked and picks the candidate at `pick`
struct CountingChooser {
    calls: Arc<AtomicUsize>,
    pick: Option<usize>,
}

impl SubtitleChooser for CountingChooser {
    fn choose(&self, candidates: &[SubtitleTrack], _filename: &str) -> Option<SubtitleTrack> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pick.and_then(|i| candidates.get(i).cloned())
    }
}

fn counting(pick: Option<usize>) -> (CountingChooser, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        CountingChooser {
            calls: calls.clone(),
            pick,
        },
        calls,
    )
}

#[test]
fn test_successful_file_reports_progress_and_output() {
    let _guard = serial();
    let media = FakeMedia::new();
    let source = media.add_video("ep01.mkv", &[]);

    let (events, summary) = run_queue(
        media.config(),
        test_options(),
        &[source.clone()],
        NoPromptChooser,
        |_, _| {},
    );

    assert_eq!(
        file_results(&events),
        vec![("ep01.mkv".to_string(), true, "encoded successfully".to_string())]
    );
    assert_eq!(summary.succeeded, 1);
    assert_eq!(fs::read_to_string(media.output_for(&source)).unwrap(), "encoded");

    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![0, 50, 100, 100]);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));

    assert!(events.iter().any(|e| matches!(
        e,
        QueueEvent::OverallProgress { current: 1, total: 1, eta: Some(_) }
    )));
    assert!(matches!(
        events.last(),
        Some(QueueEvent::Finished {
            was_manually_stopped: false,
            ..
        })
    ));
}

#[test]
fn test_default_keyword_track_skips_chooser() {
    let _guard = serial();
    let media = FakeMedia::new();
    let source = media.add_video("ep02.mkv", &["Полные", "Надписи"]);
    let (chooser, calls) = counting(Some(0));

    let (events, _) = run_queue(media.config(), test_options(), &[source], chooser, |_, _| {});

    assert_eq!(calls.load(Ordering::SeqCst), 0, "chooser must not be asked");
    assert!(file_results(&events)[0].1);

    let calls = media.ffmpeg_calls();
    assert!(
        calls.iter().any(|c| c.contains("-map 0:s:1") && c.contains("-c:s ass")),
        "global index 3 is the second subtitle stream: {:?}",
        calls
    );
    let encodes = media.encode_calls();
    assert_eq!(encodes.len(), 1);
    assert!(encodes[0].contains("subtitles=filename="));
    assert!(encodes[0].contains("subs_Надписи.ass"));
}

#[test]
fn test_chooser_consulted_without_keyword_track() {
    let _guard = serial();
    let media = FakeMedia::new();
    let skipped = media.add_video("a.mkv", &["English", "Full"]);
    let (chooser, calls) = counting(None);

    run_queue(media.config(), test_options(), &[skipped], chooser, |_, _| {});
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!media.encode_calls()[0].contains("subtitles="));

    let picked = media.add_video("b.mkv", &["English", "Full"]);
    let (chooser, calls) = counting(Some(1));
    let options = EncodeOptions {
        strip_credits: true,
        ..test_options()
    };
    run_queue(media.config(), options, &[picked], chooser, |_, _| {});
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let encodes = media.encode_calls();
    assert!(encodes[1].contains("subs_Full.ass"), "{}", encodes[1]);
}

#[test]
fn test_existing_output_is_skipped_as_success() {
    let _guard = serial();
    let media = FakeMedia::new();
    let source = media.add_video("done.mkv", &[]);
    let output = media.output_for(&source);
    fs::create_dir_all(output.parent().unwrap()).unwrap();
    fs::write(&output, b"previous run").unwrap();

    let (events, summary) = run_queue(
        media.config(),
        test_options(),
        &[source],
        NoPromptChooser,
        |_, _| {},
    );

    assert_eq!(
        file_results(&events),
        vec![(
            "done.mkv".to_string(),
            true,
            "output already exists (skipped)".to_string()
        )]
    );
    assert_eq!(summary.skipped, 1);
    assert!(media.encode_calls().is_empty());
    assert_eq!(fs::read(&output).unwrap(), b"previous run");
}

#[test]
fn test_failures_do_not_stop_the_queue() {
    let _guard = serial();
    let media = FakeMedia::new();
    let broken = media.add_broken_video("broken.mkv");
    let failing = media.add_video("disk_fail.mkv", &[]);
    let good = media.add_video("good.mkv", &[]);

    let (events, summary) = run_queue(
        media.config(),
        test_options(),
        &[broken, failing.clone(), good.clone()],
        NoPromptChooser,
        |_, _| {},
    );

    let results = file_results(&events);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "broken.mkv");
    assert!(!results[0].1);
    assert!(results[0].2.starts_with("probe failed"), "{}", results[0].2);

    assert_eq!(results[1].0, "disk_fail.mkv");
    assert!(!results[1].1);
    assert_eq!(
        results[1].2,
        "ffmpeg failed (exit code 1): no space left on device"
    );
    assert!(!media.output_for(&failing).exists());

    assert_eq!(results[2], ("good.mkv".to_string(), true, "encoded successfully".to_string()));
    assert!(media.output_for(&good).exists());

    assert_eq!(summary.total, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.succeeded, 1);
}

#[test]
fn test_skip_current_cancels_and_continues() {
    let _guard = serial();
    let media = FakeMedia::new();
    let slow = media.add_video("a_slow.mkv", &[]);
    let next = media.add_video("b.mkv", &[]);

    let (events, summary) = run_queue(
        media.config(),
        test_options(),
        &[slow.clone(), next.clone()],
        NoPromptChooser,
        |event, handle| {
            if let QueueEvent::Progress { percent, status } = event {
                if *percent > 0 && status.starts_with("a_slow.mkv") {
                    handle.skip_current();
                }
            }
        },
    );

    let results = file_results(&events);
    assert_eq!(
        results,
        vec![
            ("a_slow.mkv".to_string(), false, "cancelled".to_string()),
            ("b.mkv".to_string(), true, "encoded successfully".to_string()),
        ]
    );
    assert!(!media.output_for(&slow).exists(), "partial output removed");
    assert!(media.output_for(&next).exists());
    assert_eq!(summary.cancelled, 1);
    assert!(matches!(
        events.last(),
        Some(QueueEvent::Finished {
            was_manually_stopped: false,
            ..
        })
    ));

    // Nothing about the first file shows up after its result
    let first_result = events
        .iter()
        .position(|e| matches!(e, QueueEvent::FileResult { .. }))
        .unwrap();
    assert!(events[first_result..].iter().all(|e| match e {
        QueueEvent::Progress { status, .. } => !status.contains("a_slow"),
        _ => true,
    }));
}

#[test]
fn test_stop_ends_queue() {
    let _guard = serial();
    let media = FakeMedia::new();
    let slow = media.add_video("slow.mkv", &[]);
    let never = media.add_video("never.mkv", &[]);

    let (events, summary) = run_queue(
        media.config(),
        test_options(),
        &[slow.clone(), never.clone()],
        NoPromptChooser,
        |event, handle| {
            if let QueueEvent::Progress { percent, .. } = event {
                if *percent > 0 {
                    handle.stop();
                }
            }
        },
    );

    assert_eq!(
        file_results(&events),
        vec![("slow.mkv".to_string(), false, "cancelled".to_string())]
    );
    assert!(!media.output_for(&slow).exists());
    assert!(!media.output_for(&never).exists());
    assert_eq!(summary.total, 2);
    assert_eq!(summary.cancelled, 1);
    assert!(matches!(
        events.last(),
        Some(QueueEvent::Finished {
            was_manually_stopped: true,
            ..
        })
    ));
}

#[test]
fn test_crop_detection_feeds_the_filter_chain() {
    let _guard = serial();
    let media = FakeMedia::new();
    let source = media.add_video("letterbox.mkv", &[]);
    let options = EncodeOptions {
        detect_crop: true,
        ..test_options()
    };

    let (events, _) = run_queue(media.config(), options, &[source], NoPromptChooser, |_, _| {});

    assert!(file_results(&events)[0].1);
    let encodes = media.encode_calls();
    assert!(
        encodes[0].contains("-vf crop=1920:800:0:140,format=nv12"),
        "{}",
        encodes[0]
    );
}

#[test]
fn test_output_equal_to_source_is_refused() {
    let _guard = serial();
    let media = FakeMedia::new();
    let source = media.add_video("fail.mp4", &[]);
    let options = EncodeOptions {
        output_dir: Some(media.videos()),
        overwrite: true,
        ..test_options()
    };

    let (events, summary) = run_queue(
        media.config(),
        options,
        &[source.clone()],
        NoPromptChooser,
        |_, _| {},
    );

    assert_eq!(
        file_results(&events),
        vec![(
            "fail.mp4".to_string(),
            false,
            "output path is the source file".to_string()
        )]
    );
    assert_eq!(summary.failed, 1);
    assert!(media.encode_calls().is_empty());
    assert_eq!(fs::read(&source).unwrap(), b"not really a video");
}

#[test]
fn test_stop_kills_stalled_subtitle_extraction() {
    let _guard = serial();
    let media = FakeMedia::new();
    let stalled = media.add_video("stall.mkv", &["Надписи"]);
    let never = media.add_video("never.mkv", &[]);
    let marker = media.stall_marker();

    let started = Instant::now();
    let (events, summary) = run_queue(
        media.config(),
        test_options(),
        &[stalled, never.clone()],
        NoPromptChooser,
        |event, handle| {
            if let QueueEvent::Log { message, .. } = event {
                if message.contains("Subtitles:") {
                    // Stop only once the extraction process is running
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while !marker.exists() && Instant::now() < deadline {
                        thread::sleep(Duration::from_millis(20));
                    }
                    handle.stop();
                }
            }
        },
    );

    assert!(marker.exists(), "extraction never started");
    assert!(
        started.elapsed() < Duration::from_secs(20),
        "extraction was not killed, queue took {:?}",
        started.elapsed()
    );
    assert_eq!(
        file_results(&events),
        vec![("stall.mkv".to_string(), false, "cancelled".to_string())]
    );
    assert_eq!(summary.cancelled, 1);
    assert!(media.encode_calls().is_empty());
    assert!(!media.output_for(&never).exists());
}
