// Config files on disk and their effect on a run

use hevc_batch::config::Config;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[encoder]
lookahead = 0

[output]
subdir = "HEVC"
filename_pattern = "{basename}_x265"
"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.encoder.lookahead, 0);
    assert_eq!(config.encoder.preset, "p7");
    assert_eq!(config.output.subdir, "HEVC");
    assert_eq!(config.output.filename_pattern, "{basename}_x265");
    assert_eq!(config.output.container, "mp4");
    assert_eq!(config.subtitles.title_keyword, "Надписи");
    assert_eq!(config.crop.min_area_ratio, 0.70);
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("dir").join("config.toml");

    let mut config = Config::default();
    config.encoder.default_bitrate_mbps = 12;
    config.audio.language = "jpn".to_string();
    config.subtitles.credit_signatures = vec![r"{\k".to_string()];
    config.logging.debug_log = Some(dir.path().join("debug.log"));
    config.save_to(&path).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    assert_eq!(loaded.encoder.default_bitrate_mbps, 12);
    assert_eq!(loaded.audio.language, "jpn");
    assert_eq!(loaded.subtitles.credit_signatures, vec![r"{\k".to_string()]);
    assert_eq!(loaded.logging.debug_log, config.logging.debug_log);
    assert_eq!(
        toml::to_string(&loaded).unwrap(),
        toml::to_string(&config).unwrap()
    );
}

#[test]
fn test_unreadable_files_are_errors() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.toml");
    let err = Config::load_from(&missing).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read config file"));

    let bad = dir.path().join("bad.toml");
    fs::write(&bad, "[encoder]\nlookahead = \"many\"\n").unwrap();
    let err = Config::load_from(&bad).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[cfg(unix)]
#[test]
fn test_output_layout_and_debug_log_follow_config() {
    use crate::common::{FakeMedia, file_results, run_queue, serial, test_options};
    use hevc_batch::engine::worker::NoPromptChooser;

    let _guard = serial();
    let media = FakeMedia::new();
    let good = media.add_video("ep03.mkv", &[]);
    let bad = media.add_video("ep04_fail.mkv", &[]);

    let debug_log = media.dir.path().join("logs").join("debug.log");
    let mut config = media.config();
    config.output.subdir = "HEVC".to_string();
    config.output.filename_pattern = "{basename}_x265".to_string();
    config.output.container = "mkv".to_string();
    config.logging.debug_log = Some(debug_log.clone());

    let (events, _) = run_queue(
        config,
        test_options(),
        &[good, bad],
        NoPromptChooser,
        |_, _| {},
    );

    let results = file_results(&events);
    assert!(results[0].1);
    assert!(!results[1].1);
    assert!(media.videos().join("HEVC").join("ep03_x265.mkv").exists());

    let log = fs::read_to_string(&debug_log).unwrap();
    assert!(log.contains("[ep03.mkv] ffmpeg command:"));
    assert!(log.contains("[ep04_fail.mkv] ffmpeg failed:"));
    assert!(log.contains("No space left on device"));
}
