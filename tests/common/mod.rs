#![allow(dead_code)] // Each test binary uses a different subset

use hevc_batch::config::Config;
use hevc_batch::engine::hardware::HwCapabilities;
use hevc_batch::engine::worker::{QueueEvent, QueueOrchestrator, SubtitleChooser};
use hevc_batch::engine::{EncodeOptions, QueueSummary, SourceFile};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::TempDir;

/// Writing and then executing scripts while other threads fork can hit ETXTBSY.
/// Queue tests take this lock for their whole run.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SCRIPT_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fake ffprobe: prints `<input>.json`, or `<input>.subs` for the subtitle index listing.
const FAKE_FFPROBE: &str = r#"#!/bin/sh
for a in "$@"; do last="$a"; done
case "$*" in
  *"csv=p=0"*) cat "$last.subs" 2>/dev/null; exit 0 ;;
  *"csv=s=x"*) exit 1 ;;
esac
if [ -f "$last.json" ]; then
  cat "$last.json"
else
  echo "$last: Invalid data found when processing input" >&2
  exit 1
fi
"#;

/// Fake ffmpeg. Behaviour depends on the input name:
/// `*fail*` reports a full disk, `*slow*` writes partial output and hangs, anything else succeeds.
/// Subtitle extraction of `*stall*` inputs touches `<log>.stall` and hangs.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
input=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then input="$a"; fi
  prev="$a"
  last="$a"
done
echo "$*" >> "@LOG@"
case "$*" in
  *cropdetect*)
    echo "[Parsed_cropdetect_0 @ 0x55] x1:0 x2:1919 y1:140 y2:939 w:1920 h:800 x:0 y:140 pts:25 t:1.0 crop=1920:800:0:140" >&2
    exit 0 ;;
  *"-c:s ass"*)
    case "$(basename "$input")" in
      *stall*) touch "@LOG@.stall"; sleep 30 ;;
    esac
    printf '[Script Info]\nScriptType: v4.00+\n\n[Events]\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,Hello\nDialogue: 0,0:00:03.00,0:00:04.00,Default,,0,0,0,,{\\k20}karaoke\n' > "$last"
    exit 0 ;;
esac
case "$(basename "$input")" in
  *fail*)
    echo "Input #0, matroska,webm, from '$input':" >&2
    echo "[mp4 @ 0x1] av_interleaved_write_frame(): No space left on device" >&2
    exit 1 ;;
  *slow*)
    printf 'partial' > "$last"
    printf 'frame=   25 fps=25 q=28.0 size=     100kB time=00:00:01.00 bitrate= 800.0kbits/s speed=1.0x\r' >&2
    sleep 30
    exit 0 ;;
esac
printf 'frame=  125 fps=250 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 838.0kbits/s speed=2.0x\r' >&2
printf 'frame=  250 fps=250 q=28.0 size=    2048kB time=00:00:10.00 bitrate= 838.0kbits/s speed=2.0x\n' >&2
printf 'encoded' > "$last"
exit 0
"#;

/// Probe JSON for a 10 second 1920x1080 H.264 file with the given subtitle titles (indices from 2)
pub fn probe_json(subtitle_titles: &[&str]) -> String {
    let mut streams = vec![
        r#"{"index": 0, "codec_name": "h264", "codec_type": "video", "pix_fmt": "yuv420p", "width": 1920, "height": 1080}"#.to_string(),
        r#"{"index": 1, "codec_name": "aac", "codec_type": "audio"}"#.to_string(),
    ];
    for (i, title) in subtitle_titles.iter().enumerate() {
        streams.push(format!(
            r#"{{"index": {}, "codec_name": "ass", "codec_type": "subtitle", "tags": {{"title": "{}", "language": "rus"}}}}"#,
            i + 2,
            title
        ));
    }
    format!(
        r#"{{"streams": [{}], "format": {{"duration": "10.000000"}}}}"#,
        streams.join(", ")
    )
}

/// Temp workspace with fake tools and source files
pub struct FakeMedia {
    pub dir: TempDir,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ffmpeg_log: PathBuf,
}

impl FakeMedia {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(dir.path().join("videos")).unwrap();
        fs::create_dir_all(&bin).unwrap();

        let ffmpeg_log = dir.path().join("ffmpeg.log");
        let ffmpeg = bin.join("ffmpeg");
        let ffprobe = bin.join("ffprobe");
        write_script(
            &ffmpeg,
            &FAKE_FFMPEG.replace("@LOG@", &ffmpeg_log.display().to_string()),
        );
        write_script(&ffprobe, FAKE_FFPROBE);

        Self {
            dir,
            ffmpeg,
            ffprobe,
            ffmpeg_log,
        }
    }

    pub fn videos(&self) -> PathBuf {
        self.dir.path().join("videos")
    }

    /// Create a source file with probe data and the matching subtitle index listing
    pub fn add_video(&self, name: &str, subtitle_titles: &[&str]) -> PathBuf {
        let path = self.videos().join(name);
        fs::write(&path, b"not really a video").unwrap();
        fs::write(sidecar(&path, "json"), probe_json(subtitle_titles)).unwrap();
        let subs: String = (0..subtitle_titles.len())
            .map(|i| format!("{}\n", i + 2))
            .collect();
        fs::write(sidecar(&path, "subs"), subs).unwrap();
        path
    }

    /// A source ffprobe cannot read
    pub fn add_broken_video(&self, name: &str) -> PathBuf {
        let path = self.videos().join(name);
        fs::write(&path, b"garbage").unwrap();
        path
    }

    pub fn output_for(&self, source: &Path) -> PathBuf {
        let stem = source.file_stem().unwrap().to_string_lossy().to_string();
        self.videos()
            .join("ENCODED_HEVC")
            .join(format!("{}.mp4", stem))
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.tools.ffmpeg = self.ffmpeg.clone();
        config.tools.ffprobe = self.ffprobe.clone();
        config
    }

    /// Every fake ffmpeg invocation so far, one line per call
    pub fn ffmpeg_calls(&self) -> Vec<String> {
        fs::read_to_string(&self.ffmpeg_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Marker written once a stalling subtitle extraction has started
    pub fn stall_marker(&self) -> PathBuf {
        let mut name = self.ffmpeg_log.as_os_str().to_owned();
        name.push(".stall");
        PathBuf::from(name)
    }

    pub fn encode_calls(&self) -> Vec<String> {
        self.ffmpeg_calls()
            .into_iter()
            .filter(|c| c.contains("hevc_nvenc"))
            .collect()
    }
}

fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", ext));
    PathBuf::from(name)
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Capabilities of an NVENC machine with libass and no hardware decoders
pub fn nvenc_caps() -> HwCapabilities {
    HwCapabilities {
        gpu_name: Some("NVIDIA GeForce RTX 3060".to_string()),
        encoder: Some("hevc_nvenc".to_string()),
        subtitles_filter: true,
        ..HwCapabilities::default()
    }
}

/// Options for tests: no crop detection unless a test asks for it
pub fn test_options() -> EncodeOptions {
    EncodeOptions {
        detect_crop: false,
        ..EncodeOptions::default()
    }
}

/// Run a queue to completion, calling `on_event` for each event before collecting it
pub fn run_queue<C, F>(
    config: Config,
    options: EncodeOptions,
    files: &[PathBuf],
    chooser: C,
    mut on_event: F,
) -> (Vec<QueueEvent>, QueueSummary)
where
    C: SubtitleChooser + Send + 'static,
    F: FnMut(&QueueEvent, &hevc_batch::engine::worker::QueueHandle),
{
    let sources = files.iter().cloned().map(SourceFile::new).collect();
    let (handle, rx) = QueueOrchestrator::new(config, nvenc_caps(), options)
        .with_chooser(chooser)
        .start(sources);

    let mut events = Vec::new();
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(60))
            .expect("queue did not finish in time");
        on_event(&event, &handle);
        let done = matches!(event, QueueEvent::Finished { .. });
        events.push(event);
        if done {
            break;
        }
    }

    let summary = handle.join().expect("orchestrator thread panicked");
    (events, summary)
}

/// (filename, success, message) for every FileResult, in order
pub fn file_results(events: &[QueueEvent]) -> Vec<(String, bool, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::FileResult {
                filename,
                success,
                message,
            } => Some((filename.clone(), *success, message.clone())),
            _ => None,
        })
        .collect()
}
