use crate::cli::{Cli, Commands, EncodeArgs};
use anyhow::{Context, Result, bail};
use hevc_batch::config::Config;
use hevc_batch::engine::hardware::{self, HwCapabilities};
use hevc_batch::engine::probe::MediaProber;
use hevc_batch::engine::streams::sanitize_filename_part;
use hevc_batch::engine::worker::{
    LogLevel, NoPromptChooser, QueueEvent, QueueOrchestrator, SubtitleChooser,
};
use hevc_batch::engine::{
    EncodeOptions, EncodingPlanner, PlanInputs, SubtitleTrack, build_encode_cmd,
    collect_sources, derive_output_path, format_ffmpeg_cmd, format_hms, is_same_file,
};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

pub fn run(cli: Cli) {
    let verbose = cli.verbose > 0;
    let config_path = cli.config;

    let result = match cli.command {
        Commands::InitConfig => handle_init_config(config_path.as_deref()),
        command => load_config(config_path.as_deref()).and_then(|config| match command {
            Commands::Check => handle_check(&config),
            Commands::Probe { file } => handle_probe(&config, &file),
            Commands::DryRun { paths, options } => handle_dry_run(&config, &paths, &options),
            Commands::Encode {
                paths,
                options,
                no_prompt,
            } => handle_encode(config, &paths, &options, no_prompt, verbose),
            Commands::InitConfig => Ok(()),
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn handle_check(config: &Config) -> Result<()> {
    let ffmpeg = &config.tools.ffmpeg;
    let ffprobe = &config.tools.ffprobe;

    let ffmpeg_version = hardware::tool_version(ffmpeg)
        .with_context(|| format!("ffmpeg not found or not runnable: {}", ffmpeg.display()))?;
    println!("ffmpeg found: {}", ffmpeg_version);
    let ffprobe_version = hardware::tool_version(ffprobe)
        .with_context(|| format!("ffprobe not found or not runnable: {}", ffprobe.display()))?;
    println!("ffprobe found: {}", ffprobe_version);

    let hw = HwCapabilities::detect(ffmpeg, &config.encoder.encoder);
    println!();
    println!(
        "GPU:              {}",
        hw.gpu_name.as_deref().unwrap_or("not detected")
    );
    println!(
        "Encoder {:<9} {}",
        format!("{}:", config.encoder.encoder),
        if hw.encoder.is_some() { "OK" } else { "missing" }
    );
    println!(
        "Subtitles filter: {}",
        if hw.subtitles_filter { "OK" } else { "missing" }
    );
    if hw.decoder_map.is_empty() {
        println!("HW decoders:      none");
    } else {
        println!("HW decoders:");
        for (codec, decoder) in &hw.decoder_map {
            println!("  {:<12} -> {}", codec, decoder);
        }
    }

    let problems = hw.problems(&config.encoder.encoder);
    if !problems.is_empty() {
        println!();
        for problem in &problems {
            println!("warning: {}", problem);
        }
    }
    if !hw.can_encode() {
        bail!("hardware HEVC encoding is not available");
    }
    Ok(())
}

fn handle_probe(config: &Config, file: &Path) -> Result<()> {
    let probe = MediaProber::new(config)
        .probe(file)
        .with_context(|| format!("Failed to probe {}", file.display()))?;

    println!("File:       {}", file.display());
    println!(
        "Duration:   {} ({:.2} seconds)",
        format_hms(probe.duration_s),
        probe.duration_s
    );
    println!("Codec:      {}", probe.video_codec);
    println!(
        "Pixel fmt:  {}{}",
        probe.pix_fmt,
        if probe.is_10bit() { " (10-bit)" } else { "" }
    );
    println!("Resolution: {}x{}", probe.width, probe.height);

    if probe.subtitle_tracks.is_empty() {
        println!("Subtitles:  none");
    } else {
        println!("Subtitles:");
        for track in &probe.subtitle_tracks {
            let marker = if probe.default_subtitle.as_ref() == Some(track) {
                " (default)"
            } else {
                ""
            };
            println!("  {}{}", track.label(), marker);
        }
    }
    println!("Fonts:      {} attachment(s)", probe.font_attachments.len());
    Ok(())
}

fn handle_dry_run(config: &Config, paths: &[PathBuf], args: &EncodeArgs) -> Result<()> {
    let options = args.to_options(config.encoder.default_bitrate_mbps);
    let sources = collect_sources(paths, &config.output.subdir)?;
    if sources.is_empty() {
        println!("No video files found");
        return Ok(());
    }

    let hw = HwCapabilities::detect(&config.tools.ffmpeg, &config.encoder.encoder);
    let prober = MediaProber::new(config);
    let planner = EncodingPlanner::new(config, &hw, &options);
    let placeholder_dir = std::env::temp_dir().join("enc_dry_run");

    for source in &sources {
        let output = derive_output_path(&source.path, options.output_dir.as_deref(), &config.output);
        println!("# {} -> {}", source.path.display(), output.display());

        if is_same_file(&source.path, &output) {
            println!("#   refused: output path is the source file");
            continue;
        }
        if output.exists() && !options.overwrite {
            println!("#   skipped: output exists");
            continue;
        }
        let probe = match prober.probe(&source.path) {
            Ok(probe) => probe,
            Err(e) => {
                println!("#   probe failed: {}", e);
                continue;
            }
        };

        // Crop detection and extraction happen at encode time
        let subtitle = probe
            .default_subtitle
            .as_ref()
            .filter(|_| options.burn_subtitles)
            .map(|t| placeholder_dir.join(format!("subs_{}.ass", sanitize_filename_part(&t.title, 30))));

        let plan = planner.plan(PlanInputs {
            input: &source.path,
            output,
            probe: &probe,
            crop: None,
            subtitle,
            extracted_fonts_dir: None,
        });
        println!("{}", format_ffmpeg_cmd(&build_encode_cmd(&config.tools.ffmpeg, &plan)));
    }
    Ok(())
}

fn handle_encode(
    config: Config,
    paths: &[PathBuf],
    args: &EncodeArgs,
    no_prompt: bool,
    verbose: bool,
) -> Result<()> {
    let options: EncodeOptions = args.to_options(config.encoder.default_bitrate_mbps);
    let sources = collect_sources(paths, &config.output.subdir)?;
    if sources.is_empty() {
        println!("No video files found");
        return Ok(());
    }

    let hw = HwCapabilities::detect(&config.tools.ffmpeg, &config.encoder.encoder);
    if !hw.can_encode() {
        for problem in hw.problems(&config.encoder.encoder) {
            eprintln!("{}", problem);
        }
        bail!("hardware HEVC encoding is not available (run 'hevc-batch check')");
    }
    for problem in hw.problems(&config.encoder.encoder) {
        eprintln!("warning: {}", problem);
    }

    let orchestrator = QueueOrchestrator::new(config, hw, options);
    let orchestrator = if no_prompt || !io::stdin().is_terminal() {
        orchestrator.with_chooser(NoPromptChooser)
    } else {
        orchestrator.with_chooser(StdinChooser)
    };

    interrupt::install();
    let (handle, events) = orchestrator.start(sources);
    let mut console = Console::new(verbose);

    loop {
        if interrupt::take() {
            eprintln!("\nInterrupted: cancelling current file and stopping the queue");
            handle.stop();
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => {
                if console.show(event) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let summary = handle
        .join()
        .context("encoder thread terminated unexpectedly")?;
    if summary.failed > 0 {
        bail!("{} of {} file(s) failed", summary.failed, summary.total);
    }
    Ok(())
}

/// Prints queue events to the terminal
struct Console {
    verbose: bool,
    overall: String,
    progress_shown: bool,
}

impl Console {
    fn new(verbose: bool) -> Self {
        Self {
            verbose,
            overall: String::new(),
            progress_shown: false,
        }
    }

    fn end_progress_line(&mut self) {
        if self.progress_shown {
            println!();
            self.progress_shown = false;
        }
    }

    /// Returns true once the queue has finished
    fn show(&mut self, event: QueueEvent) -> bool {
        match event {
            QueueEvent::Log { message, level } => {
                if level == LogLevel::Debug && !self.verbose {
                    return false;
                }
                self.end_progress_line();
                match level {
                    LogLevel::Warning => println!("warning: {}", message.trim_start()),
                    LogLevel::Error => println!("error: {}", message.trim_start()),
                    _ => println!("{}", message),
                }
            }
            QueueEvent::OverallProgress {
                current,
                total,
                eta,
            } => {
                self.overall = match eta {
                    Some(eta) => format!("[{}/{}] Queue ETA {}", current, total, eta),
                    None => format!("[{}/{}]", current, total),
                };
            }
            QueueEvent::Progress { status, .. } => {
                print!("\r\x1b[2K{} {}", self.overall, status);
                let _ = io::stdout().flush();
                self.progress_shown = true;
            }
            QueueEvent::FileResult {
                filename,
                success,
                message,
            } => {
                self.end_progress_line();
                let mark = if success { "OK  " } else { "FAIL" };
                println!("{} {}: {}", mark, filename, message);
            }
            QueueEvent::Finished {
                was_manually_stopped,
                summary,
            } => {
                self.end_progress_line();
                if was_manually_stopped {
                    println!("Queue stopped by user");
                }
                println!(
                    "Done: {} succeeded, {} skipped, {} failed, {} cancelled of {} in {}",
                    summary.succeeded,
                    summary.skipped,
                    summary.failed,
                    summary.cancelled,
                    summary.total,
                    format_hms(summary.elapsed.as_secs_f64())
                );
                return true;
            }
        }
        false
    }
}

/// The read blocks until Enter, so an interrupt only lands after it
const CHOICE_PROMPT: &str = "Track number (Enter to skip; after Ctrl+C press Enter to stop): ";

/// Asks on the terminal which subtitle track to burn in
struct StdinChooser;

impl SubtitleChooser for StdinChooser {
    fn choose(&self, candidates: &[SubtitleTrack], filename: &str) -> Option<SubtitleTrack> {
        println!();
        println!("No default subtitle track in {}. Burn in one of:", filename);
        for (i, track) in candidates.iter().enumerate() {
            println!("  {}) {}", i + 1, track.label());
        }
        print!("{}", CHOICE_PROMPT);
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return None;
        }
        // Ctrl+C while waiting: answer "none" and let the event loop stop the queue
        if interrupt::pending() {
            return None;
        }
        parse_choice(&line, candidates.len()).map(|i| candidates[i].clone())
    }
}

/// 1-based menu answer to an index; anything else means "skip"
fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

fn handle_init_config(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };

    if path.exists() {
        let cfg = Config::load_from(&path)?;
        println!("Config loaded successfully from {}", path.display());
        println!("{:#?}", cfg);
        return Ok(());
    }

    println!("No config at {}, creating default config...", path.display());
    Config::default().save_to(&path)?;
    println!("Default config saved to {}", path.display());
    Ok(())
}

#[cfg(unix)]
mod interrupt {
    use std::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_sigint(_signal: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    /// Ctrl+C only raises a flag; the event loop stops the queue so ffmpeg's
    /// process group is killed instead of orphaned.
    pub fn install() {
        let handler = on_sigint as extern "C" fn(libc::c_int);
        unsafe {
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        }
    }

    pub fn take() -> bool {
        INTERRUPTED.swap(false, Ordering::SeqCst)
    }

    /// Peek without clearing; the event loop still sees the interrupt
    pub fn pending() -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }
}

#[cfg(not(unix))]
mod interrupt {
    pub fn install() {}

    pub fn take() -> bool {
        false
    }

    pub fn pending() -> bool {
        false
    }
}
