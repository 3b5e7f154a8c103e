use super::plan::{EncodingPlan, RateControl};
use std::path::Path;
use std::process::Command;

/// Apply additional user-provided FFmpeg arguments to the command.
/// Uses shell-style parsing so quoted strings with spaces are preserved.
fn apply_additional_args(cmd: &mut Command, additional_args: &str) {
    if additional_args.trim().is_empty() {
        return;
    }

    if let Some(args) = shlex::split(additional_args) {
        for arg in args {
            cmd.arg(arg);
        }
    } else {
        // Unbalanced quotes: fall back to a plain whitespace split
        tracing::warn!(
            "could not parse additional ffmpeg args with shell rules: {}",
            additional_args
        );
        for arg in additional_args.split_whitespace() {
            cmd.arg(arg);
        }
    }
}

fn apply_rate_control(cmd: &mut Command, plan: &EncodingPlan) {
    match &plan.rate_control {
        RateControl::ConstQp { qp } => {
            cmd.arg("-rc").arg("constqp");
            cmd.arg("-qp").arg(qp.to_string());
        }
        RateControl::Bitrate {
            mode,
            target_mbps,
            min_mbps,
            max_mbps,
            buffer_mbps,
        } => {
            cmd.arg("-rc").arg(mode);
            cmd.arg("-b:v").arg(format!("{}M", target_mbps));
            cmd.arg("-minrate").arg(format!("{}M", min_mbps));
            cmd.arg("-maxrate").arg(format!("{}M", max_mbps));
            cmd.arg("-bufsize").arg(format!("{}M", buffer_mbps));

            // Lookahead and AQ only apply in bitrate mode
            if plan.video.lookahead > 0 {
                cmd.arg("-rc-lookahead")
                    .arg(plan.video.lookahead.to_string());
            }
            if plan.video.spatial_aq {
                cmd.arg("-spatial-aq").arg("1");
                cmd.arg("-aq-strength")
                    .arg(plan.video.aq_strength.to_string());
            }
        }
    }
}

fn apply_audio_settings(cmd: &mut Command, plan: &EncodingPlan) {
    let audio = &plan.audio;
    cmd.arg("-c:a").arg(&audio.codec);
    if let Some(bitrate) = &audio.bitrate {
        cmd.arg("-b:a").arg(bitrate);
    }
    if let Some(channels) = &audio.channels {
        cmd.arg("-ac").arg(channels);
    }
}

/// Build the full encode command for a plan
pub fn build_encode_cmd(ffmpeg: &Path, plan: &EncodingPlan) -> Command {
    let mut cmd = Command::new(ffmpeg);

    cmd.arg("-y").arg("-hide_banner");
    cmd.arg("-loglevel").arg("info");

    if let Some(decoder) = &plan.decoder {
        cmd.arg("-c:v").arg(decoder);
    }
    cmd.arg("-i").arg(&plan.input);

    let chain = plan
        .filters
        .iter()
        .map(|f| f.to_arg())
        .collect::<Vec<_>>()
        .join(",");
    if !chain.is_empty() {
        cmd.arg("-vf").arg(chain);
    }

    cmd.arg("-c:v").arg(&plan.video.encoder);
    cmd.arg("-preset").arg(&plan.video.preset);
    cmd.arg("-tune").arg(&plan.video.tuning);
    cmd.arg("-profile:v").arg(plan.bit_depth.profile());

    apply_rate_control(&mut cmd, plan);
    cmd.arg("-multipass").arg("0");

    apply_audio_settings(&mut cmd, plan);

    cmd.arg("-map").arg("0:v:0");
    cmd.arg("-map").arg("0:a:0?");

    if let Some(title) = &plan.audio.title {
        cmd.arg("-metadata:s:a:0").arg(format!("title={}", title));
    }
    if let Some(language) = &plan.audio.language {
        cmd.arg("-metadata:s:a:0").arg(format!("language={}", language));
    }

    cmd.arg("-map_metadata").arg("-1");
    cmd.arg("-movflags").arg("+faststart");
    cmd.arg("-tag:v").arg("hvc1");

    apply_additional_args(&mut cmd, &plan.additional_args);

    cmd.arg(&plan.output);
    cmd
}

/// Format a command as a shell-safe string for display
pub fn format_ffmpeg_cmd(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy().to_string();
    let args = cmd.get_args().map(|arg| {
        let s = arg.to_string_lossy();
        if s.contains(' ') {
            format!("\"{}\"", s)
        } else {
            s.to_string()
        }
    });

    std::iter::once(program)
        .chain(args)
        .collect::<Vec<_>>()
        .join(" ")
}
