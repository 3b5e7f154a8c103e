// Probe output -> plan -> ffmpeg arguments, without running anything

use crate::common::{nvenc_caps, probe_json};
use hevc_batch::config::Config;
use hevc_batch::engine::hardware::HwCapabilities;
use hevc_batch::engine::probe::parse_probe_json;
use hevc_batch::engine::{
    BitDepth, CropBox, EncodeOptions, EncodingPlanner, PlanInputs, ProbeResult, RateControl,
    VideoFilter, build_encode_cmd, format_ffmpeg_cmd,
};
use proptest::prelude::*;
use std::path::{Path, PathBuf};

fn probe(json: &str, config: &Config) -> ProbeResult {
    parse_probe_json(
        json,
        &config.subtitles.title_keyword,
        &config.subtitles.font_mimetypes,
    )
    .unwrap()
    .into_result(None)
    .unwrap()
}

fn args_of(plan: &hevc_batch::engine::EncodingPlan, config: &Config) -> Vec<String> {
    build_encode_cmd(&config.tools.ffmpeg, plan)
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect()
}

fn value_after(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}

#[test]
fn test_1080p_h264_default_run() {
    let config = Config::default();
    let probe = probe(&probe_json(&["Полные", "Надписи"]), &config);
    assert_eq!(
        probe.default_subtitle.as_ref().map(|t| t.stream_index),
        Some(3)
    );

    let options = EncodeOptions::default();
    let hw = nvenc_caps();
    let plan = EncodingPlanner::new(&config, &hw, &options).plan(PlanInputs {
        input: Path::new("/videos/ep01.mkv"),
        output: PathBuf::from("/videos/ENCODED_HEVC/ep01.mp4"),
        probe: &probe,
        crop: None,
        subtitle: None,
        extracted_fonts_dir: None,
    });

    assert_eq!(plan.bit_depth, BitDepth::Eight);
    assert_eq!(plan.decoder, None, "no hardware decoders listed");
    assert_eq!(plan.filters, vec![VideoFilter::Format(BitDepth::Eight)]);

    let args = args_of(&plan, &config);
    assert_eq!(value_after(&args, "-vf").as_deref(), Some("format=nv12"));
    assert_eq!(value_after(&args, "-b:v").as_deref(), Some("4M"));
    assert_eq!(value_after(&args, "-maxrate").as_deref(), Some("8M"));
    assert_eq!(value_after(&args, "-bufsize").as_deref(), Some("16M"));
    assert_eq!(value_after(&args, "-profile:v").as_deref(), Some("main"));
    assert!(!args.contains(&"-qp".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("/videos/ENCODED_HEVC/ep01.mp4"));
}

#[test]
fn test_lossless_ten_bit_hevc_with_hw_decoder() {
    let config = Config::default();
    let json = probe_json(&[])
        .replace(r#""codec_name": "h264""#, r#""codec_name": "hevc""#)
        .replace("yuv420p", "yuv420p10le");
    let probe = probe(&json, &config);

    let decoders = " V..... hevc_cuvid           Nvidia CUVID HEVC decoder (codec hevc)\n";
    let hw = HwCapabilities::from_listings(
        Some("GPU".to_string()),
        " V....D hevc_nvenc           NVIDIA NVENC hevc encoder (codec hevc)\n",
        decoders,
        " ... subtitles         V->V       Render text subtitles onto input video using the libass library.\n",
        "hevc_nvenc",
    );
    let options = EncodeOptions {
        lossless: true,
        ..EncodeOptions::default()
    };

    let plan = EncodingPlanner::new(&config, &hw, &options).plan(PlanInputs {
        input: Path::new("in.mkv"),
        output: PathBuf::from("out.mp4"),
        probe: &probe,
        crop: None,
        subtitle: None,
        extracted_fonts_dir: None,
    });

    assert_eq!(plan.decoder.as_deref(), Some("hevc_cuvid"));
    assert_eq!(plan.bit_depth, BitDepth::Ten);
    assert!(plan.rate_control.is_const_qp());

    let args = args_of(&plan, &config);
    assert_eq!(value_after(&args, "-rc").as_deref(), Some("constqp"));
    assert_eq!(value_after(&args, "-preset").as_deref(), Some("lossless"));
    assert_eq!(value_after(&args, "-profile:v").as_deref(), Some("main10"));
    assert_eq!(value_after(&args, "-vf").as_deref(), Some("format=p010le"));
    for flag in ["-b:v", "-maxrate", "-bufsize", "-rc-lookahead", "-spatial-aq"] {
        assert!(!args.contains(&flag.to_string()), "{} must not appear with constqp", flag);
    }
}

#[test]
fn test_subtitles_crop_and_scale_chain() {
    let config = Config::default();
    let probe = probe(&probe_json(&["Надписи"]), &config);
    let options = EncodeOptions {
        resolution: Some((1280, 720)),
        ..EncodeOptions::default()
    };
    let hw = nvenc_caps();
    let crop = CropBox {
        width: 1920,
        height: 800,
        x: 0,
        y: 140,
    };

    let plan = EncodingPlanner::new(&config, &hw, &options).plan(PlanInputs {
        input: Path::new("/v/ep.mkv"),
        output: PathBuf::from("/v/out/ep.mp4"),
        probe: &probe,
        crop: Some(crop),
        subtitle: Some(PathBuf::from("/tmp/enc_ep_x/subs_Надписи.ass")),
        extracted_fonts_dir: None,
    });

    // 1920x800 scaled to height 720 keeps the cropped aspect: 1728x720
    assert_eq!(plan.scale, Some((1728, 720)));
    let cmd = build_encode_cmd(&config.tools.ffmpeg, &plan);
    let rendered = format_ffmpeg_cmd(&cmd);
    assert!(
        rendered.contains(
            "-vf subtitles=filename=/tmp/enc_ep_x/subs_Надписи.ass,crop=1920:800:0:140,scale=w=1728:h=720:flags=lanczos,format=nv12"
        ),
        "unexpected command: {}",
        rendered
    );
}

#[test]
fn test_subtitles_dropped_without_filter_support() {
    let config = Config::default();
    let probe = probe(&probe_json(&["Надписи"]), &config);
    let options = EncodeOptions::default();
    let hw = HwCapabilities {
        subtitles_filter: false,
        ..nvenc_caps()
    };

    let plan = EncodingPlanner::new(&config, &hw, &options).plan(PlanInputs {
        input: Path::new("a.mkv"),
        output: PathBuf::from("a.mp4"),
        probe: &probe,
        crop: None,
        subtitle: Some(PathBuf::from("/tmp/subs.ass")),
        extracted_fonts_dir: None,
    });
    assert!(
        plan.filters
            .iter()
            .all(|f| !matches!(f, VideoFilter::Subtitles { .. }))
    );
}

proptest! {
    #[test]
    fn prop_rate_control_flags_are_exclusive(
        lossless in any::<bool>(),
        force_10bit in any::<bool>(),
        bitrate in 1u32..100,
        ten_bit_source in any::<bool>(),
    ) {
        let config = Config::default();
        let mut json = probe_json(&[]);
        if ten_bit_source {
            json = json.replace("yuv420p", "yuv420p10le");
        }
        let probe = probe(&json, &config);
        let options = EncodeOptions { lossless, force_10bit, bitrate_mbps: bitrate, ..EncodeOptions::default() };
        let hw = nvenc_caps();

        let plan = EncodingPlanner::new(&config, &hw, &options).plan(PlanInputs {
            input: Path::new("a.mkv"),
            output: PathBuf::from("a.mp4"),
            probe: &probe,
            crop: None,
            subtitle: None,
            extracted_fonts_dir: None,
        });
        let args = args_of(&plan, &config);

        let has_qp = args.contains(&"-qp".to_string());
        let has_bitrate = args.contains(&"-b:v".to_string());
        prop_assert!(has_qp != has_bitrate);
        prop_assert_eq!(has_qp, lossless);
        prop_assert_eq!(plan.bit_depth.is_ten(), force_10bit || (lossless && ten_bit_source));
        if let RateControl::Bitrate { target_mbps, max_mbps, buffer_mbps, .. } = plan.rate_control {
            prop_assert_eq!(target_mbps, bitrate);
            prop_assert_eq!(max_mbps, bitrate * 2);
            prop_assert_eq!(buffer_mbps, bitrate * 4);
        }
    }
}
