use std::{collections::BTreeMap, path::Path, sync::Arc, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use transpipe::{
    FfmpegEngine, FfmpegLogLevel, HardwareDeviceType, HardwareFrameSharing, HardwareWrapper,
    OptionMap, Pipeline, ProgressCallback, ProgressInfo, TranscodeOptions, TranscodeSummary,
};

const CLI_AFTER_HELP: &str = "Examples:\n  transpipe input.mkv output.mp4\n  transpipe input.mkv clip.mkv --start 00:02:00 --duration 15 --exclude 2,3\n  transpipe input.mkv output.mp4 --hardware cuda --video-codec hevc --progress\n  transpipe input.ts output.mkv --no-duration-limit --json\n  transpipe completions zsh > _transpipe";

/// Exit status of a run stopped by the retry budget.
const EXIT_RETRIES_EXHAUSTED: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "transpipe",
    version,
    about = "Transcode a time window of a media file into a new container",
    after_help = CLI_AFTER_HELP,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    transcode: TranscodeArgs,
}

#[derive(Debug, Parser, Clone, Default)]
struct TranscodeArgs {
    /// Input media path or URL.
    input: Option<String>,

    /// Output media path or URL.
    output: Option<String>,

    /// Seek offset past the container start (seconds or HH:MM:SS[.ms]).
    #[arg(long)]
    start: Option<String>,

    /// Duration ceiling (seconds or HH:MM:SS[.ms]). Defaults to 30 seconds.
    #[arg(long, conflicts_with = "no_duration_limit")]
    duration: Option<String>,

    /// Transcode until the input ends.
    #[arg(long)]
    no_duration_limit: bool,

    /// Recoverable failures tolerated before the run stops.
    #[arg(long, default_value_t = transpipe::DEFAULT_RETRIES)]
    retries: u32,

    /// Packets cached before the header that force encoder setup.
    #[arg(long, default_value_t = transpipe::DEFAULT_MAX_CACHED_PACKETS)]
    max_cached_packets: usize,

    /// Pace output to real time once the header is written.
    #[arg(long)]
    streaming: bool,

    /// Only transcode these input streams (comma separated indices).
    #[arg(long, value_delimiter = ',')]
    include: Vec<usize>,

    /// Skip these input streams (comma separated indices).
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<usize>,

    /// Video codec to encode to (defaults to the source codec).
    #[arg(long)]
    video_codec: Option<String>,

    /// Audio codec to encode to (defaults to the source codec).
    #[arg(long)]
    audio_codec: Option<String>,

    /// Output container format (defaults to guessing from the output name).
    #[arg(long)]
    format: Option<String>,

    /// Hardware decode device (cuda, vaapi, dxva2, d3d11va, d3d12va, videotoolbox, qsv).
    #[arg(long)]
    hardware: Option<HardwareDeviceType>,

    /// Encoder wrappers allowed for video (none, nvidia, intel, amd, d3d12, mf, videotoolbox, vaapi, other).
    #[arg(long, value_delimiter = ',')]
    hw_wrappers: Vec<HardwareWrapper>,

    /// Keep video encoders off the decoder's hardware frame pool.
    #[arg(long)]
    no_hw_frame_sharing: bool,

    /// Demuxer option (key=value, repeatable).
    #[arg(long = "demuxer-opt", value_parser = parse_key_value)]
    demuxer_options: Vec<(String, String)>,

    /// Muxer option (key=value, repeatable).
    #[arg(long = "muxer-opt", value_parser = parse_key_value)]
    muxer_options: Vec<(String, String)>,

    /// Video decoder option (key=value, repeatable).
    #[arg(long = "video-decoder-opt", value_parser = parse_key_value)]
    video_decoder_options: Vec<(String, String)>,

    /// Video encoder option (key=value, repeatable).
    #[arg(long = "video-encoder-opt", value_parser = parse_key_value)]
    video_encoder_options: Vec<(String, String)>,

    /// Audio decoder option (key=value, repeatable).
    #[arg(long = "audio-decoder-opt", value_parser = parse_key_value)]
    audio_decoder_options: Vec<(String, String)>,

    /// Audio encoder option (key=value, repeatable).
    #[arg(long = "audio-encoder-opt", value_parser = parse_key_value)]
    audio_encoder_options: Vec<(String, String)>,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Show debug logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,

    /// Allow overwriting an existing output file.
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {value}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("option key cannot be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_timecode(value: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("time value cannot be empty".into());
    }

    if let Ok(seconds) = trimmed.parse::<f64>() {
        return Ok(Duration::from_secs_f64(seconds.max(0.0)));
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("invalid time format: {trimmed}").into());
    }

    let (hours, minutes, seconds_str) = if parts.len() == 3 {
        (parts[0].parse::<u64>()?, parts[1].parse::<u64>()?, parts[2])
    } else {
        (0_u64, parts[0].parse::<u64>()?, parts[1])
    };

    let seconds = seconds_str.parse::<f64>()?;
    let total_seconds = (hours as f64 * 3600.0) + (minutes as f64 * 60.0) + seconds;
    Ok(Duration::from_secs_f64(total_seconds.max(0.0)))
}

fn parse_log_level(value: &str) -> Option<FfmpegLogLevel> {
    match value.to_ascii_lowercase().as_str() {
        "quiet" => Some(FfmpegLogLevel::Quiet),
        "panic" => Some(FfmpegLogLevel::Panic),
        "fatal" => Some(FfmpegLogLevel::Fatal),
        "error" => Some(FfmpegLogLevel::Error),
        "warning" | "warn" => Some(FfmpegLogLevel::Warning),
        "info" => Some(FfmpegLogLevel::Info),
        "verbose" => Some(FfmpegLogLevel::Verbose),
        "debug" => Some(FfmpegLogLevel::Debug),
        "trace" => Some(FfmpegLogLevel::Trace),
        _ => None,
    }
}

fn option_map(pairs: Vec<(String, String)>) -> OptionMap {
    pairs.into_iter().collect::<BTreeMap<_, _>>()
}

fn ensure_writable_path(path: &str, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    // URLs are the protocol's business.
    if path.contains("://") {
        return Ok(());
    }

    let path = Path::new(path);
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .try_init();
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new(target: Option<Duration>) -> Result<Self, Box<dyn std::error::Error>> {
        let bar = match target {
            Some(target) => {
                let bar = ProgressBar::new(target.as_millis() as u64);
                let style = ProgressStyle::with_template(
                    "{spinner:.green} {bar:40.cyan/blue} {percent}% {msg}",
                )?;
                bar.set_style(style.progress_chars("##-"));
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
                bar
            }
        };
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(muxed) = info.muxed_duration {
            self.bar.set_position(muxed.as_millis() as u64);
        } else {
            self.bar.tick();
        }
        self.bar.set_message(format!(
            "{} read, {} muxed, {} cached, {} retries left",
            info.packets_read, info.packets_muxed, info.cached_packets, info.retries_remaining
        ));
    }
}

fn build_options(args: TranscodeArgs) -> Result<TranscodeOptions, Box<dyn std::error::Error>> {
    let input = args.input.ok_or("missing input location")?;
    let output = args.output.ok_or("missing output location")?;

    let mut options = TranscodeOptions::new(input, output)
        .with_retries(args.retries)
        .with_max_cached_packets(args.max_cached_packets)
        .with_streaming(args.streaming)
        .with_demuxer_options(option_map(args.demuxer_options))
        .with_muxer_options(option_map(args.muxer_options))
        .with_video_decoder_options(option_map(args.video_decoder_options))
        .with_video_encoder_options(option_map(args.video_encoder_options))
        .with_audio_decoder_options(option_map(args.audio_decoder_options))
        .with_audio_encoder_options(option_map(args.audio_encoder_options));

    if let Some(start) = &args.start {
        options = options.with_start_time(parse_timecode(start)?);
    }
    if args.no_duration_limit {
        options = options.with_duration(None);
    } else if let Some(duration) = &args.duration {
        options = options.with_duration(Some(parse_timecode(duration)?));
    }
    if !args.include.is_empty() {
        options = options.with_included_streams(args.include);
    }
    if !args.exclude.is_empty() {
        options = options.with_excluded_streams(args.exclude);
    }
    if let Some(codec) = args.video_codec {
        options = options.with_video_codec(codec);
    }
    if let Some(codec) = args.audio_codec {
        options = options.with_audio_codec(codec);
    }
    if let Some(format) = args.format {
        options = options.with_output_format(format);
    }
    if let Some(device) = args.hardware {
        options = options.with_hardware_device(device);
    }
    if !args.hw_wrappers.is_empty() {
        options = options.with_hardware_wrappers(args.hw_wrappers);
    }
    if args.no_hw_frame_sharing {
        options = options.with_hardware_frame_sharing(HardwareFrameSharing::Separate);
    }
    if args.progress {
        let progress = TerminalProgress::new(options.duration())?;
        options = options.with_progress(Arc::new(progress));
    }

    Ok(options)
}

fn print_summary(summary: &TranscodeSummary, as_json: bool) -> Result<(), serde_json::Error> {
    if as_json {
        let payload = json!({
            "stop_reason": summary.stop_reason.to_string(),
            "packets_read": summary.packets_read,
            "packets_muxed": summary.packets_muxed,
            "header_written": summary.header_written,
            "trailer_written": summary.trailer_written,
            "retries_remaining": summary.retries_remaining,
            "muxed_duration_seconds": summary.muxed_duration.map(|d| d.as_secs_f64()),
            "streams": summary.streams.iter().map(|stream| json!({
                "input_index": stream.input_index,
                "output_index": stream.output_index,
                "kind": stream.kind.to_string(),
                "state": stream.state.to_string(),
                "packets_written": stream.packets_written,
                "muxed_duration_seconds": stream.muxed_duration.map(|d| d.as_secs_f64()),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for stream in &summary.streams {
        let output = stream
            .output_index
            .map_or_else(|| "-".to_string(), |index| index.to_string());
        println!(
            "  #{} {} -> #{output}: {} packets, {}",
            stream.input_index, stream.kind, stream.packets_written, stream.state
        );
    }

    let headline = format!(
        "{} packets written ({}), {} retries left",
        summary.packets_muxed, summary.stop_reason, summary.retries_remaining
    );
    if summary.retries_exhausted() {
        println!("{} {}", "stopped:".red().bold(), headline.red());
    } else {
        println!("{} {}", "done:".green().bold(), headline.green());
    }
    Ok(())
}

fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "transpipe", &mut std::io::stdout());
        return Ok(0);
    }

    let args = cli.transcode;
    init_logging(args.verbose);

    if let Some(level) = &args.log_level {
        let parsed = parse_log_level(level).ok_or(format!("unsupported --log-level: {level}"))?;
        transpipe::set_ffmpeg_log_level(parsed);
    }

    if let Some(output) = &args.output {
        ensure_writable_path(output, args.overwrite)?;
    }

    let as_json = args.json;
    let options = build_options(args)?;
    let summary = Pipeline::new(FfmpegEngine::new()?, options).run()?;
    print_summary(&summary, as_json)?;

    Ok(if summary.retries_exhausted() {
        EXIT_RETRIES_EXHAUSTED
    } else {
        0
    })
}

fn main() {
    match run() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}
