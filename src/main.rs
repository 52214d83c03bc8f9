use std::cell::Cell;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use autoslice::config::Settings;
use autoslice::decode::decode_mono;
use autoslice::export::{ExportOptions, Exporter, ProgressSink};
use autoslice::format;
use autoslice::gaps::{detect_file_with_progress, DetectionParams};
use autoslice::lookup::{DiscogsClient, MetadataLookup};
use autoslice::matcher::{
    match_segments_to_tracklist, parse_duration, parse_tracklist_text, segment_spans,
    tracklist_from_parsed, ParsedTrack,
};
use autoslice::models::{Detection, ExportEvent, OutputFormat};
use autoslice::planner::TrackNaming;
use autoslice::session::Session;
use autoslice::transcode::FfmpegTranscoder;

#[derive(Parser)]
#[command(
    name = "autoslice",
    version,
    about = "Split continuous recordings into tagged tracks by detecting silence gaps"
)]
struct Cli {
    /// Config file (default: <config dir>/autoslice/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find silence gaps and print the resulting track boundaries
    Detect(DetectArgs),
    /// Cut a recording into tracks and export them
    Split(SplitArgs),
    /// Compare detected segments with a reference tracklist
    Match(MatchArgs),
    /// Search Discogs or print a release tracklist
    Lookup(LookupArgs),
}

#[derive(Args)]
struct DetectionFlags {
    /// Silence threshold in dB; a ceiling when auto threshold is on
    #[arg(long, allow_negative_numbers = true)]
    threshold_db: Option<f64>,

    /// Shortest silence that counts as a gap, in milliseconds
    #[arg(long)]
    min_duration_ms: Option<f64>,

    /// Auto threshold sensitivity, 0.0 to 1.0
    #[arg(long)]
    sensitivity: Option<f64>,

    /// Use --threshold-db as is instead of calibrating from the noise floor
    #[arg(long)]
    manual: bool,
}

impl DetectionFlags {
    fn apply(&self, mut params: DetectionParams) -> DetectionParams {
        if let Some(threshold) = self.threshold_db {
            params.threshold_db = threshold;
        }
        if let Some(min) = self.min_duration_ms {
            params.min_duration_ms = min;
        }
        if let Some(sensitivity) = self.sensitivity {
            params.sensitivity = sensitivity.clamp(0.0, 1.0);
        }
        if self.manual {
            params.auto_threshold = false;
        }
        params
    }
}

#[derive(Args)]
struct DetectArgs {
    /// Audio file to analyze
    file: PathBuf,

    #[command(flatten)]
    detection: DetectionFlags,

    /// Output as JSON instead of table
    #[arg(long)]
    json: bool,

    /// Write the detected markers to a session file
    #[arg(long)]
    save_session: Option<PathBuf>,
}

#[derive(Args)]
struct SplitArgs {
    /// Audio file to split
    file: PathBuf,

    /// Session file with markers, exclusions and names
    #[arg(long)]
    session: Option<PathBuf>,

    /// Split points, comma separated (seconds or M:SS)
    #[arg(long, value_delimiter = ',')]
    markers: Option<Vec<String>>,

    /// Region to cut out, as START-END (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Tracklist text file with one track per line
    #[arg(long)]
    names_file: Option<PathBuf>,

    /// Discogs release to take track titles from; also fills a blank artist, album or year
    #[arg(long, conflicts_with = "names_file")]
    release: Option<u64>,

    #[command(flatten)]
    detection: DetectionFlags,

    #[arg(long, default_value = "")]
    artist: String,

    #[arg(long, default_value = "")]
    album: String,

    #[arg(long)]
    year: Option<String>,

    #[arg(long)]
    genre: Option<String>,

    #[arg(long)]
    comment: Option<String>,

    #[arg(long)]
    album_artist: Option<String>,

    /// Cover image embedded in every track
    #[arg(long)]
    cover: Option<PathBuf>,

    /// Output format: wav, flac or mp3
    #[arg(long)]
    format: Option<OutputFormat>,

    /// MP3 bitrate in kbps
    #[arg(long)]
    bitrate: Option<u32>,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// Loudness-normalize each track
    #[arg(long)]
    normalize: bool,

    /// Base directory; tracks go to <dir>/<artist>/<album>/
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output the export report as JSON
    #[arg(long)]
    json: bool,

    /// Show export progress in an interactive TUI
    #[arg(long)]
    tui: bool,
}

#[derive(Args)]
struct MatchArgs {
    /// Audio file to detect segments in
    file: Option<PathBuf>,

    /// Take segments from a session file instead of detecting them
    #[arg(long)]
    session: Option<PathBuf>,

    /// Tracklist text file with start times
    #[arg(long, required_unless_present = "release", conflicts_with = "release")]
    tracklist: Option<PathBuf>,

    /// Discogs release to match against
    #[arg(long)]
    release: Option<u64>,

    #[command(flatten)]
    detection: DetectionFlags,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct LookupArgs {
    #[arg(long)]
    artist: Option<String>,

    #[arg(long)]
    album: Option<String>,

    /// Print this release's tracklist instead of searching
    #[arg(long)]
    release: Option<u64>,

    /// Download the release's primary image here (needs --release)
    #[arg(long, requires = "release")]
    save_cover: Option<PathBuf>,

    #[arg(long)]
    json: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "autoslice=debug" } else { "autoslice=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Seconds, or a `M:SS` / `H:MM:SS` timestamp.
fn parse_seconds(text: &str) -> Result<f64> {
    let text = text.trim();
    let secs = if text.contains(':') {
        parse_duration(text)
    } else {
        text.parse::<f64>()
            .with_context(|| format!("Invalid time '{}'", text))?
    };
    // parse_duration reports unparseable timestamps as 0
    let unparsed_timestamp = secs == 0.0 && text.chars().any(|c| c.is_ascii_digit() && c != '0');
    if !secs.is_finite() || secs < 0.0 || unparsed_timestamp {
        anyhow::bail!("Invalid time '{}'", text);
    }
    Ok(secs)
}

/// `START-END`, each side in seconds or as a timestamp.
fn parse_range(text: &str) -> Result<(f64, f64)> {
    let (start, end) = text
        .split_once('-')
        .with_context(|| format!("Invalid range '{}' (expected START-END)", text))?;
    Ok((parse_seconds(start)?, parse_seconds(end)?))
}

/// Run detection on `path`, showing decode progress when stderr is a terminal.
fn detect(path: &Path, params: &DetectionParams) -> Result<Detection> {
    let show = std::io::stderr().is_terminal();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let shown = Cell::new(None::<u32>);

    let result = detect_file_with_progress(path, params, |fraction| {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u32;
        if show && shown.get() != Some(percent) {
            shown.set(Some(percent));
            eprint!("\rDecoding {}: {:>3}%", name, percent);
        }
    });
    if shown.get().is_some() {
        eprintln!();
    }
    result.with_context(|| format!("Failed to analyze {}", path.display()))
}

/// ffmpeg from `[export] ffmpeg_path`, or the one on `PATH`.
fn transcoder(settings: &Settings) -> Result<FfmpegTranscoder> {
    let transcoder = match settings.export.ffmpeg_path {
        Some(ref path) => FfmpegTranscoder::with_binary(path),
        None => FfmpegTranscoder::new()?,
    };
    debug!("Using ffmpeg at {}", transcoder.binary().display());
    Ok(transcoder)
}

fn read_tracklist(path: &Path) -> Result<Vec<ParsedTrack>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tracklist: {}", path.display()))?;
    Ok(parse_tracklist_text(&text))
}

/// Prints export progress to stderr, one line per milestone.
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn emit(&self, event: ExportEvent) {
        match event {
            ExportEvent::StartTrack {
                track_number,
                total_tracks,
                track_name,
            } => eprintln!("[{}/{}] Encoding: {}", track_number, total_tracks, track_name),
            ExportEvent::RetryScheduled {
                track_number,
                attempt,
                message,
            } => eprintln!(
                "  Warning: track {} attempt {} failed, retrying: {}",
                track_number, attempt, message
            ),
            ExportEvent::Failed { message, .. } => eprintln!("  Error: {}", message),
            _ => {}
        }
    }
}

fn run_detect(args: DetectArgs, settings: &Settings) -> Result<()> {
    let params = args.detection.apply(settings.detection);
    let detection = detect(&args.file, &params)?;

    if let Some(ref path) = args.save_session {
        let mut session = Session::new(Some(args.file.clone()), Some(detection.duration_secs));
        session.set_markers(&detection.markers);
        session
            .save(path)
            .with_context(|| format!("Failed to save session: {}", path.display()))?;
        eprintln!("Session saved to {}", path.display());
    }

    if args.json {
        println!("{}", format::format_json(&detection));
    } else {
        println!("{}", format::format_detection_table(&detection));
    }
    Ok(())
}

fn run_split(args: SplitArgs, settings: &Settings) -> Result<()> {
    if args.json && args.tui {
        anyhow::bail!("--json and --tui cannot be used together");
    }

    let mut session = match args.session {
        Some(ref path) => Session::load(path)
            .with_context(|| format!("Failed to load session: {}", path.display()))?,
        None => Session::new(Some(args.file.clone()), None),
    };

    if let Some(ref markers) = args.markers {
        let times = markers
            .iter()
            .filter(|m| !m.trim().is_empty())
            .map(|m| parse_seconds(m))
            .collect::<Result<Vec<f64>>>()?;
        session.set_markers(&times);
    }

    for range in &args.exclude {
        let (start, end) = parse_range(range)?;
        session
            .add_excluded_region(start, end)
            .with_context(|| format!("Invalid exclusion '{}'", range))?;
    }

    let tracklist = match args.names_file {
        Some(ref path) => Some(read_tracklist(path)?),
        None => None,
    };
    let explicit_markers = args.session.is_some() || args.markers.is_some();
    let timed_tracklist = tracklist
        .as_ref()
        .is_some_and(|tracks| tracks.iter().any(|t| t.time.is_some()));

    match tracklist {
        // Start times in the names file stand in for detection.
        Some(ref tracks) if !explicit_markers && timed_tracklist => {
            session.apply_tracklist(tracks, true);
        }
        _ => {
            if !explicit_markers {
                let params = args.detection.apply(settings.detection);
                let detection = detect(&args.file, &params)?;
                session.set_total_duration(Some(detection.duration_secs));
                session.set_markers(&detection.markers);
            }
            if let Some(ref tracks) = tracklist {
                session.apply_tracklist(tracks, false);
            }
        }
    }

    let mut artist = args.artist.clone();
    let mut album = args.album.clone();
    let mut year = args.year.clone();
    if let Some(id) = args.release {
        let client = DiscogsClient::new(
            settings.lookup.discogs_token.clone(),
            &settings.lookup.user_agent,
        )?;
        let release = client.get_tracklist(id)?;
        session.apply_tracklist_titles(&release.tracklist);
        release.info.fill_blanks(&mut artist, &mut album, &mut year);
    }

    let format = args.format.unwrap_or(settings.export.format);
    let naming = TrackNaming {
        default_artist: artist.clone(),
        format,
        ..Default::default()
    };
    let segments = session.snapshot().plan(&naming)?;

    let mut options = ExportOptions::new(
        args.output_dir
            .clone()
            .unwrap_or_else(|| settings.export.output_dir.clone()),
        artist,
        album,
    );
    options.year = year;
    options.genre = args.genre;
    options.comment = args.comment;
    options.album_artist = args.album_artist;
    options.cover_art = args.cover;
    options.format = format;
    options.mp3_bitrate_kbps = args.bitrate.unwrap_or(settings.export.mp3_bitrate);
    options.sample_rate = args.sample_rate.or(settings.export.sample_rate);
    options.normalize = args.normalize || settings.export.normalize;

    let exporter = Exporter::new(transcoder(settings)?);

    if args.tui {
        let report = autoslice::tui::run(exporter, args.file, segments, options)?;
        println!("{}", format::format_export_table(&report));
        return Ok(());
    }

    if !args.json {
        eprintln!("{}", format::format_segments_table(&segments));
    }
    let report = exporter.export_tracks(&args.file, &segments, &options, &ConsoleSink)?;

    if args.json {
        println!("{}", format::format_json(&report));
    } else {
        println!("{}", format::format_export_table(&report));
    }
    Ok(())
}

fn run_match(args: MatchArgs, settings: &Settings) -> Result<()> {
    let (markers, total_duration) = match (&args.session, &args.file) {
        (Some(path), file) => {
            let session = Session::load(path)
                .with_context(|| format!("Failed to load session: {}", path.display()))?;
            let snapshot = session.snapshot();
            let total = match (snapshot.total_duration, file.as_ref().or(snapshot.source.as_ref())) {
                (Some(total), _) => total,
                (None, Some(source)) => decode_mono(source)
                    .with_context(|| format!("Failed to decode {}", source.display()))?
                    .duration_secs,
                (None, None) => anyhow::bail!("Session has no duration; pass the audio file too"),
            };
            (snapshot.markers, total)
        }
        (None, Some(file)) => {
            let params = args.detection.apply(settings.detection);
            let detection = detect(file, &params)?;
            (detection.markers, detection.duration_secs)
        }
        (None, None) => anyhow::bail!("Pass an audio file or --session"),
    };

    let tracklist = match (&args.tracklist, args.release) {
        (Some(path), _) => tracklist_from_parsed(&read_tracklist(path)?, total_duration),
        (None, Some(id)) => {
            let client = DiscogsClient::new(
                settings.lookup.discogs_token.clone(),
                &settings.lookup.user_agent,
            )?;
            client.get_tracklist(id)?.tracklist
        }
        (None, None) => anyhow::bail!("Pass --tracklist or --release"),
    };

    let spans = segment_spans(&markers, total_duration);
    let results = match_segments_to_tracklist(&spans, &tracklist);

    if args.json {
        println!("{}", format::format_json(&results));
    } else {
        println!("{}", format::format_match_table(&results));
    }
    Ok(())
}

fn run_lookup(args: LookupArgs, settings: &Settings) -> Result<()> {
    let client = DiscogsClient::new(
        settings.lookup.discogs_token.clone(),
        &settings.lookup.user_agent,
    )?;

    if let Some(id) = args.release {
        let release = client.get_tracklist(id)?;
        if let Some(ref dest) = args.save_cover {
            match release.info.images.first() {
                Some(url) => {
                    client.download_image(url, dest)?;
                    eprintln!("Cover saved to {}", dest.display());
                }
                None => eprintln!("Warning: release {} has no images", id),
            }
        }
        if args.json {
            println!("{}", format::format_json(&release));
        } else {
            println!("{}", format::format_release(&release));
        }
        return Ok(());
    }

    let (artist, album) = match (args.artist.as_deref(), args.album.as_deref()) {
        (None, None) => anyhow::bail!("lookup needs --artist and/or --album, or --release"),
        (artist, album) => (artist.unwrap_or(""), album.unwrap_or("")),
    };
    let releases = client.search(artist, album)?;
    if args.json {
        println!("{}", format::format_json(&releases));
    } else if releases.is_empty() {
        eprintln!("No releases found");
    } else {
        println!("{}", format::format_releases_table(&releases));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The TUI owns the terminal; logs still reach export.log.
    let tui_active = matches!(&cli.command, Command::Split(args) if args.tui);
    if !tui_active {
        init_tracing(cli.verbose);
    }

    let settings = Settings::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Detect(args) => run_detect(args, &settings),
        Command::Split(args) => run_split(args, &settings),
        Command::Match(args) => run_match(args, &settings),
        Command::Lookup(args) => run_lookup(args, &settings),
    }
}
