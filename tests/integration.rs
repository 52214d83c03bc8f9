use std::cell::RefCell;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

use autoslice::decode::decode_mono;
use autoslice::gaps::{detect_file, detect_file_with_progress, DetectionParams};
use autoslice::models::{Detection, ExcludedRegion, KeptRange};
use autoslice::planner::{plan_segments, TrackNaming};
use autoslice::session::Session;

const SAMPLE_RATE: u32 = 8000;
const LOUD: f32 = 0.5;
/// Peak amplitude of a sine whose RMS sits near -63 dBFS
const QUIET: f32 = 0.001;

/// Write a mono 16-bit WAV made of `(duration_secs, amplitude)` sine sections.
fn generate_sections_wav(dir: &Path, filename: &str, sections: &[(f64, f32)]) -> PathBuf {
    let num_channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let counts: Vec<usize> = sections
        .iter()
        .map(|(secs, _)| (secs * SAMPLE_RATE as f64).round() as usize)
        .collect();
    let num_samples: usize = counts.iter().sum();
    let byte_rate = SAMPLE_RATE * num_channels as u32 * bits_per_sample as u32 / 8;
    let block_align = num_channels * bits_per_sample / 8;
    let data_size = (num_samples * num_channels as usize * (bits_per_sample as usize / 8)) as u32;

    let path = dir.join(filename);
    let mut file = BufWriter::new(std::fs::File::create(&path).unwrap());

    // RIFF header
    file.write_all(b"RIFF").unwrap();
    file.write_all(&(36 + data_size).to_le_bytes()).unwrap();
    file.write_all(b"WAVE").unwrap();

    // fmt chunk
    file.write_all(b"fmt ").unwrap();
    file.write_all(&16u32.to_le_bytes()).unwrap(); // chunk size
    file.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    file.write_all(&num_channels.to_le_bytes()).unwrap();
    file.write_all(&SAMPLE_RATE.to_le_bytes()).unwrap();
    file.write_all(&byte_rate.to_le_bytes()).unwrap();
    file.write_all(&block_align.to_le_bytes()).unwrap();
    file.write_all(&bits_per_sample.to_le_bytes()).unwrap();

    // data chunk
    file.write_all(b"data").unwrap();
    file.write_all(&data_size.to_le_bytes()).unwrap();

    let mut n = 0usize;
    for (&(_, amplitude), &count) in sections.iter().zip(&counts) {
        for _ in 0..count {
            let t = n as f64 / SAMPLE_RATE as f64;
            let sample = amplitude * (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32;
            let sample_i16 = (sample * i16::MAX as f32) as i16;
            file.write_all(&sample_i16.to_le_bytes()).unwrap();
            n += 1;
        }
    }
    file.flush().unwrap();

    path
}

fn manual_params() -> DetectionParams {
    DetectionParams {
        threshold_db: -40.0,
        min_duration_ms: 1500.0,
        auto_threshold: false,
        ..Default::default()
    }
}

fn two_track_wav(dir: &Path) -> PathBuf {
    generate_sections_wav(dir, "set.wav", &[(60.0, LOUD), (4.0, QUIET), (66.0, LOUD)])
}

#[test]
fn test_decode_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = generate_sections_wav(dir.path(), "tone.wav", &[(2.0, LOUD)]);

    let audio = decode_mono(&path).unwrap();
    assert_eq!(audio.sample_rate, SAMPLE_RATE);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 2 * SAMPLE_RATE as usize);
    assert!((audio.duration_secs - 2.0).abs() < 1e-6);
    let peak = audio.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!((peak - LOUD).abs() < 0.01, "peak {}", peak);
}

#[test]
fn test_four_second_gap_splits_in_two() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_track_wav(dir.path());

    let detection = detect_file(&path, &manual_params()).unwrap();

    assert_eq!(detection.silence_regions.len(), 1);
    let region = &detection.silence_regions[0];
    assert!((region.start_time - 60.0).abs() < 0.1, "start {}", region.start_time);
    assert!((region.end_time - 64.0).abs() < 0.1, "end {}", region.end_time);
    assert_eq!(detection.markers.len(), 1);
    assert!((detection.markers[0] - 62.0).abs() < 0.1, "marker {}", detection.markers[0]);
    assert_eq!(detection.track_count, 2);
    assert_eq!(detection.passes, 1);
    assert!((detection.duration_secs - 130.0).abs() < 1e-6);
}

#[test]
fn test_short_gap_is_not_a_split() {
    let dir = tempfile::tempdir().unwrap();
    let path = generate_sections_wav(
        dir.path(),
        "set.wav",
        &[(60.0, LOUD), (1.0, QUIET), (69.0, LOUD)],
    );

    let detection = detect_file(&path, &manual_params()).unwrap();

    assert!(detection.silence_regions.is_empty());
    assert!(detection.markers.is_empty());
    assert_eq!(detection.track_count, 1);
}

#[test]
fn test_all_silent_input_has_no_markers() {
    let dir = tempfile::tempdir().unwrap();
    let path = generate_sections_wav(dir.path(), "silence.wav", &[(30.0, 0.0)]);

    let detection = detect_file(&path, &DetectionParams::default()).unwrap();
    assert!(detection.markers.is_empty());
    assert_eq!(detection.track_count, 1);
}

#[test]
fn test_detection_reports_decode_progress() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_track_wav(dir.path());
    let seen = RefCell::new(Vec::new());

    let detection =
        detect_file_with_progress(&path, &manual_params(), |f| seen.borrow_mut().push(f)).unwrap();

    let seen = seen.into_inner();
    assert_eq!(detection.track_count, 2);
    assert!(seen.len() > 1);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards");
    assert!(seen.iter().all(|f| (0.0..=1.0).contains(f)));
    assert_eq!(seen.last(), Some(&1.0));
}

#[test]
fn test_detection_to_plan() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_track_wav(dir.path());
    let detection = detect_file(&path, &manual_params()).unwrap();

    let mut session = Session::new(Some(path.clone()), Some(detection.duration_secs));
    session.set_markers(&detection.markers);
    session.add_excluded_region(100.0, 110.0).unwrap();

    let naming = TrackNaming {
        default_artist: "Band".to_string(),
        ..Default::default()
    };
    let segments = session.snapshot().plan(&naming).unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].file_name, "01 - Track 01.flac");
    assert_eq!(segments[1].exclusions, vec![ExcludedRegion::new(100.0, 110.0)]);
    assert_eq!(segments[1].kept_ranges.len(), 2);
    assert_eq!(segments[1].kept_ranges[1], KeptRange { start: 110.0, end: None });
}

#[test]
fn test_markers_with_exclusion_plan() {
    let segments = plan_segments(
        &[30.0, 90.0],
        &[ExcludedRegion::new(40.0, 45.0)],
        &TrackNaming::default(),
        Some(120.0),
    )
    .unwrap();

    assert_eq!(segments.len(), 3);
    assert_eq!((segments[0].start, segments[0].end), (0.0, Some(30.0)));
    assert!(segments[0].exclusions.is_empty());
    assert_eq!(segments[1].exclusions, vec![ExcludedRegion::new(40.0, 45.0)]);
    assert_eq!(
        segments[1].kept_ranges,
        vec![
            KeptRange { start: 30.0, end: Some(40.0) },
            KeptRange { start: 45.0, end: Some(90.0) },
        ]
    );
    assert_eq!((segments[2].start, segments[2].end), (90.0, None));
    assert!(segments[2].exclusions.is_empty());
}

// --- CLI tests ---

fn missing_config(dir: &Path) -> String {
    dir.join("no-config.toml").display().to_string()
}

#[test]
fn test_json_and_tui_conflict() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .args(["split", "set.wav", "--markers", "30", "--json", "--tui"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "--json and --tui cannot be used together",
        ));
}

#[test]
fn test_detect_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_track_wav(dir.path());

    let output = cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .arg("detect")
        .arg(&path)
        .args(["--manual", "--threshold-db=-40", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let detection: Detection = serde_json::from_slice(&output).unwrap();
    assert_eq!(detection.track_count, 2);
    assert_eq!(detection.markers.len(), 1);
}

#[test]
fn test_detect_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_track_wav(dir.path());

    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .arg("detect")
        .arg(&path)
        .args(["--manual", "--threshold-db=-40"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Number of tracks:  2"));
}

#[test]
fn test_detect_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .arg("detect")
        .arg(dir.path().join("nope.wav"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to analyze"));
}

#[test]
fn test_malformed_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[detection\n").unwrap();

    cargo_bin_cmd!("autoslice")
        .arg("--config")
        .arg(&config)
        .args(["detect", "set.wav"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_saved_session_matches_tracklist() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_track_wav(dir.path());
    let session = dir.path().join("session.json");
    let tracklist = dir.path().join("tracklist.txt");
    std::fs::write(&tracklist, "1. 0:00 Band - Opener\n2. 1:02 Band - Closer\n").unwrap();

    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .arg("detect")
        .arg(&path)
        .args(["--manual", "--threshold-db=-40", "--save-session"])
        .arg(&session)
        .assert()
        .success();

    let loaded = Session::load(&session).unwrap();
    assert_eq!(loaded.markers().len(), 1);

    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .args(["match", "--session"])
        .arg(&session)
        .arg("--tracklist")
        .arg(&tracklist)
        .assert()
        .success()
        .stdout(predicate::str::contains("Opener"))
        .stdout(predicate::str::contains("Closer"))
        .stdout(predicate::str::contains("high"));
}

#[test]
fn test_match_needs_input() {
    let dir = tempfile::tempdir().unwrap();
    let tracklist = dir.path().join("tracklist.txt");
    std::fs::write(&tracklist, "0:00 Opener\n").unwrap();

    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .arg("match")
        .arg("--tracklist")
        .arg(&tracklist)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Pass an audio file or --session"));
}

#[test]
fn test_split_rejects_bad_exclusion() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .args(["split", "set.wav", "--markers", "30", "--exclude", "45-40"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid exclusion '45-40'"));
}

#[test]
fn test_split_release_conflicts_with_names_file() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("autoslice")
        .args(["--config", &missing_config(dir.path())])
        .args(["split", "set.wav", "--release", "1", "--names-file", "names.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_split_uses_configured_ffmpeg() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = dir.path().join("no-such-ffmpeg");
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!("[export]\nffmpeg_path = {:?}\n", ffmpeg.display().to_string()),
    )
    .unwrap();

    cargo_bin_cmd!("autoslice")
        .arg("--config")
        .arg(&config)
        .args(["split", "set.wav", "--markers", "30", "--artist", "Band", "--album", "Live"])
        .arg("--output-dir")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to spawn ffmpeg"));
}
