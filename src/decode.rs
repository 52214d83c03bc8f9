use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::{Result, SliceError};

/// Mono PCM decoded from a source file. Owned by the detection call that created it.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before downmixing
    pub channels: usize,
    pub duration_secs: f64,
}

/// Average interleaved frames into a single channel.
fn push_mono(out: &mut Vec<f32>, interleaved: &[f32], channels: usize) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Decode an audio file to mono `f32` PCM.
pub fn decode_mono(path: &Path) -> Result<DecodedAudio> {
    decode_mono_with_progress(path, |_| {})
}

/// Decode an audio file to mono `f32` PCM, reporting the fraction of bytes consumed.
pub fn decode_mono_with_progress(path: &Path, on_progress: impl Fn(f32)) -> Result<DecodedAudio> {
    let file = File::open(path)?;
    let file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| SliceError::Decode(format!("unrecognized format in {}: {}", path.display(), e)))?;

    let mut format = detected.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SliceError::Decode(format!("no audio track in {}", path.display())))?;

    let codec_params = track.codec_params.clone();
    let track_id = track.id;
    let mut sample_rate = codec_params.sample_rate.unwrap_or(44100);
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut bytes_decoded: u64 = 0;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut sample_buf_capacity: u64 = 0;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        bytes_decoded += packet.data.len() as u64;
        if file_size > 0 {
            on_progress((bytes_decoded as f32 / file_size as f32).min(1.0));
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count();
        let num_frames = decoded.frames() as u64;

        // Reuse SampleBuffer across packets; only reallocate if capacity is insufficient
        if sample_buf_capacity < num_frames {
            sample_buf = None;
        }
        let buf = sample_buf.get_or_insert_with(|| {
            sample_buf_capacity = num_frames;
            SampleBuffer::new(num_frames, spec)
        });

        buf.copy_interleaved_ref(decoded);
        push_mono(&mut samples, buf.samples(), channels);
    }

    on_progress(1.0);

    let duration_secs = samples.len() as f64 / sample_rate as f64;
    debug!(
        "Decoded {} mono samples ({:.2}s at {} Hz, {} source channels) from {}",
        samples.len(),
        duration_secs,
        sample_rate,
        channels,
        path.display()
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
        duration_secs,
    })
}
