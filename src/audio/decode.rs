use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{AnalyzerError, Result};

/// Fully decoded audio, interleaved at its native rate.
#[derive(Clone, Debug)]
pub struct DecodedTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl DecodedTrack {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    pub fn duration_secs(&self) -> f32 {
        self.frames() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Decode a whole file. Anything that keeps it from being played is
/// reported as [`AnalyzerError::SourceUnavailable`].
pub fn decode_audio(path: &Path) -> Result<DecodedTrack> {
    let file = std::fs::File::open(path).map_err(|e| {
        AnalyzerError::unavailable(format!("failed to open {}: {}", path.display(), e))
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AnalyzerError::unavailable(format!("unrecognised audio format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AnalyzerError::unavailable("no decodable audio track"))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnalyzerError::unavailable("unknown sample rate"))?;
    let mut channels = track.codec_params.channels.map_or(0, |c| c.count());

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalyzerError::unavailable(format!("unsupported codec: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(AnalyzerError::unavailable(format!("failed to read packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                log::warn!("Skipping corrupt packet: {}", msg);
                continue;
            }
            Err(e) => return Err(AnalyzerError::unavailable(format!("decode failed: {}", e))),
        };

        let spec = *decoded.spec();
        // Containers without channel info only reveal it in the first decoded buffer.
        if channels == 0 {
            channels = spec.channels.count();
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() || channels == 0 {
        return Err(AnalyzerError::unavailable(format!(
            "{} contains no audio",
            path.display()
        )));
    }

    let track = DecodedTrack {
        samples,
        sample_rate,
        channels,
    };

    log::info!(
        "Decoded audio: {} frames, {} ch, {}Hz, {:.1}s",
        track.frames(),
        track.channels,
        track.sample_rate,
        track.duration_secs()
    );

    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unavailable() {
        let err = decode_audio(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, AnalyzerError::SourceUnavailable(_)));
    }

    #[test]
    fn test_non_audio_file_is_unavailable() {
        let path = std::env::temp_dir().join(format!("aquabeat-not-audio-{}.wav", std::process::id()));
        std::fs::write(&path, b"this is not a riff header at all").unwrap();

        let result = decode_audio(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(AnalyzerError::SourceUnavailable(_))));
    }

    fn write_pcm16_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_decodes_stereo_wav_interleaved() {
        let path = std::env::temp_dir().join(format!("aquabeat-stereo-{}.wav", std::process::id()));
        let samples: Vec<i16> = (0..1600).map(|i| if i % 2 == 0 { 16384 } else { -16384 }).collect();
        write_pcm16_wav(&path, 8000, 2, &samples);

        let result = decode_audio(&path);
        std::fs::remove_file(&path).ok();
        let track = result.unwrap();

        assert_eq!(track.sample_rate, 8000);
        assert_eq!(track.channels, 2);
        assert_eq!(track.frames(), 800);
        assert!((track.samples[0] - 0.5).abs() < 1e-3);
        assert!((track.samples[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_track_duration() {
        let track = DecodedTrack {
            samples: vec![0.0; 44100 * 2],
            sample_rate: 44100,
            channels: 2,
        };
        assert_eq!(track.frames(), 44100);
        assert!((track.duration_secs() - 1.0).abs() < 1e-6);
    }
}
