//! Prompt file loading
//!
//! Prompts are decoded once on the control loop, mixed down to mono and
//! converted to the host rate so the process callback only ever copies
//! ready samples.

use crate::audio::converter::RateConverter;
use crate::error::AudioError;
use hound::WavReader;
use std::path::Path;

/// Load a WAV file as mono f32 samples at `host_rate`
pub fn load_prompt(path: &Path, host_rate: u32) -> Result<Vec<f32>, AudioError> {
    let file_error = |reason: String| AudioError::File {
        path: path.display().to_string(),
        reason,
    };

    let reader = WavReader::open(path).map_err(|e| file_error(e.to_string()))?;
    let spec = reader.spec();

    tracing::debug!(
        "Prompt {:?}: {} Hz, {} channel(s), {:?}",
        path,
        spec.sample_rate,
        spec.channels,
        spec.sample_format
    );

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
    };

    // Mix to mono if stereo
    let mono: Vec<f32> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    } else {
        samples
    };

    if mono.is_empty() {
        return Err(file_error("no samples".to_string()));
    }

    resample(&mono, spec.sample_rate, host_rate)
}

/// Convert a whole buffer between rates, trimming converter latency
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let mut converter = RateConverter::new(from_rate, to_rate, samples.len())?;
    let delay = converter.output_delay();
    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;

    converter.enqueue(samples);
    // Flushing always covers the filter delay
    converter.flush(0);

    let mut out = vec![0.0f32; converter.available_elems()];
    converter.dequeue(&mut out);

    let start = delay.min(out.len());
    let end = (start + expected).min(out.len());
    Ok(out[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for ch in 0..channels {
                let value = if ch == 0 { 16384 } else { -16384 };
                writer.write_sample(if i % 2 == 0 { value } else { value / 2 }).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_same_rate_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.wav");
        write_wav(&path, 8000, 1, 100);

        let samples = load_prompt(&path, 8000).unwrap();
        assert_eq!(samples.len(), 100);
        assert!((samples[0] - 0.5).abs() < 1e-6);
        assert!((samples[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_mixdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16000, 2, 50);

        let samples = load_prompt(&path, 16000).unwrap();
        assert_eq!(samples.len(), 50);
        assert!(samples.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_resampled_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tts.wav");
        write_wav(&path, 8000, 1, 8000);

        let samples = load_prompt(&path, 48000).unwrap();
        assert_eq!(samples.len(), 48000);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = load_prompt(Path::new("/nonexistent/notify.wav"), 48000);
        assert!(matches!(result, Err(AudioError::File { .. })));
    }
}
