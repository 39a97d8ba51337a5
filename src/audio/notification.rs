//! Notification and prompt audio queue
//!
//! Prompt audio is produced on the control loop and consumed inside the
//! process callback, so the queue is a single-producer single-consumer
//! ring: pushing and popping never lock or allocate.
//!
//! Built-in startup tones are generated programmatically so no binary
//! assets have to ship with the daemon.

use crate::audio::wav;
use crate::codec::EncryptionStatus;
use crate::config::NotifyConfig;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::path::Path;

/// Create a notification queue holding up to `capacity` samples
pub fn channel(capacity: usize) -> (NotificationSender, NotificationMixer) {
    let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
    (
        NotificationSender { producer },
        NotificationMixer { consumer },
    )
}

/// Control-loop side of the queue
pub struct NotificationSender {
    producer: HeapProd<f32>,
}

impl NotificationSender {
    /// Append prompt samples; returns how many fit
    pub fn queue(&mut self, samples: &[f32]) -> usize {
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            tracing::warn!(
                "Notification queue full, dropped {} of {} samples",
                samples.len() - pushed,
                samples.len()
            );
        }
        pushed
    }

    /// Append `count` samples of silence
    pub fn queue_silence(&mut self, count: usize) -> usize {
        const ZEROES: [f32; 256] = [0.0; 256];

        let mut remaining = count;
        while remaining > 0 {
            let step = remaining.min(ZEROES.len());
            let pushed = self.producer.push_slice(&ZEROES[..step]);
            remaining -= pushed;
            if pushed < step {
                tracing::warn!("Notification queue full, dropped {} silent samples", remaining);
                break;
            }
        }
        count - remaining
    }

    /// Free space left in the queue
    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }
}

/// Callback side of the queue
pub struct NotificationMixer {
    consumer: HeapCons<f32>,
}

impl NotificationMixer {
    /// Move up to `out.len()` queued samples to the front of `out`
    ///
    /// The rest of `out` is left untouched. Returns the count moved.
    pub fn take_into(&mut self, out: &mut [f32]) -> usize {
        self.consumer.pop_slice(out)
    }

    /// Fill `out` with queued samples, then silence once the queue runs dry
    pub fn mix_into(&mut self, out: &mut [f32]) -> usize {
        let taken = self.take_into(out);
        out[taken..].fill(0.0);
        taken
    }

    /// Samples waiting to be played
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

/// Startup prompts, already at the host rate
pub struct NotificationSounds {
    secure: Vec<f32>,
    insecure: Vec<f32>,
}

impl NotificationSounds {
    /// Load the configured startup prompts, falling back to built-in tones
    pub fn load(config: &NotifyConfig, host_rate: u32) -> Self {
        let load_or = |path: Option<&Path>, fallback: fn(u32) -> Vec<f32>| match path {
            Some(path) => match wav::load_prompt(path, host_rate) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!("{}, using built-in tone", e);
                    fallback(host_rate)
                }
            },
            None => fallback(host_rate),
        };

        Self {
            secure: load_or(config.secure_file.as_deref(), secure_tone),
            insecure: load_or(config.insecure_file.as_deref(), insecure_tone),
        }
    }

    /// Prompt matching the given encryption status
    pub fn for_status(&self, status: EncryptionStatus) -> &[f32] {
        match status {
            EncryptionStatus::Encrypted => &self.secure,
            EncryptionStatus::Plaintext => &self.insecure,
        }
    }
}

// === Tone Generation ===

/// Rising two-tone chirp announcing an encrypted session
pub fn secure_tone(sample_rate: u32) -> Vec<f32> {
    let mut samples = generate_tone(sample_rate, 660.0, 120, 10);
    samples.extend(generate_tone(sample_rate, 990.0, 180, 10));
    samples
}

/// Three low beeps announcing a plaintext session
pub fn insecure_tone(sample_rate: u32) -> Vec<f32> {
    let gap = (sample_rate as usize * 60) / 1000;
    let mut samples = Vec::new();
    for _ in 0..3 {
        samples.extend(generate_tone(sample_rate, 440.0, 100, 8));
        samples.extend(std::iter::repeat(0.0).take(gap));
    }
    samples
}

/// Sine tone with a linear fade in and out
fn generate_tone(sample_rate: u32, frequency: f32, duration_ms: u32, fade_ms: u32) -> Vec<f32> {
    let num_samples = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let fade_samples = ((sample_rate as u64 * fade_ms as u64 / 1000) as usize).max(1);

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let mut amplitude = (2.0 * std::f32::consts::PI * frequency * t).sin();

            if i < fade_samples {
                amplitude *= i as f32 / fade_samples as f32;
            } else if i >= num_samples.saturating_sub(fade_samples) {
                amplitude *= (num_samples - i) as f32 / fade_samples as f32;
            }

            amplitude * 0.5
        })
        .collect()
}
