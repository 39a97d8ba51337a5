//! Queued sample-rate conversion between the host graph and the codec
//!
//! Raw input is appended to a pending queue and converted in fixed
//! chunks with rubato's sinc resampler; converted samples collect in a
//! ready queue until dequeued. Equal rates bypass the resampler.
//!
//! The converter is mono. Samples are held as f32 internally and
//! converted at the edges with cpal's sample traits, so the same
//! converter feeds both the f32 host ports and the i16 codec frames.

use crate::error::AudioError;
use cpal::FromSample;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::collections::VecDeque;

/// Input frames consumed per resampler call
pub const CHUNK_FRAMES: usize = 64;

/// Stateful rate-conversion queue
pub struct RateConverter {
    input_rate: u32,
    output_rate: u32,
    resampler: Option<SincFixedIn<f32>>,
    /// Input not yet handed to the resampler
    pending: VecDeque<f32>,
    /// Converted samples waiting to be dequeued
    ready: VecDeque<f32>,
    chunk_in: Vec<Vec<f32>>,
    chunk_out: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter with queues pre-sized to `capacity` samples
    pub fn new(input_rate: u32, output_rate: u32, capacity: usize) -> Result<Self, AudioError> {
        let resampler = build_resampler(input_rate, output_rate)?;
        let out_frames = resampler
            .as_ref()
            .map(|r| r.output_frames_max())
            .unwrap_or(CHUNK_FRAMES);

        Ok(Self {
            input_rate,
            output_rate,
            resampler,
            pending: VecDeque::with_capacity(capacity.max(CHUNK_FRAMES)),
            ready: VecDeque::with_capacity(capacity.max(out_frames)),
            chunk_in: vec![vec![0.0; CHUNK_FRAMES]],
            chunk_out: vec![vec![0.0; out_frames]],
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Reconfigure the conversion ratio
    ///
    /// A no-op when both rates are unchanged. Otherwise the resampler is
    /// rebuilt; pending input and already converted output are kept.
    pub fn set_rates(&mut self, input_rate: u32, output_rate: u32) -> Result<(), AudioError> {
        if input_rate == self.input_rate && output_rate == self.output_rate {
            return Ok(());
        }

        tracing::debug!(
            "Rate converter {} Hz -> {} Hz (was {} Hz -> {} Hz)",
            input_rate,
            output_rate,
            self.input_rate,
            self.output_rate
        );

        let resampler = build_resampler(input_rate, output_rate)?;
        let out_frames = resampler
            .as_ref()
            .map(|r| r.output_frames_max())
            .unwrap_or(CHUNK_FRAMES);
        if self.chunk_out[0].len() < out_frames {
            self.chunk_out[0].resize(out_frames, 0.0);
        }

        self.resampler = resampler;
        self.input_rate = input_rate;
        self.output_rate = output_rate;
        self.convert_pending();
        Ok(())
    }

    /// Append raw input samples for conversion
    pub fn enqueue<S>(&mut self, samples: &[S])
    where
        S: Copy,
        f32: FromSample<S>,
    {
        self.pending
            .extend(samples.iter().map(|&s| <f32 as FromSample<S>>::from_sample_(s)));
        self.convert_pending();
    }

    /// Append `count` silent input samples
    pub fn enqueue_zeroes(&mut self, count: usize) {
        self.pending.extend(std::iter::repeat(0.0).take(count));
        self.convert_pending();
    }

    /// Number of converted samples ready to dequeue
    pub fn available_elems(&self) -> usize {
        self.ready.len()
    }

    /// Number of input samples still waiting for a full conversion chunk
    pub fn pending_elems(&self) -> usize {
        self.pending.len()
    }

    /// Resampler latency in output samples
    pub fn output_delay(&self) -> usize {
        self.resampler
            .as_ref()
            .map(|r| r.output_delay())
            .unwrap_or(0)
    }

    /// Move `out.len()` converted samples into `out`
    ///
    /// # Panics
    /// If fewer than `out.len()` samples are available. Callers must
    /// check [`available_elems`](Self::available_elems) first; reading
    /// past the queue would silently corrupt the stream.
    pub fn dequeue<S>(&mut self, out: &mut [S])
    where
        S: FromSample<f32>,
    {
        let count = out.len();
        assert!(
            count <= self.ready.len(),
            "rate converter dequeue of {} samples with only {} available",
            count,
            self.ready.len()
        );

        for (dst, src) in out.iter_mut().zip(self.ready.drain(..count)) {
            *dst = S::from_sample_(src);
        }
    }

    /// Push `extra` trailing zeroes through the converter to force out
    /// samples held in the filter delay line, then reset the filter
    ///
    /// At least enough zeroes to cover the resampler delay are pushed,
    /// whatever `extra` asks for, and zero-padded chunks are run until
    /// every queued input sample has a converted counterpart in the
    /// ready queue. Everything converted is left there for the caller to
    /// drain.
    pub fn flush(&mut self, extra: usize) {
        let input_rate = self.input_rate as usize;
        let output_rate = self.output_rate as usize;
        let delay = self.output_delay();

        // Input samples that take `delay` output samples to pass through
        let delay_input = (delay * input_rate + output_rate - 1) / output_rate;
        let padding = extra.max(delay_input);

        let target = self.ready.len()
            + (self.pending.len() + padding) * output_rate / input_rate;

        self.enqueue_zeroes(padding);

        if let Some(ref mut resampler) = self.resampler {
            while self.ready.len() < target {
                let chunk = &mut self.chunk_in[0];
                chunk.fill(0.0);
                for (dst, src) in chunk.iter_mut().zip(self.pending.drain(..)) {
                    *dst = src;
                }
                let produced =
                    process_chunk(resampler, &self.chunk_in, &mut self.chunk_out, &mut self.ready);
                if produced == 0 {
                    break;
                }
            }
            self.pending.clear();
            resampler.reset();
        }
    }

    /// Discard all queued samples and filter state
    pub fn clear(&mut self) {
        self.pending.clear();
        self.ready.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }

    fn convert_pending(&mut self) {
        match self.resampler {
            None => self.ready.extend(self.pending.drain(..)),
            Some(ref mut resampler) => {
                while self.pending.len() >= CHUNK_FRAMES {
                    for (dst, src) in self.chunk_in[0]
                        .iter_mut()
                        .zip(self.pending.drain(..CHUNK_FRAMES))
                    {
                        *dst = src;
                    }
                    process_chunk(resampler, &self.chunk_in, &mut self.chunk_out, &mut self.ready);
                }
            }
        }
    }
}

impl std::fmt::Debug for RateConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateConverter")
            .field("input_rate", &self.input_rate)
            .field("output_rate", &self.output_rate)
            .field("pending", &self.pending.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}

/// Run one chunk through the resampler and queue the output
fn process_chunk(
    resampler: &mut SincFixedIn<f32>,
    chunk_in: &[Vec<f32>],
    chunk_out: &mut [Vec<f32>],
    ready: &mut VecDeque<f32>,
) -> usize {
    match resampler.process_into_buffer(chunk_in, chunk_out, None) {
        Ok((_, produced)) => {
            ready.extend(chunk_out[0][..produced].iter().copied());
            produced
        }
        // Buffers are sized from the resampler itself
        Err(e) => panic!("rate converter buffers mis-sized: {}", e),
    }
}

fn build_resampler(
    input_rate: u32,
    output_rate: u32,
) -> Result<Option<SincFixedIn<f32>>, AudioError> {
    if input_rate == 0 || output_rate == 0 {
        return Err(AudioError::Converter(format!(
            "invalid rates {} Hz -> {} Hz",
            input_rate, output_rate
        )));
    }
    if input_rate == output_rate {
        return Ok(None);
    }

    let params = SincInterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.91,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        1.0,
        params,
        CHUNK_FRAMES,
        1,
    )
    .map(Some)
    .map_err(|e| AudioError::Converter(e.to_string()))
}
