//! cpal-backed audio graph
//!
//! A capture stream pushes mono samples into a lock-free ring; the
//! playback stream's callback drives the process handler. Device
//! callbacks may ask for any number of frames, so a [`BlockDriver`]
//! re-blocks them and always hands the handler exactly one period.
//!
//! Note: cpal::Stream is not Send, so the streams live on a dedicated
//! thread that is told to stop over a channel.

use super::{AudioGraph, ProcessBlock, SharedHandler};
use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::session::Direction;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::mpsc;

/// Capture ring depth in periods
const CAPTURE_PERIODS: usize = 8;

/// Which side of a device to look at
#[derive(Debug, Clone, Copy)]
enum DeviceKind {
    Input,
    Output,
}

/// Streams running on their own thread
struct Running {
    stop_tx: std_mpsc::Sender<()>,
    thread_handle: thread::JoinHandle<()>,
}

/// cpal-based audio graph implementation
pub struct CpalGraph {
    input_device: String,
    output_device: String,
    notify_channel: Option<u16>,
    sample_rate: u32,
    faults: mpsc::UnboundedSender<AudioError>,
    running: Option<Running>,
}

impl CpalGraph {
    /// Resolve the devices for `direction` and read the host rate
    pub fn new(
        config: &AudioConfig,
        direction: Direction,
        faults: mpsc::UnboundedSender<AudioError>,
    ) -> Result<Self, AudioError> {
        let (input_device, output_device, notify_channel) = match direction {
            Direction::Receive => (
                config.modem_in_device.clone(),
                config.voice_out_device.clone(),
                config.notify_channel,
            ),
            Direction::Transmit => (
                config.voice_in_device.clone(),
                config.modem_out_device.clone(),
                None,
            ),
        };

        let host = cpal::default_host();
        let output = open_device(&host, &output_device, DeviceKind::Output)?;
        // Fail early if the capture side is missing too
        open_device(&host, &input_device, DeviceKind::Input)?;

        let supported = output
            .default_output_config()
            .map_err(|e| AudioError::Connection(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;

        tracing::info!(
            "Audio graph ({}): {} -> {} at {} Hz",
            direction,
            input_device,
            output_device,
            sample_rate
        );

        Ok(Self {
            input_device,
            output_device,
            notify_channel,
            sample_rate,
            faults,
            running: None,
        })
    }
}

impl AudioGraph for CpalGraph {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn activate(&mut self, period: usize, handler: SharedHandler) -> Result<(), AudioError> {
        self.deactivate();

        if period == 0 {
            return Err(AudioError::StreamError("period must be non-zero".to_string()));
        }

        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), AudioError>>(1);

        let params = GraphParams {
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            notify_channel: self.notify_channel.map(usize::from),
            sample_rate: self.sample_rate,
            period,
            handler,
            faults: self.faults.clone(),
        };

        let thread_handle = thread::spawn(move || {
            let streams = match start_streams(params) {
                Ok(streams) => {
                    let _ = ready_tx.send(Ok(()));
                    streams
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            tracing::debug!("Audio graph thread started");
            let _ = stop_rx.recv();
            drop(streams);
            tracing::debug!("Audio graph thread stopped");
        });

        let started = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamError("audio thread exited".to_string()))
            .and_then(|result| result);

        match started {
            Ok(()) => {
                self.running = Some(Running {
                    stop_tx,
                    thread_handle,
                });
                tracing::info!("Audio graph active, period {} frames", period);
                Ok(())
            }
            Err(e) => {
                let _ = thread_handle.join();
                Err(e)
            }
        }
    }

    fn deactivate(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(());
            let _ = running.thread_handle.join();
            tracing::debug!("Audio graph deactivated");
        }
    }
}

impl Drop for CpalGraph {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Everything the stream thread needs
struct GraphParams {
    input_device: String,
    output_device: String,
    notify_channel: Option<usize>,
    sample_rate: u32,
    period: usize,
    handler: SharedHandler,
    faults: mpsc::UnboundedSender<AudioError>,
}

/// Build and start both streams; dropping the pair stops them
fn start_streams(params: GraphParams) -> Result<(cpal::Stream, cpal::Stream), AudioError> {
    let host = cpal::default_host();
    let input = open_device(&host, &params.input_device, DeviceKind::Input)?;
    let output = open_device(&host, &params.output_device, DeviceKind::Output)?;

    let input_supported = input
        .default_input_config()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    let output_supported = output
        .default_output_config()
        .map_err(|e| AudioError::Connection(e.to_string()))?;

    let input_config = cpal::StreamConfig {
        channels: input_supported.channels(),
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: buffer_size_for(input_supported.buffer_size(), params.period),
    };
    let output_config = cpal::StreamConfig {
        channels: output_supported.channels(),
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: buffer_size_for(output_supported.buffer_size(), params.period),
    };

    tracing::debug!(
        "Capture: {} channel(s) {:?}, playback: {} channel(s) {:?}",
        input_config.channels,
        input_supported.sample_format(),
        output_config.channels,
        output_supported.sample_format()
    );

    let (producer, consumer) = HeapRb::<f32>::new(params.period * CAPTURE_PERIODS).split();

    let capture = match input_supported.sample_format() {
        cpal::SampleFormat::F32 => {
            build_capture::<f32>(&input, &input_config, producer, err_fn(&params.faults))
        }
        cpal::SampleFormat::I16 => {
            build_capture::<i16>(&input, &input_config, producer, err_fn(&params.faults))
        }
        cpal::SampleFormat::U16 => {
            build_capture::<u16>(&input, &input_config, producer, err_fn(&params.faults))
        }
        format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
    }?;

    let driver = BlockDriver::new(params.period, params.sample_rate, consumer, params.handler);
    let routing = ChannelRouting {
        channels: output_config.channels as usize,
        notify_channel: params.notify_channel,
    };

    let playback = match output_supported.sample_format() {
        cpal::SampleFormat::F32 => {
            build_playback::<f32>(&output, &output_config, driver, routing, err_fn(&params.faults))
        }
        cpal::SampleFormat::I16 => {
            build_playback::<i16>(&output, &output_config, driver, routing, err_fn(&params.faults))
        }
        cpal::SampleFormat::U16 => {
            build_playback::<u16>(&output, &output_config, driver, routing, err_fn(&params.faults))
        }
        format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
    }?;

    capture
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start capture: {}", e)))?;
    playback
        .play()
        .map_err(|e| AudioError::StreamError(format!("Failed to start playback: {}", e)))?;

    Ok((capture, playback))
}

/// Request the period as a fixed device buffer when the device allows it
fn buffer_size_for(supported: &cpal::SupportedBufferSize, period: usize) -> cpal::BufferSize {
    match supported {
        cpal::SupportedBufferSize::Range { min, max }
            if (*min as usize..=*max as usize).contains(&period) =>
        {
            cpal::BufferSize::Fixed(period as u32)
        }
        _ => {
            tracing::debug!(
                "Device does not accept a {}-frame buffer, using its default",
                period
            );
            cpal::BufferSize::Default
        }
    }
}

/// Stream error callback: log and report to the control loop
fn err_fn(
    faults: &mpsc::UnboundedSender<AudioError>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    let faults = faults.clone();
    move |err| {
        tracing::error!("Audio stream error: {}", err);
        let _ = faults.send(AudioError::StreamError(err.to_string()));
    }
}

/// Build an input stream that mixes to mono and fills the capture ring
fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<f32>,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let sum: f32 = frame
                        .iter()
                        .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                        .sum();
                    // Overrun: the process side is behind, drop the sample
                    let _ = producer.try_push(sum / frame.len() as f32);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// Build an output stream whose callback drives the process handler
fn build_playback<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut driver: BlockDriver,
    routing: ChannelRouting,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(routing.channels) {
                    let (main, side) = driver.next_frame();
                    for (channel, sample) in frame.iter_mut().enumerate() {
                        *sample = T::from_sample(routing.mix(channel, main, side));
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

/// How the main and notification ports map onto device channels
#[derive(Debug, Clone, Copy)]
struct ChannelRouting {
    channels: usize,
    /// Dedicated notification channel; `None` overlays on every channel
    notify_channel: Option<usize>,
}

impl ChannelRouting {
    fn mix(&self, channel: usize, main: f32, side: f32) -> f32 {
        let value = match self.notify_channel {
            Some(notify) if notify == channel => side,
            Some(_) => main,
            None => main + side,
        };
        value.clamp(-1.0, 1.0)
    }
}

/// Re-blocks device callbacks into fixed periods
///
/// Output for a period is computed when the device first needs a frame
/// the previous period did not cover.
struct BlockDriver {
    sample_rate: u32,
    capture: HeapCons<f32>,
    handler: SharedHandler,
    input: Vec<f32>,
    output: Vec<f32>,
    side: Vec<f32>,
    pending: VecDeque<(f32, f32)>,
}

impl BlockDriver {
    fn new(period: usize, sample_rate: u32, capture: HeapCons<f32>, handler: SharedHandler) -> Self {
        Self {
            sample_rate,
            capture,
            handler,
            input: vec![0.0; period],
            output: vec![0.0; period],
            side: vec![0.0; period],
            pending: VecDeque::with_capacity(period * 2),
        }
    }

    /// Next (main, notification) sample pair for the device
    fn next_frame(&mut self) -> (f32, f32) {
        if self.pending.is_empty() {
            self.run_period();
        }
        self.pending.pop_front().unwrap_or((0.0, 0.0))
    }

    fn run_period(&mut self) {
        let captured = self.capture.pop_slice(&mut self.input);
        self.input[captured..].fill(0.0);

        match self.handler.try_lock() {
            Ok(mut handler) => {
                let mut block = ProcessBlock {
                    sample_rate: self.sample_rate,
                    input: &self.input,
                    output: &mut self.output,
                    side: &mut self.side,
                };
                handler.process(&mut block);
            }
            Err(_) => {
                // Engine is being swapped; play silence for this period
                self.output.fill(0.0);
                self.side.fill(0.0);
            }
        }

        self.pending
            .extend(self.output.iter().copied().zip(self.side.iter().copied()));
    }
}

/// Find an audio device by name with flexible matching.
///
/// Matching strategy (in order):
/// 1. "default" selects the host default device
/// 2. Exact match (case-sensitive)
/// 3. Exact match (case-insensitive)
/// 4. Substring match: device name contains the search term (case-insensitive)
fn open_device(
    host: &cpal::Host,
    device_name: &str,
    kind: DeviceKind,
) -> Result<cpal::Device, AudioError> {
    if device_name == "default" {
        let device = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| AudioError::DeviceNotFound("default".to_string()));
    }

    let devices: Vec<cpal::Device> = match kind {
        DeviceKind::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        DeviceKind::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    }
    .map_err(|e| AudioError::Connection(e.to_string()))?;

    let device_names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();

    match match_device_name(&device_names, device_name) {
        Some(index) => {
            tracing::debug!(
                "Found {:?} device: {} (searched for: {})",
                kind,
                device_names[index],
                device_name
            );
            devices
                .into_iter()
                .nth(index)
                .ok_or_else(|| AudioError::DeviceNotFound(device_name.to_string()))
        }
        None => {
            // No match found - provide helpful error with available devices
            let available = if device_names.is_empty() {
                format!("No audio {:?} devices found.", kind).to_lowercase()
            } else {
                format!(
                    "Available devices:\n{}",
                    device_names
                        .iter()
                        .map(|n| format!("  - {}", n))
                        .collect::<Vec<_>>()
                        .join("\n")
                )
            };

            Err(AudioError::DeviceNotFoundWithList {
                requested: device_name.to_string(),
                available,
            })
        }
    }
}

/// Index of the best match for `wanted` among `names`
fn match_device_name(names: &[String], wanted: &str) -> Option<usize> {
    let wanted_lower = wanted.to_lowercase();

    names
        .iter()
        .position(|n| n == wanted)
        .or_else(|| names.iter().position(|n| n.to_lowercase() == wanted_lower))
        .or_else(|| {
            names
                .iter()
                .position(|n| n.to_lowercase().contains(&wanted_lower))
        })
}
