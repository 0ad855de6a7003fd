//! Audio output sinks
//!
//! A sink owns the `RenderConsumer` and calls it from its own realtime
//! context. Two sinks exist:
//! - `CpalOutput` (feature `output`): default audio device via cpal
//! - `NullOutput`: a paced thread that renders and discards, for headless runs
//!
//! No resampling happens here. The cpal sink asks the device for the stream's
//! sample rate and logs a warning when it has to fall back to another rate.

use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use crate::playback::render::RenderConsumer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Render period of the null sink
const NULL_SINK_PERIOD: Duration = Duration::from_millis(20);

/// Headless sink that consumes audio at realtime pace
pub struct NullOutput {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullOutput {
    /// Start rendering `render` at the pace of `format`
    pub fn start(mut render: RenderConsumer, format: AudioFormat) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let channels = format.channels.max(1) as usize;
        let frames_per_period =
            (format.sample_rate as u64 * NULL_SINK_PERIOD.as_millis() as u64 / 1000) as usize;

        let thread = std::thread::Builder::new()
            .name("wxyc-null-output".to_string())
            .spawn(move || {
                let mut scratch = vec![0.0f32; frames_per_period.max(1) * channels];
                let mut next = Instant::now();
                while thread_running.load(Ordering::Acquire) {
                    render.render(&mut scratch, channels);
                    next += NULL_SINK_PERIOD;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        info!(
            "Null output started: {} Hz, {} channel(s)",
            format.sample_rate, format.channels
        );

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            debug!("Null output stopped");
        }
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "output")]
pub use device::CpalOutput;

#[cfg(feature = "output")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, Stream, StreamConfig};
    use tracing::{error, warn};

    /// Default audio device output
    ///
    /// Not `Send` on every platform; keep it on the thread that created it.
    pub struct CpalOutput {
        stream: Option<Stream>,
        device_name: String,
        config: StreamConfig,
    }

    impl CpalOutput {
        /// Open the default output device and start rendering
        pub fn start(mut render: RenderConsumer, format: AudioFormat) -> Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device".to_string()))?;
            let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

            let config = Self::choose_config(&device, format)?;
            let channels = config.channels as usize;

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render.render(data, channels);
                    },
                    move |err| {
                        error!("Audio stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

            stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

            info!(
                "Audio output started on '{}': {} Hz, {} channel(s)",
                device_name, config.sample_rate.0, config.channels
            );

            Ok(Self {
                stream: Some(stream),
                device_name,
                config,
            })
        }

        /// Prefer an f32 config at the stream's rate, else the device default
        fn choose_config(device: &cpal::Device, format: AudioFormat) -> Result<StreamConfig> {
            let mut supported = device
                .supported_output_configs()
                .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

            let rate = cpal::SampleRate(format.sample_rate);
            let preferred = supported.find(|config| {
                config.sample_format() == SampleFormat::F32
                    && config.channels() >= format.channels
                    && config.min_sample_rate() <= rate
                    && config.max_sample_rate() >= rate
            });

            if let Some(config) = preferred {
                return Ok(config.with_sample_rate(rate).config());
            }

            let fallback = device
                .default_output_config()
                .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
            if fallback.sample_format() != SampleFormat::F32 {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    fallback.sample_format()
                )));
            }
            warn!(
                "Device does not support {} Hz, using {} Hz (no resampling)",
                format.sample_rate,
                fallback.sample_rate().0
            );
            Ok(fallback.config())
        }

        pub fn device_name(&self) -> &str {
            &self.device_name
        }

        pub fn sample_rate(&self) -> u32 {
            self.config.sample_rate.0
        }

        pub fn stop(&mut self) {
            if let Some(stream) = self.stream.take() {
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause stream: {}", e);
                }
                info!("Audio output stopped");
            }
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }
}
