//! cpal implementation of [`AudioDevice`].

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::context::AudioDevice;
use super::node::{ActiveStream, SampleSink};
use super::source::{LiveCapture, PlayableMedia};
use crate::error::{AnalyzerError, Result};

/// Capture device description for listings.
#[derive(Debug, Clone)]
pub struct InputDeviceInfo {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

pub struct CpalDevice {
    host: cpal::Host,
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalDevice {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn list_input_devices(&self) -> Result<Vec<InputDeviceInfo>> {
        let default_name = self
            .host
            .default_input_device()
            .and_then(|d| d.name().ok());

        let devices = self
            .host
            .input_devices()
            .map_err(|e| AnalyzerError::unavailable(format!("failed to enumerate input devices: {}", e)))?;

        let mut infos = Vec::new();
        for device in devices {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let (channels, sample_rate) = match device.default_input_config() {
                Ok(config) => (config.channels(), config.sample_rate().0),
                Err(_) => continue,
            };
            infos.push(InputDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels,
                sample_rate,
            });
        }
        Ok(infos)
    }

    fn find_input(&self, query: Option<&str>) -> Result<cpal::Device> {
        let Some(query) = query else {
            return self.host.default_input_device().ok_or_else(|| {
                AnalyzerError::unavailable("no audio input device available (is microphone access allowed?)")
            });
        };

        let needle = query.to_lowercase();
        let devices = self
            .host
            .input_devices()
            .map_err(|e| AnalyzerError::unavailable(format!("failed to enumerate input devices: {}", e)))?;

        for device in devices {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains(&needle) {
                    return Ok(device);
                }
            }
        }
        Err(AnalyzerError::unavailable(format!("no input device matching '{}'", query)))
    }
}

impl AudioDevice for CpalDevice {
    fn resume(&self) -> Result<()> {
        // cpal hosts have no suspended state; ready means something to open.
        let has_output = self.host.default_output_device().is_some();
        let has_input = self.host.default_input_device().is_some();
        if !has_output && !has_input {
            return Err(AnalyzerError::unavailable(format!(
                "audio host '{}' has no input or output device",
                self.host.id().name()
            )));
        }
        log::info!(
            "Audio host: {} (output: {}, input: {})",
            self.host.id().name(),
            has_output,
            has_input
        );
        Ok(())
    }

    fn open_playable(&self, media: PlayableMedia, sink: SampleSink) -> Result<Box<dyn ActiveStream>> {
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| AnalyzerError::unavailable("no audio output device found"))?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let track = media.into_track();
        let channels = track.channels;
        let sample_rate = track.sample_rate;
        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let samples = track.samples;
        let mut cursor = 0usize;
        let ended = Arc::new(AtomicBool::new(false));
        let ended_cb = Arc::clone(&ended);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let n = (samples.len() - cursor).min(data.len());
                    data[..n].copy_from_slice(&samples[cursor..cursor + n]);
                    data[n..].fill(0.0);
                    cursor += n;

                    // Analyse exactly what is heard, trailing silence included.
                    sink.push(data, channels);

                    if cursor >= samples.len() {
                        ended_cb.store(true, Ordering::Release);
                    }
                },
                |err| log::warn!("Audio output stream error: {}", err),
                None,
            )
            .map_err(|e| {
                AnalyzerError::unavailable(format!(
                    "output device '{}' cannot play {} Hz / {} ch: {}",
                    device_name, sample_rate, channels, e
                ))
            })?;

        stream
            .play()
            .map_err(|e| AnalyzerError::unavailable(format!("failed to start playback: {}", e)))?;

        log::info!("Playback: {} @ {}Hz, {} ch", device_name, sample_rate, channels);

        Ok(Box::new(CpalStream {
            stream,
            ended: Some(ended),
        }))
    }

    fn open_live(&self, capture: LiveCapture, sink: SampleSink) -> Result<Box<dyn ActiveStream>> {
        let device = self.find_input(capture.device_query())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device.default_input_config().map_err(|e| {
            AnalyzerError::unavailable(format!("input device '{}' has no usable config: {}", device_name, e))
        })?;
        let channels = supported.channels() as usize;
        let sample_rate = supported.sample_rate().0;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stream = match sample_format {
            SampleFormat::F32 => build_input::<f32>(&device, &config, channels, sink),
            SampleFormat::I16 => build_input::<i16>(&device, &config, channels, sink),
            SampleFormat::U16 => build_input::<u16>(&device, &config, channels, sink),
            other => Err(AnalyzerError::unavailable(format!(
                "unsupported input sample format {:?}",
                other
            ))),
        }?;

        stream
            .play()
            .map_err(|e| AnalyzerError::unavailable(format!("failed to start capture: {}", e)))?;

        log::info!("Capture: {} @ {}Hz, {} ch, {:?}", device_name, sample_rate, channels, sample_format);

        Ok(Box::new(CpalStream { stream, ended: None }))
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sink: SampleSink,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut converted: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converted.clear();
                converted.extend(data.iter().map(|&s| f32::from_sample(s)));
                sink.push(&converted, channels);
            },
            |err| log::warn!("Audio input stream error: {}", err),
            None,
        )
        .map_err(|e| AnalyzerError::unavailable(format!("failed to open capture stream: {}", e)))
}

struct CpalStream {
    stream: cpal::Stream,
    ended: Option<Arc<AtomicBool>>,
}

impl ActiveStream for CpalStream {
    fn stop(&mut self) {
        // The device itself is closed when the stream is dropped right after.
        if let Err(e) = self.stream.pause() {
            log::warn!("Failed to pause stream: {}", e);
        }
    }

    fn is_ended(&self) -> bool {
        self.ended
            .as_ref()
            .is_some_and(|e| e.load(Ordering::Acquire))
    }
}
