//! Microphone capture using cpal.
//!
//! Records mono i16 at the device's preferred rate and hands the samples
//! back as a WAV clip.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};

use super::{AudioSource, CaptureError, VoiceClip};

const PREFERRED_RATE: u32 = 48_000;

/// Default input device.
///
/// The cpal Stream is not Send, so it lives on a dedicated OS thread that
/// is parked until the keep-alive sender is dropped.
pub struct MicrophoneSource {
    keep_alive: Option<mpsc::Sender<()>>,
    samples: Arc<Mutex<Vec<i16>>>,
    rate: u32,
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self {
            keep_alive: None,
            samples: Arc::new(Mutex::new(Vec::new())),
            rate: PREFERRED_RATE,
        }
    }

    fn release(&mut self) {
        // Dropping the sender wakes the stream thread, which drops the stream.
        self.keep_alive.take();
    }
}

impl Default for MicrophoneSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        let (keep_tx, keep_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, CaptureError>>();
        let samples = Arc::clone(&self.samples);

        thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(d) => d,
                None => {
                    let _ = ready_tx.send(Err(CaptureError::Denied(
                        "no audio input device".to_string(),
                    )));
                    return;
                }
            };

            let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
            tracing::info!("Audio input device: {}", dev_name);

            let (config, rate) = match pick_config(&device) {
                Some(c) => c,
                None => {
                    let _ = ready_tx.send(Err(CaptureError::Failed(format!(
                        "no usable input config for {}",
                        dev_name
                    ))));
                    return;
                }
            };

            let sink = Arc::clone(&samples);
            let stream = match device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut acc) = sink.lock() {
                        acc.extend_from_slice(data);
                    }
                },
                move |err| {
                    tracing::warn!("Audio input stream error: {}", err);
                },
                None,
            ) {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(CaptureError::Denied(e.to_string())));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::Denied(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(rate));
            let _ = keep_rx.recv();
            drop(stream);
        });

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(rate)) => {
                if let Ok(mut acc) = self.samples.lock() {
                    acc.clear();
                }
                self.rate = rate;
                self.keep_alive = Some(keep_tx);
                tracing::info!("Microphone capture started at {}Hz", rate);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Failed(
                "audio device did not start in time".to_string(),
            )),
        }
    }

    fn stop(&mut self) -> Result<VoiceClip, CaptureError> {
        if self.keep_alive.is_none() {
            return Err(CaptureError::Failed("not recording".to_string()));
        }
        self.release();
        let samples = self
            .samples
            .lock()
            .map(|mut acc| std::mem::take(&mut *acc))
            .map_err(|_| CaptureError::Failed("capture buffer poisoned".to_string()))?;
        Ok(VoiceClip::from_pcm16(&samples, self.rate))
    }

    fn cancel(&mut self) {
        self.release();
        if let Ok(mut acc) = self.samples.lock() {
            acc.clear();
        }
    }
}

/// Pick a mono i16 input config, preferring 48 kHz, falling back to the
/// highest rate of any i16 config.
fn pick_config(device: &Device) -> Option<(StreamConfig, u32)> {
    let configs: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_input_configs().ok()?.collect();

    if let Some(cfg) = configs.iter().find(|c| c.sample_format() == SampleFormat::I16) {
        let rate = if cfg.min_sample_rate() <= SampleRate(PREFERRED_RATE)
            && cfg.max_sample_rate() >= SampleRate(PREFERRED_RATE)
        {
            PREFERRED_RATE
        } else {
            cfg.max_sample_rate().0
        };
        let mut sc: StreamConfig = cfg.clone().with_sample_rate(SampleRate(rate)).into();
        sc.channels = 1;
        return Some((sc, rate));
    }

    configs.first().map(|cfg| {
        let rate = cfg.max_sample_rate().0.clamp(8_000, PREFERRED_RATE);
        let sc = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        (sc, rate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_microphone_graceful_on_headless() {
        // Either a device is present or start reports an error; never panics.
        let mut mic = MicrophoneSource::new();
        if mic.start().is_ok() {
            thread::sleep(Duration::from_millis(50));
            let clip = mic.stop().unwrap();
            assert_eq!(clip.mime, "audio/wav");
        }
    }

    #[test]
    fn test_stop_without_start_fails() {
        let mut mic = MicrophoneSource::new();
        assert!(mic.stop().is_err());
    }
}
