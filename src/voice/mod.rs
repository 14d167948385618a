//! Voice clips: capture, duration, and the recorder used by the chat view

#[cfg(feature = "audio")]
pub mod microphone;
pub mod wav;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};

/// Encoded audio ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceClip {
    pub data: Vec<u8>,
    pub mime: String,
}

impl VoiceClip {
    /// Read a clip from disk; the MIME type follows the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read voice clip {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let mime = match ext.as_str() {
            "wav" => "audio/wav",
            "webm" => "audio/webm",
            "ogg" | "oga" | "opus" => "audio/ogg",
            "mp3" => "audio/mpeg",
            "m4a" | "mp4" => "audio/mp4",
            other => anyhow::bail!("Unsupported voice clip type: .{}", other),
        };
        Ok(Self {
            data,
            mime: mime.to_string(),
        })
    }

    pub fn from_pcm16(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            data: wav::encode_pcm16(samples, sample_rate),
            mime: "audio/wav".to_string(),
        }
    }

    /// File extension for the stored object.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "audio/wav" => "wav",
            "audio/ogg" => "ogg",
            "audio/mpeg" => "mp3",
            "audio/mp4" => "m4a",
            _ => "webm",
        }
    }

    /// Playing time, when the container tells us (WAV only).
    pub fn wav_duration(&self) -> Option<Duration> {
        wav::duration(&self.data)
    }
}

/// Whole seconds of a recording, never less than one.
pub fn recorded_duration_secs(elapsed: Duration) -> u32 {
    (elapsed.as_secs() as u32).max(1)
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    Denied(String),
    #[error("recording failed: {0}")]
    Failed(String),
}

/// Something that can capture audio between `start` and `stop`.
pub trait AudioSource: Send {
    /// Acquire the device. Must succeed before the recording timer starts.
    fn start(&mut self) -> Result<(), CaptureError>;
    /// Stop capturing and return the clip.
    fn stop(&mut self) -> Result<VoiceClip, CaptureError>;
    /// Release the device without producing a clip.
    fn cancel(&mut self);
}

/// Plays back a pre-recorded file as if it were captured live.
pub struct FileSource {
    clip: Option<VoiceClip>,
}

impl FileSource {
    pub fn new(clip: VoiceClip) -> Self {
        Self { clip: Some(clip) }
    }
}

impl AudioSource for FileSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.clip.is_none() {
            return Err(CaptureError::Failed("clip already used".to_string()));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<VoiceClip, CaptureError> {
        self.clip
            .take()
            .ok_or_else(|| CaptureError::Failed("nothing recorded".to_string()))
    }

    fn cancel(&mut self) {
        self.clip = None;
    }
}

/// The platform microphone, when built with the `audio` feature.
pub fn default_microphone() -> Result<Box<dyn AudioSource>, CaptureError> {
    #[cfg(feature = "audio")]
    {
        Ok(Box::new(microphone::MicrophoneSource::new()))
    }
    #[cfg(not(feature = "audio"))]
    {
        Err(CaptureError::Denied(
            "built without audio support (enable the `audio` feature)".to_string(),
        ))
    }
}

/// One recording: source acquisition, elapsed time, and release on drop.
pub struct VoiceRecorder {
    source: Box<dyn AudioSource>,
    started: Option<Instant>,
}

impl VoiceRecorder {
    /// Acquire the source and start the timer.
    pub fn start(mut source: Box<dyn AudioSource>) -> Result<Self, CaptureError> {
        source.start()?;
        tracing::info!("Recording started");
        Ok(Self {
            source,
            started: Some(Instant::now()),
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Stop and return the clip with its floored duration in seconds.
    pub fn stop(mut self) -> Result<(VoiceClip, u32), CaptureError> {
        let secs = recorded_duration_secs(self.elapsed());
        self.started = None;
        let clip = self.source.stop()?;
        tracing::info!("Recording stopped ({}s, {} bytes)", secs, clip.data.len());
        Ok((clip, secs))
    }
}

impl Drop for VoiceRecorder {
    fn drop(&mut self) {
        if self.started.take().is_some() {
            tracing::debug!("Recording discarded");
            self.source.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DeniedSource;

    impl AudioSource for DeniedSource {
        fn start(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::Denied("user said no".to_string()))
        }
        fn stop(&mut self) -> Result<VoiceClip, CaptureError> {
            unreachable!()
        }
        fn cancel(&mut self) {}
    }

    struct TrackedSource {
        released: Arc<AtomicBool>,
    }

    impl AudioSource for TrackedSource {
        fn start(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
        fn stop(&mut self) -> Result<VoiceClip, CaptureError> {
            Ok(VoiceClip::from_pcm16(&[0; 16], 8000))
        }
        fn cancel(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn clip() -> VoiceClip {
        VoiceClip::from_pcm16(&[1, 2, 3], 8000)
    }

    #[test]
    fn test_duration_floor() {
        assert_eq!(recorded_duration_secs(Duration::ZERO), 1);
        assert_eq!(recorded_duration_secs(Duration::from_millis(400)), 1);
        assert_eq!(recorded_duration_secs(Duration::from_millis(2_900)), 2);
    }

    #[test]
    fn test_short_recording_persists_one_second() {
        let recorder = VoiceRecorder::start(Box::new(FileSource::new(clip()))).unwrap();
        std::thread::sleep(Duration::from_millis(400));
        let (recorded, secs) = recorder.stop().unwrap();
        assert_eq!(secs, 1);
        assert_eq!(recorded, clip());
    }

    #[test]
    fn test_denied_source_never_starts_timer() {
        match VoiceRecorder::start(Box::new(DeniedSource)) {
            Err(CaptureError::Denied(reason)) => assert_eq!(reason, "user said no"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_drop_releases_source() {
        let released = Arc::new(AtomicBool::new(false));
        let recorder = VoiceRecorder::start(Box::new(TrackedSource {
            released: Arc::clone(&released),
        }))
        .unwrap();
        drop(recorder);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_does_not_cancel() {
        let released = Arc::new(AtomicBool::new(false));
        let recorder = VoiceRecorder::start(Box::new(TrackedSource {
            released: Arc::clone(&released),
        }))
        .unwrap();
        recorder.stop().unwrap();
        assert!(!released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clip_types() {
        assert_eq!(clip().extension(), "wav");
        assert!(clip().wav_duration().is_some());
        let path = std::env::temp_dir().join("matchchat-clip.xyz");
        std::fs::write(&path, b"abc").unwrap();
        assert!(VoiceClip::load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
