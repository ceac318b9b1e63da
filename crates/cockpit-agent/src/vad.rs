//! Voice-activity detection.
//!
//! A [`Vad`] is loaded once per worker process and shared read-only by every
//! job; each session asks it for its own [`VadStream`] to keep per-speaker
//! state.

use crate::error::AgentError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A chunk of interleaved PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<i16>,
    pub sample_rate: u32,
    pub num_channels: u32,
}

impl AudioFrame {
    pub fn new(data: Vec<i16>, sample_rate: u32, num_channels: u32) -> Self {
        Self {
            data,
            sample_rate,
            num_channels,
        }
    }

    pub fn samples_per_channel(&self) -> usize {
        if self.num_channels == 0 {
            return 0;
        }
        self.data.len() / self.num_channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = self.samples_per_channel() as u64 * 1_000_000_000 / self.sample_rate as u64;
        Duration::from_nanos(nanos)
    }

    /// Root-mean-square level normalized to `0.0..=1.0`.
    pub fn rms(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .data
            .iter()
            .map(|s| {
                let v = *s as f64 / i16::MAX as f64;
                v * v
            })
            .sum();
        (sum / self.data.len() as f64).sqrt() as f32
    }

    /// Reads little-endian PCM16 bytes; a trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, num_channels: u32) -> Self {
        let data = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(data, sample_rate, num_channels)
    }

    /// Little-endian byte view, as realtime APIs expect it.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    StartOfSpeech,
    EndOfSpeech,
}

/// Loaded voice-activity model. Implementations must be safe to share
/// across concurrently running jobs.
pub trait Vad: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// A fresh detector state for one audio source.
    fn stream(&self) -> Box<dyn VadStream>;
}

pub trait VadStream: Send {
    /// Feeds one frame; returns a transition when speech starts or ends.
    fn push_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent>;

    fn is_speaking(&self) -> bool;
}

/// Produces the VAD model. Called by the prewarm hook, or lazily by a job
/// when the process cache is empty.
#[async_trait]
pub trait VadLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Vad>, AgentError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnergyVadOptions {
    /// RMS level (0.0 - 1.0) above which a frame counts as voiced.
    pub activation_threshold: f32,
    /// Voiced audio needed before speech is reported.
    pub min_speech_duration: Duration,
    /// Silence needed before the end of speech is reported.
    pub min_silence_duration: Duration,
}

impl Default for EnergyVadOptions {
    fn default() -> Self {
        Self {
            activation_threshold: 0.01,
            min_speech_duration: Duration::from_millis(50),
            min_silence_duration: Duration::from_millis(550),
        }
    }
}

/// Energy-gated detector: no model weights, so loading is instant.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    options: EnergyVadOptions,
}

impl EnergyVad {
    pub fn new(options: EnergyVadOptions) -> Result<Self, AgentError> {
        if !(0.0..=1.0).contains(&options.activation_threshold) {
            return Err(AgentError::Vad(format!(
                "activation threshold must be within 0.0..=1.0, got {}",
                options.activation_threshold
            )));
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &EnergyVadOptions {
        &self.options
    }
}

impl Vad for EnergyVad {
    fn name(&self) -> &str {
        "energy"
    }

    fn stream(&self) -> Box<dyn VadStream> {
        Box::new(EnergyVadStream {
            options: self.options.clone(),
            speaking: false,
            speech_run: Duration::ZERO,
            silence_run: Duration::ZERO,
        })
    }
}

struct EnergyVadStream {
    options: EnergyVadOptions,
    speaking: bool,
    speech_run: Duration,
    silence_run: Duration,
}

impl VadStream for EnergyVadStream {
    fn push_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        let duration = frame.duration();
        let voiced = frame.rms() > self.options.activation_threshold;

        if voiced {
            self.silence_run = Duration::ZERO;
            if !self.speaking {
                self.speech_run += duration;
                if self.speech_run >= self.options.min_speech_duration {
                    self.speaking = true;
                    self.speech_run = Duration::ZERO;
                    return Some(VadEvent::StartOfSpeech);
                }
            }
        } else {
            self.speech_run = Duration::ZERO;
            if self.speaking {
                self.silence_run += duration;
                if self.silence_run >= self.options.min_silence_duration {
                    self.speaking = false;
                    self.silence_run = Duration::ZERO;
                    return Some(VadEvent::EndOfSpeech);
                }
            }
        }
        None
    }

    fn is_speaking(&self) -> bool {
        self.speaking
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnergyVadLoader {
    pub options: EnergyVadOptions,
}

#[async_trait]
impl VadLoader for EnergyVadLoader {
    async fn load(&self) -> Result<Arc<dyn Vad>, AgentError> {
        let vad = EnergyVad::new(self.options.clone())?;
        tracing::info!(
            vad = vad.name(),
            threshold = vad.options().activation_threshold,
            "loaded voice activity detector"
        );
        Ok(Arc::new(vad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10ms of 16kHz mono audio at a constant level.
    fn frame(level: i16) -> AudioFrame {
        AudioFrame::new(vec![level; 160], 16_000, 1)
    }

    #[test]
    fn frame_metrics() {
        let f = frame(i16::MAX);
        assert_eq!(f.duration(), Duration::from_millis(10));
        assert!((f.rms() - 1.0).abs() < 1e-6);
        assert_eq!(frame(0).rms(), 0.0);
        assert_eq!(AudioFrame::new(vec![1, -1], 16_000, 1).to_le_bytes(), vec![1, 0, 255, 255]);
    }

    #[test]
    fn speech_starts_after_min_duration() {
        let vad = EnergyVad::new(EnergyVadOptions::default()).unwrap();
        let mut stream = vad.stream();

        let events: Vec<_> = (0..5).map(|_| stream.push_frame(&frame(8_000))).collect();
        assert_eq!(events[..4], [None, None, None, None]);
        assert_eq!(events[4], Some(VadEvent::StartOfSpeech));
        assert!(stream.is_speaking());
    }

    #[test]
    fn speech_ends_after_min_silence() {
        let vad = EnergyVad::new(EnergyVadOptions::default()).unwrap();
        let mut stream = vad.stream();
        for _ in 0..5 {
            stream.push_frame(&frame(8_000));
        }

        let mut ended_at = None;
        for i in 0..100 {
            if stream.push_frame(&frame(0)) == Some(VadEvent::EndOfSpeech) {
                ended_at = Some(i);
                break;
            }
        }
        assert_eq!(ended_at, Some(54), "550ms of 10ms frames");
        assert!(!stream.is_speaking());
    }

    #[test]
    fn short_blips_are_ignored() {
        let vad = EnergyVad::new(EnergyVadOptions::default()).unwrap();
        let mut stream = vad.stream();
        for _ in 0..3 {
            assert_eq!(stream.push_frame(&frame(8_000)), None);
            assert_eq!(stream.push_frame(&frame(0)), None);
        }
        assert!(!stream.is_speaking());
    }

    #[test]
    fn streams_are_independent() {
        let vad = EnergyVad::new(EnergyVadOptions::default()).unwrap();
        let mut a = vad.stream();
        let b = vad.stream();
        for _ in 0..5 {
            a.push_frame(&frame(8_000));
        }
        assert!(a.is_speaking());
        assert!(!b.is_speaking());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let options = EnergyVadOptions {
            activation_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(EnergyVad::new(options), Err(AgentError::Vad(_))));
    }
}
