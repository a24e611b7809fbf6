pub mod cache;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{analysis::AmplitudeAnalyser, Result};

pub use cache::AudioBufferCache;

/// Mono PCM payload produced by an [`AudioDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    /// Length of the payload in seconds.
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Fetches an audio asset and decodes it into PCM.
#[async_trait]
pub trait AudioDecoder: Send + Sync {
    async fn decode(&self, url: &str) -> Result<DecodedAudio>;
}

/// Playable source bound to a single decoded buffer at a time.
pub trait AudioSource: Send {
    fn set_buffer(&mut self, buffer: Arc<DecodedAudio>);
    fn buffer(&self) -> Option<Arc<DecodedAudio>>;
    fn set_loop(&mut self, looping: bool);
    fn is_looping(&self) -> bool;
    fn set_volume(&mut self, volume: f32);
    fn volume(&self) -> f32;
    fn play(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
}

/// Audio output owned by the host platform.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Resumes the output context. Platforms may reject this until a user
    /// gesture has happened.
    async fn resume(&self) -> Result<()>;

    fn create_source(&self) -> Box<dyn AudioSource>;

    /// Attaches an amplitude analyser to a source that has just started playing.
    fn create_analyser(&self, source: &dyn AudioSource, fft_size: usize)
        -> Box<dyn AmplitudeAnalyser>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_duration() {
        let audio = DecodedAudio::new(100, vec![0.0; 250]);
        assert!((audio.duration_seconds() - 2.5).abs() < 1e-6);
        assert_eq!(DecodedAudio::new(0, vec![0.0; 4]).duration_seconds(), 0.0);
    }
}
