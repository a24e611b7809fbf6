use std::{f32::consts::PI, fmt, sync::Arc, time::Instant};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{audio::DecodedAudio, AvatarStageError, Result};

/// Lower bound of the decibel window mapped onto the byte scale.
pub const MIN_DECIBELS: f32 = -100.0;
/// Upper bound of the decibel window mapped onto the byte scale.
pub const MAX_DECIBELS: f32 = -30.0;
/// Largest value an average frequency reading can take.
pub const BYTE_SCALE: f32 = 255.0;

/// Source of the per-frame amplitude sample.
///
/// Implementations report the mean byte-scaled frequency magnitude of the
/// audio currently playing, in `[0, 255]`.
pub trait AmplitudeAnalyser: Send {
    fn average_frequency(&mut self) -> f32;
}

/// Maps an average frequency reading onto the amplitude range used by the
/// motion field.
pub fn normalize_amplitude(average_frequency: f32, gain: f32) -> f32 {
    if !average_frequency.is_finite() {
        return 0.0;
    }
    (average_frequency / BYTE_SCALE * gain).clamp(0.0, 2.0)
}

/// FFT-backed analyser that reduces a block of samples to a single
/// byte-scaled average frequency magnitude.
pub struct SpectrumAnalyser {
    fft: FftResources,
}

impl SpectrumAnalyser {
    /// Creates an analyser for windows of `fft_size` samples. Sizes below two
    /// are raised to two.
    pub fn new(fft_size: usize) -> Self {
        let size = fft_size.max(2);
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            fft: FftResources {
                size,
                plan,
                scratch,
                spectrum,
                input,
            },
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft.size
    }

    /// Computes the average byte-scaled magnitude over all bins of `samples`.
    /// Blocks shorter than the window are zero padded, longer ones truncated.
    pub fn analyse(&mut self, samples: &[f32]) -> Result<f32> {
        if samples.is_empty() {
            return Err(AvatarStageError::msg(
                "spectrum analysis requires at least one sample",
            ));
        }

        let fft = &mut self.fft;
        let len = fft.size;

        for (index, slot) in fft.input.iter_mut().enumerate() {
            let value = samples.get(index).copied().unwrap_or(0.0);
            *slot = value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let bins = fft.spectrum.len().max(1);
        let total: f32 = fft
            .spectrum
            .iter()
            .map(|bin| byte_magnitude(bin.norm() / len as f32))
            .sum();

        Ok(total / bins as f32)
    }
}

/// Analyser bound to a decoded buffer that is playing from a known instant.
/// The playhead is derived from wall-clock time, wrapping when looped.
pub struct BufferAnalyser {
    buffer: Arc<DecodedAudio>,
    volume: f32,
    looping: bool,
    offset_seconds: f32,
    started: Instant,
    spectrum: SpectrumAnalyser,
    window: Vec<f32>,
}

impl BufferAnalyser {
    pub fn new(buffer: Arc<DecodedAudio>, volume: f32, looping: bool, fft_size: usize) -> Self {
        Self::starting_at(buffer, volume, looping, fft_size, 0.0, Instant::now())
    }

    /// Creates an analyser whose playhead was at `offset_seconds` at `started`.
    pub fn starting_at(
        buffer: Arc<DecodedAudio>,
        volume: f32,
        looping: bool,
        fft_size: usize,
        offset_seconds: f32,
        started: Instant,
    ) -> Self {
        let spectrum = SpectrumAnalyser::new(fft_size);
        let window = Vec::with_capacity(spectrum.fft_size());
        Self {
            buffer,
            volume,
            looping,
            offset_seconds,
            started,
            spectrum,
            window,
        }
    }

    /// Reads the window at an explicit playhead position.
    pub fn average_frequency_at(&mut self, seconds: f32) -> f32 {
        let Some(start) = self.playhead_index(seconds) else {
            return 0.0;
        };

        let samples = &self.buffer.samples;
        self.window.clear();
        for step in 0..self.spectrum.fft_size() {
            let index = start + step;
            let sample = if index < samples.len() {
                samples[index]
            } else if self.looping {
                samples[index % samples.len()]
            } else {
                0.0
            };
            self.window.push(sample * self.volume);
        }

        match self.spectrum.analyse(&self.window) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(%err, "amplitude analysis failed");
                0.0
            }
        }
    }

    fn playhead_index(&self, seconds: f32) -> Option<usize> {
        let len = self.buffer.samples.len();
        if len == 0 || self.buffer.sample_rate == 0 {
            return None;
        }
        let index = (seconds.max(0.0) * self.buffer.sample_rate as f32) as usize;
        if index < len {
            Some(index)
        } else if self.looping {
            Some(index % len)
        } else {
            None
        }
    }
}

impl AmplitudeAnalyser for BufferAnalyser {
    fn average_frequency(&mut self) -> f32 {
        let seconds = self.offset_seconds + self.started.elapsed().as_secs_f32();
        self.average_frequency_at(seconds)
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for BufferAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAnalyser")
            .field("samples", &self.buffer.samples.len())
            .field("volume", &self.volume)
            .field("looping", &self.looping)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn byte_magnitude(magnitude: f32) -> f32 {
    if magnitude <= f32::EPSILON {
        return 0.0;
    }
    let decibels = 20.0 * magnitude.log10();
    let scaled = BYTE_SCALE * (decibels - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
    scaled.clamp(0.0, BYTE_SCALE)
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
