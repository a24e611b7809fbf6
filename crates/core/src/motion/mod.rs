use serde::{Deserialize, Serialize};

use crate::{
    scene::{AmbientMotion, OverlayState, ParticleUniforms},
    session::PointerSample,
};

/// Lowest halo opacity the loop will write.
pub const HALO_MIN_OPACITY: f32 = 0.02;
/// Highest halo opacity the loop will write.
pub const HALO_MAX_OPACITY: f32 = 0.6;

/// Tuning for the per-frame motion field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Rate at which the smoothed cursor approaches the raw pointer, per second.
    pub pointer_damping: f32,
    pub amplitude_gain: f32,
    pub idle_base: f32,
    pub idle_depth: f32,
    pub idle_rate: f32,
    pub noise_time_scale: f32,
    pub noise_cursor_scale: f32,
    pub ambient_spin: f32,
    pub ambient_noise_spin: f32,
    pub ambient_drift: f32,
    pub intensity_base: f32,
    pub intensity_gain: f32,
    pub sway_rate: f32,
    pub sway_angle: f32,
    pub cursor_sway: f32,
    pub bob_rate: f32,
    pub bob_height: f32,
    pub avatar_base_height: f32,
    pub overlay_base_opacity: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pointer_damping: 6.0,
            amplitude_gain: 1.6,
            idle_base: 0.35,
            idle_depth: 0.25,
            idle_rate: 0.8,
            noise_time_scale: 0.15,
            noise_cursor_scale: 0.5,
            ambient_spin: 0.05,
            ambient_noise_spin: 0.2,
            ambient_drift: 0.12,
            intensity_base: 0.6,
            intensity_gain: 0.8,
            sway_rate: 0.6,
            sway_angle: 0.08,
            cursor_sway: 0.25,
            bob_rate: 1.2,
            bob_height: 0.02,
            avatar_base_height: 0.0,
            overlay_base_opacity: 0.25,
        }
    }
}

/// Accumulated per-frame motion inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionState {
    pub elapsed: f32,
    pub cursor: [f32; 2],
    pub cursor_magnitude: f32,
    pub amplitude: f32,
}

impl MotionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances time and eases the cursor toward `pointer`.
    pub fn advance(&mut self, delta: f32, pointer: PointerSample, config: &MotionConfig) {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.elapsed += delta;

        let blend = damping_factor(config.pointer_damping, delta);
        self.cursor[0] += (pointer.x - self.cursor[0]) * blend;
        self.cursor[1] += (pointer.y - self.cursor[1]) * blend;

        let raw_magnitude = pointer.x.hypot(pointer.y).min(1.0);
        self.cursor_magnitude += (raw_magnitude - self.cursor_magnitude) * blend;
    }

    /// Stores the amplitude sample for this frame, or the idle sinusoid when
    /// no analyser is attached.
    pub fn sample_amplitude(&mut self, analysed: Option<f32>, config: &MotionConfig) {
        self.amplitude = match analysed {
            Some(value) if value.is_finite() => value.clamp(0.0, 2.0),
            _ => idle_amplitude(config, self.elapsed),
        };
    }

    pub fn particle_uniforms(&self, config: &MotionConfig) -> ParticleUniforms {
        ParticleUniforms {
            time: self.elapsed,
            cursor: self.cursor,
            intensity: config.intensity_base + self.amplitude * config.intensity_gain,
        }
    }

    pub fn ambient(&self, noise: f32, config: &MotionConfig) -> AmbientMotion {
        AmbientMotion {
            rotation_y: self.elapsed * config.ambient_spin + noise * config.ambient_noise_spin,
            drift_y: noise * config.ambient_drift,
        }
    }

    /// Yaw and height offsets for an avatar that animates itself.
    pub fn sway(&self, config: &MotionConfig) -> (f32, f32) {
        let yaw = (self.elapsed * config.sway_rate).sin() * config.sway_angle
            + self.cursor[0] * config.cursor_sway;
        let height =
            config.avatar_base_height + (self.elapsed * config.bob_rate).sin() * config.bob_height;
        (yaw, height)
    }

    pub fn overlay(&self, config: &MotionConfig) -> OverlayState {
        OverlayState {
            position: [(self.cursor[0] + 1.0) * 0.5, (1.0 - self.cursor[1]) * 0.5],
            opacity: (config.overlay_base_opacity
                + self.cursor_magnitude * 0.5
                + self.amplitude * 0.2)
                .clamp(0.0, 1.0),
        }
    }
}

/// Halo opacity for a palette base opacity modulated by amplitude.
pub fn halo_opacity(base: f32, amplitude: f32) -> f32 {
    (base * (0.7 + amplitude * 0.6)).clamp(HALO_MIN_OPACITY, HALO_MAX_OPACITY)
}

/// Slow sinusoid standing in for audio when nothing is playing.
pub fn idle_amplitude(config: &MotionConfig, elapsed: f32) -> f32 {
    (config.idle_base + config.idle_depth * (elapsed * config.idle_rate).sin()).clamp(0.0, 2.0)
}

/// Fraction of the remaining distance covered in `delta` seconds.
pub fn damping_factor(rate: f32, delta: f32) -> f32 {
    1.0 - (-rate.max(0.0) * delta).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halo_opacity_follows_formula() {
        let base: f32 = 0.12;
        for amplitude in [0.0_f32, 1.0, 1.8] {
            let expected = (base * (0.7 + amplitude * 0.6)).clamp(0.02, 0.6);
            assert!((halo_opacity(base, amplitude) - expected).abs() < 1e-6);
        }
        assert!((halo_opacity(base, 0.0) - 0.084).abs() < 1e-6);
        assert!((halo_opacity(base, 1.8) - 0.2136).abs() < 1e-6);
    }

    #[test]
    fn halo_opacity_clamps_both_ends() {
        assert_eq!(halo_opacity(0.5, 1.8), HALO_MAX_OPACITY);
        assert_eq!(halo_opacity(0.01, 0.0), HALO_MIN_OPACITY);
    }

    #[test]
    fn cursor_eases_toward_pointer() {
        let config = MotionConfig::default();
        let mut state = MotionState::new();
        let pointer = PointerSample { x: 1.0, y: -0.5 };

        state.advance(1.0 / 60.0, pointer, &config);
        assert!(state.cursor[0] > 0.0 && state.cursor[0] < 1.0);

        for _ in 0..600 {
            state.advance(1.0 / 60.0, pointer, &config);
        }
        assert!((state.cursor[0] - 1.0).abs() < 1e-3);
        assert!((state.cursor[1] + 0.5).abs() < 1e-3);
        assert!((state.cursor_magnitude - 1.0).abs() < 1e-3);
        assert!((state.elapsed - 601.0 / 60.0).abs() < 1e-2);
    }

    #[test]
    fn invalid_delta_does_not_move_time() {
        let config = MotionConfig::default();
        let mut state = MotionState::new();
        state.advance(-1.0, PointerSample { x: 1.0, y: 0.0 }, &config);
        state.advance(f32::NAN, PointerSample { x: 1.0, y: 0.0 }, &config);
        assert_eq!(state, MotionState::default());
    }

    #[test]
    fn idle_amplitude_animates_without_audio() {
        let config = MotionConfig::default();
        let mut state = MotionState::new();

        state.sample_amplitude(None, &config);
        let first = state.amplitude;
        state.advance(2.0, PointerSample::default(), &config);
        state.sample_amplitude(None, &config);

        assert!((first - config.idle_base).abs() < 1e-6);
        assert_ne!(first, state.amplitude);

        state.sample_amplitude(Some(5.0), &config);
        assert_eq!(state.amplitude, 2.0);
    }

    #[test]
    fn overlay_maps_cursor_to_screen() {
        let config = MotionConfig::default();
        let state = MotionState {
            cursor: [-1.0, 1.0],
            ..Default::default()
        };
        let overlay = state.overlay(&config);
        assert_eq!(overlay.position, [0.0, 0.0]);
        assert!((overlay.opacity - config.overlay_base_opacity).abs() < 1e-6);
    }
}
