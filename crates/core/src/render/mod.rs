use serde::Serialize;

use crate::{
    analysis::normalize_amplitude,
    avatar::AvatarHandle,
    motion::{halo_opacity, MotionConfig, MotionState},
    noise::SimplexNoise,
    scene::{AmbientMotion, OverlayState, Palette, ParticleUniforms, SceneSink},
    session::{PointerSample, Session},
};

/// Values computed for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameSample {
    pub motion: MotionState,
    pub noise: f32,
    pub ambient: AmbientMotion,
    pub particles: ParticleUniforms,
    pub halo_opacity: f32,
    /// Yaw and height written to the avatar, when it animates itself.
    pub avatar_sway: Option<(f32, f32)>,
    pub overlay: OverlayState,
    /// Whether the amplitude came from a live analyser.
    pub audio_driven: bool,
}

/// Per-frame orchestrator feeding session state and noise into the scene.
pub struct RenderLoop<S: SceneSink> {
    session: Session,
    noise: SimplexNoise,
    config: MotionConfig,
    palettes: Vec<Palette>,
    motion: MotionState,
    applied_palette: Option<(usize, u64)>,
    sink: S,
}

struct FrameInputs {
    pointer: PointerSample,
    average_frequency: Option<f32>,
    avatar: Option<AvatarHandle>,
    palette: usize,
    palette_revision: u64,
}

impl<S: SceneSink> RenderLoop<S> {
    pub fn new(
        session: Session,
        noise: SimplexNoise,
        config: MotionConfig,
        palettes: Vec<Palette>,
        sink: S,
    ) -> Self {
        Self {
            session,
            noise,
            config,
            palettes,
            motion: MotionState::new(),
            applied_palette: None,
            sink,
        }
    }

    pub fn motion(&self) -> &MotionState {
        &self.motion
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Advances one display frame of `delta` seconds and renders it.
    ///
    /// Never fails: unreadable session state is logged and the frame is
    /// rendered from defaults.
    pub fn frame(&mut self, delta: f32) -> FrameSample {
        let inputs = self.read_inputs();

        self.motion.advance(delta, inputs.pointer, &self.config);
        let analysed = inputs
            .average_frequency
            .map(|value| normalize_amplitude(value, self.config.amplitude_gain));
        self.motion.sample_amplitude(analysed, &self.config);

        let noise = self.noise.noise2d(
            (self.motion.elapsed * self.config.noise_time_scale) as f64,
            (self.motion.cursor[0] * self.config.noise_cursor_scale) as f64,
        ) as f32;

        let palette = self.current_palette(inputs.palette, inputs.palette_revision);
        let base_opacity = palette.map(|palette| palette.halo_opacity).unwrap_or(0.12);

        let ambient = self.motion.ambient(noise, &self.config);
        self.sink.set_ambient(ambient);

        let particles = self.motion.particle_uniforms(&self.config);
        self.sink.set_particle_uniforms(particles);

        let halo = halo_opacity(base_opacity, self.motion.amplitude);
        self.sink.set_halo_opacity(halo);

        let avatar_sway = inputs
            .avatar
            .as_ref()
            .filter(|avatar| avatar.supports_frame_update())
            .map(|avatar| {
                avatar.update(delta);
                let (yaw, height) = self.motion.sway(&self.config);
                let mut transform = avatar.transform();
                transform.rotation[1] = yaw;
                transform.position[1] = height;
                avatar.set_transform(transform);
                (yaw, height)
            });

        self.sink.update_controls(delta);

        let overlay = self.motion.overlay(&self.config);
        self.sink.set_overlay(overlay);

        self.sink.render();

        FrameSample {
            motion: self.motion,
            noise,
            ambient,
            particles,
            halo_opacity: halo,
            avatar_sway,
            overlay,
            audio_driven: analysed.is_some(),
        }
    }

    fn read_inputs(&self) -> FrameInputs {
        match self.session.lock() {
            Ok(mut state) => FrameInputs {
                pointer: state.pointer,
                average_frequency: state
                    .analyser
                    .as_mut()
                    .map(|analyser| analyser.average_frequency()),
                avatar: state.avatar.clone(),
                palette: state.palette,
                palette_revision: state.palette_revision,
            },
            Err(err) => {
                tracing::warn!(%err, "rendering frame without session state");
                FrameInputs {
                    pointer: PointerSample::default(),
                    average_frequency: None,
                    avatar: None,
                    palette: 0,
                    palette_revision: 0,
                }
            }
        }
    }

    fn current_palette(&mut self, index: usize, revision: u64) -> Option<&Palette> {
        let palette = self.palettes.get(index)?;
        if self.applied_palette != Some((index, revision)) {
            tracing::debug!(palette = %palette.name, "applying palette");
            self.sink.apply_palette(palette);
            self.applied_palette = Some((index, revision));
        }
        Some(palette)
    }
}

impl<S: SceneSink + std::fmt::Debug> std::fmt::Debug for RenderLoop<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("motion", &self.motion)
            .field("applied_palette", &self.applied_palette)
            .field("sink", &self.sink)
            .finish()
    }
}

/// Headless [`SceneSink`] that keeps the most recent values written to it.
#[derive(Debug, Default, Clone)]
pub struct RenderGraph {
    pub palette: Option<Palette>,
    pub palette_changes: usize,
    pub ambient: AmbientMotion,
    pub particles: ParticleUniforms,
    pub halo_opacity: f32,
    pub controls_time: f32,
    pub overlay: OverlayState,
    pub frames: u64,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SceneSink for RenderGraph {
    fn apply_palette(&mut self, palette: &Palette) {
        self.palette = Some(palette.clone());
        self.palette_changes += 1;
    }

    fn set_ambient(&mut self, motion: AmbientMotion) {
        self.ambient = motion;
    }

    fn set_particle_uniforms(&mut self, uniforms: ParticleUniforms) {
        self.particles = uniforms;
    }

    fn set_halo_opacity(&mut self, opacity: f32) {
        self.halo_opacity = opacity;
    }

    fn update_controls(&mut self, delta: f32) {
        self.controls_time += delta.max(0.0);
    }

    fn set_overlay(&mut self, overlay: OverlayState) {
        self.overlay = overlay;
    }

    fn render(&mut self) {
        self.frames += 1;
    }
}
