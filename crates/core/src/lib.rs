//! Core library for the Avatar Stage interactive avatar scene.
//!
//! The crate owns the stateful parts of the stage: acquiring the avatar from
//! one of two backends, switching animation clips and audio tracks without
//! letting stale results win, and the noise and amplitude driven motion field
//! that animates the scene every frame. Rendering, platform audio and asset
//! transport are reached through traits so hosts can plug in their own.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod avatar;
pub mod config;
pub mod error;
pub mod motion;
pub mod noise;
pub mod render;
pub mod scene;
pub mod session;
pub mod switching;

pub use analysis::{AmplitudeAnalyser, BufferAnalyser, SpectrumAnalyser};
pub use assets::{Archive, ArchiveReader, AssetFetcher, ObjectUrl, ObjectUrlRegistry};
pub use audio::{AudioBackend, AudioBufferCache, AudioDecoder, AudioSource, DecodedAudio};
pub use avatar::{
    AvatarAcquirer, AvatarHandle, AvatarMode, Capability, ExtendedAvatar, ExtendedBackend,
    ExtendedModuleLoader, FallbackAvatar, MeshLoader, MeshScene, PoseMetadata, Transform,
};
pub use config::{AnimationOption, AudioOption, StageConfig};
pub use error::{AvatarStageError, Result};
pub use motion::{MotionConfig, MotionState};
pub use noise::SimplexNoise;
pub use render::{FrameSample, RenderGraph, RenderLoop};
pub use scene::{Palette, SceneSink};
pub use session::{NullNotifier, ResourceKind, Session, UiEvent, UiNotifier};
pub use switching::{ResourceSwitchController, SwitchOutcome};
