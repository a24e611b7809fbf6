pub mod acquire;
pub mod backend;
pub mod lazy;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AvatarStageError, Result};

pub use acquire::AvatarAcquirer;
pub use backend::{ExtendedBackend, ExtendedModuleLoader, MeshLoader};
pub use lazy::{LazyModule, ModuleState};

/// Which avatar backend is active, or why none is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarMode {
    #[default]
    Loading,
    Primary,
    Fallback,
    Error,
}

/// Process-wide record of the avatar features currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capability {
    pub supports_extended_animation: bool,
    pub mode: AvatarMode,
}

impl Capability {
    /// Extended backend active with clip swapping available.
    pub const fn primary() -> Self {
        Self {
            supports_extended_animation: true,
            mode: AvatarMode::Primary,
        }
    }

    /// Mesh fallback active; animation swapping is unavailable.
    pub const fn fallback() -> Self {
        Self {
            supports_extended_animation: false,
            mode: AvatarMode::Fallback,
        }
    }

    /// Every candidate failed; avatar features are disabled.
    pub const fn error() -> Self {
        Self {
            supports_extended_animation: false,
            mode: AvatarMode::Error,
        }
    }

    /// Whether acquisition has reached a terminal outcome.
    pub fn is_settled(&self) -> bool {
        self.mode != AvatarMode::Loading
    }
}

/// Placement of the avatar in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: [f32; 3],
    /// Euler angles in radians.
    pub rotation: [f32; 3],
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: 1.0,
        }
    }
}

/// Avatar rendered by the extended backend. Owns its own pose controls and
/// per-frame update.
#[async_trait]
pub trait ExtendedAvatar: Send + Sync {
    /// Whether the avatar finished its own post-load setup.
    fn is_ready(&self) -> bool {
        true
    }

    fn update(&self, delta: f32);

    /// Swaps the running animation clip for the one at `asset_id`.
    async fn change_animation(&self, asset_id: &str) -> Result<()>;

    fn set_transform(&self, transform: Transform);

    fn transform(&self) -> Transform;
}

/// Metadata read from a humanoid mesh avatar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseMetadata {
    pub spec_version: String,
    pub bone_count: usize,
}

/// Scene graph produced by a [`MeshLoader`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshScene {
    pub name: String,
    pub node_count: usize,
    pub mesh_count: usize,
    pub pose: Option<PoseMetadata>,
}

/// Static-pose avatar loaded through the mesh path.
#[derive(Debug)]
pub struct FallbackAvatar {
    scene: MeshScene,
    transform: Mutex<Transform>,
}

impl FallbackAvatar {
    /// Wraps a loaded mesh scene at the default transform.
    pub fn new(scene: MeshScene) -> Self {
        Self {
            scene,
            transform: Mutex::new(Transform::default()),
        }
    }

    /// The loaded mesh scene.
    pub fn scene(&self) -> &MeshScene {
        &self.scene
    }

    fn set_transform(&self, transform: Transform) {
        if let Ok(mut current) = self.transform.lock() {
            *current = transform;
        }
    }

    fn transform(&self) -> Transform {
        self.transform
            .lock()
            .map(|current| *current)
            .unwrap_or_default()
    }
}

/// The single active avatar of a session.
#[derive(Clone)]
pub enum AvatarHandle {
    Extended(Arc<dyn ExtendedAvatar>),
    Fallback(Arc<FallbackAvatar>),
}

impl AvatarHandle {
    /// Capability record matching this handle's backend.
    pub fn capability(&self) -> Capability {
        match self {
            Self::Extended(_) => Capability::primary(),
            Self::Fallback(_) => Capability::fallback(),
        }
    }

    /// Whether the handle can swap animation clips.
    pub fn supports_extended_animation(&self) -> bool {
        matches!(self, Self::Extended(_))
    }

    /// Whether the avatar drives its own per-frame update.
    pub fn supports_frame_update(&self) -> bool {
        matches!(self, Self::Extended(_))
    }

    /// Whether the avatar finished its post-load setup.
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Extended(avatar) => avatar.is_ready(),
            Self::Fallback(_) => true,
        }
    }

    /// Advances the avatar's own animation by `delta` seconds.
    pub fn update(&self, delta: f32) {
        if let Self::Extended(avatar) = self {
            avatar.update(delta);
        }
    }

    /// Swaps the animation clip. Fails with
    /// [`AvatarStageError::Unsupported`] on a static-pose avatar.
    pub async fn change_animation(&self, asset_id: &str) -> Result<()> {
        match self {
            Self::Extended(avatar) => avatar.change_animation(asset_id).await,
            Self::Fallback(_) => Err(AvatarStageError::Unsupported(format!(
                "static pose avatar cannot play `{asset_id}`"
            ))),
        }
    }

    /// Current placement of the avatar.
    pub fn transform(&self) -> Transform {
        match self {
            Self::Extended(avatar) => avatar.transform(),
            Self::Fallback(avatar) => avatar.transform(),
        }
    }

    /// Replaces the whole transform.
    pub fn set_transform(&self, transform: Transform) {
        match self {
            Self::Extended(avatar) => avatar.set_transform(transform),
            Self::Fallback(avatar) => avatar.set_transform(transform),
        }
    }

    /// Moves the avatar, keeping rotation and scale.
    pub fn set_position(&self, position: [f32; 3]) {
        let mut transform = self.transform();
        transform.position = position;
        self.set_transform(transform);
    }

    /// Sets the Euler rotation in radians.
    pub fn set_rotation(&self, rotation: [f32; 3]) {
        let mut transform = self.transform();
        transform.rotation = rotation;
        self.set_transform(transform);
    }

    /// Sets a uniform scale.
    pub fn set_scale(&self, scale: f32) {
        let mut transform = self.transform();
        transform.scale = scale;
        self.set_transform(transform);
    }
}

impl std::fmt::Debug for AvatarHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extended(_) => f.debug_tuple("Extended").finish(),
            Self::Fallback(avatar) => f.debug_tuple("Fallback").field(avatar.scene()).finish(),
        }
    }
}
