use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    avatar::{ExtendedAvatar, MeshScene},
    Result,
};

/// Loaded extended-format avatar backend.
#[async_trait]
pub trait ExtendedBackend: Send + Sync {
    /// Loads `asset_id` into the scene the backend was created for.
    async fn load(&self, asset_id: &str) -> Result<Arc<dyn ExtendedAvatar>>;
}

/// Imports the optional extended backend. Called at most once per process.
#[async_trait]
pub trait ExtendedModuleLoader: Send + Sync {
    async fn import(&self) -> Result<Arc<dyn ExtendedBackend>>;
}

/// Loads a mesh avatar with pose metadata from a URL.
#[async_trait]
pub trait MeshLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<MeshScene>;
}
