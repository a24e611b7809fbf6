use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::OnceCell;

use crate::{avatar::ExtendedBackend, avatar::ExtendedModuleLoader, AvatarStageError, Result};

type Slot = std::result::Result<Arc<dyn ExtendedBackend>, String>;

/// Observable state of a [`LazyModule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleState {
    Unresolved,
    Resolved,
    Failed(String),
}

/// One-shot import of the extended backend. Both success and failure are
/// cached; a failed import is never retried.
pub struct LazyModule {
    loader: Arc<dyn ExtendedModuleLoader>,
    slot: OnceCell<Slot>,
    attempts: AtomicUsize,
}

impl LazyModule {
    /// Wraps `loader` without importing anything yet.
    pub fn new(loader: Arc<dyn ExtendedModuleLoader>) -> Self {
        Self {
            loader,
            slot: OnceCell::new(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Imports the module on first call and returns the cached outcome
    /// afterwards, including a cached failure.
    pub async fn get(&self) -> Result<Arc<dyn ExtendedBackend>> {
        let slot = self
            .slot
            .get_or_init(|| async {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                match self.loader.import().await {
                    Ok(backend) => {
                        tracing::info!("extended avatar backend loaded");
                        Ok(backend)
                    }
                    Err(err) => {
                        tracing::warn!(%err, "extended avatar backend unavailable");
                        Err(err.to_string())
                    }
                }
            })
            .await;

        match slot {
            Ok(backend) => Ok(backend.clone()),
            Err(reason) => Err(AvatarStageError::msg(format!(
                "extended avatar backend unavailable: {reason}"
            ))),
        }
    }

    /// Current state of the import without triggering it.
    pub fn state(&self) -> ModuleState {
        match self.slot.get() {
            None => ModuleState::Unresolved,
            Some(Ok(_)) => ModuleState::Resolved,
            Some(Err(reason)) => ModuleState::Failed(reason.clone()),
        }
    }

    /// Number of times the import has actually been attempted.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LazyModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyModule")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::avatar::ExtendedAvatar;

    struct NoBackend;

    #[async_trait]
    impl ExtendedModuleLoader for NoBackend {
        async fn import(&self) -> Result<Arc<dyn ExtendedBackend>> {
            Err(AvatarStageError::msg("module not found"))
        }
    }

    struct EmptyBackend;

    #[async_trait]
    impl ExtendedBackend for EmptyBackend {
        async fn load(&self, asset_id: &str) -> Result<Arc<dyn ExtendedAvatar>> {
            Err(AvatarStageError::msg(format!("cannot load {asset_id}")))
        }
    }

    struct Available;

    #[async_trait]
    impl ExtendedModuleLoader for Available {
        async fn import(&self) -> Result<Arc<dyn ExtendedBackend>> {
            Ok(Arc::new(EmptyBackend))
        }
    }

    #[tokio::test]
    async fn caches_failed_import() {
        let module = LazyModule::new(Arc::new(NoBackend));
        assert_eq!(module.state(), ModuleState::Unresolved);

        for _ in 0..3 {
            let err = module.get().await.err().expect("import should fail");
            assert!(format!("{err}").contains("module not found"));
        }

        assert_eq!(module.attempts(), 1);
        assert!(matches!(module.state(), ModuleState::Failed(_)));
    }

    #[tokio::test]
    async fn caches_successful_import() {
        let module = LazyModule::new(Arc::new(Available));
        let a = module.get().await.unwrap();
        let b = module.get().await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(module.attempts(), 1);
        assert_eq!(module.state(), ModuleState::Resolved);
    }
}
