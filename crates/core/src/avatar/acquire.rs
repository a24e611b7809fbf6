use std::sync::Arc;

use crate::{
    assets::{extract_entry, ArchiveReader, AssetFetcher, ObjectUrlRegistry},
    avatar::{
        AvatarHandle, Capability, ExtendedModuleLoader, FallbackAvatar, LazyModule, MeshLoader,
    },
    config::DEFAULT_FALLBACK_ENTRY,
    session::{Session, UiNotifier},
    AvatarStageError, Result,
};

const FALLBACK_MIME: &str = "model/gltf-binary";

/// Resolves the session's avatar by trying each candidate against the
/// extended backend first and the archive fallback second.
pub struct AvatarAcquirer {
    extended: LazyModule,
    fetcher: Arc<dyn AssetFetcher>,
    archives: Arc<dyn ArchiveReader>,
    mesh_loader: Arc<dyn MeshLoader>,
    object_urls: ObjectUrlRegistry,
    fallback_entry: String,
}

impl AvatarAcquirer {
    /// Builds an acquirer. The extended module is imported on first use.
    pub fn new(
        extended: Arc<dyn ExtendedModuleLoader>,
        fetcher: Arc<dyn AssetFetcher>,
        archives: Arc<dyn ArchiveReader>,
        mesh_loader: Arc<dyn MeshLoader>,
        object_urls: ObjectUrlRegistry,
    ) -> Self {
        Self {
            extended: LazyModule::new(extended),
            fetcher,
            archives,
            mesh_loader,
            object_urls,
            fallback_entry: DEFAULT_FALLBACK_ENTRY.to_string(),
        }
    }

    /// Overrides the archive entry holding the fallback mesh.
    pub fn with_fallback_entry(mut self, entry: impl Into<String>) -> Self {
        self.fallback_entry = entry.into();
        self
    }

    /// The lazily imported extended backend module.
    pub fn extended_module(&self) -> &LazyModule {
        &self.extended
    }

    /// Tries `candidates` in order and publishes the outcome to `session`.
    ///
    /// The capability record is written once, on success or on exhaustion.
    /// A session that already settled is left untouched.
    pub async fn acquire(
        &self,
        candidates: &[String],
        session: &Session,
        notifier: &dyn UiNotifier,
    ) -> Result<AvatarHandle> {
        if session.capability()?.is_settled() {
            return Err(AvatarStageError::msg(
                "avatar already acquired for this session",
            ));
        }

        let mut last_error = None;

        for candidate in candidates {
            match self.extended.get().await {
                Ok(backend) => match backend.load(candidate).await {
                    Ok(avatar) => {
                        tracing::info!(candidate = %candidate, "loaded extended avatar");
                        return self.publish(AvatarHandle::Extended(avatar), session, notifier);
                    }
                    Err(err) => {
                        tracing::warn!(candidate = %candidate, %err, "extended avatar load failed");
                    }
                },
                Err(err) => tracing::debug!(%err, "skipping extended backend"),
            }

            match self.load_fallback(candidate).await {
                Ok(handle) => {
                    tracing::info!(candidate = %candidate, "loaded fallback avatar");
                    return self.publish(handle, session, notifier);
                }
                Err(err) => {
                    tracing::warn!(candidate = %candidate, %err, "fallback avatar load failed");
                    last_error = Some(err);
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| AvatarStageError::msg("no avatar candidate could be loaded"));
        let capability = Capability::error();
        {
            let mut state = session.lock()?;
            state.capability = capability;
        }
        tracing::error!(%last, "avatar acquisition exhausted every candidate");
        notifier.capability_changed(&capability);

        Err(AvatarStageError::Acquisition {
            last: Box::new(last),
        })
    }

    async fn load_fallback(&self, candidate: &str) -> Result<AvatarHandle> {
        let payload = extract_entry(
            self.fetcher.as_ref(),
            self.archives.as_ref(),
            candidate,
            &self.fallback_entry,
        )
        .await?;

        let url = self.object_urls.create(payload, FALLBACK_MIME)?;
        let loaded = self.mesh_loader.load(url.as_str()).await;
        url.revoke();

        Ok(AvatarHandle::Fallback(Arc::new(FallbackAvatar::new(loaded?))))
    }

    fn publish(
        &self,
        handle: AvatarHandle,
        session: &Session,
        notifier: &dyn UiNotifier,
    ) -> Result<AvatarHandle> {
        let capability = handle.capability();
        {
            let mut state = session.lock()?;
            state.capability = capability;
            state.avatar = Some(handle.clone());
        }
        notifier.capability_changed(&capability);
        Ok(handle)
    }
}

impl std::fmt::Debug for AvatarAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarAcquirer")
            .field("extended", &self.extended)
            .field("fallback_entry", &self.fallback_entry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        assets::Archive,
        avatar::{AvatarMode, ExtendedAvatar, ExtendedBackend, MeshScene, Transform},
        session::NullNotifier,
    };

    struct Files(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl AssetFetcher for Files {
        async fn fetch(&self, asset_id: &str) -> Result<Vec<u8>> {
            self.0
                .get(asset_id)
                .cloned()
                .ok_or_else(|| AvatarStageError::msg(format!("404 {asset_id}")))
        }
    }

    /// Archive whose single entry is named by the text before the first `:`.
    struct ColonArchives;

    struct ColonArchive {
        name: String,
        body: Vec<u8>,
    }

    impl ArchiveReader for ColonArchives {
        fn open(&self, bytes: Vec<u8>) -> Result<Box<dyn Archive>> {
            let split = bytes
                .iter()
                .position(|byte| *byte == b':')
                .ok_or_else(|| AvatarStageError::msg("not an archive"))?;
            Ok(Box::new(ColonArchive {
                name: String::from_utf8_lossy(&bytes[..split]).into_owned(),
                body: bytes[split + 1..].to_vec(),
            }))
        }
    }

    impl Archive for ColonArchive {
        fn entry(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
            Ok((self.name == name).then(|| self.body.clone()))
        }
    }

    /// Accepts payloads starting with `mesh`.
    struct RecordingMeshLoader {
        urls: ObjectUrlRegistry,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MeshLoader for RecordingMeshLoader {
        async fn load(&self, url: &str) -> Result<MeshScene> {
            self.seen.lock().unwrap().push(url.to_string());
            let bytes = self
                .urls
                .resolve(url)
                .ok_or_else(|| AvatarStageError::msg("dangling url"))?;
            if bytes.starts_with(b"mesh") {
                Ok(MeshScene {
                    name: String::from_utf8_lossy(&bytes).into_owned(),
                    node_count: 1,
                    mesh_count: 1,
                    pose: None,
                })
            } else {
                Err(AvatarStageError::msg("not a mesh"))
            }
        }
    }

    struct Splat;

    #[async_trait]
    impl ExtendedAvatar for Splat {
        fn update(&self, _delta: f32) {}

        async fn change_animation(&self, _asset_id: &str) -> Result<()> {
            Ok(())
        }

        fn set_transform(&self, _transform: Transform) {}

        fn transform(&self) -> Transform {
            Transform::default()
        }
    }

    /// Loads only assets whose name ends in `.gvrm`.
    struct SplatBackend;

    #[async_trait]
    impl ExtendedBackend for SplatBackend {
        async fn load(&self, asset_id: &str) -> Result<Arc<dyn ExtendedAvatar>> {
            if asset_id.ends_with(".gvrm") {
                Ok(Arc::new(Splat))
            } else {
                Err(AvatarStageError::msg(format!("unsupported format {asset_id}")))
            }
        }
    }

    struct Modules {
        available: bool,
        imports: AtomicUsize,
    }

    #[async_trait]
    impl ExtendedModuleLoader for Modules {
        async fn import(&self) -> Result<Arc<dyn ExtendedBackend>> {
            self.imports.fetch_add(1, Ordering::SeqCst);
            if self.available {
                Ok(Arc::new(SplatBackend))
            } else {
                Err(AvatarStageError::msg("dynamic import failed"))
            }
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Capability>>);

    impl UiNotifier for Recorder {
        fn capability_changed(&self, capability: &Capability) {
            self.0.lock().unwrap().push(*capability);
        }
    }

    struct Fixture {
        acquirer: AvatarAcquirer,
        modules: Arc<Modules>,
        loader: Arc<RecordingMeshLoader>,
        urls: ObjectUrlRegistry,
    }

    fn fixture(extended_available: bool, files: &[(&str, &str)]) -> Fixture {
        let urls = ObjectUrlRegistry::new();
        let modules = Arc::new(Modules {
            available: extended_available,
            imports: AtomicUsize::new(0),
        });
        let loader = Arc::new(RecordingMeshLoader {
            urls: urls.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let files = files
            .iter()
            .map(|(name, body)| (name.to_string(), body.as_bytes().to_vec()))
            .collect();
        let acquirer = AvatarAcquirer::new(
            modules.clone(),
            Arc::new(Files(files)),
            Arc::new(ColonArchives),
            loader.clone(),
            urls.clone(),
        );
        Fixture {
            acquirer,
            modules,
            loader,
            urls,
        }
    }

    fn candidates(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn prefers_extended_backend() {
        let fx = fixture(true, &[]);
        let session = Session::new();
        let notes = Recorder::default();

        let handle = fx
            .acquirer
            .acquire(&candidates(&["avatar.gvrm"]), &session, &notes)
            .await
            .unwrap();

        assert!(handle.supports_extended_animation());
        assert_eq!(session.capability().unwrap(), Capability::primary());
        assert_eq!(notes.0.lock().unwrap().as_slice(), &[Capability::primary()]);
        assert!(fx.loader.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_candidate_succeeds_on_fallback() {
        let fx = fixture(
            true,
            &[("broken.zip", "model.vrm:garbage"), ("good.zip", "model.vrm:mesh-body")],
        );
        let session = Session::new();
        let notes = Recorder::default();

        let handle = fx
            .acquirer
            .acquire(&candidates(&["broken.zip", "good.zip"]), &session, &notes)
            .await
            .unwrap();

        let capability = session.capability().unwrap();
        assert_eq!(capability.mode, AvatarMode::Fallback);
        assert!(!capability.supports_extended_animation);
        assert!(matches!(handle, AvatarHandle::Fallback(_)));
        assert_eq!(notes.0.lock().unwrap().len(), 1);
        assert_eq!(fx.loader.seen.lock().unwrap().len(), 2);
        assert_eq!(fx.urls.live_count(), 0);
    }

    #[tokio::test]
    async fn failed_import_is_attempted_once() {
        let fx = fixture(false, &[("a.zip", "model.vrm:nope"), ("b.zip", "model.vrm:mesh")]);
        let session = Session::new();

        fx.acquirer
            .acquire(&candidates(&["a.zip", "b.zip"]), &session, &NullNotifier)
            .await
            .unwrap();

        assert_eq!(fx.modules.imports.load(Ordering::SeqCst), 1);
        assert_eq!(session.capability().unwrap(), Capability::fallback());
    }

    #[tokio::test]
    async fn exhaustion_sets_error_mode() {
        let fx = fixture(true, &[("a.zip", "other.bin:mesh"), ("b.zip", "model.vrm:junk")]);
        let session = Session::new();
        let notes = Recorder::default();

        let err = fx
            .acquirer
            .acquire(&candidates(&["a.zip", "b.zip", "missing.zip"]), &session, &notes)
            .await
            .unwrap_err();

        match err {
            AvatarStageError::Acquisition { last } => {
                let last = last.to_string();
                assert!(last.contains("missing.zip"));
                assert!(!last.contains("unsupported format"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(session.capability().unwrap(), Capability::error());
        assert!(session.avatar().unwrap().is_none());
        assert_eq!(notes.0.lock().unwrap().as_slice(), &[Capability::error()]);
        assert_eq!(fx.urls.live_count(), 0);
    }

    #[tokio::test]
    async fn empty_candidate_list_reports_generic_error() {
        let fx = fixture(false, &[]);
        let session = Session::new();

        let err = fx
            .acquirer
            .acquire(&[], &session, &NullNotifier)
            .await
            .unwrap_err();

        assert!(format!("{err}").contains("no avatar candidate"));
        assert_eq!(session.capability().unwrap().mode, AvatarMode::Error);
    }

    #[tokio::test]
    async fn settled_session_is_not_reacquired() {
        let fx = fixture(true, &[]);
        let session = Session::new();
        fx.acquirer
            .acquire(&candidates(&["a.gvrm"]), &session, &NullNotifier)
            .await
            .unwrap();

        assert!(fx
            .acquirer
            .acquire(&candidates(&["b.gvrm"]), &session, &NullNotifier)
            .await
            .is_err());
        assert_eq!(session.capability().unwrap(), Capability::primary());
    }

    #[tokio::test]
    async fn custom_fallback_entry_name() {
        let fx = fixture(false, &[("pack.zip", "avatar.glb:mesh")]);
        let acquirer = fx.acquirer.with_fallback_entry("avatar.glb");
        let session = Session::new();

        acquirer
            .acquire(&candidates(&["pack.zip"]), &session, &NullNotifier)
            .await
            .unwrap();
        assert_eq!(session.capability().unwrap(), Capability::fallback());
    }
}
