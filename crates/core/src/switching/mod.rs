use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    audio::{AudioBackend, AudioBufferCache},
    avatar::AvatarHandle,
    config::{AnimationOption, AudioOption, StageConfig},
    scene::Palette,
    session::{ResourceKind, Session, SessionState, SwitchSlot, UiEvent, UiNotifier},
    AvatarStageError, Result,
};

/// Terminal state of one switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Committed(usize),
    /// A newer request for the same resource was issued first.
    Superseded,
    Failed,
    Unsupported,
}

#[derive(Debug, Clone, Copy)]
enum SwitchKind {
    Animation,
    Audio,
}

impl SwitchKind {
    fn slot(self, state: &mut SessionState) -> &mut SwitchSlot {
        match self {
            Self::Animation => &mut state.animation,
            Self::Audio => &mut state.audio,
        }
    }

    fn resource(self) -> ResourceKind {
        match self {
            Self::Animation => ResourceKind::Animation,
            Self::Audio => ResourceKind::Audio,
        }
    }
}

/// Applies user selections of animation, audio track and palette.
///
/// Each animation or audio request takes a fresh token when issued; its
/// result is committed only if that token is still the newest when the
/// asynchronous work finishes. Older results are dropped on arrival.
#[derive(Clone)]
pub struct ResourceSwitchController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    session: Session,
    animations: Vec<AnimationOption>,
    audio_tracks: Vec<AudioOption>,
    palettes: Vec<Palette>,
    fft_size: usize,
    audio: Arc<dyn AudioBackend>,
    cache: Arc<AudioBufferCache>,
    notifier: Arc<dyn UiNotifier>,
}

impl ResourceSwitchController {
    /// Builds a controller over `session` using the options in `config`.
    pub fn new(
        session: Session,
        config: &StageConfig,
        audio: Arc<dyn AudioBackend>,
        cache: Arc<AudioBufferCache>,
        notifier: Arc<dyn UiNotifier>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                session,
                animations: config.animations.clone(),
                audio_tracks: config.audio_tracks.clone(),
                palettes: config.palettes.clone(),
                fft_size: config.analyser_fft_size,
                audio,
                cache,
                notifier,
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Routes a UI selection. Returns the spawned switch task, if any.
    pub fn dispatch(&self, event: UiEvent) -> Option<JoinHandle<SwitchOutcome>> {
        self.retry_blocked_playback();
        match event {
            UiEvent::Animation(index) => self.request_animation_switch(index),
            UiEvent::Audio(index) => self.request_audio_switch(index),
            UiEvent::Palette(index) => {
                self.select_palette(index);
                None
            }
        }
    }

    /// Starts switching the avatar to animation `index`.
    ///
    /// Returns `None` without touching any state when the avatar cannot swap
    /// clips, is not ready, or `index` is unknown. Must be called from within
    /// a Tokio runtime.
    pub fn request_animation_switch(&self, index: usize) -> Option<JoinHandle<SwitchOutcome>> {
        let (token, avatar, url) = match self.inner.begin_animation(index) {
            Ok(Some(request)) => request,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(index, %err, "animation switch not started");
                return None;
            }
        };

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            inner.finish_animation(token, index, avatar, url).await
        }))
    }

    /// Starts switching the background track to `index`.
    pub fn request_audio_switch(&self, index: usize) -> Option<JoinHandle<SwitchOutcome>> {
        let Some(option) = self.inner.audio_tracks.get(index).cloned() else {
            tracing::warn!(index, "unknown audio track");
            return None;
        };
        let token = match self.inner.issue(SwitchKind::Audio) {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(index, %err, "audio switch not started");
                return None;
            }
        };

        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            inner.finish_audio(token, index, option).await
        }))
    }

    /// Commits palette `index` immediately. Returns whether it was applied.
    pub fn select_palette(&self, index: usize) -> bool {
        if index >= self.inner.palettes.len() {
            tracing::warn!(index, "unknown palette");
            return false;
        }

        match self.inner.session.lock() {
            Ok(mut state) => {
                state.palette = index;
                state.palette_revision += 1;
            }
            Err(err) => {
                tracing::warn!(%err, "palette not applied");
                return false;
            }
        }
        self.inner
            .notifier
            .selection_committed(ResourceKind::Palette, index);
        true
    }

    fn retry_blocked_playback(&self) {
        let blocked = self
            .inner
            .session
            .lock()
            .map(|state| state.playback_blocked)
            .unwrap_or(false);
        if !blocked {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            match inner.audio.resume().await {
                Ok(()) => {
                    if let Ok(mut state) = inner.session.lock() {
                        state.playback_blocked = false;
                    }
                    tracing::info!("audio output resumed");
                }
                Err(err) => tracing::debug!(%err, "audio output still blocked"),
            }
        });
    }
}

impl ControllerInner {
    fn issue(&self, kind: SwitchKind) -> Result<u64> {
        let mut state = self.session.lock()?;
        Ok(kind.slot(&mut state).issue())
    }

    fn begin_animation(&self, index: usize) -> Result<Option<(u64, AvatarHandle, String)>> {
        let mut state = self.session.lock()?;
        let Some(avatar) = state.avatar.clone() else {
            tracing::debug!(index, "no avatar yet; ignoring animation switch");
            return Ok(None);
        };
        if !state.capability.supports_extended_animation || !avatar.supports_extended_animation() {
            tracing::debug!(index, "avatar cannot swap animations");
            return Ok(None);
        }
        if !avatar.is_ready() {
            tracing::debug!(index, "avatar not ready; ignoring animation switch");
            return Ok(None);
        }
        let Some(option) = self.animations.get(index) else {
            return Err(AvatarStageError::msg(format!("unknown animation {index}")));
        };

        let token = state.animation.issue();
        Ok(Some((token, avatar, option.url.clone())))
    }

    async fn finish_animation(
        &self,
        token: u64,
        index: usize,
        avatar: AvatarHandle,
        url: String,
    ) -> SwitchOutcome {
        match avatar.change_animation(&url).await {
            Ok(()) => self.commit(SwitchKind::Animation, token, index),
            Err(AvatarStageError::Unsupported(reason)) => {
                tracing::debug!(index, %reason, "animation switch unsupported");
                SwitchOutcome::Unsupported
            }
            Err(err) => {
                tracing::warn!(index, url = %url, %err, "animation switch failed");
                SwitchOutcome::Failed
            }
        }
    }

    async fn finish_audio(&self, token: u64, index: usize, option: AudioOption) -> SwitchOutcome {
        let buffer = match self.cache.get(&option.url).await {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::warn!(index, %err, "audio switch failed");
                return SwitchOutcome::Failed;
            }
        };

        if !self.is_current(SwitchKind::Audio, token) {
            tracing::debug!(index, "stale audio switch dropped");
            return SwitchOutcome::Superseded;
        }

        if let Err(err) = self.audio.resume().await {
            let err = match err {
                AvatarStageError::PlaybackBlocked(_) => err,
                other => AvatarStageError::PlaybackBlocked(other.to_string()),
            };
            tracing::warn!(index, %err, "audio switch failed");
            if let Ok(mut state) = self.session.lock() {
                state.playback_blocked = true;
            }
            return SwitchOutcome::Failed;
        }

        let outcome = match self.session.lock() {
            Ok(mut guard) => {
                let state = &mut *guard;
                if !state.audio.is_current(token) {
                    tracing::debug!(index, "stale audio switch dropped");
                    SwitchOutcome::Superseded
                } else {
                    state.playback_blocked = false;
                    let mut source = self.audio.create_source();
                    source.set_buffer(buffer);
                    source.set_loop(true);
                    source.set_volume(option.volume);
                    match source.play() {
                        Ok(()) => {
                            let analyser = self.audio.create_analyser(&*source, self.fft_size);
                            match state.audio.commit(token, index) {
                                Ok(()) => {
                                    if let Some(mut previous) = state.audio_source.replace(source) {
                                        previous.stop();
                                    }
                                    state.analyser = Some(analyser);
                                    SwitchOutcome::Committed(index)
                                }
                                Err(_) => {
                                    source.stop();
                                    SwitchOutcome::Superseded
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(index, %err, "audio playback failed to start");
                            SwitchOutcome::Failed
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(index, %err, "audio switch failed");
                SwitchOutcome::Failed
            }
        };

        if let SwitchOutcome::Committed(index) = outcome {
            tracing::info!(index, track = %option.label, "audio track switched");
            self.notifier.selection_committed(ResourceKind::Audio, index);
        }
        outcome
    }

    fn is_current(&self, kind: SwitchKind, token: u64) -> bool {
        self.session
            .lock()
            .map(|mut state| kind.slot(&mut state).is_current(token))
            .unwrap_or(false)
    }

    fn commit(&self, kind: SwitchKind, token: u64, index: usize) -> SwitchOutcome {
        let committed = self
            .session
            .lock()
            .and_then(|mut state| kind.slot(&mut state).commit(token, index));

        match committed {
            Ok(()) => {
                tracing::info!(index, kind = ?kind, "switch committed");
                self.notifier.selection_committed(kind.resource(), index);
                SwitchOutcome::Committed(index)
            }
            Err(AvatarStageError::SwitchRejected) => {
                tracing::debug!(index, kind = ?kind, "stale switch dropped");
                SwitchOutcome::Superseded
            }
            Err(err) => {
                tracing::warn!(index, %err, "switch not committed");
                SwitchOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for ResourceSwitchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSwitchController")
            .field("animations", &self.inner.animations.len())
            .field("audio_tracks", &self.inner.audio_tracks.len())
            .field("palettes", &self.inner.palettes.len())
            .finish()
    }
}
