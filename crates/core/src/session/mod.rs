use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::AmplitudeAnalyser,
    audio::AudioSource,
    avatar::{AvatarHandle, Capability},
    AvatarStageError, Result,
};

/// Switchable resources exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Animation,
    Audio,
    Palette,
}

/// Discrete selection dispatched by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiEvent {
    Animation(usize),
    Audio(usize),
    Palette(usize),
}

/// Receives state changes the UI gates its controls on.
pub trait UiNotifier: Send + Sync {
    fn capability_changed(&self, capability: &Capability);

    fn selection_committed(&self, _kind: ResourceKind, _index: usize) {}
}

/// Notifier that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl UiNotifier for NullNotifier {
    fn capability_changed(&self, _capability: &Capability) {}
}

/// Raw pointer position in normalized device coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f32,
    pub y: f32,
}

/// Request counter and committed selection for one switchable resource.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SwitchSlot {
    token: u64,
    committed: Option<usize>,
}

impl SwitchSlot {
    pub(crate) fn issue(&mut self) -> u64 {
        self.token += 1;
        self.token
    }

    pub(crate) fn is_current(&self, token: u64) -> bool {
        self.token == token
    }

    /// Commits `index` only when `token` is still the latest issued one.
    pub(crate) fn commit(&mut self, token: u64, index: usize) -> Result<()> {
        if !self.is_current(token) {
            return Err(AvatarStageError::SwitchRejected);
        }
        self.committed = Some(index);
        Ok(())
    }

    pub(crate) fn committed(&self) -> Option<usize> {
        self.committed
    }
}

/// Mutable state shared by the acquisition, switching and render paths.
#[derive(Default)]
pub struct SessionState {
    pub(crate) capability: Capability,
    pub(crate) avatar: Option<AvatarHandle>,
    pub(crate) animation: SwitchSlot,
    pub(crate) audio: SwitchSlot,
    pub(crate) palette: usize,
    pub(crate) palette_revision: u64,
    pub(crate) audio_source: Option<Box<dyn AudioSource>>,
    pub(crate) analyser: Option<Box<dyn AmplitudeAnalyser>>,
    pub(crate) playback_blocked: bool,
    pub(crate) pointer: PointerSample,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("capability", &self.capability)
            .field("avatar", &self.avatar)
            .field("animation", &self.animation.committed())
            .field("audio", &self.audio.committed())
            .field("palette", &self.palette)
            .field("analyser", &self.analyser.is_some())
            .field("playback_blocked", &self.playback_blocked)
            .finish()
    }
}

/// Cloneable handle to the session state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    shared: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Creates a session in loading mode with nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the capability record.
    pub fn capability(&self) -> Result<Capability> {
        Ok(self.lock()?.capability)
    }

    /// The active avatar, once acquisition succeeded.
    pub fn avatar(&self) -> Result<Option<AvatarHandle>> {
        Ok(self.lock()?.avatar.clone())
    }

    /// Index of the last committed animation clip.
    pub fn current_animation(&self) -> Result<Option<usize>> {
        Ok(self.lock()?.animation.committed())
    }

    /// Index of the last committed audio track.
    pub fn current_audio(&self) -> Result<Option<usize>> {
        Ok(self.lock()?.audio.committed())
    }

    /// Index of the selected palette.
    pub fn palette_index(&self) -> Result<usize> {
        Ok(self.lock()?.palette)
    }

    /// Whether the committed track is currently playing.
    pub fn is_audio_playing(&self) -> Result<bool> {
        Ok(self
            .lock()?
            .audio_source
            .as_ref()
            .map(|source| source.is_playing())
            .unwrap_or(false))
    }

    /// Records the latest raw pointer position. Values are clamped to `[-1, 1]`.
    pub fn set_pointer(&self, x: f32, y: f32) -> Result<()> {
        let mut state = self.lock()?;
        state.pointer = PointerSample {
            x: sanitize_axis(x),
            y: sanitize_axis(y),
        };
        Ok(())
    }

    /// Latest pointer sample.
    pub fn pointer(&self) -> Result<PointerSample> {
        Ok(self.lock()?.pointer)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.shared
            .lock()
            .map_err(|_| AvatarStageError::msg("session state has been poisoned"))
    }
}

fn sanitize_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_latest_token_commits() {
        let mut slot = SwitchSlot::default();
        let first = slot.issue();
        let second = slot.issue();

        assert!(matches!(
            slot.commit(first, 1),
            Err(AvatarStageError::SwitchRejected)
        ));
        assert_eq!(slot.committed(), None);

        slot.commit(second, 2).unwrap();
        assert_eq!(slot.committed(), Some(2));
        assert!(second > first);
    }

    #[test]
    fn pointer_is_clamped() {
        let session = Session::new();
        session.set_pointer(3.0, f32::NAN).unwrap();
        assert_eq!(session.pointer().unwrap(), PointerSample { x: 1.0, y: 0.0 });
    }

    #[test]
    fn starts_loading_with_nothing_committed() {
        let session = Session::new();
        assert!(!session.capability().unwrap().is_settled());
        assert!(session.avatar().unwrap().is_none());
        assert_eq!(session.current_animation().unwrap(), None);
        assert_eq!(session.current_audio().unwrap(), None);
        assert!(!session.is_audio_playing().unwrap());
    }
}
