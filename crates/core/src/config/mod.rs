use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{motion::MotionConfig, scene::Palette, Result};

/// Inner archive entry holding the mesh avatar inside an extended-format bundle.
pub const DEFAULT_FALLBACK_ENTRY: &str = "model.vrm";

/// Top-level configuration structure for the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Avatar assets tried in order until one loads.
    pub avatar_candidates: Vec<String>,
    /// Name of the payload entry looked up inside an archive on the fallback path.
    pub fallback_entry: String,
    pub animations: Vec<AnimationOption>,
    pub audio_tracks: Vec<AudioOption>,
    pub palettes: Vec<Palette>,
    pub motion: MotionConfig,
    /// Sample window used by amplitude analysers.
    pub analyser_fft_size: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            avatar_candidates: vec!["assets/avatar.gvrm".to_string()],
            fallback_entry: DEFAULT_FALLBACK_ENTRY.to_string(),
            animations: vec![
                AnimationOption::new("Idle", "assets/animations/idle.fbx"),
                AnimationOption::new("Wave", "assets/animations/wave.fbx"),
                AnimationOption::new("Dance", "assets/animations/dance.fbx"),
            ],
            audio_tracks: vec![
                AudioOption::new("Drift", "assets/audio/drift.wav", 0.6),
                AudioOption::new("Pulse", "assets/audio/pulse.wav", 0.5),
            ],
            palettes: Palette::presets(),
            motion: MotionConfig::default(),
            analyser_fft_size: 64,
        }
    }
}

impl StageConfig {
    /// Reads a JSON configuration file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Selectable animation clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationOption {
    pub label: String,
    pub url: String,
}

impl AnimationOption {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Selectable audio track with its playback volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOption {
    pub label: String,
    pub url: String,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl AudioOption {
    pub fn new(label: impl Into<String>, url: impl Into<String>, volume: f32) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            volume,
        }
    }
}

fn default_volume() -> f32 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StageConfig::from_json(
            r#"{ "avatar_candidates": ["a.gvrm", "b.gvrm"],
                 "audio_tracks": [{ "label": "Hum", "url": "hum.wav" }] }"#,
        )
        .unwrap();

        assert_eq!(config.avatar_candidates, vec!["a.gvrm", "b.gvrm"]);
        assert_eq!(config.fallback_entry, DEFAULT_FALLBACK_ENTRY);
        assert_eq!(config.audio_tracks.len(), 1);
        assert_eq!(config.audio_tracks[0].volume, 0.5);
        assert!(!config.palettes.is_empty());
        assert_eq!(config.analyser_fft_size, 64);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = StageConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, crate::AvatarStageError::Json(_)));
    }
}
