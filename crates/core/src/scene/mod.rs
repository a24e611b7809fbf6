use serde::{Deserialize, Serialize};

/// Color scheme applied to the scene, particles and halo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub name: String,
    pub background: String,
    pub particle_primary: String,
    pub particle_secondary: String,
    pub halo_color: String,
    /// Resting halo opacity before amplitude modulation.
    pub halo_opacity: f32,
}

impl Palette {
    pub fn new(
        name: &str,
        background: &str,
        particle_primary: &str,
        particle_secondary: &str,
        halo_color: &str,
        halo_opacity: f32,
    ) -> Self {
        Self {
            name: name.to_string(),
            background: background.to_string(),
            particle_primary: particle_primary.to_string(),
            particle_secondary: particle_secondary.to_string(),
            halo_color: halo_color.to_string(),
            halo_opacity,
        }
    }

    /// Built-in palettes offered when the configuration lists none.
    pub fn presets() -> Vec<Self> {
        vec![
            Self::new("Aurora", "#05060f", "#7af0d4", "#6a7dff", "#9fe8ff", 0.12),
            Self::new("Ember", "#120606", "#ff8a3d", "#ff3d6e", "#ffc38a", 0.16),
            Self::new("Tide", "#030b12", "#3dc9ff", "#2f5bff", "#bfe9ff", 0.1),
        ]
    }

    /// Parses `#rrggbb` into linear 0..1 channels. Returns `None` on malformed input.
    pub fn rgb(hex: &str) -> Option<[f32; 3]> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let mut rgb = [0.0; 3];
        for (channel, slot) in rgb.iter_mut().enumerate() {
            let byte = u8::from_str_radix(&digits[channel * 2..channel * 2 + 2], 16).ok()?;
            *slot = byte as f32 / 255.0;
        }
        Some(rgb)
    }
}

/// Uniforms written into the particle field each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleUniforms {
    pub time: f32,
    pub cursor: [f32; 2],
    pub intensity: f32,
}

/// Transform of the ambient particle group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbientMotion {
    pub rotation_y: f32,
    pub drift_y: f32,
}

/// On-screen cursor feedback overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    /// Position in normalized `[0, 1]` screen space, origin top-left.
    pub position: [f32; 2],
    pub opacity: f32,
}

/// Rendering collaborator driven by the render loop. Scene construction
/// (lights, geometry, camera) stays with the implementor.
pub trait SceneSink {
    fn apply_palette(&mut self, palette: &Palette);
    fn set_ambient(&mut self, motion: AmbientMotion);
    fn set_particle_uniforms(&mut self, uniforms: ParticleUniforms);
    fn set_halo_opacity(&mut self, opacity: f32);
    fn update_controls(&mut self, delta: f32);
    fn set_overlay(&mut self, overlay: OverlayState);
    fn render(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colors() {
        assert_eq!(Palette::rgb("#ff0000"), Some([1.0, 0.0, 0.0]));
        assert_eq!(Palette::rgb("00ff00"), Some([0.0, 1.0, 0.0]));
        assert_eq!(Palette::rgb("#fff"), None);
        assert_eq!(Palette::rgb("#zz0000"), None);
    }

    #[test]
    fn presets_have_valid_colors() {
        for palette in Palette::presets() {
            assert!(Palette::rgb(&palette.background).is_some(), "{}", palette.name);
            assert!(Palette::rgb(&palette.halo_color).is_some(), "{}", palette.name);
            assert!(palette.halo_opacity > 0.0 && palette.halo_opacity < 0.6);
        }
    }
}
