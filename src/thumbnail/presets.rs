use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

pub const SUGGESTED_BACKGROUNDS: [&str; 10] = [
    "Futuristic Cyberpunk City",
    "Abandoned Haunted Hospital",
    "Luxury Modern Mansion",
    "Volcanic Lava Landscape",
    "Deep Space Nebula",
    "Tropical Paradise Island",
    "Underwater Ruined City",
    "Ancient Forest Temple",
    "Post-Apocalyptic Street",
    "Professional Studio Setup",
];

pub const SUGGESTED_ACTIONS: [&str; 8] = [
    "Shocked and pointing at camera",
    "Heroic pose with glowing eyes",
    "Thinking with a magnifying glass",
    "Holding a mysterious glowing object",
    "Running away in terror",
    "Meditating in a circle of light",
    "Sneaking around with a flashlight",
    "Celebrating with confetti everywhere",
];

pub const SUGGESTED_EXPRESSIONS: [&str; 8] = [
    "Extremely Shocked (Mouth Open)",
    "Angry and Determined",
    "Joyful and Laughing",
    "Smug and Confident",
    "Terrified with wide eyes",
    "Focused and Serious",
    "Winking and Mischievous",
    "Crying or Sad",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub prompt: String,
}

impl Preset {
    fn builtin(id: &str, name: &str, description: &str, icon: &str, prompt: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            icon: icon.to_owned(),
            prompt: prompt.to_owned(),
        }
    }
}

pub fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::builtin(
            "mrbeast",
            "Viral Hype",
            "Bright colors, high contrast, dramatic expressions, and massive text.",
            "🔥",
            "Viral hype thumbnail. Saturated colors, exaggerated expressions, radial sunburst behind the subject, enormous 3D headline with a thick dark stroke.",
        ),
        Preset::builtin(
            "gaming",
            "Neon Gaming",
            "Dark backgrounds with glowing neon accents and sharp edges.",
            "🎮",
            "Competitive gaming thumbnail. Dark moody scene, cyan and magenta rim light on the subject, geometric neon shapes, sharp tech lettering.",
        ),
        Preset::builtin(
            "minimalist",
            "Tech Clean",
            "Elegant, spacious, high-quality photography vibe.",
            "💻",
            "Minimal product-launch thumbnail. Soft even lighting, blurred backdrop, thin refined lettering, restrained premium palette.",
        ),
        Preset::builtin(
            "documentary",
            "Cinematic Story",
            "Dramatic, film-like, storytelling with moody tones.",
            "🎬",
            "Cinematic documentary thumbnail. Deep shadows, warm film grain, classic serif lettering, emotional high dynamic range lighting.",
        ),
    ]
}

/// Built-in presets plus any loaded from disk. Loaded presets replace built-ins with the
/// same id and otherwise append in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetCatalog {
    presets: Vec<Preset>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self {
            presets: builtin_presets(),
        }
    }
}

impl PresetCatalog {
    pub fn with_extra(extra: Vec<Preset>) -> Self {
        let mut catalog = Self::default();
        for preset in extra {
            match catalog
                .presets
                .iter_mut()
                .find(|existing| existing.id == preset.id)
            {
                Some(existing) => *existing = preset,
                None => catalog.presets.push(preset),
            }
        }
        catalog
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::with_extra(load_presets_file(path)?)),
            None => Ok(Self::default()),
        }
    }

    pub fn all(&self) -> &[Preset] {
        &self.presets
    }

    pub fn find(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.id == id)
    }
}

pub fn load_presets_file(path: &Path) -> Result<Vec<Preset>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read presets file `{}`", path.display()))?;
    let presets: Vec<Preset> = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse presets file `{}`", path.display()))?;

    for preset in &presets {
        ensure!(
            !preset.id.trim().is_empty(),
            "preset ids cannot be empty (in `{}`)",
            path.display()
        );
        ensure!(
            !preset.prompt.trim().is_empty(),
            "preset `{}` has an empty prompt",
            preset.id
        );
    }

    Ok(presets)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::test_support::{remove_dir_if_exists, temp_path};

    use super::{Preset, PresetCatalog, builtin_presets, load_presets_file};

    #[test]
    fn builtin_presets_have_unique_ids() {
        let presets = builtin_presets();
        let mut ids = presets.iter().map(|preset| preset.id.as_str()).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), presets.len());
    }

    #[test]
    fn extra_presets_override_by_id_and_append_new_ones() {
        let catalog = PresetCatalog::with_extra(vec![
            Preset {
                id: "gaming".to_owned(),
                name: "Retro Gaming".to_owned(),
                description: String::new(),
                icon: String::new(),
                prompt: "pixel art".to_owned(),
            },
            Preset {
                id: "cooking".to_owned(),
                name: "Kitchen".to_owned(),
                description: String::new(),
                icon: String::new(),
                prompt: "warm kitchen light".to_owned(),
            },
        ]);

        assert_eq!(catalog.all().len(), builtin_presets().len() + 1);
        assert_eq!(catalog.find("gaming").map(|p| p.name.as_str()), Some("Retro Gaming"));
        assert_eq!(catalog.find("cooking").map(|p| p.prompt.as_str()), Some("warm kitchen light"));
    }

    #[test]
    fn load_presets_file_parses_yaml_and_rejects_empty_prompt() {
        let dir = temp_path("presets");
        fs::create_dir_all(&dir).expect("temp dir should be creatable");

        let valid = dir.join("valid.yaml");
        fs::write(
            &valid,
            "- id: travel\n  name: Travel Vlog\n  prompt: sunny wide-angle travel shot\n",
        )
        .expect("write valid presets");
        let presets = load_presets_file(&valid).expect("valid presets should load");
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].id, "travel");
        assert_eq!(presets[0].icon, "");

        let invalid = dir.join("invalid.yaml");
        fs::write(&invalid, "- id: empty\n  name: Empty\n  prompt: \"  \"\n")
            .expect("write invalid presets");
        let error = load_presets_file(&invalid).expect_err("empty prompt should fail");
        assert!(error.to_string().contains("empty prompt"));

        remove_dir_if_exists(&dir);
    }
}
