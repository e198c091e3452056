use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CompositionError;

/// One requested segment of the final video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSpec {
    /// 1-based position in the timeline
    #[serde(alias = "scene_number")]
    pub ordinal: u32,
    /// Scene description, also used as the caption
    #[serde(default)]
    pub description: String,
    /// What the imagery should show
    #[serde(default)]
    pub visual_elements: String,
}

impl SceneSpec {
    pub fn new(ordinal: u32, description: impl Into<String>, visual_elements: impl Into<String>) -> Self {
        Self {
            ordinal,
            description: description.into(),
            visual_elements: visual_elements.into(),
        }
    }
}

/// Brand parameters shared by every scene of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandDescriptor {
    #[serde(alias = "brand_name")]
    pub name: String,
    #[serde(default = "default_industry")]
    pub industry: String,
    #[serde(alias = "brand_tone", default = "default_tone")]
    pub tone: String,
}

fn default_industry() -> String {
    "business".to_string()
}

fn default_tone() -> String {
    "professional".to_string()
}

impl BrandDescriptor {
    pub fn new(name: impl Into<String>, industry: impl Into<String>, tone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            industry: industry.into(),
            tone: tone.into(),
        }
    }
}

/// The `video_ad_concept` block produced by the campaign strategy stage.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoAdConcept {
    #[serde(default)]
    pub call_to_action: Option<String>,
    pub scenes: Vec<SceneSpec>,
    #[serde(default)]
    pub brand: Option<BrandDescriptor>,
}

/// Where a scene's still image came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Synthesized(PathBuf),
    Placeholder(PathBuf),
    /// Neither synthesis nor the placeholder produced an image
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub scene_ordinal: u32,
    pub source: ImageSource,
}

impl ResolvedImage {
    pub fn synthesized(scene_ordinal: u32, path: PathBuf) -> Self {
        Self {
            scene_ordinal,
            source: ImageSource::Synthesized(path),
        }
    }

    pub fn placeholder(scene_ordinal: u32, path: PathBuf) -> Self {
        Self {
            scene_ordinal,
            source: ImageSource::Placeholder(path),
        }
    }

    pub fn missing(scene_ordinal: u32) -> Self {
        Self {
            scene_ordinal,
            source: ImageSource::Missing,
        }
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            ImageSource::Synthesized(path) | ImageSource::Placeholder(path) => Some(path),
            ImageSource::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.source, ImageSource::Missing)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.source, ImageSource::Placeholder(_))
    }
}

/// Sort scenes by ordinal and check that ordinals run 1..=N without gaps.
pub fn normalize_scenes(scenes: &[SceneSpec]) -> Result<Vec<SceneSpec>, CompositionError> {
    if scenes.is_empty() {
        return Err(CompositionError::NoScenes);
    }

    let mut sorted = scenes.to_vec();
    sorted.sort_by_key(|s| s.ordinal);

    for (idx, scene) in sorted.iter().enumerate() {
        let expected = idx as u32 + 1;
        if scene.ordinal != expected {
            return Err(CompositionError::InvalidScenes(format!(
                "expected scene ordinal {}, found {}",
                expected, scene.ordinal
            )));
        }
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_sorts_out_of_order_scenes() {
        let scenes = vec![
            SceneSpec::new(2, "b", ""),
            SceneSpec::new(1, "a", ""),
            SceneSpec::new(3, "c", ""),
        ];
        let sorted = normalize_scenes(&scenes).unwrap();
        let ordinals: Vec<u32> = sorted.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn normalize_rejects_gaps_duplicates_and_empty() {
        assert!(matches!(normalize_scenes(&[]), Err(CompositionError::NoScenes)));

        let gap = vec![SceneSpec::new(1, "a", ""), SceneSpec::new(3, "c", "")];
        assert!(matches!(
            normalize_scenes(&gap),
            Err(CompositionError::InvalidScenes(_))
        ));

        let dup = vec![SceneSpec::new(1, "a", ""), SceneSpec::new(1, "b", "")];
        assert!(normalize_scenes(&dup).is_err());

        let zero_based = vec![SceneSpec::new(0, "a", "")];
        assert!(normalize_scenes(&zero_based).is_err());
    }

    #[test]
    fn concept_json_uses_campaign_field_names() {
        let json = r#"{
            "call_to_action": "Shop Now",
            "duration": "20-30 seconds",
            "scenes": [
                {"scene_number": 1, "description": "Morning coffee", "duration": "5-8 seconds", "visual_elements": "steam"},
                {"scene_number": 2, "description": "Team at work"}
            ],
            "brand": {"brand_name": "Acme", "industry": "retail", "brand_tone": "playful"}
        }"#;

        let concept: VideoAdConcept = serde_json::from_str(json).unwrap();
        assert_eq!(concept.call_to_action.as_deref(), Some("Shop Now"));
        assert_eq!(concept.scenes[0], SceneSpec::new(1, "Morning coffee", "steam"));
        assert_eq!(concept.scenes[1].visual_elements, "");
        let brand = concept.brand.unwrap();
        assert_eq!(brand, BrandDescriptor::new("Acme", "retail", "playful"));
    }

    #[test]
    fn missing_image_has_no_path() {
        let img = ResolvedImage::missing(4);
        assert!(img.is_missing());
        assert!(img.local_path().is_none());

        let img = ResolvedImage::placeholder(2, PathBuf::from("/tmp/x.png"));
        assert!(img.is_placeholder());
        assert_eq!(img.local_path(), Some(Path::new("/tmp/x.png")));
    }
}
