//! Caller-facing generation parameters and their documented ranges.
//!
//! Pipelines clamp these into their own backend-specific ranges; the ranges
//! here only reject values no backend accepts. Sampler settings left unset
//! fall through to each pipeline's own defaults.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::ConfigError;

pub const STEPS_RANGE: RangeInclusive<u32> = 1..=100;
pub const GUIDANCE_RANGE: RangeInclusive<f64> = 0.0..=20.0;
pub const SEED_RANGE: RangeInclusive<u64> = 0..=10_000_000;
pub const OCTREE_RESOLUTIONS: [u32; 3] = [256, 384, 512];

/// Generation defaults applied to every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling steps for mesh synthesis. Range 1-100. Unset uses the
    /// pipeline default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,

    /// Classifier-free guidance scale. Range 0.0-20.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f64>,

    /// Seed shared by the image and mesh stages. Range 0-10,000,000.
    #[serde(default = "GenerationConfig::default_seed")]
    pub seed: u64,

    /// Octree resolution bucket, one of 256, 384, 512.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub octree_resolution: Option<u32>,

    /// Ask the backend to strip the reference image background.
    #[serde(default = "GenerationConfig::default_remove_background")]
    pub remove_background: bool,

    #[serde(default = "GenerationConfig::default_image_size")]
    pub image_width: u32,

    #[serde(default = "GenerationConfig::default_image_size")]
    pub image_height: u32,

    /// Sampling steps for the reference image model.
    #[serde(default = "GenerationConfig::default_image_steps")]
    pub image_steps: u32,
}

impl GenerationConfig {
    fn default_seed() -> u64 {
        1234
    }

    fn default_remove_background() -> bool {
        true
    }

    fn default_image_size() -> u32 {
        1024
    }

    fn default_image_steps() -> u32 {
        4
    }

    /// Reject values outside the documented ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(steps) = self.steps.filter(|s| !STEPS_RANGE.contains(s)) {
            return Err(ConfigError::invalid(
                "generation.steps",
                format!("{steps} is outside {STEPS_RANGE:?}"),
            ));
        }
        if let Some(scale) = self.guidance_scale.filter(|g| !GUIDANCE_RANGE.contains(g)) {
            return Err(ConfigError::invalid(
                "generation.guidance_scale",
                format!("{scale} is outside {GUIDANCE_RANGE:?}"),
            ));
        }
        if !SEED_RANGE.contains(&self.seed) {
            return Err(ConfigError::invalid(
                "generation.seed",
                format!("{} is outside {:?}", self.seed, SEED_RANGE),
            ));
        }
        if let Some(resolution) = self
            .octree_resolution
            .filter(|r| !OCTREE_RESOLUTIONS.contains(r))
        {
            return Err(ConfigError::invalid(
                "generation.octree_resolution",
                format!("{resolution} is not one of {OCTREE_RESOLUTIONS:?}"),
            ));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(ConfigError::invalid(
                "generation.image_width",
                "image dimensions must be non-zero",
            ));
        }
        if self.image_steps == 0 {
            return Err(ConfigError::invalid(
                "generation.image_steps",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            steps: None,
            guidance_scale: None,
            seed: Self::default_seed(),
            octree_resolution: None,
            remove_background: Self::default_remove_background(),
            image_width: Self::default_image_size(),
            image_height: Self::default_image_size(),
            image_steps: Self::default_image_steps(),
        }
    }
}
