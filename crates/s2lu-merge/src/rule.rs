//! Per-pixel merge rules.
//!
//! A rule combines one source (SCL) sample with the reference (land-use)
//! sample at the same location into one derived class. Rules are pure: the
//! same pair of inputs always yields the same output.

use crate::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Derived value for pixels with no defined result.
pub const NODATA_SENTINEL: u16 = u16::MAX;

/// Default SCL classes treated as clear by the mask rule.
pub const DEFAULT_MASK_CLEAR: [u16; 1] = [0];

/// SCL classes free of cloud and cloud shadow (2 dark area, 4 vegetation,
/// 5 bare soil, 6 water, 7 unclassified, 11 snow).
pub const DEFAULT_SCL_CLEAR: [u16; 6] = [2, 4, 5, 6, 7, 11];

/// Land-use classes counted as urban.
pub const DEFAULT_URBAN_CLASSES: [u16; 2] = [0, 5];

/// Integer class of a sample, `None` for fractional or out-of-range values.
pub(crate) fn class_of(value: f32) -> Option<u16> {
    if value.fract() == 0.0 && (0.0..=f32::from(u16::MAX)).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}

// ============================================================================
// Rule trait
// ============================================================================

/// A deterministic `f(source, reference) -> derived` pixel function.
pub trait PixelRule: std::fmt::Debug + Send + Sync {
    /// Short name used in logs and summaries.
    fn name(&self) -> &'static str;

    /// Combine one source sample with the reference sample at the same place.
    fn apply(&self, source: f32, reference: f32) -> u16;

    /// Cover statistics derived from the output class counts, if the rule
    /// defines any.
    fn cover(&self, _class_counts: &BTreeMap<u16, u64>) -> Option<CoverStats> {
        None
    }
}

/// Urban cover of one scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverStats {
    /// Pixels whose reference class is urban.
    pub urban_pixels: u64,
    /// Urban pixels seen without clouds.
    pub valid_urban_pixels: u64,
    /// `valid_urban_pixels` as a percentage of `urban_pixels`, `None` when
    /// the scene has no urban pixels.
    pub urban_cover: Option<f64>,
}

// ============================================================================
// Mask rule
// ============================================================================

/// Keep the reference class where the source is clear.
///
/// Produces the reference value when the source class is in the clear set
/// and [`NODATA_SENTINEL`] otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRule {
    clear_classes: Vec<u16>,
}

impl MaskRule {
    pub fn new(clear_classes: impl Into<Vec<u16>>) -> Self {
        Self {
            clear_classes: clear_classes.into(),
        }
    }
}

impl Default for MaskRule {
    fn default() -> Self {
        Self::new(DEFAULT_MASK_CLEAR)
    }
}

impl PixelRule for MaskRule {
    fn name(&self) -> &'static str {
        "mask"
    }

    fn apply(&self, source: f32, reference: f32) -> u16 {
        let clear = class_of(source).is_some_and(|c| self.clear_classes.contains(&c));
        if !clear {
            return NODATA_SENTINEL;
        }
        class_of(reference).unwrap_or(NODATA_SENTINEL)
    }
}

// ============================================================================
// Urban cover rule
// ============================================================================

/// Classify urban land by visibility.
///
/// - `0`: the reference class is not urban
/// - `1`: urban, but the source pixel is cloudy
/// - `2`: urban and clear
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrbanCoverRule {
    clear_classes: Vec<u16>,
    urban_classes: Vec<u16>,
}

impl UrbanCoverRule {
    pub const NOT_URBAN: u16 = 0;
    pub const URBAN_CLOUDY: u16 = 1;
    pub const URBAN_CLEAR: u16 = 2;

    pub fn new(clear_classes: impl Into<Vec<u16>>, urban_classes: impl Into<Vec<u16>>) -> Self {
        Self {
            clear_classes: clear_classes.into(),
            urban_classes: urban_classes.into(),
        }
    }
}

impl Default for UrbanCoverRule {
    fn default() -> Self {
        Self::new(DEFAULT_SCL_CLEAR, DEFAULT_URBAN_CLASSES)
    }
}

impl PixelRule for UrbanCoverRule {
    fn name(&self) -> &'static str {
        "urban-cover"
    }

    fn apply(&self, source: f32, reference: f32) -> u16 {
        let urban = class_of(reference).is_some_and(|c| self.urban_classes.contains(&c));
        if !urban {
            return Self::NOT_URBAN;
        }

        let clear = class_of(source).is_some_and(|c| self.clear_classes.contains(&c));
        if clear {
            Self::URBAN_CLEAR
        } else {
            Self::URBAN_CLOUDY
        }
    }

    fn cover(&self, class_counts: &BTreeMap<u16, u64>) -> Option<CoverStats> {
        let count = |class| class_counts.get(&class).copied().unwrap_or(0);
        let valid_urban_pixels = count(Self::URBAN_CLEAR);
        let urban_pixels = valid_urban_pixels + count(Self::URBAN_CLOUDY);

        let urban_cover = (urban_pixels > 0)
            .then(|| 100.0 * valid_urban_pixels as f64 / urban_pixels as f64);

        Some(CoverStats {
            urban_pixels,
            valid_urban_pixels,
            urban_cover,
        })
    }
}

// ============================================================================
// Rule configuration
// ============================================================================

/// Serializable rule selection.
///
/// In YAML:
///
/// ```yaml
/// rule:
///   kind: urban-cover
///   urban_classes: [0, 5]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleConfig {
    Mask {
        #[serde(default = "default_mask_clear")]
        clear_classes: Vec<u16>,
    },
    UrbanCover {
        #[serde(default = "default_scl_clear")]
        clear_classes: Vec<u16>,
        #[serde(default = "default_urban_classes")]
        urban_classes: Vec<u16>,
    },
}

fn default_mask_clear() -> Vec<u16> {
    DEFAULT_MASK_CLEAR.to_vec()
}

fn default_scl_clear() -> Vec<u16> {
    DEFAULT_SCL_CLEAR.to_vec()
}

fn default_urban_classes() -> Vec<u16> {
    DEFAULT_URBAN_CLASSES.to_vec()
}

impl RuleConfig {
    /// Instantiate the configured rule.
    pub fn build(&self) -> Box<dyn PixelRule> {
        match self {
            RuleConfig::Mask { clear_classes } => Box::new(MaskRule::new(clear_classes.clone())),
            RuleConfig::UrbanCover {
                clear_classes,
                urban_classes,
            } => Box::new(UrbanCoverRule::new(
                clear_classes.clone(),
                urban_classes.clone(),
            )),
        }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        RuleConfig::Mask {
            clear_classes: default_mask_clear(),
        }
    }
}

impl FromStr for RuleConfig {
    type Err = MergeError;

    /// Parse a rule name with default class sets.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mask" => Ok(RuleConfig::default()),
            "urban-cover" | "urban_cover" => Ok(RuleConfig::UrbanCover {
                clear_classes: default_scl_clear(),
                urban_classes: default_urban_classes(),
            }),
            other => Err(MergeError::Format(format!("unknown rule '{}'", other))),
        }
    }
}
