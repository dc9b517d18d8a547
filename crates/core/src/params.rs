//! Per-stage configuration structs, defaults, and boundary validation.
//!
//! Each stage receives an explicit typed configuration rather than a
//! loosely-typed map; required fields are validated once, when a workflow
//! request is accepted, not deep inside each stage.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::stage::Stage;

// ---------------------------------------------------------------------------
// Defaults and limits
// ---------------------------------------------------------------------------

/// Default training factor for the identity model.
pub const DEFAULT_IDENTITY_TRAINING_FACTOR: u32 = 1000;

/// Default training factor for the assay caller model.
pub const DEFAULT_ASSAY_TRAINING_FACTOR: u32 = 600;

/// Default control-well threshold for the assay caller.
pub const DEFAULT_CTRL_THRESHOLD: f64 = 5.0;

/// Default minimum accepted droplet count for a genotype call.
pub const DEFAULT_REQUIRED_DROPS: u32 = 0;

/// Hard ceiling on training factors to catch unit mistakes (e.g. passing a
/// droplet count where a factor is expected).
pub const MAX_TRAINING_FACTOR: u32 = 100_000;

/// Maximum number of dyes a detector archive can carry.
pub const MAX_DYES: usize = 8;

/// Control threshold must fall within this inclusive range.
pub const CTRL_THRESHOLD_RANGE: (f64, f64) = (0.0, 100.0);

/// Maximum length of a workflow job name.
const MAX_JOB_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Per-stage configuration
// ---------------------------------------------------------------------------

/// Configuration for primary analysis of an instrument data archive.
///
/// This is the only stage with no predecessor; it consumes the raw archive
/// reference instead of a prior stage UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryAnalysisParams {
    /// Name of the instrument-collected data archive to analyse.
    pub archive_name: String,
    /// Instrument/detector the archive was collected on.
    pub device_name: String,
    /// Dye names in channel order.
    pub dye_names: Vec<String>,
    /// Major version of the dye offsets dataset to apply.
    pub offsets_major: u32,
    /// Minor version of the dye offsets dataset to apply.
    pub offsets_minor: u32,
}

/// Configuration for the identity stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityParams {
    /// Number of droplets used to train the identity model.
    pub training_factor: u32,
}

impl Default for IdentityParams {
    fn default() -> Self {
        Self {
            training_factor: DEFAULT_IDENTITY_TRAINING_FACTOR,
        }
    }
}

/// Configuration for the assay caller stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssayCallerParams {
    /// Number of droplets used to train the assay caller model.
    pub training_factor: u32,
    /// Threshold separating control wells from sample wells.
    pub ctrl_threshold: f64,
}

impl Default for AssayCallerParams {
    fn default() -> Self {
        Self {
            training_factor: DEFAULT_ASSAY_TRAINING_FACTOR,
            ctrl_threshold: DEFAULT_CTRL_THRESHOLD,
        }
    }
}

/// Configuration for the genotyper stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenotyperParams {
    /// Minimum accepted droplet count per well for a genotype call.
    pub required_drops: u32,
}

impl Default for GenotyperParams {
    fn default() -> Self {
        Self {
            required_drops: DEFAULT_REQUIRED_DROPS,
        }
    }
}

// ---------------------------------------------------------------------------
// StageParameters
// ---------------------------------------------------------------------------

/// The full set of per-stage configurations carried by a workflow request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageParameters {
    pub primary_analysis: PrimaryAnalysisParams,
    #[serde(default)]
    pub identity: IdentityParams,
    #[serde(default)]
    pub assay_caller: AssayCallerParams,
    #[serde(default)]
    pub genotyper: GenotyperParams,
}

impl StageParameters {
    /// Validate every stage's configuration.
    ///
    /// Called once at the planning boundary; stages may assume their
    /// configuration is well-formed.
    pub fn validate(&self) -> Result<(), CoreError> {
        let pa = &self.primary_analysis;
        if pa.archive_name.is_empty() {
            return Err(CoreError::Validation(
                "archive_name must not be empty".to_string(),
            ));
        }
        if pa.device_name.is_empty() {
            return Err(CoreError::Validation(
                "device_name must not be empty".to_string(),
            ));
        }
        if pa.dye_names.is_empty() {
            return Err(CoreError::Validation(
                "At least one dye name is required".to_string(),
            ));
        }
        if pa.dye_names.len() > MAX_DYES {
            return Err(CoreError::Validation(format!(
                "At most {MAX_DYES} dyes are supported"
            )));
        }
        let mut seen = std::collections::HashSet::with_capacity(pa.dye_names.len());
        for dye in &pa.dye_names {
            if dye.is_empty() {
                return Err(CoreError::Validation(
                    "Dye names must not be empty".to_string(),
                ));
            }
            if !seen.insert(dye.as_str()) {
                return Err(CoreError::Validation(format!("Duplicate dye: \"{dye}\"")));
            }
        }

        validate_training_factor("identity", self.identity.training_factor)?;
        validate_training_factor("assay_caller", self.assay_caller.training_factor)?;

        let (lo, hi) = CTRL_THRESHOLD_RANGE;
        let thresh = self.assay_caller.ctrl_threshold;
        if !(lo..=hi).contains(&thresh) || !thresh.is_finite() {
            return Err(CoreError::Validation(format!(
                "ctrl_threshold must be within {lo}..={hi}, got {thresh}"
            )));
        }

        Ok(())
    }

    /// Canonical JSON echo of one stage's configuration.
    ///
    /// This is what gets recorded in the stage's document and later compared
    /// when deciding whether a prior result can be reused, so it must be
    /// stable across serialization round-trips.
    pub fn echo_for(&self, stage: Stage) -> serde_json::Value {
        match stage {
            Stage::PrimaryAnalysis => json!(self.primary_analysis),
            Stage::Identity => json!(self.identity),
            Stage::AssayCaller => json!(self.assay_caller),
            Stage::Genotyper => json!(self.genotyper),
        }
    }
}

fn validate_training_factor(stage: &str, factor: u32) -> Result<(), CoreError> {
    if factor == 0 {
        return Err(CoreError::Validation(format!(
            "{stage} training_factor must be positive"
        )));
    }
    if factor > MAX_TRAINING_FACTOR {
        return Err(CoreError::Validation(format!(
            "{stage} training_factor must not exceed {MAX_TRAINING_FACTOR}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Job name validation
// ---------------------------------------------------------------------------

/// Validate a workflow job name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_JOB_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_job_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Job name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_JOB_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Job name must not exceed {MAX_JOB_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Job name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
