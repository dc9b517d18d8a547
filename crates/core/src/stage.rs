//! The four analysis stages and their canonical ordering.
//!
//! Every workflow walks the same chain: primary analysis produces droplet
//! measurements from the instrument archive, identity resolves barcode
//! clusters, the assay caller classifies wells, and the genotyper emits the
//! final calls. Each stage consumes the stage UUID of its predecessor.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One phase of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PrimaryAnalysis,
    Identity,
    AssayCaller,
    Genotyper,
}

impl Stage {
    /// Canonical execution order. Reuse planning and execution both walk
    /// this slice front to back.
    pub const ORDER: [Stage; 4] = [
        Stage::PrimaryAnalysis,
        Stage::Identity,
        Stage::AssayCaller,
        Stage::Genotyper,
    ];

    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryAnalysis => "primary_analysis",
            Self::Identity => "identity",
            Self::AssayCaller => "assay_caller",
            Self::Genotyper => "genotyper",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "primary_analysis" => Ok(Self::PrimaryAnalysis),
            "identity" => Ok(Self::Identity),
            "assay_caller" => Ok(Self::AssayCaller),
            "genotyper" => Ok(Self::Genotyper),
            _ => Err(CoreError::Validation(format!(
                "Invalid stage: '{s}'. Must be one of: primary_analysis, identity, assay_caller, genotyper"
            ))),
        }
    }

    /// Name of the collection holding this stage's own execution records.
    ///
    /// Each stage type persists into its own collection, distinct from the
    /// top-level `workflow_jobs` collection.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::PrimaryAnalysis => "primary_analysis_records",
            Self::Identity => "identity_records",
            Self::AssayCaller => "assay_caller_records",
            Self::Genotyper => "genotyper_records",
        }
    }

    /// Position of this stage in [`Stage::ORDER`].
    pub fn index(&self) -> usize {
        match self {
            Self::PrimaryAnalysis => 0,
            Self::Identity => 1,
            Self::AssayCaller => 2,
            Self::Genotyper => 3,
        }
    }

    /// The stage immediately before this one, if any.
    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Self::PrimaryAnalysis => None,
            other => Some(Self::ORDER[other.index() - 1]),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
