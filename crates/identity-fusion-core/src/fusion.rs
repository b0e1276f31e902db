use serde::{Deserialize, Serialize};

use crate::FusionError;

/// Profiles strictly older than this many years are decayed.
pub const AGE_PENALTY_THRESHOLD_YEARS: f64 = 3.0;
pub const AGE_PENALTY_FACTOR: f64 = 0.7;
pub const COUNTER_EVIDENCE_PENALTY: f64 = 0.8;
pub const DEFAULT_PLATFORM_WEIGHT: f64 = 0.5;

const DUAL_AGREEMENT_THRESHOLD: f64 = 0.8;
const OVERRIDE_AUTO_MERGE_THRESHOLD: f64 = 0.85;
const REVIEW_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    AutoMerge,
    NeedsReview,
    NoMatch,
}

impl Decision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoMerge => "AUTO_MERGE",
            Self::NeedsReview => "NEEDS_REVIEW",
            Self::NoMatch => "NO_MATCH",
        }
    }
}

/// Two independent estimators scoring the same candidate pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DualEstimatorInput {
    #[serde(default, alias = "conservativeConfidence")]
    pub conservative_confidence: f64,
    #[serde(default, alias = "exploratoryConfidence")]
    pub exploratory_confidence: f64,
    #[serde(default, alias = "profileAgeYears")]
    pub profile_age_years: f64,
}

/// A deterministic match signal alongside one probabilistic estimate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeterministicOverrideInput {
    #[serde(default, alias = "detConfidence")]
    pub det_confidence: f64,
    #[serde(default, alias = "confidence", alias = "llmConfidence")]
    pub llm_confidence: f64,
    /// Absent and zero both mean [`DEFAULT_PLATFORM_WEIGHT`].
    #[serde(default, alias = "platformWeight")]
    pub platform_weight: Option<f64>,
    #[serde(default, alias = "profileAgeYears")]
    pub profile_age_years: f64,
    #[serde(default, alias = "counterEvidence")]
    pub counter_evidence: Vec<String>,
}

impl DualEstimatorInput {
    /// # Errors
    /// Returns [`FusionError::InvalidFusionInput`] for a confidence outside `[0, 1]`
    /// or a negative or non-finite profile age.
    pub fn validate(&self) -> Result<(), FusionError> {
        check_unit_interval("conservative_confidence", self.conservative_confidence)?;
        check_unit_interval("exploratory_confidence", self.exploratory_confidence)?;
        check_age(self.profile_age_years)
    }
}

impl DeterministicOverrideInput {
    #[must_use]
    pub fn effective_platform_weight(&self) -> f64 {
        self.platform_weight.filter(|weight| weight.abs() > 0.0).unwrap_or(DEFAULT_PLATFORM_WEIGHT)
    }

    /// # Errors
    /// Returns [`FusionError::InvalidFusionInput`] for a confidence or platform
    /// weight outside `[0, 1]` or a negative or non-finite profile age.
    pub fn validate(&self) -> Result<(), FusionError> {
        check_unit_interval("det_confidence", self.det_confidence)?;
        check_unit_interval("llm_confidence", self.llm_confidence)?;
        if let Some(weight) = self.platform_weight {
            check_unit_interval("platform_weight", weight)?;
        }
        check_age(self.profile_age_years)
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), FusionError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FusionError::InvalidFusionInput {
            field: field.to_string(),
            reason: format!("must be within [0, 1], got {value}"),
        })
    }
}

fn check_age(profile_age_years: f64) -> Result<(), FusionError> {
    if profile_age_years.is_finite() && profile_age_years >= 0.0 {
        Ok(())
    } else {
        Err(FusionError::InvalidFusionInput {
            field: "profile_age_years".to_string(),
            reason: format!("must be a non-negative number of years, got {profile_age_years}"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FusionStrategy {
    DualEstimator(DualEstimatorInput),
    DeterministicOverride(DeterministicOverrideInput),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FusionComponents {
    DualEstimator {
        conservative_score: f64,
        exploratory_score: f64,
        age_penalty: f64,
    },
    DeterministicOverride {
        det_confidence: f64,
        fused_llm_score: f64,
        evidence_penalty: f64,
        age_penalty: f64,
        platform_weight: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionResult {
    pub final_score: f64,
    pub decision: Decision,
    pub components: FusionComponents,
}

#[must_use]
pub fn age_penalty(profile_age_years: f64) -> f64 {
    if profile_age_years > AGE_PENALTY_THRESHOLD_YEARS {
        AGE_PENALTY_FACTOR
    } else {
        1.0
    }
}

/// # Errors
/// Returns [`FusionError::InvalidFusionInput`] when the inputs are out of range.
pub fn fuse(strategy: &FusionStrategy) -> Result<FusionResult, FusionError> {
    match strategy {
        FusionStrategy::DualEstimator(input) => fuse_dual_estimator(input),
        FusionStrategy::DeterministicOverride(input) => fuse_deterministic_override(input),
    }
}

/// Both estimators must agree: the weaker adjusted score is the final score,
/// and `AUTO_MERGE` needs both at or above 0.8. Either one at or above 0.6
/// is enough for review.
///
/// # Errors
/// Returns [`FusionError::InvalidFusionInput`] when the inputs are out of range.
pub fn fuse_dual_estimator(input: &DualEstimatorInput) -> Result<FusionResult, FusionError> {
    input.validate()?;
    let penalty = age_penalty(input.profile_age_years);
    let conservative = input.conservative_confidence * penalty;
    let exploratory = input.exploratory_confidence * penalty;

    let decision = if conservative >= DUAL_AGREEMENT_THRESHOLD
        && exploratory >= DUAL_AGREEMENT_THRESHOLD
    {
        Decision::AutoMerge
    } else if conservative >= REVIEW_THRESHOLD || exploratory >= REVIEW_THRESHOLD {
        Decision::NeedsReview
    } else {
        Decision::NoMatch
    };

    Ok(FusionResult {
        final_score: conservative.min(exploratory),
        decision,
        components: FusionComponents::DualEstimator {
            conservative_score: conservative,
            exploratory_score: exploratory,
            age_penalty: penalty,
        },
    })
}

/// The probabilistic branch is discounted for counter-evidence, profile age,
/// and platform trust; a deterministic match can carry the decision alone.
///
/// # Errors
/// Returns [`FusionError::InvalidFusionInput`] when the inputs are out of range.
pub fn fuse_deterministic_override(
    input: &DeterministicOverrideInput,
) -> Result<FusionResult, FusionError> {
    input.validate()?;
    let evidence_penalty =
        if input.counter_evidence.is_empty() { 1.0 } else { COUNTER_EVIDENCE_PENALTY };
    let penalty = age_penalty(input.profile_age_years);
    let platform_weight = input.effective_platform_weight();

    let fused_llm_score = input.llm_confidence * evidence_penalty * penalty * platform_weight;
    let final_score = input.det_confidence.max(fused_llm_score);

    let decision = if final_score >= OVERRIDE_AUTO_MERGE_THRESHOLD {
        Decision::AutoMerge
    } else if final_score >= REVIEW_THRESHOLD {
        Decision::NeedsReview
    } else {
        Decision::NoMatch
    };

    Ok(FusionResult {
        final_score,
        decision,
        components: FusionComponents::DeterministicOverride {
            det_confidence: input.det_confidence,
            fused_llm_score,
            evidence_penalty,
            age_penalty: penalty,
            platform_weight,
        },
    })
}
