use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

/// Upper bound on reasons attached to a single result.
pub const MAX_REASONS: usize = 3;

pub const INACTIVE_DAYS_THRESHOLD: f64 = 7.0;
pub const LOW_ENGAGEMENT_THRESHOLD: f64 = 0.3;
pub const LOW_LTV_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    InactiveRecently,
    LowEngagement,
    LowLtv,
    HeuristicFallback,
}

impl ReasonCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InactiveRecently => "inactive_recently",
            Self::LowEngagement => "low_engagement",
            Self::LowLtv => "low_ltv",
            Self::HeuristicFallback => "heuristic_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub member_id: String,
    pub risk_score: f64,
    pub reasons: Vec<ReasonCode>,
}

/// Coefficients of the linear term fed to the logistic.
///
/// The defaults are placeholders; they are kept fixed so scores stay
/// comparable with the existing service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub inactivity: f64,
    pub inactivity_scale_days: f64,
    pub engagement: f64,
    pub lifetime_value: f64,
    pub lifetime_value_scale: f64,
}

impl ScoringWeights {
    pub const DEFAULT: Self = Self {
        inactivity: 0.5,
        inactivity_scale_days: 30.0,
        engagement: 1.2,
        lifetime_value: 0.3,
        lifetime_value_scale: 500.0,
    };

    pub fn linear(&self, last_active_days_ago: f64, engagement: f64, lifetime_value: f64) -> f64 {
        self.inactivity * (last_active_days_ago / self.inactivity_scale_days)
            - self.engagement * engagement
            - self.lifetime_value * (lifetime_value / self.lifetime_value_scale)
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Threshold predicates in their fixed reporting order.
pub fn derive_reasons(
    last_active_days_ago: f64,
    engagement: f64,
    lifetime_value: f64,
) -> Vec<ReasonCode> {
    let mut reasons = Vec::with_capacity(MAX_REASONS);
    if last_active_days_ago > INACTIVE_DAYS_THRESHOLD {
        reasons.push(ReasonCode::InactiveRecently);
    }
    if engagement < LOW_ENGAGEMENT_THRESHOLD {
        reasons.push(ReasonCode::LowEngagement);
    }
    if lifetime_value < LOW_LTV_THRESHOLD {
        reasons.push(ReasonCode::LowLtv);
    }
    reasons.truncate(MAX_REASONS);
    reasons
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer {
    weights: ScoringWeights,
}

impl RiskScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Scores one member. Total over finite inputs; non-finite values are
    /// not guarded and propagate through the arithmetic.
    pub fn score(&self, member_id: impl Into<String>, features: &FeatureVector) -> ScoreResult {
        let last_active_days_ago = features.last_active_days_ago();
        let engagement = features.engagement_score();
        let lifetime_value = features.lifetime_value();

        let z = self
            .weights
            .linear(last_active_days_ago, engagement, lifetime_value);

        ScoreResult {
            member_id: member_id.into(),
            risk_score: logistic(z),
            reasons: derive_reasons(last_active_days_ago, engagement, lifetime_value),
        }
    }

    /// Output order always matches input order.
    pub fn score_batch<'a, I>(&self, items: I) -> Vec<ScoreResult>
    where
        I: IntoIterator<Item = (&'a str, &'a FeatureVector)>,
    {
        items
            .into_iter()
            .map(|(member_id, features)| self.score(member_id, features))
            .collect()
    }
}

pub fn score_one(member_id: impl Into<String>, features: &FeatureVector) -> ScoreResult {
    RiskScorer::default().score(member_id, features)
}
