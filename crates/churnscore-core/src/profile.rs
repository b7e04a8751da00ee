use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, ENGAGEMENT_SCORE, LAST_ACTIVE_DAYS_AGO, LIFETIME_VALUE};
use crate::scorer::{ReasonCode, RiskScorer, ScoreResult};

const MS_PER_DAY: f64 = 86_400_000.0;

/// Raw member record as kept by the member store, before feature extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub member_id: String,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement_score: Option<f64>,
    #[serde(default)]
    pub lifetime_value: Option<f64>,
}

impl MemberProfile {
    /// Days since last activity, never negative even for clock skew.
    pub fn last_active_days_ago(&self, now: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ms = (now - self.last_active_at).num_milliseconds() as f64;
        (elapsed_ms / MS_PER_DAY).max(0.0)
    }

    pub fn build_features(&self, now: DateTime<Utc>) -> FeatureVector {
        FeatureVector::new()
            .with(LAST_ACTIVE_DAYS_AGO, self.last_active_days_ago(now))
            .with(ENGAGEMENT_SCORE, self.engagement_score.unwrap_or(0.0))
            .with(LIFETIME_VALUE, self.lifetime_value.unwrap_or(0.0))
    }

    pub fn score_with(&self, scorer: &RiskScorer, now: DateTime<Utc>) -> ScoreResult {
        scorer.score(self.member_id.as_str(), &self.build_features(now))
    }
}

/// Clamped linear fallback used when the logistic scorer is bypassed.
pub fn heuristic_risk(profile: &MemberProfile, now: DateTime<Utc>) -> f64 {
    let days = profile.last_active_days_ago(now);
    let engagement = profile.engagement_score.unwrap_or(0.0);
    let ltv = profile.lifetime_value.unwrap_or(0.0);

    let score = 0.6 * (days / 30.0).min(1.0)
        + 0.3 * (1.0 - engagement.min(1.0))
        + 0.1 * (1.0 - (ltv / 500.0).min(1.0));
    score.clamp(0.0, 1.0)
}

pub fn heuristic_result(profile: &MemberProfile, now: DateTime<Utc>) -> ScoreResult {
    ScoreResult {
        member_id: profile.member_id.clone(),
        risk_score: heuristic_risk(profile, now),
        reasons: vec![ReasonCode::HeuristicFallback],
    }
}

/// Highest risk first; equal scores keep their relative order.
pub fn rank_by_risk(results: &mut [ScoreResult]) {
    results.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
}
