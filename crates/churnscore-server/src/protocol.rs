use churnscore_core::{FeatureVector, MemberProfile, ScoreResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoreRequest {
    pub items: Vec<ScoreItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreItem {
    pub member_id: String,
    pub features: FeatureVector,
}

/// `POST /score` answers with a bare array, same length and order as `items`.
pub type ScoreResponse = Vec<ScoreResult>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankRequest {
    pub members: Vec<MemberProfile>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankResponse {
    pub items: Vec<ScoreResult>,
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

impl HealthResponse {
    pub const OK: Self = Self { status: "ok" };
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
