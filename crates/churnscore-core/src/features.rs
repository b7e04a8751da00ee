use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FeatureError;

pub const LAST_ACTIVE_DAYS_AGO: &str = "lastActiveDaysAgo";
pub const ENGAGEMENT_SCORE: &str = "engagementScore";
pub const LIFETIME_VALUE: &str = "lifetimeValue";

/// Named numeric signals describing one member.
///
/// Keys the scorer does not recognize are carried but ignored. Missing keys
/// read as `0.0`. Values are never range-checked here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn value_or_default(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    pub fn last_active_days_ago(&self) -> f64 {
        self.value_or_default(LAST_ACTIVE_DAYS_AGO)
    }

    pub fn engagement_score(&self) -> f64 {
        self.value_or_default(ENGAGEMENT_SCORE)
    }

    pub fn lifetime_value(&self) -> f64 {
        self.value_or_default(LIFETIME_VALUE)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the first non-finite entry in name order, if any.
    pub fn ensure_finite(&self) -> Result<(), FeatureError> {
        match self.values.iter().find(|(_, v)| !v.is_finite()) {
            Some((name, _)) => Err(FeatureError::NonFinite { name: name.clone() }),
            None => Ok(()),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
