use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("feature `{name}` is not a finite number")]
    NonFinite { name: String },
}
