pub mod error;
pub mod features;
pub mod profile;
pub mod scorer;

pub use error::FeatureError;
pub use features::*;
pub use profile::*;
pub use scorer::*;
