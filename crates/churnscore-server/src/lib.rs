pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use error::RequestError;
pub use server::{HttpResponse, ScoreServer};
