use churnscore_server::{logging, ScoreServer, ServerConfig};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServerConfig::from_env();
    logging::init(config.log_format, "info")?;
    info!(
        max_body_bytes = config.max_body_bytes,
        max_batch_items = config.max_batch_items,
        "churnscored starting"
    );

    let addr = config.http_addr.clone();
    let server = ScoreServer::new(config);
    server.serve_http(&addr)?;
    Ok(())
}
