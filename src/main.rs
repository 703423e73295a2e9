//! ChaatGPT server
//!
//! Entry point: loads configuration, initializes logging and serves the chat.

use std::sync::Arc;

use chaat_gpt::config::AppConfig;
use chaat_gpt::{server, telemetry};
use dotenvy::dotenv;
use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = Arc::new(AppConfig::load()?);
    telemetry::init(config.log.json);

    server::start_server(config).await
}
