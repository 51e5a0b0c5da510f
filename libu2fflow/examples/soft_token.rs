use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{self, EnvFilter};

use libu2fflow::device::SoftToken;
use libu2fflow::{ClientConfig, U2fClient};

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let config = match env::args().nth(1) {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    info!("Using relying party at {} as {}.", config.server_url, config.username);

    let token = SoftToken::new()?;
    let client = U2fClient::new(&config, Arc::new(token))?;
    if !client.is_supported().await {
        info!("U2F is not supported against this relying party.");
        return Ok(());
    }

    // Registration ceremony
    let confirmation = client.register_device().await?;
    info!("Registration confirmed: {}", confirmation);

    // Signature ceremony
    let verified = client.sign_data(Some("hello world".to_owned())).await?;
    info!("Signature verified: {:?}", verified);

    Ok(())
}
