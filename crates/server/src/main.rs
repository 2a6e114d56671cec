//! Focusing Manager server binary.

use focusman::FocusConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = FocusConfig::load()?;
    server::start_server(config).await
}
