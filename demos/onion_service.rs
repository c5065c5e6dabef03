//! Example: Ephemeral onion service
//!
//! Publishes an onion service forwarding port 80 to 127.0.0.1:8080 until
//! Ctrl+C is pressed, then removes it.
//!
//! Run with: cargo run --example onion_service

use torctl::{Controller, Result, TorControlConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let controller = Controller::open(TorControlConfig::from_env()?).await?;
    if !controller.is_authenticated() {
        controller.auto_authenticate(None).await?;
    }

    let service = controller
        .add_onion(&[(80, Some("127.0.0.1:8080"))], None, &["DiscardPK"])
        .await?;
    println!("Onion service running at {}", service.address.full_address());
    println!("Press Ctrl+C to remove it.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to wait for Ctrl+C: {}", e);
    }

    controller.del_onion(service.address.service_id()).await?;
    println!("Onion service removed.");
    controller.close().await
}
