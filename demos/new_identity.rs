//! Example: Request a new identity
//!
//! Sends NEWNYM and shows how the circuit list changes.
//!
//! Run with: cargo run --example new_identity

use std::time::Duration;
use torctl::{Controller, Result, Signal, TorControlConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let controller = Controller::open(TorControlConfig::from_env()?).await?;
    if !controller.is_authenticated() {
        controller.auto_authenticate(None).await?;
    }

    let before = controller.get_circuits().await?;
    println!("Circuits before NEWNYM: {}", before.len());

    controller.signal(Signal::NewNym).await?;
    println!("New identity requested.");

    // Tor rate-limits NEWNYM; give it time to build fresh circuits.
    tokio::time::sleep(Duration::from_secs(10)).await;

    let after = controller.get_circuits().await?;
    let fresh = after
        .iter()
        .filter(|circuit| !before.iter().any(|old| old.id == circuit.id))
        .count();
    println!("Circuits after NEWNYM: {} ({} new)", after.len(), fresh);

    controller.clear_dns_cache().await?;
    controller.close().await
}
