//! Configuration management example.
//!
//! Queries and modifies Tor's runtime configuration using GETCONF, SETCONF
//! and RESETCONF.
//!
//! Run with: cargo run --example config
//!
//! Requires a running Tor instance with control port enabled.

use torctl::{Controller, Result, TorControlConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("torctl=debug")
        .init();

    let controller = Controller::open(TorControlConfig::from_env()?).await?;
    if !controller.is_authenticated() {
        controller.auto_authenticate(None).await?;
    }
    println!("Connected and authenticated!\n");

    // ========================================
    // Reading Configuration
    // ========================================
    println!("=== Reading Configuration ===\n");

    println!("SocksPort: {:?}", controller.get_conf("SocksPort").await?);
    println!("DataDirectory: {:?}", controller.get_conf("DataDirectory").await?);

    let configs = controller
        .get_conf_multi(&[
            "SocksPort",
            "ControlPort",
            "ORPort",
            "MaxCircuitDirtiness",
            "CircuitBuildTimeout",
        ])
        .await?;
    println!("\nMultiple config values:");
    for (key, values) in &configs {
        println!("  {}: {:?}", key, values);
    }

    // ========================================
    // Modifying Configuration
    // ========================================
    println!("\n=== Modifying Configuration ===\n");

    let original = controller.get_conf("MaxCircuitDirtiness").await?;
    println!("Original MaxCircuitDirtiness: {:?}", original);

    controller
        .set_conf_multi(&[("MaxCircuitDirtiness", "600"), ("CircuitBuildTimeout", "90")])
        .await?;
    let updated = controller
        .get_conf_multi(&["MaxCircuitDirtiness", "CircuitBuildTimeout"])
        .await?;
    println!("After SETCONF: {:?}", updated);

    controller.reset_conf("MaxCircuitDirtiness").await?;
    controller.reset_conf("CircuitBuildTimeout").await?;
    println!(
        "Reset MaxCircuitDirtiness: {:?}",
        controller.get_conf("MaxCircuitDirtiness").await?
    );

    // ========================================
    // Runtime Information
    // ========================================
    println!("\n=== Runtime Information ===\n");

    let info = controller
        .get_info_multi(&["version", "uptime", "status/bootstrap-phase", "config-file"])
        .await?;
    for (key, value) in &info {
        println!("{}: {}", key, value);
    }

    controller.close().await
}
