//! Example: Basic connection and authentication
//!
//! Connects to the control port named by `TOR_CONTROL_ADDR` (default
//! 127.0.0.1:9051), authenticates and prints a few facts about the daemon.
//!
//! Run with: cargo run --example basic

use torctl::{Controller, Result, TorControlConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = TorControlConfig::from_env()?;
    let credential = config.auth.clone();
    println!("Connecting to Tor control port at {}...", config.address);

    let controller = Controller::open(config.auth(Default::default())).await?;
    println!("Connected!");

    let info = controller.protocol_info().await?;
    println!("Tor version: {}", info.tor_version);
    println!("Auth methods: {:?}", info.auth_methods);
    if let Some(cookie) = &info.cookie_file {
        println!("Cookie file: {}", cookie.display());
    }

    println!("\nAuthenticating...");
    match credential {
        torctl::AuthCredential::None => controller.auto_authenticate(None).await?,
        credential => controller.authenticate(&credential).await?,
    }
    println!("Authentication successful!");

    let version = controller.get_version().await?;
    println!("\nTor version: {}", version);

    let traffic = controller
        .get_info_multi(&["traffic/read", "traffic/written"])
        .await?;
    for (key, value) in &traffic {
        println!("{}: {} bytes", key, value);
    }

    let circuits = controller.get_circuits().await?;
    println!("\nActive circuits: {}", circuits.len());
    for circuit in circuits.iter().take(5) {
        println!(
            "  Circuit {}: {} ({} hops)",
            circuit.id,
            circuit.status,
            circuit.path.len()
        );
    }

    controller.quit().await?;
    println!("\nDisconnected.");
    Ok(())
}
