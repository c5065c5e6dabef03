//! Example: Monitor Tor events
//!
//! Registers listeners for a few event categories and prints what arrives.
//! Commands keep working on the same connection while events flow.
//!
//! Run with: cargo run --example events

use std::time::Duration;
use torctl::{ConnectionStatus, Controller, Event, EventType, Result, TorControlConfig};

fn print_event(event: &Event) {
    match event {
        Event::CircuitStatus(circ) => {
            let path: Vec<String> = circ.path.iter().map(ToString::to_string).collect();
            println!(
                "[CIRCUIT] ID={} Status={} Path={}",
                circ.id,
                circ.status,
                if path.is_empty() { "-".to_string() } else { path.join("->") }
            );
        }
        Event::StreamStatus(stream) => {
            println!(
                "[STREAM] ID={} Status={:?} Target={}",
                stream.id, stream.status, stream.target
            );
        }
        Event::Bandwidth(bw) => {
            println!(
                "[BANDWIDTH] Read: {} bytes/s, Written: {} bytes/s",
                bw.bytes_read, bw.bytes_written
            );
        }
        Event::Log(log) => println!("[LOG:{}] {}", log.severity.as_str(), log.message),
        Event::Status(status) => {
            let args: Vec<String> = status
                .arguments
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            println!(
                "[STATUS:{}] {} - {}",
                status.status_type.as_str(),
                status.action,
                args.join(" ")
            );
        }
        other => println!("[EVENT] {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let controller = Controller::open(TorControlConfig::from_env()?).await?;
    if !controller.is_authenticated() {
        controller.auto_authenticate(None).await?;
    }
    println!("Connected and authenticated!");

    controller.add_status_listener(|status| {
        if let ConnectionStatus::Closed { reason } = status {
            eprintln!("Connection closed: {}", reason.as_deref().unwrap_or("locally"));
        }
    });

    for category in [
        EventType::Circ,
        EventType::Stream,
        EventType::Bw,
        EventType::Notice,
        EventType::StatusGeneral,
    ] {
        controller.add_event_listener(category, print_event).await?;
    }
    println!("Subscribed to {:?} (Ctrl+C to exit)\n", controller.subscribed_events());

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let circuits = controller.get_circuits().await?;
                println!("[POLL] {} circuits", circuits.len());
            }
        }
    }

    controller.close().await
}
