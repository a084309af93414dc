//! Stream live punches until ctrl-c

use std::time::Duration;

use bioterm::constants::events::EF_ATTLOG;
use bioterm::{Device, LiveTick};

#[tokio::main]
async fn main() -> bioterm::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let ip = std::env::var("DEVICE_IP").unwrap_or_else(|_| "192.168.1.201".to_string());

    let mut device = Device::new(ip, 4370);
    device.connect().await?;

    let mut capture = device
        .live_capture(Duration::from_secs(10), EF_ATTLOG)
        .await?;
    let stop = capture.stop_handle();

    // Wind the stream down on ctrl-c
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stop.stop();
    });

    println!("Watching for punches (ctrl-c to stop)...");

    while let Some(tick) = capture.next().await? {
        match tick {
            LiveTick::Punch(event) => {
                let when = event
                    .timestamp
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "<bad timestamp>".to_string());
                println!("{} punched at {} (status {})", event.user_id, when, event.status);
            }
            LiveTick::Idle => {}
        }
    }

    device.disconnect().await?;
    Ok(())
}
