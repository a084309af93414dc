//! UDP connection example (for the older terminals)

use tracing_subscriber;

use bioterm::Device;

#[tokio::main]
async fn main() -> bioterm::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Change to your device IP
    let ip = std::env::var("DEVICE_IP").unwrap_or_else(|_| "192.168.1.201".to_string());

    println!("Connecting to {} via UDP...", ip);

    let mut device = Device::new_udp(ip, 4370);

    // Connect
    device.connect().await?;
    println!("✓ Connected!");

    // Get device info
    let info = device.get_device_info().await?;
    println!(
        "✓ Device: serial {}, firmware {}",
        info.serial_number, info.firmware_version
    );

    let capacity = device.read_sizes().await?;
    println!(
        "✓ {} users, {} attendance rows on the device",
        capacity.users, capacity.records
    );

    // Disconnect
    device.disconnect().await?;
    println!("✓ Disconnected");

    Ok(())
}
