//! probe command - log in to a subsystem and show what the controller reports

use anyhow::{Context, Result};
use std::time::Instant;
use warp_nvmeof::protocol::{Property, PropertySize};
use warp_nvmeof::{Client, ClientConfig, NvmeStatus};

/// Execute the probe command
///
/// # Arguments
/// * `server` - Target address in format "host:port"
/// * `nqn` - Subsystem to log in to
pub async fn execute(server: &str, nqn: &str) -> Result<()> {
    println!("Probing NVMe/TCP target: {}", server);
    println!();

    let addr = super::resolve(server).await?;
    let start = Instant::now();

    let mut client = Client::connect(addr, nqn, ClientConfig::default())
        .context("Invalid subsystem NQN")?;
    client
        .login()
        .await
        .context("Failed to log in. Is the target running and the NQN exported?")?;
    println!(
        "Logged in ({:.2}ms)",
        start.elapsed().as_secs_f64() * 1000.0
    );

    let result = report(&client).await;
    client.close().await;
    result
}

async fn report(client: &Client) -> Result<()> {
    let admin = client.admin()?;

    let version = admin
        .get_property(Property::Version, PropertySize::Four)
        .await
        .context("Failed to read VS")?;
    let capabilities = admin
        .get_property(Property::Capabilities, PropertySize::Eight)
        .await
        .context("Failed to read CAP")?;
    admin.enable().await.context("Failed to enable controller")?;
    let status = admin
        .get_property(Property::Status, PropertySize::Four)
        .await
        .context("Failed to read CSTS")?;

    let id = admin
        .identify_controller()
        .await
        .context("Identify Controller failed")?;

    println!();
    println!("Controller");
    println!("{}", "=".repeat(50));
    println!("  Controller ID:   {}", admin.controller_id());
    println!(
        "  NVMe Version:    {}.{}.{}",
        version >> 16,
        (version >> 8) & 0xFF,
        version & 0xFF
    );
    println!("  Max Queue Size:  {}", (capabilities & 0xFFFF) + 1);
    println!("  Status:          {:#x}", status);
    println!("  Model:           {}", id.model_number);
    println!("  Serial:          {}", id.serial_number);
    println!("  Firmware:        {}", id.firmware_revision);
    println!("  Subsystem NQN:   {}", id.subnqn);

    match admin.identify_namespace().await {
        Ok(ns) => {
            println!();
            println!("Namespace 1");
            println!("{}", "=".repeat(50));
            println!("  Blocks:          {}", ns.nsze);
            println!(
                "  Capacity:        {:.2} GiB",
                (ns.nsze * 512) as f64 / (1u64 << 30) as f64
            );
        }
        Err(warp_nvmeof::NvmeOfError::Status(NvmeStatus::InvalidField)) => {
            println!("  (no namespaces)");
        }
        Err(e) => return Err(e).context("Identify Namespace failed"),
    }
    Ok(())
}
