//! discover command - read the discovery log of a target

use anyhow::{Context, Result};
use warp_nvmeof::codec::WireRecord;
use warp_nvmeof::protocol::log_page::{
    DiscoveryLogEntry, DiscoveryLogHeader, DISCOVERY_ENTRY_LEN, DISCOVERY_ENTRY_OFFSET,
};
use warp_nvmeof::protocol::LogPageId;
use warp_nvmeof::{Client, ClientConfig, DISCOVERY_NQN};

/// Execute the discover command
pub async fn execute(server: &str) -> Result<()> {
    let addr = super::resolve(server).await?;
    let mut client = Client::connect(addr, DISCOVERY_NQN, ClientConfig::default())?;
    client
        .login()
        .await
        .context("Failed to connect to the discovery controller")?;

    let result = list(&client).await;
    client.close().await;
    let entries = result?;

    println!("Discovery Log ({} records)", entries.len());
    println!("{}", "=".repeat(50));
    for (i, entry) in entries.iter().enumerate() {
        println!("=====Discovery Log Entry {}======", i);
        println!("trtype:  tcp");
        println!("adrfam:  {}", if entry.adrfam == 2 { "ipv6" } else { "ipv4" });
        println!("subtype: nvme subsystem");
        println!("portid:  {}", entry.port_id);
        println!("trsvcid: {}", entry.trsvcid);
        println!("subnqn:  {}", entry.subnqn);
        println!("traddr:  {}", entry.traddr);
    }
    Ok(())
}

async fn list(client: &Client) -> Result<Vec<DiscoveryLogEntry>> {
    let admin = client.admin()?;
    let page_id = LogPageId::Discovery as u8;

    let header = admin
        .get_log_page(page_id, 0, DISCOVERY_ENTRY_OFFSET)
        .await
        .context("Failed to read discovery log header")?;
    let header = DiscoveryLogHeader::decode(&header)?;
    let count = header.record_count as usize;
    if count == 0 {
        return Ok(Vec::new());
    }

    let page = admin
        .get_log_page(page_id, 0, DISCOVERY_ENTRY_OFFSET + count * DISCOVERY_ENTRY_LEN)
        .await
        .context("Failed to read discovery log entries")?;
    page[DISCOVERY_ENTRY_OFFSET..]
        .chunks_exact(DISCOVERY_ENTRY_LEN)
        .map(|raw| DiscoveryLogEntry::decode(raw).context("Malformed discovery log entry"))
        .collect()
}
