//! Named network throttle profiles, applied at aggressive stealth.
//!
//! Each profile caps latency and throughput through CDP network
//! emulation so the traffic shape matches the claimed device/connection.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::EmulateNetworkConditionsParams;

use crate::config::NetworkProfile;

/// (latency ms, download bytes/s, upload bytes/s)
fn conditions(profile: NetworkProfile) -> (f64, f64, f64) {
    match profile {
        NetworkProfile::Slow3g => (400.0, 50_000.0, 20_000.0),
        NetworkProfile::Fast3g => (150.0, 188_000.0, 86_000.0),
        NetworkProfile::FourG => (60.0, 1_500_000.0, 750_000.0),
        NetworkProfile::Wifi => (15.0, 10_000_000.0, 5_000_000.0),
        NetworkProfile::Dsl => (30.0, 2_000_000.0, 500_000.0),
    }
}

/// Apply the named throttle to a page's network stack.
pub async fn apply(page: &Page, profile: NetworkProfile) -> Result<()> {
    let (latency, download, upload) = conditions(profile);

    page.execute(
        EmulateNetworkConditionsParams::builder()
            .offline(false)
            .latency(latency)
            .download_throughput(download)
            .upload_throughput(upload)
            .build()
            .map_err(anyhow::Error::msg)?,
    )
    .await
    .context("network conditions emulation failed")?;

    Ok(())
}
