//! Provision a throwaway server, report its state and URL, then remove it.
//!
//! Creates real resources. Requires `HCLOUD_TOKEN` (a `.env` file works);
//! `HCLOUD_IMAGE`, `HCLOUD_TYPE` and `HCLOUD_LOCATION` are honored too.

use machine_core::{Driver, DriverOptions};

use hcloud_driver::HcloudDriver;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut driver = HcloudDriver::new("hcloud-driver-demo", "/tmp/hcloud-driver-demo");
    driver
        .configure(&DriverOptions::new())
        .expect("configuration failed (is HCLOUD_TOKEN set?)");

    driver.create().await.expect("create failed");
    let state = driver.state().await.expect("state query failed");
    let url = driver.url().await.expect("url query failed");
    tracing::info!(server_id = ?driver.server_id(), %state, %url, "machine is up");

    driver.remove().await.expect("remove failed");
    tracing::info!("machine removed");
}
