use anyhow::Context;
use anyhow::Result;
use api_types::NodeAllocationStateSpec;

use crate::config::MigProfileTable;
use crate::config::PrintStateArgs;
use crate::domain::sync::allocatable_devices;
use crate::domain::DeviceCatalog;
use crate::domain::DeviceEnumerator;
use crate::infrastructure::NvmlEnumerator;

/// Enumerate local devices and print the capacity the daemon would publish
pub async fn run_print_state(args: PrintStateArgs) -> Result<()> {
    let profiles = MigProfileTable::load(args.mig_profiles_path.as_deref()).await?;

    let catalog = tokio::task::spawn_blocking(move || -> Result<DeviceCatalog> {
        let enumerator = NvmlEnumerator::new(profiles)?;
        Ok(DeviceCatalog::new(enumerator.enumerate()?)?)
    })
    .await
    .context("device enumeration task failed")??;

    println!("{}", render_capacity(&catalog)?);
    Ok(())
}

fn render_capacity(catalog: &DeviceCatalog) -> Result<String> {
    let spec = NodeAllocationStateSpec {
        allocatable_devices: allocatable_devices(catalog),
        ..Default::default()
    };
    serde_json::to_string_pretty(&spec).context("failed to serialize capacity")
}
