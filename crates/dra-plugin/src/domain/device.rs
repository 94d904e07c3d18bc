//! Device catalog and allocated device types

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

use super::error::DeviceStateError;
use super::mig::MigDeviceInfo;
use super::pool::UnallocatedDevice;
use super::pool::UnallocatedDevices;
use super::traits::EnumeratedDevice;

/// CDI kind under which all devices of this plugin are registered
pub const CDI_KIND: &str = "nvidia.com/gpu";

/// Position of a GPU in the [`DeviceCatalog`].
///
/// Only the catalog hands these out, so an index always resolves for the
/// lifetime of the catalog that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuIndex(usize);

/// Static identity of a physical GPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub uuid: String,
    /// Model name, e.g. "NVIDIA A100-SXM4-40GB"
    pub name: String,
    /// Node-local minor number (`/dev/nvidia<minor>`)
    pub minor: u32,
    pub mig_enabled: bool,
}

impl GpuInfo {
    /// CDI device name, e.g. `nvidia.com/gpu=gpu0`
    pub fn cdi_device(&self) -> String {
        format!("{CDI_KIND}=gpu{}", self.minor)
    }
}

/// A device bound to a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatedDevice {
    Gpu(GpuIndex),
    Mig(MigDeviceInfo),
}

/// Devices bound to one claim, keyed by device UUID
pub type AllocatedDevices = BTreeMap<String, AllocatedDevice>;

/// Claim UID -> devices bound to that claim
pub type ClaimAllocations = HashMap<String, AllocatedDevices>;

/// Everything the node has, as enumerated at startup. Never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    gpus: Vec<GpuInfo>,
    devices: UnallocatedDevices,
}

impl DeviceCatalog {
    /// Build the catalog from enumerator output.
    ///
    /// Profiles reported for GPUs that are not MIG-enabled are dropped.
    pub fn new(enumerated: Vec<EnumeratedDevice>) -> Result<Self, DeviceStateError> {
        let mut seen = HashSet::new();
        let mut gpus = Vec::with_capacity(enumerated.len());
        let mut devices = Vec::with_capacity(enumerated.len());

        for (i, device) in enumerated.into_iter().enumerate() {
            if !seen.insert(device.gpu.uuid.clone()) {
                return Err(DeviceStateError::DuplicateDevice {
                    uuid: device.gpu.uuid,
                });
            }

            let mig_profiles = if device.gpu.mig_enabled {
                device
                    .mig_profiles
                    .into_iter()
                    .map(|info| (info.profile.to_string(), info))
                    .collect()
            } else {
                BTreeMap::new()
            };

            devices.push(UnallocatedDevice {
                gpu: GpuIndex(i),
                mig_profiles,
            });
            gpus.push(device.gpu);
        }

        Ok(Self {
            gpus,
            devices: UnallocatedDevices::from(devices),
        })
    }

    /// Look up a GPU by catalog index
    pub fn gpu(&self, index: GpuIndex) -> &GpuInfo {
        &self.gpus[index.0]
    }

    /// Find the catalog index of a GPU by UUID
    pub fn find(&self, uuid: &str) -> Option<GpuIndex> {
        self.gpus.iter().position(|g| g.uuid == uuid).map(GpuIndex)
    }

    /// Full capacity: every GPU with its initial MIG profile counts
    pub fn devices(&self) -> &UnallocatedDevices {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.gpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gpus.is_empty()
    }

    /// CDI device name for an allocated device
    pub fn cdi_device(&self, device: &AllocatedDevice) -> String {
        match device {
            AllocatedDevice::Gpu(index) => self.gpu(*index).cdi_device(),
            AllocatedDevice::Mig(mig) => mig.cdi_device(self.gpu(mig.parent)),
        }
    }
}
