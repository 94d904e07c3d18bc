//! Shared API type definitions
//!
//! This crate contains the wire types shared between the allocation engine and
//! the control plane: the `NodeAllocationState` spec that records advertised
//! capacity and per-claim allocations for one node, and the per-claim device
//! requirements.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Device kind tag for whole GPUs
pub const GPU_DEVICE_TYPE: &str = "gpu";
/// Device kind tag for MIG devices
pub const MIG_DEVICE_TYPE: &str = "mig";

/// Lifecycle status of a NodeAllocationState object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeAllocationStateStatus {
    Ready,
    NotReady,
}

impl std::fmt::Display for NodeAllocationStateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Declarative record of node capacity and claim allocations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationStateSpec {
    /// Devices this node can hand out, aggregated by model or MIG profile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allocatable_devices: Vec<AllocatableDevice>,
    /// Claim UID -> devices currently bound to that claim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claim_allocations: BTreeMap<String, Vec<AllocatedDevice>>,
}

/// One advertised capacity entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocatableDevice {
    Gpu(AllocatableGpu),
    Mig(AllocatableMigDevice),
}

/// Number of whole GPUs of one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatableGpu {
    pub name: String,
    pub count: u32,
}

/// Number of MIG devices of one profile that can be carved on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatableMigDevice {
    pub profile: String,
    pub count: u32,
    /// GPU memory slices taken by one device of this profile
    pub slices: u32,
}

/// One device bound to a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllocatedDevice {
    Gpu(AllocatedGpu),
    Mig(AllocatedMigDevice),
}

impl AllocatedDevice {
    /// UUID of the allocated device
    pub fn uuid(&self) -> &str {
        match self {
            Self::Gpu(gpu) => &gpu.uuid,
            Self::Mig(mig) => &mig.uuid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedGpu {
    pub uuid: String,
    pub name: String,
    pub cdi_device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedMigDevice {
    pub uuid: String,
    pub profile: String,
    pub cdi_device: String,
    pub placement: MigDevicePlacement,
}

/// Where a MIG device sits inside its parent GPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigDevicePlacement {
    #[serde(rename = "gpuUUID")]
    pub gpu_uuid: String,
    pub start: u32,
    pub size: u32,
}

/// What a single claim asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceRequirements {
    /// A number of whole GPUs
    Gpu(GpuClaimSpec),
    /// One MIG device of a given profile
    Mig(MigDeviceClaimSpec),
}

impl DeviceRequirements {
    /// Device kind tag
    pub fn device_type(&self) -> &'static str {
        match self {
            Self::Gpu(_) => GPU_DEVICE_TYPE,
            Self::Mig(_) => MIG_DEVICE_TYPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuClaimSpec {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigDeviceClaimSpec {
    pub profile: String,
}
