//! Seams to the driver and the CDI registry

use super::device::GpuInfo;
use super::error::CdiError;
use super::error::EnumeratorError;
use super::mig::ComputeInstanceInfo;
use super::mig::GpuInstanceInfo;
use super::mig::MigDeviceInfo;
use super::mig::MigPlacement;
use super::mig::MigProfileInfo;

/// A GPU as reported by the driver, with the MIG profiles it can host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratedDevice {
    pub gpu: GpuInfo,
    pub mig_profiles: Vec<MigProfileInfo>,
}

/// Result of physically carving a MIG device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigInstance {
    pub uuid: String,
    pub gpu_instance: GpuInstanceInfo,
    pub compute_instance: ComputeInstanceInfo,
}

/// Discovers GPUs and creates/destroys MIG devices on them.
///
/// All calls are synchronous and may be slow. Callers own retry policy.
pub trait DeviceEnumerator: Send + Sync {
    /// List every GPU on the node with its possible MIG profiles
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, EnumeratorError>;

    /// Carve one MIG device of `profile` on `gpu`
    fn create_mig_device(
        &self,
        gpu: &GpuInfo,
        profile: &MigProfileInfo,
        placement: Option<MigPlacement>,
    ) -> Result<MigInstance, EnumeratorError>;

    /// Tear down a previously carved MIG device
    fn destroy_mig_device(&self, gpu: &GpuInfo, device: &MigDeviceInfo)
        -> Result<(), EnumeratorError>;
}

/// Resolves CDI device names to the qualified names injected into containers
pub trait CdiRegistry: Send + Sync {
    /// Reload all spec sources
    fn refresh(&self) -> Result<(), CdiError>;

    /// Qualified name for `device` (`<kind>=<name>`), if registered
    fn qualified_name(&self, device: &str) -> Option<String>;
}
