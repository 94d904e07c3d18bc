//! Availability pool snapshots
//!
//! A pool snapshot is never edited in place. [`UnallocatedDevices::removing`]
//! and [`UnallocatedDevices::adding`] build a new snapshot from the current one
//! and a set of allocated devices; the engine installs the result under its lock.

use std::collections::BTreeMap;

use thiserror::Error;

use super::device::AllocatedDevice;
use super::device::AllocatedDevices;
use super::device::GpuIndex;
use super::mig::MigProfileInfo;

/// A GPU that is not bound to any claim.
///
/// MIG-enabled GPUs stay in the pool for their whole life; carving and freeing
/// instances only moves the per-profile counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnallocatedDevice {
    pub gpu: GpuIndex,
    /// Profile name -> remaining capacity for that profile
    pub mig_profiles: BTreeMap<String, MigProfileInfo>,
}

/// Errors raised when a delta cannot be applied to a pool snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("GPU {gpu:?} is not in the available pool")]
    GpuNotAvailable { gpu: GpuIndex },

    #[error("no MIG-enabled parent {gpu:?} in the available pool")]
    ParentNotAvailable { gpu: GpuIndex },

    #[error("GPU {gpu:?} has no remaining capacity for MIG profile {profile}")]
    ProfileExhausted { gpu: GpuIndex, profile: String },
}

/// Ordered snapshot of the availability pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnallocatedDevices(Vec<UnallocatedDevice>);

impl From<Vec<UnallocatedDevice>> for UnallocatedDevices {
    fn from(devices: Vec<UnallocatedDevice>) -> Self {
        Self(devices)
    }
}

impl UnallocatedDevices {
    pub fn iter(&self) -> impl Iterator<Item = &UnallocatedDevice> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, gpu: GpuIndex) -> bool {
        self.0.iter().any(|d| d.gpu == gpu)
    }

    /// Remaining count of `profile` on `gpu`, if the GPU is pooled and exposes it
    pub fn profile_count(&self, gpu: GpuIndex, profile: &str) -> Option<u32> {
        self.0
            .iter()
            .find(|d| d.gpu == gpu)
            .and_then(|d| d.mig_profiles.get(profile))
            .map(|info| info.count)
    }

    /// New snapshot with `devices` taken out.
    ///
    /// Whole GPUs are dropped from the pool; MIG devices decrement their
    /// parent's remaining count. Fails without producing a snapshot if any
    /// device cannot be taken.
    pub fn removing(&self, devices: &AllocatedDevices) -> Result<Self, PoolError> {
        let mut next = self.0.clone();

        for device in devices.values() {
            match device {
                AllocatedDevice::Gpu(gpu) => {
                    let pos = next
                        .iter()
                        .position(|d| d.gpu == *gpu)
                        .ok_or(PoolError::GpuNotAvailable { gpu: *gpu })?;
                    next.remove(pos);
                }
                AllocatedDevice::Mig(mig) => {
                    let profile = mig.profile.to_string();
                    let parent = next
                        .iter_mut()
                        .find(|d| d.gpu == mig.parent)
                        .ok_or(PoolError::ParentNotAvailable { gpu: mig.parent })?;
                    let info = parent
                        .mig_profiles
                        .get_mut(&profile)
                        .filter(|info| info.count > 0)
                        .ok_or_else(|| PoolError::ProfileExhausted {
                            gpu: mig.parent,
                            profile: profile.clone(),
                        })?;
                    info.count -= 1;
                }
            }
        }

        Ok(Self(next))
    }

    /// New snapshot with `devices` given back.
    ///
    /// Whole GPUs are appended in device order; MIG devices increment their
    /// parent's remaining count.
    pub fn adding(&self, devices: &AllocatedDevices) -> Result<Self, PoolError> {
        let mut next = self.0.clone();

        for device in devices.values() {
            match device {
                AllocatedDevice::Gpu(gpu) => next.push(UnallocatedDevice {
                    gpu: *gpu,
                    mig_profiles: BTreeMap::new(),
                }),
                AllocatedDevice::Mig(mig) => {
                    let profile = mig.profile.to_string();
                    let info = next
                        .iter_mut()
                        .find(|d| d.gpu == mig.parent)
                        .and_then(|d| d.mig_profiles.get_mut(&profile))
                        .ok_or(PoolError::ParentNotAvailable { gpu: mig.parent })?;
                    info.count += 1;
                }
            }
        }

        Ok(Self(next))
    }
}
