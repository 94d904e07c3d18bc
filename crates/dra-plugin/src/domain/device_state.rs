//! Device state engine
//!
//! [`DeviceState`] owns the device catalog, the availability pool and the claim
//! allocation table. A single mutex guards the pool and the table, and every
//! public operation holds it for its whole duration, including the driver and
//! CDI calls it makes. The pool is an immutable snapshot that is rebuilt and
//! swapped on each change, so a reader holding an older `Arc` never observes a
//! half-applied update.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use api_types::DeviceRequirements;
use api_types::NodeAllocationStateSpec;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::device::AllocatedDevice;
use super::device::AllocatedDevices;
use super::device::ClaimAllocations;
use super::device::DeviceCatalog;
use super::error::DeviceStateError;
use super::error::EnumeratorError;
use super::error::Result;
use super::mig::MigDeviceInfo;
use super::pool::UnallocatedDevices;
use super::sync;
use super::traits::CdiRegistry;
use super::traits::DeviceEnumerator;

pub(crate) struct AllocationState {
    pub(crate) available: Arc<UnallocatedDevices>,
    pub(crate) allocated: ClaimAllocations,
}

/// Node-local GPU and MIG allocation engine
pub struct DeviceState<E, R> {
    enumerator: E,
    cdi: R,
    catalog: DeviceCatalog,
    inner: Mutex<AllocationState>,
}

impl<E, R> DeviceState<E, R>
where
    E: DeviceEnumerator,
    R: CdiRegistry,
{
    /// Enumerate devices, refresh the CDI registry and restore the allocations
    /// recorded in `spec`.
    ///
    /// Devices recorded as allocated are taken out of the pool before the
    /// engine is returned, so a restarted plugin never hands them out twice.
    pub fn new(enumerator: E, cdi: R, spec: &NodeAllocationStateSpec) -> Result<Self> {
        let enumerated = enumerator
            .enumerate()
            .map_err(DeviceStateError::EnumerationFailed)?;
        let catalog = DeviceCatalog::new(enumerated)?;

        cdi.refresh().map_err(DeviceStateError::CdiRefreshFailed)?;

        let (allocated, available) = sync::sync_allocated_from_spec(&catalog, spec)?;

        info!(
            gpus = catalog.len(),
            restored_claims = allocated.len(),
            "Device state initialized"
        );

        Ok(Self {
            enumerator,
            cdi,
            catalog,
            inner: Mutex::new(AllocationState {
                available: Arc::new(available),
                allocated,
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AllocationState> {
        self.inner.lock().expect("device state lock poisoned")
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Current availability pool snapshot
    pub fn available(&self) -> Arc<UnallocatedDevices> {
        self.lock().available.clone()
    }

    /// Copy of the claim allocation table
    pub fn allocations(&self) -> ClaimAllocations {
        self.lock().allocated.clone()
    }

    /// Bind devices matching `requirements` to `claim_uid` and return their
    /// qualified CDI names.
    ///
    /// A claim that already holds an allocation gets that allocation back and
    /// `requirements` is not looked at.
    pub fn allocate(
        &self,
        claim_uid: &str,
        requirements: &DeviceRequirements,
    ) -> Result<Vec<String>> {
        let mut state = self.lock();

        if let Some(devices) = state.allocated.get(claim_uid) {
            debug!(claim_uid = %claim_uid, "Claim already allocated");
            return self.qualified_names(devices);
        }

        let devices = match requirements {
            DeviceRequirements::Gpu(spec) => self.allocate_gpus(&state, spec.count)?,
            DeviceRequirements::Mig(spec) => self.allocate_mig_device(&state, &spec.profile)?,
        };

        Self::remove_from_available(&mut state, &devices)?;

        info!(
            claim_uid = %claim_uid,
            kind = requirements.device_type(),
            devices = ?devices.keys().collect::<Vec<_>>(),
            "Allocated devices to claim"
        );

        let names = self.qualified_names(&devices);
        state.allocated.insert(claim_uid.to_string(), devices);
        names
    }

    /// Release every device bound to `claim_uid`. Unknown claims are a no-op.
    ///
    /// MIG devices are destroyed one by one in UUID order. If a destroy fails
    /// the call stops there: devices handled before the failure go back to the
    /// pool and leave the claim, while the failing device and everything after
    /// it stay bound, so a retried free picks up where this one stopped.
    pub fn free(&self, claim_uid: &str) -> Result<()> {
        let mut state = self.lock();

        let Some(devices) = state.allocated.get(claim_uid).cloned() else {
            debug!(claim_uid = %claim_uid, "No allocation to free");
            return Ok(());
        };

        let mut released = AllocatedDevices::new();
        let mut failure = None;
        for (uuid, device) in devices {
            if let AllocatedDevice::Mig(mig) = &device {
                if let Err(e) = self.free_mig_device(mig) {
                    failure = Some((uuid, e));
                    break;
                }
            }
            released.insert(uuid, device);
        }

        Self::add_to_available(&mut state, &released)?;

        let Some((device_uuid, source)) = failure else {
            state.allocated.remove(claim_uid);
            info!(claim_uid = %claim_uid, "Freed claim");
            return Ok(());
        };

        if let Some(remaining) = state.allocated.get_mut(claim_uid) {
            remaining.retain(|uuid, _| !released.contains_key(uuid));
        }
        warn!(
            claim_uid = %claim_uid,
            device_uuid = %device_uuid,
            released = released.len(),
            "Free stopped at failed MIG teardown"
        );

        Err(DeviceStateError::DestroyFailed {
            claim_uid: claim_uid.to_string(),
            device_uuid,
            released: released.into_keys().collect(),
            source,
        })
    }

    /// Install a pool snapshot with `devices` taken out
    fn remove_from_available(state: &mut AllocationState, devices: &AllocatedDevices) -> Result<()> {
        state.available = Arc::new(state.available.removing(devices)?);
        Ok(())
    }

    /// Install a pool snapshot with `devices` given back
    fn add_to_available(state: &mut AllocationState, devices: &AllocatedDevices) -> Result<()> {
        state.available = Arc::new(state.available.adding(devices)?);
        Ok(())
    }

    fn allocate_gpus(&self, state: &AllocationState, count: u32) -> Result<AllocatedDevices> {
        if count == 0 {
            return Err(DeviceStateError::InvalidRequirements {
                message: "GPU count must be at least 1".to_string(),
            });
        }

        let available: Vec<_> = state
            .available
            .iter()
            .filter(|d| !self.catalog.gpu(d.gpu).mig_enabled)
            .map(|d| d.gpu)
            .collect();

        if available.len() < count as usize {
            return Err(DeviceStateError::InsufficientCapacity {
                available: available.len(),
                requested: count,
            });
        }

        Ok(available
            .into_iter()
            .take(count as usize)
            .map(|gpu| {
                (
                    self.catalog.gpu(gpu).uuid.clone(),
                    AllocatedDevice::Gpu(gpu),
                )
            })
            .collect())
    }

    fn allocate_mig_device(
        &self,
        state: &AllocationState,
        profile: &str,
    ) -> Result<AllocatedDevices> {
        let candidate = state
            .available
            .iter()
            .filter(|d| self.catalog.gpu(d.gpu).mig_enabled)
            .find_map(|d| {
                d.mig_profiles
                    .get(profile)
                    .filter(|info| info.count > 0)
                    .map(|info| (d.gpu, info))
            });

        let Some((parent, info)) = candidate else {
            return Err(DeviceStateError::ProfileUnavailable {
                profile: profile.to_string(),
            });
        };

        let instance = self
            .enumerator
            .create_mig_device(self.catalog.gpu(parent), info, None)
            .map_err(DeviceStateError::CreateFailed)?;

        let mig = MigDeviceInfo {
            uuid: instance.uuid,
            parent,
            profile: info.profile,
            gpu_instance: instance.gpu_instance,
            compute_instance: instance.compute_instance,
        };

        let mut devices = AllocatedDevices::new();
        devices.insert(mig.uuid.clone(), AllocatedDevice::Mig(mig));
        Ok(devices)
    }

    fn free_mig_device(&self, mig: &MigDeviceInfo) -> std::result::Result<(), EnumeratorError> {
        self.enumerator
            .destroy_mig_device(self.catalog.gpu(mig.parent), mig)
    }

    fn qualified_names(&self, devices: &AllocatedDevices) -> Result<Vec<String>> {
        devices
            .values()
            .map(|device| {
                let cdi_device = self.catalog.cdi_device(device);
                self.cdi
                    .qualified_name(&cdi_device)
                    .ok_or(DeviceStateError::UnknownDeviceInRegistry { cdi_device })
            })
            .collect()
    }
}
