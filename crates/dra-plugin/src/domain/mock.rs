//! Test fakes for the driver and CDI seams

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use super::device::GpuIndex;
use super::device::GpuInfo;
use super::error::CdiError;
use super::error::EnumeratorError;
use super::mig::ComputeInstanceInfo;
use super::mig::GpuInstanceInfo;
use super::mig::MigDeviceInfo;
use super::mig::MigPlacement;
use super::mig::MigProfile;
use super::mig::MigProfileInfo;
use super::traits::CdiRegistry;
use super::traits::DeviceEnumerator;
use super::traits::EnumeratedDevice;
use super::traits::MigInstance;

/// A whole GPU named "NVIDIA A10"
pub fn gpu(uuid: &str, minor: u32) -> EnumeratedDevice {
    named_gpu(uuid, minor, "NVIDIA A10")
}

pub fn named_gpu(uuid: &str, minor: u32, name: &str) -> EnumeratedDevice {
    EnumeratedDevice {
        gpu: GpuInfo {
            uuid: uuid.to_string(),
            name: name.to_string(),
            minor,
            mig_enabled: false,
        },
        mig_profiles: vec![],
    }
}

/// A MIG-enabled GPU exposing `profiles` with the given counts
pub fn mig_gpu(uuid: &str, minor: u32, profiles: &[(MigProfile, u32)]) -> EnumeratedDevice {
    EnumeratedDevice {
        gpu: GpuInfo {
            uuid: uuid.to_string(),
            name: "NVIDIA A100-SXM4-40GB".to_string(),
            minor,
            mig_enabled: true,
        },
        mig_profiles: profiles
            .iter()
            .map(|(profile, count)| MigProfileInfo {
                profile: *profile,
                count: *count,
                placements: vec![],
            })
            .collect(),
    }
}

pub fn mig_device(uuid: &str, parent: GpuIndex, profile: MigProfile) -> MigDeviceInfo {
    MigDeviceInfo {
        uuid: uuid.to_string(),
        parent,
        profile,
        gpu_instance: GpuInstanceInfo {
            id: 0,
            placement: MigPlacement {
                start: 0,
                size: profile.g,
            },
        },
        compute_instance: ComputeInstanceInfo { id: 0 },
    }
}

#[derive(Debug, Default)]
struct FakeEnumeratorState {
    fail_enumerate: bool,
    fail_create: bool,
    fail_destroy: HashSet<String>,
    next_gpu_instance: u32,
    created: usize,
    destroyed: usize,
}

/// In-memory enumerator. Clones share state so a test can keep a handle after
/// moving one into the engine.
#[derive(Debug, Clone)]
pub struct FakeEnumerator {
    devices: Vec<EnumeratedDevice>,
    state: Arc<Mutex<FakeEnumeratorState>>,
}

impl FakeEnumerator {
    pub fn new(devices: Vec<EnumeratedDevice>) -> Self {
        Self {
            devices,
            state: Arc::new(Mutex::new(FakeEnumeratorState {
                next_gpu_instance: 1,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeEnumeratorState> {
        self.state.lock().expect("poisoned")
    }

    pub fn fail_enumerate(&self, fail: bool) {
        self.state().fail_enumerate = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    pub fn fail_destroy(&self, uuid: &str) {
        self.state().fail_destroy.insert(uuid.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_enumerate = false;
        state.fail_create = false;
        state.fail_destroy.clear();
    }

    pub fn created(&self) -> usize {
        self.state().created
    }

    pub fn destroyed(&self) -> usize {
        self.state().destroyed
    }
}

impl DeviceEnumerator for FakeEnumerator {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, EnumeratorError> {
        if self.state().fail_enumerate {
            return Err(EnumeratorError::Enumeration {
                message: "driver not loaded".to_string(),
            });
        }
        Ok(self.devices.clone())
    }

    fn create_mig_device(
        &self,
        gpu: &GpuInfo,
        profile: &MigProfileInfo,
        placement: Option<MigPlacement>,
    ) -> Result<MigInstance, EnumeratorError> {
        let mut state = self.state();
        if state.fail_create {
            return Err(EnumeratorError::Create {
                gpu_uuid: gpu.uuid.clone(),
                profile: profile.profile.to_string(),
                message: "insufficient resources".to_string(),
            });
        }

        let gi = state.next_gpu_instance;
        state.next_gpu_instance += 1;
        state.created += 1;

        let placement = placement
            .or_else(|| profile.placements.first().copied())
            .unwrap_or(MigPlacement {
                start: 0,
                size: profile.profile.g,
            });

        Ok(MigInstance {
            uuid: format!("MIG-{}/{gi}/0", gpu.uuid),
            gpu_instance: GpuInstanceInfo { id: gi, placement },
            compute_instance: ComputeInstanceInfo { id: 0 },
        })
    }

    fn destroy_mig_device(
        &self,
        _gpu: &GpuInfo,
        device: &MigDeviceInfo,
    ) -> Result<(), EnumeratorError> {
        let mut state = self.state();
        if state.fail_destroy.contains(&device.uuid) {
            return Err(EnumeratorError::Destroy {
                uuid: device.uuid.clone(),
                message: "in use by another client".to_string(),
            });
        }
        state.destroyed += 1;
        Ok(())
    }
}

/// Registry that knows every device except the ones explicitly unregistered
#[derive(Debug, Clone, Default)]
pub struct FakeCdiRegistry {
    missing: Arc<Mutex<HashSet<String>>>,
}

impl FakeCdiRegistry {
    pub fn unregister(&self, device: &str) {
        self.missing
            .lock()
            .expect("poisoned")
            .insert(device.to_string());
    }
}

impl CdiRegistry for FakeCdiRegistry {
    fn refresh(&self) -> Result<(), CdiError> {
        Ok(())
    }

    fn qualified_name(&self, device: &str) -> Option<String> {
        if self.missing.lock().expect("poisoned").contains(device) {
            return None;
        }
        Some(device.to_string())
    }
}
