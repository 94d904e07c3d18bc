//! Translation between engine state and the NodeAllocationState spec

use std::collections::BTreeMap;
use std::collections::HashSet;

use api_types::AllocatableDevice;
use api_types::AllocatableGpu;
use api_types::AllocatableMigDevice;
use api_types::AllocatedGpu;
use api_types::AllocatedMigDevice;
use api_types::MigDevicePlacement;
use api_types::NodeAllocationStateSpec;
use tracing::debug;
use tracing::warn;

use super::device::AllocatedDevice;
use super::device::AllocatedDevices;
use super::device::ClaimAllocations;
use super::device::DeviceCatalog;
use super::device_state::DeviceState;
use super::error::DeviceStateError;
use super::error::Result;
use super::mig::ComputeInstanceInfo;
use super::mig::GpuInstanceInfo;
use super::mig::MigCdiName;
use super::mig::MigDeviceInfo;
use super::mig::MigPlacement;
use super::mig::MigProfile;
use super::pool::UnallocatedDevices;
use super::traits::CdiRegistry;
use super::traits::DeviceEnumerator;

impl<E, R> DeviceState<E, R>
where
    E: DeviceEnumerator,
    R: CdiRegistry,
{
    /// Copy of `spec` with capacity and allocations replaced by the current state
    pub fn updated_spec(&self, spec: &NodeAllocationStateSpec) -> NodeAllocationStateSpec {
        let state = self.lock();

        let mut out = spec.clone();
        out.allocatable_devices = allocatable_devices(self.catalog());
        out.claim_allocations = claim_allocations(self.catalog(), &state.allocated);
        out
    }

    /// Publish the node's allocatable capacity into `spec`
    pub fn sync_all_devices_to_spec(&self, spec: &mut NodeAllocationStateSpec) {
        let _state = self.lock();
        spec.allocatable_devices = allocatable_devices(self.catalog());
    }

    /// Publish the current claim allocations into `spec`
    pub fn sync_allocated_to_spec(&self, spec: &mut NodeAllocationStateSpec) {
        let state = self.lock();
        spec.claim_allocations = claim_allocations(self.catalog(), &state.allocated);
    }
}

/// Aggregate the catalog into per-model GPU counts and per-profile MIG counts.
///
/// Entries with a zero count are left out. GPU entries come first, sorted by
/// model name, followed by MIG entries sorted by profile.
pub fn allocatable_devices(catalog: &DeviceCatalog) -> Vec<AllocatableDevice> {
    let mut gpus: BTreeMap<&str, u32> = BTreeMap::new();
    let mut migs: BTreeMap<&str, (u32, u32)> = BTreeMap::new();

    for device in catalog.devices().iter() {
        let gpu = catalog.gpu(device.gpu);
        let count = gpus.entry(gpu.name.as_str()).or_default();
        if !gpu.mig_enabled {
            *count += 1;
            continue;
        }

        for (name, info) in &device.mig_profiles {
            let (count, _) = migs.entry(name.as_str()).or_insert((0, info.profile.g));
            *count += info.count;
        }
    }

    let gpus = gpus
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| {
            AllocatableDevice::Gpu(AllocatableGpu {
                name: name.to_string(),
                count,
            })
        });
    let migs = migs
        .into_iter()
        .filter(|(_, (count, _))| *count > 0)
        .map(|(profile, (count, slices))| {
            AllocatableDevice::Mig(AllocatableMigDevice {
                profile: profile.to_string(),
                count,
                slices,
            })
        });

    gpus.chain(migs).collect()
}

/// One spec record per device bound to each claim
pub(crate) fn claim_allocations(
    catalog: &DeviceCatalog,
    allocated: &ClaimAllocations,
) -> BTreeMap<String, Vec<api_types::AllocatedDevice>> {
    allocated
        .iter()
        .map(|(claim_uid, devices)| {
            let records = devices
                .iter()
                .map(|(uuid, device)| allocated_record(catalog, uuid, device))
                .collect();
            (claim_uid.clone(), records)
        })
        .collect()
}

fn allocated_record(
    catalog: &DeviceCatalog,
    uuid: &str,
    device: &AllocatedDevice,
) -> api_types::AllocatedDevice {
    match device {
        AllocatedDevice::Gpu(index) => {
            let gpu = catalog.gpu(*index);
            api_types::AllocatedDevice::Gpu(AllocatedGpu {
                uuid: uuid.to_string(),
                name: gpu.name.clone(),
                cdi_device: gpu.cdi_device(),
            })
        }
        AllocatedDevice::Mig(mig) => {
            let parent = catalog.gpu(mig.parent);
            api_types::AllocatedDevice::Mig(AllocatedMigDevice {
                uuid: uuid.to_string(),
                profile: mig.profile.to_string(),
                cdi_device: mig.cdi_device(parent),
                placement: MigDevicePlacement {
                    gpu_uuid: parent.uuid.clone(),
                    start: mig.gpu_instance.placement.start,
                    size: mig.gpu_instance.placement.size,
                },
            })
        }
    }
}

/// Rebuild the allocation table from `spec` and take those devices out of a
/// fresh copy of the catalog's pool.
///
/// Every recorded device must resolve against the catalog and fit in the pool;
/// anything else means the record and the node disagree and is reported as
/// [`DeviceStateError::RecordInconsistent`].
pub(crate) fn sync_allocated_from_spec(
    catalog: &DeviceCatalog,
    spec: &NodeAllocationStateSpec,
) -> Result<(ClaimAllocations, UnallocatedDevices)> {
    let mut allocated = ClaimAllocations::new();
    let mut available = catalog.devices().clone();
    let mut seen = HashSet::new();

    for (claim_uid, records) in &spec.claim_allocations {
        if records.is_empty() {
            warn!(claim_uid = %claim_uid, "Skipping claim with no recorded devices");
            continue;
        }

        let inconsistent = |message: String| DeviceStateError::RecordInconsistent {
            claim_uid: claim_uid.clone(),
            message,
        };

        let mut devices = AllocatedDevices::new();
        for record in records {
            if !seen.insert(record.uuid().to_string()) {
                return Err(inconsistent(format!(
                    "device {} is recorded more than once",
                    record.uuid()
                )));
            }
            let device = device_from_record(catalog, record).map_err(inconsistent)?;
            devices.insert(record.uuid().to_string(), device);
        }

        available = available
            .removing(&devices)
            .map_err(|e| inconsistent(e.to_string()))?;

        debug!(claim_uid = %claim_uid, devices = devices.len(), "Restored claim allocation");
        allocated.insert(claim_uid.clone(), devices);
    }

    Ok((allocated, available))
}

fn device_from_record(
    catalog: &DeviceCatalog,
    record: &api_types::AllocatedDevice,
) -> std::result::Result<AllocatedDevice, String> {
    match record {
        api_types::AllocatedDevice::Gpu(gpu) => {
            let index = catalog
                .find(&gpu.uuid)
                .ok_or_else(|| format!("GPU {} is not present on this node", gpu.uuid))?;
            let info = catalog.gpu(index);
            if info.mig_enabled {
                return Err(format!(
                    "GPU {} is MIG-enabled and cannot be allocated whole",
                    gpu.uuid
                ));
            }
            if gpu.cdi_device != info.cdi_device() {
                return Err(format!(
                    "GPU {} is recorded as {} but is {} on this node",
                    gpu.uuid,
                    gpu.cdi_device,
                    info.cdi_device()
                ));
            }
            Ok(AllocatedDevice::Gpu(index))
        }
        api_types::AllocatedDevice::Mig(mig) => {
            let parent = catalog.find(&mig.placement.gpu_uuid).ok_or_else(|| {
                format!(
                    "parent GPU {} of MIG device {} is not present on this node",
                    mig.placement.gpu_uuid, mig.uuid
                )
            })?;
            let parent_info = catalog.gpu(parent);
            if !parent_info.mig_enabled {
                return Err(format!(
                    "parent GPU {} of MIG device {} is not MIG-enabled",
                    parent_info.uuid, mig.uuid
                ));
            }

            let profile: MigProfile = mig.profile.parse().map_err(|e| format!("{e}"))?;
            let name = MigCdiName::parse(&mig.cdi_device).ok_or_else(|| {
                format!(
                    "MIG device {} has malformed CDI device {}",
                    mig.uuid, mig.cdi_device
                )
            })?;
            if name.minor != parent_info.minor {
                return Err(format!(
                    "MIG device {} names GPU minor {} but its parent has minor {}",
                    mig.uuid, name.minor, parent_info.minor
                ));
            }

            Ok(AllocatedDevice::Mig(MigDeviceInfo {
                uuid: mig.uuid.clone(),
                parent,
                profile,
                gpu_instance: GpuInstanceInfo {
                    id: name.gpu_instance_id,
                    placement: MigPlacement {
                        start: mig.placement.start,
                        size: mig.placement.size,
                    },
                },
                compute_instance: ComputeInstanceInfo {
                    id: name.compute_instance_id,
                },
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use api_types::DeviceRequirements;
    use api_types::GpuClaimSpec;
    use api_types::MigDeviceClaimSpec;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::domain::mock::gpu;
    use crate::domain::mock::mig_gpu;
    use crate::domain::mock::named_gpu;
    use crate::domain::mock::FakeCdiRegistry;
    use crate::domain::mock::FakeEnumerator;

    fn mixed_node() -> FakeEnumerator {
        FakeEnumerator::new(vec![
            named_gpu("g1", 0, "A10"),
            named_gpu("g2", 1, "A10"),
            named_gpu("g3", 2, "T4"),
            mig_gpu(
                "m1",
                3,
                &[(MigProfile::new(1, 1, 5), 7), (MigProfile::new(3, 3, 20), 2)],
            ),
            mig_gpu("m2", 4, &[(MigProfile::new(1, 1, 5), 7)]),
        ])
    }

    fn state_from(
        enumerator: FakeEnumerator,
        spec: &NodeAllocationStateSpec,
    ) -> Result<DeviceState<FakeEnumerator, FakeCdiRegistry>> {
        DeviceState::new(enumerator, FakeCdiRegistry::default(), spec)
    }

    #[test]
    fn capacity_is_aggregated_by_model_and_profile() {
        let state =
            state_from(mixed_node(), &NodeAllocationStateSpec::default()).expect("device state");

        let mut spec = NodeAllocationStateSpec::default();
        state.sync_all_devices_to_spec(&mut spec);

        assert_eq!(
            spec.allocatable_devices,
            vec![
                AllocatableDevice::Gpu(AllocatableGpu {
                    name: "A10".to_string(),
                    count: 2
                }),
                AllocatableDevice::Gpu(AllocatableGpu {
                    name: "T4".to_string(),
                    count: 1
                }),
                AllocatableDevice::Mig(AllocatableMigDevice {
                    profile: "1g.5gb".to_string(),
                    count: 14,
                    slices: 1
                }),
                AllocatableDevice::Mig(AllocatableMigDevice {
                    profile: "3g.20gb".to_string(),
                    count: 2,
                    slices: 3
                }),
            ]
        );
    }

    #[test]
    fn capacity_ignores_current_allocations() {
        let state =
            state_from(mixed_node(), &NodeAllocationStateSpec::default()).expect("device state");
        let before = state.updated_spec(&NodeAllocationStateSpec::default());

        state
            .allocate("c", &DeviceRequirements::Gpu(GpuClaimSpec { count: 2 }))
            .expect("allocate");
        let after = state.updated_spec(&NodeAllocationStateSpec::default());

        assert_eq!(before.allocatable_devices, after.allocatable_devices);
    }

    #[test]
    fn allocations_are_published_per_device() {
        let state =
            state_from(mixed_node(), &NodeAllocationStateSpec::default()).expect("device state");
        state
            .allocate("gpu-claim", &DeviceRequirements::Gpu(GpuClaimSpec { count: 1 }))
            .expect("gpu allocate");
        state
            .allocate(
                "mig-claim",
                &DeviceRequirements::Mig(MigDeviceClaimSpec {
                    profile: "3g.20gb".to_string(),
                }),
            )
            .expect("mig allocate");

        let mut spec = NodeAllocationStateSpec::default();
        state.sync_allocated_to_spec(&mut spec);

        assert_eq!(
            spec.claim_allocations["gpu-claim"],
            vec![api_types::AllocatedDevice::Gpu(AllocatedGpu {
                uuid: "g1".to_string(),
                name: "A10".to_string(),
                cdi_device: "nvidia.com/gpu=gpu0".to_string(),
            })]
        );

        let records = &spec.claim_allocations["mig-claim"];
        assert_eq!(records.len(), 1);
        let api_types::AllocatedDevice::Mig(mig) = &records[0] else {
            panic!("expected a MIG record, got {records:?}");
        };
        assert_eq!(mig.profile, "3g.20gb");
        assert_eq!(mig.cdi_device, "nvidia.com/gpu=mig-gpu3-gi1-ci0");
        assert_eq!(mig.placement.gpu_uuid, "m1");
        assert_eq!(mig.placement.size, 3);
    }

    #[test]
    fn restart_restores_allocations_and_pool() {
        let enumerator = mixed_node();
        let state = state_from(enumerator.clone(), &NodeAllocationStateSpec::default())
            .expect("device state");
        let gpu_names = state
            .allocate("gpu-claim", &DeviceRequirements::Gpu(GpuClaimSpec { count: 2 }))
            .expect("gpu allocate");
        let mig_names = state
            .allocate(
                "mig-claim",
                &DeviceRequirements::Mig(MigDeviceClaimSpec {
                    profile: "1g.5gb".to_string(),
                }),
            )
            .expect("mig allocate");
        let persisted = state.updated_spec(&NodeAllocationStateSpec::default());

        let restarted = state_from(enumerator, &persisted).expect("restarted device state");

        assert_eq!(restarted.allocations(), state.allocations());
        assert_eq!(*restarted.available(), *state.available());
        assert_eq!(
            restarted.updated_spec(&NodeAllocationStateSpec::default()),
            persisted
        );

        let again = restarted
            .allocate("gpu-claim", &DeviceRequirements::Gpu(GpuClaimSpec { count: 1 }))
            .expect("idempotent after restart");
        assert_eq!(again, gpu_names);
        let again = restarted
            .allocate(
                "mig-claim",
                &DeviceRequirements::Mig(MigDeviceClaimSpec {
                    profile: "1g.5gb".to_string(),
                }),
            )
            .expect("idempotent after restart");
        assert_eq!(again, mig_names);

        let err = restarted
            .allocate("other", &DeviceRequirements::Gpu(GpuClaimSpec { count: 2 }))
            .unwrap_err();
        assert!(
            matches!(err, DeviceStateError::InsufficientCapacity { available: 1, .. }),
            "restored GPUs must not be offered again: {err:?}"
        );
    }

    #[test]
    fn restore_rejects_unknown_gpu() {
        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_allocations.insert(
            "c".to_string(),
            vec![api_types::AllocatedDevice::Gpu(AllocatedGpu {
                uuid: "GPU-gone".to_string(),
                name: "A10".to_string(),
                cdi_device: "nvidia.com/gpu=gpu9".to_string(),
            })],
        );

        let err = state_from(mixed_node(), &spec).err().expect("should fail");
        assert!(matches!(
            err,
            DeviceStateError::RecordInconsistent { claim_uid, .. } if claim_uid == "c"
        ));
    }

    #[test]
    fn restore_rejects_gpu_bound_twice() {
        let record = api_types::AllocatedDevice::Gpu(AllocatedGpu {
            uuid: "g1".to_string(),
            name: "A10".to_string(),
            cdi_device: "nvidia.com/gpu=gpu0".to_string(),
        });
        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_allocations
            .insert("a".to_string(), vec![record.clone()]);
        spec.claim_allocations.insert("b".to_string(), vec![record]);

        let err = state_from(mixed_node(), &spec).err().expect("should fail");
        assert!(matches!(err, DeviceStateError::RecordInconsistent { .. }));
    }

    #[test]
    fn restore_rejects_exhausted_profile() {
        let records = (0..3)
            .map(|gi| {
                api_types::AllocatedDevice::Mig(AllocatedMigDevice {
                    uuid: format!("MIG-m1/{gi}/0"),
                    profile: "3g.20gb".to_string(),
                    cdi_device: format!("nvidia.com/gpu=mig-gpu3-gi{gi}-ci0"),
                    placement: MigDevicePlacement {
                        gpu_uuid: "m1".to_string(),
                        start: 0,
                        size: 4,
                    },
                })
            })
            .collect();
        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_allocations.insert("c".to_string(), records);

        let err = state_from(mixed_node(), &spec).err().expect("should fail");
        assert!(matches!(err, DeviceStateError::RecordInconsistent { .. }));
    }

    #[test]
    fn restore_rejects_malformed_mig_cdi_device() {
        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_allocations.insert(
            "c".to_string(),
            vec![api_types::AllocatedDevice::Mig(AllocatedMigDevice {
                uuid: "MIG-x".to_string(),
                profile: "1g.5gb".to_string(),
                cdi_device: "nvidia.com/gpu=gpu3".to_string(),
                placement: MigDevicePlacement {
                    gpu_uuid: "m1".to_string(),
                    start: 0,
                    size: 1,
                },
            })],
        );

        let err = state_from(mixed_node(), &spec).err().expect("should fail");
        assert!(matches!(err, DeviceStateError::RecordInconsistent { .. }));
    }

    fn mig_record(parent: &str, profile: &str, cdi_device: &str) -> api_types::AllocatedDevice {
        api_types::AllocatedDevice::Mig(AllocatedMigDevice {
            uuid: format!("MIG-{parent}/1/0"),
            profile: profile.to_string(),
            cdi_device: cdi_device.to_string(),
            placement: MigDevicePlacement {
                gpu_uuid: parent.to_string(),
                start: 0,
                size: 1,
            },
        })
    }

    fn restore_error(record: api_types::AllocatedDevice) -> String {
        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_allocations.insert("c".to_string(), vec![record]);

        match state_from(mixed_node(), &spec).err().expect("should fail") {
            DeviceStateError::RecordInconsistent { claim_uid, message } => {
                assert_eq!(claim_uid, "c");
                message
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn restore_rejects_whole_gpu_record_on_mig_gpu() {
        let message = restore_error(api_types::AllocatedDevice::Gpu(AllocatedGpu {
            uuid: "m1".to_string(),
            name: "NVIDIA A100-SXM4-40GB".to_string(),
            cdi_device: "nvidia.com/gpu=gpu3".to_string(),
        }));
        assert!(message.contains("MIG-enabled"), "{message}");
    }

    #[test]
    fn restore_rejects_gpu_minor_mismatch() {
        let message = restore_error(api_types::AllocatedDevice::Gpu(AllocatedGpu {
            uuid: "g1".to_string(),
            name: "A10".to_string(),
            cdi_device: "nvidia.com/gpu=gpu9".to_string(),
        }));
        assert!(message.contains("nvidia.com/gpu=gpu0"), "{message}");
    }

    #[test]
    fn restore_rejects_mig_record_on_whole_gpu() {
        let message = restore_error(mig_record("g1", "1g.5gb", "nvidia.com/gpu=mig-gpu0-gi1-ci0"));
        assert!(message.contains("not MIG-enabled"), "{message}");
    }

    #[test]
    fn restore_rejects_mig_minor_mismatch() {
        let message = restore_error(mig_record("m1", "1g.5gb", "nvidia.com/gpu=mig-gpu4-gi1-ci0"));
        assert!(message.contains("minor 4"), "{message}");
    }

    #[test]
    fn restore_rejects_unparsable_profile() {
        let message =
            restore_error(mig_record("m1", "one-slice", "nvidia.com/gpu=mig-gpu3-gi1-ci0"));
        assert!(message.contains("invalid MIG profile `one-slice`"), "{message}");
    }

    #[test]
    fn restore_skips_empty_claims() {
        let mut spec = NodeAllocationStateSpec::default();
        spec.claim_allocations.insert("empty".to_string(), vec![]);

        let state = state_from(vec_gpu_node(), &spec).expect("device state");
        assert!(state.allocations().is_empty());
    }

    fn vec_gpu_node() -> FakeEnumerator {
        FakeEnumerator::new(vec![gpu("g1", 0)])
    }
}
