//! Property tests over random allocate/free sequences
//!
//! After every step the pool and the allocation table must be disjoint and,
//! together, account for exactly the node's capacity.

use std::collections::BTreeMap;
use std::collections::HashSet;

use api_types::DeviceRequirements;
use api_types::GpuClaimSpec;
use api_types::MigDeviceClaimSpec;
use api_types::NodeAllocationStateSpec;
use proptest::prelude::*;

use super::device::AllocatedDevice;
use super::device::GpuIndex;
use super::device_state::DeviceState;
use super::mig::MigProfile;
use super::mock::gpu;
use super::mock::mig_gpu;
use super::mock::FakeCdiRegistry;
use super::mock::FakeEnumerator;
use super::pool::UnallocatedDevices;

#[derive(Debug, Clone)]
enum Operation {
    AllocateGpus { claim: usize, count: u32 },
    AllocateMig { claim: usize, profile: &'static str },
    Free { claim: usize },
}

const CLAIMS: usize = 6;
const PROFILES: [&str; 3] = ["1g.5gb", "3g.20gb", "7g.40gb"];

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        2 => (0..CLAIMS, 0u32..=3).prop_map(|(claim, count)| Operation::AllocateGpus { claim, count }),
        2 => (0..CLAIMS, prop::sample::select(PROFILES.to_vec()))
            .prop_map(|(claim, profile)| Operation::AllocateMig { claim, profile }),
        3 => (0..CLAIMS).prop_map(|claim| Operation::Free { claim }),
    ]
}

fn node() -> FakeEnumerator {
    FakeEnumerator::new(vec![
        gpu("g0", 0),
        gpu("g1", 1),
        gpu("g2", 2),
        mig_gpu(
            "m0",
            3,
            &[(MigProfile::new(1, 1, 5), 7), (MigProfile::new(3, 3, 20), 2)],
        ),
        mig_gpu("m1", 4, &[(MigProfile::new(1, 1, 5), 3)]),
    ])
}

/// Per (GPU, profile) counts: `None` profile means the whole GPU
type Capacity = BTreeMap<(GpuIndex, Option<String>), u32>;

fn pool_capacity(pool: &UnallocatedDevices) -> Capacity {
    let mut capacity = Capacity::new();
    for device in pool.iter() {
        if device.mig_profiles.is_empty() {
            *capacity.entry((device.gpu, None)).or_default() += 1;
        }
        for (name, info) in &device.mig_profiles {
            *capacity.entry((device.gpu, Some(name.clone()))).or_default() += info.count;
        }
    }
    capacity
}

fn check_invariants(
    state: &DeviceState<FakeEnumerator, FakeCdiRegistry>,
) -> Result<(), TestCaseError> {
    let catalog = state.catalog();
    let available = state.available();
    let allocations = state.allocations();

    let mut seen = HashSet::new();
    let mut bound = Capacity::new();
    for devices in allocations.values() {
        for (uuid, device) in devices {
            prop_assert!(seen.insert(uuid.clone()), "{uuid} bound to two claims");
            let key = match device {
                AllocatedDevice::Gpu(index) => {
                    prop_assert!(
                        !available.contains(*index),
                        "{uuid} is both bound and available"
                    );
                    (*index, None)
                }
                AllocatedDevice::Mig(mig) => (mig.parent, Some(mig.profile.to_string())),
            };
            *bound.entry(key).or_default() += 1;
        }
    }

    let mut expected = Capacity::new();
    for device in catalog.devices().iter() {
        if device.mig_profiles.is_empty() {
            expected.insert((device.gpu, None), 1);
        }
        for (name, info) in &device.mig_profiles {
            expected.insert((device.gpu, Some(name.clone())), info.count);
        }
    }

    let mut accounted = bound;
    for (key, count) in pool_capacity(&available) {
        *accounted.entry(key).or_default() += count;
    }
    accounted.retain(|_, count| *count > 0);
    expected.retain(|_, count| *count > 0);

    prop_assert_eq!(accounted, expected);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property test: capacity is conserved and no device is bound twice
        #[test]
        fn property_capacity_conservation(
            operations in prop::collection::vec(operation_strategy(), 1..40),
        ) {
            let state = DeviceState::new(
                node(),
                FakeCdiRegistry::default(),
                &NodeAllocationStateSpec::default(),
            )
            .unwrap();

            for op in operations {
                match op {
                    Operation::AllocateGpus { claim, count } => {
                        let _ = state.allocate(
                            &format!("claim-{claim}"),
                            &DeviceRequirements::Gpu(GpuClaimSpec { count }),
                        );
                    }
                    Operation::AllocateMig { claim, profile } => {
                        let _ = state.allocate(
                            &format!("claim-{claim}"),
                            &DeviceRequirements::Mig(MigDeviceClaimSpec {
                                profile: profile.to_string(),
                            }),
                        );
                    }
                    Operation::Free { claim } => {
                        state.free(&format!("claim-{claim}")).unwrap();
                    }
                }
                check_invariants(&state)?;
            }
        }

        /// Property test: republishing and restoring yields the same state
        #[test]
        fn property_restore_matches_published_state(
            operations in prop::collection::vec(operation_strategy(), 1..30),
        ) {
            let enumerator = node();
            let state = DeviceState::new(
                enumerator.clone(),
                FakeCdiRegistry::default(),
                &NodeAllocationStateSpec::default(),
            )
            .unwrap();

            for op in operations {
                let _ = match op {
                    Operation::AllocateGpus { claim, count } => state
                        .allocate(
                            &format!("claim-{claim}"),
                            &DeviceRequirements::Gpu(GpuClaimSpec { count }),
                        )
                        .map(|_| ()),
                    Operation::AllocateMig { claim, profile } => state
                        .allocate(
                            &format!("claim-{claim}"),
                            &DeviceRequirements::Mig(MigDeviceClaimSpec {
                                profile: profile.to_string(),
                            }),
                        )
                        .map(|_| ()),
                    Operation::Free { claim } => state.free(&format!("claim-{claim}")),
                };
            }

            let published = state.updated_spec(&NodeAllocationStateSpec::default());
            let restored =
                DeviceState::new(enumerator, FakeCdiRegistry::default(), &published).unwrap();

            prop_assert_eq!(restored.allocations(), state.allocations());
            prop_assert_eq!(
                pool_capacity(&restored.available()),
                pool_capacity(&state.available())
            );
            check_invariants(&restored)?;
        }
    }
}
