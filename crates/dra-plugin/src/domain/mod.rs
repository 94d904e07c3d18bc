//! Device allocation domain: catalog, pool snapshots and the engine that binds
//! devices to claims.

pub mod device;
pub mod device_state;
pub mod error;
pub mod mig;
pub mod pool;
pub mod sync;
pub mod traits;

#[cfg(test)]
mod fuzz_tests;
#[cfg(test)]
pub(crate) mod mock;

pub use device::AllocatedDevice;
pub use device::DeviceCatalog;
pub use device::GpuIndex;
pub use device::GpuInfo;
pub use device::CDI_KIND;
pub use device_state::DeviceState;
pub use error::CdiError;
pub use error::DeviceStateError;
pub use error::EnumeratorError;
pub use mig::MigPlacement;
pub use mig::MigProfile;
pub use mig::MigProfileInfo;
pub use traits::CdiRegistry;
pub use traits::DeviceEnumerator;
pub use traits::EnumeratedDevice;
pub use traits::MigInstance;
