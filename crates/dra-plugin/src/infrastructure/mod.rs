//! Adapters for the driver, the CDI registry and the Kubernetes API

pub mod cdi;
pub mod k8s;
pub mod kube_client;
pub mod mig_manager;
pub mod nvml_enumerator;

pub use cdi::SpecDirRegistry;
pub use nvml_enumerator::NvmlEnumerator;
