use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Device;
use nvml_wrapper::Nvml;

use crate::config::MigProfileTable;
use crate::domain::mig::MigDeviceInfo;
use crate::domain::DeviceEnumerator;
use crate::domain::EnumeratedDevice;
use crate::domain::EnumeratorError;
use crate::domain::GpuInfo;
use crate::domain::MigInstance;
use crate::domain::MigPlacement;
use crate::domain::MigProfileInfo;
use crate::infrastructure::mig_manager::NvidiaSmiMigManager;

/// Enumerates GPUs through NVML and carves MIG devices with `nvidia-smi`
pub struct NvmlEnumerator {
    nvml: Nvml,
    profiles: MigProfileTable,
    mig: NvidiaSmiMigManager,
}

impl NvmlEnumerator {
    pub fn new(profiles: MigProfileTable) -> Result<Self, EnumeratorError> {
        Ok(Self {
            nvml: init_nvml().map_err(enumeration_error)?,
            profiles,
            mig: NvidiaSmiMigManager::default(),
        })
    }

    fn describe(&self, device: &Device<'_>) -> Result<EnumeratedDevice, NvmlError> {
        let uuid = device.uuid()?;
        let name = device.name()?;
        let minor = device.minor_number()?;
        let mig_enabled = match device.mig_mode() {
            Ok(mode) => mode.current == 1,
            Err(NvmlError::NotSupported) => false,
            Err(e) => return Err(e),
        };

        let mig_profiles = if mig_enabled {
            let profiles = self.profiles.profiles_for(&name);
            if profiles.is_empty() {
                tracing::warn!(
                    gpu_uuid = %uuid,
                    model = %name,
                    "MIG is enabled but no profiles are configured for this model"
                );
            }
            profiles
        } else {
            vec![]
        };

        tracing::info!(
            gpu_uuid = %uuid,
            model = %name,
            minor,
            mig_enabled,
            "Found GPU"
        );

        Ok(EnumeratedDevice {
            gpu: GpuInfo {
                uuid,
                name,
                minor,
                mig_enabled,
            },
            mig_profiles,
        })
    }
}

fn init_nvml() -> Result<Nvml, NvmlError> {
    match Nvml::init() {
        Ok(nvml) => {
            tracing::info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(_) => {
            tracing::warn!("Standard NVML init failed, trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()?;
            tracing::info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

fn enumeration_error(e: NvmlError) -> EnumeratorError {
    EnumeratorError::Enumeration {
        message: e.to_string(),
    }
}

impl DeviceEnumerator for NvmlEnumerator {
    fn enumerate(&self) -> Result<Vec<EnumeratedDevice>, EnumeratorError> {
        let device_count = self.nvml.device_count().map_err(enumeration_error)?;
        tracing::info!("Discovered {} GPU device(s)", device_count);

        (0..device_count)
            .map(|i| {
                let device = self.nvml.device_by_index(i)?;
                self.describe(&device)
            })
            .collect::<Result<_, _>>()
            .map_err(enumeration_error)
    }

    fn create_mig_device(
        &self,
        gpu: &GpuInfo,
        profile: &MigProfileInfo,
        placement: Option<MigPlacement>,
    ) -> Result<MigInstance, EnumeratorError> {
        self.mig.create(gpu, profile, placement)
    }

    fn destroy_mig_device(
        &self,
        gpu: &GpuInfo,
        device: &MigDeviceInfo,
    ) -> Result<(), EnumeratorError> {
        self.mig.destroy(gpu, device)
    }
}
