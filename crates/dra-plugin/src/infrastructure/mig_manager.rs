//! MIG device lifecycle through `nvidia-smi mig`

use std::ffi::OsStr;
use std::process::Command;

use tracing::debug;
use tracing::info;

use crate::domain::mig::ComputeInstanceInfo;
use crate::domain::mig::GpuInstanceInfo;
use crate::domain::mig::MigDeviceInfo;
use crate::domain::EnumeratorError;
use crate::domain::GpuInfo;
use crate::domain::MigInstance;
use crate::domain::MigPlacement;
use crate::domain::MigProfile;
use crate::domain::MigProfileInfo;

pub struct NvidiaSmiMigManager {
    binary: String,
}

impl Default for NvidiaSmiMigManager {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

impl NvidiaSmiMigManager {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Create a GPU instance and one compute instance inside it.
    ///
    /// Full-slice profiles get their compute instance from `-C`; compute
    /// sub-profiles (`<C>c.<G>g.<GB>gb`) create the `<G>g.<GB>gb` GPU instance
    /// first and then the compute instance explicitly.
    pub fn create(
        &self,
        gpu: &GpuInfo,
        profile: &MigProfileInfo,
        placement: Option<MigPlacement>,
    ) -> Result<MigInstance, EnumeratorError> {
        let minor = gpu.minor.to_string();
        let minor = minor.as_str();
        let requested = profile.profile;
        let gi_profile = MigProfile::new(requested.g, requested.g, requested.gb).to_string();
        let gi_arg = match placement {
            Some(p) => format!("{gi_profile}:{}", p.start),
            None => gi_profile,
        };
        let create_err = |message: String| EnumeratorError::Create {
            gpu_uuid: gpu.uuid.clone(),
            profile: requested.to_string(),
            message,
        };

        let full_slice = requested.c == requested.g;
        let mut args = vec!["mig", "-i", minor, "-cgi", gi_arg.as_str()];
        if full_slice {
            args.push("-C");
        }
        let output = self.run(&args).map_err(create_err)?;
        let gi = parse_created_id(&output, "GPU instance ID")
            .ok_or_else(|| create_err(format!("unexpected nvidia-smi output: {output}")))?;

        let ci = if full_slice {
            parse_created_id(&output, "compute instance ID")
                .ok_or_else(|| create_err(format!("unexpected nvidia-smi output: {output}")))?
        } else {
            let gi_id = gi.to_string();
            let ci_profile = requested.to_string();
            let output = self
                .run(&["mig", "-i", minor, "-gi", gi_id.as_str(), "-cci", ci_profile.as_str()])
                .map_err(create_err)?;
            parse_created_id(&output, "compute instance ID")
                .ok_or_else(|| create_err(format!("unexpected nvidia-smi output: {output}")))?
        };

        let listing = self
            .run(&["mig", "-i", minor, "-lgi"])
            .map_err(create_err)?;
        let placement = parse_gpu_instance_placement(&listing, gi)
            .ok_or_else(|| create_err(format!("GPU instance {gi} missing from listing")))?;

        info!(
            gpu_uuid = %gpu.uuid,
            profile = %requested,
            gpu_instance = gi,
            compute_instance = ci,
            "Created MIG device"
        );

        Ok(MigInstance {
            uuid: mig_uuid(&gpu.uuid, gi, ci),
            gpu_instance: GpuInstanceInfo { id: gi, placement },
            compute_instance: ComputeInstanceInfo { id: ci },
        })
    }

    /// Destroy the compute instance, then its GPU instance
    pub fn destroy(&self, gpu: &GpuInfo, device: &MigDeviceInfo) -> Result<(), EnumeratorError> {
        let minor = gpu.minor.to_string();
        let minor = minor.as_str();
        let gi = device.gpu_instance.id.to_string();
        let gi = gi.as_str();
        let ci = device.compute_instance.id.to_string();
        let ci = ci.as_str();
        let destroy_err = |message| EnumeratorError::Destroy {
            uuid: device.uuid.clone(),
            message,
        };

        self.run(&["mig", "-i", minor, "-gi", gi, "-ci", ci, "-dci"])
            .map_err(destroy_err)?;
        self.run(&["mig", "-i", minor, "-gi", gi, "-dgi"])
            .map_err(destroy_err)?;

        info!(uuid = %device.uuid, gpu_uuid = %gpu.uuid, "Destroyed MIG device");
        Ok(())
    }

    fn run<S: AsRef<OsStr> + std::fmt::Debug>(&self, args: &[S]) -> Result<String, String> {
        debug!(binary = %self.binary, ?args, "Running MIG command");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| format!("failed to run {}: {e}", self.binary))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}{}",
                self.binary,
                output.status,
                stdout.trim(),
                stderr.trim()
            ));
        }
        Ok(stdout)
    }
}

/// Device identifier accepted by `CUDA_VISIBLE_DEVICES` for a MIG device
pub fn mig_uuid(gpu_uuid: &str, gpu_instance: u32, compute_instance: u32) -> String {
    format!("MIG-{gpu_uuid}/{gpu_instance}/{compute_instance}")
}

/// Pull the id out of `Successfully created <label>  N ...`
fn parse_created_id(output: &str, label: &str) -> Option<u32> {
    output
        .lines()
        .filter(|line| line.contains("Successfully created"))
        .find_map(|line| {
            let (_, rest) = line.split_once(label)?;
            rest.split_whitespace().next()?.parse().ok()
        })
}

/// Find the `start:size` placement of GPU instance `id` in `nvidia-smi mig -lgi`
fn parse_gpu_instance_placement(listing: &str, id: u32) -> Option<MigPlacement> {
    listing.lines().find_map(|line| {
        let fields: Vec<&str> = line
            .trim_matches(|c: char| c == '|' || c.is_whitespace())
            .split_whitespace()
            .collect();
        let [.., instance, placement] = fields.as_slice() else {
            return None;
        };
        if instance.parse::<u32>().ok()? != id {
            return None;
        }
        let (start, size) = placement.split_once(':')?;
        Some(MigPlacement {
            start: start.parse().ok()?,
            size: size.parse().ok()?,
        })
    })
}
