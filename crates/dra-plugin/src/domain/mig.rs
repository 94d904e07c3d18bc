//! MIG profile and instance types

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use super::device::GpuIndex;
use super::device::GpuInfo;
use super::device::CDI_KIND;

/// Error returned when a MIG profile string is malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MIG profile `{profile}`: {reason}")]
pub struct MigProfileParseError {
    pub profile: String,
    pub reason: &'static str,
}

/// One way of slicing a MIG-enabled GPU.
///
/// Rendered as `<G>g.<GB>gb` when compute and memory slices match, or
/// `<C>c.<G>g.<GB>gb` for compute-instance sub-profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MigProfile {
    /// Compute slices
    pub c: u32,
    /// GPU (memory) slices
    pub g: u32,
    /// Memory in GB
    pub gb: u32,
}

impl MigProfile {
    pub fn new(c: u32, g: u32, gb: u32) -> Self {
        Self { c, g, gb }
    }
}

impl fmt::Display for MigProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.c == self.g {
            write!(f, "{}g.{}gb", self.g, self.gb)
        } else {
            write!(f, "{}c.{}g.{}gb", self.c, self.g, self.gb)
        }
    }
}

impl FromStr for MigProfile {
    type Err = MigProfileParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| MigProfileParseError {
            profile: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split('.').collect();
        let (c, g, gb) = match parts.as_slice() {
            [g, gb] => {
                let g = parse_unit(g, "g").ok_or_else(|| err("expected <N>g"))?;
                (g, g, parse_unit(gb, "gb").ok_or_else(|| err("expected <N>gb"))?)
            }
            [c, g, gb] => (
                parse_unit(c, "c").ok_or_else(|| err("expected <N>c"))?,
                parse_unit(g, "g").ok_or_else(|| err("expected <N>g"))?,
                parse_unit(gb, "gb").ok_or_else(|| err("expected <N>gb"))?,
            ),
            _ => return Err(err("expected 2 or 3 dot-separated fields")),
        };

        if c == 0 || g == 0 || gb == 0 {
            return Err(err("slice and memory sizes must be non-zero"));
        }
        if c > g {
            return Err(err("compute slices cannot exceed GPU slices"));
        }

        Ok(Self { c, g, gb })
    }
}

fn parse_unit(field: &str, unit: &str) -> Option<u32> {
    field.strip_suffix(unit)?.parse().ok()
}

impl Serialize for MigProfile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MigProfile {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Offset and size of a GPU instance within the parent GPU's slice space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigPlacement {
    pub start: u32,
    pub size: u32,
}

/// A profile a GPU supports, with how many more instances of it fit right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigProfileInfo {
    pub profile: MigProfile,
    pub count: u32,
    /// Valid physical placements for this profile
    pub placements: Vec<MigPlacement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuInstanceInfo {
    pub id: u32,
    pub placement: MigPlacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeInstanceInfo {
    pub id: u32,
}

/// A carved MIG device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigDeviceInfo {
    pub uuid: String,
    /// Catalog index of the parent GPU
    pub parent: GpuIndex,
    pub profile: MigProfile,
    pub gpu_instance: GpuInstanceInfo,
    pub compute_instance: ComputeInstanceInfo,
}

impl MigDeviceInfo {
    /// CDI device name, e.g. `nvidia.com/gpu=mig-gpu0-gi3-ci0`
    pub fn cdi_device(&self, parent: &GpuInfo) -> String {
        format!(
            "{CDI_KIND}=mig-gpu{}-gi{}-ci{}",
            parent.minor, self.gpu_instance.id, self.compute_instance.id
        )
    }
}

/// Identifiers encoded in a MIG CDI device name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigCdiName {
    pub minor: u32,
    pub gpu_instance_id: u32,
    pub compute_instance_id: u32,
}

impl MigCdiName {
    /// Parse `nvidia.com/gpu=mig-gpu<minor>-gi<gi>-ci<ci>`
    pub fn parse(cdi_device: &str) -> Option<Self> {
        let name = cdi_device
            .strip_prefix(CDI_KIND)?
            .strip_prefix('=')?
            .strip_prefix("mig-gpu")?;
        let (minor, rest) = name.split_once("-gi")?;
        let (gi, ci) = rest.split_once("-ci")?;
        Some(Self {
            minor: minor.parse().ok()?,
            gpu_instance_id: gi.parse().ok()?,
            compute_instance_id: ci.parse().ok()?,
        })
    }
}
