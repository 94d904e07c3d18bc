use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::{MigPlacement, MigProfile, MigProfileInfo};

const BUILTIN_MIG_PROFILES: &str = include_str!("../../mig-profiles.yaml");

/// MIG profiles supported by one GPU model, as written in the YAML table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigModelProfiles {
    /// Model name as reported by NVML (e.g., "NVIDIA A100-SXM4-40GB")
    pub model: String,
    pub profiles: Vec<MigProfileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigProfileEntry {
    pub profile: MigProfile,
    /// Instances of this profile that fit on an empty GPU
    pub count: u32,
    #[serde(default)]
    pub placements: Vec<MigPlacement>,
}

/// MIG profile capacity keyed by GPU model name
#[derive(Debug, Clone, Default)]
pub struct MigProfileTable {
    models: HashMap<String, Vec<MigProfileInfo>>,
}

impl MigProfileTable {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let entries: Vec<MigModelProfiles> =
            serde_yaml::from_str(yaml).context("invalid MIG profile table")?;

        let models = entries
            .into_iter()
            .map(|entry| {
                let profiles = entry
                    .profiles
                    .into_iter()
                    .map(|p| MigProfileInfo {
                        profile: p.profile,
                        count: p.count,
                        placements: p.placements,
                    })
                    .collect();
                (entry.model, profiles)
            })
            .collect();

        Ok(Self { models })
    }

    /// The table shipped with the plugin
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_yaml(BUILTIN_MIG_PROFILES)
    }

    /// Load the table from `path`, or the built-in table when unset
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            tracing::info!("Using built-in MIG profile table");
            return Self::builtin();
        };

        tracing::info!("Loading MIG profile table from {:?}", path);
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read MIG profile table {}", path.display()))?;
        let table = Self::from_yaml(&yaml)?;
        tracing::info!("Loaded MIG profiles for {} GPU models", table.models.len());
        Ok(table)
    }

    /// Profiles for `model`; empty if the model is not in the table
    pub fn profiles_for(&self, model: &str) -> Vec<MigProfileInfo> {
        self.models.get(model).cloned().unwrap_or_default()
    }
}
