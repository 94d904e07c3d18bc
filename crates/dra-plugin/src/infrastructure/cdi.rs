//! CDI registry backed by spec directories on the host

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::Deserialize;

use crate::domain::CdiError;
use crate::domain::CdiRegistry;

/// The parts of a CDI spec file needed to resolve device names
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdiSpec {
    #[allow(dead_code)]
    cdi_version: String,
    kind: String,
    #[serde(default)]
    devices: Vec<CdiDevice>,
}

#[derive(Debug, Clone, Deserialize)]
struct CdiDevice {
    name: String,
}

/// Resolves `kind=name` device names against the `*.json` and `*.yaml` CDI
/// specs found in a list of directories.
pub struct SpecDirRegistry {
    roots: Vec<PathBuf>,
    devices: RwLock<HashSet<String>>,
}

impl SpecDirRegistry {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            devices: RwLock::new(HashSet::new()),
        }
    }

    fn spec_files(root: &Path) -> Result<Vec<PathBuf>, CdiError> {
        let mut files = Vec::new();
        for ext in ["json", "yaml"] {
            let pattern = root.join(format!("*.{ext}"));
            let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| CdiError::Parse {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;
            for entry in paths {
                let path = entry.map_err(|e| CdiError::Read {
                    path: e.path().to_path_buf(),
                    source: e.into(),
                })?;
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn load_spec(path: &Path) -> Result<CdiSpec, CdiError> {
    let content = std::fs::read_to_string(path).map_err(|source| CdiError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(&content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| CdiError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

impl CdiRegistry for SpecDirRegistry {
    fn refresh(&self) -> Result<(), CdiError> {
        let mut devices = HashSet::new();

        for root in &self.roots {
            if !root.is_dir() {
                tracing::debug!("CDI spec directory {:?} does not exist, skipping", root);
                continue;
            }

            for path in Self::spec_files(root)? {
                let spec = match load_spec(&path) {
                    Ok(spec) => spec,
                    Err(e) => {
                        tracing::warn!("Ignoring unusable CDI spec: {e}");
                        continue;
                    }
                };
                for device in spec.devices {
                    devices.insert(format!("{}={}", spec.kind, device.name));
                }
            }
        }

        tracing::info!(devices = devices.len(), "Refreshed CDI registry");
        *self.devices.write().expect("poisoned") = devices;
        Ok(())
    }

    fn qualified_name(&self, device: &str) -> Option<String> {
        self.devices
            .read()
            .expect("poisoned")
            .get(device)
            .cloned()
    }
}
