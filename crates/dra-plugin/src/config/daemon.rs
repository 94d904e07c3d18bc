use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "NODE_NAME",
        help = "Name of the node this plugin manages; also the NodeAllocationState name"
    )]
    pub node_name: String,

    #[arg(
        long,
        env = "POD_NAMESPACE",
        default_value = "default",
        help = "Namespace holding the NodeAllocationState resources"
    )]
    pub namespace: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "CDI_ROOT",
        value_delimiter = ',',
        default_value = "/etc/cdi",
        value_hint = clap::ValueHint::DirPath,
        help = "Directories scanned for CDI spec files"
    )]
    pub cdi_root: Vec<PathBuf>,

    #[arg(
        long,
        env = "MIG_PROFILES_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML table of MIG profiles per GPU model (built-in table if unset)"
    )]
    pub mig_profiles_path: Option<PathBuf>,

    #[arg(
        long,
        env = "SYNC_INTERVAL_SECS",
        default_value = "30",
        help = "Seconds between NodeAllocationState publishes"
    )]
    pub sync_interval_secs: u64,
}

impl DaemonArgs {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

#[derive(Parser, Clone, Debug)]
pub struct PrintStateArgs {
    #[arg(
        long,
        env = "MIG_PROFILES_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML table of MIG profiles per GPU model (built-in table if unset)"
    )]
    pub mig_profiles_path: Option<PathBuf>,
}
