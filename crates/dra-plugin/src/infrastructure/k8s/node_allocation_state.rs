use std::time::Duration;

use api_types::NodeAllocationStateSpec;
use api_types::NodeAllocationStateStatus;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ObjectMeta;
use kube::api::PostParams;
use kube::core::TypeMeta;
use kube::Api;
use kube::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::types::KubernetesError;

const MAX_RETRIES: u32 = 5;

/// NodeAllocationState custom resource for nas.gpu.resource.nvidia.com/v1alpha1
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeAllocationState {
    #[serde(flatten, default)]
    pub types: Option<TypeMeta>,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeAllocationStateSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeAllocationStateStatus>,
}

impl kube::Resource for NodeAllocationState {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn group(_dt: &()) -> std::borrow::Cow<'_, str> {
        "nas.gpu.resource.nvidia.com".into()
    }

    fn version(_dt: &()) -> std::borrow::Cow<'_, str> {
        "v1alpha1".into()
    }

    fn kind(_dt: &()) -> std::borrow::Cow<'_, str> {
        "NodeAllocationState".into()
    }

    fn plural(_dt: &()) -> std::borrow::Cow<'_, str> {
        "nodeallocationstates".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl NodeAllocationState {
    fn type_meta() -> TypeMeta {
        use kube::Resource;
        TypeMeta {
            api_version: Self::api_version(&()).into_owned(),
            kind: Self::kind(&()).into_owned(),
        }
    }
}

/// Reads and publishes the NodeAllocationState object for one node
pub struct NodeAllocationStateClient {
    api: Api<NodeAllocationState>,
    name: String,
}

impl NodeAllocationStateClient {
    pub fn new(client: Client, namespace: &str, node_name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: node_name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the node's record, creating an empty `NotReady` one if it does
    /// not exist yet.
    #[tracing::instrument(skip(self), fields(name = %self.name))]
    pub async fn get_or_create(&self) -> Result<NodeAllocationState, Report<KubernetesError>> {
        let existing = self
            .api
            .get_opt(&self.name)
            .await
            .change_context(KubernetesError::ReadFailed {
                name: self.name.clone(),
                message: "get request failed".to_string(),
            })?;

        if let Some(nas) = existing {
            debug!(
                claims = nas.spec.claim_allocations.len(),
                "Fetched NodeAllocationState"
            );
            return Ok(nas);
        }

        info!("NodeAllocationState not found, creating it");
        let nas = NodeAllocationState {
            types: Some(NodeAllocationState::type_meta()),
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            spec: NodeAllocationStateSpec::default(),
            status: Some(NodeAllocationStateStatus::NotReady),
        };
        self.api
            .create(&PostParams::default(), &nas)
            .await
            .change_context(KubernetesError::UpdateFailed {
                name: self.name.clone(),
                message: "create request failed".to_string(),
            })
    }

    /// Replace the record's spec and status, retrying on conflicts and
    /// transient failures.
    #[tracing::instrument(skip(self, spec), fields(name = %self.name))]
    pub async fn publish(
        &self,
        spec: &NodeAllocationStateSpec,
        status: NodeAllocationStateStatus,
    ) -> Result<(), Report<KubernetesError>> {
        let mut retry_count = 0;
        loop {
            match self.replace(spec, status).await {
                Ok(()) => return Ok(()),
                Err(e) if retry_count + 1 < MAX_RETRIES => {
                    retry_count += 1;
                    warn!("Publishing NodeAllocationState failed (attempt {retry_count}): {e:?}");
                    let backoff_duration = Duration::from_millis(200 * (1 << retry_count));
                    tokio::time::sleep(backoff_duration).await;
                }
                Err(e) => {
                    return Err(e.attach_printable(format!(
                        "giving up after {MAX_RETRIES} attempts"
                    )))
                }
            }
        }
    }

    async fn replace(
        &self,
        spec: &NodeAllocationStateSpec,
        status: NodeAllocationStateStatus,
    ) -> Result<(), Report<KubernetesError>> {
        let mut current = self.get_or_create().await?;
        if current.spec == *spec && current.status == Some(status) {
            debug!("NodeAllocationState already up to date");
            return Ok(());
        }

        current.types = Some(NodeAllocationState::type_meta());
        current.spec = spec.clone();
        current.status = Some(status);
        self.api
            .replace(&self.name, &PostParams::default(), &current)
            .await
            .change_context(KubernetesError::UpdateFailed {
                name: self.name.clone(),
                message: "replace request failed".to_string(),
            })?;

        debug!(
            allocatable = spec.allocatable_devices.len(),
            claims = spec.claim_allocations.len(),
            %status,
            "Published NodeAllocationState"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use api_types::AllocatableDevice;
    use api_types::AllocatableGpu;
    use kube::Resource;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn resource_identity() {
        assert_eq!(
            &*NodeAllocationState::api_version(&()),
            "nas.gpu.resource.nvidia.com/v1alpha1"
        );
        assert_eq!(&*NodeAllocationState::kind(&()), "NodeAllocationState");
        assert_eq!(&*NodeAllocationState::plural(&()), "nodeallocationstates");
    }

    #[test]
    fn deserializes_object_from_api_server() {
        let json = r#"{
            "apiVersion": "nas.gpu.resource.nvidia.com/v1alpha1",
            "kind": "NodeAllocationState",
            "metadata": { "name": "node-a", "namespace": "gpu-system", "resourceVersion": "42" },
            "spec": {
                "allocatableDevices": [{ "gpu": { "name": "NVIDIA A10", "count": 2 } }]
            },
            "status": "Ready"
        }"#;

        let nas: NodeAllocationState = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(nas.metadata.name.as_deref(), Some("node-a"));
        assert_eq!(nas.types, Some(NodeAllocationState::type_meta()));
        assert_eq!(nas.status, Some(NodeAllocationStateStatus::Ready));
        assert_eq!(
            nas.spec.allocatable_devices,
            vec![AllocatableDevice::Gpu(AllocatableGpu {
                name: "NVIDIA A10".to_string(),
                count: 2
            })]
        );
        assert!(nas.spec.claim_allocations.is_empty());
    }

    #[test]
    fn missing_spec_and_status_default() {
        let nas: NodeAllocationState =
            serde_json::from_str(r#"{ "metadata": { "name": "node-a" } }"#)
                .expect("should deserialize");
        assert_eq!(nas.spec, NodeAllocationStateSpec::default());
        assert_eq!(nas.status, None);
    }
}
