//! Container inventory sync.
//!
//! Mirrors Namespaces (`ContainerProject`) and Pods
//! (`ContainerApplicationInstance`) into the NSX container inventory of the
//! cluster (`ContainerCluster`). Changes are staged in a request buffer and
//! sent as one batch; the local stores are only updated once NSX has
//! accepted the batch.


use crate::error::ControllerError;
use crate::store::{ResourceStore, StoreResource};
use crate::tags::basic_tags;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::{Api, Client, ResourceExt};
use nsx_client::{
    ContainerApplicationInstance, ContainerCluster, ContainerInventoryData, ContainerInventoryObject,
    ContainerProject, NsxClientTrait,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UPDATE_TYPE_UPDATE: &str = "UPDATE";
const UPDATE_TYPE_DELETE: &str = "DELETE";

/// Kinds of container inventory objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InventoryType {
    ContainerCluster,
    ContainerProject,
    ContainerApplicationInstance,
}

impl InventoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryType::ContainerCluster => "ContainerCluster",
            InventoryType::ContainerProject => "ContainerProject",
            InventoryType::ContainerApplicationInstance => "ContainerApplicationInstance",
        }
    }
}

impl fmt::Display for InventoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ContainerCluster" => Ok(InventoryType::ContainerCluster),
            "ContainerProject" => Ok(InventoryType::ContainerProject),
            "ContainerApplicationInstance" => Ok(InventoryType::ContainerApplicationInstance),
            other => Err(other.to_string()),
        }
    }
}

/// Work item: a Kubernetes object to mirror.
/// `key` is the Namespace name or `namespace/name` of a Pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InventoryKey {
    pub inventory_type: InventoryType,
    pub external_id: String,
    pub key: String,
}

impl InventoryKey {
    pub fn project(namespace: &Namespace) -> Self {
        Self {
            inventory_type: InventoryType::ContainerProject,
            external_id: namespace.uid().unwrap_or_default(),
            key: namespace.name_any(),
        }
    }

    pub fn application_instance(pod: &Pod) -> Self {
        Self {
            inventory_type: InventoryType::ContainerApplicationInstance,
            external_id: pod.uid().unwrap_or_default(),
            key: format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any()),
        }
    }
}

/// Reads of the Kubernetes objects mirrored into the inventory
#[async_trait::async_trait]
pub trait InventorySource: Send + Sync {
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError>;

    async fn pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError>;
}

/// [`InventorySource`] backed by the API server
#[derive(Clone)]
pub struct KubeInventorySource {
    client: Client,
}

impl KubeInventorySource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl fmt::Debug for KubeInventorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeInventorySource").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl InventorySource for KubeInventorySource {
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, ControllerError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

impl StoreResource for ContainerProject {
    fn store_key(&self) -> String {
        self.external_id.clone()
    }
}

impl StoreResource for ContainerApplicationInstance {
    fn store_key(&self) -> String {
        self.external_id.clone()
    }
}

/// Object staged for the next batch
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryObject {
    Project(ContainerProject),
    ApplicationInstance(ContainerApplicationInstance),
}

impl InventoryObject {
    pub fn external_id(&self) -> &str {
        match self {
            InventoryObject::Project(p) => &p.external_id,
            InventoryObject::ApplicationInstance(a) => &a.external_id,
        }
    }

    fn to_value(&self) -> Result<serde_json::Value, ControllerError> {
        Ok(match self {
            InventoryObject::Project(p) => serde_json::to_value(p)?,
            InventoryObject::ApplicationInstance(a) => serde_json::to_value(a)?,
        })
    }
}

/// The batch could not be delivered; every key of the batch must be retried
#[derive(Debug, Error)]
#[error("failed to send container inventory updates: {source}")]
pub struct InventoryFlushError {
    pub retry_keys: HashSet<InventoryKey>,
    #[source]
    pub source: ControllerError,
}

#[derive(Debug, Default)]
struct PendingState {
    request_buffer: Vec<ContainerInventoryObject>,
    pending_add: HashMap<String, InventoryObject>,
    pending_delete: HashMap<String, InventoryObject>,
}

/// Syncs namespaces and pods to the NSX container inventory
pub struct InventoryService {
    nsx: Arc<dyn NsxClientTrait>,
    source: Arc<dyn InventorySource>,
    cluster: String,
    cluster_id: String,
    pub(crate) project_store: ResourceStore<ContainerProject>,
    pub(crate) application_instance_store: ResourceStore<ContainerApplicationInstance>,
    state: tokio::sync::Mutex<PendingState>,
    queue: Mutex<HashSet<InventoryKey>>,
}

impl fmt::Debug for InventoryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InventoryService")
            .field("cluster", &self.cluster)
            .field("cluster_id", &self.cluster_id)
            .field("projects", &self.project_store.len())
            .field("application_instances", &self.application_instance_store.len())
            .finish_non_exhaustive()
    }
}

/// Stable container cluster id derived from the cluster name
pub fn cluster_uuid(cluster: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, cluster.as_bytes()).to_string()
}

impl InventoryService {
    /// Service with empty stores; `initialize` loads the NSX side
    pub fn new(nsx: Arc<dyn NsxClientTrait>, source: Arc<dyn InventorySource>, cluster: impl Into<String>) -> Self {
        let cluster = cluster.into();
        Self {
            nsx,
            source,
            cluster_id: cluster_uuid(&cluster),
            cluster,
            project_store: ResourceStore::new(),
            application_instance_store: ResourceStore::new(),
            state: tokio::sync::Mutex::new(PendingState::default()),
            queue: Mutex::new(HashSet::new()),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Register the cluster (if needed) and load the inventory NSX holds for it
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        self.init_container_cluster().await?;
        let projects = self.nsx.list_container_projects(&self.cluster_id).await?;
        let instances = self.nsx.list_container_application_instances(&self.cluster_id).await?;
        info!(
            "Loaded {} container projects and {} application instances from NSX",
            projects.len(),
            instances.len()
        );
        self.project_store.replace_all(projects)?;
        self.application_instance_store.replace_all(instances)?;
        Ok(())
    }

    /// Fetch the container cluster, creating it when the lookup fails
    pub(crate) async fn init_container_cluster(&self) -> Result<(), ControllerError> {
        match self.nsx.get_container_cluster(&self.cluster_id).await {
            Ok(cluster) => {
                debug!("Container cluster {} exists", cluster.external_id);
                Ok(())
            }
            Err(e) => {
                info!("Creating container cluster {} ({}): {}", self.cluster, self.cluster_id, e);
                let cluster = ContainerCluster {
                    external_id: self.cluster_id.clone(),
                    display_name: self.cluster.clone(),
                    cluster_type: "Kubernetes".to_string(),
                    resource_type: InventoryType::ContainerCluster.to_string(),
                    tags: basic_tags(&self.cluster),
                };
                self.nsx.create_container_cluster(&cluster).await?;
                Ok(())
            }
        }
    }

    /// Stage the deletion of an inventory object. Absent objects and
    /// objects already staged for deletion are a no-op.
    pub async fn delete_resource(&self, external_id: &str, resource_type: &str) -> Result<(), ControllerError> {
        let unknown = || ControllerError::UnknownResourceType {
            resource_type: resource_type.to_string(),
            external_id: external_id.to_string(),
        };
        let object = match InventoryType::from_str(resource_type).map_err(|_| unknown())? {
            InventoryType::ContainerProject => self
                .project_store
                .get_by_key(external_id)
                .map(InventoryObject::Project),
            InventoryType::ContainerApplicationInstance => self
                .application_instance_store
                .get_by_key(external_id)
                .map(InventoryObject::ApplicationInstance),
            InventoryType::ContainerCluster => return Err(unknown()),
        };
        let Some(object) = object else {
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.pending_delete.contains_key(external_id) {
            return Ok(());
        }
        state.request_buffer.push(ContainerInventoryObject {
            container_object: object.to_value()?,
            object_update_type: UPDATE_TYPE_DELETE.to_string(),
        });
        state.pending_add.remove(external_id);
        state.pending_delete.insert(external_id.to_string(), object);
        Ok(())
    }

    /// Stage an add/update unless the store already holds the same object
    async fn upsert(&self, object: InventoryObject) -> Result<(), ControllerError> {
        let unchanged = match &object {
            InventoryObject::Project(p) => self.project_store.get_by_key(&p.external_id).as_ref() == Some(p),
            InventoryObject::ApplicationInstance(a) => {
                self.application_instance_store.get_by_key(&a.external_id).as_ref() == Some(a)
            }
        };
        let mut state = self.state.lock().await;
        let external_id = object.external_id().to_string();
        if unchanged && !state.pending_delete.contains_key(&external_id) {
            return Ok(());
        }
        if state.pending_add.get(&external_id) == Some(&object) {
            return Ok(());
        }
        state.request_buffer.push(ContainerInventoryObject {
            container_object: object.to_value()?,
            object_update_type: UPDATE_TYPE_UPDATE.to_string(),
        });
        state.pending_delete.remove(&external_id);
        state.pending_add.insert(external_id, object);
        Ok(())
    }

    /// Sync the buffered keys and send the resulting batch.
    ///
    /// Keys whose object could not be read come back for retry. When the
    /// batch cannot be sent, every input key is returned for retry.
    pub async fn sync_inventory_object(
        &self,
        buffered_keys: HashSet<InventoryKey>,
    ) -> Result<HashSet<InventoryKey>, InventoryFlushError> {
        let mut retry_keys = HashSet::new();
        if buffered_keys.is_empty() {
            return Ok(retry_keys);
        }

        for key in &buffered_keys {
            let retry = match key.inventory_type {
                InventoryType::ContainerProject => self.sync_container_project(key).await,
                InventoryType::ContainerApplicationInstance => self.sync_container_application_instance(key).await,
                InventoryType::ContainerCluster => None,
            };
            retry_keys.extend(retry);
        }

        if let Err(source) = self.send_and_update_store().await {
            return Err(InventoryFlushError {
                retry_keys: buffered_keys,
                source,
            });
        }
        Ok(retry_keys)
    }

    async fn sync_container_project(&self, key: &InventoryKey) -> Option<InventoryKey> {
        let namespace = match self.source.namespace(&key.key).await {
            Ok(ns) => ns,
            Err(e) => {
                warn!("Failed to read Namespace {}: {}", key.key, e);
                return Some(key.clone());
            }
        };

        let result = match namespace {
            Some(ns) if ns.metadata.deletion_timestamp.is_none() => {
                let project = ContainerProject {
                    external_id: ns.uid().unwrap_or_else(|| key.external_id.clone()),
                    display_name: ns.name_any(),
                    container_cluster_id: self.cluster_id.clone(),
                    resource_type: InventoryType::ContainerProject.to_string(),
                    tags: basic_tags(&self.cluster),
                };
                self.upsert(InventoryObject::Project(project)).await
            }
            _ => {
                self.delete_resource(&key.external_id, InventoryType::ContainerProject.as_str())
                    .await
            }
        };
        result.err().map(|e| {
            warn!("Failed to stage container project {}: {}", key.key, e);
            key.clone()
        })
    }

    async fn sync_container_application_instance(&self, key: &InventoryKey) -> Option<InventoryKey> {
        let Some((namespace, name)) = key.key.split_once('/') else {
            warn!("Ignoring malformed application instance key {}", key.key);
            return None;
        };
        let pod = match self.source.pod(namespace, name).await {
            Ok(pod) => pod,
            Err(e) => {
                warn!("Failed to read Pod {}: {}", key.key, e);
                return Some(key.clone());
            }
        };

        let result = match pod {
            Some(pod) if pod.metadata.deletion_timestamp.is_none() => {
                let Some(project) = self
                    .project_store
                    .list()
                    .into_iter()
                    .find(|p| p.display_name == namespace)
                else {
                    debug!("Container project {} not synced yet, retrying {}", namespace, key.key);
                    return Some(key.clone());
                };
                let status = pod.status.as_ref();
                let instance = ContainerApplicationInstance {
                    external_id: pod.uid().unwrap_or_else(|| key.external_id.clone()),
                    display_name: name.to_string(),
                    container_cluster_id: self.cluster_id.clone(),
                    container_project_id: project.external_id,
                    ip_addresses: status
                        .and_then(|s| s.pod_ips.as_ref())
                        .map(|ips| ips.iter().map(|ip| ip.ip.clone()).collect())
                        .unwrap_or_default(),
                    status: status.and_then(|s| s.phase.clone()),
                    resource_type: InventoryType::ContainerApplicationInstance.to_string(),
                    tags: basic_tags(&self.cluster),
                };
                self.upsert(InventoryObject::ApplicationInstance(instance)).await
            }
            _ => {
                self.delete_resource(&key.external_id, InventoryType::ContainerApplicationInstance.as_str())
                    .await
            }
        };
        result.err().map(|e| {
            warn!("Failed to stage application instance {}: {}", key.key, e);
            key.clone()
        })
    }

    /// Send the buffered batch; on success apply it to the stores. A failed
    /// batch is dropped and rebuilt from the retried keys.
    pub(crate) async fn send_and_update_store(&self) -> Result<(), ControllerError> {
        let mut state = self.state.lock().await;
        if state.request_buffer.is_empty() {
            return Ok(());
        }
        let data = ContainerInventoryData {
            container_inventory_objects: std::mem::take(&mut state.request_buffer),
        };
        debug!("Sending {} container inventory updates", data.container_inventory_objects.len());
        if let Err(e) = self.nsx.send_inventory_updates(&self.cluster_id, &data).await {
            state.pending_add.clear();
            state.pending_delete.clear();
            return Err(e.into());
        }
        self.update_inventory_store(&mut state)
    }

    /// Upsert staged adds, remove staged deletes, then clear both
    fn update_inventory_store(&self, state: &mut PendingState) -> Result<(), ControllerError> {
        for object in state.pending_add.values() {
            match object {
                InventoryObject::Project(p) => self.project_store.apply(p.clone())?,
                InventoryObject::ApplicationInstance(a) => self.application_instance_store.apply(a.clone())?,
            }
        }
        for (external_id, object) in &state.pending_delete {
            match object {
                InventoryObject::Project(_) => {
                    self.project_store.delete(external_id)?;
                }
                InventoryObject::ApplicationInstance(_) => {
                    self.application_instance_store.delete(external_id)?;
                }
            }
        }
        state.pending_add.clear();
        state.pending_delete.clear();
        Ok(())
    }

    /// Queue a key for the next flush
    pub fn enqueue(&self, key: InventoryKey) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
    }

    /// Keys waiting for the next flush
    pub fn pending_count(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sync every queued key; retry keys go back to the queue
    pub async fn flush(&self) -> Result<(), ControllerError> {
        let keys = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let (retry, result) = match self.sync_inventory_object(keys).await {
            Ok(retry) => (retry, Ok(())),
            Err(e) => (e.retry_keys, Err(e.source)),
        };
        if !retry.is_empty() {
            debug!("Requeueing {} inventory keys", retry.len());
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(retry);
        }
        result
    }
}
