//! Credential record store
//!
//! The resolver only needs three operations on a namespaced, versioned
//! key-value store: get by name, create, and update guarded by the version
//! that was read. [`KubeStore`] maps them onto Kubernetes Secrets (and reads
//! the monitor endpoints config map for the mapping tracker); [`MemoryStore`]
//! keeps the same semantics in process.
//!
//! # Atomicity
//!
//! `update` sends the record's resourceVersion. If the record changed between
//! read and write the store answers with a conflict, surfaced as
//! [`Error::StoreConflict`]. `create` of an existing record is
//! [`Error::AlreadyExists`], so two racing creators never overwrite each other.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::Client;
use parking_lot::Mutex;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::mapping::EndpointSource;
use crate::types::OwnerInfo;
use crate::{MON_ENDPOINTS_NAME, SECRET_TYPE};
use quorum_common::{Error, Result, FIELD_MANAGER};

/// A named record of opaque fields
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CredentialRecord {
    /// Record name
    pub name: String,
    /// Field values
    pub data: BTreeMap<String, Vec<u8>>,
    /// Labels set by other controllers; carried through `update` unchanged
    pub labels: BTreeMap<String, String>,
    /// Annotations
    pub annotations: BTreeMap<String, String>,
    /// Owner references tying the record's lifetime to a parent
    pub owners: Vec<OwnerReference>,
    /// Version assigned by the store; required for update
    pub resource_version: Option<String>,
}

impl CredentialRecord {
    /// Create an empty record
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        self.set_field(key, value);
        self
    }

    /// Add annotations
    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations.extend(annotations);
        self
    }

    /// Attach owner metadata
    pub fn with_owner(mut self, owner: &OwnerInfo) -> Self {
        self.owners.push(owner.owner_reference().clone());
        self
    }

    /// Set a field in place
    pub fn set_field(&mut self, key: impl Into<String>, value: impl AsRef<[u8]>) {
        self.data.insert(key.into(), value.as_ref().to_vec());
    }

    /// Remove a field
    pub fn remove_field(&mut self, key: &str) -> Option<Vec<u8>> {
        self.data.remove(key)
    }

    /// Whether a field is present
    pub fn has_field(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Read a field as UTF-8 text
    ///
    /// Keys are stored as text; anything else is a corrupt record.
    pub fn text_field(&self, key: &str) -> Result<Option<String>> {
        self.data
            .get(key)
            .map(|raw| {
                String::from_utf8(raw.clone()).map_err(|_| {
                    Error::serialization_for_record(
                        &self.name,
                        format!("field {} is not valid UTF-8", key),
                    )
                })
            })
            .transpose()
    }

    /// Convert to a Kubernetes Secret in `namespace`
    pub fn to_secret(&self, namespace: &str) -> Secret {
        let data = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
            .collect();

        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: non_empty(&self.labels),
                annotations: non_empty(&self.annotations),
                owner_references: (!self.owners.is_empty()).then(|| self.owners.clone()),
                resource_version: self.resource_version.clone(),
                ..Default::default()
            },
            data: Some(data),
            type_: Some(SECRET_TYPE.to_string()),
            ..Default::default()
        }
    }
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then(|| map.clone())
}

impl From<Secret> for CredentialRecord {
    fn from(secret: Secret) -> Self {
        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        // stringData is write-only on a real API server but may be set on
        // objects built in memory
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.entry(k).or_insert_with(|| v.into_bytes());
        }

        let meta = secret.metadata;
        Self {
            name: meta.name.unwrap_or_default(),
            data,
            labels: meta.labels.unwrap_or_default(),
            annotations: meta.annotations.unwrap_or_default(),
            owners: meta.owner_references.unwrap_or_default(),
            resource_version: meta.resource_version,
        }
    }
}

/// Trait abstracting credential record persistence
///
/// Not-found is a normal outcome of `get` and is returned as `None`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a record by name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CredentialRecord>>;

    /// Create a record; fails with `AlreadyExists` if the name is taken
    async fn create(&self, namespace: &str, record: &CredentialRecord)
        -> Result<CredentialRecord>;

    /// Replace a record read earlier; fails with `StoreConflict` if it changed since
    async fn update(&self, namespace: &str, record: &CredentialRecord)
        -> Result<CredentialRecord>;
}

// =============================================================================
// Kubernetes
// =============================================================================

/// Store backed by Kubernetes Secrets and ConfigMaps
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(FIELD_MANAGER.to_string()),
        }
    }
}

#[async_trait]
impl CredentialStore for KubeStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CredentialRecord>> {
        match self.secrets(namespace).get(name).await {
            Ok(secret) => Ok(Some(secret.into())),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace = %namespace, name = %name, "Secret not found");
                Ok(None)
            }
            Err(e) => Err(Error::kube(namespace, e)),
        }
    }

    async fn create(
        &self,
        namespace: &str,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord> {
        let mut secret = record.to_secret(namespace);
        secret.metadata.resource_version = None;

        match self
            .secrets(namespace)
            .create(&Self::post_params(), &secret)
            .await
        {
            Ok(created) => Ok(created.into()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(Error::already_exists(namespace, &record.name))
            }
            Err(e) => Err(Error::kube(namespace, e)),
        }
    }

    async fn update(
        &self,
        namespace: &str,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord> {
        if record.resource_version.is_none() {
            return Err(Error::internal_with_context(
                "store",
                format!("update of {} requires the version it was read at", record.name),
            ));
        }

        match self
            .secrets(namespace)
            .replace(&record.name, &Self::post_params(), &record.to_secret(namespace))
            .await
        {
            Ok(updated) => Ok(updated.into()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(Error::conflict(namespace, &record.name))
            }
            Err(e) => Err(Error::kube(namespace, e)),
        }
    }
}

#[async_trait]
impl EndpointSource for KubeStore {
    async fn get_endpoints(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(MON_ENDPOINTS_NAME).await {
            Ok(cm) => Ok(Some(cm.data.unwrap_or_default())),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::kube(namespace, e)),
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<(String, String), CredentialRecord>,
    endpoints: BTreeMap<String, BTreeMap<String, String>>,
    version: u64,
    writes: u64,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-process store with the same versioning rules as the API server
///
/// Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, replacing any existing one
    ///
    /// Does not count as a write.
    pub fn insert(&self, namespace: &str, record: CredentialRecord) -> CredentialRecord {
        let mut state = self.state.lock();
        let mut record = record;
        record.resource_version = Some(state.next_version());
        state
            .records
            .insert((namespace.to_string(), record.name.clone()), record.clone());
        record
    }

    /// Remove a record, returning it
    pub fn remove(&self, namespace: &str, name: &str) -> Option<CredentialRecord> {
        self.state
            .lock()
            .records
            .remove(&(namespace.to_string(), name.to_string()))
    }

    /// Current contents of a record
    pub fn record(&self, namespace: &str, name: &str) -> Option<CredentialRecord> {
        self.state
            .lock()
            .records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Set the monitor endpoints config map data for a namespace
    pub fn set_endpoints(&self, namespace: &str, data: BTreeMap<String, String>) {
        self.state
            .lock()
            .endpoints
            .insert(namespace.to_string(), data);
    }

    /// Number of successful create/update calls
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CredentialRecord>> {
        Ok(self.record(namespace, name))
    }

    async fn create(
        &self,
        namespace: &str,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), record.name.clone());
        if state.records.contains_key(&key) {
            return Err(Error::already_exists(namespace, &record.name));
        }
        let mut created = record.clone();
        created.resource_version = Some(state.next_version());
        state.records.insert(key, created.clone());
        state.writes += 1;
        Ok(created)
    }

    async fn update(
        &self,
        namespace: &str,
        record: &CredentialRecord,
    ) -> Result<CredentialRecord> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), record.name.clone());
        let current = state.records.get(&key).ok_or_else(|| {
            Error::kube(
                namespace,
                kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("secrets \"{}\" not found", record.name),
                    reason: "NotFound".to_string(),
                    code: 404,
                }),
            )
        })?;
        if record.resource_version.is_none() || current.resource_version != record.resource_version
        {
            return Err(Error::conflict(namespace, &record.name));
        }
        let mut updated = record.clone();
        updated.resource_version = Some(state.next_version());
        state.records.insert(key, updated.clone());
        state.writes += 1;
        Ok(updated)
    }
}

#[async_trait]
impl EndpointSource for MemoryStore {
    async fn get_endpoints(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self.state.lock().endpoints.get(namespace).cloned())
    }
}
