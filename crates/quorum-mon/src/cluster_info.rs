//! Cluster identity resolution
//!
//! Called once per reconcile pass to produce the cluster's FSID and admin
//! credential. Records written by earlier operator versions and credentials
//! for externally managed clusters are read in place; a new identity is only
//! minted when nothing exists for the namespace.
//!
//! # Resolution order
//!
//! 1. Primary record with `ceph-username`/`ceph-secret` - load as is.
//! 2. Primary record without them - the external-credential record if one
//!    exists, else the legacy `admin-secret` field under `client.admin`.
//!    A legacy value equal to the field name is the unset placeholder and
//!    fails the pass.
//! 3. No primary record, external-credential record present - load its
//!    `userID`/`userKey`.
//! 4. Nothing at all - generate FSID and keys and create the primary record.
//!    Losing the create race to another resolver reloads the winner's record.
//!
//! Only step 4 writes. Every store call and key generation is bounded by
//! [`ResolverConfig::timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::identity::{IdentityGenerator, RandomIdentityGenerator};
use crate::keyring::{generate_admin_key, generate_mon_key, KeyringGenerator};
use crate::mapping::{load_mon_mapping, EndpointSource, MonMapping};
use crate::store::{CredentialRecord, CredentialStore};
use crate::types::{AdminCredential, ClusterInfo, CredentialSource, Fsid, MonSpec, OwnerInfo};
use crate::{
    ADMIN_SECRET_KEY, ADMIN_USERNAME, CEPH_SECRET_KEY, CEPH_USERNAME_KEY, EXTERNAL_USER_ID_KEY,
    EXTERNAL_USER_KEY_KEY, FSID_KEY, MON_SECRET_KEY, MON_SECRET_NAME, OPERATOR_CREDS_NAME,
};
use quorum_common::{Error, Result};

/// Default bound on each blocking step
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolver settings
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Upper bound for each store call and each key generation
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Result of one resolution
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedCluster {
    /// The cluster trust root
    pub info: ClusterInfo,
    /// Highest monitor ordinal assigned so far, -1 for a new cluster
    pub max_mon_id: i32,
    /// Recorded monitors
    pub mapping: MonMapping,
}

/// Resolves or creates the cluster identity for a namespace
///
/// Shareable across reconcile workers; holds no per-namespace state.
pub struct ClusterInfoResolver {
    store: Arc<dyn CredentialStore>,
    endpoints: Arc<dyn EndpointSource>,
    keyring: Arc<dyn KeyringGenerator>,
    identity: Arc<dyn IdentityGenerator>,
    config: ResolverConfig,
}

impl ClusterInfoResolver {
    /// Create a resolver generating FSIDs from the OS random source
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoints: Arc<dyn EndpointSource>,
        keyring: Arc<dyn KeyringGenerator>,
    ) -> Self {
        Self {
            store,
            endpoints,
            keyring,
            identity: Arc::new(RandomIdentityGenerator),
            config: ResolverConfig::default(),
        }
    }

    /// Use a different FSID source
    pub fn with_identity(mut self, identity: Arc<dyn IdentityGenerator>) -> Self {
        self.identity = identity;
        self
    }

    /// Override the default configuration
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the cluster identity for `namespace`, creating it if none exists
    ///
    /// `owner` is attached to a newly created record. Without an owner the
    /// call only loads and fails with `MissingOwner` when nothing exists.
    #[instrument(skip(self, mon_spec, owner))]
    pub async fn resolve(
        &self,
        namespace: &str,
        mon_spec: &MonSpec,
        owner: Option<&OwnerInfo>,
    ) -> Result<ResolvedCluster> {
        self.resolve_in_scope(namespace, mon_spec, owner)
            .await
            .map_err(|e| e.in_scope(namespace))
    }

    /// Rewrite a legacy primary record in the current format
    ///
    /// Adds `ceph-username`/`ceph-secret` next to the legacy field. Nothing
    /// else on the record changes; in particular the FSID is kept. Records
    /// already in the current format, and clusters whose credential comes
    /// from the external-credential record, are left untouched.
    #[instrument(skip(self, mon_spec))]
    pub async fn repair(&self, namespace: &str, mon_spec: &MonSpec) -> Result<ClusterInfo> {
        self.repair_in_scope(namespace, mon_spec)
            .await
            .map_err(|e| e.in_scope(namespace))
    }

    async fn resolve_in_scope(
        &self,
        namespace: &str,
        mon_spec: &MonSpec,
        owner: Option<&OwnerInfo>,
    ) -> Result<ResolvedCluster> {
        let info = match self.get(namespace, MON_SECRET_NAME).await? {
            Some(primary) => {
                debug!("found existing monitor secrets");
                self.load_existing(namespace, &primary, mon_spec).await?
            }
            None => match self.get(namespace, OPERATOR_CREDS_NAME).await? {
                Some(external) => {
                    info!("no monitor secrets, using external cluster credentials");
                    load_external_only(namespace, &external, mon_spec)?
                }
                None => self.create_new(namespace, mon_spec, owner).await?,
            },
        };

        let mapping = self
            .bounded(
                namespace,
                "load_mon_mapping",
                load_mon_mapping(self.endpoints.as_ref(), namespace),
            )
            .await?;

        debug!(
            fsid = info.fsid.as_ref().map(Fsid::as_str).unwrap_or("unknown"),
            username = %info.admin.username,
            source = ?info.source,
            max_mon_id = mapping.max_id,
            "resolved cluster info"
        );

        Ok(ResolvedCluster {
            max_mon_id: mapping.max_id,
            info,
            mapping,
        })
    }

    /// Build the cluster info from an existing primary record
    async fn load_existing(
        &self,
        namespace: &str,
        primary: &CredentialRecord,
        mon_spec: &MonSpec,
    ) -> Result<ClusterInfo> {
        let fsid = primary.text_field(FSID_KEY)?.map(Fsid::new);
        if fsid.is_none() {
            warn!("monitor secrets carry no fsid");
        }
        let (admin, source) = self.load_credential(namespace, primary).await?;

        Ok(ClusterInfo {
            namespace: namespace.to_string(),
            fsid,
            monitor_secret: primary.text_field(MON_SECRET_KEY)?,
            admin,
            source,
            mon_ports: MonSpec::from_annotations(&primary.annotations).unwrap_or(*mon_spec),
        })
    }

    async fn load_credential(
        &self,
        namespace: &str,
        primary: &CredentialRecord,
    ) -> Result<(AdminCredential, CredentialSource)> {
        if let Some(username) = primary.text_field(CEPH_USERNAME_KEY)? {
            let secret = primary
                .text_field(CEPH_SECRET_KEY)?
                .ok_or_else(|| Error::missing_credential(namespace, &primary.name))?;
            return Ok((AdminCredential::new(username, secret), CredentialSource::Current));
        }

        // Credentials supplied for an external cluster win over the legacy field
        if let Some(external) = self.get(namespace, OPERATOR_CREDS_NAME).await? {
            info!("using external cluster credentials");
            return Ok((external_credential(namespace, &external)?, CredentialSource::External));
        }

        match primary.text_field(ADMIN_SECRET_KEY)? {
            Some(secret) if secret == ADMIN_SECRET_KEY => {
                Err(Error::invalid_placeholder(namespace, ADMIN_SECRET_KEY))
            }
            Some(secret) => {
                debug!("loaded admin key from legacy field");
                Ok((
                    AdminCredential::new(ADMIN_USERNAME, secret),
                    CredentialSource::Legacy,
                ))
            }
            None => Err(Error::missing_credential(namespace, &primary.name)),
        }
    }

    /// Mint a new identity and persist it
    async fn create_new(
        &self,
        namespace: &str,
        mon_spec: &MonSpec,
        owner: Option<&OwnerInfo>,
    ) -> Result<ClusterInfo> {
        let owner = owner.ok_or_else(|| Error::MissingOwner {
            scope: namespace.to_string(),
        })?;

        let fsid = self.identity.new_fsid()?;
        let monitor_secret = self
            .bounded(namespace, "generate_mon_key", generate_mon_key(self.keyring.as_ref()))
            .await?;
        let admin_secret = self
            .bounded(
                namespace,
                "generate_admin_key",
                generate_admin_key(self.keyring.as_ref()),
            )
            .await?;

        let record = CredentialRecord::new(MON_SECRET_NAME)
            .with_field(FSID_KEY, fsid.as_str())
            .with_field(MON_SECRET_KEY, &monitor_secret)
            .with_field(CEPH_USERNAME_KEY, ADMIN_USERNAME)
            .with_field(CEPH_SECRET_KEY, &admin_secret)
            .with_annotations(mon_spec.to_annotations())
            .with_owner(owner);

        match self
            .bounded(namespace, "create", self.store.create(namespace, &record))
            .await
        {
            Ok(_) => {
                info!(fsid = %fsid, "created new cluster identity");
                Ok(ClusterInfo {
                    namespace: namespace.to_string(),
                    fsid: Some(fsid),
                    monitor_secret: Some(monitor_secret),
                    admin: AdminCredential::new(ADMIN_USERNAME, admin_secret),
                    source: CredentialSource::Generated,
                    mon_ports: *mon_spec,
                })
            }
            Err(Error::AlreadyExists { .. }) => {
                // Another resolver won; discard what we generated and use its record
                warn!(discarded_fsid = %fsid, "monitor secrets created concurrently, reloading");
                let primary = self.get(namespace, MON_SECRET_NAME).await?.ok_or_else(|| {
                    Error::internal_with_context(
                        "resolver",
                        format!("{} vanished after create conflict", MON_SECRET_NAME),
                    )
                })?;
                self.load_existing(namespace, &primary, mon_spec).await
            }
            Err(e) => Err(e),
        }
    }

    async fn repair_in_scope(&self, namespace: &str, mon_spec: &MonSpec) -> Result<ClusterInfo> {
        let mut primary = self
            .get(namespace, MON_SECRET_NAME)
            .await?
            .ok_or_else(|| Error::missing_credential(namespace, MON_SECRET_NAME))?;
        let mut info = self.load_existing(namespace, &primary, mon_spec).await?;

        if info.source != CredentialSource::Legacy {
            debug!(source = ?info.source, "nothing to repair");
            return Ok(info);
        }

        primary.set_field(CEPH_USERNAME_KEY, &info.admin.username);
        primary.set_field(CEPH_SECRET_KEY, &info.admin.secret);
        self.bounded(namespace, "update", self.store.update(namespace, &primary))
            .await?;

        info!("rewrote legacy admin credential in current format");
        info.source = CredentialSource::Current;
        Ok(info)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CredentialRecord>> {
        self.bounded(namespace, "get", self.store.get(namespace, name))
            .await
    }

    async fn bounded<T>(
        &self,
        namespace: &str,
        operation: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.config.timeout, fut)
            .await
            .map_err(|_| Error::timeout(namespace, operation))?
    }
}

/// Cluster info for an external cluster known only by its credential record
fn load_external_only(
    namespace: &str,
    external: &CredentialRecord,
    mon_spec: &MonSpec,
) -> Result<ClusterInfo> {
    Ok(ClusterInfo {
        namespace: namespace.to_string(),
        fsid: external.text_field(FSID_KEY)?.map(Fsid::new),
        monitor_secret: None,
        admin: external_credential(namespace, external)?,
        source: CredentialSource::External,
        mon_ports: *mon_spec,
    })
}

fn external_credential(namespace: &str, external: &CredentialRecord) -> Result<AdminCredential> {
    let username = external.text_field(EXTERNAL_USER_ID_KEY)?;
    let secret = external.text_field(EXTERNAL_USER_KEY_KEY)?;
    match (username, secret) {
        (Some(username), Some(secret)) => Ok(AdminCredential::new(username, secret)),
        _ => Err(Error::missing_credential(namespace, &external.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::KeyCap;
    use crate::store::{MemoryStore, MockCredentialStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const NS: &str = "rook-ceph";

    /// Returns fixed keys per entity and records what was asked
    #[derive(Default)]
    struct FixedKeys {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KeyringGenerator for FixedKeys {
        async fn generate(&self, entity: &str, _caps: &[KeyCap]) -> Result<String> {
            self.calls.lock().push(entity.to_string());
            Ok(format!("{}-key", entity))
        }
    }

    struct FailingKeys;

    #[async_trait]
    impl KeyringGenerator for FailingKeys {
        async fn generate(&self, _entity: &str, _caps: &[KeyCap]) -> Result<String> {
            Err(Error::parse("keyring contains no key line"))
        }
    }

    struct HangingKeys;

    #[async_trait]
    impl KeyringGenerator for HangingKeys {
        async fn generate(&self, _entity: &str, _caps: &[KeyCap]) -> Result<String> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct FixedFsid(&'static str);

    impl IdentityGenerator for FixedFsid {
        fn new_fsid(&self) -> Result<Fsid> {
            Ok(Fsid::new(self.0))
        }
    }

    struct NoEntropy;

    impl IdentityGenerator for NoEntropy {
        fn new_fsid(&self) -> Result<Fsid> {
            Err(Error::random_source("getrandom: unavailable"))
        }
    }

    fn owner() -> OwnerInfo {
        OwnerInfo::controller("ceph.rook.io/v1", "CephCluster", "my-cluster", "uid-1")
    }

    fn resolver(store: Arc<MemoryStore>, keys: Arc<dyn KeyringGenerator>) -> ClusterInfoResolver {
        ClusterInfoResolver::new(store.clone(), store, keys)
            .with_identity(Arc::new(FixedFsid("fsid-1")))
    }

    fn primary() -> CredentialRecord {
        CredentialRecord::new(MON_SECRET_NAME).with_field(FSID_KEY, "fsid-existing")
    }

    // ==========================================================================
    // New cluster
    // ==========================================================================

    #[tokio::test]
    async fn test_creates_identity_when_nothing_exists() {
        let store = Arc::new(MemoryStore::new());
        let keys = Arc::new(FixedKeys::default());
        let resolver = resolver(store.clone(), keys.clone());
        let spec = MonSpec {
            msgr1_port: 6790,
            msgr2_port: 3301,
        };

        let resolved = resolver.resolve(NS, &spec, Some(&owner())).await.unwrap();
        assert_eq!(resolved.max_mon_id, -1);
        assert!(resolved.mapping.is_fresh());
        assert_eq!(resolved.info.fsid, Some(Fsid::new("fsid-1")));
        assert_eq!(resolved.info.admin.username, ADMIN_USERNAME);
        assert_eq!(resolved.info.admin.secret, "client.admin-key");
        assert_eq!(resolved.info.monitor_secret.as_deref(), Some("mon.-key"));
        assert_eq!(resolved.info.source, CredentialSource::Generated);
        assert_eq!(*keys.calls.lock(), vec!["mon.", "client.admin"]);

        let record = store.record(NS, MON_SECRET_NAME).unwrap();
        assert_eq!(record.text_field(FSID_KEY).unwrap().as_deref(), Some("fsid-1"));
        assert_eq!(
            record.text_field(CEPH_USERNAME_KEY).unwrap().as_deref(),
            Some(ADMIN_USERNAME)
        );
        assert_eq!(
            record.text_field(CEPH_SECRET_KEY).unwrap().as_deref(),
            Some("client.admin-key")
        );
        assert!(!record.has_field(ADMIN_SECRET_KEY));
        assert_eq!(record.owners, vec![owner().owner_reference().clone()]);
        assert_eq!(MonSpec::from_annotations(&record.annotations), Some(spec));
    }

    #[tokio::test]
    async fn test_second_resolve_loads_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone(), Arc::new(FixedKeys::default()));

        let first = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        let second = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();

        assert_eq!(store.write_count(), 1);
        assert_eq!(first.info.fsid, second.info.fsid);
        assert_eq!(first.info.admin, second.info.admin);
        assert_eq!(first.info.monitor_secret, second.info.monitor_secret);
        assert_eq!(second.info.source, CredentialSource::Current);
    }

    #[tokio::test]
    async fn test_missing_owner_blocks_creation() {
        let store = Arc::new(MemoryStore::new());
        let keys = Arc::new(FixedKeys::default());
        let resolver = resolver(store.clone(), keys.clone());

        let err = resolver
            .resolve(NS, &MonSpec::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingOwner { .. }));
        assert_eq!(err.scope(), Some(NS));
        assert!(keys.calls.lock().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_keyring_failure_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone(), Arc::new(FailingKeys));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ParseFailure { .. }));
        assert_eq!(err.scope(), Some(NS));
        assert!(store.record(NS, MON_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_random_source_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let resolver = ClusterInfoResolver::new(
            store.clone(),
            store.clone(),
            Arc::new(FixedKeys::default()),
        )
        .with_identity(Arc::new(NoEntropy));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RandomSourceExhausted { .. }));
        assert_eq!(err.scope(), Some(NS));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_key_generation_is_bounded_by_timeout() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone(), Arc::new(HangingKeys)).with_config(ResolverConfig {
            timeout: Duration::from_millis(20),
        });

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        match err {
            Error::Timeout { scope, operation } => {
                assert_eq!(scope, NS);
                assert_eq!(operation, "generate_mon_key");
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_lost_create_race_reloads_winner() {
        let winner = primary()
            .with_field(CEPH_USERNAME_KEY, ADMIN_USERNAME)
            .with_field(CEPH_SECRET_KEY, "winner-key");
        let reloaded = winner.clone();

        let mut store = MockCredentialStore::new();
        let mut gets = 0;
        store.expect_get().returning(move |_, name| {
            if name == OPERATOR_CREDS_NAME {
                return Ok(None);
            }
            gets += 1;
            // First lookup sees nothing, the reload after the conflict sees the winner
            Ok((gets > 1).then(|| reloaded.clone()))
        });
        store
            .expect_create()
            .times(1)
            .returning(|ns, record| Err(Error::already_exists(ns, &record.name)));
        store.expect_update().never();

        let endpoints = Arc::new(MemoryStore::new());
        let resolver =
            ClusterInfoResolver::new(Arc::new(store), endpoints, Arc::new(FixedKeys::default()))
                .with_identity(Arc::new(FixedFsid("fsid-loser")));

        let resolved = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        assert_eq!(resolved.info.fsid, Some(Fsid::new("fsid-existing")));
        assert_eq!(resolved.info.admin.secret, "winner-key");
        assert_eq!(resolved.info.source, CredentialSource::Current);
    }

    #[tokio::test]
    async fn test_store_errors_propagate_with_scope() {
        let mut store = MockCredentialStore::new();
        store.expect_get().returning(|ns, name| Err(Error::conflict(ns, name)));
        let endpoints = Arc::new(MemoryStore::new());
        let resolver =
            ClusterInfoResolver::new(Arc::new(store), endpoints, Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreConflict { .. }));
        assert_eq!(err.scope(), Some(NS));
    }

    #[tokio::test]
    async fn test_api_failure_on_lookup_names_the_namespace() {
        let mut store = MockCredentialStore::new();
        store.expect_get().returning(|_, _| {
            Err(Error::kube(
                quorum_common::error::UNKNOWN_CONTEXT,
                kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "etcd unavailable".to_string(),
                    reason: "ServiceUnavailable".to_string(),
                    code: 503,
                }),
            ))
        });
        store.expect_create().never();
        let endpoints = Arc::new(MemoryStore::new());
        let resolver =
            ClusterInfoResolver::new(Arc::new(store), endpoints, Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Kube");
        assert_eq!(err.scope(), Some(NS));
        assert!(err.to_string().contains("[rook-ceph]"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_undecodable_record_names_the_namespace() {
        let store = Arc::new(MemoryStore::new());
        store.insert(NS, primary().with_field(CEPH_USERNAME_KEY, [0xff, 0xfe]));
        let resolver = resolver(store, Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert_eq!(err.scope(), Some(NS));
    }

    // ==========================================================================
    // Existing records
    // ==========================================================================

    #[tokio::test]
    async fn test_loads_current_format() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            NS,
            primary()
                .with_field(MON_SECRET_KEY, "mon-key")
                .with_field(CEPH_USERNAME_KEY, "client.operator")
                .with_field(CEPH_SECRET_KEY, "op-key")
                .with_field(ADMIN_SECRET_KEY, "ignored"),
        );
        let resolver = resolver(store.clone(), Arc::new(FailingKeys));

        let resolved = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        assert_eq!(resolved.info.fsid, Some(Fsid::new("fsid-existing")));
        assert_eq!(
            resolved.info.admin,
            AdminCredential::new("client.operator", "op-key")
        );
        assert_eq!(resolved.info.monitor_secret.as_deref(), Some("mon-key"));
        assert_eq!(resolved.info.source, CredentialSource::Current);
        assert_eq!(resolved.info.mon_ports, MonSpec::default());
    }

    #[tokio::test]
    async fn test_current_username_without_secret_is_missing_credential() {
        let store = Arc::new(MemoryStore::new());
        store.insert(NS, primary().with_field(CEPH_USERNAME_KEY, ADMIN_USERNAME));
        let resolver = resolver(store, Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
    }

    #[tokio::test]
    async fn test_legacy_admin_secret() {
        let store = Arc::new(MemoryStore::new());
        store.insert(NS, primary().with_field(ADMIN_SECRET_KEY, "legacy-key"));
        let resolver = resolver(store.clone(), Arc::new(FailingKeys));

        let resolved = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        assert_eq!(
            resolved.info.admin,
            AdminCredential::new(ADMIN_USERNAME, "legacy-key")
        );
        assert_eq!(resolved.info.source, CredentialSource::Legacy);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_legacy_placeholder_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.insert(NS, primary().with_field(ADMIN_SECRET_KEY, ADMIN_SECRET_KEY));
        let resolver = resolver(store, Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentialPlaceholder { .. }));
        assert_eq!(err.scope(), Some(NS));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_record_without_any_credential_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.insert(NS, primary());
        let resolver = resolver(store.clone(), Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
        // The existing record is never replaced by a newly generated identity
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_external_credentials_override_legacy_placeholder() {
        let store = Arc::new(MemoryStore::new());
        store.insert(NS, primary().with_field(ADMIN_SECRET_KEY, ADMIN_SECRET_KEY));
        store.insert(
            NS,
            CredentialRecord::new(OPERATOR_CREDS_NAME)
                .with_field(EXTERNAL_USER_ID_KEY, "testid")
                .with_field(EXTERNAL_USER_KEY_KEY, "testkey"),
        );
        let resolver = resolver(store, Arc::new(FixedKeys::default()));

        let resolved = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        assert_eq!(resolved.info.admin, AdminCredential::new("testid", "testkey"));
        assert_eq!(resolved.info.fsid, Some(Fsid::new("fsid-existing")));
        assert_eq!(resolved.info.source, CredentialSource::External);
    }

    #[tokio::test]
    async fn test_external_credentials_without_primary_record() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            NS,
            CredentialRecord::new(OPERATOR_CREDS_NAME)
                .with_field(EXTERNAL_USER_ID_KEY, "testid")
                .with_field(EXTERNAL_USER_KEY_KEY, "testkey"),
        );
        let keys = Arc::new(FixedKeys::default());
        let resolver = resolver(store.clone(), keys.clone());

        let resolved = resolver
            .resolve(NS, &MonSpec::default(), None)
            .await
            .unwrap();
        assert_eq!(resolved.info.admin, AdminCredential::new("testid", "testkey"));
        assert_eq!(resolved.info.fsid, None);
        assert_eq!(resolved.info.monitor_secret, None);
        assert_eq!(resolved.max_mon_id, -1);
        assert!(keys.calls.lock().is_empty());
        assert_eq!(store.write_count(), 0);
        assert!(store.record(NS, MON_SECRET_NAME).is_none());
    }

    #[tokio::test]
    async fn test_incomplete_external_credentials_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            NS,
            CredentialRecord::new(OPERATOR_CREDS_NAME).with_field(EXTERNAL_USER_ID_KEY, "testid"),
        );
        let resolver = resolver(store, Arc::new(FixedKeys::default()));

        let err = resolver
            .resolve(NS, &MonSpec::default(), None)
            .await
            .unwrap_err();
        match err {
            Error::MissingCredential { record, .. } => assert_eq!(record, OPERATOR_CREDS_NAME),
            other => panic!("Expected MissingCredential, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mapping_enriches_result() {
        let store = Arc::new(MemoryStore::new());
        store.set_endpoints(
            NS,
            [
                ("data".to_string(), "a=10.0.0.1:6789,c=10.0.0.3:6789".to_string()),
                ("maxMonId".to_string(), "2".to_string()),
            ]
            .into(),
        );
        let resolver = resolver(store, Arc::new(FixedKeys::default()));

        let resolved = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        assert_eq!(resolved.max_mon_id, 2);
        assert_eq!(resolved.mapping.mons.len(), 2);
        // A mapping never stops a new identity from being created
        assert_eq!(resolved.info.source, CredentialSource::Generated);
    }

    #[tokio::test]
    async fn test_ports_read_back_from_record() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store, Arc::new(FixedKeys::default()));
        let created_with = MonSpec {
            msgr1_port: 16789,
            msgr2_port: 13300,
        };

        resolver
            .resolve(NS, &created_with, Some(&owner()))
            .await
            .unwrap();
        let resolved = resolver
            .resolve(NS, &MonSpec::default(), Some(&owner()))
            .await
            .unwrap();
        assert_eq!(resolved.info.mon_ports, created_with);
    }

    // ==========================================================================
    // Repair
    // ==========================================================================

    #[tokio::test]
    async fn test_repair_rewrites_legacy_record() {
        let store = Arc::new(MemoryStore::new());
        let mut legacy = primary().with_field(ADMIN_SECRET_KEY, "legacy-key");
        legacy
            .labels
            .insert("app".to_string(), "rook-ceph-mon".to_string());
        store.insert(NS, legacy);
        let resolver = resolver(store.clone(), Arc::new(FailingKeys));

        let info = resolver.repair(NS, &MonSpec::default()).await.unwrap();
        assert_eq!(info.source, CredentialSource::Current);
        assert_eq!(store.write_count(), 1);

        let record = store.record(NS, MON_SECRET_NAME).unwrap();
        assert_eq!(
            record.text_field(FSID_KEY).unwrap().as_deref(),
            Some("fsid-existing")
        );
        assert_eq!(
            record.text_field(CEPH_SECRET_KEY).unwrap().as_deref(),
            Some("legacy-key")
        );
        assert_eq!(
            record.text_field(ADMIN_SECRET_KEY).unwrap().as_deref(),
            Some("legacy-key")
        );
        // Metadata owned by other controllers survives the rewrite
        assert_eq!(
            record.labels.get("app").map(String::as_str),
            Some("rook-ceph-mon")
        );

        // Already current: no further write
        resolver.repair(NS, &MonSpec::default()).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_repair_surfaces_conflict() {
        let legacy = primary().with_field(ADMIN_SECRET_KEY, "legacy-key");
        let mut stored = legacy.clone();
        stored.resource_version = Some("1".to_string());

        let mut store = MockCredentialStore::new();
        store.expect_get().returning(move |_, name| {
            Ok((name == MON_SECRET_NAME).then(|| stored.clone()))
        });
        store
            .expect_update()
            .times(1)
            .returning(|ns, record| Err(Error::conflict(ns, &record.name)));

        let resolver = ClusterInfoResolver::new(
            Arc::new(store),
            Arc::new(MemoryStore::new()),
            Arc::new(FixedKeys::default()),
        );
        let err = resolver.repair(NS, &MonSpec::default()).await.unwrap_err();
        assert!(matches!(err, Error::StoreConflict { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_repair_without_record() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store, Arc::new(FixedKeys::default()));
        let err = resolver.repair(NS, &MonSpec::default()).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredential { .. }));
    }
}
