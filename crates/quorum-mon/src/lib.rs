//! Monitor cluster identity and admin credential bootstrap
//!
//! On every reconcile pass the operator needs the storage cluster's trust
//! root: its FSID and the admin credential. This crate decides whether that
//! trust root already exists (current record format, the legacy single-field
//! format, or credentials supplied for an externally managed cluster) or has
//! to be minted and persisted.
//!
//! # Modules
//!
//! - [`types`] - resolved cluster info, monitor spec and owner metadata
//! - [`identity`] - FSID generation
//! - [`keyring`] - admin/monitor key generation through `ceph-authtool`
//! - [`store`] - credential record store (Kubernetes Secrets, in-memory)
//! - [`mapping`] - monitor endpoint and max-ID bookkeeping
//! - [`cluster_info`] - the resolver tying it all together

#![deny(missing_docs)]

pub mod cluster_info;
pub mod identity;
pub mod keyring;
pub mod mapping;
pub mod store;
pub mod types;

pub use cluster_info::{ClusterInfoResolver, ResolvedCluster, ResolverConfig};
pub use quorum_common::{Error, Result};
pub use types::{AdminCredential, ClusterInfo, CredentialSource, Fsid, MonSpec, OwnerInfo};

// =============================================================================
// Persisted record names and fields
// =============================================================================

/// Primary record holding the cluster FSID and keys
pub const MON_SECRET_NAME: &str = "rook-ceph-mon";

/// Legacy record holding credentials for an externally managed cluster
pub const OPERATOR_CREDS_NAME: &str = "rook-ceph-operator-creds";

/// Config map with monitor endpoints, max monitor ID and placement mapping
pub const MON_ENDPOINTS_NAME: &str = "rook-ceph-mon-endpoints";

/// Secret type set on the primary record
pub const SECRET_TYPE: &str = "kubernetes.io/rook";

/// Cluster FSID field
pub const FSID_KEY: &str = "fsid";

/// Monitor keyring secret field
pub const MON_SECRET_KEY: &str = "mon-secret";

/// Legacy admin secret field (username implied)
pub const ADMIN_SECRET_KEY: &str = "admin-secret";

/// Current-format admin username field
pub const CEPH_USERNAME_KEY: &str = "ceph-username";

/// Current-format admin secret field
pub const CEPH_SECRET_KEY: &str = "ceph-secret";

/// Username field of the external-credential record
pub const EXTERNAL_USER_ID_KEY: &str = "userID";

/// Secret field of the external-credential record
pub const EXTERNAL_USER_KEY_KEY: &str = "userKey";

/// Well-known admin principal
pub const ADMIN_USERNAME: &str = "client.admin";

/// Monitor principal
pub const MON_USERNAME: &str = "mon.";

/// Endpoints config map: comma-separated `name=endpoint` list
pub const ENDPOINTS_DATA_KEY: &str = "data";

/// Endpoints config map: highest monitor ID ever assigned
pub const MAX_MON_ID_KEY: &str = "maxMonId";

/// Endpoints config map: JSON placement mapping
pub const MAPPING_KEY: &str = "mapping";
