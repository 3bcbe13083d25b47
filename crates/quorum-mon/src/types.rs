//! Resolved cluster identity and the inputs the resolver is called with

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use quorum_common::{ANNOTATION_DOMAIN, DEFAULT_MSGR1_PORT, DEFAULT_MSGR2_PORT};
use tracing::warn;

/// Storage cluster identifier, immutable once established for a namespace
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fsid(String);

impl Fsid {
    /// Wrap an FSID read from a persisted record
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<uuid::Uuid> for Fsid {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.hyphenated().to_string())
    }
}

impl fmt::Display for Fsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The administrative principal used to talk to the cluster
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredential {
    /// Principal name, `client.admin` unless supplied externally
    pub username: String,
    /// Authentication key
    pub secret: String,
}

impl AdminCredential {
    /// Create a credential
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Don't expose the key in debug output
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Which persisted format the admin credential was loaded from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// `ceph-username` / `ceph-secret` on the primary record
    Current,
    /// `admin-secret` on the primary record, username implied
    Legacy,
    /// `userID` / `userKey` on the external-credential record
    External,
    /// Minted by this call
    Generated,
}

/// Messenger ports for the two monitor wire-protocol generations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonSpec {
    /// Legacy messenger (v1) port
    pub msgr1_port: u16,
    /// Current messenger (v2) port
    pub msgr2_port: u16,
}

impl Default for MonSpec {
    fn default() -> Self {
        Self {
            msgr1_port: DEFAULT_MSGR1_PORT,
            msgr2_port: DEFAULT_MSGR2_PORT,
        }
    }
}

impl MonSpec {
    /// Annotation carrying the v1 port on the primary record
    pub fn msgr1_annotation() -> String {
        format!("{}/msgr1-port", ANNOTATION_DOMAIN)
    }

    /// Annotation carrying the v2 port on the primary record
    pub fn msgr2_annotation() -> String {
        format!("{}/msgr2-port", ANNOTATION_DOMAIN)
    }

    /// Render as record annotations
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (Self::msgr1_annotation(), self.msgr1_port.to_string()),
            (Self::msgr2_annotation(), self.msgr2_port.to_string()),
        ])
    }

    /// Read back ports persisted on a record
    ///
    /// Returns `None` unless both annotations are present and valid.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        let parse = |key: String| -> Option<u16> {
            let raw = annotations.get(&key)?;
            match raw.parse::<u16>() {
                Ok(port) if port > 0 => Some(port),
                _ => {
                    warn!(annotation = %key, value = %raw, "ignoring invalid messenger port");
                    None
                }
            }
        };
        Some(Self {
            msgr1_port: parse(Self::msgr1_annotation())?,
            msgr2_port: parse(Self::msgr2_annotation())?,
        })
    }
}

/// Owner metadata attached to records this operator creates
///
/// Opaque to the resolver; the surrounding lifecycle manager uses it to
/// garbage-collect the record together with its parent resource.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnerInfo {
    owner_ref: OwnerReference,
}

impl OwnerInfo {
    /// Build a controller owner reference for the given parent object
    pub fn controller(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        Self {
            owner_ref: OwnerReference {
                api_version: api_version.into(),
                kind: kind.into(),
                name: name.into(),
                uid: uid.into(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            },
        }
    }

    /// The owner reference to attach
    pub fn owner_reference(&self) -> &OwnerReference {
        &self.owner_ref
    }
}

/// The resolved trust root for one storage cluster deployment
#[derive(Clone, PartialEq)]
pub struct ClusterInfo {
    /// Namespace the cluster was resolved for
    pub namespace: String,
    /// Cluster identifier; unknown for external clusters that never recorded one
    pub fsid: Option<Fsid>,
    /// Monitor keyring secret, when this operator minted one
    pub monitor_secret: Option<String>,
    /// Admin credential
    pub admin: AdminCredential,
    /// Where the admin credential came from
    pub source: CredentialSource,
    /// Messenger ports recorded for the cluster
    pub mon_ports: MonSpec,
}

impl fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("namespace", &self.namespace)
            .field("fsid", &self.fsid)
            .field(
                "monitor_secret",
                &self.monitor_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("admin", &self.admin)
            .field("source", &self.source)
            .field("mon_ports", &self.mon_ports)
            .finish()
    }
}
