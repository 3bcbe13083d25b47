//! Common types for the quorum operator: errors, retry, telemetry and
//! well-known names shared by every component

#![deny(missing_docs)]

pub mod error;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager / component name used on resources written by the operator
pub const FIELD_MANAGER: &str = "quorum-operator";

/// Annotation/label domain for operator-owned metadata
pub const ANNOTATION_DOMAIN: &str = "quorum.ceph.io";

/// Default messenger v1 (legacy wire protocol) monitor port
pub const DEFAULT_MSGR1_PORT: u16 = 6789;

/// Default messenger v2 monitor port
pub const DEFAULT_MSGR2_PORT: u16 = 3300;
