//! FSID generation
//!
//! A new cluster gets a random (version 4) UUID as its FSID. Randomness comes
//! straight from the operating system so a failing entropy source is reported
//! as an error instead of panicking inside the reconcile loop.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::types::Fsid;
use quorum_common::{Error, Result};

/// Source of new cluster identifiers
pub trait IdentityGenerator: Send + Sync {
    /// Mint a new, globally unique FSID
    fn new_fsid(&self) -> Result<Fsid>;
}

/// Generates random UUIDs from the OS random source
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentityGenerator;

impl IdentityGenerator for RandomIdentityGenerator {
    fn new_fsid(&self) -> Result<Fsid> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::random_source(e.to_string()))?;
        Ok(Fsid::from(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }
}
