//! View rendering on pooled engine workers.
//!
//! A [`Pool`] hands out [`Worker`]s loaded with the active server code. Each
//! worker records the [`checksum`] of the code it was built from, which is how
//! the pool tells current workers from stale ones after a code update.

pub mod pool;
pub mod request;
pub mod worker;

use sha2::{Digest, Sha256};

pub use pool::Pool;
pub use request::{Request, Response};
pub use worker::{Worker, WorkerId};

/// Version hash of a piece of server code.
///
/// The first 128 bits of its SHA-256 digest, hex encoded. Only ever compared
/// for equality.
pub fn checksum(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}
