//! Identity store for AgentCP agents.
//!
//! Each agent owns an ECDSA P-384 key pair certified by the network CA. The
//! private key is kept encrypted (PKCS#8, AES-256-CBC under a password) next
//! to the certificate at
//! `<storage_path>/<aid>/private/certs/<aid>.{key,crt,csr}`.

mod csr;
mod store;

pub use csr::build_csr;
pub use store::{Identity, IdentityError, IdentityStore, PendingIdentity};
