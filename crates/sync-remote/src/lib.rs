//! Search engine connector for catalog-sync.
//!
//! - [`IndexRemote`]: the black-box operations the index builders need
//! - [`InMemoryIndexRemote`]: in-process engine for tests and dry runs
//! - [`HttpIndexRemote`]: Algolia-compatible REST client with retry/backoff
//! - [`CredentialsValidator`]: pre-enqueue and pre-run credential checks

pub mod credentials;
pub mod error;
pub mod http;
pub mod memory;
pub mod remote;

pub use credentials::{
    is_search_only, CredentialStatus, CredentialsValidator, RemoteCredentialsValidator,
    StaticCredentialsValidator,
};
pub use error::RemoteError;
pub use http::{HttpIndexRemote, HttpRemoteConfig, HttpRemoteFactory};
pub use memory::{InMemoryIndexRemote, OperationKind, RemoteIndex, RemoteOperation};
pub use remote::{FixedRemoteFactory, IndexRemote, IndexSettings, RemoteFactory};
