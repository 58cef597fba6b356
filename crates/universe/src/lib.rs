//! Live views of backing systems.
//!
//! A [`Universe`] exposes one [`TreeKind`] of one [`Backend`] to the
//! reconciler. For every served tenant root, a [`TenantPool`] runs an
//! observation worker that hydrates the root's tree and keeps it current
//! from the backend's event stream. Readers only ever see whole snapshots.
//!
//! [`InMemoryBackend`] is a complete backing system held in memory, used for
//! local runs and tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backend;
pub mod error;
pub mod kind;
pub mod memory;
pub mod pool;
pub mod universe;

pub use backend::{Backend, EventStream, TreeEvent};
pub use error::{Error, Result};
pub use kind::TreeKind;
pub use memory::{InMemoryBackend, Owner, StoredObject};
pub use pool::{HYDRATE_BASE_BACKOFF, HYDRATE_MAX_BACKOFF, TenantPool};
pub use universe::Universe;
