//! Foundation types for the Silo storage node.
//!
//! Every other Silo crate depends on `silo-types`. It carries the two
//! identifier spaces the node juggles:
//!
//! - [`ContentId`]: the domain-level id a client or peer uses to name an asset
//! - [`BackendId`]: the content address assigned by the object backend
//!
//! The two are related only through a resolver owned by the store.

pub mod error;
pub mod id;

pub use error::TypeError;
pub use id::{BackendId, ContentId};
