//! Weave - a replicated plain-text data type.
//!
//! A [`Document`] is a sequence CRDT in the Fugue family: every inserted
//! run of characters is an immutable record tagged with a globally unique
//! (client, seq) identity and linked to the identities of its left and
//! right neighbours at the moment it was created. Replicas edit
//! independently and reconcile by state-based merge, converging on an
//! identical sequence without a central coordinator.
//!
//! # Quick Start
//!
//! ```
//! use weave::{ClientId, Document};
//!
//! let mut doc = Document::new();
//! doc.insert(ClientId(1), 0, "Hello!").unwrap();
//! doc.insert(ClientId(1), 5, ", world").unwrap();
//! assert_eq!(doc.content(), "Hello, world!");
//!
//! // A second replica edits independently, then the two reconcile.
//! let mut other = Document::new();
//! other.insert(ClientId(2), 0, "!!").unwrap();
//! doc.merge_from(&other).unwrap();
//! assert_eq!(doc.content(), "Hello, world!!!");
//! ```

pub mod crdt;
pub mod error;

pub use crdt::document::Document;
pub use crdt::primitives::id::{ClientId, Id};
pub use error::{DocError, Result};
