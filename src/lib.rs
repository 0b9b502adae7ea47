// ============================================================================
// CloudObject Library
// ============================================================================
//
// Client-side object model for a backend storage service: entities track
// field mutations as operations, entity graphs are serialized to a tagged
// JSON wire format, and saves are sequenced so that unsaved children are
// created before the objects referring to them.

pub mod core;
pub mod operation;
pub mod entity;
pub mod codec;
pub mod graph;
pub mod transport;
pub mod client;
pub mod config;
pub mod prelude;

// Re-export main types for convenience
pub use crate::core::{Acl, BatchFailure, BatchRequestError, FileRef, GeoPoint, ObjectError, Relation, Result, Value};
pub use operation::{Operation, RelationOp};
pub use entity::{Entity, EntityKey, EntityStore};
pub use codec::{EncodeMode, ValueDecoder, ValueEncoder};
pub use config::ClientConfig;

// Re-export client API
pub use client::{BatchOutcome, BatchRequest, Client, Condition, SaveOption};
pub use transport::{HttpTransport, MemoryBackend, Method, Request, Session, Transport};
