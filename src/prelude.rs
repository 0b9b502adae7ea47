//! Common imports for application code.
//!
//! ```
//! use cloudobject::prelude::*;
//!
//! let mut store = EntityStore::new();
//! let post = store.create("Post").unwrap();
//! store.get_mut(post).unwrap().increment("views", 1).unwrap();
//! assert!(store.get(post).unwrap().is_dirty());
//! ```

pub use crate::{
    Acl, Client, ClientConfig, Condition, EntityKey, EntityStore, GeoPoint, ObjectError, Result,
    SaveOption, Session, Transport, Value,
};
