pub mod acl;
pub mod error;
pub mod types;
pub mod value;

pub use acl::Acl;
pub use error::{BatchFailure, BatchRequestError, ObjectError, Result};
pub use types::{FileRef, GeoPoint, Relation};
pub use value::Value;
