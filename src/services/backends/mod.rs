//! Concrete storage backends.

pub mod local;
pub mod object_store;

pub use local::LocalBackend;
pub use object_store::{ObjectStoreBackend, ObjectStoreSettings};
