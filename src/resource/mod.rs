//! Versioned, namespaced resources as seen by the watch engine.
//!
//! The watch engine never looks at a resource's payload. It only needs the
//! metadata accessor: namespace, name, labels and the resource version.

mod object;
mod resource_version;

pub use object::*;
pub use resource_version::*;
