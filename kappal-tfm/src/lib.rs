//  LIB.rs
//
//  Description:
//!   The `kappal-tfm` library is the pure transformer at the heart of
//!   kappal: it turns a resolved Compose project into an ordered stream
//!   of Kubernetes resources that reproduce the Compose semantics
//!   (ordering, dependency conditions, port publishing, volume types,
//!   health checks, scaling).
//

// Declare modules
pub mod errors;
pub mod resources;
pub mod workload;
pub mod transform;

// Promote the entrypoint to the crate's namespace
pub use resources::Resource;
pub use transform::{transform, write_stream, Note, TransformOutput};
