//  LIB.rs
//
//  Description:
//!   The `kappal-cfg` crate defines the things the rest of the framework
//!   agrees on: the resolved Compose project model, the project identity,
//!   the on-disk workspace layout and the wire types that cross process
//!   boundaries (published ports, the init-barrier envelope, service
//!   states and label names).
//

// Declare modules
pub mod errors;
pub mod spec;
pub mod project;
pub mod compose;
pub mod workspace;

// Promote some stuff to the crate's namespace
pub use compose::{Project, Service};
pub use spec::{InitSpec, Protocol, PublishedPort, ServiceKind, ServiceState};
pub use workspace::Workspace;
