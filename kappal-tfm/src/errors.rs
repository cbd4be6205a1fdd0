//  ERRORS.rs
//
//  Description:
//!   Defines errors that occur in the `kappal-tfm` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Errors that occur while transforming a project into resources.
#[derive(Debug)]
pub enum TransformError {
    /// Failed to read the file backing a secret.
    SecretReadError{ name: String, path: PathBuf, err: std::io::Error },
    /// Failed to read the file backing a config.
    ConfigReadError{ name: String, path: PathBuf, err: std::io::Error },
    /// A service references a secret or config that is not declared.
    UnknownObjectRef{ what: &'static str, service: String, object: String },
    /// Failed to serialize a resource to YAML.
    SerializeError{ kind: &'static str, name: String, err: serde_yaml::Error },
}

impl Display for TransformError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use TransformError::*;
        match self {
            SecretReadError{ name, path, err } => write!(f, "Failed to read file '{}' backing secret '{}': {}", path.display(), name, err),
            ConfigReadError{ name, path, err } => write!(f, "Failed to read file '{}' backing config '{}': {}", path.display(), name, err),
            UnknownObjectRef{ what, service, object } => write!(f, "Service '{}' references {} '{}', which is not declared in the top-level {}s section", service, what, object, what),
            SerializeError{ kind, name, err }  => write!(f, "Failed to serialize {} '{}' to YAML: {}", kind, name, err),
        }
    }
}

impl Error for TransformError {}
