//  ERRORS.rs
//
//  Description:
//!   Defines errors that occur in the `kappal-init` barrier agent.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::time::Duration;


/***** LIBRARY *****/
/// Errors that occur while the barrier agent runs.
#[derive(Debug)]
pub enum InitError {
    /// The spec envelope was not valid JSON.
    SpecParseError{ raw: String, err: serde_json::Error },

    /// A writable path was not absolute.
    PathNotAbsolute{ path: PathBuf },
    /// A writable path was the filesystem root.
    PathIsRoot,
    /// Failed to stat a writable path.
    PathMetadataError{ path: PathBuf, err: std::io::Error },
    /// Failed to create a writable path.
    PathCreateError{ path: PathBuf, err: std::io::Error },
    /// Failed to chmod a writable path.
    PathChmodError{ path: PathBuf, err: std::io::Error },

    /// Failed to build the in-cluster client.
    ClientError{ err: kube::Error },
    /// Failed to infer the in-cluster config.
    ConfigError{ err: kube::config::InClusterError },
    /// Failed to list the jobs backing a named prerequisite.
    JobListError{ name: String, err: kube::Error },
    /// A prerequisite job has failed for good.
    JobFailed{ name: String },
    /// Failed to list the pods backing a named prerequisite.
    PodListError{ name: String, err: kube::Error },
    /// Not every prerequisite was satisfied before the deadline.
    DeadlineExceeded{ timeout: Duration },
}

impl Display for InitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use InitError::*;
        match self {
            SpecParseError{ raw, err } => write!(f, "Failed to parse init spec '{}' as JSON: {}", raw, err),

            PathNotAbsolute{ path }        => write!(f, "Refusing to prepare non-absolute path '{}'", path.display()),
            PathIsRoot                     => write!(f, "Refusing to prepare the filesystem root"),
            PathMetadataError{ path, err } => write!(f, "Failed to stat path '{}': {}", path.display(), err),
            PathCreateError{ path, err }   => write!(f, "Failed to create path '{}': {}", path.display(), err),
            PathChmodError{ path, err }    => write!(f, "Failed to chmod path '{}': {}", path.display(), err),

            ClientError{ err }         => write!(f, "Failed to create in-cluster Kubernetes client: {}", err),
            ConfigError{ err }         => write!(f, "Failed to infer in-cluster Kubernetes config: {}", err),
            JobListError{ name, err }  => write!(f, "Failed to list jobs of prerequisite '{}': {}", name, err),
            JobFailed{ name }          => write!(f, "Prerequisite job '{}' has failed; giving up", name),
            PodListError{ name, err }  => write!(f, "Failed to list pods of prerequisite '{}': {}", name, err),
            DeadlineExceeded{ timeout } => write!(f, "Prerequisites were not satisfied within {}s", timeout.as_secs()),
        }
    }
}

impl Error for InitError {}
