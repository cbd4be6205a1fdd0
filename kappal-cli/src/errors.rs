//  ERRORS.rs
//
//  Description:
//!   File that contains file-spanning error definitions for the
//!   kappal-cli package.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;

use kappal_cfg::errors::{ComposeError, WorkspaceError};
use kappal_tfm::errors::TransformError;
use kappal_tsk::errors::{ClusterError, DockerError, KubeError, StateError};


/***** ERROR ENUMS *****/
/// Collects toplevel errors of the kappal-cli package.
#[derive(Debug)]
pub enum CliError {
    /// Errors that occur during the up command
    UpError{ err: UpError },
    /// Errors that occur during the down command
    DownError{ err: DownError },
    /// Errors that occur during the ps/inspect commands
    PsError{ err: PsError },
    /// Errors that occur during the logs command
    LogsError{ err: LogsError },
    /// Errors that occur during the exec command
    ExecError{ err: ExecError },
    /// Errors that occur during the build command
    BuildError{ err: BuildError },
    /// Errors that occur during the clean command
    CleanError{ err: CleanError },
    /// Errors that occur during the eject command
    EjectError{ err: EjectError },
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use CliError::*;
        match self {
            UpError{ err }    => write!(f, "{}", err),
            DownError{ err }  => write!(f, "{}", err),
            PsError{ err }    => write!(f, "{}", err),
            LogsError{ err }  => write!(f, "{}", err),
            ExecError{ err }  => write!(f, "{}", err),
            BuildError{ err } => write!(f, "{}", err),
            CleanError{ err } => write!(f, "{}", err),
            EjectError{ err } => write!(f, "{}", err),
        }
    }
}

impl Error for CliError {}



/// Errors that occur in inter-command utilities.
#[derive(Debug)]
pub enum UtilError {
    /// Failed to connect to the local Docker daemon.
    DockerConnectError{ err: DockerError },
    /// Failed to load or resolve the Compose project.
    ProjectError{ err: ComposeError },
    /// Failed to launch the manifest applier.
    ApplierLaunchError{ command: String, err: std::io::Error },
    /// The manifest applier returned a non-zero exit code.
    ApplierFailed{ verb: &'static str, code: i32, stderr: String },
}

impl Display for UtilError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use UtilError::*;
        match self {
            DockerConnectError{ err }        => write!(f, "{}", err),
            ProjectError{ err }              => write!(f, "{}", err),
            ApplierLaunchError{ command, err } => write!(f, "Failed to launch '{}': {} (is kubectl installed?)", command, err),
            ApplierFailed{ verb, code, stderr } => write!(f, "kubectl {} returned exit code {}\n\nstderr:\n{}\n", verb, code, stderr),
        }
    }
}

impl Error for UtilError {}



/// Errors that occur during the up command.
#[derive(Debug)]
pub enum UpError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed to transform the project.
    TransformError{ err: TransformError },
    /// Failed to set up the workspace.
    WorkspaceError{ err: WorkspaceError },
    /// Failed to validate the published ports.
    PortsError{ err: ComposeError },
    /// Failed some cluster operation.
    ClusterError{ err: ClusterError },
    /// Failed some Kubernetes operation.
    KubeError{ err: KubeError },
    /// Failed to write the serialized resource stream.
    ManifestWriteError{ path: PathBuf, err: std::io::Error },
    /// The workloads did not become ready in time.
    ReadyTimeout{ err: KubeError },
}

impl Display for UpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use UpError::*;
        match self {
            UtilError{ err }              => write!(f, "{}", err),
            TransformError{ err }         => write!(f, "{}", err),
            WorkspaceError{ err }         => write!(f, "{}", err),
            PortsError{ err }             => write!(f, "{}", err),
            ClusterError{ err }           => write!(f, "{}", err),
            KubeError{ err }              => write!(f, "{}", err),
            ManifestWriteError{ path, err } => write!(f, "Failed to write resource stream to '{}': {}", path.display(), err),
            ReadyTimeout{ err }           => write!(f, "{}", err),
        }
    }
}

impl Error for UpError {}



/// Errors that occur during the down command.
#[derive(Debug)]
pub enum DownError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed some cluster operation.
    ClusterError{ err: ClusterError },
}

impl Display for DownError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DownError::*;
        match self {
            UtilError{ err }    => write!(f, "{}", err),
            ClusterError{ err } => write!(f, "{}", err),
        }
    }
}

impl Error for DownError {}



/// Errors that occur during the ps/inspect commands.
#[derive(Debug)]
pub enum PsError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed to discover the project state.
    StateError{ err: StateError },
    /// Failed to serialize the state for output.
    SerializeError{ format: &'static str, err: String },
}

impl Display for PsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use PsError::*;
        match self {
            UtilError{ err }  => write!(f, "{}", err),
            StateError{ err } => write!(f, "{}", err),
            SerializeError{ format, err } => write!(f, "Failed to serialize project state as {}: {}", format, err),
        }
    }
}

impl Error for PsError {}



/// Errors that occur during the logs command.
#[derive(Debug)]
pub enum LogsError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed some Kubernetes operation.
    KubeError{ err: KubeError },
    /// The given service is not part of the project.
    UnknownService{ name: String },
}

impl Display for LogsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use LogsError::*;
        match self {
            UtilError{ err }      => write!(f, "{}", err),
            KubeError{ err }      => write!(f, "{}", err),
            UnknownService{ name } => write!(f, "Service '{}' is not part of the project", name),
        }
    }
}

impl Error for LogsError {}



/// Errors that occur during the exec command.
#[derive(Debug)]
pub enum ExecError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed some Kubernetes operation (including a non-zero remote exit).
    KubeError{ err: KubeError },
    /// The given service is not part of the project.
    UnknownService{ name: String },
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ExecError::*;
        match self {
            UtilError{ err }      => write!(f, "{}", err),
            KubeError{ err }      => write!(f, "{}", err),
            UnknownService{ name } => write!(f, "Service '{}' is not part of the project", name),
        }
    }
}

impl Error for ExecError {}



/// Errors that occur during the build command.
#[derive(Debug)]
pub enum BuildError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed to validate the published ports.
    PortsError{ err: ComposeError },
    /// Failed some cluster operation.
    ClusterError{ err: ClusterError },
    /// The given service is not part of the project.
    UnknownService{ name: String },
    /// The given service declares no build context.
    NoBuildContext{ name: String },
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use BuildError::*;
        match self {
            UtilError{ err }       => write!(f, "{}", err),
            PortsError{ err }      => write!(f, "{}", err),
            ClusterError{ err }    => write!(f, "{}", err),
            UnknownService{ name } => write!(f, "Service '{}' is not part of the project", name),
            NoBuildContext{ name } => write!(f, "Service '{}' declares no build context", name),
        }
    }
}

impl Error for BuildError {}



/// Errors that occur during the clean command.
#[derive(Debug)]
pub enum CleanError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
}

impl Display for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use CleanError::*;
        match self {
            UtilError{ err } => write!(f, "{}", err),
        }
    }
}

impl Error for CleanError {}



/// Errors that occur during the eject command.
#[derive(Debug)]
pub enum EjectError {
    /// Failed some inter-command utility.
    UtilError{ err: UtilError },
    /// Failed to transform the project.
    TransformError{ err: TransformError },
    /// Failed to set up or copy the workspace.
    WorkspaceError{ err: WorkspaceError },
    /// Failed to write the serialized resource stream.
    ManifestWriteError{ path: PathBuf, err: std::io::Error },
}

impl Display for EjectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use EjectError::*;
        match self {
            UtilError{ err }              => write!(f, "{}", err),
            TransformError{ err }         => write!(f, "{}", err),
            WorkspaceError{ err }         => write!(f, "{}", err),
            ManifestWriteError{ path, err } => write!(f, "Failed to write resource stream to '{}': {}", path.display(), err),
        }
    }
}

impl Error for EjectError {}
