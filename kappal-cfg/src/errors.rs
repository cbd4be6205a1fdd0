//  ERRORS.rs
//
//  Description:
//!   Defines errors that occur in the `kappal-cfg` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;


/***** LIBRARY *****/
/// Errors that relate to parsing protocol strings.
#[derive(Debug)]
pub enum ProtocolParseError {
    /// The given string was not a protocol we know.
    UnknownProtocol{ raw: String },
}

impl Display for ProtocolParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ProtocolParseError::*;
        match self {
            UnknownProtocol{ raw } => write!(f, "Unknown protocol '{}' (expected 'tcp' or 'udp')", raw),
        }
    }
}

impl Error for ProtocolParseError {}



/// Errors that relate to parsing dependency conditions.
#[derive(Debug)]
pub enum ConditionParseError {
    /// The given string was not a condition we know.
    UnknownCondition{ raw: String },
}

impl Display for ConditionParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ConditionParseError::*;
        match self {
            UnknownCondition{ raw } => write!(f, "Unknown depends_on condition '{}' (expected 'service_started', 'service_healthy' or 'service_completed_successfully')", raw),
        }
    }
}

impl Error for ConditionParseError {}



/// Errors that relate to parsing Compose duration strings.
#[derive(Debug)]
pub enum DurationParseError {
    /// The duration was the empty string.
    EmptyDuration,
    /// A number failed to parse.
    IllegalNumber{ raw: String, err: std::num::ParseFloatError },
    /// A unit was not one of `h`, `m`, `s`, `ms` or `us`.
    IllegalUnit{ raw: String, unit: String },
    /// There was a number without a unit (or vice versa).
    MissingUnit{ raw: String },
}

impl Display for DurationParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DurationParseError::*;
        match self {
            EmptyDuration            => write!(f, "Empty duration string"),
            IllegalNumber{ raw, err } => write!(f, "Illegal number in duration '{}': {}", raw, err),
            IllegalUnit{ raw, unit }  => write!(f, "Illegal unit '{}' in duration '{}' (expected 'h', 'm', 's', 'ms' or 'us')", unit, raw),
            MissingUnit{ raw }        => write!(f, "Missing unit after number in duration '{}'", raw),
        }
    }
}

impl Error for DurationParseError {}



/// Errors that relate to reading and resolving Compose files.
#[derive(Debug)]
pub enum ComposeError {
    /// Failed to open the given file.
    FileOpenError{ path: PathBuf, err: std::io::Error },
    /// Failed to read the given file.
    FileReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the given file as YAML.
    FileParseError{ path: PathBuf, err: serde_yaml::Error },
    /// Failed to resolve the directory of the Compose file.
    DirResolveError{ path: PathBuf, err: std::io::Error },

    /// The file did not define any services.
    NoServices{ path: PathBuf },
    /// A service defined neither an image nor a build context.
    MissingImageOrBuild{ name: String },
    /// A short-form port string was not parseable.
    IllegalPortString{ name: String, raw: String },
    /// A port number in a port string was not parseable.
    IllegalPortNumber{ name: String, raw: String, err: std::num::ParseIntError },
    /// A port protocol was not parseable.
    IllegalPortProtocol{ name: String, raw: String, err: ProtocolParseError },
    /// Two services claim the same container port/protocol pair.
    DuplicateContainerPort{ service: String, other: String, port: u16, protocol: crate::spec::Protocol },
    /// Two services claim the same host port.
    DuplicateHostPort{ service: String, other: String, port: u16 },
    /// A short-form volume string was not parseable.
    IllegalVolumeString{ name: String, raw: String },
    /// A long-form volume carried a type we do not know.
    UnknownVolumeType{ name: String, raw: String },
    /// A named volume was referenced but never declared at the top level.
    UndeclaredVolume{ name: String, volume: String },
    /// A `depends_on` condition was not parseable.
    IllegalCondition{ name: String, dependency: String, err: ConditionParseError },
    /// A duration string in a healthcheck was not parseable.
    IllegalDuration{ name: String, raw: String, err: DurationParseError },
    /// A healthcheck carried an empty test vector.
    EmptyHealthCheckTest{ name: String },
    /// A list-form environment entry was not parseable.
    IllegalEnvironmentEntry{ name: String, raw: String },
    /// A named secret or config is not backed by a file on disk.
    NotFileBacked{ what: &'static str, name: String },
}

impl Display for ComposeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ComposeError::*;
        match self {
            FileOpenError{ path, err }  => write!(f, "Failed to open compose file '{}': {}", path.display(), err),
            FileReadError{ path, err }  => write!(f, "Failed to read compose file '{}': {}", path.display(), err),
            FileParseError{ path, err } => write!(f, "Failed to parse compose file '{}' as YAML: {}", path.display(), err),
            DirResolveError{ path, err } => write!(f, "Failed to resolve directory of compose file '{}': {}", path.display(), err),

            NoServices{ path }                                    => write!(f, "Compose file '{}' does not define any services", path.display()),
            MissingImageOrBuild{ name }                           => write!(f, "Service '{}' defines neither an image nor a build context", name),
            IllegalPortString{ name, raw }                        => write!(f, "Service '{}' has unparseable port '{}' (expected '[HOST:]CONTAINER[/PROTOCOL]')", name, raw),
            IllegalPortNumber{ name, raw, err }                   => write!(f, "Service '{}' has illegal port number in '{}': {}", name, raw, err),
            IllegalPortProtocol{ name, raw, err }                 => write!(f, "Service '{}' has illegal protocol in port '{}': {}", name, raw, err),
            DuplicateContainerPort{ service, other, port, protocol } => write!(f, "Services '{}' and '{}' both publish container port {}/{}", service, other, port, protocol),
            DuplicateHostPort{ service, other, port }             => write!(f, "Services '{}' and '{}' both claim host port {}", service, other, port),
            IllegalVolumeString{ name, raw }                      => write!(f, "Service '{}' has unparseable volume '{}' (expected '[SOURCE:]TARGET[:ro|rw]')", name, raw),
            UnknownVolumeType{ name, raw }                        => write!(f, "Service '{}' has volume of unknown type '{}' (expected 'bind' or 'volume')", name, raw),
            UndeclaredVolume{ name, volume }                      => write!(f, "Service '{}' references volume '{}', which is not declared in the top-level 'volumes' section", name, volume),
            IllegalCondition{ name, dependency, err }             => write!(f, "Service '{}' has illegal condition on dependency '{}': {}", name, dependency, err),
            IllegalDuration{ name, raw, err }                     => write!(f, "Service '{}' has illegal duration '{}' in its healthcheck: {}", name, raw, err),
            EmptyHealthCheckTest{ name }                          => write!(f, "Service '{}' has a healthcheck with an empty test", name),
            IllegalEnvironmentEntry{ name, raw }                  => write!(f, "Service '{}' has unparseable environment entry '{}' (expected 'KEY=VALUE' or 'KEY')", name, raw),
            NotFileBacked{ what, name }                           => write!(f, "{} '{}' is not backed by a file on disk (only file-based {}s are supported)", what, name, what),
        }
    }
}

impl Error for ComposeError {}



/// Errors that relate to the on-disk workspace.
#[derive(Debug)]
pub enum WorkspaceError {
    /// Failed to create a directory.
    DirCreateError{ what: &'static str, path: PathBuf, err: std::io::Error },
    /// Failed to remove a directory.
    DirRemoveError{ what: &'static str, path: PathBuf, err: std::io::Error },
    /// Failed to write a file.
    FileWriteError{ what: &'static str, path: PathBuf, err: std::io::Error },
    /// Failed to serialize the environment spec.
    SpecSerializeError{ err: serde_json::Error },
    /// Failed to copy a directory tree while ejecting.
    CopyError{ source: PathBuf, target: PathBuf, err: fs_extra::error::Error },
}

impl Display for WorkspaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use WorkspaceError::*;
        match self {
            DirCreateError{ what, path, err } => write!(f, "Failed to create {} directory '{}': {}", what, path.display(), err),
            DirRemoveError{ what, path, err } => write!(f, "Failed to remove {} directory '{}': {}", what, path.display(), err),
            FileWriteError{ what, path, err } => write!(f, "Failed to write {} file '{}': {}", what, path.display(), err),
            SpecSerializeError{ err }         => write!(f, "Failed to serialize environment spec to JSON: {}", err),
            CopyError{ source, target, err }  => write!(f, "Failed to copy '{}' to '{}': {}", source.display(), target.display(), err),
        }
    }
}

impl Error for WorkspaceError {}
