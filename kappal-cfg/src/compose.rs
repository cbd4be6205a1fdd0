//  COMPOSE.rs
//
//  Description:
//!   Defines the Compose file model and its normalization into the
//!   resolved [`Project`] the rest of the framework consumes. The raw
//!   model accepts the sugar forms users actually write (string-or-list
//!   commands, short-form ports and volumes, list-form environments);
//!   the resolved model has exactly one shape for everything.
//

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::errors::{ConditionParseError, DurationParseError};
pub use crate::errors::ComposeError as Error;
use crate::project;
use crate::spec::{Protocol, PublishedPort, ServiceKind};


/***** HELPER FUNCTIONS *****/
/// Parses a Compose duration string (e.g., `1m30s`, `500ms`, `1.5s`).
///
/// # Arguments
/// - `raw`: The duration string to parse.
///
/// # Returns
/// The parsed duration.
///
/// # Errors
/// This function errors if the string is empty, has numbers without units or
/// carries a unit that is not one of `h`, `m`, `s`, `ms`, `us`.
pub fn parse_duration(raw: &str) -> Result<Duration, DurationParseError> {
    let raw: &str = raw.trim();
    if raw.is_empty() { return Err(DurationParseError::EmptyDuration); }

    let mut total: f64 = 0.0;
    let mut chars = raw.chars().peekable();
    while chars.peek().is_some() {
        // Eat the number part
        let mut number: String = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_digit() || *c == '.' { number.push(*c); chars.next(); } else { break; }
        }
        let value: f64 = match f64::from_str(&number) {
            Ok(value) => value,
            Err(err)  => { return Err(DurationParseError::IllegalNumber{ raw: raw.into(), err }); },
        };

        // Eat the unit part
        let mut unit: String = String::new();
        while let Some(c) = chars.peek() {
            if c.is_ascii_alphabetic() { unit.push(*c); chars.next(); } else { break; }
        }
        let factor: f64 = match unit.as_str() {
            "h"  => 3600.0,
            "m"  => 60.0,
            "s"  => 1.0,
            "ms" => 0.001,
            "us" => 0.000001,
            ""   => { return Err(DurationParseError::MissingUnit{ raw: raw.into() }); },
            _    => { return Err(DurationParseError::IllegalUnit{ raw: raw.into(), unit }); },
        };

        total += value * factor;
    }

    Ok(Duration::from_secs_f64(total))
}

/// Converts a scalar YAML value into the string Compose semantics want for it.
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b)   => Some(b.to_string()),
        _ => None,
    }
}





/***** RAW FILE MODEL *****/
/// A string that may also be written as a list of words.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    String(String),
    List(Vec<String>),
}

impl StringOrList {
    /// Normalizes to a word vector, splitting bare strings on whitespace.
    fn into_words(self) -> Vec<String> {
        match self {
            Self::String(s) => s.split_whitespace().map(|w| w.to_string()).collect(),
            Self::List(l)   => l,
        }
    }
}

/// The raw `build:` section, either a bare context string or the long form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawBuild {
    Context(String),
    Full{ context: String, dockerfile: Option<String> },
}

/// The raw `ports:` entry, short or long form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(u16),
    Short(String),
    Long{ target: u16, published: Option<u16>, protocol: Option<String> },
}

/// The raw `environment:` section, list or map form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawEnvironment {
    List(Vec<String>),
    Map(HashMap<String, Option<serde_yaml::Value>>),
}

impl Default for RawEnvironment {
    #[inline]
    fn default() -> Self { Self::List(vec![]) }
}

/// The raw `volumes:` entry on a service, short or long form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawVolume {
    Short(String),
    Long{
        #[serde(rename = "type")]
        kind      : Option<String>,
        source    : Option<String>,
        target    : String,
        #[serde(default)]
        read_only : bool,
    },
}

/// The raw `networks:` section on a service, list or map form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawNetworks {
    List(Vec<String>),
    Map(HashMap<String, Option<serde_yaml::Value>>),
}

impl Default for RawNetworks {
    #[inline]
    fn default() -> Self { Self::List(vec![]) }
}

/// The raw `depends_on:` section, list sugar or the map-with-condition form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawDependsOn {
    List(Vec<String>),
    Map(HashMap<String, RawDependsOnEntry>),
}

impl Default for RawDependsOn {
    #[inline]
    fn default() -> Self { Self::List(vec![]) }
}

/// A single map-form `depends_on` entry.
#[derive(Clone, Debug, Deserialize)]
pub struct RawDependsOnEntry {
    pub condition: Option<String>,
}

/// The raw `deploy:` section (only the parts we consume).
#[derive(Clone, Debug, Deserialize)]
pub struct RawDeploy {
    pub replicas: Option<u32>,
}

/// A reference to a top-level secret or config, short or long form.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RawObjectRef {
    Name(String),
    Full{ source: String, target: Option<String> },
}

/// The raw `healthcheck:` section.
#[derive(Clone, Debug, Deserialize)]
pub struct RawHealthCheck {
    pub test         : Option<StringOrList>,
    pub interval     : Option<String>,
    pub timeout      : Option<String>,
    pub retries      : Option<u32>,
    pub start_period : Option<String>,
    #[serde(default)]
    pub disable      : bool,
}

/// A top-level secret or config declaration.
#[derive(Clone, Debug, Deserialize)]
pub struct RawFileObject {
    pub file     : Option<PathBuf>,
    #[serde(default)]
    pub external : bool,
}

/// A single service as written in the Compose file.
#[derive(Clone, Debug, Deserialize)]
pub struct RawService {
    pub image       : Option<String>,
    pub build       : Option<RawBuild>,
    #[serde(default)]
    pub ports       : Vec<RawPort>,
    #[serde(default)]
    pub environment : RawEnvironment,
    #[serde(default)]
    pub volumes     : Vec<RawVolume>,
    #[serde(default)]
    pub networks    : RawNetworks,
    #[serde(default)]
    pub depends_on  : RawDependsOn,
    pub command     : Option<StringOrList>,
    pub entrypoint  : Option<StringOrList>,
    pub deploy      : Option<RawDeploy>,
    #[serde(default)]
    pub secrets     : Vec<RawObjectRef>,
    #[serde(default)]
    pub configs     : Vec<RawObjectRef>,
    pub healthcheck : Option<RawHealthCheck>,
    pub restart     : Option<String>,
    #[serde(default)]
    pub profiles    : Vec<String>,
}

/// The Compose file as written on disk, before normalization.
#[derive(Clone, Debug, Deserialize)]
pub struct ComposeFile {
    pub version  : Option<String>,
    pub services : HashMap<String, RawService>,
    #[serde(default)]
    pub volumes  : HashMap<String, Option<serde_yaml::Value>>,
    #[serde(default)]
    pub networks : HashMap<String, Option<serde_yaml::Value>>,
    #[serde(default)]
    pub secrets  : HashMap<String, RawFileObject>,
    #[serde(default)]
    pub configs  : HashMap<String, RawFileObject>,
}

impl ComposeFile {
    /// Constructor for the ComposeFile that reads it from the given path.
    ///
    /// # Arguments
    /// - `path`: The path to read the Compose file from.
    ///
    /// # Returns
    /// A new ComposeFile with the raw contents of the file.
    ///
    /// # Errors
    /// This function errors if we failed to read the file or it was not valid YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path: &Path = path.as_ref();

        // Get the raw file to parse
        let mut raw: String = String::new();
        {
            let mut handle: File = match File::open(path) {
                Ok(handle) => handle,
                Err(err)   => { return Err(Error::FileOpenError{ path: path.into(), err }); },
            };
            if let Err(err) = handle.read_to_string(&mut raw) { return Err(Error::FileReadError{ path: path.into(), err }); }
        }

        // Parse with serde
        match serde_yaml::from_str(&raw) {
            Ok(file) => Ok(file),
            Err(err) => Err(Error::FileParseError{ path: path.into(), err }),
        }
    }
}





/***** RESOLVED MODEL *****/
/// The condition attached to a `depends_on` edge.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DependCondition {
    /// The prerequisite merely has to have been started.
    Started,
    /// The prerequisite has to report a healthy state.
    Healthy,
    /// The prerequisite has to have run to successful completion.
    CompletedSuccessfully,
}

impl FromStr for DependCondition {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service_started"                => Ok(Self::Started),
            "service_healthy"                => Ok(Self::Healthy),
            "service_completed_successfully" => Ok(Self::CompletedSuccessfully),

            raw => Err(ConditionParseError::UnknownCondition{ raw: raw.into() }),
        }
    }
}

/// The kind of a service volume mount.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VolumeKind {
    /// A host path mounted into the container.
    Bind,
    /// A named, provisioned volume.
    Volume,
}

/// A single, normalized volume mount on a service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceVolume {
    /// Whether this is a bind mount or a named volume.
    pub kind      : VolumeKind,
    /// The host path (bind) or the original volume name (volume).
    pub source    : String,
    /// The absolute mount path inside the container.
    pub target    : String,
    /// Whether the mount is read-only.
    pub read_only : bool,
}

/// A normalized reference from a service to a top-level secret or config.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectRef {
    /// The name of the top-level object.
    pub source : String,
    /// The mount target, if the service overrides the default.
    pub target : Option<String>,
}

/// A normalized build section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Build {
    /// The build context directory, resolved against the compose directory.
    pub context    : PathBuf,
    /// The dockerfile within the context.
    pub dockerfile : String,
}

/// A normalized healthcheck.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HealthCheck {
    /// The test vector, first element one of `CMD`, `CMD-SHELL`, `NONE` or a raw command word.
    pub test         : Vec<String>,
    /// Time between probe attempts.
    pub interval     : Duration,
    /// Time before a single attempt counts as failed.
    pub timeout      : Duration,
    /// Attempts before the container counts as unhealthy.
    pub retries      : u32,
    /// Grace period before the first counted attempt.
    pub start_period : Duration,
}

/// A fully normalized Compose service.
#[derive(Clone, Debug)]
pub struct Service {
    /// The service name as written in the Compose file.
    pub name        : String,
    /// The declared image, if any.
    pub image       : Option<String>,
    /// The build section, if any. At least one of `image`/`build` is set.
    pub build       : Option<Build>,
    /// The published ports of this service.
    pub ports       : Vec<PublishedPort>,
    /// The environment of the main container.
    pub environment : BTreeMap<String, String>,
    /// The volume mounts of the main container.
    pub volumes     : Vec<ServiceVolume>,
    /// The networks this service joins, in declaration order.
    pub networks    : Vec<String>,
    /// The dependency map of this service.
    pub depends_on  : BTreeMap<String, DependCondition>,
    /// The Compose `command` (maps to Kubernetes `args`).
    pub command     : Option<Vec<String>>,
    /// The Compose `entrypoint` (maps to Kubernetes `command`).
    pub entrypoint  : Option<Vec<String>>,
    /// The number of desired replicas.
    pub replicas    : u32,
    /// References to top-level secrets.
    pub secrets     : Vec<ObjectRef>,
    /// References to top-level configs.
    pub configs     : Vec<ObjectRef>,
    /// The healthcheck, if any.
    pub healthcheck : Option<HealthCheck>,
    /// The raw restart policy, if any.
    pub restart     : Option<String>,
    /// The profiles this service is constrained to.
    pub profiles    : Vec<String>,
}

impl Service {
    /// Returns the workload kind this service maps to.
    ///
    /// Only an explicit `restart: "no"` makes a service run-to-completion;
    /// everything else (including an absent policy) is long-running.
    #[inline]
    pub fn kind(&self) -> ServiceKind {
        if self.restart.as_deref() == Some("no") { ServiceKind::Job } else { ServiceKind::Deployment }
    }

    /// Returns whether this service is excluded from default activation.
    #[inline]
    pub fn is_profiled(&self) -> bool { !self.profiles.is_empty() }

    /// Returns the bind-mount targets this service can write to.
    pub fn writable_bind_targets(&self) -> Vec<String> {
        self.volumes.iter()
            .filter(|v| v.kind == VolumeKind::Bind && !v.read_only)
            .map(|v| v.target.clone())
            .collect()
    }
}

/// The resolved Compose project: what the transformer and the orchestrators consume.
#[derive(Clone, Debug)]
pub struct Project {
    /// The project identity (also the namespace name).
    pub name      : String,
    /// The canonical compose directory.
    pub directory : PathBuf,
    /// The compose file the project was loaded from.
    pub file      : PathBuf,
    /// The services, keyed (and thus iterated) by name.
    pub services  : BTreeMap<String, Service>,
    /// The declared named volumes, by original name.
    pub volumes   : Vec<String>,
    /// The declared networks, by original name.
    pub networks  : Vec<String>,
    /// The declared secrets, name to backing file (resolved against the directory).
    pub secrets   : BTreeMap<String, PathBuf>,
    /// The declared configs, name to backing file (resolved against the directory).
    pub configs   : BTreeMap<String, PathBuf>,
}

impl Project {
    /// Loads and resolves the project in the given Compose file.
    ///
    /// # Arguments
    /// - `file`: The path of the Compose file to load.
    /// - `user_name`: An explicit project name, if the user gave one.
    /// - `host_hint`: The host-side view of the compose directory, if kappal runs in a container.
    ///
    /// # Returns
    /// The resolved Project, with every sugar form normalized away.
    ///
    /// # Errors
    /// This function errors if the file could not be read, was not valid
    /// Compose, or failed one of the validation rules (undeclared volumes,
    /// illegal ports, unknown conditions, ...).
    pub fn resolve(file: impl AsRef<Path>, user_name: Option<&str>, host_hint: Option<&str>) -> Result<Self, Error> {
        let file: &Path = file.as_ref();

        // Resolve the directory holding the file
        let directory: PathBuf = match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.into(),
            _ => PathBuf::from("."),
        };
        let directory: PathBuf = match std::fs::canonicalize(&directory) {
            Ok(dir)  => dir,
            Err(err) => { return Err(Error::DirResolveError{ path: directory, err }); },
        };

        // Read the raw file and derive the identity
        let raw: ComposeFile = ComposeFile::from_path(file)?;
        if raw.services.is_empty() { return Err(Error::NoServices{ path: file.into() }); }
        let name: String = project::resolve(user_name, &directory, host_hint);
        debug!("Resolving compose project '{}' ({} service(s))", name, raw.services.len());

        // Collect the top-level objects first; services validate against them
        let mut volumes: Vec<String> = raw.volumes.keys().cloned().collect();
        volumes.sort();
        let mut networks: Vec<String> = raw.networks.keys().cloned().collect();
        networks.sort();
        let secrets: BTreeMap<String, PathBuf> = Self::resolve_file_objects("secret", &directory, raw.secrets)?;
        let configs: BTreeMap<String, PathBuf> = Self::resolve_file_objects("config", &directory, raw.configs)?;

        // Normalize every service
        let mut services: BTreeMap<String, Service> = BTreeMap::new();
        for (sname, rsvc) in raw.services {
            let service: Service = Self::resolve_service(&sname, rsvc, &directory, &mut volumes)?;
            services.insert(sname, service);
        }

        Ok(Self{ name, directory, file: file.into(), services, volumes, networks, secrets, configs })
    }

    /// Resolves the top-level secrets or configs section.
    fn resolve_file_objects(what: &'static str, directory: &Path, raw: HashMap<String, RawFileObject>) -> Result<BTreeMap<String, PathBuf>, Error> {
        let mut res: BTreeMap<String, PathBuf> = BTreeMap::new();
        for (name, obj) in raw {
            let file: PathBuf = match obj.file {
                Some(file) if !obj.external => file,
                _ => { return Err(Error::NotFileBacked{ what, name }); },
            };
            let file: PathBuf = if file.is_relative() { directory.join(file) } else { file };
            res.insert(name, file);
        }
        Ok(res)
    }

    /// Normalizes a single raw service.
    fn resolve_service(name: &str, raw: RawService, directory: &Path, volumes: &mut Vec<String>) -> Result<Service, Error> {
        // Image and/or build
        let build: Option<Build> = raw.build.map(|b| {
            let (context, dockerfile): (String, Option<String>) = match b {
                RawBuild::Context(context)          => (context, None),
                RawBuild::Full{ context, dockerfile } => (context, dockerfile),
            };
            let context: PathBuf = PathBuf::from(&context);
            let context: PathBuf = if context.is_relative() { directory.join(context) } else { context };
            Build{ context, dockerfile: dockerfile.unwrap_or_else(|| "Dockerfile".into()) }
        });
        if raw.image.is_none() && build.is_none() { return Err(Error::MissingImageOrBuild{ name: name.into() }); }

        // Ports
        let mut ports: Vec<PublishedPort> = Vec::with_capacity(raw.ports.len());
        for port in raw.ports {
            ports.push(Self::resolve_port(name, port)?);
        }

        // Environment
        let environment: BTreeMap<String, String> = match raw.environment {
            RawEnvironment::List(entries) => {
                let mut env: BTreeMap<String, String> = BTreeMap::new();
                for entry in entries {
                    match entry.split_once('=') {
                        Some((key, value)) => { env.insert(key.into(), value.into()); },
                        // A bare key inherits from the calling environment, or is dropped
                        None => {
                            if entry.is_empty() { return Err(Error::IllegalEnvironmentEntry{ name: name.into(), raw: entry }); }
                            if let Ok(value) = std::env::var(&entry) { env.insert(entry, value); }
                        },
                    }
                }
                env
            },
            RawEnvironment::Map(map) => {
                let mut env: BTreeMap<String, String> = BTreeMap::new();
                for (key, value) in map {
                    match value.as_ref().and_then(scalar_to_string) {
                        Some(value) => { env.insert(key, value); },
                        None => {
                            if let Ok(value) = std::env::var(&key) { env.insert(key, value); }
                        },
                    }
                }
                env
            },
        };

        // Volumes
        let mut svolumes: Vec<ServiceVolume> = Vec::with_capacity(raw.volumes.len());
        for volume in raw.volumes {
            svolumes.push(Self::resolve_volume(name, volume, directory, volumes)?);
        }

        // Networks
        let networks: Vec<String> = match raw.networks {
            RawNetworks::List(list) => list,
            RawNetworks::Map(map)   => { let mut keys: Vec<String> = map.into_keys().collect(); keys.sort(); keys },
        };

        // Dependencies
        let depends_on: BTreeMap<String, DependCondition> = match raw.depends_on {
            RawDependsOn::List(list) => list.into_iter().map(|dep| (dep, DependCondition::Started)).collect(),
            RawDependsOn::Map(map)   => {
                let mut deps: BTreeMap<String, DependCondition> = BTreeMap::new();
                for (dep, entry) in map {
                    let condition: DependCondition = match entry.condition.as_deref() {
                        Some(raw) => match DependCondition::from_str(raw) {
                            Ok(condition) => condition,
                            Err(err)      => { return Err(Error::IllegalCondition{ name: name.into(), dependency: dep, err }); },
                        },
                        None => DependCondition::Started,
                    };
                    deps.insert(dep, condition);
                }
                deps
            },
        };

        // Healthcheck
        let healthcheck: Option<HealthCheck> = match raw.healthcheck {
            Some(hc) => Self::resolve_healthcheck(name, hc)?,
            None     => None,
        };

        // Object references
        let secrets: Vec<ObjectRef> = raw.secrets.into_iter().map(|r| match r {
            RawObjectRef::Name(source)          => ObjectRef{ source, target: None },
            RawObjectRef::Full{ source, target } => ObjectRef{ source, target },
        }).collect();
        let configs: Vec<ObjectRef> = raw.configs.into_iter().map(|r| match r {
            RawObjectRef::Name(source)          => ObjectRef{ source, target: None },
            RawObjectRef::Full{ source, target } => ObjectRef{ source, target },
        }).collect();

        Ok(Service {
            name        : name.into(),
            image       : raw.image,
            build,
            ports,
            environment,
            volumes     : svolumes,
            networks,
            depends_on,
            command     : raw.command.map(StringOrList::into_words),
            entrypoint  : raw.entrypoint.map(StringOrList::into_words),
            replicas    : raw.deploy.and_then(|d| d.replicas).unwrap_or(1),
            secrets,
            configs,
            healthcheck,
            restart     : raw.restart,
            profiles    : raw.profiles,
        })
    }

    /// Normalizes a single port declaration.
    fn resolve_port(name: &str, raw: RawPort) -> Result<PublishedPort, Error> {
        match raw {
            RawPort::Number(port) => Ok(PublishedPort{ host: port, container: port, protocol: Protocol::Tcp }),

            RawPort::Short(raw_str) => {
                // Split off the protocol first
                let (ports, protocol): (&str, Protocol) = match raw_str.split_once('/') {
                    Some((ports, proto)) => match Protocol::from_str(proto) {
                        Ok(protocol) => (ports, protocol),
                        Err(err)     => { return Err(Error::IllegalPortProtocol{ name: name.into(), raw: raw_str.clone(), err }); },
                    },
                    None => (raw_str.as_str(), Protocol::Tcp),
                };

                // Then split host from container (an optional bind IP is ignored)
                let parts: Vec<&str> = ports.split(':').collect();
                let (host, container): (&str, &str) = match parts.len() {
                    1 => (parts[0], parts[0]),
                    2 => (parts[0], parts[1]),
                    3 => (parts[1], parts[2]),
                    _ => { return Err(Error::IllegalPortString{ name: name.into(), raw: raw_str.clone() }); },
                };

                let host: u16 = match u16::from_str(host) {
                    Ok(host) => host,
                    Err(err) => { return Err(Error::IllegalPortNumber{ name: name.into(), raw: raw_str.clone(), err }); },
                };
                let container: u16 = match u16::from_str(container) {
                    Ok(container) => container,
                    Err(err)      => { return Err(Error::IllegalPortNumber{ name: name.into(), raw: raw_str, err }); },
                };
                Ok(PublishedPort{ host, container, protocol })
            },

            RawPort::Long{ target, published, protocol } => {
                let protocol: Protocol = match protocol.as_deref() {
                    Some(raw_str) => match Protocol::from_str(raw_str) {
                        Ok(protocol) => protocol,
                        Err(err)     => { return Err(Error::IllegalPortProtocol{ name: name.into(), raw: raw_str.into(), err }); },
                    },
                    None => Protocol::Tcp,
                };
                Ok(PublishedPort{ host: published.unwrap_or(target), container: target, protocol })
            },
        }
    }

    /// Normalizes a single volume declaration.
    ///
    /// Anonymous volumes (a bare target path) are promoted to named volumes
    /// with a derived name, which is appended to the declared set.
    fn resolve_volume(name: &str, raw: RawVolume, directory: &Path, volumes: &mut Vec<String>) -> Result<ServiceVolume, Error> {
        let (kind, source, target, read_only): (Option<String>, Option<String>, String, bool) = match raw {
            RawVolume::Short(raw_str) => {
                let parts: Vec<&str> = raw_str.split(':').collect();
                match parts.len() {
                    1 => (None, None, parts[0].into(), false),
                    2 => (None, Some(parts[0].into()), parts[1].into(), false),
                    3 => match parts[2] {
                        "ro" => (None, Some(parts[0].into()), parts[1].into(), true),
                        "rw" => (None, Some(parts[0].into()), parts[1].into(), false),
                        _    => { return Err(Error::IllegalVolumeString{ name: name.into(), raw: raw_str.clone() }); },
                    },
                    _ => { return Err(Error::IllegalVolumeString{ name: name.into(), raw: raw_str.clone() }); },
                }
            },
            RawVolume::Long{ kind, source, target, read_only } => (kind, source, target, read_only),
        };

        // Decide bind vs volume: an explicit type wins, else the source shape decides
        let is_bind: bool = match kind.as_deref() {
            Some("bind")   => true,
            Some("volume") => false,
            Some(raw_kind) => { return Err(Error::UnknownVolumeType{ name: name.into(), raw: raw_kind.into() }); },
            None => source.as_deref().map(|s| s.starts_with('/') || s.starts_with("./") || s.starts_with("../") || s.starts_with('~')).unwrap_or(false),
        };

        if is_bind {
            // Resolve relative host paths against the compose directory
            let source: String = source.unwrap_or_default();
            let source: String = if source.starts_with("./") || source.starts_with("../") {
                directory.join(&source).display().to_string()
            } else {
                source
            };
            Ok(ServiceVolume{ kind: VolumeKind::Bind, source, target, read_only })
        } else {
            match source {
                Some(source) => {
                    // Named volumes must be declared at the top level
                    if !volumes.contains(&source) { return Err(Error::UndeclaredVolume{ name: name.into(), volume: source }); }
                    Ok(ServiceVolume{ kind: VolumeKind::Volume, source, target, read_only })
                },
                None => {
                    // Anonymous volume; derive a name and declare it on the fly
                    let source: String = format!("anon-{}", project::sanitize(target.replace('/', "-")));
                    if !volumes.contains(&source) { volumes.push(source.clone()); }
                    Ok(ServiceVolume{ kind: VolumeKind::Volume, source, target, read_only })
                },
            }
        }
    }

    /// Normalizes a healthcheck section.
    fn resolve_healthcheck(name: &str, raw: RawHealthCheck) -> Result<Option<HealthCheck>, Error> {
        // A disabled check is the same as `test: ["NONE"]`
        let test: Vec<String> = if raw.disable {
            vec!["NONE".into()]
        } else {
            match raw.test {
                Some(StringOrList::String(s)) => vec!["CMD-SHELL".into(), s],
                Some(StringOrList::List(l))   => l,
                None                          => { return Ok(None); },
            }
        };
        if test.is_empty() { return Err(Error::EmptyHealthCheckTest{ name: name.into() }); }

        let parse = |raw_str: Option<&str>, default: Duration| -> Result<Duration, Error> {
            match raw_str {
                Some(raw_str) => match parse_duration(raw_str) {
                    Ok(duration) => Ok(duration),
                    Err(err)     => Err(Error::IllegalDuration{ name: name.into(), raw: raw_str.into(), err }),
                },
                None => Ok(default),
            }
        };

        Ok(Some(HealthCheck {
            test,
            interval     : parse(raw.interval.as_deref(), Duration::from_secs(30))?,
            timeout      : parse(raw.timeout.as_deref(), Duration::from_secs(30))?,
            retries      : raw.retries.unwrap_or(3),
            start_period : parse(raw.start_period.as_deref(), Duration::ZERO)?,
        }))
    }

    /// Collects the published ports of every non-profiled service.
    ///
    /// # Returns
    /// The full, validated set of published ports for this project.
    ///
    /// # Errors
    /// This function errors if two services claim the same container
    /// port/protocol pair, or the same host port.
    pub fn published_ports(&self) -> Result<Vec<PublishedPort>, Error> {
        let mut claimed_container: HashMap<(u16, Protocol), &str> = HashMap::new();
        let mut claimed_host: HashMap<u16, &str> = HashMap::new();
        let mut res: Vec<PublishedPort> = Vec::new();

        for service in self.services.values() {
            if service.is_profiled() { continue; }
            for port in &service.ports {
                if let Some(other) = claimed_container.insert((port.container, port.protocol), &service.name) {
                    return Err(Error::DuplicateContainerPort{ service: service.name.clone(), other: other.into(), port: port.container, protocol: port.protocol });
                }
                if let Some(other) = claimed_host.insert(port.host, &service.name) {
                    return Err(Error::DuplicateHostPort{ service: service.name.clone(), other: other.into(), port: port.host });
                }
                res.push(*port);
            }
        }
        Ok(res)
    }

    /// Returns the non-profiled services, in alphabetical order.
    #[inline]
    pub fn active_services(&self) -> impl Iterator<Item = &Service> {
        self.services.values().filter(|s| !s.is_profiled())
    }
}



#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    /// Writes the given compose content to a tempdir and resolves it.
    fn project_of(content: &str) -> Project {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yaml");
        let mut handle = File::create(&path).unwrap();
        handle.write_all(content.as_bytes()).unwrap();
        Project::resolve(&path, Some("testproj"), None).unwrap()
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn minimal_service() {
        let project = project_of(r#"
services:
  web:
    image: nginx:1.25
    ports:
      - "8080:80"
"#);
        assert_eq!(project.name, "testproj");
        let web = &project.services["web"];
        assert_eq!(web.image.as_deref(), Some("nginx:1.25"));
        assert_eq!(web.ports, vec![PublishedPort{ host: 8080, container: 80, protocol: Protocol::Tcp }]);
        assert_eq!(web.kind(), ServiceKind::Deployment);
        assert_eq!(web.replicas, 1);
    }

    #[test]
    fn port_forms() {
        let project = project_of(r#"
services:
  svc:
    image: img
    ports:
      - "8080:80"
      - "53:53/udp"
      - "127.0.0.1:9090:90"
      - target: 443
        published: 8443
"#);
        let ports = &project.services["svc"].ports;
        assert_eq!(ports[0], PublishedPort{ host: 8080, container: 80, protocol: Protocol::Tcp });
        assert_eq!(ports[1], PublishedPort{ host: 53, container: 53, protocol: Protocol::Udp });
        assert_eq!(ports[2], PublishedPort{ host: 9090, container: 90, protocol: Protocol::Tcp });
        assert_eq!(ports[3], PublishedPort{ host: 8443, container: 443, protocol: Protocol::Tcp });
    }

    #[test]
    fn restart_classifies() {
        let project = project_of(r#"
services:
  migrate:
    image: img
    restart: "no"
  app:
    image: img
"#);
        assert_eq!(project.services["migrate"].kind(), ServiceKind::Job);
        assert_eq!(project.services["app"].kind(), ServiceKind::Deployment);
    }

    #[test]
    fn depends_on_forms() {
        let project = project_of(r#"
services:
  db:
    image: postgres
  migrate:
    image: img
    restart: "no"
  app:
    image: img
    depends_on:
      db:
        condition: service_healthy
      migrate:
        condition: service_completed_successfully
  naive:
    image: img
    depends_on:
      - db
"#);
        let app = &project.services["app"];
        assert_eq!(app.depends_on["db"], DependCondition::Healthy);
        assert_eq!(app.depends_on["migrate"], DependCondition::CompletedSuccessfully);
        assert_eq!(project.services["naive"].depends_on["db"], DependCondition::Started);
    }

    #[test]
    fn volume_forms() {
        let project = project_of(r#"
services:
  db:
    image: postgres
    volumes:
      - data:/var/lib/postgresql/data
      - ./conf:/etc/postgresql:ro
      - type: bind
        source: /var/log
        target: /host-logs
        read_only: true
volumes:
  data:
"#);
        let volumes = &project.services["db"].volumes;
        assert_eq!(volumes[0], ServiceVolume{ kind: VolumeKind::Volume, source: "data".into(), target: "/var/lib/postgresql/data".into(), read_only: false });
        assert_eq!(volumes[1].kind, VolumeKind::Bind);
        assert!(volumes[1].source.ends_with("/conf"));
        assert!(volumes[1].read_only);
        assert_eq!(volumes[2], ServiceVolume{ kind: VolumeKind::Bind, source: "/var/log".into(), target: "/host-logs".into(), read_only: true });
        assert!(project.services["db"].writable_bind_targets().is_empty());
    }

    #[test]
    fn undeclared_volume_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yaml");
        let mut handle = File::create(&path).unwrap();
        handle.write_all(b"services:\n  db:\n    image: postgres\n    volumes:\n      - nope:/data\n").unwrap();
        assert!(matches!(Project::resolve(&path, Some("t"), None), Err(Error::UndeclaredVolume{ .. })));
    }

    #[test]
    fn healthcheck_forms() {
        let project = project_of(r#"
services:
  db:
    image: postgres
    healthcheck:
      test: ["CMD-SHELL", "pg_isready -U postgres"]
      interval: 10s
      timeout: 5s
      retries: 3
"#);
        let hc = project.services["db"].healthcheck.as_ref().unwrap();
        assert_eq!(hc.test, vec!["CMD-SHELL", "pg_isready -U postgres"]);
        assert_eq!(hc.interval, Duration::from_secs(10));
        assert_eq!(hc.timeout, Duration::from_secs(5));
        assert_eq!(hc.retries, 3);
    }

    #[test]
    fn published_port_collisions() {
        let project = project_of(r#"
services:
  a:
    image: img
    ports: ["8080:80"]
  b:
    image: img
    ports: ["8081:80"]
"#);
        assert!(matches!(project.published_ports(), Err(Error::DuplicateContainerPort{ .. })));

        let project = project_of(r#"
services:
  a:
    image: img
    ports: ["8080:80"]
  b:
    image: img
    ports: ["8080:81"]
"#);
        assert!(matches!(project.published_ports(), Err(Error::DuplicateHostPort{ .. })));
    }

    #[test]
    fn profiles_excluded() {
        let project = project_of(r#"
services:
  app:
    image: img
  debug:
    image: img
    profiles: ["debug"]
"#);
        let active: Vec<&str> = project.active_services().map(|s| s.name.as_str()).collect();
        assert_eq!(active, vec!["app"]);
    }

    #[test]
    fn entrypoint_and_command_forms() {
        let project = project_of(r#"
services:
  a:
    image: img
    command: sleep infinity
  b:
    image: img
    entrypoint: ["/entry.sh"]
    command: ["serve", "--port", "80"]
"#);
        assert_eq!(project.services["a"].command.as_deref(), Some(&["sleep".to_string(), "infinity".to_string()][..]));
        assert!(project.services["a"].entrypoint.is_none());
        assert_eq!(project.services["b"].entrypoint.as_deref(), Some(&["/entry.sh".to_string()][..]));
    }
}
