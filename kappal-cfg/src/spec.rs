//  SPEC.rs
//
//  Description:
//!   Defines the types and names the kappal crates agree on: label names,
//!   environment variables, published ports, workload kinds and states,
//!   and the JSON envelope read by the init-barrier agent.
//

use std::fmt::{Display, Formatter, Result as FResult};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use crate::errors::ProtocolParseError;


/***** CONSTANTS *****/
/// The label carried by every Docker and Kubernetes resource we generate.
pub const LABEL_PROJECT: &str = "project";
/// The label carried by every workload, naming its Compose service.
pub const LABEL_SERVICE: &str = "service";
/// The label carried by pods bound to a non-default Compose network.
pub const LABEL_NETWORK: &str = "network";
/// The label carried by persistent claims, naming the original volume.
pub const LABEL_VOLUME: &str = "volume";
/// The label distinguishing the cluster container from workload leftovers.
pub const LABEL_ROLE: &str = "role";
/// The value of [`LABEL_ROLE`] on the cluster container.
pub const ROLE_CLUSTER: &str = "cluster";

/// The environment variable carrying the host-side view of the compose directory when kappal itself runs in a container.
pub const ENV_HOST_DIR: &str = "KAPPAL_HOST_DIR";
/// The environment variable overriding the init-barrier agent image.
pub const ENV_INIT_IMAGE: &str = "KAPPAL_INIT_IMAGE";
/// The environment variable carrying the init-barrier agent's JSON spec.
pub const ENV_INIT_SPEC: &str = "KAPPAL_INIT_SPEC";

/// The image tag under which the init-barrier agent is known to the cluster.
pub const DEFAULT_INIT_IMAGE: &str = "kappal-init:latest";
/// The name of the init-barrier agent binary (both on disk and as argv[0]).
pub const INIT_BINARY_NAME: &str = "kappal-init";





/***** LIBRARY *****/
/// The transport protocol of a published port.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Returns the protocol name as Kubernetes spells it (`TCP` / `UDP`).
    #[inline]
    pub fn k8s(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use Protocol::*;
        match self {
            Tcp => write!(f, "tcp"),
            Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ProtocolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),

            raw => Err(ProtocolParseError::UnknownProtocol{ raw: raw.into() }),
        }
    }
}



/// A user-declared mapping of a host port to a container port.
///
/// Published ports are realized as port bindings on the cluster container,
/// never on the generated Kubernetes service fronts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct PublishedPort {
    /// The port bound on the host.
    pub host      : u16,
    /// The port the container listens on.
    pub container : u16,
    /// The transport protocol.
    pub protocol  : Protocol,
}

impl Display for PublishedPort {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult { write!(f, "{}:{}/{}", self.host, self.container, self.protocol) }
}



/// The kind of workload a Compose service maps to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// The service restarts, so it becomes a deployment-style workload.
    Deployment,
    /// The service has `restart: "no"`, so it becomes a run-to-completion job.
    Job,
}

impl Display for ServiceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ServiceKind::*;
        match self {
            Deployment => write!(f, "deployment"),
            Job        => write!(f, "job"),
        }
    }
}



/// The observed runtime state of a Compose service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Every desired replica is ready (deployments), or the job has active pods and no failures yet.
    Running,
    /// The workload exists but no replica is ready yet.
    Waiting,
    /// Some, but not all, desired replicas are ready.
    Partial,
    /// The job completed successfully.
    Completed,
    /// The job still has active pods but already recorded failures.
    Failing,
    /// The job has no active pods and recorded failures.
    Failed,
    /// The job exists but has not produced any pods yet.
    Pending,
    /// The service is declared in the Compose project but absent from the cluster.
    Missing,
    /// The cluster API could not be reached, so the state is unknown.
    Unavailable,
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ServiceState::*;
        match self {
            Running     => write!(f, "running"),
            Waiting     => write!(f, "waiting"),
            Partial     => write!(f, "partial"),
            Completed   => write!(f, "completed"),
            Failing     => write!(f, "failing"),
            Failed      => write!(f, "failed"),
            Pending     => write!(f, "pending"),
            Missing     => write!(f, "missing"),
            Unavailable => write!(f, "unavailable"),
        }
    }
}



/// The JSON envelope handed to the init-barrier agent through [`ENV_INIT_SPEC`].
///
/// The agent blocks pod startup until every named job has completed, every
/// named service has at least one ready pod, and every listed path has been
/// made writable.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSpec {
    /// The namespace in which to look for the prerequisites.
    pub namespace : String,
    /// The names of run-to-completion workloads that must have succeeded.
    pub wait_for_jobs : Vec<String>,
    /// The names of long-running services that must have a ready pod.
    pub wait_for_services : Vec<String>,
    /// Bind-mount targets that must exist and be writable before the main container starts.
    pub prepare_writable_paths : Vec<String>,
}

impl InitSpec {
    /// Returns whether this spec requires talking to the Kubernetes API at all.
    #[inline]
    pub fn has_waits(&self) -> bool { !self.wait_for_jobs.is_empty() || !self.wait_for_services.is_empty() }

    /// Returns whether this spec asks for anything whatsoever.
    #[inline]
    pub fn is_empty(&self) -> bool { !self.has_waits() && self.prepare_writable_paths.is_empty() }
}



#[cfg(test)]
mod tests {
    use super::*;

    /// The envelope must use the agreed camelCase field names on the wire.
    #[test]
    fn initspec_wire_names() {
        let spec = InitSpec {
            namespace              : "proj-0123abcd".into(),
            wait_for_jobs          : vec!["migrate".into()],
            wait_for_services      : vec![],
            prepare_writable_paths : vec!["/data".into()],
        };

        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"namespace\""));
        assert!(json.contains("\"waitForJobs\""));
        assert!(json.contains("\"waitForServices\""));
        assert!(json.contains("\"prepareWritablePaths\""));
    }

    #[test]
    fn protocol_roundtrip() {
        assert_eq!(Protocol::from_str("tcp").unwrap(), Protocol::Tcp);
        assert_eq!(Protocol::from_str("udp").unwrap(), Protocol::Udp);
        assert!(Protocol::from_str("sctp").is_err());
        assert_eq!(format!("{}", Protocol::Tcp), "tcp");
    }
}
