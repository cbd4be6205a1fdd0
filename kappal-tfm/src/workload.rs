//  WORKLOAD.rs
//
//  Description:
//!   Synthesizes the workload of one Compose service: the shared pod
//!   template (containers, volumes, probes, init-barrier) and the
//!   deployment- or job-shaped wrapper around it. Keeping one synthesis
//!   path for both kinds is what stops them from diverging.
//

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, HostPathVolumeSource, PersistentVolumeClaimVolumeSource,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use log::debug;

use kappal_cfg::compose::{DependCondition, VolumeKind};
use kappal_cfg::project::sanitize;
use kappal_cfg::spec::{self, InitSpec, ServiceKind};
use kappal_cfg::{Project, Service};

pub use crate::errors::TransformError as Error;
use crate::resources::{meta_of, Resource};


/***** CONSTANTS *****/
/// The backoff limit of run-to-completion workloads.
const JOB_BACKOFF_LIMIT: i32 = 3;

/// The fs-group set on pods that mount volumes, so non-root containers can
/// write to freshly provisioned claims.
const VOLUME_FS_GROUP: i64 = 999;





/***** HELPER FUNCTIONS *****/
/// Rounds the given duration up to whole seconds, with the given floor.
#[inline]
fn ceil_secs(duration: Duration, min: i32) -> i32 {
    let mut secs: i32 = duration.as_secs() as i32;
    if duration.subsec_nanos() > 0 { secs += 1; }
    secs.max(min)
}

/// Maps a Compose healthcheck to a readiness probe.
///
/// `CMD-SHELL` wraps its argument in `sh -c`; `CMD` uses the remaining
/// elements verbatim; `NONE` yields no probe; anything else is treated as a
/// raw shell command. Interval and timeout take a 1-second floor.
pub fn probe_of(check: &kappal_cfg::compose::HealthCheck) -> Option<Probe> {
    let command: Vec<String> = match check.test.first().map(String::as_str) {
        Some("NONE") => { return None; },
        Some("CMD")  => check.test[1..].to_vec(),
        Some("CMD-SHELL") => {
            let script: String = check.test.get(1).cloned().unwrap_or_default();
            vec!["sh".into(), "-c".into(), script]
        },
        _ => vec!["sh".into(), "-c".into(), check.test.join(" ")],
    };
    if command.is_empty() { return None; }

    Some(Probe {
        exec                  : Some(ExecAction{ command: Some(command) }),
        period_seconds        : Some(ceil_secs(check.interval, 1)),
        timeout_seconds       : Some(ceil_secs(check.timeout, 1)),
        failure_threshold     : Some(check.retries as i32),
        initial_delay_seconds : if check.start_period > Duration::ZERO { Some(ceil_secs(check.start_period, 1)) } else { None },
        ..Default::default()
    })
}

/// Resolves the image a service's container runs.
///
/// A service with a build context always runs its locally built tag. A
/// service that shares its declared image with a building service borrows
/// the builder's tag, so in-cluster references resolve without a registry.
pub fn image_of(project: &Project, service: &Service) -> String {
    if service.build.is_some() {
        return format!("{}-{}:latest", project.name, sanitize(&service.name));
    }
    let image: &str = service.image.as_deref().unwrap_or_default();

    // Borrow a builder's local tag when one builds this same image
    for other in project.services.values() {
        if other.name != service.name && other.build.is_some() && other.image.as_deref() == Some(image) {
            return format!("{}-{}:latest", project.name, sanitize(&other.name));
        }
    }
    image.into()
}

/// The prerequisites a service's init-barrier waits on, if any.
#[derive(Clone, Debug, Default)]
pub struct BarrierNeeds {
    /// Run-to-completion prerequisites (referenced with `service_completed_successfully`).
    pub wait_for_jobs     : Vec<String>,
    /// Long-running prerequisites (referenced with `service_healthy`).
    pub wait_for_services : Vec<String>,
    /// Writable bind-mount targets to prepare.
    pub writable_paths    : Vec<String>,
}

impl BarrierNeeds {
    /// Returns whether any barrier is needed at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.wait_for_jobs.is_empty() && self.wait_for_services.is_empty() && self.writable_paths.is_empty()
    }
}

/// Computes the init-barrier needs of one service.
///
/// Prerequisites that target profiled services are ignored (the orchestrator
/// surfaces a compatibility note for them); `service_healthy` on a job-style
/// prerequisite and `service_completed_successfully` on a long-running one
/// are ignored too, as neither state can ever be reached.
pub fn barrier_of(project: &Project, service: &Service) -> BarrierNeeds {
    let mut needs: BarrierNeeds = BarrierNeeds {
        writable_paths : service.writable_bind_targets(),
        ..Default::default()
    };

    for (dependency, condition) in &service.depends_on {
        let target: &Service = match project.services.get(dependency) {
            Some(target) if !target.is_profiled() => target,
            _ => { continue; },
        };
        match (condition, target.kind()) {
            (DependCondition::CompletedSuccessfully, ServiceKind::Job) => needs.wait_for_jobs.push(dependency.clone()),
            (DependCondition::Healthy, ServiceKind::Deployment)        => needs.wait_for_services.push(dependency.clone()),
            _ => {},
        }
    }
    needs.wait_for_jobs.sort();
    needs.wait_for_services.sort();
    needs
}





/***** LIBRARY *****/
/// Synthesizes the workload of one service: a deployment for long-running
/// services, a job for run-to-completion ones, sharing one pod template.
///
/// # Arguments
/// - `project`: The project the service belongs to.
/// - `service`: The service to synthesize.
/// - `needs`: The service's precomputed barrier needs.
///
/// # Returns
/// The workload resource.
///
/// # Errors
/// This function errors if the service references an undeclared secret or
/// config.
pub fn workload_of(project: &Project, service: &Service, needs: &BarrierNeeds) -> Result<Resource, Error> {
    let name: String = sanitize(&service.name);
    debug!("Synthesizing {} '{}' for service '{}'", service.kind(), name, service.name);

    // The pod labels: project, service, and the first network (if any)
    let mut pod_labels: BTreeMap<String, String> = BTreeMap::new();
    pod_labels.insert(spec::LABEL_PROJECT.into(), project.name.clone());
    pod_labels.insert(spec::LABEL_SERVICE.into(), service.name.clone());
    if let Some(network) = service.networks.first() {
        pod_labels.insert(spec::LABEL_NETWORK.into(), network.clone());
    }

    // Volumes and their mounts
    let mut volumes: Vec<Volume> = vec![];
    let mut mounts: Vec<VolumeMount> = vec![];
    for (i, volume) in service.volumes.iter().enumerate() {
        let (vol_name, source): (String, Volume) = match volume.kind {
            VolumeKind::Bind => {
                let vol_name: String = format!("bind-{}", i);
                (vol_name.clone(), Volume {
                    name      : vol_name,
                    host_path : Some(HostPathVolumeSource{ path: volume.source.clone(), ..Default::default() }),
                    ..Default::default()
                })
            },
            VolumeKind::Volume => {
                let vol_name: String = sanitize(&volume.source);
                (vol_name.clone(), Volume {
                    name                    : vol_name.clone(),
                    persistent_volume_claim : Some(PersistentVolumeClaimVolumeSource {
                        claim_name : vol_name,
                        read_only  : if volume.read_only { Some(true) } else { None },
                    }),
                    ..Default::default()
                })
            },
        };
        // The same claim may back several mounts; one pod volume suffices
        if !volumes.iter().any(|v| v.name == source.name) { volumes.push(source); }
        mounts.push(VolumeMount {
            name       : vol_name,
            mount_path : volume.target.clone(),
            read_only  : if volume.read_only { Some(true) } else { None },
            ..Default::default()
        });
    }

    // Secret and config mounts (single files via subPath)
    for reference in &service.secrets {
        if !project.secrets.contains_key(&reference.source) {
            return Err(Error::UnknownObjectRef{ what: "secret", service: service.name.clone(), object: reference.source.clone() });
        }
        let vol_name: String = format!("secret-{}", sanitize(&reference.source));
        volumes.push(Volume {
            name   : vol_name.clone(),
            secret : Some(SecretVolumeSource{ secret_name: Some(sanitize(&reference.source)), ..Default::default() }),
            ..Default::default()
        });
        let target: &str = reference.target.as_deref().unwrap_or(&reference.source);
        let mount_path: String = if target.starts_with("/run/secrets/") { target.into() } else { format!("/run/secrets/{}", target) };
        mounts.push(VolumeMount {
            name       : vol_name,
            mount_path,
            sub_path   : Some(reference.source.clone()),
            read_only  : Some(true),
            ..Default::default()
        });
    }
    for reference in &service.configs {
        if !project.configs.contains_key(&reference.source) {
            return Err(Error::UnknownObjectRef{ what: "config", service: service.name.clone(), object: reference.source.clone() });
        }
        let vol_name: String = format!("config-{}", sanitize(&reference.source));
        volumes.push(Volume {
            name       : vol_name.clone(),
            config_map : Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource{ name: Some(sanitize(&reference.source)), ..Default::default() }),
            ..Default::default()
        });
        let mount_path: String = match reference.target.as_deref() {
            Some(target) => target.into(),
            None         => format!("/{}", reference.source),
        };
        mounts.push(VolumeMount {
            name       : vol_name,
            mount_path,
            sub_path   : Some(reference.source.clone()),
            read_only  : Some(true),
            ..Default::default()
        });
    }

    // The main container. The Compose entrypoint overrides the image's
    // entrypoint (-> command), the Compose command becomes the arguments.
    let container = Container {
        name            : name.clone(),
        image           : Some(image_of(project, service)),
        command         : service.entrypoint.clone(),
        args            : service.command.clone(),
        env             : if service.environment.is_empty() { None } else {
            Some(service.environment.iter().map(|(key, value)| EnvVar {
                name  : key.clone(),
                value : Some(value.clone()),
                ..Default::default()
            }).collect())
        },
        ports           : if service.ports.is_empty() { None } else {
            Some(service.ports.iter().map(|p| ContainerPort {
                container_port : p.container as i32,
                protocol       : Some(p.protocol.k8s().into()),
                ..Default::default()
            }).collect())
        },
        volume_mounts   : if mounts.is_empty() { None } else { Some(mounts) },
        readiness_probe : service.healthcheck.as_ref().and_then(probe_of),
        ..Default::default()
    };

    // The init-barrier, when the service has prerequisites or paths to prepare
    let init_containers: Option<Vec<Container>> = if needs.is_empty() { None } else {
        Some(vec![ init_container(project, service, needs) ])
    };

    // Assemble the shared pod template
    let pod = PodSpec {
        containers       : vec![ container ],
        init_containers,
        volumes          : if volumes.is_empty() { None } else { Some(volumes) },
        restart_policy   : if service.kind() == ServiceKind::Job { Some("Never".into()) } else { None },
        security_context : if service.volumes.is_empty() { None } else {
            Some(PodSecurityContext{ fs_group: Some(VOLUME_FS_GROUP), ..Default::default() })
        },
        ..Default::default()
    };
    let template = PodTemplateSpec {
        metadata : Some(ObjectMeta{ labels: Some(pod_labels), ..Default::default() }),
        spec     : Some(pod),
    };

    // And wrap it in the right workload kind
    let mut selector_labels: BTreeMap<String, String> = BTreeMap::new();
    selector_labels.insert(spec::LABEL_PROJECT.into(), project.name.clone());
    selector_labels.insert(spec::LABEL_SERVICE.into(), service.name.clone());

    match service.kind() {
        ServiceKind::Deployment => Ok(Resource::Deployment(Deployment {
            metadata : meta_of(&project.name, &name, &[(spec::LABEL_SERVICE, &service.name)]),
            spec     : Some(DeploymentSpec {
                replicas : Some(service.replicas as i32),
                selector : LabelSelector{ match_labels: Some(selector_labels), ..Default::default() },
                template,
                ..Default::default()
            }),
            ..Default::default()
        })),
        ServiceKind::Job => Ok(Resource::Job(Job {
            metadata : meta_of(&project.name, &name, &[(spec::LABEL_SERVICE, &service.name)]),
            spec     : Some(JobSpec {
                backoff_limit : Some(JOB_BACKOFF_LIMIT),
                template,
                ..Default::default()
            }),
            ..Default::default()
        })),
    }
}

/// Builds the init-barrier container of one service.
///
/// The agent receives its whole specification through a single JSON
/// environment variable, mounts every bind target it must prepare, and runs
/// as root when it has to `chmod` anything.
fn init_container(project: &Project, service: &Service, needs: &BarrierNeeds) -> Container {
    let init_spec = InitSpec {
        namespace              : project.name.clone(),
        wait_for_jobs          : needs.wait_for_jobs.clone(),
        wait_for_services      : needs.wait_for_services.clone(),
        prepare_writable_paths : needs.writable_paths.clone(),
    };
    // InitSpec only holds strings and lists; serialization cannot fail
    let envelope: String = serde_json::to_string(&init_spec).unwrap_or_default();

    // Mount the writable bind targets so the chmod hits the host paths
    let mounts: Vec<VolumeMount> = service.volumes.iter().enumerate()
        .filter(|(_, v)| v.kind == VolumeKind::Bind && !v.read_only)
        .map(|(i, v)| VolumeMount {
            name       : format!("bind-{}", i),
            mount_path : v.target.clone(),
            ..Default::default()
        })
        .collect();

    Container {
        name             : "kappal-init".into(),
        image            : Some(std::env::var(spec::ENV_INIT_IMAGE).unwrap_or_else(|_| spec::DEFAULT_INIT_IMAGE.into())),
        command          : Some(vec![ spec::INIT_BINARY_NAME.into() ]),
        env              : Some(vec![ EnvVar{ name: spec::ENV_INIT_SPEC.into(), value: Some(envelope), ..Default::default() } ]),
        volume_mounts    : if mounts.is_empty() { None } else { Some(mounts) },
        security_context : if needs.writable_paths.is_empty() { None } else {
            Some(SecurityContext{ run_as_user: Some(0), ..Default::default() })
        },
        ..Default::default()
    }
}



#[cfg(test)]
mod tests {
    use kappal_cfg::compose::HealthCheck;

    use super::*;

    fn check_of(test: &[&str], interval: Duration, timeout: Duration) -> HealthCheck {
        HealthCheck {
            test         : test.iter().map(|s| s.to_string()).collect(),
            interval,
            timeout,
            retries      : 3,
            start_period : Duration::ZERO,
        }
    }

    #[test]
    fn probe_cmd_shell_wraps() {
        let check = check_of(&["CMD-SHELL", "pg_isready -U postgres"], Duration::from_secs(10), Duration::from_secs(5));
        let probe = probe_of(&check).unwrap();
        assert_eq!(probe.exec.unwrap().command.unwrap(), vec!["sh", "-c", "pg_isready -U postgres"]);
        assert_eq!(probe.period_seconds, Some(10));
        assert_eq!(probe.timeout_seconds, Some(5));
        assert_eq!(probe.failure_threshold, Some(3));
    }

    #[test]
    fn probe_cmd_is_verbatim() {
        let check = check_of(&["CMD", "redis-cli", "ping"], Duration::from_secs(5), Duration::from_secs(3));
        let probe = probe_of(&check).unwrap();
        assert_eq!(probe.exec.unwrap().command.unwrap(), vec!["redis-cli", "ping"]);
    }

    #[test]
    fn probe_none_is_none() {
        let check = check_of(&["NONE"], Duration::from_secs(5), Duration::from_secs(3));
        assert!(probe_of(&check).is_none());
    }

    #[test]
    fn probe_raw_becomes_shell() {
        let check = check_of(&["curl", "-f", "http://localhost/"], Duration::from_secs(5), Duration::from_secs(3));
        let probe = probe_of(&check).unwrap();
        assert_eq!(probe.exec.unwrap().command.unwrap(), vec!["sh", "-c", "curl -f http://localhost/"]);
    }

    /// Sub-second durations round up to the 1-second floor.
    #[test]
    fn probe_durations_round_up() {
        let check = check_of(&["CMD", "true"], Duration::from_millis(500), Duration::from_millis(1));
        let probe = probe_of(&check).unwrap();
        assert_eq!(probe.period_seconds, Some(1));
        assert_eq!(probe.timeout_seconds, Some(1));

        // And fractional seconds above one ceil to the next whole second
        let check = check_of(&["CMD", "true"], Duration::from_millis(2500), Duration::from_secs(2));
        let probe = probe_of(&check).unwrap();
        assert_eq!(probe.period_seconds, Some(3));
        assert_eq!(probe.timeout_seconds, Some(2));
    }
}
