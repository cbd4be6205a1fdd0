//  STATE.rs
//
//  Description:
//!   Reconstructs the live runtime state of a project from labels alone -
//!   never from naming conventions - and derives the per-service status
//!   from the observed replica and job counts.
//

use std::collections::HashMap;

use bollard::Docker;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use log::{debug, warn};
use serde::Serialize;

use kappal_cfg::Project;
use kappal_cfg::spec::{self, PublishedPort, ServiceKind, ServiceState};
use kappal_cfg::workspace::Workspace;

use crate::cluster::Cluster;
use crate::docker;
pub use crate::errors::StateError as Error;
use crate::k8s;


/***** HELPER FUNCTIONS *****/
/// Derives the state of a long-running workload from its replica counts.
fn derive_deployment_state(ready: i32, desired: i32) -> ServiceState {
    if ready == 0 { ServiceState::Waiting }
    else if ready >= desired { ServiceState::Running }
    else { ServiceState::Partial }
}

/// Derives the state of a run-to-completion workload from its job counts.
fn derive_job_state(succeeded: i32, active: i32, failed: i32) -> ServiceState {
    if succeeded > 0 { ServiceState::Completed }
    else if active > 0 && failed > 0 { ServiceState::Failing }
    else if active > 0 { ServiceState::Running }
    else if failed > 0 { ServiceState::Failed }
    else { ServiceState::Pending }
}

/// Returns the value of the given label on the given Kubernetes metadata, if any.
fn label_of(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, label: &str) -> Option<String> {
    meta.labels.as_ref().and_then(|l| l.get(label).cloned())
}





/***** AUXILLARY *****/
/// The observed state of the cluster container and its surroundings.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterInfo {
    /// The name of the cluster container, if one exists.
    pub container : Option<String>,
    /// The container's state string (e.g., `running`), or `absent`.
    pub status    : String,
    /// The name of the project's bridge network, if one exists.
    pub network   : Option<String>,
}

/// The ready/desired replica counts of a long-running service.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct ReplicaCount {
    pub ready   : i32,
    pub desired : i32,
}

/// A single observed pod.
#[derive(Clone, Debug, Serialize)]
pub struct PodInfo {
    /// The pod name.
    pub name   : String,
    /// The pod phase (e.g., `Running`).
    pub status : String,
    /// The pod IP, if assigned.
    pub ip     : Option<String>,
}

/// The merged view of one Compose service.
#[derive(Clone, Debug, Serialize)]
pub struct ServiceInfo {
    /// The service name.
    pub name     : String,
    /// The workload kind.
    pub kind     : ServiceKind,
    /// The image the workload runs (observed if possible, declared otherwise).
    pub image    : String,
    /// The derived state.
    pub status   : ServiceState,
    /// The replica counts (long-running services only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas : Option<ReplicaCount>,
    /// The published ports, with the host side as actually bound.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports    : Vec<PublishedPort>,
    /// The observed pods.
    pub pods     : Vec<PodInfo>,
}

/// The complete discovered state of a project.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectState {
    /// The project identity.
    pub project  : String,
    /// The cluster container's state.
    pub cluster  : ClusterInfo,
    /// The services, in alphabetical order.
    pub services : Vec<ServiceInfo>,
}





/***** LIBRARY *****/
/// Reconstructs the runtime view of the given project.
///
/// The procedure works purely from labels: the cluster container and network
/// are found by the `project` label, workloads and pods by `project` and
/// `service` labels. The result merges the observed state with the Compose
/// project (skipping profiled services), in alphabetical order.
///
/// # Arguments
/// - `docker`: The Docker instance to discover with.
/// - `project`: The Compose project to merge against.
/// - `workspace`: The project workspace (for the kubeconfig).
///
/// # Returns
/// The discovered state. If the cluster API is unreachable, every service is
/// reported as `unavailable` with its declared image and classification.
///
/// # Errors
/// This function errors only on Docker-level failures; an unreachable
/// Kubernetes API is part of the reported state instead.
pub async fn discover(docker: &Docker, project: &Project, workspace: &Workspace) -> Result<ProjectState, Error> {
    // Find the cluster pieces by label
    let label: String = format!("{}={}", spec::LABEL_PROJECT, project.name);
    let containers = docker::list_containers_by_label(docker, &label).await?;
    let container = containers.into_iter().next();
    let container_name: Option<String> = container.as_ref()
        .and_then(|c| c.names.as_ref())
        .and_then(|names| names.first().map(|n| n.trim_start_matches('/').to_string()));
    let container_state: String = container.as_ref().and_then(|c| c.state.clone()).unwrap_or_else(|| "absent".into());
    let running: bool = container_state == "running";

    let networks = docker::list_networks_by_label(docker, &label).await?;
    let network_name: Option<String> = networks.into_iter().next().and_then(|n| n.name);

    // Read the actual host bindings off the cluster container, minus the API slot
    let cluster: Cluster = Cluster::new(project.name.clone(), workspace.clone());
    let mut bindings: HashMap<String, u16> = HashMap::new();
    if running {
        if let Some(name) = &container_name {
            bindings = docker::container_port_bindings(docker, name).await?;
            bindings.remove("6443/tcp");
        }
    }

    // Make the kubeconfig callable from wherever we run now, then try the API
    let client: Option<Client> = if running {
        match refresh_kubeconfig(docker, &cluster, workspace).await {
            Ok(()) => match k8s::connect(workspace.kubeconfig()).await {
                Ok(client) if k8s::probe(&client).await => Some(client),
                _ => None,
            },
            Err(err) => { debug!("Could not refresh kubeconfig: {}", err); None },
        }
    } else {
        None
    };

    // Pull the workload view out of the cluster, if we can
    let mut deployments: HashMap<String, Deployment> = HashMap::new();
    let mut jobs: HashMap<String, Job> = HashMap::new();
    let mut pods_by_service: HashMap<String, Vec<Pod>> = HashMap::new();
    if let Some(client) = &client {
        match k8s::list_deployments(client, &project.name, &label).await {
            Ok(list) => for d in list {
                if let Some(service) = label_of(&d.metadata, spec::LABEL_SERVICE) { deployments.insert(service, d); }
            },
            Err(err) => warn!("{}", err),
        }
        match k8s::list_jobs(client, &project.name, &label).await {
            Ok(list) => for j in list {
                if let Some(service) = label_of(&j.metadata, spec::LABEL_SERVICE) { jobs.insert(service, j); }
            },
            Err(err) => warn!("{}", err),
        }
        match k8s::list_pods(client, &project.name, &label).await {
            Ok(list) => for p in list {
                if let Some(service) = label_of(&p.metadata, spec::LABEL_SERVICE) {
                    pods_by_service.entry(service).or_default().push(p);
                }
            },
            Err(err) => warn!("{}", err),
        }
    }
    let unreachable: bool = running && client.is_none();

    // Merge with the compose view, alphabetically (BTreeMap order)
    let mut services: Vec<ServiceInfo> = Vec::with_capacity(project.services.len());
    for service in project.active_services() {
        let ports: Vec<PublishedPort> = service.ports.iter().map(|p| {
            // Prefer the host port as actually bound over the declared one
            let slot: String = format!("{}/{}", p.container, p.protocol);
            PublishedPort{ host: bindings.get(&slot).copied().unwrap_or(p.host), container: p.container, protocol: p.protocol }
        }).collect();
        let declared_image: String = service.image.clone().unwrap_or_else(|| format!("{}-{}:latest", project.name, service.name));

        // The long-running variant wins collisions; the up-workflow removes
        // stale jobs before re-apply, so this only happens transiently.
        let info: ServiceInfo = if let Some(deployment) = deployments.get(&service.name) {
            let desired: i32 = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready: i32 = deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
            let image: String = deployment.spec.as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|s| s.containers.first())
                .and_then(|c| c.image.clone())
                .unwrap_or(declared_image);
            ServiceInfo {
                name     : service.name.clone(),
                kind     : ServiceKind::Deployment,
                image,
                status   : derive_deployment_state(ready, desired),
                replicas : Some(ReplicaCount{ ready, desired }),
                ports,
                pods     : collect_pods(&mut pods_by_service, &service.name, ServiceKind::Deployment),
            }
        } else if let Some(job) = jobs.get(&service.name) {
            let status = job.status.as_ref();
            let succeeded: i32 = status.and_then(|s| s.succeeded).unwrap_or(0);
            let active: i32 = status.and_then(|s| s.active).unwrap_or(0);
            let failed: i32 = status.and_then(|s| s.failed).unwrap_or(0);
            let image: String = job.spec.as_ref()
                .and_then(|s| s.template.spec.as_ref())
                .and_then(|s| s.containers.first())
                .and_then(|c| c.image.clone())
                .unwrap_or(declared_image);
            ServiceInfo {
                name     : service.name.clone(),
                kind     : ServiceKind::Job,
                image,
                status   : derive_job_state(succeeded, active, failed),
                replicas : None,
                ports,
                pods     : collect_pods(&mut pods_by_service, &service.name, ServiceKind::Job),
            }
        } else {
            ServiceInfo {
                name     : service.name.clone(),
                kind     : service.kind(),
                image    : declared_image,
                status   : if unreachable { ServiceState::Unavailable } else { ServiceState::Missing },
                replicas : None,
                ports,
                pods     : vec![],
            }
        };
        services.push(info);
    }

    Ok(ProjectState {
        project  : project.name.clone(),
        cluster  : ClusterInfo{ container: container_name, status: container_state, network: network_name },
        services,
    })
}

/// Re-applies the endpoint patch to the on-disk kubeconfig, so the config is
/// callable from the current execution context.
async fn refresh_kubeconfig(docker: &Docker, cluster: &Cluster, workspace: &Workspace) -> Result<(), crate::errors::ClusterError> {
    let path = workspace.kubeconfig();
    let raw: String = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        // Without a kubeconfig on disk there is nothing to refresh; the
        // caller will simply fail to connect and report 'unavailable'.
        Err(_)  => { return Ok(()); },
    };
    let patched: String = cluster.patch_kubeconfig(docker, &raw).await?;
    if patched != raw {
        if let Err(err) = std::fs::write(&path, patched) {
            return Err(crate::errors::ClusterError::KubeconfigWriteError{ path, err });
        }
    }
    Ok(())
}

/// Collects the reported pods of a service, applying the per-kind filter:
/// long-running services hide pods of past rollouts (only running or pending
/// phases show), run-to-completion services show their full history.
fn collect_pods(pods_by_service: &mut HashMap<String, Vec<Pod>>, service: &str, kind: ServiceKind) -> Vec<PodInfo> {
    let pods: Vec<Pod> = pods_by_service.remove(service).unwrap_or_default();
    let mut res: Vec<PodInfo> = pods.into_iter()
        .filter_map(|pod| {
            let phase: String = k8s::pod_phase(&pod);
            if kind == ServiceKind::Deployment && phase != "Running" && phase != "Pending" { return None; }
            Some(PodInfo {
                name   : pod.metadata.name.clone().unwrap_or_default(),
                status : phase,
                ip     : pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
            })
        })
        .collect();
    res.sort_by(|a, b| a.name.cmp(&b.name));
    res
}



#[cfg(test)]
mod tests {
    use super::*;

    /// The full state table of long-running services.
    #[test]
    fn deployment_states() {
        assert_eq!(derive_deployment_state(0, 1), ServiceState::Waiting);
        assert_eq!(derive_deployment_state(0, 3), ServiceState::Waiting);
        assert_eq!(derive_deployment_state(3, 3), ServiceState::Running);
        assert_eq!(derive_deployment_state(1, 3), ServiceState::Partial);
        assert_eq!(derive_deployment_state(2, 3), ServiceState::Partial);
    }

    /// The full state table of run-to-completion services.
    #[test]
    fn job_states() {
        assert_eq!(derive_job_state(1, 0, 0), ServiceState::Completed);
        assert_eq!(derive_job_state(1, 1, 1), ServiceState::Completed);
        assert_eq!(derive_job_state(0, 1, 1), ServiceState::Failing);
        assert_eq!(derive_job_state(0, 1, 0), ServiceState::Running);
        assert_eq!(derive_job_state(0, 0, 2), ServiceState::Failed);
        assert_eq!(derive_job_state(0, 0, 0), ServiceState::Pending);
    }

    /// Long-running services hide completed/failed pods; jobs show everything.
    #[test]
    fn pod_filtering() {
        let pod = |name: &str, phase: &str| Pod {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            status: Some(k8s_openapi::api::core::v1::PodStatus {
                phase: Some(phase.into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut by_service: HashMap<String, Vec<Pod>> = HashMap::new();
        by_service.insert("web".into(), vec![ pod("web-1", "Running"), pod("web-0", "Pending"), pod("web-old", "Succeeded") ]);
        by_service.insert("migrate".into(), vec![ pod("migrate-1", "Succeeded"), pod("migrate-0", "Failed") ]);

        let web = collect_pods(&mut by_service, "web", ServiceKind::Deployment);
        assert_eq!(web.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["web-0", "web-1"]);

        let migrate = collect_pods(&mut by_service, "migrate", ServiceKind::Job);
        assert_eq!(migrate.len(), 2);
    }
}
