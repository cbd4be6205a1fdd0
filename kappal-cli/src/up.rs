//  UP.rs
//
//  Description:
//!   Implements the `up` workflow: transform the project, make sure the
//!   cluster runs with the right port bindings, build and inject images
//!   where needed, apply the resource stream and wait for readiness.
//

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};

use kappal_cfg::spec::{LABEL_PROJECT, PublishedPort};
use kappal_cfg::{Project, Workspace};
use kappal_tfm::workload::barrier_of;
use kappal_tfm::{transform, write_stream, TransformOutput};
use kappal_tsk::cluster::Cluster;
use kappal_tsk::k8s;

pub use crate::errors::UpError as Error;
use crate::utils;


/***** LIBRARY *****/
/// Handles the `up` subcommand.
///
/// # Arguments
/// - `file`: The Compose file to bring up.
/// - `name`: An explicit project name, if any.
/// - `detach`: Whether to treat a readiness timeout as a warning instead of an error.
/// - `build`: Whether to (re)build the services that declare build contexts.
/// - `timeout`: The readiness budget, in seconds.
///
/// # Errors
/// This function errors if any of the sequenced stages fail.
pub async fn handle(file: PathBuf, name: Option<String>, detach: bool, build: bool, timeout: u64) -> Result<(), Error> {
    let docker = utils::connect_docker().map_err(|err| Error::UtilError{ err })?;
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    info!("Bringing up project '{}'", project.name);

    // Transform first: input errors should surface before we touch anything
    let output: TransformOutput = transform(&project).map_err(|err| Error::TransformError{ err })?;
    for note in &output.notes {
        utils::emit_warning(note);
    }

    // Lay out the workspace and persist the resource stream
    let workspace: Workspace = utils::workspace_of(&project);
    workspace.ensure(&project.name, None).map_err(|err| Error::WorkspaceError{ err })?;
    let stream: String = write_stream(&output.resources).map_err(|err| Error::TransformError{ err })?;
    let manifest: PathBuf = workspace.manifest();
    if let Err(err) = std::fs::write(&manifest, &stream) {
        return Err(Error::ManifestWriteError{ path: manifest, err });
    }
    debug!("Wrote {} resource(s) to '{}'", output.resources.len(), workspace.manifest().display());

    // Make sure the cluster runs with exactly the published set
    let ports: Vec<PublishedPort> = project.published_ports().map_err(|err| Error::PortsError{ err })?;
    let mut cluster: Cluster = Cluster::new(project.name.clone(), workspace.clone());
    cluster.set_published_ports(ports).map_err(|err| Error::ClusterError{ err })?;
    let client = cluster.ensure_running(&docker).await.map_err(|err| Error::ClusterError{ err })?;

    // Pin the resolved endpoint in the environment spec, now that we know it
    if let Ok(endpoint) = cluster.resolve_endpoint(&docker).await {
        workspace.ensure(&project.name, Some(&endpoint)).map_err(|err| Error::WorkspaceError{ err })?;
    }

    // Build what asks for it, and ship the init-barrier agent if it is needed
    if build {
        for service in project.active_services() {
            if let Some(build) = &service.build {
                info!("Building image for service '{}'...", service.name);
                cluster.build_image(&docker, &service.name, &build.context, &build.dockerfile).await
                    .map_err(|err| Error::ClusterError{ err })?;
            }
        }
    }
    if project.active_services().any(|service| !barrier_of(&project, service).is_empty()) {
        cluster.load_init_image(&docker).await.map_err(|err| Error::ClusterError{ err })?;
    }

    // Jobs are immutable: whatever is left of previous runs goes first
    let selector: String = format!("{}={}", LABEL_PROJECT, project.name);
    k8s::delete_jobs(&client, &project.name, &selector).await.map_err(|err| Error::KubeError{ err })?;

    // Hand the stream to the applier
    utils::apply_manifest(workspace.kubeconfig(), workspace.manifest()).await.map_err(|err| Error::UtilError{ err })?;

    // And wait for the pods to come up
    info!("Waiting up to {}s for project '{}' to become ready...", timeout, project.name);
    match k8s::wait_for_pods_ready(&client, &project.name, &selector, Duration::from_secs(timeout)).await {
        Ok(())   => { info!("Project '{}' is up", project.name); Ok(()) },
        Err(err) => {
            // Detached runs treat a late project as a warning, not a failure
            if detach {
                utils::emit_warning(&err);
                Ok(())
            } else {
                Err(Error::ReadyTimeout{ err })
            }
        },
    }
}
