//  DOWN.rs
//
//  Description:
//!   Implements the `down` workflow: delete the project's workloads,
//!   then stop and remove the cluster container and its network. The
//!   data volume and the workspace survive for the next `up`.
//

use std::path::PathBuf;

use log::info;

use kappal_cfg::spec::LABEL_PROJECT;
use kappal_cfg::{Project, Workspace};
use kappal_tsk::cluster::Cluster;
use kappal_tsk::docker;

pub use crate::errors::DownError as Error;
use crate::utils;


/***** LIBRARY *****/
/// Handles the `down` subcommand.
///
/// Cleanup is best-effort by design: individual failures are reported as
/// warnings, and the chain always runs to the end.
///
/// # Arguments
/// - `file`: The Compose file the project was brought up from.
/// - `name`: An explicit project name, if any.
/// - `volumes`: Whether to delete the persistent claims too.
///
/// # Errors
/// This function errors only when the project itself cannot be resolved or
/// Docker is unreachable.
pub async fn handle(file: PathBuf, name: Option<String>, volumes: bool) -> Result<(), Error> {
    let docker = utils::connect_docker().map_err(|err| Error::UtilError{ err })?;
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    let workspace: Workspace = utils::workspace_of(&project);
    let cluster: Cluster = Cluster::new(project.name.clone(), workspace.clone());
    info!("Taking down project '{}'", project.name);

    // Delete the workloads through the applier, while the cluster still runs
    let kubeconfig = workspace.kubeconfig();
    if kubeconfig.exists() {
        let selector: String = format!("{}={}", LABEL_PROJECT, project.name);
        let kinds: &str = if volumes { "deployments,jobs,services,persistentvolumeclaims" } else { "deployments,jobs,services" };
        if let Err(err) = utils::delete_by_label(&kubeconfig, &project.name, kinds, &selector).await {
            utils::emit_warning(err);
        }
    }

    // Then the cluster container and network; the data volume stays
    if let Err(err) = cluster.stop(&docker).await { utils::emit_warning(err); }
    if let Err(err) = cluster.remove(&docker).await { utils::emit_warning(err); }
    if let Err(err) = docker::remove_network(&docker, cluster.network_name()).await { utils::emit_warning(err); }

    // The kubeconfig points at a cluster that no longer exists
    workspace.clean_runtime();

    info!("Project '{}' is down", project.name);
    Ok(())
}
