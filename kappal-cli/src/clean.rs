//  CLEAN.rs
//
//  Description:
//!   Implements the `clean` workflow: either scrub one project (cluster
//!   container, network, data volume, workspace) or sweep everything
//!   kappal ever made, found through the project label and the volume
//!   name prefix. Failures are reported but never abort the chain.
//

use std::path::PathBuf;

use log::info;

use kappal_cfg::spec::LABEL_PROJECT;
use kappal_cfg::workspace::WORKSPACE_DIR;
use kappal_cfg::{Project, Workspace};
use kappal_tsk::cluster::Cluster;
use kappal_tsk::docker;

pub use crate::errors::CleanError as Error;
use crate::utils;


/***** CONSTANTS *****/
/// The name prefix shared by every volume kappal creates.
const VOLUME_PREFIX: &str = "kappal-";





/***** LIBRARY *****/
/// Handles the `clean` subcommand for one project.
///
/// # Arguments
/// - `file`: The Compose file of the project.
/// - `name`: An explicit project name, if any.
///
/// # Errors
/// This function errors only if the project cannot be resolved or Docker is
/// unreachable; everything after that is best-effort.
pub async fn handle(file: PathBuf, name: Option<String>) -> Result<(), Error> {
    let docker = utils::connect_docker().map_err(|err| Error::UtilError{ err })?;
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    let workspace: Workspace = utils::workspace_of(&project);
    let cluster: Cluster = Cluster::new(project.name.clone(), workspace.clone());
    info!("Cleaning project '{}'", project.name);

    if let Err(err) = cluster.stop(&docker).await { utils::emit_warning(err); }
    if let Err(err) = cluster.remove(&docker).await { utils::emit_warning(err); }
    cluster.clean_runtime(&docker).await;
    workspace.remove();

    info!("Project '{}' is gone", project.name);
    Ok(())
}

/// Handles `clean --all`: enumerate every container and network carrying the
/// project label key, every volume with the kappal prefix, and remove them
/// all, plus the workspace in the current directory.
///
/// # Errors
/// This function errors only if Docker is unreachable.
pub async fn handle_all() -> Result<(), Error> {
    let docker = utils::connect_docker().map_err(|err| Error::UtilError{ err })?;
    info!("Cleaning every kappal project on this host");

    // Containers first (they hold the networks and volumes busy)
    match docker::list_containers_by_label(&docker, LABEL_PROJECT).await {
        Ok(containers) => for container in containers {
            let name: String = container.names.as_ref()
                .and_then(|names| names.first().map(|n| n.trim_start_matches('/').to_string()))
                .or(container.id.clone())
                .unwrap_or_default();
            if name.is_empty() { continue; }
            info!(" > Removing container '{}'", name);
            if let Err(err) = docker::stop_container(&docker, &name, 30).await { utils::emit_warning(err); }
            if let Err(err) = docker::remove_container(&docker, &name).await { utils::emit_warning(err); }
        },
        Err(err) => utils::emit_warning(err),
    }

    // Then the networks
    match docker::list_networks_by_label(&docker, LABEL_PROJECT).await {
        Ok(networks) => for network in networks {
            if let Some(name) = network.name {
                info!(" > Removing network '{}'", name);
                if let Err(err) = docker::remove_network(&docker, &name).await { utils::emit_warning(err); }
            }
        },
        Err(err) => utils::emit_warning(err),
    }

    // Then the volumes, by the agreed name prefix
    match docker::list_volumes_by_prefix(&docker, VOLUME_PREFIX).await {
        Ok(volumes) => for volume in volumes {
            info!(" > Removing volume '{}'", volume);
            if let Err(err) = docker::remove_volume(&docker, &volume).await { utils::emit_warning(err); }
        },
        Err(err) => utils::emit_warning(err),
    }

    // And finally the workspace in the current working directory, if any
    let workspace: PathBuf = PathBuf::from(".").join(WORKSPACE_DIR);
    if workspace.exists() {
        info!(" > Removing workspace '{}'", workspace.display());
        if let Err(err) = std::fs::remove_dir_all(&workspace) { utils::emit_warning(err); }
    }

    Ok(())
}
