//  BUILD.rs
//
//  Description:
//!   Implements the `build` workflow: build the image of every service
//!   that declares a build context (or of the selected ones), and inject
//!   the results into the cluster's image store.
//

use std::path::PathBuf;

use log::info;

use kappal_cfg::{Project, Service, Workspace};
use kappal_tsk::cluster::Cluster;

pub use crate::errors::BuildError as Error;
use crate::utils;


/***** LIBRARY *****/
/// Handles the `build` subcommand.
///
/// # Arguments
/// - `file`: The Compose file of the project.
/// - `name`: An explicit project name, if any.
/// - `services`: The services to build; empty means every building service.
///
/// # Errors
/// This function errors if a selected service does not exist or declares no
/// build context, or if a build or injection fails.
pub async fn handle(file: PathBuf, name: Option<String>, services: Vec<String>) -> Result<(), Error> {
    let docker = utils::connect_docker().map_err(|err| Error::UtilError{ err })?;
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    let workspace: Workspace = utils::workspace_of(&project);

    // Select what to build
    let selected: Vec<&Service> = if services.is_empty() {
        project.active_services().filter(|s| s.build.is_some()).collect()
    } else {
        let mut selected: Vec<&Service> = Vec::with_capacity(services.len());
        for service in &services {
            match project.services.get(service) {
                Some(s) if s.build.is_some() => selected.push(s),
                Some(_)                      => { return Err(Error::NoBuildContext{ name: service.clone() }); },
                None                         => { return Err(Error::UnknownService{ name: service.clone() }); },
            }
        }
        selected
    };
    if selected.is_empty() {
        info!("No services with build contexts; nothing to do");
        return Ok(());
    }

    // Injection needs a running cluster with the current port set
    let ports = project.published_ports().map_err(|err| Error::PortsError{ err })?;
    let mut cluster: Cluster = Cluster::new(project.name.clone(), workspace);
    cluster.set_published_ports(ports).map_err(|err| Error::ClusterError{ err })?;
    cluster.ensure_running(&docker).await.map_err(|err| Error::ClusterError{ err })?;

    for service in selected {
        // Selection above guarantees the context is there
        let build = service.build.as_ref().unwrap();
        info!("Building image for service '{}'...", service.name);
        let tag: String = cluster.build_image(&docker, &service.name, &build.context, &build.dockerfile).await
            .map_err(|err| Error::ClusterError{ err })?;
        info!(" > Loaded '{}' into the cluster", tag);
    }
    Ok(())
}
