//  LOGS.rs
//
//  Description:
//!   Implements the `logs` workflow: interleaved, prefixed log streams of
//!   the selected services' pods, optionally in follow mode.
//

use std::path::PathBuf;

use kappal_cfg::{Project, Workspace};
use kappal_tsk::k8s;

pub use crate::errors::LogsError as Error;
use crate::utils;


/***** LIBRARY *****/
/// Handles the `logs` subcommand.
///
/// # Arguments
/// - `file`: The Compose file of the project.
/// - `name`: An explicit project name, if any.
/// - `follow`: Whether to keep following the streams until interrupted.
/// - `tail`: The tail-line budget per pod.
/// - `services`: The services to stream; empty means all of them.
///
/// # Errors
/// This function errors if a given service does not exist, the cluster is
/// unreachable, or the pods could not be listed.
pub async fn handle(file: PathBuf, name: Option<String>, follow: bool, tail: i64, services: Vec<String>) -> Result<(), Error> {
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    let workspace: Workspace = utils::workspace_of(&project);

    // An empty filter means every active service
    let services: Vec<String> = if services.is_empty() {
        project.active_services().map(|s| s.name.clone()).collect()
    } else {
        for service in &services {
            if !project.services.contains_key(service) { return Err(Error::UnknownService{ name: service.clone() }); }
        }
        services
    };

    let client = k8s::connect(workspace.kubeconfig()).await.map_err(|err| Error::KubeError{ err })?;
    k8s::stream_logs(&client, &project.name, &services, tail, follow).await.map_err(|err| Error::KubeError{ err })?;
    Ok(())
}
