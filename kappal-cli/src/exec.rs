//  EXEC.rs
//
//  Description:
//!   Implements the `exec` workflow: attach the caller's standard streams
//!   to a command in a pod of the selected service.
//

use std::path::PathBuf;

use kappal_cfg::{Project, Workspace};
use kappal_tsk::k8s;

pub use crate::errors::ExecError as Error;
use crate::utils;


/***** LIBRARY *****/
/// Handles the `exec` subcommand.
///
/// # Arguments
/// - `file`: The Compose file of the project.
/// - `name`: An explicit project name, if any.
/// - `interactive`: Whether to forward the caller's stdin.
/// - `tty`: Whether to allocate a remote TTY.
/// - `index`: The zero-based replica index to attach to.
/// - `service`: The service whose pod to attach to.
/// - `command`: The command (as argv) to run remotely.
///
/// # Errors
/// This function errors if the service or pod does not exist, the pod is not
/// running, or the remote process exited with a non-zero code.
pub async fn handle(file: PathBuf, name: Option<String>, interactive: bool, tty: bool, index: usize, service: String, command: Vec<String>) -> Result<(), Error> {
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    if !project.services.contains_key(&service) { return Err(Error::UnknownService{ name: service }); }
    let workspace: Workspace = utils::workspace_of(&project);

    let client = k8s::connect(workspace.kubeconfig()).await.map_err(|err| Error::KubeError{ err })?;
    k8s::exec_service(&client, &project.name, &service, index, command, interactive, tty).await
        .map_err(|err| Error::KubeError{ err })?;
    Ok(())
}
