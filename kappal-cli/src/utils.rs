//  UTILS.rs
//
//  Description:
//!   Contains utilities shared by the subcommands: project loading, the
//!   Docker connection and the thin wrapper around the external manifest
//!   applier.
//

use std::path::Path;

use bollard::Docker;
use console::style;
use log::debug;

use kappal_cfg::spec::ENV_HOST_DIR;
use kappal_cfg::{Project, Workspace};
use kappal_tsk::docker;

pub use crate::errors::UtilError as Error;


/***** LIBRARY *****/
/// Connects to the local Docker daemon.
pub fn connect_docker() -> Result<Docker, Error> {
    match docker::connect_local() {
        Ok(docker) => Ok(docker),
        Err(err)   => Err(Error::DockerConnectError{ err }),
    }
}

/// Loads and resolves the project behind the given Compose file, honoring
/// the host-side directory hint when kappal itself runs in a container.
///
/// # Arguments
/// - `file`: The Compose file (usually from `--file`).
/// - `name`: An explicit project name (usually from `--project-name`).
pub fn resolve_project(file: impl AsRef<Path>, name: Option<&str>) -> Result<Project, Error> {
    let host_hint: Option<String> = std::env::var(ENV_HOST_DIR).ok().filter(|hint| !hint.is_empty());
    match Project::resolve(file, name, host_hint.as_deref()) {
        Ok(project) => Ok(project),
        Err(err)    => Err(Error::ProjectError{ err }),
    }
}

/// Returns the workspace of the given project.
#[inline]
pub fn workspace_of(project: &Project) -> Workspace { Workspace::of(&project.directory) }

/// Prints the given warning with the standard accent.
pub fn emit_warning(message: impl std::fmt::Display) {
    eprintln!("{}: {}", style("warning").bold().yellow(), message);
}

/// Applies the serialized resource stream through the external applier.
///
/// # Arguments
/// - `kubeconfig`: The project kubeconfig to apply with.
/// - `manifest`: The path of the multi-document resource stream.
///
/// # Errors
/// This function errors if the applier could not be launched or returned a
/// non-zero exit code (its stderr is attached).
pub async fn apply_manifest(kubeconfig: impl AsRef<Path>, manifest: impl AsRef<Path>) -> Result<(), Error> {
    run_applier("apply", vec![
        "apply".into(),
        "--kubeconfig".into(), kubeconfig.as_ref().display().to_string(),
        "-f".into(), manifest.as_ref().display().to_string(),
    ]).await
}

/// Deletes resources of the given kinds in the given namespace by label
/// selector, through the external applier.
pub async fn delete_by_label(kubeconfig: impl AsRef<Path>, namespace: &str, kinds: &str, selector: &str) -> Result<(), Error> {
    run_applier("delete", vec![
        "delete".into(), kinds.into(),
        "--kubeconfig".into(), kubeconfig.as_ref().display().to_string(),
        "--namespace".into(), namespace.into(),
        "--selector".into(), selector.into(),
        "--ignore-not-found".into(),
    ]).await
}

/// Launches the applier binary with the given arguments and checks its exit.
async fn run_applier(verb: &'static str, args: Vec<String>) -> Result<(), Error> {
    debug!("Running 'kubectl {}'", args.join(" "));
    let output = match tokio::process::Command::new("kubectl").args(&args).output().await {
        Ok(output) => output,
        Err(err)   => { return Err(Error::ApplierLaunchError{ command: format!("kubectl {}", args.join(" ")), err }); },
    };

    if !output.status.success() {
        return Err(Error::ApplierFailed {
            verb,
            code   : output.status.code().unwrap_or(-1),
            stderr : String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    // The applier's own output is part of the verb's UX
    print!("{}", String::from_utf8_lossy(&output.stdout));
    Ok(())
}
