//  EJECT.rs
//
//  Description:
//!   Implements the `eject` workflow: write a standalone workspace with
//!   the generated environment and resource stream, suitable for direct
//!   use by a third-party manifest applier.
//

use std::path::PathBuf;

use log::info;

use kappal_cfg::{Project, Workspace};
use kappal_tfm::{transform, write_stream, TransformOutput};

pub use crate::errors::EjectError as Error;
use crate::utils;


/***** LIBRARY *****/
/// Handles the `eject` subcommand.
///
/// The workspace is regenerated first, so ejecting works without a prior
/// `up` (and reflects the current Compose file if there was one).
///
/// # Arguments
/// - `file`: The Compose file of the project.
/// - `name`: An explicit project name, if any.
/// - `output`: The directory to eject into.
///
/// # Errors
/// This function errors if transformation or any of the writes fail.
pub async fn handle(file: PathBuf, name: Option<String>, output: PathBuf) -> Result<(), Error> {
    let project: Project = utils::resolve_project(&file, name.as_deref()).map_err(|err| Error::UtilError{ err })?;
    let workspace: Workspace = utils::workspace_of(&project);

    // Regenerate the workspace contents
    let result: TransformOutput = transform(&project).map_err(|err| Error::TransformError{ err })?;
    for note in &result.notes {
        utils::emit_warning(note);
    }
    workspace.ensure(&project.name, None).map_err(|err| Error::WorkspaceError{ err })?;
    let stream: String = write_stream(&result.resources).map_err(|err| Error::TransformError{ err })?;
    let manifest: PathBuf = workspace.manifest();
    if let Err(err) = std::fs::write(&manifest, stream) {
        return Err(Error::ManifestWriteError{ path: manifest, err });
    }

    // And copy everything (except runtime data) out
    workspace.eject(&output).map_err(|err| Error::WorkspaceError{ err })?;
    info!("Ejected project '{}' to '{}'", project.name, output.display());
    println!("Wrote standalone workspace to '{}'", output.display());
    Ok(())
}
