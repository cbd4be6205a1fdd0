//  WORKSPACE.rs
//
//  Description:
//!   Defines the on-disk `.kappal/` workspace that persists generated
//!   artifacts next to the compose file: the applier environment, the
//!   shared jsonnet library, the serialized resource stream and the
//!   ephemeral runtime data (kubeconfig).
//

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde_json::json;

pub use crate::errors::WorkspaceError as Error;


/***** CONSTANTS *****/
/// The name of the workspace directory inside the compose directory.
pub const WORKSPACE_DIR: &str = ".kappal";

/// The jsonnet library shared by the generated environments.
const KAPPAL_LIBSONNET: &str = r#"{
  // Parses the serialized resource stream into a list of objects the
  // applier understands.
  fromManifests(yaml):: std.parseYaml(yaml),
}
"#;

/// The entrypoint of the default environment.
const MAIN_JSONNET: &str = r#"local kappal = import 'kappal.libsonnet';

kappal.fromManifests(importstr '../../manifests/all.yaml')
"#;

/// Keeps generated bulk data out of version control.
const GITIGNORE: &str = "manifests/\nruntime/\n";





/***** LIBRARY *****/
/// Handle to the per-project workspace directory.
///
/// Everything under `runtime/` is ephemeral; deleting it never invalidates
/// `environments/` or `manifests/`.
#[derive(Clone, Debug)]
pub struct Workspace {
    /// The workspace root, i.e., `<compose-dir>/.kappal`.
    root : PathBuf,
}

impl Workspace {
    /// Constructor for the Workspace of the given compose directory.
    ///
    /// Does not touch the filesystem; call [`Workspace::ensure()`] for that.
    ///
    /// # Arguments
    /// - `compose_dir`: The directory holding the compose file.
    #[inline]
    pub fn of(compose_dir: impl AsRef<Path>) -> Self {
        Self{ root: compose_dir.as_ref().join(WORKSPACE_DIR) }
    }

    /// Returns the workspace root directory.
    #[inline]
    pub fn root(&self) -> &Path { &self.root }

    /// Returns the directory with the default applier environment.
    #[inline]
    pub fn default_environment(&self) -> PathBuf { self.root.join("environments").join("default") }

    /// Returns the directory with reusable templates.
    #[inline]
    pub fn lib(&self) -> PathBuf { self.root.join("lib") }

    /// Returns the directory with ephemeral runtime data.
    #[inline]
    pub fn runtime(&self) -> PathBuf { self.root.join("runtime") }

    /// Returns the directory with the serialized resource stream.
    #[inline]
    pub fn manifests(&self) -> PathBuf { self.root.join("manifests") }

    /// Returns the path of the project kubeconfig.
    #[inline]
    pub fn kubeconfig(&self) -> PathBuf { self.runtime().join("kubeconfig") }

    /// Returns the path of the serialized resource stream.
    #[inline]
    pub fn manifest(&self) -> PathBuf { self.manifests().join("all.yaml") }

    /// Creates the workspace layout and (re-)generates the environment files.
    ///
    /// The operation is idempotent; existing generated files are overwritten,
    /// and nothing under `manifests/` or `runtime/` is touched beyond
    /// creating the directories.
    ///
    /// # Arguments
    /// - `project`: The project identity (used as the environment's namespace).
    /// - `api_server`: The cluster API endpoint to pin in the environment spec, if known.
    ///
    /// # Errors
    /// This function errors if a directory or file could not be created.
    pub fn ensure(&self, project: &str, api_server: Option<&str>) -> Result<(), Error> {
        debug!("Ensuring workspace at '{}'", self.root.display());

        // The directories first
        for (what, path) in [
            ("workspace", self.root.clone()),
            ("environment", self.default_environment()),
            ("library", self.lib()),
            ("runtime", self.runtime()),
            ("manifest", self.manifests()),
        ] {
            if let Err(err) = fs::create_dir_all(&path) { return Err(Error::DirCreateError{ what, path, err }); }
        }

        // Then the generated files
        let spec: serde_json::Value = json!({
            "apiVersion": "tanka.dev/v1alpha1",
            "kind": "Environment",
            "metadata": { "name": "environments/default" },
            "spec": {
                "apiServer": api_server.unwrap_or("https://127.0.0.1:6443"),
                "namespace": project,
            },
        });
        let spec: String = match serde_json::to_string_pretty(&spec) {
            Ok(spec) => spec,
            Err(err) => { return Err(Error::SpecSerializeError{ err }); },
        };

        for (what, path, contents) in [
            ("environment spec", self.default_environment().join("spec.json"), spec.as_str()),
            ("environment entrypoint", self.default_environment().join("main.jsonnet"), MAIN_JSONNET),
            ("library", self.lib().join("kappal.libsonnet"), KAPPAL_LIBSONNET),
            ("gitignore", self.root.join(".gitignore"), GITIGNORE),
        ] {
            if let Err(err) = fs::write(&path, contents) { return Err(Error::FileWriteError{ what, path, err }); }
        }

        Ok(())
    }

    /// Removes the ephemeral runtime directory.
    ///
    /// Failures are logged as warnings; cleanup never aborts.
    pub fn clean_runtime(&self) {
        let runtime: PathBuf = self.runtime();
        if runtime.exists() {
            if let Err(err) = fs::remove_dir_all(&runtime) {
                warn!("Failed to remove runtime directory '{}': {}", runtime.display(), err);
            }
        }
    }

    /// Removes the entire workspace.
    ///
    /// Failures are logged as warnings; cleanup never aborts.
    pub fn remove(&self) {
        if self.root.exists() {
            if let Err(err) = fs::remove_dir_all(&self.root) {
                warn!("Failed to remove workspace '{}': {}", self.root.display(), err);
            }
        }
    }

    /// Writes a standalone copy of the workspace, suitable for direct use by
    /// a third-party manifest applier.
    ///
    /// # Arguments
    /// - `target`: The directory to eject into (created if missing).
    ///
    /// # Errors
    /// This function errors if the target could not be created or a tree
    /// could not be copied.
    pub fn eject(&self, target: impl AsRef<Path>) -> Result<(), Error> {
        let target: &Path = target.as_ref();
        debug!("Ejecting workspace '{}' to '{}'", self.root.display(), target.display());

        if let Err(err) = fs::create_dir_all(target) { return Err(Error::DirCreateError{ what: "eject target", path: target.into(), err }); }

        // Copy everything except the ephemeral runtime data
        let mut options = fs_extra::dir::CopyOptions::new();
        options.overwrite = true;
        for dir in ["environments", "lib", "manifests"] {
            let source: PathBuf = self.root.join(dir);
            if !source.exists() { continue; }
            if let Err(err) = fs_extra::dir::copy(&source, target, &options) {
                return Err(Error::CopyError{ source, target: target.into(), err });
            }
        }

        Ok(())
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::of(dir.path());
        workspace.ensure("proj-0123abcd", None).unwrap();

        assert!(workspace.default_environment().join("spec.json").exists());
        assert!(workspace.default_environment().join("main.jsonnet").exists());
        assert!(workspace.lib().join("kappal.libsonnet").exists());
        assert!(workspace.runtime().exists());
        assert!(workspace.manifests().exists());

        // The generated spec pins the project namespace
        let spec = fs::read_to_string(workspace.default_environment().join("spec.json")).unwrap();
        assert!(spec.contains("proj-0123abcd"));
    }

    /// Deleting runtime data must leave the generated environment intact.
    #[test]
    fn runtime_is_ephemeral() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::of(dir.path());
        workspace.ensure("proj-0123abcd", None).unwrap();

        fs::write(workspace.kubeconfig(), "fake").unwrap();
        workspace.clean_runtime();

        assert!(!workspace.runtime().exists());
        assert!(workspace.default_environment().join("spec.json").exists());
        assert!(workspace.manifests().exists());
    }

    #[test]
    fn eject_skips_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::of(dir.path());
        workspace.ensure("proj-0123abcd", None).unwrap();
        fs::write(workspace.manifest(), "---\n").unwrap();

        let out = dir.path().join("tanka");
        workspace.eject(&out).unwrap();

        assert!(out.join("environments").join("default").join("spec.json").exists());
        assert!(out.join("manifests").join("all.yaml").exists());
        assert!(!out.join("runtime").exists());
    }
}
