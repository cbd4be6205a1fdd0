//  DOCKER.rs
//
//  Description:
//!   Defines functions that interact with the local Docker daemon. The
//!   operational surface is idempotent on absence: removing or stopping
//!   something that does not exist is a success, and creating a network
//!   that already exists is too.
//

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions, TagImageOptions};
use bollard::models::{ContainerSummary, Network};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::CreateVolumeOptions;
use futures_util::StreamExt;
use futures_util::stream::TryStreamExt;
use globset::{Glob, GlobSet, GlobSetBuilder};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub use crate::errors::DockerError as Error;


/***** HELPER FUNCTIONS *****/
/// Returns whether the given bollard error is a "not found" response.
#[inline]
fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(err, bollard::errors::Error::DockerResponseServerError{ status_code: 404, .. })
}

/// Returns whether the given bollard error is an "already exists" / conflict response.
#[inline]
fn is_conflict(err: &bollard::errors::Error) -> bool {
    matches!(err, bollard::errors::Error::DockerResponseServerError{ status_code: 409, .. })
}

/// Compiles one globset out of the given exclude-file patterns.
fn compile_globs(path: &Path, patterns: &[String]) -> Result<GlobSet, Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // Also match everything below a directory pattern
        let glob = match Glob::new(pattern) {
            Ok(glob) => glob,
            Err(err) => { return Err(Error::IgnoreFileParseError{ path: path.into(), err }); },
        };
        builder.add(glob);
        if !pattern.ends_with("/**") {
            let deep: String = format!("{}/**", pattern.trim_end_matches('/'));
            match Glob::new(&deep) {
                Ok(glob) => { builder.add(glob); },
                Err(err) => { return Err(Error::IgnoreFileParseError{ path: path.into(), err }); },
            }
        }
    }
    match builder.build() {
        Ok(set)  => Ok(set),
        Err(err) => Err(Error::IgnoreFileParseError{ path: path.into(), err }),
    }
}

/// Recursively adds the given directory to the tarball, honoring the exclusions.
fn tar_dir(tar: &mut tar::Builder<Vec<u8>>, context: &Path, dir: &Path, excludes: &ExcludeRules) -> Result<(), Error> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err)    => { return Err(Error::ContextReadError{ path: dir.into(), err }); },
    };
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err)  => { return Err(Error::ContextReadError{ path: dir.into(), err }); },
        };
        let path: PathBuf = entry.path();
        let rel: &Path = path.strip_prefix(context).unwrap_or(&path);

        if path.is_dir() {
            // Only prune the whole subtree if nothing in it can be re-included
            if excludes.is_excluded(rel) && !excludes.has_reincludes() { continue; }
            tar_dir(tar, context, &path, excludes)?;
        } else {
            if excludes.is_excluded(rel) { continue; }
            if let Err(err) = tar.append_path_with_name(&path, rel) {
                return Err(Error::ContextTarError{ path: path.clone(), err });
            }
        }
    }
    Ok(())
}

/// The compiled exclude-file of a build context.
struct ExcludeRules {
    /// Patterns that exclude paths.
    excludes   : GlobSet,
    /// `!`-prefixed patterns that re-include previously excluded paths.
    reincludes : GlobSet,
}

impl ExcludeRules {
    /// Parses the exclude-file next to the given dockerfile in the context, if it exists.
    ///
    /// Lines starting with `#` are comments; lines starting with `!` are
    /// re-include overrides. The dockerfile itself is always re-included, so
    /// a broad exclusion can never hide it from the build.
    fn load(context: &Path, dockerfile: &str) -> Result<Self, Error> {
        let path: PathBuf = context.join(".dockerignore");
        let mut excludes: Vec<String> = vec![];
        let mut reincludes: Vec<String> = vec![dockerfile.into()];

        if path.exists() {
            let raw: String = match std::fs::read_to_string(&path) {
                Ok(raw)  => raw,
                Err(err) => { return Err(Error::ContextReadError{ path, err }); },
            };
            for line in raw.lines() {
                let line: &str = line.trim();
                if line.is_empty() || line.starts_with('#') { continue; }
                match line.strip_prefix('!') {
                    Some(pattern) => reincludes.push(pattern.into()),
                    None          => excludes.push(line.into()),
                }
            }
        }

        Ok(Self {
            excludes   : compile_globs(&path, &excludes)?,
            reincludes : compile_globs(&path, &reincludes)?,
        })
    }

    /// Returns whether the given context-relative path is excluded from the build.
    #[inline]
    fn is_excluded(&self, rel: &Path) -> bool {
        self.excludes.is_match(rel) && !self.reincludes.is_match(rel)
    }

    /// Returns whether any re-include overrides beyond the dockerfile exist.
    #[inline]
    fn has_reincludes(&self) -> bool { self.reincludes.len() > 1 }
}





/***** CONNECTION *****/
/// Connects to the local Docker daemon with the default socket and version.
///
/// # Returns
/// A new bollard client.
///
/// # Errors
/// This function errors if the daemon is not reachable.
pub fn connect_local() -> Result<Docker, Error> {
    match Docker::connect_with_local_defaults() {
        Ok(docker) => Ok(docker),
        Err(err)   => Err(Error::ConnectionError{ err }),
    }
}





/***** CONTAINERS *****/
/// Returns whether a container with the given name exists (in any state).
pub async fn container_exists(docker: &Docker, name: impl AsRef<str>) -> Result<bool, Error> {
    let name: &str = name.as_ref();
    match docker.inspect_container(name, None).await {
        Ok(_)                         => Ok(true),
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err)                      => Err(Error::InspectContainerError{ name: name.into(), err }),
    }
}

/// Returns whether a container with the given name is currently running.
pub async fn container_running(docker: &Docker, name: impl AsRef<str>) -> Result<bool, Error> {
    let name: &str = name.as_ref();
    match docker.inspect_container(name, None).await {
        Ok(info)                      => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err)                      => Err(Error::InspectContainerError{ name: name.into(), err }),
    }
}

/// Returns the actual port bindings of the given container as a map of
/// `"<container-port>/<proto>"` to the bound host port.
pub async fn container_port_bindings(docker: &Docker, name: impl AsRef<str>) -> Result<HashMap<String, u16>, Error> {
    let name: &str = name.as_ref();
    let info = match docker.inspect_container(name, None).await {
        Ok(info) => info,
        Err(err) => { return Err(Error::InspectContainerError{ name: name.into(), err }); },
    };

    let mut res: HashMap<String, u16> = HashMap::new();
    let bindings = info.host_config.and_then(|hc| hc.port_bindings).unwrap_or_default();
    for (slot, binding) in bindings {
        if let Some(host) = binding.and_then(|b| b.into_iter().next()).and_then(|b| b.host_port).and_then(|p| p.parse::<u16>().ok()) {
            res.insert(slot, host);
        }
    }
    Ok(res)
}

/// Returns the IP address of the given container on the given network.
pub async fn container_address(docker: &Docker, name: impl AsRef<str>, network: impl AsRef<str>) -> Result<String, Error> {
    let name: &str = name.as_ref();
    let network: &str = network.as_ref();

    let info = match docker.inspect_container(name, None).await {
        Ok(info) => info,
        Err(err) => { return Err(Error::InspectContainerError{ name: name.into(), err }); },
    };

    let ip: Option<String> = info.network_settings
        .and_then(|n| n.networks)
        .and_then(|mut n| n.remove(network))
        .and_then(|e| e.ip_address)
        .filter(|ip| !ip.is_empty());
    match ip {
        Some(ip) => Ok(ip),
        None     => Err(Error::ContainerNoNetwork{ name: name.into(), network: network.into() }),
    }
}

/// Creates and starts a container with the given configuration.
///
/// # Arguments
/// - `docker`: The Docker instance to create the container on.
/// - `name`: The name of the new container.
/// - `config`: The full container config, including any host config and network attachment.
///
/// # Errors
/// This function errors if the container could not be created or started.
pub async fn create_and_start_container(docker: &Docker, name: impl AsRef<str>, config: Config<String>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    let image: String = config.image.clone().unwrap_or_default();

    debug!("Launching container '{}' (image: {})...", name, image);
    let create_options = CreateContainerOptions{ name };
    if let Err(err) = docker.create_container(Some(create_options), config).await {
        return Err(Error::CreateContainerError{ name: name.into(), image, err });
    }
    debug!(" > Container created");
    match docker.start_container(name, None::<StartContainerOptions<String>>).await {
        Ok(_)    => { debug!(" > Container '{}' started", name); Ok(()) },
        Err(err) => Err(Error::StartError{ name: name.into(), err }),
    }
}

/// Stops the given container, waiting at most `timeout` seconds before the kill.
///
/// A container that does not exist or is already stopped counts as success.
pub async fn stop_container(docker: &Docker, name: impl AsRef<str>, timeout: i64) -> Result<(), Error> {
    let name: &str = name.as_ref();
    match docker.stop_container(name, Some(StopContainerOptions{ t: timeout })).await {
        Ok(_)                          => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        // A 304 means the container was already stopped
        Err(bollard::errors::Error::DockerResponseServerError{ status_code: 304, .. }) => Ok(()),
        Err(err)                       => Err(Error::StopError{ name: name.into(), err }),
    }
}

/// Force-removes the given container. A container that does not exist counts as success.
pub async fn remove_container(docker: &Docker, name: impl AsRef<str>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    match docker.remove_container(name, Some(RemoveContainerOptions{ force: true, ..Default::default() })).await {
        Ok(_)                          => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err)                       => Err(Error::RemoveContainerError{ name: name.into(), err }),
    }
}

/// Lists the containers carrying the given label, either as a bare key or as `key=value`.
pub async fn list_containers_by_label(docker: &Docker, label: impl AsRef<str>) -> Result<Vec<ContainerSummary>, Error> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();
    filters.insert("label".into(), vec![ label.as_ref().into() ]);
    match docker.list_containers(Some(ListContainersOptions{ all: true, filters, ..Default::default() })).await {
        Ok(containers) => Ok(containers),
        Err(err)       => Err(Error::ListContainersError{ err }),
    }
}





/***** EXEC *****/
/// Executes the given command in the given container and captures its output.
///
/// # Arguments
/// - `docker`: The Docker instance to talk to.
/// - `name`: The container to execute in.
/// - `command`: The command (as argv) to execute.
///
/// # Returns
/// The captured stdout of the command.
///
/// # Errors
/// This function errors if the exec could not be set up, the stream broke
/// down or the command returned a non-zero exit code (with its stderr
/// attached to the error).
pub async fn exec_buffered(docker: &Docker, name: impl AsRef<str>, command: Vec<String>) -> Result<String, Error> {
    let name: &str = name.as_ref();
    debug!("Executing '{}' in container '{}' (buffered)", command.join(" "), name);

    let exec = match docker.create_exec(name, CreateExecOptions::<String> {
        cmd           : Some(command.clone()),
        attach_stdout : Some(true),
        attach_stderr : Some(true),
        ..Default::default()
    }).await {
        Ok(exec) => exec,
        Err(err) => { return Err(Error::CreateExecError{ name: name.into(), err }); },
    };

    // Demultiplex the stream into the two output channels
    let mut stdout: String = String::new();
    let mut stderr: String = String::new();
    match docker.start_exec(&exec.id, None::<StartExecOptions>).await {
        Ok(StartExecResults::Attached{ mut output, .. }) => {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut{ message }) => stdout.push_str(String::from_utf8_lossy(&message).as_ref()),
                    Ok(LogOutput::StdErr{ message }) => stderr.push_str(String::from_utf8_lossy(&message).as_ref()),
                    Ok(_)    => {},
                    Err(err) => { return Err(Error::StartExecError{ name: name.into(), err }); },
                }
            }
        },
        Ok(StartExecResults::Detached) => {},
        Err(err) => { return Err(Error::StartExecError{ name: name.into(), err }); },
    }

    // Check the exit code before handing back the output
    let inspect = match docker.inspect_exec(&exec.id).await {
        Ok(inspect) => inspect,
        Err(err)    => { return Err(Error::InspectExecError{ name: name.into(), err }); },
    };
    let code: i64 = inspect.exit_code.unwrap_or(0);
    if code != 0 { return Err(Error::ExecFailed{ name: name.into(), command, code, stderr }); }
    Ok(stdout)
}

/// Executes the given command in the given container, plumbing the caller's
/// standard streams to the remote process.
///
/// # Errors
/// This function errors if the exec could not be set up, a stream broke down
/// or the command returned a non-zero exit code.
pub async fn exec_streamed(docker: &Docker, name: impl AsRef<str>, command: Vec<String>, tty: bool) -> Result<(), Error> {
    let name: &str = name.as_ref();
    debug!("Executing '{}' in container '{}' (streamed)", command.join(" "), name);

    let exec = match docker.create_exec(name, CreateExecOptions::<String> {
        cmd           : Some(command.clone()),
        attach_stdin  : Some(true),
        attach_stdout : Some(true),
        attach_stderr : Some(true),
        tty           : Some(tty),
        ..Default::default()
    }).await {
        Ok(exec) => exec,
        Err(err) => { return Err(Error::CreateExecError{ name: name.into(), err }); },
    };

    match docker.start_exec(&exec.id, None::<StartExecOptions>).await {
        Ok(StartExecResults::Attached{ mut output, mut input }) => {
            // One task pumps our stdin to the remote, the main loop pumps the remote back
            let stdin_pump = tokio::spawn(async move {
                let mut stdin = tokio::io::stdin();
                let mut buffer: [u8; 4096] = [0; 4096];
                loop {
                    match stdin.read(&mut buffer).await {
                        Ok(0)  => break,
                        Ok(n)  => { if input.write_all(&buffer[..n]).await.is_err() { break; } },
                        Err(_) => break,
                    }
                }
            });

            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut{ message }) | Ok(LogOutput::Console{ message }) => {
                        let mut stdout = std::io::stdout();
                        let _ = stdout.write_all(&message);
                        let _ = stdout.flush();
                    },
                    Ok(LogOutput::StdErr{ message }) => {
                        let mut stderr = std::io::stderr();
                        let _ = stderr.write_all(&message);
                        let _ = stderr.flush();
                    },
                    Ok(_)    => {},
                    Err(err) => { stdin_pump.abort(); return Err(Error::StartExecError{ name: name.into(), err }); },
                }
            }
            stdin_pump.abort();
        },
        Ok(StartExecResults::Detached) => {},
        Err(err) => { return Err(Error::StartExecError{ name: name.into(), err }); },
    }

    let inspect = match docker.inspect_exec(&exec.id).await {
        Ok(inspect) => inspect,
        Err(err)    => { return Err(Error::InspectExecError{ name: name.into(), err }); },
    };
    let code: i64 = inspect.exit_code.unwrap_or(0);
    if code != 0 { return Err(Error::ExecFailed{ name: name.into(), command, code, stderr: String::new() }); }
    Ok(())
}





/***** NETWORKS *****/
/// Creates a bridge network with the given name and labels.
///
/// A network that already exists counts as success.
pub async fn create_network(docker: &Docker, name: impl AsRef<str>, labels: HashMap<String, String>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    debug!("Creating network '{}'", name);
    match docker.create_network(CreateNetworkOptions{ name: name.into(), driver: "bridge".into(), labels, ..Default::default() }).await {
        Ok(_)                         => Ok(()),
        Err(err) if is_conflict(&err) => { debug!(" > Network '{}' already exists", name); Ok(()) },
        Err(err)                      => Err(Error::CreateNetworkError{ name: name.into(), err }),
    }
}

/// Removes the given network. A network that does not exist counts as success.
pub async fn remove_network(docker: &Docker, name: impl AsRef<str>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    match docker.remove_network(name).await {
        Ok(_)                          => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err)                       => Err(Error::RemoveNetworkError{ name: name.into(), err }),
    }
}

/// Connects the given container to the given network.
///
/// A container that is already connected counts as success.
pub async fn connect_network(docker: &Docker, name: impl AsRef<str>, network: impl AsRef<str>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    let network: &str = network.as_ref();
    match docker.connect_network(network, ConnectNetworkOptions::<String>{ container: name.into(), ..Default::default() }).await {
        Ok(_) => Ok(()),
        // "endpoint already exists" comes back as a 403 from the daemon
        Err(bollard::errors::Error::DockerResponseServerError{ status_code: 403, .. }) => Ok(()),
        Err(err) if is_conflict(&err) => Ok(()),
        Err(err)                      => Err(Error::ConnectNetworkError{ name: name.into(), network: network.into(), err }),
    }
}

/// Lists the networks carrying the given label, either as a bare key or as `key=value`.
pub async fn list_networks_by_label(docker: &Docker, label: impl AsRef<str>) -> Result<Vec<Network>, Error> {
    let mut filters: HashMap<String, Vec<String>> = HashMap::new();
    filters.insert("label".into(), vec![ label.as_ref().into() ]);
    match docker.list_networks(Some(ListNetworksOptions{ filters })).await {
        Ok(networks) => Ok(networks),
        Err(err)     => Err(Error::ListNetworksError{ err }),
    }
}





/***** VOLUMES *****/
/// Creates a named volume with the given labels. An existing volume counts as success.
pub async fn create_volume(docker: &Docker, name: impl AsRef<str>, labels: HashMap<String, String>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    match docker.create_volume(CreateVolumeOptions{ name: name.into(), labels, ..Default::default() }).await {
        Ok(_)                         => Ok(()),
        Err(err) if is_conflict(&err) => Ok(()),
        Err(err)                      => Err(Error::CreateVolumeError{ name: name.into(), err }),
    }
}

/// Removes the given volume. A volume that does not exist counts as success.
pub async fn remove_volume(docker: &Docker, name: impl AsRef<str>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    match docker.remove_volume(name, None).await {
        Ok(_)                          => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err)                       => Err(Error::RemoveVolumeError{ name: name.into(), err }),
    }
}

/// Lists the names of all volumes whose name starts with the given prefix.
pub async fn list_volumes_by_prefix(docker: &Docker, prefix: impl AsRef<str>) -> Result<Vec<String>, Error> {
    let prefix: &str = prefix.as_ref();
    let volumes = match docker.list_volumes::<String>(None).await {
        Ok(volumes) => volumes,
        Err(err)    => { return Err(Error::ListVolumesError{ err }); },
    };
    Ok(volumes.volumes.unwrap_or_default().into_iter().map(|v| v.name).filter(|n| n.starts_with(prefix)).collect())
}





/***** IMAGES *****/
/// Returns whether the given image is present in the local daemon.
pub async fn image_exists(docker: &Docker, image: impl AsRef<str>) -> Result<bool, Error> {
    let image: &str = image.as_ref();
    match docker.inspect_image(image).await {
        Ok(_)                          => Ok(true),
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err)                       => Err(Error::InspectImageError{ image: image.into(), err }),
    }
}

/// Pulls the given image from its registry.
pub async fn pull_image(docker: &Docker, image: impl AsRef<str>) -> Result<(), Error> {
    let image: &str = image.as_ref();
    debug!("Pulling image '{}'...", image);

    let options = CreateImageOptions::<String>{ from_image: image.into(), ..Default::default() };
    if let Err(err) = docker.create_image(Some(options), None, None).try_collect::<Vec<_>>().await {
        return Err(Error::PullError{ image: image.into(), err });
    }
    Ok(())
}

/// Tags the given image under a new name.
pub async fn tag_image(docker: &Docker, image: impl AsRef<str>, target: impl AsRef<str>) -> Result<(), Error> {
    let image: &str = image.as_ref();
    let target: &str = target.as_ref();

    // Split the target into repo and tag
    let (repo, tag): (&str, &str) = match target.rsplit_once(':') {
        Some((repo, tag)) => (repo, tag),
        None              => (target, "latest"),
    };
    match docker.tag_image(image, Some(TagImageOptions{ repo, tag })).await {
        Ok(_)    => Ok(()),
        Err(err) => Err(Error::TagError{ image: image.into(), target: target.into(), err }),
    }
}

/// Builds an image from the given context directory.
///
/// The context's `.dockerignore` is honored: shell-glob patterns exclude
/// paths, `#` lines are comments, and `!` lines are re-include overrides.
/// The selected dockerfile is always re-included so no exclusion can hide it.
/// The daemon's build output is streamed to stdout; a failing build surfaces
/// as an error carrying the daemon's message.
///
/// # Arguments
/// - `docker`: The Docker instance to build on.
/// - `context`: The build context directory.
/// - `dockerfile`: The dockerfile within the context.
/// - `tag`: The tag of the resulting image.
///
/// # Errors
/// This function errors if the context could not be read or tarred, or the
/// build itself failed.
pub async fn build_image(docker: &Docker, context: impl AsRef<Path>, dockerfile: impl AsRef<str>, tag: impl AsRef<str>) -> Result<(), Error> {
    let context: &Path = context.as_ref();
    let dockerfile: &str = dockerfile.as_ref();
    let tag: &str = tag.as_ref();
    debug!("Building image '{}' from context '{}' (dockerfile: {})", tag, context.display(), dockerfile);

    // Pack the context as an in-memory tarball, honoring the exclude-file
    let excludes: ExcludeRules = ExcludeRules::load(context, dockerfile)?;
    let mut tarball = tar::Builder::new(Vec::new());
    tar_dir(&mut tarball, context, context, &excludes)?;
    let tarball: Vec<u8> = match tarball.into_inner() {
        Ok(tarball) => tarball,
        Err(err)    => { return Err(Error::ContextTarError{ path: context.into(), err }); },
    };

    // Stream the build, echoing the daemon's progress to stdout
    let options = BuildImageOptions::<String> {
        dockerfile : dockerfile.into(),
        t          : tag.into(),
        rm         : true,
        ..Default::default()
    };
    let mut stream = docker.build_image(options, None, Some(hyper::Body::from(tarball)));
    while let Some(chunk) = stream.next().await {
        let info = match chunk {
            Ok(info) => info,
            Err(err) => { return Err(Error::BuildError{ image: tag.into(), err }); },
        };
        if let Some(output) = info.stream {
            print!("{}", output);
            let _ = std::io::stdout().flush();
        }
        if let Some(message) = info.error {
            return Err(Error::BuildFailed{ image: tag.into(), message });
        }
    }
    Ok(())
}

/// Streams the given image, as an image tarball, into a subprocess in the
/// given container (typically `ctr images import -`), making it visible to
/// the container's own runtime.
///
/// # Arguments
/// - `docker`: The Docker instance to talk to.
/// - `name`: The container whose runtime receives the image.
/// - `image`: The image (by local tag) to transfer.
/// - `command`: The import command to execute in the container, reading the tarball on stdin.
///
/// # Errors
/// This function errors if the export, the exec or the import command failed.
pub async fn load_image_into_container(docker: &Docker, name: impl AsRef<str>, image: impl AsRef<str>, command: Vec<String>) -> Result<(), Error> {
    let name: &str = name.as_ref();
    let image: &str = image.as_ref();
    debug!("Loading image '{}' into container '{}'...", image, name);

    let exec = match docker.create_exec(name, CreateExecOptions::<String> {
        cmd           : Some(command.clone()),
        attach_stdin  : Some(true),
        attach_stdout : Some(true),
        attach_stderr : Some(true),
        ..Default::default()
    }).await {
        Ok(exec) => exec,
        Err(err) => { return Err(Error::CreateExecError{ name: name.into(), err }); },
    };

    let mut output_buf: String = String::new();
    match docker.start_exec(&exec.id, None::<StartExecOptions>).await {
        Ok(StartExecResults::Attached{ mut output, mut input }) => {
            // Pump the export stream into the import process' stdin...
            let mut export = docker.export_image(image);
            while let Some(chunk) = export.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err)  => { return Err(Error::ExportImageError{ image: image.into(), err }); },
                };
                if let Err(err) = input.write_all(&chunk).await {
                    return Err(Error::ExecStreamError{ name: name.into(), err });
                }
            }
            // ...and close it, so the import process sees EOF
            if let Err(err) = input.shutdown().await { return Err(Error::ExecStreamError{ name: name.into(), err }); }
            drop(input);

            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut{ message }) | Ok(LogOutput::StdErr{ message }) => output_buf.push_str(String::from_utf8_lossy(&message).as_ref()),
                    Ok(_)    => {},
                    Err(err) => { return Err(Error::StartExecError{ name: name.into(), err }); },
                }
            }
        },
        Ok(StartExecResults::Detached) => {},
        Err(err) => { return Err(Error::StartExecError{ name: name.into(), err }); },
    }

    // The import only counts if the command agreed
    let inspect = match docker.inspect_exec(&exec.id).await {
        Ok(inspect) => inspect,
        Err(err)    => { return Err(Error::InspectExecError{ name: name.into(), err }); },
    };
    if inspect.exit_code.unwrap_or(0) != 0 {
        return Err(Error::ImportImageError{ name: name.into(), image: image.into(), message: output_buf });
    }
    debug!(" > Image '{}' loaded", image);
    Ok(())
}



#[cfg(test)]
mod tests {
    use super::*;

    fn rules_of(content: &str, dockerfile: &str) -> ExcludeRules {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".dockerignore"), content).unwrap();
        ExcludeRules::load(dir.path(), dockerfile).unwrap()
    }

    #[test]
    fn ignore_basic_exclusion() {
        let rules = rules_of("target\n*.log\n", "Dockerfile");
        assert!(rules.is_excluded(Path::new("target")));
        assert!(rules.is_excluded(Path::new("target/debug/app")));
        assert!(rules.is_excluded(Path::new("build.log")));
        assert!(!rules.is_excluded(Path::new("src/main.rs")));
    }

    #[test]
    fn ignore_comments_and_reincludes() {
        let rules = rules_of("# build artifacts\n*.log\n!important.log\n", "Dockerfile");
        assert!(rules.is_excluded(Path::new("noise.log")));
        assert!(!rules.is_excluded(Path::new("important.log")));
        // The comment line must not act as a pattern
        assert!(!rules.is_excluded(Path::new("# build artifacts")));
    }

    /// The dockerfile must survive even a catch-all exclusion.
    #[test]
    fn ignore_never_hides_dockerfile() {
        let rules = rules_of("*\n", "Dockerfile");
        assert!(rules.is_excluded(Path::new("src")));
        assert!(!rules.is_excluded(Path::new("Dockerfile")));

        let rules = rules_of("*\n", "deploy/custom.Dockerfile");
        assert!(!rules.is_excluded(Path::new("deploy/custom.Dockerfile")));
    }

    #[test]
    fn ignore_missing_file_excludes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ExcludeRules::load(dir.path(), "Dockerfile").unwrap();
        assert!(!rules.is_excluded(Path::new("anything")));
        assert!(!rules.has_reincludes());
    }
}
