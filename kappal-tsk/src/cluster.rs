//  CLUSTER.rs
//
//  Description:
//!   Owns the per-project containerized single-node cluster: bring-up,
//!   port-binding reconciliation, teardown, image injection into the
//!   cluster's containerd store, and patching the kubeconfig for the
//!   caller's network view.
//

use std::collections::HashMap;
use std::net::{TcpListener, UdpSocket};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use bollard::Docker;
use bollard::container::Config;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use kube::Client;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use kappal_cfg::project::{sanitize, short_digest};
use kappal_cfg::spec::{self, Protocol, PublishedPort};
use kappal_cfg::workspace::Workspace;

use crate::docker;
pub use crate::errors::ClusterError as Error;
use crate::k8s;


/***** CONSTANTS *****/
/// The single-node Kubernetes distribution we run in the cluster container.
pub const DEFAULT_CLUSTER_IMAGE: &str = "rancher/k3s:v1.27.4-k3s1";
/// The environment variable overriding the cluster image.
pub const ENV_CLUSTER_IMAGE: &str = "KAPPAL_CLUSTER_IMAGE";

/// Where the k3s distribution keeps its state (mounted on the data volume).
const CLUSTER_STATE_DIR: &str = "/var/lib/rancher/k3s";
/// Where the k3s distribution writes its kubeconfig.
const CLUSTER_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";
/// The containerd socket inside the cluster container.
const CLUSTER_CONTAINERD_SOCK: &str = "/run/k3s/containerd/containerd.sock";
/// The port the cluster API server listens on inside its container.
const CLUSTER_API_PORT: u16 = 6443;

/// The bottom of the deterministically assigned API host-port range.
const API_PORT_BASE: u16 = 16443;
/// The size of the deterministically assigned API host-port range.
const API_PORT_RANGE: u16 = 10000;

/// The total budget for the cluster to produce a working kubeconfig.
const READY_TIMEOUT: Duration = Duration::from_secs(180);
/// The pause between bring-up readiness attempts.
const READY_INTERVAL: Duration = Duration::from_secs(2);





/***** HELPER FUNCTIONS *****/
/// Returns whether kappal itself appears to run inside a container.
///
/// The heuristic is the in-container sentinel file plus a hexadecimal-looking
/// hostname (the Docker default).
fn runs_in_container() -> bool {
    if !PathBuf::from("/.dockerenv").exists() { return false; }
    let hostname: String = own_hostname();
    hostname.len() == 12 && hostname.chars().all(|c| c.is_ascii_hexdigit())
}

/// Returns the hostname of the calling process, best-effort.
fn own_hostname() -> String {
    if let Ok(hostname) = std::env::var("HOSTNAME") { return hostname.trim().into(); }
    std::fs::read_to_string("/etc/hostname").map(|h| h.trim().into()).unwrap_or_default()
}

/// Replaces the value of every `server:` line in the given kubeconfig with
/// the given endpoint, preserving indentation.
///
/// # Returns
/// The patched config, or None if no `server:` line was found.
fn substitute_server(raw: &str, endpoint: &str) -> Option<String> {
    let mut found: bool = false;
    let mut res: String = String::with_capacity(raw.len());
    for line in raw.lines() {
        let indent: usize = line.len() - line.trim_start().len();
        if line.trim_start().starts_with("server:") {
            res.push_str(&line[..indent]);
            res.push_str("server: ");
            res.push_str(endpoint);
            found = true;
        } else {
            res.push_str(line);
        }
        res.push('\n');
    }
    if found { Some(res) } else { None }
}





/***** LIBRARY *****/
/// Manages the lifecycle of one containerized single-node cluster, keyed by
/// project identity.
#[derive(Clone, Debug)]
pub struct Cluster {
    /// The project identity this cluster belongs to.
    project   : String,
    /// The workspace where the kubeconfig lands.
    workspace : Workspace,
    /// The registered published ports (see [`Cluster::set_published_ports()`]).
    ports     : Vec<PublishedPort>,
}

impl Cluster {
    /// Constructor for the Cluster manager of the given project.
    ///
    /// # Arguments
    /// - `project`: The project identity.
    /// - `workspace`: The project workspace (receives `runtime/kubeconfig`).
    #[inline]
    pub fn new(project: impl Into<String>, workspace: Workspace) -> Self {
        Self{ project: project.into(), workspace, ports: vec![] }
    }

    /// Returns the name of the cluster container.
    #[inline]
    pub fn container_name(&self) -> String { format!("kappal-{}-cluster", self.project) }

    /// Returns the name of the project's bridge network.
    #[inline]
    pub fn network_name(&self) -> String { format!("kappal-{}-net", self.project) }

    /// Returns the name of the cluster's data volume.
    #[inline]
    pub fn volume_name(&self) -> String { format!("kappal-{}-cluster-data", short_digest(&self.project)) }

    /// Returns the deterministically assigned host port of the cluster API.
    ///
    /// The port is `16443 + (first two digest bytes mod 10000)`, so every
    /// project lands on a stable port in `[16443, 26442]`.
    pub fn api_port(&self) -> u16 {
        let digest = Sha256::digest(self.project.as_bytes());
        let head: u16 = u16::from_be_bytes([digest[0], digest[1]]);
        API_PORT_BASE + (head % API_PORT_RANGE)
    }

    /// Returns the cluster image to use, honoring the environment override.
    #[inline]
    pub fn image() -> String {
        std::env::var(ENV_CLUSTER_IMAGE).unwrap_or_else(|_| DEFAULT_CLUSTER_IMAGE.into())
    }

    /// Registers the complete set of published ports for this project.
    ///
    /// Must be called before [`Cluster::ensure_running()`] for port-change
    /// reconciliation to take effect.
    ///
    /// # Errors
    /// This function errors if two tuples claim the same (container port,
    /// protocol) pair.
    pub fn set_published_ports(&mut self, ports: Vec<PublishedPort>) -> Result<(), Error> {
        let mut seen: HashMap<(u16, Protocol), ()> = HashMap::new();
        for port in &ports {
            if seen.insert((port.container, port.protocol), ()).is_some() {
                return Err(Error::DuplicatePublishedPort{ container: port.container, protocol: port.protocol });
            }
        }
        self.ports = ports;
        Ok(())
    }

    /// Computes the expected port-binding map of the cluster container: every
    /// published port plus the cluster-API binding.
    fn expected_bindings(&self) -> HashMap<String, u16> {
        let mut res: HashMap<String, u16> = HashMap::new();
        res.insert(format!("{}/tcp", CLUSTER_API_PORT), self.api_port());
        for port in &self.ports {
            res.insert(format!("{}/{}", port.container, port.protocol), port.host);
        }
        res
    }

    /// Ensures the cluster container exists, runs, and carries exactly the
    /// registered port bindings.
    ///
    /// A running container whose bindings differ from the expected set (in
    /// either the container-port slots or the associated host ports) is torn
    /// down and recreated; the data volume survives, so the cluster state
    /// does too.
    ///
    /// # Returns
    /// A connected client for the (now ready) cluster.
    ///
    /// # Errors
    /// This function errors if Docker is unreachable, a host port is taken,
    /// or the cluster does not become ready in time.
    pub async fn ensure_running(&self, docker: &Docker) -> Result<Client, Error> {
        let name: String = self.container_name();

        if docker::container_running(docker, &name).await? {
            let actual: HashMap<String, u16> = docker::container_port_bindings(docker, &name).await?;
            let expected: HashMap<String, u16> = self.expected_bindings();
            if actual == expected {
                debug!("Cluster container '{}' is running with up-to-date bindings", name);
                return self.wait_for_ready(docker).await;
            }

            info!("Published ports of project '{}' changed; recreating cluster container", self.project);
            docker::stop_container(docker, &name, 30).await?;
            docker::remove_container(docker, &name).await?;
        } else if docker::container_exists(docker, &name).await? {
            debug!("Removing stopped cluster container '{}'", name);
            docker::remove_container(docker, &name).await?;
        }

        self.create_and_start(docker).await?;
        self.wait_for_ready(docker).await
    }

    /// Creates the network, volume and cluster container, and starts the latter.
    async fn create_and_start(&self, docker: &Docker) -> Result<(), Error> {
        let name: String = self.container_name();
        info!("Starting cluster for project '{}'...", self.project);

        // Surrounding resources first (both idempotent)
        let mut labels: HashMap<String, String> = HashMap::new();
        labels.insert(spec::LABEL_PROJECT.into(), self.project.clone());
        docker::create_network(docker, self.network_name(), labels.clone()).await?;
        docker::create_volume(docker, self.volume_name(), labels.clone()).await?;

        // The cluster image has to be available before we create anything
        let image: String = Self::image();
        if !docker::image_exists(docker, &image).await? {
            info!("Pulling cluster image '{}'...", image);
            docker::pull_image(docker, &image).await?;
        }

        // Fail fast on host ports someone else holds
        self.probe_host_ports()?;

        // Build the binding map and the container config
        let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for (slot, host) in self.expected_bindings() {
            bindings.insert(slot, Some(vec![PortBinding{ host_ip: Some("0.0.0.0".into()), host_port: Some(host.to_string()) }]));
        }
        let exposed: HashMap<String, HashMap<(), ()>> = bindings.keys().map(|slot| (slot.clone(), HashMap::new())).collect();

        labels.insert(spec::LABEL_ROLE.into(), spec::ROLE_CLUSTER.into());
        let config: Config<String> = Config {
            image         : Some(image),
            // A stable hostname keeps the node identity across recreations
            hostname      : Some(name.clone()),
            cmd           : Some(vec![
                "server".into(),
                "--disable".into(), "traefik".into(),
                "--disable".into(), "metrics-server".into(),
                "--bind-address".into(), "0.0.0.0".into(),
                "--tls-san".into(), "127.0.0.1".into(),
                "--tls-san".into(), "0.0.0.0".into(),
            ]),
            exposed_ports : Some(exposed),
            labels        : Some(labels),
            host_config   : Some(HostConfig {
                privileged     : Some(true),
                restart_policy : Some(RestartPolicy{ name: Some(RestartPolicyNameEnum::UNLESS_STOPPED), maximum_retry_count: None }),
                network_mode   : Some(self.network_name()),
                port_bindings  : Some(bindings),
                binds          : Some(vec![ format!("{}:{}", self.volume_name(), CLUSTER_STATE_DIR) ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        docker::create_and_start_container(docker, &name, config).await?;
        Ok(())
    }

    /// Probes every host port we are about to bind with a transient listener,
    /// so a taken port fails fast with a diagnostic instead of a daemon error.
    fn probe_host_ports(&self) -> Result<(), Error> {
        let mut slots: Vec<(u16, Protocol)> = vec![ (self.api_port(), Protocol::Tcp) ];
        slots.extend(self.ports.iter().map(|p| (p.host, p.protocol)));

        for (port, protocol) in slots {
            let res: Result<(), std::io::Error> = match protocol {
                Protocol::Tcp => TcpListener::bind(("0.0.0.0", port)).map(|_| ()),
                Protocol::Udp => UdpSocket::bind(("0.0.0.0", port)).map(|_| ()),
            };
            if let Err(err) = res {
                return Err(Error::PortInUse{ port, protocol, err });
            }
        }
        Ok(())
    }

    /// Waits until the cluster produces a working kubeconfig, then writes the
    /// patched version to `runtime/kubeconfig` and probes connectivity.
    ///
    /// # Returns
    /// A client that has successfully answered a trivial call.
    ///
    /// # Errors
    /// This function errors if the 180-second budget runs out first.
    pub async fn wait_for_ready(&self, docker: &Docker) -> Result<Client, Error> {
        let name: String = self.container_name();
        debug!("Waiting for cluster '{}' to become ready...", name);

        let start: Instant = Instant::now();
        while start.elapsed() < READY_TIMEOUT {
            // Fish the generated kubeconfig out of the container
            let raw: Option<String> = match docker::exec_buffered(docker, &name, vec!["cat".into(), CLUSTER_KUBECONFIG.into()]).await {
                Ok(raw) if raw.contains("clusters:") => Some(raw),
                _ => None,
            };

            if let Some(raw) = raw {
                let patched: String = self.patch_kubeconfig(docker, &raw).await?;
                self.write_kubeconfig(&patched)?;

                // Only a cluster that answers counts as ready
                if let Ok(client) = k8s::connect(self.workspace.kubeconfig()).await {
                    if k8s::probe(&client).await {
                        debug!(" > Cluster '{}' ready after {}s", name, start.elapsed().as_secs());
                        return Ok(client);
                    }
                }
            }

            tokio::time::sleep(READY_INTERVAL).await;
        }

        Err(Error::ReadyTimeout{ name, timeout: READY_TIMEOUT })
    }

    /// Resolves the API endpoint for the caller's network view.
    ///
    /// Outside a container that is simply `127.0.0.1` with the assigned host
    /// port. Inside one, host bindings are unreachable; we join the cluster's
    /// bridge network and talk to the cluster container directly instead.
    pub async fn resolve_endpoint(&self, docker: &Docker) -> Result<String, Error> {
        if runs_in_container() {
            let own: String = own_hostname();
            debug!("Running inside container '{}'; joining network '{}'", own, self.network_name());
            docker::connect_network(docker, &own, self.network_name()).await?;
            let ip: String = docker::container_address(docker, self.container_name(), self.network_name()).await?;
            Ok(format!("https://{}:{}", ip, CLUSTER_API_PORT))
        } else {
            Ok(format!("https://127.0.0.1:{}", self.api_port()))
        }
    }

    /// Substitutes the server address in the given kubeconfig with the
    /// resolved endpoint. Idempotent: an already patched config is patched to
    /// the same result.
    ///
    /// # Errors
    /// This function errors if the config carries no server address at all.
    pub async fn patch_kubeconfig(&self, docker: &Docker, raw: &str) -> Result<String, Error> {
        let endpoint: String = self.resolve_endpoint(docker).await?;
        match substitute_server(raw, &endpoint) {
            Some(patched) => Ok(patched),
            None          => Err(Error::KubeconfigPatchError{ name: self.container_name() }),
        }
    }

    /// Writes the given kubeconfig to `runtime/kubeconfig`.
    fn write_kubeconfig(&self, contents: &str) -> Result<(), Error> {
        let runtime: PathBuf = self.workspace.runtime();
        if let Err(err) = std::fs::create_dir_all(&runtime) {
            return Err(Error::KubeconfigWriteError{ path: runtime, err });
        }
        let path: PathBuf = self.workspace.kubeconfig();
        if let Err(err) = std::fs::write(&path, contents) {
            return Err(Error::KubeconfigWriteError{ path, err });
        }
        Ok(())
    }

    /// Builds the image of the given service and injects it into the cluster's
    /// containerd store under `<project>-<service>:latest`.
    ///
    /// # Arguments
    /// - `docker`: The Docker instance to build on.
    /// - `service`: The service whose image to build.
    /// - `context`: The build context directory.
    /// - `dockerfile`: The dockerfile within the context.
    ///
    /// # Returns
    /// The tag the cluster now knows the image by.
    pub async fn build_image(&self, docker: &Docker, service: &str, context: impl AsRef<std::path::Path>, dockerfile: &str) -> Result<String, Error> {
        let tag: String = format!("{}-{}:latest", self.project, sanitize(service));
        docker::build_image(docker, context, dockerfile, &tag).await?;
        self.load_image(docker, &tag).await?;
        Ok(tag)
    }

    /// Streams a locally built image into the cluster's containerd store.
    pub async fn load_image(&self, docker: &Docker, tag: &str) -> Result<(), Error> {
        let command: Vec<String> = vec![
            "ctr".into(), "--address".into(), CLUSTER_CONTAINERD_SOCK.into(),
            "images".into(), "import".into(), "-".into(),
        ];
        docker::load_image_into_container(docker, self.container_name(), tag, command).await?;
        Ok(())
    }

    /// Builds and injects the init-barrier agent image, when the agent binary
    /// is shipped beside the kappal executable.
    ///
    /// This keeps the agent in the cluster at exactly the version of the
    /// running tool. When the binary is not on disk this is a no-op and the
    /// cluster is expected to pull the configured image reference instead.
    ///
    /// # Returns
    /// True if the image was built and loaded, false if the binary was absent.
    pub async fn load_init_image(&self, docker: &Docker) -> Result<bool, Error> {
        // Look for the agent right beside our own executable
        let binary: Option<PathBuf> = std::env::current_exe().ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(spec::INIT_BINARY_NAME)))
            .filter(|path| path.exists());
        let binary: PathBuf = match binary {
            Some(binary) => binary,
            None         => {
                debug!("No '{}' binary beside the executable; relying on the configured image", spec::INIT_BINARY_NAME);
                return Ok(false);
            },
        };

        // Stage a minimal scratch-based context around it
        let staging = match tempfile::tempdir() {
            Ok(staging) => staging,
            Err(err)    => { return Err(Error::InitContextError{ path: std::env::temp_dir(), err }); },
        };
        if let Err(err) = std::fs::copy(&binary, staging.path().join(spec::INIT_BINARY_NAME)) {
            return Err(Error::InitContextError{ path: staging.path().into(), err });
        }
        let dockerfile: String = format!("FROM scratch\nCOPY {bin} /{bin}\nENTRYPOINT [\"/{bin}\"]\n", bin = spec::INIT_BINARY_NAME);
        if let Err(err) = std::fs::write(staging.path().join("Dockerfile"), dockerfile) {
            return Err(Error::InitContextError{ path: staging.path().into(), err });
        }

        let tag: String = std::env::var(spec::ENV_INIT_IMAGE).unwrap_or_else(|_| spec::DEFAULT_INIT_IMAGE.into());
        info!("Loading init-barrier image '{}' into the cluster", tag);
        docker::build_image(docker, staging.path(), "Dockerfile", &tag).await?;
        self.load_image(docker, &tag).await?;
        Ok(true)
    }

    /// Stops the cluster container. Idempotent on absent or stopped.
    pub async fn stop(&self, docker: &Docker) -> Result<(), Error> {
        docker::stop_container(docker, self.container_name(), 30).await?;
        Ok(())
    }

    /// Force-removes the cluster container. Idempotent on absent.
    pub async fn remove(&self, docker: &Docker) -> Result<(), Error> {
        docker::remove_container(docker, self.container_name()).await?;
        Ok(())
    }

    /// Removes the data volume, the bridge network and the on-disk runtime
    /// directory. Individual failures are logged but never abort the chain.
    pub async fn clean_runtime(&self, docker: &Docker) {
        if let Err(err) = docker::remove_volume(docker, self.volume_name()).await {
            warn!("Failed to remove data volume: {}", err);
        }
        if let Err(err) = docker::remove_network(docker, self.network_name()).await {
            warn!("Failed to remove network: {}", err);
        }
        self.workspace.clean_runtime();
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_of(project: &str) -> Cluster {
        Cluster::new(project, Workspace::of("/tmp/kappal-test"))
    }

    #[test]
    fn names_are_deterministic() {
        let cluster = cluster_of("web-0a1b2c3d");
        assert_eq!(cluster.container_name(), "kappal-web-0a1b2c3d-cluster");
        assert_eq!(cluster.network_name(), "kappal-web-0a1b2c3d-net");
        assert_eq!(cluster.volume_name(), format!("kappal-{}-cluster-data", short_digest("web-0a1b2c3d")));
    }

    /// The API port must be stable per project and stay in [16443, 26442].
    #[test]
    fn api_port_range() {
        for project in ["web-0a1b2c3d", "db-deadbeef", "x-00000000"] {
            let cluster = cluster_of(project);
            let port = cluster.api_port();
            assert!((16443..=26442).contains(&port), "port {} out of range", port);
            assert_eq!(port, cluster_of(project).api_port());
        }
    }

    #[test]
    fn duplicate_container_ports_rejected() {
        let mut cluster = cluster_of("web-0a1b2c3d");
        let res = cluster.set_published_ports(vec![
            PublishedPort{ host: 8080, container: 80, protocol: Protocol::Tcp },
            PublishedPort{ host: 9090, container: 80, protocol: Protocol::Tcp },
        ]);
        assert!(matches!(res, Err(Error::DuplicatePublishedPort{ container: 80, .. })));

        // The same container port under a different protocol is fine
        let res = cluster.set_published_ports(vec![
            PublishedPort{ host: 8080, container: 80, protocol: Protocol::Tcp },
            PublishedPort{ host: 8080, container: 80, protocol: Protocol::Udp },
        ]);
        assert!(res.is_ok());
    }

    /// Reconciliation compares slot-by-slot: same slots with different host
    /// ports count as drift, as do added or removed slots.
    #[test]
    fn expected_bindings_shape() {
        let mut cluster = cluster_of("web-0a1b2c3d");
        cluster.set_published_ports(vec![
            PublishedPort{ host: 8080, container: 80, protocol: Protocol::Tcp },
            PublishedPort{ host: 5353, container: 53, protocol: Protocol::Udp },
        ]).unwrap();

        let expected = cluster.expected_bindings();
        assert_eq!(expected.get("80/tcp"), Some(&8080));
        assert_eq!(expected.get("53/udp"), Some(&5353));
        assert_eq!(expected.get("6443/tcp"), Some(&cluster.api_port()));
        assert_eq!(expected.len(), 3);

        // Changing a host port changes the map (the drift reconciliation keys on this)
        cluster.set_published_ports(vec![
            PublishedPort{ host: 8081, container: 80, protocol: Protocol::Tcp },
        ]).unwrap();
        let changed = cluster.expected_bindings();
        assert_eq!(changed.get("80/tcp"), Some(&8081));
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn kubeconfig_patch_is_idempotent() {
        let raw = "apiVersion: v1\nclusters:\n- cluster:\n    server: https://127.0.0.1:6443\n  name: default\n";

        let patched = substitute_server(raw, "https://127.0.0.1:19999").unwrap();
        assert!(patched.contains("    server: https://127.0.0.1:19999\n"));
        assert!(patched.contains("  name: default"));

        // Re-patching an already patched config is a no-op
        let again = substitute_server(&patched, "https://127.0.0.1:19999").unwrap();
        assert_eq!(patched, again);

        // A config without a server address cannot be patched
        assert!(substitute_server("apiVersion: v1\n", "https://x").is_none());
    }
}
