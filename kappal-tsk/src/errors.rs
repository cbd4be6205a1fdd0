//  ERRORS.rs
//
//  Description:
//!   Defines errors that occur in the `kappal-tsk` crate.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::path::PathBuf;
use std::time::Duration;

use kappal_cfg::spec::Protocol;


/***** LIBRARY *****/
/// Errors that relate to the Docker facade.
#[derive(Debug)]
pub enum DockerError {
    /// Failed to connect to the local Docker daemon.
    ConnectionError{ err: bollard::errors::Error },
    /// Failed to inspect a container.
    InspectContainerError{ name: String, err: bollard::errors::Error },
    /// Failed to list containers.
    ListContainersError{ err: bollard::errors::Error },
    /// Failed to list networks.
    ListNetworksError{ err: bollard::errors::Error },
    /// Failed to list volumes.
    ListVolumesError{ err: bollard::errors::Error },
    /// Failed to create a container.
    CreateContainerError{ name: String, image: String, err: bollard::errors::Error },
    /// Failed to start a container.
    StartError{ name: String, err: bollard::errors::Error },
    /// Failed to stop a container.
    StopError{ name: String, err: bollard::errors::Error },
    /// Failed to remove a container.
    RemoveContainerError{ name: String, err: bollard::errors::Error },
    /// Failed to create a network.
    CreateNetworkError{ name: String, err: bollard::errors::Error },
    /// Failed to remove a network.
    RemoveNetworkError{ name: String, err: bollard::errors::Error },
    /// Failed to connect a container to a network.
    ConnectNetworkError{ name: String, network: String, err: bollard::errors::Error },
    /// Failed to remove a volume.
    RemoveVolumeError{ name: String, err: bollard::errors::Error },
    /// Failed to create a volume.
    CreateVolumeError{ name: String, err: bollard::errors::Error },
    /// The container was found, but carries no address on the asked network.
    ContainerNoNetwork{ name: String, network: String },

    /// Failed to create an exec instance in a container.
    CreateExecError{ name: String, err: bollard::errors::Error },
    /// Failed to start an exec instance in a container.
    StartExecError{ name: String, err: bollard::errors::Error },
    /// Failed to inspect an exec instance.
    InspectExecError{ name: String, err: bollard::errors::Error },
    /// The executed command returned a non-zero exit code.
    ExecFailed{ name: String, command: Vec<String>, code: i64, stderr: String },
    /// An exec stream broke down mid-way.
    ExecStreamError{ name: String, err: std::io::Error },

    /// Failed to read the build context.
    ContextReadError{ path: PathBuf, err: std::io::Error },
    /// Failed to parse the exclude-file in the build context.
    IgnoreFileParseError{ path: PathBuf, err: globset::Error },
    /// Failed to pack the build context as a tarball.
    ContextTarError{ path: PathBuf, err: std::io::Error },
    /// The Docker daemon reported a build error.
    BuildError{ image: String, err: bollard::errors::Error },
    /// The build stream itself reported a failure.
    BuildFailed{ image: String, message: String },
    /// Failed to export an image as a tar stream.
    ExportImageError{ image: String, err: bollard::errors::Error },
    /// Failed to import an image into a container's runtime.
    ImportImageError{ name: String, image: String, message: String },
    /// Failed to pull an image.
    PullError{ image: String, err: bollard::errors::Error },
    /// Failed to tag an image.
    TagError{ image: String, target: String, err: bollard::errors::Error },
    /// Failed to inspect an image.
    InspectImageError{ image: String, err: bollard::errors::Error },
}

impl Display for DockerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DockerError::*;
        match self {
            ConnectionError{ err }                  => write!(f, "Failed to connect to the local Docker daemon: {} (is Docker running?)", err),
            InspectContainerError{ name, err }      => write!(f, "Failed to inspect container '{}': {}", name, err),
            ListContainersError{ err }              => write!(f, "Failed to list containers: {}", err),
            ListNetworksError{ err }                => write!(f, "Failed to list networks: {}", err),
            ListVolumesError{ err }                 => write!(f, "Failed to list volumes: {}", err),
            CreateContainerError{ name, image, err } => write!(f, "Failed to create container '{}' from image '{}': {}", name, image, err),
            StartError{ name, err }                 => write!(f, "Failed to start container '{}': {}", name, err),
            StopError{ name, err }                  => write!(f, "Failed to stop container '{}': {}", name, err),
            RemoveContainerError{ name, err }       => write!(f, "Failed to remove container '{}': {}", name, err),
            CreateNetworkError{ name, err }         => write!(f, "Failed to create network '{}': {}", name, err),
            RemoveNetworkError{ name, err }         => write!(f, "Failed to remove network '{}': {}", name, err),
            ConnectNetworkError{ name, network, err } => write!(f, "Failed to connect container '{}' to network '{}': {}", name, network, err),
            RemoveVolumeError{ name, err }          => write!(f, "Failed to remove volume '{}': {}", name, err),
            CreateVolumeError{ name, err }          => write!(f, "Failed to create volume '{}': {}", name, err),
            ContainerNoNetwork{ name, network }     => write!(f, "Container '{}' has no address on network '{}'", name, network),

            CreateExecError{ name, err }  => write!(f, "Failed to create exec in container '{}': {}", name, err),
            StartExecError{ name, err }   => write!(f, "Failed to start exec in container '{}': {}", name, err),
            InspectExecError{ name, err } => write!(f, "Failed to inspect exec in container '{}': {}", name, err),
            ExecFailed{ name, command, code, stderr } => write!(f, "Command '{}' in container '{}' returned exit code {}\n\nstderr:\n{}\n", command.join(" "), name, code, stderr),
            ExecStreamError{ name, err }  => write!(f, "Exec stream to container '{}' broke down: {}", name, err),

            ContextReadError{ path, err }     => write!(f, "Failed to read build context '{}': {}", path.display(), err),
            IgnoreFileParseError{ path, err } => write!(f, "Failed to parse exclude-file '{}': {}", path.display(), err),
            ContextTarError{ path, err }      => write!(f, "Failed to pack build context '{}' as a tarball: {}", path.display(), err),
            BuildError{ image, err }          => write!(f, "Failed to build image '{}': {}", image, err),
            BuildFailed{ image, message }     => write!(f, "Build of image '{}' failed: {}", image, message),
            ExportImageError{ image, err }    => write!(f, "Failed to export image '{}': {}", image, err),
            ImportImageError{ name, image, message } => write!(f, "Failed to import image '{}' into container '{}': {}", image, name, message),
            PullError{ image, err }           => write!(f, "Failed to pull image '{}': {}", image, err),
            TagError{ image, target, err }    => write!(f, "Failed to tag image '{}' as '{}': {}", image, target, err),
            InspectImageError{ image, err }   => write!(f, "Failed to inspect image '{}': {}", image, err),
        }
    }
}

impl Error for DockerError {}



/// Errors that relate to the Kubernetes facade.
#[derive(Debug)]
pub enum KubeError {
    /// Failed to read the kubeconfig file.
    ConfigReadError{ path: PathBuf, err: kube::config::KubeconfigError },
    /// Failed to interpret the kubeconfig file.
    ConfigLoadError{ path: PathBuf, err: kube::config::KubeconfigError },
    /// Failed to build a client on top of the config.
    ClientCreateError{ err: kube::Error },
    /// Failed to list resources of some kind.
    ListError{ what: &'static str, namespace: String, err: kube::Error },
    /// Failed to get a single pod.
    GetPodError{ name: String, namespace: String, err: kube::Error },
    /// Failed to delete the run-to-completion workloads of a project.
    DeleteJobsError{ namespace: String, err: kube::Error },
    /// Not every pod under the selector became ready before the deadline.
    ReadyTimeout{ namespace: String, selector: String, timeout: Duration },
    /// Failed to open a log stream to a pod.
    LogOpenError{ pod: String, err: kube::Error },
    /// A log stream broke down mid-way.
    LogStreamError{ pod: String, err: std::io::Error },
    /// No pod with the given index exists for the service.
    PodNotFound{ service: String, index: usize, namespace: String },
    /// The selected pod is not in the running phase.
    PodNotRunning{ pod: String, phase: String },
    /// Failed to open an exec channel to a pod.
    ExecError{ pod: String, err: kube::Error },
    /// An exec I/O bridge broke down.
    ExecStreamError{ pod: String, err: std::io::Error },
    /// The remote process exited with a non-zero code.
    ExecFailed{ pod: String, code: i32 },
}

impl Display for KubeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use KubeError::*;
        match self {
            ConfigReadError{ path, err } => write!(f, "Failed to read kubeconfig '{}': {}", path.display(), err),
            ConfigLoadError{ path, err } => write!(f, "Failed to load kubeconfig '{}': {}", path.display(), err),
            ClientCreateError{ err }     => write!(f, "Failed to create Kubernetes client: {}", err),
            ListError{ what, namespace, err } => write!(f, "Failed to list {} in namespace '{}': {}", what, namespace, err),
            GetPodError{ name, namespace, err } => write!(f, "Failed to get pod '{}' in namespace '{}': {}", name, namespace, err),
            DeleteJobsError{ namespace, err }   => write!(f, "Failed to delete jobs in namespace '{}': {}", namespace, err),
            ReadyTimeout{ namespace, selector, timeout } => write!(f, "Pods matching '{}' in namespace '{}' did not become ready within {}s", selector, namespace, timeout.as_secs()),
            LogOpenError{ pod, err }    => write!(f, "Failed to open log stream to pod '{}': {}", pod, err),
            LogStreamError{ pod, err }  => write!(f, "Log stream to pod '{}' broke down: {}", pod, err),
            PodNotFound{ service, index, namespace } => write!(f, "Service '{}' has no pod with index {} in namespace '{}'", service, index, namespace),
            PodNotRunning{ pod, phase } => write!(f, "Pod '{}' is not running (phase: {})", pod, phase),
            ExecError{ pod, err }       => write!(f, "Failed to open exec channel to pod '{}': {}", pod, err),
            ExecStreamError{ pod, err } => write!(f, "Exec stream to pod '{}' broke down: {}", pod, err),
            ExecFailed{ pod, code }     => write!(f, "Remote process in pod '{}' exited with code {}", pod, code),
        }
    }
}

impl Error for KubeError {}



/// Errors that relate to the per-project cluster lifecycle.
#[derive(Debug)]
pub enum ClusterError {
    /// Something Docker-related went wrong.
    DockerError{ err: DockerError },
    /// Something Kubernetes-related went wrong.
    KubeError{ err: KubeError },

    /// Two published ports claim the same container port/protocol pair.
    DuplicatePublishedPort{ container: u16, protocol: Protocol },
    /// A host port we need is already taken.
    PortInUse{ port: u16, protocol: Protocol, err: std::io::Error },
    /// The cluster did not produce a working kubeconfig in time.
    ReadyTimeout{ name: String, timeout: Duration },
    /// The kubeconfig read from the cluster misses the server address to patch.
    KubeconfigPatchError{ name: String },
    /// Failed to create the runtime directory or write the kubeconfig.
    KubeconfigWriteError{ path: PathBuf, err: std::io::Error },
    /// Failed to stage the init-image build context.
    InitContextError{ path: PathBuf, err: std::io::Error },
}

impl Display for ClusterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ClusterError::*;
        match self {
            DockerError{ err } => write!(f, "{}", err),
            KubeError{ err }   => write!(f, "{}", err),

            DuplicatePublishedPort{ container, protocol } => write!(f, "Multiple services publish container port {}/{}; every (container port, protocol) pair may be published at most once per project", container, protocol),
            PortInUse{ port, protocol, err }              => write!(f, "Host port {}/{} is already in use: {} (is another kappal project or process bound to it?)", port, protocol, err),
            ReadyTimeout{ name, timeout }                 => write!(f, "Cluster container '{}' did not become ready within {}s", name, timeout.as_secs()),
            KubeconfigPatchError{ name }                  => write!(f, "Kubeconfig read from cluster container '{}' has no server address to patch", name),
            KubeconfigWriteError{ path, err }             => write!(f, "Failed to write kubeconfig '{}': {}", path.display(), err),
            InitContextError{ path, err }                 => write!(f, "Failed to stage init-image build context in '{}': {}", path.display(), err),
        }
    }
}

impl Error for ClusterError {}

impl From<DockerError> for ClusterError {
    #[inline]
    fn from(err: DockerError) -> Self { Self::DockerError{ err } }
}
impl From<KubeError> for ClusterError {
    #[inline]
    fn from(err: KubeError) -> Self { Self::KubeError{ err } }
}



/// Errors that relate to the state discoverer.
#[derive(Debug)]
pub enum StateError {
    /// Something Docker-related went wrong.
    DockerError{ err: DockerError },
    /// Something cluster-related went wrong.
    ClusterError{ err: ClusterError },
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use StateError::*;
        match self {
            DockerError{ err }  => write!(f, "{}", err),
            ClusterError{ err } => write!(f, "{}", err),
        }
    }
}

impl Error for StateError {}

impl From<DockerError> for StateError {
    #[inline]
    fn from(err: DockerError) -> Self { Self::DockerError{ err } }
}
impl From<ClusterError> for StateError {
    #[inline]
    fn from(err: ClusterError) -> Self { Self::ClusterError{ err } }
}
