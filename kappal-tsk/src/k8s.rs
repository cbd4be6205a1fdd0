//  K8S.rs
//
//  Description:
//!   Defines functions that interact with the Kubernetes API of a project
//!   cluster: listing and watching workloads, waiting for pod readiness,
//!   streaming logs and attaching execs.
//

use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::Stream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod, Service};
use kube::api::{Api, AttachParams, DeleteParams, ListParams, LogParams, WatchParams};
use kube::core::WatchEvent;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::compat::FuturesAsyncReadCompatExt;

pub use crate::errors::KubeError as Error;


/***** CONSTANTS *****/
/// The interval between readiness poll attempts.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);





/***** HELPER FUNCTIONS *****/
/// Returns the phase of the given pod, or an empty string if unset.
#[inline]
pub fn pod_phase(pod: &Pod) -> String {
    pod.status.as_ref().and_then(|s| s.phase.clone()).unwrap_or_default()
}

/// Returns whether the given pod counts as ready.
///
/// A pod is ready when its phase is `Succeeded`, or when its phase is
/// `Running` and its `Ready` condition is true.
pub fn pod_is_ready(pod: &Pod) -> bool {
    let phase: String = pod_phase(pod);
    if phase == "Succeeded" { return true; }
    if phase != "Running" { return false; }
    pod.status.as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

/// Extracts the exit code out of the status a finished exec left behind.
fn exec_exit_code(status: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Status) -> i32 {
    if status.status.as_deref() == Some("Success") { return 0; }

    // A non-zero exit hides in the 'ExitCode' cause of the failure details
    status.details.as_ref()
        .and_then(|d| d.causes.as_ref())
        .and_then(|causes| causes.iter().find(|c| c.reason.as_deref() == Some("ExitCode")))
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.parse::<i32>().ok())
        .unwrap_or(1)
}





/***** CONNECTION *****/
/// Builds a client on top of the given kubeconfig file.
///
/// # Arguments
/// - `kubeconfig`: The path of the kubeconfig to read.
///
/// # Returns
/// A connected (but unprobed) client.
///
/// # Errors
/// This function errors if the kubeconfig could not be read or interpreted.
pub async fn connect(kubeconfig: impl AsRef<Path>) -> Result<Client, Error> {
    let kubeconfig: &Path = kubeconfig.as_ref();
    debug!("Building Kubernetes client from '{}'", kubeconfig.display());

    let raw: Kubeconfig = match Kubeconfig::read_from(kubeconfig) {
        Ok(raw)  => raw,
        Err(err) => { return Err(Error::ConfigReadError{ path: kubeconfig.into(), err }); },
    };
    let config: Config = match Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default()).await {
        Ok(config) => config,
        Err(err)   => { return Err(Error::ConfigLoadError{ path: kubeconfig.into(), err }); },
    };
    match Client::try_from(config) {
        Ok(client) => Ok(client),
        Err(err)   => Err(Error::ClientCreateError{ err }),
    }
}

/// Probes whether the cluster behind the given client answers at all.
///
/// # Returns
/// True if a trivial list call succeeded, false otherwise.
pub async fn probe(client: &Client) -> bool {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    namespaces.list(&ListParams::default().limit(1)).await.is_ok()
}





/***** LISTING *****/
/// Lists the pods in the given namespace matching the given label selector.
pub async fn list_pods(client: &Client, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    match pods.list(&ListParams::default().labels(selector)).await {
        Ok(list) => Ok(list.items),
        Err(err) => Err(Error::ListError{ what: "pods", namespace: namespace.into(), err }),
    }
}

/// Lists the deployments in the given namespace matching the given label selector.
pub async fn list_deployments(client: &Client, namespace: &str, selector: &str) -> Result<Vec<Deployment>, Error> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    match deployments.list(&ListParams::default().labels(selector)).await {
        Ok(list) => Ok(list.items),
        Err(err) => Err(Error::ListError{ what: "deployments", namespace: namespace.into(), err }),
    }
}

/// Lists the jobs in the given namespace matching the given label selector.
pub async fn list_jobs(client: &Client, namespace: &str, selector: &str) -> Result<Vec<Job>, Error> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    match jobs.list(&ListParams::default().labels(selector)).await {
        Ok(list) => Ok(list.items),
        Err(err) => Err(Error::ListError{ what: "jobs", namespace: namespace.into(), err }),
    }
}

/// Lists the services in the given namespace matching the given label selector.
pub async fn list_services(client: &Client, namespace: &str, selector: &str) -> Result<Vec<Service>, Error> {
    let services: Api<Service> = Api::namespaced(client.clone(), namespace);
    match services.list(&ListParams::default().labels(selector)).await {
        Ok(list) => Ok(list.items),
        Err(err) => Err(Error::ListError{ what: "services", namespace: namespace.into(), err }),
    }
}

/// Lists the nodes of the cluster matching the given label selector.
pub async fn list_nodes(client: &Client, selector: &str) -> Result<Vec<Node>, Error> {
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default().labels(selector)).await {
        Ok(list) => Ok(list.items),
        Err(err) => Err(Error::ListError{ what: "nodes", namespace: "<cluster>".into(), err }),
    }
}

/// Returns a single pod by name.
pub async fn get_pod(client: &Client, namespace: &str, name: &str) -> Result<Pod, Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    match pods.get(name).await {
        Ok(pod)  => Ok(pod),
        Err(err) => Err(Error::GetPodError{ name: name.into(), namespace: namespace.into(), err }),
    }
}

/// Opens a watch on the pods in the given namespace matching the given label
/// selector.
///
/// # Returns
/// A stream of watch events over the matched pods.
///
/// # Errors
/// This function errors if the watch could not be opened.
pub async fn watch_pods(client: &Client, namespace: &str, selector: &str) -> Result<impl Stream<Item = Result<WatchEvent<Pod>, kube::Error>>, Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    match pods.watch(&WatchParams::default().labels(selector), "0").await {
        Ok(stream) => Ok(stream),
        Err(err)   => Err(Error::ListError{ what: "pod watch", namespace: namespace.into(), err }),
    }
}

/// Deletes every run-to-completion workload in the namespace carrying the
/// given label selector, using background propagation.
///
/// Jobs are immutable, so they have to go before a project can be re-applied.
pub async fn delete_jobs(client: &Client, namespace: &str, selector: &str) -> Result<(), Error> {
    debug!("Deleting jobs matching '{}' in namespace '{}'", selector, namespace);
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    match jobs.delete_collection(&DeleteParams::background(), &ListParams::default().labels(selector)).await {
        Ok(_)    => Ok(()),
        Err(err) => Err(Error::DeleteJobsError{ namespace: namespace.into(), err }),
    }
}





/***** READINESS *****/
/// Polls the pods under the given label selector until every one of them is
/// ready, or the deadline elapses.
///
/// An initially empty set keeps polling: the workloads may simply not have
/// produced their pods yet.
///
/// # Arguments
/// - `client`: The client to poll with.
/// - `namespace`: The namespace to look in.
/// - `selector`: The label selector choosing the pods.
/// - `deadline`: The total time budget.
///
/// # Errors
/// This function errors if listing fails or the deadline elapses first.
pub async fn wait_for_pods_ready(client: &Client, namespace: &str, selector: &str, deadline: Duration) -> Result<(), Error> {
    debug!("Waiting up to {}s for pods matching '{}' in namespace '{}'", deadline.as_secs(), selector, namespace);

    let start: Instant = Instant::now();
    loop {
        let pods: Vec<Pod> = list_pods(client, namespace, selector).await?;
        if !pods.is_empty() && pods.iter().all(pod_is_ready) {
            debug!(" > All {} pod(s) ready", pods.len());
            return Ok(());
        }

        if start.elapsed() >= deadline {
            return Err(Error::ReadyTimeout{ namespace: namespace.into(), selector: selector.into(), timeout: deadline });
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}





/***** LOGS *****/
/// Streams the logs of the given services' pods to stdout, interleaved and
/// prefixed with `<service> | `.
///
/// One task runs per `(service, pod)` pair. In follow mode the call blocks
/// until the streams close (i.e., until the caller's context is torn down);
/// in snapshot mode it returns when every stream reaches EOF. An error on
/// one stream is logged, but does not cancel the others.
///
/// # Arguments
/// - `client`: The client to stream with.
/// - `namespace`: The namespace (i.e., project) to look in.
/// - `services`: The names of the services whose logs to stream.
/// - `tail`: The tail-line budget per pod.
/// - `follow`: Whether to keep following the logs.
///
/// # Errors
/// This function errors if the pods of a service could not be listed.
pub async fn stream_logs(client: &Client, namespace: &str, services: &[String], tail: i64, follow: bool) -> Result<(), Error> {
    // Collect the (service, pod) pairs up front
    let mut streams: Vec<(String, String)> = vec![];
    for service in services {
        let selector: String = format!("{}={}", kappal_cfg::spec::LABEL_SERVICE, service);
        for pod in list_pods(client, namespace, &selector).await? {
            if let Some(name) = pod.metadata.name {
                streams.push((service.clone(), name));
            }
        }
    }
    debug!("Streaming logs of {} pod(s)", streams.len());

    // Then fan out one task per pair, with a join barrier at the end
    let mut handles = vec![];
    for (service, pod_name) in streams {
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        handles.push(tokio::spawn(async move {
            let params = LogParams {
                follow,
                tail_lines: Some(tail),
                ..Default::default()
            };
            let stream = match pods.log_stream(&pod_name, &params).await {
                Ok(stream) => stream,
                Err(err)   => { warn!("{}", Error::LogOpenError{ pod: pod_name, err }); return; },
            };

            let mut lines = BufReader::new(stream.compat()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => println!("{} | {}", service, line),
                    Ok(None)       => break,
                    Err(err)       => { warn!("{}", Error::LogStreamError{ pod: pod_name.clone(), err }); break; },
                }
            }
        }));
    }

    join_all(handles).await;
    Ok(())
}





/***** EXEC *****/
/// Executes a command in a pod of the given service and bridges the caller's
/// standard streams until the remote process exits.
///
/// The pod is selected by the zero-based `index` over the service's pods in
/// name order. A pod that is not in the `Running` phase is rejected.
///
/// # Arguments
/// - `client`: The client to attach with.
/// - `namespace`: The namespace (i.e., project) to look in.
/// - `service`: The service whose pod to attach to.
/// - `index`: The zero-based replica index.
/// - `command`: The command (as argv) to execute remotely.
/// - `interactive`: Whether to forward the caller's stdin.
/// - `tty`: Whether to allocate a remote TTY.
///
/// # Errors
/// This function errors if no matching pod exists, the pod is not running,
/// the channel could not be opened, or the remote process exited non-zero.
pub async fn exec_service(client: &Client, namespace: &str, service: &str, index: usize, command: Vec<String>, interactive: bool, tty: bool) -> Result<(), Error> {
    // Select the pod
    let selector: String = format!("{}={}", kappal_cfg::spec::LABEL_SERVICE, service);
    let mut pods: Vec<Pod> = list_pods(client, namespace, &selector).await?;
    pods.sort_by_key(|p| p.metadata.name.clone().unwrap_or_default());
    let pod: &Pod = match pods.get(index) {
        Some(pod) => pod,
        None      => { return Err(Error::PodNotFound{ service: service.into(), index, namespace: namespace.into() }); },
    };
    let pod_name: String = pod.metadata.name.clone().unwrap_or_default();

    let phase: String = pod_phase(pod);
    if phase != "Running" { return Err(Error::PodNotRunning{ pod: pod_name, phase }); }
    debug!("Attaching to pod '{}' (service '{}', index {})", pod_name, service, index);

    // Open the channel
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = AttachParams {
        stdin  : interactive,
        stdout : true,
        stderr : !tty,
        tty,
        ..Default::default()
    };
    let mut process = match api.exec(&pod_name, command, &params).await {
        Ok(process) => process,
        Err(err)    => { return Err(Error::ExecError{ pod: pod_name, err }); },
    };

    // Bridge the streams: one task per direction, tied together by the process itself
    let stdin_pump = process.stdin().map(|mut remote| tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buffer: [u8; 4096] = [0; 4096];
        loop {
            match stdin.read(&mut buffer).await {
                Ok(0)  => break,
                Ok(n)  => { if remote.write_all(&buffer[..n]).await.is_err() { break; } },
                Err(_) => break,
            }
        }
    }));
    let stdout_pump = process.stdout().map(|mut remote| tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let _ = tokio::io::copy(&mut remote, &mut stdout).await;
    }));
    let stderr_pump = process.stderr().map(|mut remote| tokio::spawn(async move {
        let mut stderr = tokio::io::stderr();
        let _ = tokio::io::copy(&mut remote, &mut stderr).await;
    }));

    // Wait for the remote process to finish, then wind the pumps down
    let status = match process.take_status() {
        Some(status) => status.await,
        None         => None,
    };
    if let Some(pump) = stdout_pump { let _ = pump.await; }
    if let Some(pump) = stderr_pump { let _ = pump.await; }
    if let Some(pump) = stdin_pump { pump.abort(); }
    if let Err(err) = process.join().await { return Err(Error::ExecError{ pod: pod_name, err: kube::Error::Service(Box::new(err)) }); }

    // Non-zero exits surface as errors to the caller
    if let Some(status) = status {
        let code: i32 = exec_exit_code(&status);
        if code != 0 { return Err(Error::ExecFailed{ pod: pod_name, code }); }
    }
    Ok(())
}



#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Status, StatusCause, StatusDetails};

    use super::*;

    fn pod_with(phase: &str, ready: Option<bool>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase      : Some(phase.into()),
                conditions : ready.map(|r| vec![PodCondition {
                    type_  : "Ready".into(),
                    status : if r { "True".into() } else { "False".into() },
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn readiness_rules() {
        assert!(pod_is_ready(&pod_with("Succeeded", None)));
        assert!(pod_is_ready(&pod_with("Running", Some(true))));
        assert!(!pod_is_ready(&pod_with("Running", Some(false))));
        assert!(!pod_is_ready(&pod_with("Running", None)));
        assert!(!pod_is_ready(&pod_with("Pending", Some(true))));
        assert!(!pod_is_ready(&pod_with("Failed", None)));
    }

    #[test]
    fn exec_exit_codes() {
        let success = Status{ status: Some("Success".into()), ..Default::default() };
        assert_eq!(exec_exit_code(&success), 0);

        let failure = Status {
            status  : Some("Failure".into()),
            details : Some(StatusDetails {
                causes: Some(vec![StatusCause {
                    reason  : Some("ExitCode".into()),
                    message : Some("42".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(exec_exit_code(&failure), 42);

        // A failure without details still counts as non-zero
        let vague = Status{ status: Some("Failure".into()), ..Default::default() };
        assert_eq!(exec_exit_code(&vague), 1);
    }
}
