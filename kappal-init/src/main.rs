//  MAIN.rs
//
//  Description:
//!   Entrypoint to the init-barrier agent: the first container of a pod,
//!   which blocks startup until the declared prerequisites are satisfied
//!   (jobs completed, peer services ready) and the writable bind paths
//!   are prepared, then exits successfully.
//

mod errors;

use std::path::Path;
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;
use dotenvy::dotenv;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, Config};
use log::{debug, info, LevelFilter};

use kappal_cfg::spec::{InitSpec, LABEL_SERVICE};

use crate::errors::InitError;


/***** CONSTANTS *****/
/// The pause between prerequisite poll attempts.
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// The overall deadline for all prerequisites together.
const DEADLINE: Duration = Duration::from_secs(300);





/***** ARGUMENTS *****/
#[derive(Parser)]
#[clap(name = "kappal-init", version = env!("CARGO_PKG_VERSION"))]
struct Opts {
    /// The JSON envelope describing what to wait for and prepare.
    #[clap(short, long, env = "KAPPAL_INIT_SPEC", default_value = "{\"namespace\":\"\",\"waitForJobs\":[],\"waitForServices\":[],\"prepareWritablePaths\":[]}")]
    spec  : String,
    /// Prints debug info
    #[clap(short, long, action, env = "DEBUG")]
    debug : bool,
}





/***** ENTRYPOINT *****/
#[tokio::main]
async fn main() {
    // Parse the arguments
    dotenv().ok();
    let Opts{ spec, debug } = Opts::parse();

    // Configure logger.
    let mut logger = env_logger::builder();
    logger.format_module_path(false);
    if debug {
        logger.filter_level(LevelFilter::Debug).init();
    } else {
        logger.filter_level(LevelFilter::Info).init();
    }
    debug!("KAPPAL-INIT v{}", env!("CARGO_PKG_VERSION"));

    // Wrap the actual execution, so we always log errors
    match run(spec).await {
        Ok(())   => process::exit(0),
        Err(err) => {
            log::error!("{}", err);
            process::exit(1);
        }
    }
}

/// Runs the barrier this agent is in charge of.
///
/// # Arguments
/// - `raw`: The raw JSON envelope from the environment.
///
/// # Errors
/// This function errors if the envelope is malformed, a path could not be
/// prepared, a prerequisite job failed, or the deadline elapsed.
async fn run(raw: String) -> Result<(), InitError> {
    // Parse the envelope
    let spec: InitSpec = match serde_json::from_str(&raw) {
        Ok(spec) => spec,
        Err(err) => { return Err(InitError::SpecParseError{ raw, err }); },
    };
    info!(
        "Barrier: {} job(s), {} service(s), {} writable path(s)",
        spec.wait_for_jobs.len(), spec.wait_for_services.len(), spec.prepare_writable_paths.len(),
    );

    // The paths first; errors here are fatal
    for path in &spec.prepare_writable_paths {
        prepare_path(Path::new(path))?;
    }

    // Without waits we are already done, and need no client either
    if !spec.has_waits() { return Ok(()); }
    let client: Client = in_cluster_client().await?;

    // Serialize the waits; the deadline spans all of them together
    let start: Instant = Instant::now();
    for name in &spec.wait_for_jobs {
        wait_for_job(&client, &spec.namespace, name, start).await?;
    }
    for name in &spec.wait_for_services {
        wait_for_service(&client, &spec.namespace, name, start).await?;
    }

    info!("All prerequisites satisfied after {}s", start.elapsed().as_secs());
    Ok(())
}

/// Makes the given path exist and be writable.
///
/// A directory is chmod'ed to `0777`, a file to `0666`; a missing path is
/// created as a directory first. Relative paths and the root are refused.
fn prepare_path(path: &Path) -> Result<(), InitError> {
    use std::os::unix::fs::PermissionsExt;

    if !path.is_absolute() { return Err(InitError::PathNotAbsolute{ path: path.into() }); }
    if path == Path::new("/") { return Err(InitError::PathIsRoot); }
    debug!("Preparing writable path '{}'", path.display());

    let mode: u32 = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => 0o777,
        Ok(_)                     => 0o666,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Err(err) = std::fs::create_dir_all(path) {
                return Err(InitError::PathCreateError{ path: path.into(), err });
            }
            0o777
        },
        Err(err) => { return Err(InitError::PathMetadataError{ path: path.into(), err }); },
    };

    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        return Err(InitError::PathChmodError{ path: path.into(), err });
    }
    Ok(())
}

/// Builds a client from the in-cluster service account environment.
async fn in_cluster_client() -> Result<Client, InitError> {
    let config: Config = match Config::incluster() {
        Ok(config) => config,
        Err(err)   => { return Err(InitError::ConfigError{ err }); },
    };
    match Client::try_from(config) {
        Ok(client) => Ok(client),
        Err(err)   => Err(InitError::ClientError{ err }),
    }
}

/// Polls until the job backing the given service name has succeeded.
///
/// The job is found through its `service` label, never through its resource
/// name. A job with a true `Failed` condition fails the barrier for good.
async fn wait_for_job(client: &Client, namespace: &str, name: &str, start: Instant) -> Result<(), InitError> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let params: ListParams = ListParams::default().labels(&format!("{}={}", LABEL_SERVICE, name));
    debug!("Waiting for job '{}'...", name);

    loop {
        let list = match jobs.list(&params).await {
            Ok(list) => list,
            Err(err) => { return Err(InitError::JobListError{ name: name.into(), err }); },
        };

        for job in &list.items {
            let status = job.status.as_ref();
            if status.and_then(|s| s.succeeded).unwrap_or(0) >= 1 {
                debug!(" > Job '{}' completed", name);
                return Ok(());
            }
            let failed: bool = status
                .and_then(|s| s.conditions.as_ref())
                .map(|conditions| conditions.iter().any(|c| c.type_ == "Failed" && c.status == "True"))
                .unwrap_or(false);
            if failed { return Err(InitError::JobFailed{ name: name.into() }); }
        }

        if start.elapsed() >= DEADLINE { return Err(InitError::DeadlineExceeded{ timeout: DEADLINE }); }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Polls until at least one pod of the given service has a true `Ready`
/// condition.
async fn wait_for_service(client: &Client, namespace: &str, name: &str, start: Instant) -> Result<(), InitError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params: ListParams = ListParams::default().labels(&format!("{}={}", LABEL_SERVICE, name));
    debug!("Waiting for service '{}'...", name);

    loop {
        let list = match pods.list(&params).await {
            Ok(list) => list,
            Err(err) => { return Err(InitError::PodListError{ name: name.into(), err }); },
        };

        let ready: bool = list.items.iter().any(|pod| {
            pod.status.as_ref()
                .and_then(|s| s.conditions.as_ref())
                .map(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
                .unwrap_or(false)
        });
        if ready {
            debug!(" > Service '{}' has a ready pod", name);
            return Ok(());
        }

        if start.elapsed() >= DEADLINE { return Err(InitError::DeadlineExceeded{ timeout: DEADLINE }); }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_must_be_absolute() {
        assert!(matches!(prepare_path(Path::new("data")), Err(InitError::PathNotAbsolute{ .. })));
        assert!(matches!(prepare_path(Path::new("/")), Err(InitError::PathIsRoot)));
    }

    #[test]
    fn missing_paths_become_directories() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("brand/new/dir");
        prepare_path(&target).unwrap();

        let meta = std::fs::metadata(&target).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o777);
    }

    #[test]
    fn files_become_world_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("data.db");
        std::fs::write(&target, "x").unwrap();
        prepare_path(&target).unwrap();

        let meta = std::fs::metadata(&target).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);
    }

    /// The default (absent) envelope parses and asks for nothing.
    #[test]
    fn default_envelope_is_empty() {
        let raw = "{\"namespace\":\"\",\"waitForJobs\":[],\"waitForServices\":[],\"prepareWritablePaths\":[]}";
        let spec: InitSpec = serde_json::from_str(raw).unwrap();
        assert!(spec.is_empty());
    }
}
