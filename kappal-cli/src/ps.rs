//  PS.rs
//
//  Description:
//!   Implements the `ps` and `inspect` workflows on top of the state
//!   discoverer: a table (or JSON/YAML) for humans, and a self-describing
//!   JSON document for tooling.
//

use std::path::PathBuf;
use std::str::FromStr;

use prettytable::format::FormatBuilder;
use prettytable::{Cell, Row, Table};
use serde_json::json;

use kappal_cfg::spec::ServiceState;
use kappal_cfg::{Project, Workspace};
use kappal_tsk::state::{self, ProjectState};

pub use crate::errors::PsError as Error;
use crate::utils;


/***** AUXILLARY *****/
/// The error raised when an output format does not parse.
#[derive(Debug)]
pub struct OutputFormatParseError {
    /// The string that was not a format.
    raw : String,
}

impl std::fmt::Display for OutputFormatParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown output format '{}' (expected 'table', 'json' or 'yaml')", self.raw)
    }
}

impl std::error::Error for OutputFormatParseError {}



/// The output formats of `ps`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = OutputFormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Self::Table),
            "json"  => Ok(Self::Json),
            "yaml"  => Ok(Self::Yaml),

            raw => Err(OutputFormatParseError{ raw: raw.into() }),
        }
    }
}





/***** HELPER FUNCTIONS *****/
/// Discovers the project state behind the given Compose file.
async fn discover(file: PathBuf, name: Option<&str>) -> Result<ProjectState, Error> {
    let docker = utils::connect_docker().map_err(|err| Error::UtilError{ err })?;
    let project: Project = utils::resolve_project(&file, name).map_err(|err| Error::UtilError{ err })?;
    let workspace: Workspace = utils::workspace_of(&project);
    match state::discover(&docker, &project, &workspace).await {
        Ok(state) => Ok(state),
        Err(err)  => Err(Error::StateError{ err }),
    }
}

/// Renders the discovered state as a table on stdout.
fn render_table(state: &ProjectState, all: bool) {
    let mut table = Table::new();
    table.set_format(FormatBuilder::new().column_separator(' ').padding(0, 3).build());
    table.set_titles(Row::new(vec![
        Cell::new("SERVICE"), Cell::new("KIND"), Cell::new("IMAGE"), Cell::new("STATUS"), Cell::new("REPLICAS"), Cell::new("PORTS"),
    ]));

    for service in &state.services {
        // Declared-but-absent services only show with --all
        if service.status == ServiceState::Missing && !all { continue; }

        let replicas: String = match &service.replicas {
            Some(replicas) => format!("{}/{}", replicas.ready, replicas.desired),
            None           => String::from("-"),
        };
        let ports: String = service.ports.iter().map(|p| p.to_string()).collect::<Vec<String>>().join(", ");
        table.add_row(Row::new(vec![
            Cell::new(&service.name),
            Cell::new(&service.kind.to_string()),
            Cell::new(&service.image),
            Cell::new(&service.status.to_string()),
            Cell::new(&replicas),
            Cell::new(&ports),
        ]));
    }

    table.printstd();
}





/***** LIBRARY *****/
/// Handles the `ps` subcommand.
///
/// # Arguments
/// - `file`: The Compose file of the project.
/// - `name`: An explicit project name, if any.
/// - `format`: The output format.
/// - `all`: Whether to also show services that are declared but absent.
///
/// # Errors
/// This function errors if discovery or serialization failed.
pub async fn handle(file: PathBuf, name: Option<String>, format: OutputFormat, all: bool) -> Result<(), Error> {
    let state: ProjectState = discover(file, name.as_deref()).await?;

    match format {
        OutputFormat::Table => render_table(&state, all),
        OutputFormat::Json  => match serde_json::to_string_pretty(&state) {
            Ok(json) => println!("{}", json),
            Err(err) => { return Err(Error::SerializeError{ format: "JSON", err: err.to_string() }); },
        },
        OutputFormat::Yaml  => match serde_yaml::to_string(&state) {
            Ok(yaml) => print!("{}", yaml),
            Err(err) => { return Err(Error::SerializeError{ format: "YAML", err: err.to_string() }); },
        },
    }
    Ok(())
}

/// Handles the `inspect` subcommand: the full state as JSON, with an embedded
/// schema map so tooling can introspect the field paths.
///
/// # Errors
/// This function errors if discovery or serialization failed.
pub async fn handle_inspect(file: PathBuf, name: Option<String>) -> Result<(), Error> {
    let state: ProjectState = discover(file, name.as_deref()).await?;

    let mut document: serde_json::Value = match serde_json::to_value(&state) {
        Ok(document) => document,
        Err(err)     => { return Err(Error::SerializeError{ format: "JSON", err: err.to_string() }); },
    };
    if let Some(map) = document.as_object_mut() {
        map.insert("_schema".into(), schema());
    }

    match serde_json::to_string_pretty(&document) {
        Ok(json) => { println!("{}", json); Ok(()) },
        Err(err) => Err(Error::SerializeError{ format: "JSON", err: err.to_string() }),
    }
}

/// Returns the self-describing schema map embedded in inspect output.
fn schema() -> serde_json::Value {
    json!({
        "project"                    : "string: the project identity (also the namespace)",
        "cluster.container"          : "string?: the name of the cluster container, if present",
        "cluster.status"             : "string: the cluster container state, or 'absent'",
        "cluster.network"            : "string?: the name of the project bridge network, if present",
        "services[].name"            : "string: the Compose service name",
        "services[].kind"            : "string: 'deployment' or 'job'",
        "services[].image"           : "string: the image the workload runs",
        "services[].status"          : "string: running|waiting|partial|completed|failing|failed|pending|missing|unavailable",
        "services[].replicas.ready"  : "int: ready replicas (deployments only)",
        "services[].replicas.desired": "int: desired replicas (deployments only)",
        "services[].ports[].host"    : "int: the published host port",
        "services[].ports[].container": "int: the container port",
        "services[].ports[].protocol": "string: 'tcp' or 'udp'",
        "services[].pods[].name"     : "string: the pod name",
        "services[].pods[].status"   : "string: the pod phase",
        "services[].pods[].ip"       : "string?: the pod IP, if assigned",
    })
}
