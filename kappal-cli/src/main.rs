//  MAIN.rs
//
//  Description:
//!   Entrypoint to the kappal binary: a Compose-style interface over a
//!   local single-node Kubernetes cluster.
//

#[macro_use]
extern crate human_panic;

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use console::style;
use dotenvy::dotenv;
use log::LevelFilter;

use kappal_cli::errors::CliError;
use kappal_cli::ps::OutputFormat;
use kappal_cli::{build, clean, down, eject, exec, logs, ps, up};


/***** CONSTANTS *****/
/// The exit code of a SIGINT'ed process, by convention.
const SIGINT_EXIT_CODE: i32 = 130;





/***** ARGUMENTS *****/
#[derive(Parser)]
#[clap(name = "kappal", about = "Runs Compose projects on a local single-node Kubernetes cluster, without ever showing you Kubernetes.")]
struct Cli {
    #[clap(short, long, global = true, default_value = "docker-compose.yaml", help = "Path to the Compose file to operate on.")]
    file: PathBuf,
    #[clap(short = 'p', long, global = true, help = "Explicit project name (defaults to one derived from the compose directory).")]
    project_name: Option<String>,
    #[clap(short, long, action, global = true, help = "Enable debug mode")]
    debug: bool,
    #[clap(subcommand)]
    sub_command: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    #[clap(name = "up", about = "Create and start the project's services.")]
    Up {
        #[clap(short, long, action, help = "Detached mode: a readiness timeout becomes a warning instead of a failure.")]
        detach: bool,
        #[clap(long, action, help = "Build the images of services with build contexts before starting.")]
        build: bool,
        #[clap(long, default_value = "300", help = "Seconds to wait for the services to become ready.")]
        timeout: u64,
    },

    #[clap(name = "down", about = "Stop and remove the project's services and cluster.")]
    Down {
        #[clap(short, long, action, help = "Also remove the persistent claims of named volumes.")]
        volumes: bool,
    },

    #[clap(name = "build", about = "Build (and inject) the images of services with build contexts.")]
    Build {
        #[clap(name = "SERVICE", help = "The services to build; all building services if omitted.")]
        services: Vec<String>,
    },

    #[clap(name = "ps", about = "List the project's services and their states.")]
    Ps {
        #[clap(short, long, default_value = "table", help = "Output format: 'table', 'json' or 'yaml'.")]
        output: OutputFormat,
        #[clap(short, long, action, help = "Also show services that are declared but absent from the cluster.")]
        all: bool,
    },

    #[clap(name = "logs", about = "Stream the logs of the project's services.")]
    Logs {
        #[clap(long, action, help = "Keep following the logs until interrupted.")]
        follow: bool,
        #[clap(long, default_value = "100", help = "Number of trailing lines to show per pod.")]
        tail: i64,
        #[clap(name = "SERVICE", help = "The services to show; all services if omitted.")]
        services: Vec<String>,
    },

    #[clap(name = "exec", about = "Execute a command in a running service container.")]
    Exec {
        #[clap(short, long, action, help = "Forward stdin to the remote process.")]
        interactive: bool,
        #[clap(short, long, action, help = "Allocate a remote TTY.")]
        tty: bool,
        #[clap(long, default_value = "0", help = "Zero-based replica index of the pod to attach to.")]
        index: usize,
        #[clap(name = "SERVICE", help = "The service whose container to execute in.")]
        service: String,
        #[clap(name = "COMMAND", required = true, trailing_var_arg = true, allow_hyphen_values = true, help = "The command (and arguments) to execute.")]
        command: Vec<String>,
    },

    #[clap(name = "inspect", about = "Dump the full project state as self-describing JSON.")]
    Inspect {},

    #[clap(name = "eject", about = "Write a standalone workspace for direct use with a manifest applier.")]
    Eject {
        #[clap(short, long, default_value = "tanka", help = "The directory to eject into.")]
        output: PathBuf,
    },

    #[clap(name = "clean", about = "Remove everything kappal made for this project (or for all of them).")]
    Clean {
        #[clap(long, action, help = "Clean every kappal project on this host instead of just this one.")]
        all: bool,
    },
}





/***** ENTRYPOINT *****/
#[tokio::main]
async fn main() -> Result<()> {
    // Parse the CLI arguments
    dotenv().ok();
    let options = Cli::parse();

    // Prepare the logger
    let mut logger = env_logger::builder();
    logger.format_module_path(false);
    if options.debug {
        logger.filter_level(LevelFilter::Debug).init();
    } else {
        logger.filter_level(LevelFilter::Info).init();

        setup_panic!(Metadata {
            name: "Kappal".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
            homepage: env!("CARGO_PKG_HOMEPAGE").into(),
        });
    }

    // Die with the conventional code on ctrl+c, wherever we are in a workflow
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            process::exit(SIGINT_EXIT_CODE);
        }
    });

    // Run the subcommand given
    match run(options).await {
        Ok(_) => process::exit(0),
        Err(err) => {
            eprintln!("{}: {}", style("error").bold().red(), err);
            process::exit(1);
        }
    }
}

/// Runs one of the subcommands as given on the Cli.
///
/// # Arguments
/// - `options`: The struct with parsed CLI options and subcommands.
///
/// # Returns
/// Nothing if the subcommand executed successfully, or a CliError otherwise.
async fn run(options: Cli) -> Result<(), CliError> {
    use SubCommand::*;
    match options.sub_command {
        Up { detach, build, timeout } => {
            up::handle(options.file, options.project_name, detach, build, timeout).await.map_err(|err| CliError::UpError{ err })
        },

        Down { volumes } => {
            down::handle(options.file, options.project_name, volumes).await.map_err(|err| CliError::DownError{ err })
        },

        Build { services } => {
            build::handle(options.file, options.project_name, services).await.map_err(|err| CliError::BuildError{ err })
        },

        Ps { output, all } => {
            ps::handle(options.file, options.project_name, output, all).await.map_err(|err| CliError::PsError{ err })
        },

        Logs { follow, tail, services } => {
            logs::handle(options.file, options.project_name, follow, tail, services).await.map_err(|err| CliError::LogsError{ err })
        },

        Exec { interactive, tty, index, service, command } => {
            exec::handle(options.file, options.project_name, interactive, tty, index, service, command).await.map_err(|err| CliError::ExecError{ err })
        },

        Inspect {} => {
            ps::handle_inspect(options.file, options.project_name).await.map_err(|err| CliError::PsError{ err })
        },

        Eject { output } => {
            eject::handle(options.file, options.project_name, output).await.map_err(|err| CliError::EjectError{ err })
        },

        Clean { all } => {
            if all {
                clean::handle_all().await.map_err(|err| CliError::CleanError{ err })
            } else {
                clean::handle(options.file, options.project_name).await.map_err(|err| CliError::CleanError{ err })
            }
        },
    }
}
