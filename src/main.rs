//! statsd entry point.
//!
//! ## CLI Subcommands
//!
//! - `statsd` or `statsd serve` - Run the IPC server (default)
//! - `statsd shell <args...>` - Run a shell command on a running server
//! - `statsd call <method>` - Invoke a privileged typed method
//! - `statsd dump [args...]` - Diagnostic dump
//! - `statsd config show|defaults|validate` - Inspect configuration

use std::process::ExitCode;

use statsd_service::cli::config_cmd;
#[cfg(unix)]
use statsd_service::cli::{get_socket_path, run_call, run_dump, run_shell};
#[cfg(unix)]
use statsd_service::config as statsd_config;
#[cfg(unix)]
use statsd_service::ipc::server;
#[cfg(unix)]
use statsd_service::shutdown::ShutdownResult;
#[cfg(unix)]
use statsd_service::telemetry::init_logging;
#[cfg(unix)]
use statsd_service::{Runtime, RuntimeConfig, Subsystems};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        #[cfg(unix)]
        "serve" | "" => match run_ipc_server().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Server error: {}", e);
                ExitCode::FAILURE
            }
        },
        #[cfg(unix)]
        "shell" => {
            let code = run_shell(&get_socket_path(), &args[2..]).await;
            exit_code(code)
        }
        #[cfg(unix)]
        "call" => match args.get(2) {
            Some(method) => exit_code(run_call(&get_socket_path(), method).await),
            None => {
                print_command_help("call");
                ExitCode::FAILURE
            }
        },
        #[cfg(unix)]
        "dump" => {
            let code = run_dump(&get_socket_path(), &args[2..]).await;
            exit_code(code)
        }
        #[cfg(not(unix))]
        "serve" | "" | "shell" | "call" | "dump" => {
            eprintln!("'{}' needs a Unix domain socket and is not supported on this platform", command);
            ExitCode::FAILURE
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit_code(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("statsd {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn print_usage() {
    eprintln!(
        "statsd - stats service front-end v{}

USAGE:
    statsd [COMMAND] [ARGS]

COMMANDS:
    serve        Run the IPC server (default when no command given)
    shell        Run a shell command (print-stats-log, config)
    call         Invoke a privileged method
    dump         Print the diagnostic dump
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    statsd serve
    statsd shell print-stats-log wakelocks 1700000000000000000
    statsd shell config < config.json
    statsd call system-running
    statsd dump --verbose

ENVIRONMENT:
    STATSD_SOCKET_PATH   IPC socket path (default: {})
    STATSD_LOG_LEVEL     Log filter (debug, info, warn, error)
    STATSD_LOG_FORMAT    json or pretty

EXIT CODES:
    0  Success
    1  Failure
    3  Connection error
",
        env!("CARGO_PKG_VERSION"),
        statsd_config::DEFAULT_SOCKET_PATH
    );
}

fn print_command_help(command: &str) {
    match command {
        "shell" => eprintln!(
            "statsd shell - Run a shell command

USAGE:
    statsd shell print-stats-log <tag> [timestamp_nsec]
    statsd shell config < config.json

DESCRIPTION:
    print-stats-log writes the persisted log entries of <tag> newer than the
    threshold. config reads a JSON-encoded StatsdConfig from stdin and loads it.
    Any other input prints the shell usage.
"
        ),
        "call" => eprintln!(
            "statsd call - Invoke a privileged method

USAGE:
    statsd call <METHOD>

METHODS:
    anomaly-alarm     informAnomalyAlarmFired
    poll-alarm        informPollAlarmFired
    system-running    systemRunning
    companion-ready   statsCompanionReady

Only the system uid may call these methods.
"
        ),
        "config" => eprintln!(
            "statsd config - Inspect configuration

USAGE:
    statsd config <SUBCOMMAND>

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show default configuration
    validate       Check configuration for obvious problems
"
        ),
        _ => eprintln!(
            "No detailed help available for '{}'. Use 'statsd help' for general usage.",
            command
        ),
    }
}

#[cfg(unix)]
async fn run_ipc_server() -> Result<(), Box<dyn std::error::Error>> {
    let env = statsd_config::load();
    init_logging(&env.log)?;

    let runtime = Runtime::new(RuntimeConfig::from(&env), Subsystems::in_process(&env.log_dir));
    let server_handle = tokio::spawn(server::run_server(
        env.socket_path.clone(),
        runtime.dispatcher.clone(),
        env.ipc_server(),
        runtime.shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining");

    match runtime.shutdown().await {
        ShutdownResult::Complete => tracing::info!("shutdown complete"),
        ShutdownResult::Timeout { remaining } => {
            tracing::warn!(remaining, "shutdown timed out with transactions in flight");
        }
    }

    server_handle.await??;
    Ok(())
}
