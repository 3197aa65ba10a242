// ABOUTME: Entry point for the fleetsh CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use fleetsh::config::Config;
use fleetsh::error::{Error, Result};
use fleetsh::fleet::{FleetEvent, Outcome, run_target, target_label};
use fleetsh::ssh::{Client, ClientRegistry, Connection, Logger, RusshTransport, TracingLogger};
use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Exit code used when a streamed command outlives its timeout.
const EXIT_TIMEOUT: i32 = 124;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(&env::current_dir()?)?,
    };
    let registry = ClientRegistry::build(config.hosts, None)?;
    let logger: Option<Arc<dyn Logger>> = if cli.verbose {
        Some(Arc::new(TracingLogger))
    } else {
        None
    };

    match cli.command {
        Commands::Hosts => {
            let mut targets: Vec<String> = registry
                .clients()
                .map(|client| format!("{}@{}", client.username(), client.addr()))
                .collect();
            targets.sort();
            for target in targets {
                println!("{target}");
            }
            Ok(0)
        }
        Commands::Exec {
            host,
            user,
            combined,
            command,
        } => {
            let command = command.join(" ");
            let connection = registry.connect(&host, &user, logger).await?;
            let session = connection.new_session().await?;
            let output = if combined {
                session.combined_output(&command).await
            } else {
                session.output(&command).await
            };
            connection.disconnect().await?;

            let output = output?;
            std::io::stdout().write_all(&output)?;
            Ok(0)
        }
        Commands::Stream {
            host,
            user,
            timeout,
            command,
        } => {
            let client = registry.lookup(&host, &user)?;
            stream(&client, &command.join(" "), Duration::from_secs(timeout), logger).await
        }
        Commands::Fleet { timeout, command } => {
            if registry.is_empty() {
                return Err(Error::NoHosts);
            }
            fleet(&registry, &command.join(" "), Duration::from_secs(timeout), logger).await
        }
    }
}

/// Stream one command, printing lines as they arrive.
async fn stream(
    client: &Arc<Client>,
    command: &str,
    timeout: Duration,
    logger: Option<Arc<dyn Logger>>,
) -> Result<i32> {
    let connection = client.connect(logger).await?;
    let mut stream = match connection.read_stream(command, timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            disconnect(connection).await;
            return Err(e.into());
        }
    };

    let stdout = stream.take_stdout();
    let stderr = stream.take_stderr();
    tokio::join!(
        async {
            if let Some(mut lines) = stdout {
                while let Some(line) = lines.recv().await {
                    println!("{line}");
                }
            }
        },
        async {
            if let Some(mut lines) = stderr {
                while let Some(line) = lines.recv().await {
                    eprintln!("{line}");
                }
            }
        }
    );

    let completed = stream.done().await.unwrap_or(false);
    let error = stream.take_err();
    drop(stream);
    connection.disconnect().await?;

    if !completed {
        eprintln!("Error: {}", Error::Timeout(client.addr().to_string()));
        return Ok(EXIT_TIMEOUT);
    }
    Ok(exit_code(error))
}

/// Stream one command on every client concurrently, printing each line
/// prefixed with `user@host` as soon as it arrives.
async fn fleet(
    registry: &ClientRegistry,
    command: &str,
    timeout: Duration,
    logger: Option<Arc<dyn Logger>>,
) -> Result<i32> {
    let (events, mut received) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = received.recv().await {
            match event {
                FleetEvent::Stdout { target, line } => println!("{target}: {line}"),
                FleetEvent::Stderr { target, line } => eprintln!("{target}: {line}"),
            }
        }
    });

    let runs = registry.clients().map(|client| {
        let logger = logger.clone();
        let events = events.clone();
        async move {
            let target = target_label(client.username(), client.host());
            let transport = RusshTransport::default();
            let result = run_target(client, &transport, logger, command, timeout, &events).await;
            (target, result)
        }
    });

    let mut results = futures::future::join_all(runs).await;
    drop(events);
    let _ = printer.await;
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut failures = 0;
    for (target, result) in results {
        match result {
            Ok(Outcome::Completed) => {}
            Ok(Outcome::TimedOut) => {
                failures += 1;
                eprintln!("{target}: timed out after {:?}", timeout);
            }
            Ok(Outcome::Failed(e)) | Err(e) => {
                failures += 1;
                eprintln!("{target}: {e}");
            }
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}

/// Disconnect on an error path, where the original error is what gets reported.
async fn disconnect(connection: Connection) {
    let target = target_label(connection.username(), connection.host());
    if let Err(e) = connection.disconnect().await {
        tracing::debug!(host = %target, error = %e, "disconnect failed");
    }
}

fn exit_code(error: Option<fleetsh::ssh::Error>) -> i32 {
    match error {
        None => 0,
        Some(e) => {
            eprintln!("Error: {e}");
            e.exit_status()
                .and_then(|status| status.code())
                .and_then(|code| i32::try_from(code).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1)
        }
    }
}
