// dbgwire console - drive a debugger over the dbgwire protocol
//
// Reads commands from stdin and prints every published event to stdout as
// one JSON line.

use anyhow::{Context, Result};
use dbgwire_client::{ConnectOptions, ConnectionEvent, DebugConnection};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

mod commands;

use commands::{parse_command, Command, HELP};

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout is reserved for events
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dbgwire=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = ConnectOptions::from_env().context("Invalid connection settings")?;
    info!("Starting dbgwire console against {}", options.addr());

    let connection = DebugConnection::connect_with(&options)
        .await
        .with_context(|| format!("Could not reach debugger at {}", options.addr()))?;

    let printer = tokio::spawn(print_events(connection.subscribe()));

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    eprintln!("{}", HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match parse_command(&line) {
                            Ok(Some(Command::Send(request))) => {
                                debug!("Queueing {:?}", request);
                                connection.send(request);
                            }
                            Ok(Some(Command::Quit)) => break,
                            Ok(None) => continue,
                            Err(message) => eprintln!("{}", message),
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Read error: {}", e);
                        break;
                    }
                }
            }

            _ = connection.closed() => {
                info!("Debugger connection closed");
                break;
            }
        }
    }

    connection.close();
    connection.closed().await;
    printer.await.context("Event printer failed")?;

    info!("dbgwire console shutting down");
    Ok(())
}

/// Print events as JSON lines until the connection closes
async fn print_events(mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let line = json!({ "event": event.name(), "payload": event.payload() });
                println!("{}", line);

                if matches!(event, ConnectionEvent::Closed) {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event printer fell behind, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
