// Print every event the debugger publishes until the connection closes

use dbgwire_client::{ConnectionEvent, DebugConnection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable tracing
    tracing_subscriber::fmt()
        .with_env_filter("dbgwire_client=debug")
        .init();

    println!("Connecting to debugger at 127.0.0.1:{}...", dbgwire_client::DEBUGGER_PORT);

    let connection = DebugConnection::connect().await?;
    let mut events = connection.subscribe();
    println!("✓ Connected, waiting for events (Ctrl+C to stop)\n");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnectionEvent::Closed) => {
                    println!("Connection closed");
                    break;
                }
                Ok(event) => println!("{} {}", event.name(), event.payload()),
                Err(e) => println!("Subscription ended: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                connection.close();
                connection.closed().await;
                break;
            }
        }
    }

    Ok(())
}
