// Set breakpoints, start the program and step once after the first hit

use dbgwire_client::{ConnectOptions, DebugConnection, Request};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("dbgwire_client=info")
        .init();

    let options = ConnectOptions::from_env()?;
    println!("Connecting to debugger at {}...", options.addr());

    let connection = DebugConnection::connect_with(&options).await?;
    let mut hits = connection.subscribe_hit_breakpoints();
    let mut stops = connection.subscribe_breaking();
    let mut lists = connection.subscribe_breakpoints();
    println!("✓ Connected\n");

    connection.send(Request::set_breakpoints(vec![16, 32]));
    connection.send(Request::list_breakpoints());

    let list = lists.recv().await?;
    println!("Breakpoints: {}", list.as_value());

    connection.send(Request::start_execution());

    let hit = hits.recv().await?;
    println!("🎯 Hit breakpoint at {}", hit.location);

    connection.send(Request::step_one());
    let stop = stops.recv().await?;
    println!("Stepped to {}", stop.location);

    connection.send(Request::remove_breakpoints(vec![16, 32]));
    connection.send(Request::continue_execution());

    connection.close();
    connection.closed().await;
    println!("✓ Done");

    Ok(())
}
