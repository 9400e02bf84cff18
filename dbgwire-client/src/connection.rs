// dbgwire connection management
//
// Handles the TCP connect, event loop startup and subscriptions

use crate::config::ConnectOptions;
use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::events::{ConnectionEvent, EventHub};
use crate::protocol::{DebugWireError, Request, WireResult};
use crate::types::{BreakpointList, Breaking, HitBreakpoint};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a connection. `Closed` is terminal.
///
/// There is no connecting state: a `DebugConnection` only exists once the
/// transport reports the connection established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

#[derive(Debug)]
pub struct DebugConnection {
    event_loop: EventLoopHandle,
    events: EventHub,
    state: watch::Receiver<ConnectionState>,
}

impl DebugConnection {
    /// Connect to the debugger on the well-known local port
    pub async fn connect() -> WireResult<Self> {
        Self::connect_with(&ConnectOptions::default()).await
    }

    pub async fn connect_with(options: &ConnectOptions) -> WireResult<Self> {
        Self::establish(options.addr(), options).await
    }

    pub async fn connect_to(addr: SocketAddr) -> WireResult<Self> {
        Self::establish(addr, &ConnectOptions::default()).await
    }

    // One attempt, no retry and no timeout
    async fn establish<A>(addr: A, options: &ConnectOptions) -> WireResult<Self>
    where
        A: ToSocketAddrs + Display,
    {
        info!("Connecting to debugger at {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| DebugWireError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        info!("Connected to debugger at {}", addr);

        let (reader, writer) = stream.into_split();
        let events = EventHub::new(options.event_capacity);
        let (state_tx, state) = watch::channel(ConnectionState::Open);
        let event_loop = spawn_event_loop(
            reader,
            writer,
            events.clone(),
            state_tx,
            options.max_frame_size,
        );

        Ok(Self {
            event_loop,
            events,
            state,
        })
    }

    /// Queue a request for the debugger without waiting for it to be written.
    ///
    /// After the connection has closed the request is dropped silently.
    pub fn send(&self, request: Request) {
        let tag = request.tag();
        if !self.event_loop.send(request) {
            debug!("Dropping {} request, connection closed", tag);
        }
    }

    /// Shut down the connection. Calling it again is a no-op.
    pub fn close(&self) {
        self.event_loop.close();
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Wait until the connection has closed, for whatever reason
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An error here means the event loop is gone, which also means closed
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Every published event, in stream order.
    ///
    /// The first subscriber of each channel also receives what arrived
    /// between connect and the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<Arc<std::io::Error>> {
        self.events.subscribe_errors()
    }

    pub fn subscribe_hit_breakpoints(&self) -> broadcast::Receiver<HitBreakpoint> {
        self.events.subscribe_hit_breakpoints()
    }

    pub fn subscribe_breakpoints(&self) -> broadcast::Receiver<BreakpointList> {
        self.events.subscribe_breakpoints()
    }

    pub fn subscribe_breaking(&self) -> broadcast::Receiver<Breaking> {
        self.events.subscribe_breaking()
    }

    pub fn on_error<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(Arc<std::io::Error>) + Send + 'static,
    {
        spawn_listener(self.subscribe_errors(), self.state.clone(), callback)
    }

    pub fn on_hit_breakpoint<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(HitBreakpoint) + Send + 'static,
    {
        spawn_listener(self.subscribe_hit_breakpoints(), self.state.clone(), callback)
    }

    pub fn on_breakpoints<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(BreakpointList) + Send + 'static,
    {
        spawn_listener(self.subscribe_breakpoints(), self.state.clone(), callback)
    }

    pub fn on_breaking<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnMut(Breaking) + Send + 'static,
    {
        spawn_listener(self.subscribe_breaking(), self.state.clone(), callback)
    }
}

/// Run a callback for every value on its own task, off the I/O path.
///
/// The task ends once the connection has closed and the queue is drained.
fn spawn_listener<T, F>(
    mut rx: broadcast::Receiver<T>,
    mut state: watch::Receiver<ConnectionState>,
    mut callback: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                received = rx.recv() => match received {
                    Ok(value) => callback(value),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Listener fell behind, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => return,
                },

                _ = async {
                    let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
                } => break,
            }
        }

        // Every message is published before the state flips to closed
        loop {
            match rx.try_recv() {
                Ok(value) => callback(value),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Listener fell behind, skipped {} events", skipped);
                }
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn bind() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    // Read one delimiter-terminated frame, delimiter included
    async fn read_frame(socket: &mut TcpStream) -> Vec<u8> {
        let mut frame = Vec::new();
        loop {
            let byte = socket.read_u8().await.unwrap();
            frame.push(byte);
            if byte == 0 {
                return frame;
            }
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let (listener, addr) = bind().await;
        drop(listener);

        let result = DebugConnection::connect_to(addr).await;
        assert!(matches!(result, Err(DebugWireError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_send_writes_json_and_delimiter() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let first = read_frame(&mut socket).await;
            let second = read_frame(&mut socket).await;
            (first, second)
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        assert!(connection.is_open());

        connection.send(Request::set_breakpoints(vec![10, 20]));
        connection.send(Request::continue_execution());

        let (first, second) = timeout(WAIT, server).await.unwrap().unwrap();
        assert_eq!(first, b"{\"SetBreakpoints\":{\"locations\":[10,20]}}\0");
        assert_eq!(second, b"{\"Continue\":{}}\0");
    }

    #[tokio::test]
    async fn test_split_messages_dispatch_in_order() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await;

            socket
                .write_all(b"{\"HitBreakpoint\":{\"location\":42}}\0{\"Breaking\"")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            socket.write_all(b":{\"location\":43}}\0").await.unwrap();

            socket
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        let mut events = connection.subscribe();
        connection.send(Request::list_breakpoints());

        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::HitBreakpoint(HitBreakpoint { location: 42 })
        ));
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Breaking(Breaking { location: 43 })
        ));

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_are_skipped() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await;
            socket
                .write_all(b"{\"Unknown\":1}\0garbage\0{\"Breakpoints\":{\"locations\":[1,2]}}\0")
                .await
                .unwrap();
            socket
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        let mut events = connection.subscribe();
        let mut lists = connection.subscribe_breakpoints();
        connection.send(Request::list_breakpoints());

        let event = next_event(&mut events).await;
        assert_eq!(event.name(), "message-breakpoints");

        let list = timeout(WAIT, lists.recv()).await.unwrap().unwrap();
        assert_eq!(list.locations(), Some(vec![1, 2]));

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_callbacks_run_on_listener_task() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await;
            socket
                .write_all(b"{\"HitBreakpoint\":{\"location\":7}}\0{\"HitBreakpoint\":{\"location\":8}}\0")
                .await
                .unwrap();
            socket
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.on_hit_breakpoint(move |hit| {
            let _ = tx.send(hit.location);
        });
        connection.send(Request::start_execution());

        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(7));
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some(8));

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_events_before_first_subscribe_are_kept() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"{\"Breaking\":{\"location\":1}}\0")
                .await
                .unwrap();
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        timeout(WAIT, connection.closed()).await.unwrap();

        let mut events = connection.subscribe();
        let mut breaking = connection.subscribe_breaking();
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Breaking(Breaking { location: 1 })
        ));
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Closed));
        assert_eq!(breaking.try_recv().unwrap().location, 1);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_ends_after_close() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await;
            socket
                .write_all(b"{\"Breaking\":{\"location\":3}}\0")
                .await
                .unwrap();
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = connection.on_breaking(move |stop| {
            let _ = tx.send(stop.location);
        });
        connection.send(Request::step_one());

        timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(3));
        assert!(!connection.is_open());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_emits_one_error_event() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await;
            // Zero linger turns the close into a reset
            #[allow(deprecated)]
            socket.set_linger(Some(Duration::ZERO)).unwrap();
            drop(socket);
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        let mut events = connection.subscribe();
        let mut errors = connection.subscribe_errors();
        connection.send(Request::step_one());

        let event = next_event(&mut events).await;
        assert_eq!(event.name(), "error");
        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Closed));

        let error = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert_eq!(error.kind(), std::io::ErrorKind::ConnectionReset);
        assert!(errors.try_recv().is_err());

        timeout(WAIT, connection.closed()).await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_close_without_error() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_frame(&mut socket).await;
        });

        let options = ConnectOptions::default()
            .with_host(addr.ip().to_string())
            .with_port(addr.port());
        let connection = DebugConnection::connect_with(&options).await.unwrap();
        let mut events = connection.subscribe();
        connection.send(Request::list_breakpoints());

        assert!(matches!(next_event(&mut events).await, ConnectionEvent::Closed));
        timeout(WAIT, connection.closed()).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reads_continue_while_write_is_stalled() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Never read, so the client's send buffer fills up
            tokio::time::sleep(Duration::from_millis(100)).await;
            socket
                .write_all(b"{\"Breaking\":{\"location\":5}}\0")
                .await
                .unwrap();
            socket
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        let mut events = connection.subscribe();

        // Far more than loopback socket buffers hold
        connection.send(Request::set_breakpoints(vec![1_000_000; 2_000_000]));

        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Breaking(Breaking { location: 5 })
        ));

        connection.close();
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_then_send_is_dropped() {
        let (listener, addr) = bind().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut rest = Vec::new();
            socket.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let connection = DebugConnection::connect_to(addr).await.unwrap();
        connection.close();
        timeout(WAIT, connection.closed()).await.unwrap();

        connection.close();
        connection.send(Request::continue_execution());
        assert!(!connection.is_open());

        let received = timeout(WAIT, server).await.unwrap().unwrap();
        assert!(received.is_empty());
    }
}
