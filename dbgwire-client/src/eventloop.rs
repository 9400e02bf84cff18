// dbgwire event loop
//
// A reader task drives the framer and publishes classified events. A writer
// task drains queued outbound requests, so a full send buffer never holds up
// inbound framing. The reader task is the one that finishes the connection.

use crate::connection::ConnectionState;
use crate::events::{classify, decode_frame, ConnectionEvent, EventHub};
use crate::framer::MessageFramer;
use crate::protocol::Request;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

// Size of a single socket read
const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug)]
enum Outbound {
    Request(Request),
    Close,
}

/// How the writer task ended
#[derive(Debug)]
enum WriterExit {
    Closed,
    Failed(std::io::Error),
}

/// Handle to the event loop for queueing outbound requests
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl EventLoopHandle {
    /// Queue a request for writing. Returns false once the writer has ended.
    pub fn send(&self, request: Request) -> bool {
        self.outbound_tx.send(Outbound::Request(request)).is_ok()
    }

    /// Ask the loop to shut down the socket. No-op once it has ended.
    pub fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }
}

/// Start the reader and writer tasks
pub fn spawn_event_loop(
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    hub: EventHub,
    state_tx: watch::Sender<ConnectionState>,
    max_frame_size: usize,
) -> EventLoopHandle {
    // Unbounded so that send() never has to wait
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = oneshot::channel();

    let writer = tokio::spawn(writer_task(writer, outbound_rx, exit_tx));

    tokio::spawn(async move {
        reader_task(
            reader,
            exit_rx,
            &hub,
            MessageFramer::new(max_frame_size),
        )
        .await;

        // Requests queued from here on are dropped
        writer.abort();

        state_tx.send_replace(ConnectionState::Closed);
        hub.publish(ConnectionEvent::Closed);

        info!("Event loop shutting down");
    });

    EventLoopHandle { outbound_tx }
}

/// Write queued requests until closed, dropped or failed
async fn writer_task(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    exit_tx: oneshot::Sender<WriterExit>,
) {
    let exit = loop {
        match outbound_rx.recv().await {
            Some(Outbound::Request(request)) => {
                debug!("Sending {} request", request.tag());

                let encoded = match request.encode() {
                    Ok(encoded) => encoded,
                    Err(e) => {
                        error!("Failed to encode {} request: {}", request.tag(), e);
                        continue;
                    }
                };

                let written = match writer.write_all(&encoded).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };

                if let Err(e) = written {
                    error!("Failed to write request: {}", e);
                    break WriterExit::Failed(e);
                }
            }
            Some(Outbound::Close) | None => {
                debug!("Closing connection");
                if let Err(e) = writer.shutdown().await {
                    debug!("Shutdown failed: {}", e);
                }
                break WriterExit::Closed;
            }
        }
    };

    drop(outbound_rx);
    let _ = exit_tx.send(exit);
}

/// Read and dispatch chunks until EOF, a transport error or the writer ends.
///
/// At most one error event is published, whichever side fails first.
async fn reader_task(
    mut reader: OwnedReadHalf,
    mut exit_rx: oneshot::Receiver<WriterExit>,
    hub: &EventHub,
    mut framer: MessageFramer,
) {
    info!("Event loop started");

    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            // Writer finished: close requested or a write failed
            exit = &mut exit_rx => {
                if let Ok(WriterExit::Failed(e)) = exit {
                    hub.publish(ConnectionEvent::Error(Arc::new(e)));
                }
                break;
            }

            // Handle incoming chunks
            result = reader.read(&mut chunk) => {
                match result {
                    Ok(0) => {
                        info!("Debugger closed the connection");
                        break;
                    }
                    Ok(n) => {
                        debug!("Received chunk, len={}", n);
                        dispatch_chunk(&mut framer, &chunk[..n], hub);
                    }
                    Err(e) => {
                        error!("Failed to read from debugger: {}", e);
                        hub.publish(ConnectionEvent::Error(Arc::new(e)));
                        break;
                    }
                }
            }
        }
    }

    if framer.pending() > 0 {
        warn!("Discarding {} bytes of incomplete message", framer.pending());
    }
}

/// Frame one chunk and publish every recognized message in stream order.
///
/// Subscribers drain their own channels, so nothing here waits on them.
fn dispatch_chunk(framer: &mut MessageFramer, chunk: &[u8], hub: &EventHub) {
    for frame in framer.push(chunk) {
        let messages = frame.and_then(|frame| classify(decode_frame(&frame)?));

        match messages {
            Ok(messages) => {
                for message in messages {
                    if let Some(event) = message.into_event() {
                        hub.publish(event);
                    }
                }
            }
            Err(e) => {
                warn!("Dropping inbound message: {}", e);
            }
        }
    }
}
