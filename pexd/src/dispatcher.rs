use pdb::Event;
use slog::{debug, error, info, warn, Logger};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread::spawn;
use std::time::Duration;

/// Acknowledgement written back to every sender whose event reached the
/// reactor queue. It does not mean the dataplane has been updated.
pub const EVENT_ACK: &str = "Event Received";

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// The event listener: accepts one JSON event per connection, hands it to
/// the reactor channel, acks, closes. Decode and ack are the only
/// concurrent parts of event handling; state mutation happens on the
/// reactor thread.
pub struct Dispatcher {
    listen: String,
    tx: Sender<Event>,
    shutdown: AtomicBool,
    log: Logger,
}

impl Dispatcher {
    pub fn new(listen: String, tx: Sender<Event>, log: Logger) -> Self {
        Self {
            listen,
            tx,
            shutdown: AtomicBool::new(false),
            log,
        }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen)?;
        info!(self.log, "event dispatcher listening on {}", self.listen);
        self.serve(listener)
    }

    pub(crate) fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Ok(());
            }
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(self.log, "event accept failed: {e}");
                    continue;
                }
            };
            debug!(self.log, "event connection from {peer}");
            let tx = self.tx.clone();
            let log = self.log.clone();
            spawn(move || handle_connection(stream, tx, log));
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn handle_connection(stream: TcpStream, tx: Sender<Event>, log: Logger) {
    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        error!(log, "event connection setup failed: {e}");
        return;
    }
    let mut reader = match stream.try_clone() {
        Ok(s) => BufReader::new(s),
        Err(e) => {
            error!(log, "event connection setup failed: {e}");
            return;
        }
    };

    let mut line = String::new();
    if let Err(e) = reader.read_line(&mut line) {
        warn!(log, "event read failed: {e}");
        return;
    }

    // malformed payloads are logged and dropped; the connection closes
    // without an ack and the dispatcher keeps serving
    let event: Event = match serde_json::from_str(line.trim()) {
        Ok(event) => event,
        Err(e) => {
            warn!(log, "dropping malformed event: {e}");
            return;
        }
    };

    let kind = event.kind();
    if tx.send(event).is_err() {
        // reactor gone; the daemon is on its way down
        error!(log, "reactor channel closed, dropping {kind} event");
        return;
    }
    debug!(log, "{kind} event queued");

    let mut stream = stream;
    if let Err(e) = stream.write_all(EVENT_ACK.as_bytes()) {
        warn!(log, "event ack failed: {e}");
    }
}
