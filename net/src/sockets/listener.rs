use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Sender,
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{error, info, warn};

use crate::{
    data_types::ConnectionId,
    error::{TransportError, TransportResult},
};

const IDLE_SLEEP_LIMIT: Duration = Duration::from_millis(50);
const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(10);

/// A connection accepted by the listener, already switched to non-blocking mode
#[derive(Debug)]
pub struct AcceptedStream {
    pub connection_id: ConnectionId,
    pub peer: SocketAddr,
    pub stream: TcpStream,
}

/// Owns the listening socket and the thread that accepts connections on it. Accepted
/// connections are handed to the workers round robin
pub struct Listener {
    local_address: SocketAddr,
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn local_address(self: &Self) -> SocketAddr { self.local_address }

    pub fn bind(address: &str, workers: Vec<Sender<AcceptedStream>>) -> TransportResult<Self> {
        let bind_error = |err: std::io::Error| TransportError::Bind {
            address: String::from(address),
            msg: format!("{err}"),
        };

        if workers.is_empty() {
            return Err(TransportError::Bind {
                address: String::from(address),
                msg: String::from("no workers to hand accepted connections to"),
            });
        }

        let listener = TcpListener::bind(address).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let local_address = listener.local_addr().map_err(bind_error)?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        let accept_thread = AcceptThread {
            listener,
            workers,
            stop_signal: stop_signal.clone(),
            next_connection_id: 1,
            next_worker_index: 0,
            last_accept_instant: Instant::now(),
        };
        let thread = thread::Builder::new()
            .name(format!("listener-{}", local_address.port()))
            .spawn(move || accept_thread.run())
            .map_err(bind_error)?;

        info!("Listener: Listening on {local_address}");
        Ok(Self {
            local_address,
            stop_signal,
            thread: Some(thread),
        })
    }

    /// Stops accepting and waits for the accept thread to exit. Safe to call more than once
    pub fn stop(self: &mut Self) {
        self.stop_signal.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Listener: Accept thread for {} panicked", self.local_address);
            }
            info!("Listener: Stopped listening on {}", self.local_address);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptThread {
    listener: TcpListener,
    workers: Vec<Sender<AcceptedStream>>,
    stop_signal: Arc<AtomicBool>,
    next_connection_id: ConnectionId,
    next_worker_index: usize,
    last_accept_instant: Instant,
}

impl AcceptThread {
    fn run(mut self: Self) {
        info!("Listener: Accept thread starting");
        while !self.stop_signal.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.last_accept_instant = Instant::now();
                    self.handle_connection(stream, peer);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => self.sleep_if_idle(),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!("Listener: Failed to accept connection: {err}");
                    thread::sleep(IDLE_SLEEP_DURATION);
                }
            }
        }
        info!("Listener: Accept thread stopping");
    }

    fn handle_connection(self: &mut Self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nonblocking(true) {
            warn!("Listener: Dropping connection from {peer}, cannot make it non-blocking: {err}");
            return;
        }
        if let Err(err) = stream.set_nodelay(true) {
            warn!("Listener: Unable to disable Nagle on connection from {peer}: {err}");
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id = self.next_connection_id.wrapping_add(1);
        info!("Listener: Accepted connection {connection_id} from {peer}");

        let accepted = AcceptedStream {
            connection_id,
            peer,
            stream,
        };

        let worker_index = self.next_worker_index;
        self.next_worker_index = (self.next_worker_index + 1) % self.workers.len();

        if let Err(err) = self.workers[worker_index].send(accepted) {
            error!("Listener: Worker {worker_index} is gone, dropping connection from {}", err.0.peer);
            self.stop_signal.store(true, Ordering::Relaxed);
        }
    }

    fn sleep_if_idle(self: &Self) {
        if self.last_accept_instant.elapsed() > IDLE_SLEEP_LIMIT {
            thread::sleep(IDLE_SLEEP_DURATION);
        }
    }
}
