use std::{
    io::{ErrorKind, Read},
    net::Shutdown,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{info, warn};
use membership_net::{
    codec::MsgPackCodec,
    decoder::StreamDecoder,
    error::TransportError,
    sockets::listener::AcceptedStream,
};

#[cfg(debug_assertions)]
use log::debug;

use crate::{
    dispatcher::Dispatcher, error::MessengerError, health::FailureReporter, member::Member, message::Message,
    stats::MessengerStats,
};

const READ_BUFFER_SIZE: usize = 16 * 1024;
const MAX_READS_PER_POLL: usize = 16;
const IDLE_SLEEP_LIMIT: Duration = Duration::from_millis(50);
const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(5);

struct InboundConnection {
    accepted: AcceptedStream,
    decoder: StreamDecoder<Message, MsgPackCodec>,
    last_sender: Option<Member>,
}

enum PollOutcome {
    Idle,
    Active,
    Closed,
}

/// One of the server's worker threads. Owns the inbound connections the listener hands it,
/// decodes whatever bytes have arrived on them and dispatches each complete message
pub(crate) struct ReaderThread {
    worker_index: usize,
    receiver: Receiver<AcceptedStream>,
    codec: Arc<MsgPackCodec>,
    dispatcher: Arc<Dispatcher>,
    reporter: Arc<FailureReporter>,
    stats: Arc<MessengerStats>,
    stop_signal: Arc<AtomicBool>,
}

impl ReaderThread {
    pub(crate) fn new(
        worker_index: usize,
        receiver: Receiver<AcceptedStream>,
        codec: &Arc<MsgPackCodec>,
        dispatcher: &Arc<Dispatcher>,
        reporter: &Arc<FailureReporter>,
        stats: &Arc<MessengerStats>,
        stop_signal: &Arc<AtomicBool>,
    ) -> Self {
        Self {
            worker_index,
            receiver,
            codec: codec.clone(),
            dispatcher: dispatcher.clone(),
            reporter: reporter.clone(),
            stats: stats.clone(),
            stop_signal: stop_signal.clone(),
        }
    }

    pub(crate) fn run(self: Self) {
        info!("ReaderThread: Worker {} starting", self.worker_index);

        let mut connections: Vec<InboundConnection> = Vec::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut last_read_instant = Instant::now();

        while !self.stop_signal.load(Ordering::Relaxed) {
            self.accept_connections(&mut connections);

            let mut active = false;
            connections.retain_mut(|connection| match self.poll(connection, &mut buffer) {
                PollOutcome::Idle => true,
                PollOutcome::Active => {
                    active = true;
                    true
                }
                PollOutcome::Closed => {
                    active = true;
                    false
                }
            });

            if active {
                last_read_instant = Instant::now();
            } else if last_read_instant.elapsed() > IDLE_SLEEP_LIMIT {
                thread::sleep(IDLE_SLEEP_DURATION);
            }
        }

        for connection in connections.iter() {
            Self::close(connection);
        }
        info!("ReaderThread: Worker {} stopping", self.worker_index);
    }

    fn accept_connections(self: &Self, connections: &mut Vec<InboundConnection>) {
        loop {
            match self.receiver.try_recv() {
                Ok(accepted) => {
                    #[cfg(debug_assertions)]
                    debug!("ReaderThread: Worker {} now reading connection {}", self.worker_index, accepted.connection_id);

                    connections.push(InboundConnection {
                        accepted,
                        decoder: StreamDecoder::new(&self.codec),
                        last_sender: None,
                    });
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            }
        }
    }

    /// Reads what is available without blocking and dispatches every message that is now
    /// complete
    fn poll(self: &Self, connection: &mut InboundConnection, buffer: &mut [u8]) -> PollOutcome {
        let mut outcome = PollOutcome::Idle;

        for _ in 0..MAX_READS_PER_POLL {
            match connection.accepted.stream.read(buffer) {
                Ok(0) => {
                    if connection.decoder.buffered() > 0 {
                        warn!(
                            "ReaderThread: Connection {} from {} ended with {} undecoded bytes",
                            connection.accepted.connection_id,
                            connection.accepted.peer,
                            connection.decoder.buffered()
                        );
                    }
                    info!(
                        "ReaderThread: Connection {} from {} closed by peer after {} messages",
                        connection.accepted.connection_id,
                        connection.accepted.peer,
                        connection.decoder.decoded_count()
                    );
                    Self::close(connection);
                    return PollOutcome::Closed;
                }
                Ok(byte_count) => {
                    outcome = PollOutcome::Active;
                    self.stats.bytes_received(byte_count);
                    connection.decoder.extend(&buffer[..byte_count]);
                    if let Err(err) = self.dispatch_complete(connection) {
                        self.reporter.inbound_failed(&err, connection.last_sender.as_ref());
                        Self::close(connection);
                        return PollOutcome::Closed;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    let error = MessengerError::Transport(TransportError::ReadFailed {
                        peer: connection.accepted.peer,
                        msg: format!("{err}"),
                    });
                    self.reporter.inbound_failed(&error, connection.last_sender.as_ref());
                    Self::close(connection);
                    return PollOutcome::Closed;
                }
            }
        }

        outcome
    }

    fn dispatch_complete(self: &Self, connection: &mut InboundConnection) -> Result<(), MessengerError> {
        loop {
            let message = connection.decoder.try_next().map_err(|err| {
                MessengerError::Transport(TransportError::CorruptData {
                    peer: connection.accepted.peer,
                    msg: format!("{err}"),
                })
            })?;

            match message {
                Some(message) => {
                    if message.sender.is_some() {
                        connection.last_sender = message.sender.clone();
                    }
                    self.stats.message_received();
                    self.dispatcher.dispatch(message)?;
                }
                None => return Ok(()),
            }
        }
    }

    fn close(connection: &InboundConnection) {
        if let Err(err) = connection.accepted.stream.shutdown(Shutdown::Both) {
            if err.kind() != ErrorKind::NotConnected {
                warn!("ReaderThread: Error shutting down connection from {}: {err}", connection.accepted.peer);
            }
        }
    }
}
