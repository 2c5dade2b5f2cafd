use super::delivery::{delivery, Delivery, DeliveryCompletion};
use crate::{
    destination::Destination,
    error::{TransportError, TransportResult},
};
use log::{error, info, warn};
use std::{
    io::Write,
    net::{Shutdown, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

#[cfg(debug_assertions)]
use log::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of an outbound channel. Never goes back from `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Receives notifications from the thread that owns an outbound socket
pub trait ChannelObserver: Send + Sync {
    fn connected(self: &Self, _destination: &Destination) {}
    fn written(self: &Self, _destination: &Destination, _byte_count: usize) {}

    /// The connection could not be established or a write failed. Not called when the
    /// channel is closed by its owner
    fn failed(self: &Self, error: &TransportError);
}

struct OutboundFrame {
    bytes: Vec<u8>,
    completion: DeliveryCompletion,
}

struct ChannelShared {
    destination: Destination,
    state: Mutex<ChannelState>,
    stop_signal: AtomicBool,
    stream: Mutex<Option<TcpStream>>,
    failure: Mutex<Option<TransportError>>,
}

/// A write-only TCP connection to one destination. The connection is established on a
/// dedicated thread, so opening never blocks the caller. Frames sent before the socket is
/// connected are queued and written once it is, in the order they were sent.
pub struct TcpChannel {
    shared: Arc<ChannelShared>,
    sender: Sender<OutboundFrame>,
}

impl TcpChannel {
    pub fn open(destination: &Destination, observer: &Arc<dyn ChannelObserver>) -> Self {
        let shared = Arc::new(ChannelShared {
            destination: destination.clone(),
            state: Mutex::new(ChannelState::Connecting),
            stop_signal: AtomicBool::new(false),
            stream: Mutex::new(None),
            failure: Mutex::new(None),
        });
        let (sender, receiver) = channel::<OutboundFrame>();

        let thread = ChannelThread {
            shared: shared.clone(),
            receiver,
            observer: observer.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("tcp-channel-{destination}"))
            .spawn(move || thread.run());

        if let Err(err) = spawned {
            error!("TcpChannel: Failed to start thread for {destination}: {err}");
            shared.mark_failed(&TransportError::ConnectFailed {
                destination: destination.clone(),
                msg: format!("{err}"),
            });
        }

        Self { shared, sender }
    }

    pub fn destination(self: &Self) -> &Destination { &self.shared.destination }

    pub fn state(self: &Self) -> ChannelState { *self.shared.state.lock().unwrap() }

    /// The error that closed this channel, if it was closed by a failure
    pub fn failure(self: &Self) -> Option<TransportError> { self.shared.failure.lock().unwrap().clone() }

    /// Queues bytes for writing. Never blocks on the network
    pub fn send(self: &Self, bytes: Vec<u8>) -> TransportResult<Delivery> {
        if self.state() == ChannelState::Closed {
            return Err(self.closed_error());
        }

        let (delivery, completion) = delivery(&self.shared.destination);
        match self.sender.send(OutboundFrame { bytes, completion }) {
            Ok(_) => Ok(delivery),
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Releases the socket. Returns false if the channel was already closed
    pub fn close(self: &Self) -> bool {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == ChannelState::Closed {
                return false;
            }
            *state = ChannelState::Closed;
        }
        self.shared.stop_signal.store(true, Ordering::Relaxed);

        // Unblocks a write that is stuck waiting on the peer
        if let Some(stream) = self.shared.stream.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        info!("TcpChannel: Closed connection to {}", self.shared.destination);
        true
    }

    fn closed_error(self: &Self) -> TransportError {
        match self.failure() {
            Some(failure) => failure,
            None => TransportError::ConnectionClosed {
                destination: self.shared.destination.clone(),
            },
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChannelShared {
    fn mark_failed(self: &Self, error: &TransportError) {
        *self.failure.lock().unwrap() = Some(error.clone());
        *self.state.lock().unwrap() = ChannelState::Closed;
        self.stop_signal.store(true, Ordering::Relaxed);
    }
}

struct ChannelThread {
    shared: Arc<ChannelShared>,
    receiver: Receiver<OutboundFrame>,
    observer: Arc<dyn ChannelObserver>,
}

impl ChannelThread {
    fn run(self: Self) {
        let destination = self.shared.destination.clone();
        info!("TcpChannel: Connecting to {destination}");

        let mut stream = match TcpStream::connect(&destination) {
            Ok(stream) => stream,
            Err(err) => {
                self.fatal(TransportError::ConnectFailed {
                    destination,
                    msg: format!("{err}"),
                });
                return;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!("TcpChannel: Unable to disable Nagle on connection to {destination}: {err}");
        }

        if !self.publish_open(&stream) {
            info!("TcpChannel: Connection to {destination} was closed while connecting");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }

        info!("TcpChannel: Connected to {destination}");
        self.observer.connected(&destination);

        while !self.shared.stop_signal.load(Ordering::Relaxed) {
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => {
                    if !self.write(&mut stream, frame) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
        info!("TcpChannel: Stopped writing to {destination}");
    }

    /// Moves the channel to `Open` unless it was closed while the connect was in progress
    fn publish_open(self: &Self, stream: &TcpStream) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if *state == ChannelState::Closed {
            return false;
        }

        match stream.try_clone() {
            Ok(clone) => *self.shared.stream.lock().unwrap() = Some(clone),
            Err(err) => warn!(
                "TcpChannel: Unable to clone stream to {}, close will wait for pending writes: {err}",
                self.shared.destination
            ),
        }

        *state = ChannelState::Open;
        true
    }

    fn write(self: &Self, stream: &mut TcpStream, frame: OutboundFrame) -> bool {
        let byte_count = frame.bytes.len();

        #[cfg(debug_assertions)]
        debug!("TcpChannel: Writing {byte_count} bytes to {}", self.shared.destination);

        match stream.write_all(&frame.bytes).and_then(|_| stream.flush()) {
            Ok(_) => {
                self.observer.written(&self.shared.destination, byte_count);
                frame.completion.complete(Ok(()));
                true
            }
            Err(err) => {
                if self.shared.stop_signal.load(Ordering::Relaxed) {
                    frame.completion.complete(Err(TransportError::ConnectionClosed {
                        destination: self.shared.destination.clone(),
                    }));
                } else {
                    let error = TransportError::WriteFailed {
                        destination: self.shared.destination.clone(),
                        msg: format!("{err}"),
                    };
                    self.fatal(error.clone());
                    frame.completion.complete(Err(error));
                }
                false
            }
        }
    }

    /// Closes the channel because of an I/O failure. Everything still queued fails with it
    fn fatal(self: &Self, error: TransportError) {
        warn!("TcpChannel: {error}");
        self.shared.mark_failed(&error);
        self.observer.failed(&error);

        while let Ok(frame) = self.receiver.try_recv() {
            frame.completion.complete(Err(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Read, net::TcpListener, sync::atomic::AtomicUsize};

    #[derive(Default)]
    struct CountingObserver {
        connected: AtomicUsize,
        written: AtomicUsize,
        failed: Mutex<Vec<TransportError>>,
    }

    impl ChannelObserver for CountingObserver {
        fn connected(self: &Self, _destination: &Destination) {
            self.connected.fetch_add(1, Ordering::Relaxed);
        }

        fn written(self: &Self, _destination: &Destination, byte_count: usize) {
            self.written.fetch_add(byte_count, Ordering::Relaxed);
        }

        fn failed(self: &Self, error: &TransportError) {
            self.failed.lock().unwrap().push(error.clone());
        }
    }

    fn unused_destination() -> Destination {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        Destination::from(address)
    }

    #[tokio::test]
    async fn should_write_frames_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = Destination::from(listener.local_addr().unwrap());
        let observer = Arc::new(CountingObserver::default());
        let dyn_observer: Arc<dyn ChannelObserver> = observer.clone();

        let channel = TcpChannel::open(&destination, &dyn_observer);
        let first = channel.send(vec![1, 2, 3]).unwrap();
        let second = channel.send(vec![4, 5]).unwrap();

        let (mut accepted, _) = listener.accept().unwrap();
        let mut received = [0u8; 5];
        accepted.read_exact(&mut received).unwrap();

        assert_eq!([1, 2, 3, 4, 5], received);
        assert_eq!(Ok(()), first.await);
        assert_eq!(Ok(()), second.await);
        assert_eq!(ChannelState::Open, channel.state());
        assert_eq!(1, observer.connected.load(Ordering::Relaxed));
        assert_eq!(5, observer.written.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn should_report_connect_failure() {
        let destination = unused_destination();
        let observer = Arc::new(CountingObserver::default());
        let dyn_observer: Arc<dyn ChannelObserver> = observer.clone();

        let channel = TcpChannel::open(&destination, &dyn_observer);
        let result = match channel.send(vec![9]) {
            Ok(delivery) => tokio::time::timeout(Duration::from_secs(10), delivery).await.unwrap(),
            Err(err) => Err(err),
        };

        assert!(matches!(
            result,
            Err(TransportError::ConnectFailed { .. }) | Err(TransportError::ConnectionClosed { .. })
        ));
        assert_eq!(ChannelState::Closed, channel.state());
        assert!(matches!(channel.send(vec![10]), Err(TransportError::ConnectFailed { .. })));
        assert_eq!(1, observer.failed.lock().unwrap().len());
    }

    #[test]
    fn should_close_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = Destination::from(listener.local_addr().unwrap());
        let observer: Arc<dyn ChannelObserver> = Arc::new(CountingObserver::default());

        let channel = TcpChannel::open(&destination, &observer);

        assert!(channel.close());
        assert!(!channel.close());
        assert_eq!(ChannelState::Closed, channel.state());
        assert_eq!(
            Err(TransportError::ConnectionClosed { destination }),
            channel.send(vec![1]).map(|_| ())
        );
    }
}
