use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Sender},
        Arc,
    },
    thread::{self, available_parallelism, JoinHandle},
};

use log::{error, info};
use membership_net::{
    codec::MsgPackCodec,
    error::TransportError,
    sockets::listener::{AcceptedStream, Listener},
};
use reader_thread::ReaderThread;

use crate::{
    dispatcher::Dispatcher,
    error::MessengerResult,
    health::FailureReporter,
    stats::MessengerStats,
};

mod reader_thread;

/// The inbound endpoint. One thread accepts connections and a fixed pool of reader threads
/// decodes and dispatches the messages arriving on them
pub struct Server {
    listener: Listener,
    stop_signal: Arc<AtomicBool>,
    reader_threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Binds `authority` and starts serving. `reader_thread_count` of zero means one reader
    /// per available CPU
    pub fn start(
        authority: &str,
        reader_thread_count: usize,
        codec: &Arc<MsgPackCodec>,
        dispatcher: &Arc<Dispatcher>,
        reporter: &Arc<FailureReporter>,
        stats: &Arc<MessengerStats>,
    ) -> MessengerResult<Self> {
        let reader_thread_count = match reader_thread_count {
            0 => available_parallelism().map(|n| n.get()).unwrap_or(2),
            n => n,
        };

        let stop_signal = Arc::new(AtomicBool::new(false));
        let mut senders: Vec<Sender<AcceptedStream>> = Vec::with_capacity(reader_thread_count);
        let mut reader_threads: Vec<JoinHandle<()>> = Vec::with_capacity(reader_thread_count);

        for worker_index in 0..reader_thread_count {
            let (sender, receiver) = channel::<AcceptedStream>();
            let reader_thread = ReaderThread::new(worker_index, receiver, codec, dispatcher, reporter, stats, &stop_signal);
            let spawned = thread::Builder::new()
                .name(format!("reader-{worker_index}"))
                .spawn(move || reader_thread.run());

            match spawned {
                Ok(handle) => {
                    senders.push(sender);
                    reader_threads.push(handle);
                }
                Err(err) => {
                    Self::join_all(&stop_signal, reader_threads);
                    return Err(TransportError::Bind {
                        address: String::from(authority),
                        msg: format!("failed to start reader thread: {err}"),
                    }
                    .into());
                }
            }
        }

        let listener = match Listener::bind(authority, senders) {
            Ok(listener) => listener,
            Err(err) => {
                error!("Server: {err}");
                Self::join_all(&stop_signal, reader_threads);
                return Err(err.into());
            }
        };

        info!("Server: Serving {} with {reader_thread_count} reader threads", listener.local_address());
        Ok(Self {
            listener,
            stop_signal,
            reader_threads,
        })
    }

    pub fn local_address(self: &Self) -> SocketAddr { self.listener.local_address() }

    /// Stops accepting, closes every inbound connection and waits for the threads to exit
    pub fn stop(self: &mut Self) {
        self.listener.stop();
        let reader_threads = std::mem::take(&mut self.reader_threads);
        if !reader_threads.is_empty() {
            Self::join_all(&self.stop_signal, reader_threads);
            info!("Server: Stopped");
        }
    }

    /// A reader thread that stops the server from inside a handler is not joined; it sees the
    /// stop signal and exits once the handler returns
    fn join_all(stop_signal: &Arc<AtomicBool>, threads: Vec<JoinHandle<()>>) {
        stop_signal.store(true, Ordering::Relaxed);
        let current = thread::current().id();
        for thread in threads {
            if thread.thread().id() == current {
                continue;
            }
            if thread.join().is_err() {
                error!("Server: Reader thread panicked");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
