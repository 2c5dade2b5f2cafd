use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{error, info, warn};
use statsd::Client;

/// Counters updated by the transport threads
#[derive(Debug, Default)]
pub struct MessengerStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    send_failures: AtomicU64,
    receive_failures: AtomicU64,
}

/// A point in time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub send_failures: u64,
    pub receive_failures: u64,
}

impl MessengerStats {
    pub const METRIC_MESSAGES_SENT: &str = "messages.sent";
    pub const METRIC_MESSAGES_RECEIVED: &str = "messages.received";
    pub const METRIC_BYTES_SENT: &str = "bytes.sent";
    pub const METRIC_BYTES_RECEIVED: &str = "bytes.received";
    pub const METRIC_CONNECTIONS_OPENED: &str = "connections.opened";
    pub const METRIC_CONNECTIONS_CLOSED: &str = "connections.closed";
    pub const METRIC_SEND_FAILURES: &str = "failures.send";
    pub const METRIC_RECEIVE_FAILURES: &str = "failures.receive";

    pub fn new() -> Self { Self::default() }

    pub fn message_sent(self: &Self, byte_count: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn message_received(self: &Self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_received(self: &Self, byte_count: usize) {
        self.bytes_received.fetch_add(byte_count as u64, Ordering::Relaxed);
    }

    pub fn connection_opened(self: &Self) { self.connections_opened.fetch_add(1, Ordering::Relaxed); }
    pub fn connection_closed(self: &Self) { self.connections_closed.fetch_add(1, Ordering::Relaxed); }
    pub fn send_failed(self: &Self) { self.send_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn receive_failed(self: &Self) { self.receive_failures.fetch_add(1, Ordering::Relaxed); }

    pub fn snapshot(self: &Self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Pairs each metric name with how much it grew since `previous`
    pub fn deltas(self: &Self, previous: &StatsSnapshot) -> [(&'static str, u64); 8] {
        [
            (MessengerStats::METRIC_MESSAGES_SENT, self.messages_sent - previous.messages_sent),
            (MessengerStats::METRIC_MESSAGES_RECEIVED, self.messages_received - previous.messages_received),
            (MessengerStats::METRIC_BYTES_SENT, self.bytes_sent - previous.bytes_sent),
            (MessengerStats::METRIC_BYTES_RECEIVED, self.bytes_received - previous.bytes_received),
            (MessengerStats::METRIC_CONNECTIONS_OPENED, self.connections_opened - previous.connections_opened),
            (MessengerStats::METRIC_CONNECTIONS_CLOSED, self.connections_closed - previous.connections_closed),
            (MessengerStats::METRIC_SEND_FAILURES, self.send_failures - previous.send_failures),
            (MessengerStats::METRIC_RECEIVE_FAILURES, self.receive_failures - previous.receive_failures),
        ]
    }
}

const STATSD_PREFIX: &str = "membership";
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Periodically pushes counter deltas to a statsd daemon
pub struct StatsReporter {
    stop_signal: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StatsReporter {
    pub fn start(stats: &Arc<MessengerStats>, statsd_host: &str, interval: Duration) -> Option<Self> {
        let client = match Client::new(statsd_host, STATSD_PREFIX) {
            Ok(client) => client,
            Err(err) => {
                warn!("StatsReporter: Statistics will not be reported, cannot reach statsd at {statsd_host}: {err:?}");
                return None;
            }
        };

        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop_signal = stop_signal.clone();
        let stats = stats.clone();
        let spawned = thread::Builder::new()
            .name(String::from("stats-reporter"))
            .spawn(move || Self::run(client, stats, interval, thread_stop_signal));

        match spawned {
            Ok(thread) => {
                info!("StatsReporter: Reporting to {statsd_host} every {}ms", interval.as_millis());
                Some(Self {
                    stop_signal,
                    thread: Some(thread),
                })
            }
            Err(err) => {
                error!("StatsReporter: Failed to start thread: {err}");
                None
            }
        }
    }

    pub fn stop(self: &mut Self) {
        self.stop_signal.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("StatsReporter: Thread panicked");
            }
        }
    }

    fn run(client: Client, stats: Arc<MessengerStats>, interval: Duration, stop_signal: Arc<AtomicBool>) {
        let mut previous = StatsSnapshot::default();
        let mut last_flush = Instant::now();

        while !stop_signal.load(Ordering::Relaxed) {
            thread::sleep(STOP_POLL_INTERVAL);
            if last_flush.elapsed() < interval {
                continue;
            }
            last_flush = Instant::now();

            let current = stats.snapshot();
            let mut pipeline = client.pipeline();
            for (metric, delta) in current.deltas(&previous) {
                if delta > 0 {
                    pipeline.count(metric, delta as f64);
                }
            }
            pipeline.send(&client);
            previous = current;
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
