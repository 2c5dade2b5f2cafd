#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use membership_messenger::{
    config::MessengerConfig,
    error::MessengerError,
    health::HealthMonitor,
    member::Member,
    message::{Message, MessageKind},
    messenger::Messenger,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_config() -> MessengerConfig {
    MessengerConfig {
        reader_threads: 2,
        ..MessengerConfig::default()
    }
}

/// An initialized messenger, ready for handlers to be registered before it is started
pub fn initialized_messenger() -> Arc<Messenger> {
    let messenger = Arc::new(Messenger::new());
    messenger.init(test_config()).unwrap();
    messenger
}

pub fn started_messenger() -> Arc<Messenger> {
    let messenger = initialized_messenger();
    messenger.start().unwrap();
    messenger
}

/// Registers a handler for `kind` that collects every message it is given
pub fn collect(messenger: &Messenger, kind: MessageKind) -> Arc<Mutex<Vec<Message>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    messenger.add_handler(kind, Arc::new(move |message: Message| sink.lock().unwrap().push(message)));
    received
}

pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
pub struct RecordingMonitor {
    pub suspects: Mutex<Vec<Member>>,
    pub failures: Mutex<Vec<MessengerError>>,
}

impl HealthMonitor for RecordingMonitor {
    fn suspect(self: &Self, member: &Member, _reason: &str) {
        self.suspects.lock().unwrap().push(member.clone());
    }

    fn connection_failed(self: &Self, error: &MessengerError) {
        self.failures.lock().unwrap().push(error.clone());
    }
}

pub fn monitor(messenger: &Messenger) -> Arc<RecordingMonitor> {
    let monitor = Arc::new(RecordingMonitor::default());
    messenger.set_health_monitor(monitor.clone());
    monitor
}
