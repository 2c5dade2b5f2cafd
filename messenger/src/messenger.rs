use std::{
    collections::HashSet,
    fmt::{self, Display},
    net::SocketAddr,
    process,
    sync::{Arc, Mutex, RwLock},
};

use log::{error, info, warn};
use membership_net::{
    codec::MsgPackCodec,
    destination::Destination,
    sockets::{delivery::Delivery, tcp_channel::ChannelObserver},
};

use crate::{
    config::MessengerConfig,
    connection_manager::ConnectionManager,
    dispatcher::{Dispatcher, MessageHandler},
    error::{MessengerError, MessengerResult},
    health::{FailureReporter, HealthMonitor},
    member::{parse_groups, DurableClientAttributes, Member, MemberAttributes},
    message::{Message, MessageKind},
    server::Server,
    stats::{MessengerStats, StatsReporter, StatsSnapshot},
    view::View,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessengerState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

impl Display for MessengerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MessengerState::Uninitialized => "uninitialized",
            MessengerState::Initialized => "initialized",
            MessengerState::Started => "started",
            MessengerState::Stopped => "stopped",
        };
        f.write_str(text)
    }
}

/// The membership protocol's view of the transport. Sends control messages to members,
/// dispatches the ones received to registered handlers and drops connections to members that
/// leave the view. Shared between threads behind an `Arc`
pub struct Messenger {
    state: Mutex<MessengerState>,
    config: RwLock<Option<MessengerConfig>>,
    local_member: RwLock<Option<Member>>,
    current_view: Arc<RwLock<Option<View>>>,
    codec: Arc<MsgPackCodec>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<MessengerStats>,
    reporter: Arc<FailureReporter>,
    connections: ConnectionManager,
    server: Mutex<Option<Server>>,
    stats_reporter: Mutex<Option<StatsReporter>>,
}

impl Messenger {
    pub fn new() -> Self {
        let codec = Arc::new(MsgPackCodec::new());
        let stats = Arc::new(MessengerStats::new());
        let current_view = Arc::new(RwLock::new(None));
        let reporter = Arc::new(FailureReporter::new(&current_view, &stats));
        let observer: Arc<dyn ChannelObserver> = reporter.clone();

        Self {
            state: Mutex::new(MessengerState::Uninitialized),
            config: RwLock::new(None),
            local_member: RwLock::new(None),
            connections: ConnectionManager::new(&codec, &observer, &stats),
            current_view,
            codec,
            dispatcher: Arc::new(Dispatcher::new()),
            stats,
            reporter,
            server: Mutex::new(None),
            stats_reporter: Mutex::new(None),
        }
    }

    pub fn state(self: &Self) -> MessengerState { *self.state.lock().unwrap() }

    /// Stores the configuration. No network resources are allocated until `start`
    pub fn init(self: &Self, config: MessengerConfig) -> MessengerResult<()> {
        let mut state = self.state.lock().unwrap();
        if *state != MessengerState::Uninitialized {
            return Err(invalid_state("init", *state));
        }

        config.validate()?;
        *self.config.write().unwrap() = Some(config);
        *state = MessengerState::Initialized;
        Ok(())
    }

    /// Installs the sink that is told about connection failures
    pub fn set_health_monitor(self: &Self, monitor: Arc<dyn HealthMonitor>) {
        self.reporter.set_monitor(monitor);
    }

    /// Registers the handler for one kind of message. The last registration for a kind wins.
    /// Handlers should be registered before `start`
    pub fn add_handler(self: &Self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        let state = self.state();
        if state == MessengerState::Started || state == MessengerState::Stopped {
            warn!("Messenger: Handler for {kind} registered while {state}, messages may already have been rejected");
        }
        if self.dispatcher.register(kind, handler) {
            info!("Messenger: Replaced handler for {kind} messages");
        }
    }

    /// Binds the server endpoint and derives the local member from the bound address
    pub fn start(self: &Self) -> MessengerResult<()> {
        let mut state = self.state.lock().unwrap();
        if *state != MessengerState::Initialized {
            return Err(invalid_state("start", *state));
        }

        let config = match self.config.read().unwrap().clone() {
            Some(config) => config,
            None => return Err(invalid_state("start", *state)),
        };

        let server = Server::start(
            &config.bind_authority(),
            config.reader_threads,
            &self.codec,
            &self.dispatcher,
            &self.reporter,
            &self.stats,
        )?;

        let member = local_member(&config, server.local_address())?;
        info!("Messenger: Started as {member}");

        if let Some(statsd_host) = &config.statsd_host {
            *self.stats_reporter.lock().unwrap() = StatsReporter::start(&self.stats, statsd_host, config.stats_interval());
        }

        *self.local_member.write().unwrap() = Some(member);
        *self.server.lock().unwrap() = Some(server);
        *state = MessengerState::Started;
        Ok(())
    }

    /// The identity of this process, available once started
    pub fn get_member_id(self: &Self) -> MessengerResult<Member> {
        let member = self.local_member.read().unwrap().clone();
        match member {
            Some(member) => Ok(member),
            None => Err(invalid_state("get the member id", self.state())),
        }
    }

    /// Queues `message` for every recipient. Returns the recipients that acknowledged it,
    /// which is always none because nothing at this layer acknowledges messages
    pub fn send(self: &Self, message: Message) -> MessengerResult<HashSet<Member>> {
        self.send_tracked(message)?;
        Ok(HashSet::new())
    }

    /// Identical to `send`; no separate reliability tier exists
    pub fn send_unreliably(self: &Self, message: Message) -> MessengerResult<HashSet<Member>> {
        self.send(message)
    }

    /// Identical to `send`; the alternate view is not consulted
    pub fn send_with_view(self: &Self, message: Message, _alternate_view: &View) -> MessengerResult<HashSet<Member>> {
        self.send(message)
    }

    /// Like `send` but returns a delivery per recipient, each completing when the message was
    /// written to that recipient's socket or failed to be. Every recipient is attempted; the first
    /// error is returned after all attempts
    pub fn send_tracked(self: &Self, mut message: Message) -> MessengerResult<Vec<(Member, Delivery)>> {
        let state = self.state();
        if state != MessengerState::Started {
            return Err(invalid_state("send", state));
        }

        if message.sender.is_none() {
            message.sender = self.local_member.read().unwrap().clone();
        }

        let mut deliveries = Vec::with_capacity(message.recipients.len());
        let mut first_error: Option<MessengerError> = None;

        for recipient in message.recipients.iter() {
            match self.connections.send(&recipient.destination(), &message) {
                Ok(delivery) => deliveries.push((recipient.clone(), delivery)),
                Err(err) => {
                    warn!("Messenger: Failed to send {} message to {recipient}: {err}", message.kind());
                    self.stats.send_failed();
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(deliveries),
        }
    }

    /// Replaces the current view and closes the connections to members that crashed since the
    /// previous one. Returns the crashed members
    pub fn install_view(self: &Self, view: View) -> MessengerResult<Vec<Member>> {
        let state = self.state();
        if state == MessengerState::Uninitialized || state == MessengerState::Initialized {
            return Err(invalid_state("install a view", state));
        }

        let mut current_view = self.current_view.write().unwrap();
        let crashed = view.crashed_members(current_view.as_ref());
        for member in crashed.iter() {
            if self.connections.close_connection(&member.destination()) {
                info!("Messenger: Closed connection to crashed member {member}");
            }
        }

        info!("Messenger: Installed view {} with {} members", view.view_id(), view.len());
        *current_view = Some(view);
        Ok(crashed)
    }

    pub fn current_view(self: &Self) -> Option<View> { self.current_view.read().unwrap().clone() }

    /// Closes every outbound connection and the server endpoint. Sends fail from now on.
    /// May be called from a message handler
    pub fn stop(self: &Self) -> MessengerResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != MessengerState::Started {
                return Err(invalid_state("stop", *state));
            }
            *state = MessengerState::Stopped;
        }

        let closed = self.connections.close_all();

        let server = self.server.lock().unwrap().take();
        if let Some(mut server) = server {
            server.stop();
        }

        let stats_reporter = self.stats_reporter.lock().unwrap().take();
        if let Some(mut stats_reporter) = stats_reporter {
            stats_reporter.stop();
        }

        info!("Messenger: Stopped, closed {closed} outbound connections");
        Ok(())
    }

    pub fn connected_destinations(self: &Self) -> Vec<Destination> { self.connections.connected_destinations() }

    pub fn local_address(self: &Self) -> Option<SocketAddr> {
        self.server.lock().unwrap().as_ref().map(|s| s.local_address())
    }

    pub fn stats(self: &Self) -> StatsSnapshot { self.stats.snapshot() }
}

impl Default for Messenger {
    fn default() -> Self { Self::new() }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        if self.state() == MessengerState::Started {
            if let Err(err) = self.stop() {
                error!("Messenger: Failed to stop: {err}");
            }
        }
    }
}

fn invalid_state(operation: &str, state: MessengerState) -> MessengerError {
    MessengerError::InvalidState {
        operation: String::from(operation),
        state: state.to_string(),
    }
}

/// Identity of this process: the bound address plus the attributes taken from configuration
fn local_member(config: &MessengerConfig, address: SocketAddr) -> MessengerResult<Member> {
    let host = if address.ip().is_unspecified() {
        warn!("Messenger: Bound to all interfaces, advertising loopback address");
        String::from("127.0.0.1")
    } else {
        address.ip().to_string()
    };

    let durable_client = config
        .durable_client_id
        .as_ref()
        .filter(|id| !id.trim().is_empty())
        .map(|id| DurableClientAttributes {
            id: id.clone(),
            timeout_seconds: config.durable_client_timeout,
        });

    let attributes = MemberAttributes {
        process_id: process::id(),
        vm_kind: config.vm_kind()?,
        name: config.name.clone(),
        groups: parse_groups(&config.roles, &config.groups),
        durable_client,
        network_partition_detection: config.enable_network_partition_detection,
        locator: config.is_locator(),
    };

    Ok(Member::new(&host, address.port(), attributes))
}
