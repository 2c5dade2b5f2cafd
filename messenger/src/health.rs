use std::sync::{Arc, RwLock};

use log::{error, info, warn};
use membership_net::{destination::Destination, error::TransportError, sockets::tcp_channel::ChannelObserver};

use crate::{error::MessengerError, member::Member, stats::MessengerStats, view::View};

/// Failure sink supplied by the membership protocol. Told about I/O failures so that it can
/// start suspecting the member on the other end
pub trait HealthMonitor: Send + Sync {
    fn suspect(self: &Self, member: &Member, reason: &str);

    /// Every connection level failure, including ones that cannot be attributed to a member
    fn connection_failed(self: &Self, _error: &MessengerError) {}
}

/// Turns transport failures into health monitor notifications, attributing each one to a
/// member of the current view where possible
pub struct FailureReporter {
    monitor: RwLock<Option<Arc<dyn HealthMonitor>>>,
    current_view: Arc<RwLock<Option<View>>>,
    stats: Arc<MessengerStats>,
}

impl FailureReporter {
    pub fn new(current_view: &Arc<RwLock<Option<View>>>, stats: &Arc<MessengerStats>) -> Self {
        Self {
            monitor: RwLock::new(None),
            current_view: current_view.clone(),
            stats: stats.clone(),
        }
    }

    pub fn set_monitor(self: &Self, monitor: Arc<dyn HealthMonitor>) {
        *self.monitor.write().unwrap() = Some(monitor);
    }

    /// An outbound connection could not be established or written to
    pub fn outbound_failed(self: &Self, error: &TransportError) {
        self.stats.send_failed();
        let member = error.destination().and_then(|d| self.member_at(d));
        match &member {
            Some(member) => warn!("FailureReporter: Connection to {member} failed: {error}"),
            None => warn!("FailureReporter: Connection failed: {error}"),
        }
        self.notify(&MessengerError::Transport(error.clone()), member);
    }

    /// An inbound connection was abandoned. `last_sender` is the sender of the last message
    /// decoded from it
    pub fn inbound_failed(self: &Self, error: &MessengerError, last_sender: Option<&Member>) {
        self.stats.receive_failed();
        match error {
            MessengerError::Unhandled { .. } => error!("FailureReporter: {error}"),
            _ => warn!("FailureReporter: Inbound connection failed: {error}"),
        }

        let member = last_sender.filter(|m| self.in_current_view(m)).cloned();
        self.notify(error, member);
    }

    fn notify(self: &Self, error: &MessengerError, member: Option<Member>) {
        let monitor = self.monitor.read().unwrap().clone();
        match monitor {
            Some(monitor) => {
                monitor.connection_failed(error);
                if let Some(member) = member {
                    info!("FailureReporter: Suspecting {member}");
                    monitor.suspect(&member, &format!("{error}"));
                }
            }
            None => {
                if let Some(member) = member {
                    info!("FailureReporter: No health monitor installed, not suspecting {member}");
                }
            }
        }
    }

    fn member_at(self: &Self, destination: &Destination) -> Option<Member> {
        let view = self.current_view.read().unwrap();
        view.as_ref().and_then(|v| v.member_at(destination).cloned())
    }

    fn in_current_view(self: &Self, member: &Member) -> bool {
        let view = self.current_view.read().unwrap();
        view.as_ref().map_or(false, |v| v.contains(member))
    }
}

impl ChannelObserver for FailureReporter {
    fn connected(self: &Self, destination: &Destination) {
        info!("FailureReporter: Connected to {destination}");
    }

    fn written(self: &Self, _destination: &Destination, byte_count: usize) {
        self.stats.message_sent(byte_count);
    }

    fn failed(self: &Self, error: &TransportError) {
        self.outbound_failed(error);
    }
}
