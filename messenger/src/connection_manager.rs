use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::info;
use membership_net::{
    codec::MsgPackCodec,
    destination::Destination,
    error::TransportError,
    sockets::{delivery::Delivery, tcp_channel::ChannelObserver},
};

use crate::{connection::Connection, error::MessengerResult, message::Message, stats::MessengerStats};

struct ConnectionTable {
    by_destination: HashMap<Destination, Arc<Connection>>,
    shut_down: bool,
}

/// Owns the outbound connections, at most one per destination. Creation and teardown are
/// serialized by a single lock so a connection is never both current and closing. Once
/// `close_all` has run no new connections are created
pub struct ConnectionManager {
    connections: Mutex<ConnectionTable>,
    codec: Arc<MsgPackCodec>,
    observer: Arc<dyn ChannelObserver>,
    stats: Arc<MessengerStats>,
}

impl ConnectionManager {
    pub fn new(codec: &Arc<MsgPackCodec>, observer: &Arc<dyn ChannelObserver>, stats: &Arc<MessengerStats>) -> Self {
        Self {
            connections: Mutex::new(ConnectionTable {
                by_destination: HashMap::new(),
                shut_down: false,
            }),
            codec: codec.clone(),
            observer: observer.clone(),
            stats: stats.clone(),
        }
    }

    /// Returns the connection to `destination`, creating it if there is none. A connection that
    /// was closed by a failure is replaced by a new one. Fails after `close_all`
    pub fn obtain_connection(self: &Self, destination: &Destination) -> MessengerResult<Arc<Connection>> {
        let mut connections = self.connections.lock().unwrap();

        if connections.shut_down {
            return Err(TransportError::ConnectionClosed {
                destination: destination.clone(),
            }
            .into());
        }

        if let Some(connection) = connections.by_destination.get(destination) {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            info!("ConnectionManager: Replacing failed connection to {destination}");
            self.stats.connection_closed();
        }

        let connection = Arc::new(Connection::open(destination, &self.codec, &self.observer));
        connections.by_destination.insert(destination.clone(), connection.clone());
        self.stats.connection_opened();
        Ok(connection)
    }

    /// Closes and forgets the connection to `destination`. Unknown destinations are ignored.
    /// Returns true if a connection was removed
    pub fn close_connection(self: &Self, destination: &Destination) -> bool {
        let mut connections = self.connections.lock().unwrap();
        match connections.by_destination.remove(destination) {
            Some(connection) => {
                connection.close();
                self.stats.connection_closed();
                true
            }
            None => false,
        }
    }

    /// Encodes `message` and queues it on the connection to `destination`
    pub fn send(self: &Self, destination: &Destination, message: &Message) -> MessengerResult<Delivery> {
        let connection = self.obtain_connection(destination)?;
        connection.send(message)
    }

    /// Closes every connection and refuses to open new ones. Returns how many there were
    pub fn close_all(self: &Self) -> usize {
        let mut connections = self.connections.lock().unwrap();
        connections.shut_down = true;
        let count = connections.by_destination.len();
        for (_, connection) in connections.by_destination.drain() {
            connection.close();
            self.stats.connection_closed();
        }
        count
    }

    /// Destinations with a usable connection. Connections closed by a failure and not yet
    /// replaced are left out
    pub fn connected_destinations(self: &Self) -> Vec<Destination> {
        self.connections
            .lock()
            .unwrap()
            .by_destination
            .iter()
            .filter(|(_, connection)| !connection.is_closed())
            .map(|(destination, _)| destination.clone())
            .collect()
    }

    pub fn len(self: &Self) -> usize { self.connections.lock().unwrap().by_destination.len() }

    pub fn is_empty(self: &Self) -> bool { self.len() == 0 }
}
