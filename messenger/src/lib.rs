/*
Transport and dispatch layer for cluster membership. Each process runs one Messenger that sends
control messages to other members over plain TCP, dispatches the messages it receives to the
handler registered for their kind, and drops connections to members that leave the view.
*/

pub mod config;
pub mod error;

/// Cluster identities and the views that group them
pub mod member;
pub mod view;

/// Membership control messages and how they are routed to handlers
pub mod message;
pub mod dispatcher;

/// Outbound connections, at most one per destination
pub mod connection;
pub mod connection_manager;

/// Inbound endpoint: accept loop plus a fixed pool of reader threads
pub mod server;

pub mod health;
pub mod stats;

pub mod messenger;
