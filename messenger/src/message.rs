use std::fmt::{self, Display};

use chrono::Utc;
use membership_net::data_types::{RequestId, Timestamp, ViewId};
use serde::{Deserialize, Serialize};

use crate::{member::Member, view::View};

/// The dispatch key of a message. There is one kind per payload variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    JoinRequest,
    JoinResponse,
    LeaveRequest,
    RemoveMemberRequest,
    InstallView,
    ViewAck,
    HeartbeatRequest,
    Heartbeat,
    SuspectMembers,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        MessageKind::JoinRequest,
        MessageKind::JoinResponse,
        MessageKind::LeaveRequest,
        MessageKind::RemoveMemberRequest,
        MessageKind::InstallView,
        MessageKind::ViewAck,
        MessageKind::HeartbeatRequest,
        MessageKind::Heartbeat,
        MessageKind::SuspectMembers,
    ];
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspect {
    pub member: Member,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    JoinRequest { member: Member },
    JoinResponse { view: Option<View>, rejection: Option<String> },
    LeaveRequest { member: Member, reason: String },
    RemoveMemberRequest { member: Member, reason: String },
    InstallView { view: View },
    ViewAck { view_id: ViewId },
    HeartbeatRequest { request_id: RequestId, target: Member },
    Heartbeat { request_id: RequestId, timestamp: Timestamp },
    SuspectMembers { suspects: Vec<Suspect> },
}

impl Payload {
    pub fn kind(self: &Self) -> MessageKind {
        match self {
            Payload::JoinRequest { .. } => MessageKind::JoinRequest,
            Payload::JoinResponse { .. } => MessageKind::JoinResponse,
            Payload::LeaveRequest { .. } => MessageKind::LeaveRequest,
            Payload::RemoveMemberRequest { .. } => MessageKind::RemoveMemberRequest,
            Payload::InstallView { .. } => MessageKind::InstallView,
            Payload::ViewAck { .. } => MessageKind::ViewAck,
            Payload::HeartbeatRequest { .. } => MessageKind::HeartbeatRequest,
            Payload::Heartbeat { .. } => MessageKind::Heartbeat,
            Payload::SuspectMembers { .. } => MessageKind::SuspectMembers,
        }
    }
}

/// A membership control message together with the members it is addressed to. Only the
/// explicitly listed recipients are sent the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Option<Member>,
    pub recipients: Vec<Member>,
    pub payload: Payload,
}

impl Message {
    pub fn new(recipients: Vec<Member>, payload: Payload) -> Self {
        Self {
            sender: None,
            recipients,
            payload,
        }
    }

    /// A heartbeat stamped with the current wall clock time in milliseconds
    pub fn heartbeat(recipients: Vec<Member>, request_id: RequestId) -> Self {
        Self::new(
            recipients,
            Payload::Heartbeat {
                request_id,
                timestamp: Utc::now().timestamp_millis(),
            },
        )
    }

    pub fn with_sender(mut self: Self, sender: &Member) -> Self {
        self.sender = Some(sender.clone());
        self
    }

    pub fn kind(self: &Self) -> MessageKind { self.payload.kind() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberAttributes;
    use membership_net::codec::{Codec, MsgPackCodec};

    #[test]
    fn should_roundtrip_through_codec() {
        let member = Member::new("127.0.0.1", 7001, MemberAttributes::default());
        let view = View::new(3, Some(member.clone()), vec![member.clone()]);
        let message = Message::new(vec![member.clone()], Payload::InstallView { view }).with_sender(&member);
        let codec = MsgPackCodec::new();

        let buffer = codec.encode(&message).unwrap();
        let (decoded, consumed): (Message, usize) = codec.decode(&buffer).unwrap();

        assert_eq!(message, decoded);
        assert_eq!(buffer.len(), consumed);
        assert_eq!(MessageKind::InstallView, decoded.kind());
    }

    #[test]
    fn should_stamp_heartbeat_with_current_time() {
        let before = Utc::now().timestamp_millis();
        let message = Message::heartbeat(Vec::new(), 5);
        let after = Utc::now().timestamp_millis();

        match message.payload {
            Payload::Heartbeat { request_id, timestamp } => {
                assert_eq!(5, request_id);
                assert!(timestamp >= before && timestamp <= after);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
