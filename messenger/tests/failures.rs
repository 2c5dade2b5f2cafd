mod common;

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
};

use common::{collect, initialized_messenger, monitor, started_messenger, wait_until, TIMEOUT};
use membership_messenger::{
    error::MessengerError,
    member::{Member, MemberAttributes},
    message::{Message, MessageKind, Payload},
    view::View,
};
use membership_net::{
    codec::{Codec, MsgPackCodec},
    destination::Destination,
    error::TransportError,
};

fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn should_reject_unregistered_message_kind() {
    let receiver = initialized_messenger();
    let heartbeats = collect(&receiver, MessageKind::Heartbeat);
    receiver.start().unwrap();
    let health = monitor(&receiver);
    let sender = started_messenger();

    let sender_member = sender.get_member_id().unwrap();
    let recipient = receiver.get_member_id().unwrap();
    receiver
        .install_view(View::new(1, None, vec![recipient.clone(), sender_member.clone()]))
        .unwrap();

    sender
        .send(Message::new(vec![recipient], Payload::ViewAck { view_id: 1 }))
        .unwrap();

    assert!(wait_until(|| health.failures.lock().unwrap().len() == 1));
    assert!(matches!(
        health.failures.lock().unwrap()[0],
        MessengerError::Unhandled {
            kind: MessageKind::ViewAck,
            ..
        }
    ));
    assert!(wait_until(|| health.suspects.lock().unwrap().len() == 1));
    assert_eq!(sender_member, health.suspects.lock().unwrap()[0]);
    assert!(heartbeats.lock().unwrap().is_empty());
    assert_eq!(1, receiver.stats().receive_failures);
}

#[test]
fn should_abandon_corrupt_stream_after_good_messages() {
    let receiver = initialized_messenger();
    let heartbeats = collect(&receiver, MessageKind::Heartbeat);
    receiver.start().unwrap();
    let health = monitor(&receiver);

    let codec = MsgPackCodec::new();
    let mut bytes = codec.encode(&Message::heartbeat(Vec::new(), 1)).unwrap();
    bytes.extend(codec.encode(&Message::heartbeat(Vec::new(), 2)).unwrap());
    bytes.extend([0xc1, 0xc1, 0xc1, 0xc1]);

    let mut stream = TcpStream::connect(receiver.local_address().unwrap()).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream.write_all(&bytes).unwrap();

    assert!(wait_until(|| health.failures.lock().unwrap().len() == 1));
    assert!(matches!(
        health.failures.lock().unwrap()[0],
        MessengerError::Transport(TransportError::CorruptData { .. })
    ));
    assert_eq!(2, heartbeats.lock().unwrap().len());
    assert!(health.suspects.lock().unwrap().is_empty());

    let mut buffer = [0u8; 8];
    let closed = match stream.read(&mut buffer) {
        Ok(count) => count == 0,
        Err(_) => true,
    };
    assert!(closed);
}

#[test]
fn should_reassemble_messages_split_across_writes() {
    let receiver = initialized_messenger();
    let heartbeats = collect(&receiver, MessageKind::Heartbeat);
    let installs = collect(&receiver, MessageKind::InstallView);
    receiver.start().unwrap();

    let coordinator = Member::new(
        "127.0.0.1",
        unused_port(),
        MemberAttributes {
            name: String::from("coordinator"),
            groups: vec![String::from("west")],
            ..MemberAttributes::default()
        },
    );
    let recipient = receiver.get_member_id().unwrap();
    let install = Message::new(
        vec![recipient.clone()],
        Payload::InstallView {
            view: View::new(7, Some(coordinator.clone()), vec![coordinator.clone(), recipient]),
        },
    )
    .with_sender(&coordinator);

    let codec = MsgPackCodec::new();
    let mut bytes = Vec::new();
    for request_id in 0..20 {
        bytes.extend(codec.encode(&Message::heartbeat(Vec::new(), request_id)).unwrap());
        if request_id == 10 {
            bytes.extend(codec.encode(&install).unwrap());
        }
    }

    let mut stream = TcpStream::connect(receiver.local_address().unwrap()).unwrap();
    stream.set_nodelay(true).unwrap();
    for chunk in bytes.chunks(7) {
        stream.write_all(chunk).unwrap();
        stream.flush().unwrap();
    }

    assert!(wait_until(|| heartbeats.lock().unwrap().len() == 20));
    for (index, message) in heartbeats.lock().unwrap().iter().enumerate() {
        assert!(matches!(message.payload, Payload::Heartbeat { request_id, .. } if request_id as usize == index));
    }

    assert!(wait_until(|| installs.lock().unwrap().len() == 1));
    let received = installs.lock().unwrap()[0].clone();
    assert_eq!(install, received);
    let sender = received.sender.unwrap();
    assert_eq!(coordinator.id(), sender.id());
    assert_eq!(coordinator.attributes(), sender.attributes());
}

#[tokio::test]
async fn should_suspect_unreachable_member() {
    let sender = started_messenger();
    let health = monitor(&sender);
    let unreachable = Member::new("127.0.0.1", unused_port(), MemberAttributes::default());
    sender
        .install_view(View::new(1, None, vec![sender.get_member_id().unwrap(), unreachable.clone()]))
        .unwrap();

    let result = match sender.send_tracked(Message::heartbeat(vec![unreachable.clone()], 1)) {
        Ok(mut deliveries) => {
            let (_, delivery) = deliveries.remove(0);
            tokio::time::timeout(TIMEOUT, delivery).await.unwrap()
        }
        Err(MessengerError::Transport(err)) => Err(err),
        Err(err) => panic!("unexpected error {err}"),
    };

    assert!(matches!(
        result,
        Err(TransportError::ConnectFailed { .. }) | Err(TransportError::ConnectionClosed { .. })
    ));
    assert!(wait_until(|| health.suspects.lock().unwrap().len() == 1));
    assert_eq!(unreachable, health.suspects.lock().unwrap()[0]);
    assert!(wait_until(|| sender.stats().send_failures >= 1));
}

#[test]
fn should_close_connections_to_crashed_members_only() {
    let messenger = started_messenger();
    let local = messenger.get_member_id().unwrap();

    let listeners: Vec<TcpListener> = (0..3).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()).collect();
    let peers: Vec<Member> = listeners
        .iter()
        .map(|l| Member::new("127.0.0.1", l.local_addr().unwrap().port(), MemberAttributes::default()))
        .collect();
    let (a, b, c) = (peers[0].clone(), peers[1].clone(), peers[2].clone());

    let v1 = View::new(1, Some(local.clone()), vec![local.clone(), a.clone(), b.clone(), c.clone()]);
    assert!(messenger.install_view(v1).unwrap().is_empty());
    messenger.send(Message::heartbeat(peers.clone(), 1)).unwrap();
    assert_eq!(3, messenger.connected_destinations().len());

    let v2 = View::new(2, Some(local.clone()), vec![local.clone(), a.clone(), c.clone()]);
    assert_eq!(vec![b.clone()], messenger.install_view(v2.clone()).unwrap());

    let mut remaining = messenger.connected_destinations();
    remaining.sort_by_key(|d| d.port());
    let mut expected = vec![a.destination(), c.destination()];
    expected.sort_by_key(|d| d.port());
    assert_eq!(expected, remaining);

    assert!(messenger.install_view(v2).unwrap().is_empty());
    assert_eq!(2, messenger.connected_destinations().len());
    assert_eq!(Some(2), messenger.current_view().map(|v| v.view_id()));
    assert_eq!(1, messenger.stats().connections_closed);
}

#[test]
fn should_ignore_crashed_member_never_contacted() {
    let messenger = started_messenger();
    let local = messenger.get_member_id().unwrap();
    let stranger = Member::new("127.0.0.1", unused_port(), MemberAttributes::default());

    messenger
        .install_view(View::new(1, None, vec![local.clone(), stranger.clone()]))
        .unwrap();
    let crashed = messenger
        .install_view(View::with_crashed(2, None, vec![local], vec![stranger.clone()]))
        .unwrap();

    assert_eq!(vec![stranger], crashed);
    assert!(messenger.connected_destinations().is_empty());
    assert_eq!(0, messenger.stats().connections_closed);
}

#[test]
fn should_reconnect_after_member_rejoins() {
    let messenger = started_messenger();
    let local = messenger.get_member_id().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let peer = Member::new("127.0.0.1", listener.local_addr().unwrap().port(), MemberAttributes::default());

    messenger.install_view(View::new(1, None, vec![local.clone(), peer.clone()])).unwrap();
    messenger.send(Message::heartbeat(vec![peer.clone()], 1)).unwrap();
    messenger.install_view(View::new(2, None, vec![local.clone()])).unwrap();
    assert!(messenger.connected_destinations().is_empty());

    messenger.install_view(View::new(3, None, vec![local, peer.clone()])).unwrap();
    messenger.send(Message::heartbeat(vec![peer.clone()], 2)).unwrap();

    assert_eq!(vec![Destination::new("127.0.0.1", peer.port())], messenger.connected_destinations());
    assert_eq!(2, messenger.stats().connections_opened);
}
