use kurasync::bridge::{self, RenderBridge};
use kurasync::error::BridgeError;
use kurasync::{EvalCommand, Message, StatusKind};

#[test]
fn fifo_across_overflow() {
    // a tiny ring forces most messages through the sender backlog
    let (mut tx, mut rx) = bridge::channel::<u32>(4);
    for i in 0..100 {
        tx.send(i).unwrap();
    }
    assert_eq!(tx.pending(), 96);

    let mut received = Vec::new();
    while received.len() < 100 {
        received.extend(rx.drain());
        tx.flush();
    }
    assert_eq!(received, (0..100).collect::<Vec<_>>());
    assert_eq!(tx.pending(), 0);
}

#[test]
fn interleaved_sends_keep_order_in_both_directions() {
    let (mut control, render) = RenderBridge::new(3);
    let (mut inbox, mut outbox) = render.split();

    let mut to_render = Vec::new();
    let mut to_control = Vec::new();
    for i in 0..50u32 {
        let down = if i % 7 == 0 {
            EvalCommand::new("", format!("{i}")).into_message()
        } else {
            Message::phase(i as f64 * 0.1, i)
        };
        control.send(down.clone()).unwrap();
        to_render.push(down);

        let up = Message::status(StatusKind::StateChange, format!("block {i}"));
        outbox.send(up.clone()).unwrap();
        to_control.push(up);

        if i % 5 == 0 {
            // partial reads mid-stream
            inbox.receive();
            to_render.remove(0);
        }
    }

    let mut got_render = Vec::new();
    let mut got_control = Vec::new();
    while got_render.len() < to_render.len() || got_control.len() < to_control.len() {
        control.flush();
        outbox.flush();
        got_render.extend(inbox.drain());
        got_control.extend(control.drain());
    }

    assert_eq!(got_render, to_render);
    assert_eq!(got_control, to_control);
}

#[test]
fn send_fails_only_once_the_receiver_is_gone() {
    let (mut control, render) = RenderBridge::new(2);
    for i in 0..10 {
        control.send(Message::phase(0.0, i)).unwrap();
    }
    assert!(!control.is_closed());

    drop(render);
    assert!(control.is_closed());
    assert_eq!(control.send(Message::phase(0.0, 0)), Err(BridgeError::Closed));
}

#[test]
fn receiver_sees_remaining_messages_after_sender_drops() {
    let (mut tx, mut rx) = bridge::channel(8);
    tx.send("a").unwrap();
    tx.send("b").unwrap();
    drop(tx);

    assert!(!rx.is_closed());
    assert_eq!(rx.drain().collect::<Vec<_>>(), vec!["a", "b"]);
    assert!(rx.is_closed());
    assert_eq!(rx.receive(), None);
}
