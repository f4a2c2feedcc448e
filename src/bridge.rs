//! Duplex, ordered, non-blocking bridge between the control and rendering contexts.
//!
//! Each direction is an `rtrb` single-producer/single-consumer ring. The
//! sender keeps a local overflow backlog, so a full ring never drops or
//! reorders a message: the backlog is flushed into the ring ahead of any new
//! message. `send` only fails once the receiving side has been dropped.
//!
//! ```
//! use kurasync::bridge::RenderBridge;
//! use kurasync::Message;
//!
//! let (mut control, render) = RenderBridge::new(16);
//! let (mut inbox, _outbox) = render.split();
//!
//! control.send(Message::phase(1.0, 0)).unwrap();
//! assert_eq!(inbox.receive(), Some(Message::phase(1.0, 0)));
//! ```

use alloc::collections::VecDeque;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::BridgeError;
use crate::message::Message;

/// Default ring size for each direction of the bridge
pub const DEFAULT_CAPACITY: usize = 1024;

/// Sending half of one bridge direction.
pub struct BridgeSender<T> {
    producer: Producer<T>,
    backlog: VecDeque<T>,
}

/// Receiving half of one bridge direction.
pub struct BridgeReceiver<T> {
    consumer: Consumer<T>,
}

/// Create one direction of the bridge
pub fn channel<T>(capacity: usize) -> (BridgeSender<T>, BridgeReceiver<T>) {
    let capacity = capacity.max(1);
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        BridgeSender {
            producer,
            backlog: VecDeque::with_capacity(capacity),
        },
        BridgeReceiver { consumer },
    )
}

impl<T> BridgeSender<T> {
    /// Queue a message for the other side. Never blocks.
    ///
    /// Returns [`BridgeError::Closed`] if the receiver was dropped; the
    /// message is discarded in that case.
    pub fn send(&mut self, msg: T) -> Result<(), BridgeError> {
        if self.producer.is_abandoned() {
            return Err(BridgeError::Closed);
        }

        self.flush();
        if !self.backlog.is_empty() {
            self.backlog.push_back(msg);
            return Ok(());
        }

        if let Err(rtrb::PushError::Full(msg)) = self.producer.push(msg) {
            self.backlog.push_back(msg);
        }
        Ok(())
    }

    /// Move as much of the backlog into the ring as fits. Returns the number moved.
    pub fn flush(&mut self) -> usize {
        let mut moved = 0;
        while let Some(msg) = self.backlog.pop_front() {
            match self.producer.push(msg) {
                Ok(()) => moved += 1,
                Err(rtrb::PushError::Full(msg)) => {
                    self.backlog.push_front(msg);
                    break;
                }
            }
        }
        moved
    }

    /// Messages waiting in the local backlog (not yet visible to the receiver)
    #[inline]
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.producer.is_abandoned()
    }
}

impl<T> BridgeReceiver<T> {
    /// Take the oldest message, if any
    #[inline]
    pub fn receive(&mut self) -> Option<T> {
        self.consumer.pop().ok()
    }

    /// Drain everything currently queued, oldest first. Allocation free.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        let consumer = &mut self.consumer;
        core::iter::from_fn(move || consumer.pop().ok())
    }

    /// True once the sender is gone and nothing is left to read
    pub fn is_closed(&self) -> bool {
        self.consumer.is_abandoned() && self.consumer.is_empty()
    }
}

/// Constructor for the two endpoints of the duplex bridge.
pub struct RenderBridge;

impl RenderBridge {
    /// Create both endpoints. `capacity` is the ring size of each direction.
    pub fn new(capacity: usize) -> (ControlEndpoint, RenderEndpoint) {
        let (to_render, from_control) = channel(capacity);
        let (to_control, from_render) = channel(capacity);
        (
            ControlEndpoint {
                tx: to_render,
                rx: from_render,
            },
            RenderEndpoint {
                tx: to_control,
                rx: from_control,
            },
        )
    }
}

/// Control-context side of the bridge
pub struct ControlEndpoint {
    tx: BridgeSender<Message>,
    rx: BridgeReceiver<Message>,
}

impl ControlEndpoint {
    pub fn send(&mut self, msg: Message) -> Result<(), BridgeError> {
        self.tx.send(msg)
    }

    pub fn receive(&mut self) -> Option<Message> {
        self.rx.receive()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Message> + '_ {
        self.rx.drain()
    }

    pub fn flush(&mut self) -> usize {
        self.tx.flush()
    }

    pub fn pending(&self) -> usize {
        self.tx.pending()
    }

    /// True once the rendering context dropped its endpoint
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Rendering-context side of the bridge
pub struct RenderEndpoint {
    tx: BridgeSender<Message>,
    rx: BridgeReceiver<Message>,
}

impl RenderEndpoint {
    pub fn send(&mut self, msg: Message) -> Result<(), BridgeError> {
        self.tx.send(msg)
    }

    pub fn receive(&mut self) -> Option<Message> {
        self.rx.receive()
    }

    /// Split into the inbox (fed to the processor node) and the outbox.
    pub fn split(self) -> (BridgeReceiver<Message>, BridgeSender<Message>) {
        (self.rx, self.tx)
    }
}
