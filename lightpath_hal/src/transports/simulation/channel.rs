//! Simulated channel state and the delivery thread.

use crate::transport::{ChannelEvent, ChannelSink};
use lightpath_common::value::Value;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use tracing::{trace, warn};

/// How a simulated channel answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Apply the value and report it back.
    #[default]
    Echo,
    /// Queue the value until `SimTransport::complete_writes`.
    Hold,
    /// Accept the write and never report it.
    Ignore,
}

/// State of one simulated channel.
#[derive(Default)]
pub(super) struct SimChannel {
    /// Current value.
    pub value: Option<Value>,
    /// Reachable flag.
    pub online: bool,
    /// Write behavior.
    pub mode: WriteMode,
    /// Writes queued in `WriteMode::Hold`.
    pub held: Vec<Value>,
    /// Rejection reason for every write, if set.
    pub reject: Option<String>,
    /// Registered event sinks.
    pub sinks: Vec<ChannelSink>,
}

impl SimChannel {
    /// Online channel holding `value`.
    pub fn new(value: Value) -> Self {
        Self {
            value: Some(value),
            online: true,
            ..Default::default()
        }
    }
}

enum Delivery {
    Event {
        sinks: Vec<ChannelSink>,
        event: ChannelEvent,
    },
    Flush(Sender<()>),
}

/// Single delivery thread preserving enqueue order.
///
/// The thread exits when the notifier is dropped.
pub(super) struct Notifier {
    queue: Sender<Delivery>,
}

impl Notifier {
    /// Spawn the delivery thread.
    pub fn spawn() -> Self {
        let (queue, rx) = mpsc::channel();
        if let Err(e) = thread::Builder::new()
            .name("sim-transport".to_string())
            .spawn(move || run(rx))
        {
            warn!("Failed to spawn simulation delivery thread: {}", e);
        }
        Self { queue }
    }

    /// Queue `event` for every sink in `sinks`.
    pub fn send(&self, sinks: &[ChannelSink], event: ChannelEvent) {
        if sinks.is_empty() {
            return;
        }
        let delivery = Delivery::Event {
            sinks: sinks.to_vec(),
            event,
        };
        if self.queue.send(delivery).is_err() {
            warn!("Simulation delivery thread is gone, event dropped");
        }
    }

    /// Block until everything queued so far has been delivered.
    pub fn flush(&self) {
        let (ack, done) = mpsc::channel();
        if self.queue.send(Delivery::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }
}

fn run(rx: Receiver<Delivery>) {
    while let Ok(delivery) = rx.recv() {
        match delivery {
            Delivery::Event { sinks, event } => {
                trace!("Delivering {:?} to {} sinks", event, sinks.len());
                for sink in &sinks {
                    sink(event.clone());
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
