//! Typed notifications and the subscriber list they are delivered to.

use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use serde_json::Value;

use crate::error::ProtocolError;
use crate::histogram::{HistogramSeries, ReferenceRecord};

/// Sent once, after the first configuration frame of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReadyInfo {
    pub protocol_version: u8,
    pub flags: u8,
    pub target_event_count: u64,
}

/// Progress metadata reported by every data frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameMetadata {
    pub nevts: u64,
    pub is_interpolated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Ready(ReadyInfo),
    HistogramAdded {
        id: String,
        series: HistogramSeries,
        reference: Arc<ReferenceRecord>,
    },
    HistogramUpdated {
        id: String,
        series: HistogramSeries,
        reference: Arc<ReferenceRecord>,
    },
    HistogramRemoved {
        id: String,
        series: HistogramSeries,
        reference: Arc<ReferenceRecord>,
    },
    MetadataUpdated(FrameMetadata),
    DataArrived {
        is_interpolated: bool,
    },
    ProtocolError(ProtocolError),
    /// Backend status line from the control channel.
    Status {
        message: String,
        vars: Value,
    },
    RemoteError {
        message: String,
    },
    SimulationCompleted,
    SimulationFailed {
        message: String,
    },
}

impl Notification {
    /// Histogram id this notification is about, if any.
    pub fn histogram_id(&self) -> Option<&str> {
        match self {
            Notification::HistogramAdded { id, .. }
            | Notification::HistogramUpdated { id, .. }
            | Notification::HistogramRemoved { id, .. } => Some(id),
            _ => None,
        }
    }
}

enum Subscriber {
    Callback(Box<dyn FnMut(&Notification) + Send>),
    Channel(Sender<Notification>),
}

/// Subscribers in registration order.
#[derive(Default)]
pub struct Subscribers {
    entries: Vec<Subscriber>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, callback: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.entries.push(Subscriber::Callback(Box::new(callback)));
    }

    /// Subscribe through a channel. Dropping the receiver unsubscribes it.
    pub fn channel(&mut self) -> Receiver<Notification> {
        let (tx, rx) = channel();
        self.entries.push(Subscriber::Channel(tx));
        rx
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver `notification` to every subscriber, in registration order.
    pub fn dispatch(&mut self, notification: &Notification) {
        self.entries.retain_mut(|entry| match entry {
            Subscriber::Callback(callback) => {
                callback(notification);
                true
            }
            Subscriber::Channel(tx) => tx.send(notification.clone()).is_ok(),
        });
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.entries.len())
            .finish()
    }
}
