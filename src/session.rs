//! Session controller: the glue between a transport and the histogram store.
//!
//! The transport hands over whole messages. Binary messages are frames,
//! text messages are control-channel actions. Every frame is decoded in full
//! before anything is applied, so a malformed frame leaves the store exactly
//! as it was and the session carries on with the next one.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::compare::{chi2_with_error, ratio_histogram};
use crate::config::SessionConfig;
use crate::control::{InboundAction, OutboundAction};
use crate::cursor::ByteCursor;
use crate::error::{ProtocolError, Result};
use crate::frame::{decode_configuration, decode_data, Envelope, FrameType};
use crate::histogram::{HistogramSeries, ReferenceRecord};
use crate::notify::{FrameMetadata, Notification, ReadyInfo, Subscribers};
use crate::store::{HistogramStore, SessionState};

/// A message delivered by the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Binary(Vec<u8>),
    Text(String),
    /// The peer went away.
    Closed,
}

/// The duplex channel a session runs over.
pub trait Transport {
    /// Wait up to `timeout` for the next message. `Ok(None)` means nothing arrived.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Message>>;

    fn send_text(&mut self, text: &str) -> io::Result<()>;
}

/// In-process transport over `std::sync::mpsc`.
pub struct ChannelTransport {
    inbound: Receiver<Message>,
    outbound: Sender<String>,
}

/// The other end of a [`ChannelTransport`].
pub struct ChannelPeer {
    pub to_session: Sender<Message>,
    pub from_session: Receiver<String>,
}

impl ChannelTransport {
    pub fn pair() -> (ChannelTransport, ChannelPeer) {
        let (to_session, inbound) = channel();
        let (outbound, from_session) = channel();
        (
            ChannelTransport { inbound, outbound },
            ChannelPeer {
                to_session,
                from_session,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Message>> {
        match self.inbound.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(Some(Message::Closed)),
        }
    }

    fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.outbound
            .send(text.to_owned())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "session peer dropped"))
    }
}

/// Asks a running session loop to stop at its next poll.
#[derive(Clone, Debug, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SessionController {
    config: SessionConfig,
    store: HistogramStore,
    subscribers: Subscribers,
    close: CloseHandle,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            store: HistogramStore::new(config.merge_policy),
            config,
            subscribers: Subscribers::new(),
            close: CloseHandle::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &HistogramStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.store.state()
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.subscribers.add(callback);
    }

    pub fn subscribe_channel(&mut self) -> Receiver<Notification> {
        self.subscribers.channel()
    }

    pub fn on_ready<F>(&mut self, mut f: F)
    where
        F: FnMut(&ReadyInfo) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::Ready(info) = n {
                f(info);
            }
        });
    }

    pub fn on_histogram_added<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &HistogramSeries, &ReferenceRecord) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::HistogramAdded {
                id,
                series,
                reference,
            } = n
            {
                f(id, series, reference);
            }
        });
    }

    pub fn on_histogram_updated<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &HistogramSeries, &ReferenceRecord) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::HistogramUpdated {
                id,
                series,
                reference,
            } = n
            {
                f(id, series, reference);
            }
        });
    }

    pub fn on_histogram_removed<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &HistogramSeries, &ReferenceRecord) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::HistogramRemoved {
                id,
                series,
                reference,
            } = n
            {
                f(id, series, reference);
            }
        });
    }

    pub fn on_metadata_updated<F>(&mut self, mut f: F)
    where
        F: FnMut(&FrameMetadata) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::MetadataUpdated(meta) = n {
                f(meta);
            }
        });
    }

    pub fn on_data_arrived<F>(&mut self, mut f: F)
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::DataArrived { is_interpolated } = n {
                f(*is_interpolated);
            }
        });
    }

    pub fn on_protocol_error<F>(&mut self, mut f: F)
    where
        F: FnMut(&ProtocolError) + Send + 'static,
    {
        self.subscribe(move |n| {
            if let Notification::ProtocolError(err) = n {
                f(err);
            }
        });
    }

    fn emit(&mut self, events: Vec<Notification>) {
        for event in &events {
            self.subscribers.dispatch(event);
        }
    }

    /// Log and broadcast a frame-level failure, handing the error back.
    fn report(&mut self, err: ProtocolError) -> ProtocolError {
        error!("frame dropped: {}", err);
        self.subscribers
            .dispatch(&Notification::ProtocolError(err.clone()));
        err
    }

    /// Feed a complete binary frame, envelope included.
    pub fn feed_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let mut cursor = ByteCursor::with_prefix(bytes, self.config.string_prefix);
        let envelope = Envelope::decode(&mut cursor).map_err(|e| self.report(e))?;
        trace!("{:?} frame, {} bytes", envelope.frame_type, bytes.len());
        match envelope.frame_type {
            FrameType::Configuration => self.apply_configuration(&mut cursor),
            FrameType::Data => self.apply_data(&mut cursor),
        }
    }

    /// Feed a configuration frame body (envelope already stripped).
    pub fn feed_configuration_frame(&mut self, body: &[u8]) -> Result<()> {
        let mut cursor = ByteCursor::with_prefix(body, self.config.string_prefix);
        self.apply_configuration(&mut cursor)
    }

    /// Feed a data frame body (envelope already stripped).
    pub fn feed_data_frame(&mut self, body: &[u8]) -> Result<()> {
        let mut cursor = ByteCursor::with_prefix(body, self.config.string_prefix);
        self.apply_data(&mut cursor)
    }

    fn apply_configuration(&mut self, cursor: &mut ByteCursor<'_>) -> Result<()> {
        let epoch = decode_configuration(cursor).map_err(|e| self.report(e))?;
        let events = self.store.apply_configuration(epoch);
        self.emit(events);
        Ok(())
    }

    fn apply_data(&mut self, cursor: &mut ByteCursor<'_>) -> Result<()> {
        let update = decode_data(cursor, &self.store).map_err(|e| self.report(e))?;
        debug!(
            "data frame: {} updates, {} unknown, nevts={}",
            update.updates.len(),
            update.unknown_ids.len(),
            update.nevts
        );
        let events = self.store.apply_data(update);
        self.emit(events);
        Ok(())
    }

    /// Handle a control-channel message. Returns the reply to send, if any.
    pub fn feed_control_message(&mut self, text: &str) -> Option<OutboundAction> {
        let action = match InboundAction::from_json(text) {
            Ok(action) => action,
            Err(e) => {
                warn!("ignoring control message {:?}: {}", text, e);
                return None;
            }
        };

        let notification = match action {
            InboundAction::Ping {} => return Some(OutboundAction::Pong {}),
            InboundAction::Pong {} => {
                trace!("pong");
                return None;
            }
            InboundAction::Status { message, vars } => Notification::Status { message, vars },
            InboundAction::Error { message } => {
                warn!("backend error: {}", message);
                Notification::RemoteError { message }
            }
            InboundAction::SimCompleted {} => {
                info!("simulation completed");
                Notification::SimulationCompleted
            }
            InboundAction::SimFailed { message } => {
                warn!("simulation failed: {}", message);
                Notification::SimulationFailed { message }
            }
        };
        self.subscribers.dispatch(&notification);
        None
    }

    /// χ² and its error for the live histogram `id` against its reference.
    pub fn compare(&self, id: &str) -> Option<(f64, f64)> {
        let live = self.store.snapshot(id)?;
        let reference = self.store.reference(id)?;
        chi2_with_error(&live, &reference.baseline, self.config.uncertainty)
    }

    /// Live histogram `id` divided by its reference.
    pub fn ratio(&self, id: &str) -> Option<HistogramSeries> {
        let live = self.store.snapshot(id)?;
        let reference = self.store.reference(id)?;
        ratio_histogram(&live, &reference.baseline)
    }

    pub fn progress(&self) -> Option<f64> {
        self.store.progress()
    }

    /// Drive the session from `transport` until closed.
    ///
    /// Sends the handshake first. Returns when the close handle fires or the
    /// peer goes away. Bad frames are reported to subscribers and skipped.
    pub fn run<T: Transport>(&mut self, transport: &mut T) -> io::Result<()> {
        let handshake = OutboundAction::Handshake {
            version: self.config.handshake_version,
        };
        transport.send_text(&handshake.to_json()?)?;
        info!("session started");

        let poll = self.config.poll_interval();
        loop {
            if self.close.is_closed() {
                info!("session closed");
                return Ok(());
            }
            match transport.recv(poll)? {
                None => continue,
                Some(Message::Closed) => {
                    info!("transport closed by peer");
                    return Ok(());
                }
                Some(Message::Binary(bytes)) => {
                    // Subscribers have already seen the error.
                    if let Err(err) = self.feed_frame(&bytes) {
                        trace!("continuing after bad frame: {}", err);
                    }
                }
                Some(Message::Text(text)) => {
                    if let Some(reply) = self.feed_control_message(&text) {
                        transport.send_text(&reply.to_json()?)?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::LengthPrefix;
    use crate::frame::{ConfigurationEpoch, DataFrame, PROTOCOL_VERSION};
    use crate::histogram::BinSample;
    use std::sync::Mutex;

    fn epoch(ids: &[&str]) -> ConfigurationEpoch {
        ConfigurationEpoch {
            protocol_version: PROTOCOL_VERSION,
            target_event_count: 5_000,
            references: ids
                .iter()
                .map(|id| {
                    let bins = vec![
                        BinSample {
                            y: 100.0,
                            y_err_plus: 5.0,
                            y_err_minus: 5.0,
                            ..Default::default()
                        };
                        2
                    ];
                    let record = ReferenceRecord {
                        id: id.to_string(),
                        baseline: HistogramSeries::new(*id, bins, 0),
                        ..Default::default()
                    };
                    (id.to_string(), Arc::new(record))
                })
                .collect(),
            ..Default::default()
        }
    }

    fn config_bytes(ids: &[&str]) -> Vec<u8> {
        epoch(ids).encode(LengthPrefix::U16).unwrap()
    }

    #[test]
    fn test_ready_fires_once() {
        let count = Arc::new(Mutex::new(0));
        let mut session = SessionController::default();
        let c = count.clone();
        session.on_ready(move |_| *c.lock().unwrap() += 1);

        session.feed_frame(&config_bytes(&["/A"])).unwrap();
        session.feed_frame(&config_bytes(&["/B"])).unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn test_unsupported_version_keeps_epoch() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let mut session = SessionController::default();
        let e = errors.clone();
        session.on_protocol_error(move |err| e.lock().unwrap().push(err.clone()));

        session.feed_frame(&config_bytes(&["/A"])).unwrap();
        let mut bad = config_bytes(&["/B"]);
        bad[8] = 7;
        assert_eq!(
            session.feed_frame(&bad),
            Err(ProtocolError::UnsupportedVersion(7))
        );

        assert!(session.store().contains("/A"));
        assert!(!session.store().contains("/B"));
        assert_eq!(
            *errors.lock().unwrap(),
            vec![ProtocolError::UnsupportedVersion(7)]
        );
    }

    #[test]
    fn test_truncated_data_frame_applies_nothing() {
        let mut session = SessionController::default();
        session.feed_frame(&config_bytes(&["/A", "/B"])).unwrap();

        let bin = BinSample {
            y: 110.0,
            y_err_plus: 5.0,
            y_err_minus: 5.0,
            ..Default::default()
        };
        let frame = DataFrame {
            is_interpolated: false,
            histograms: vec![
                HistogramSeries::new("/A", vec![bin; 2], 100),
                HistogramSeries::new("/B", vec![bin; 2], 100),
            ],
        };
        let bytes = frame.encode(LengthPrefix::U16).unwrap();
        let truncated = &bytes[..bytes.len() - 3];

        assert!(matches!(
            session.feed_frame(truncated),
            Err(ProtocolError::Underrun { .. })
        ));
        assert!(session.store().snapshot("/A").unwrap().is_blank());
        assert_eq!(session.store().nevts(), 0);

        session.feed_frame(&bytes).unwrap();
        let (chi2, _) = session.compare("/A").unwrap();
        let expected = 0.1f64.powi(2) / (0.05f64.powi(2) + (0.05f64 * 1.1).powi(2));
        assert!((chi2 - expected).abs() < 1e-9);
        assert_eq!(session.progress(), Some(0.02));
    }

    #[test]
    fn test_body_entry_points() {
        let mut session = SessionController::default();
        let body = epoch(&["/A"]).encode_body(LengthPrefix::U16).unwrap();
        session.feed_configuration_frame(&body).unwrap();
        assert!(session.store().contains("/A"));

        let frame = DataFrame {
            is_interpolated: true,
            histograms: vec![HistogramSeries::zeroed("/A", 2)],
        };
        let arrived = Arc::new(Mutex::new(Vec::new()));
        let a = arrived.clone();
        session.on_data_arrived(move |interp| a.lock().unwrap().push(interp));
        session
            .feed_data_frame(&frame.encode_body(LengthPrefix::U16).unwrap())
            .unwrap();
        assert_eq!(*arrived.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_control_messages() {
        let mut session = SessionController::default();
        let rx = session.subscribe_channel();

        assert_eq!(
            session.feed_control_message(r#"{"action":"ping","param":{}}"#),
            Some(OutboundAction::Pong {})
        );
        assert_eq!(
            session.feed_control_message(r#"{"action":"sim_failed","param":{"message":"no jobs"}}"#),
            None
        );
        assert_eq!(session.feed_control_message("not json"), None);
        assert_eq!(
            session.feed_control_message(r#"{"action":"ping"}"#),
            Some(OutboundAction::Pong {})
        );

        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::SimulationFailed {
                message: "no jobs".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_frame_type() {
        let mut session = SessionController::default();
        let mut bytes = config_bytes(&["/A"]);
        bytes[0] = 3;
        assert_eq!(
            session.feed_frame(&bytes),
            Err(ProtocolError::UnknownFrameType(3))
        );
        assert_eq!(session.state(), SessionState::Uninitialized);
    }
}
