//! Decoder and comparison engine for streamed simulation histograms.
//!
//! A backend streams binary frames: one configuration frame per epoch that
//! declares the histograms and their reference measurements, then data frames
//! carrying updated bin values. [`SessionController`] decodes them into a
//! [`HistogramStore`] and notifies subscribers; the functions in [`compare`]
//! score a live histogram against its reference.

pub mod compare;
pub mod config;
pub mod control;
pub mod cursor;
pub mod error;
pub mod frame;
pub mod histogram;
pub mod merge;
pub mod notify;
pub mod session;
pub mod store;

pub use compare::{chi2, chi2_per_bin, chi2_with_error, ratio_histogram, DEFAULT_UNCERTAINTY};
pub use config::SessionConfig;
pub use control::{InboundAction, OutboundAction};
pub use cursor::{ByteCursor, LengthPrefix};
pub use error::{CompareError, ProtocolError};
pub use frame::{
    decode_configuration, decode_data, ConfigurationEpoch, DataFlags, DataFrame, DataFrameUpdate,
    Envelope, FrameType, PROTOCOL_VERSION,
};
pub use histogram::{BinSample, HistogramSeries, ImageRefs, ReferenceInfo, ReferenceRecord};
pub use merge::MergePolicy;
pub use notify::{FrameMetadata, Notification, ReadyInfo};
pub use session::{ChannelPeer, ChannelTransport, CloseHandle, Message, SessionController, Transport};
pub use store::{HistogramStore, SessionState};
