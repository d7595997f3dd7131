//! Frame envelope, configuration frames and data frames.
//!
//! ```text
//! Envelope (8 bytes):
//! [4B frame_type]            # 1 = configuration, 2 = data
//! [4B reserved]
//!
//! Configuration body:
//! [1B version=0x01]
//! [1B flags]
//! [2B target_event_count_k]  # thousands of events
//! [4B histogram_count]
//! [json tunables]
//! [json links]
//! [ ... reference records ... ]
//!
//! Data body:
//! [1B version=0x01]
//! [1B flags]                 # bit0: interpolated
//! [2B reserved]
//! [4B histogram_count]
//! [ ... (string id, histogram payload) ... ]
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, warn};
use serde_json::Value;

use crate::cursor::{write_json, write_string, ByteCursor, LengthPrefix};
use crate::error::{ProtocolError, Result};
use crate::histogram::{HistogramSeries, ReferenceRecord};
use crate::store::HistogramStore;

/// The only protocol version this crate decodes.
pub const PROTOCOL_VERSION: u8 = 1;

pub const ENVELOPE_SIZE: usize = 8;

/// `target_event_count` travels in thousands of events.
pub const TARGET_EVENT_SCALE: u64 = 1_000;

/// Frame kinds carried in the envelope.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameType {
    Configuration = 1,
    Data = 2,
}

impl FrameType {
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            1 => Some(FrameType::Configuration),
            2 => Some(FrameType::Data),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Data frame flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u8 {
        const INTERPOLATED = 1 << 0;
    }
}

/// Outer envelope in front of every binary frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub frame_type: FrameType,
    pub reserved: u32,
}

impl Envelope {
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            reserved: 0,
        }
    }

    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        cursor.atomically(|c| {
            let code = c.read_u32()?;
            let frame_type =
                FrameType::from_u32(code).ok_or(ProtocolError::UnknownFrameType(code))?;
            let reserved = c.read_u32()?;
            Ok(Envelope {
                frame_type,
                reserved,
            })
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        buf.write_u32::<LittleEndian>(self.frame_type as u32)?;
        buf.write_u32::<LittleEndian>(self.reserved)?;
        Ok(())
    }
}

fn read_version(cursor: &mut ByteCursor<'_>) -> Result<u8> {
    let version = cursor.read_u8()?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Everything a configuration frame establishes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigurationEpoch {
    pub protocol_version: u8,
    pub flags: u8,
    pub target_event_count: u64,
    pub tunables: Option<Value>,
    pub links: Option<Value>,
    pub references: BTreeMap<String, Arc<ReferenceRecord>>,
}

impl ConfigurationEpoch {
    /// Encode the frame body (no envelope).
    pub fn encode_body(&self, prefix: LengthPrefix) -> anyhow::Result<Vec<u8>> {
        let target_k = u16::try_from(self.target_event_count / TARGET_EVENT_SCALE)
            .map_err(|_| anyhow::anyhow!("target event count {} too large", self.target_event_count))?;
        let count = u32::try_from(self.references.len())?;

        let mut buf = Vec::new();
        buf.write_u8(self.protocol_version)?;
        buf.write_u8(self.flags)?;
        buf.write_u16::<LittleEndian>(target_k)?;
        buf.write_u32::<LittleEndian>(count)?;
        write_json(&mut buf, prefix, self.tunables.as_ref())?;
        write_json(&mut buf, prefix, self.links.as_ref())?;
        for record in self.references.values() {
            record.encode(&mut buf, prefix)?;
        }
        Ok(buf)
    }

    /// Encode the full frame, envelope included.
    pub fn encode(&self, prefix: LengthPrefix) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        Envelope::new(FrameType::Configuration).encode(&mut buf)?;
        buf.extend(self.encode_body(prefix)?);
        Ok(buf)
    }
}

/// Decode a configuration frame body.
///
/// On error nothing has been applied anywhere; the caller keeps its current epoch.
pub fn decode_configuration(cursor: &mut ByteCursor<'_>) -> Result<ConfigurationEpoch> {
    let protocol_version = read_version(cursor)?;
    let flags = cursor.read_u8()?;
    let target_event_count = cursor.read_u16()? as u64 * TARGET_EVENT_SCALE;
    let histogram_count = cursor.read_u32()?;
    let tunables = cursor.read_json()?;
    let links = cursor.read_json()?;

    let mut references = BTreeMap::new();
    for _ in 0..histogram_count {
        let record = ReferenceRecord::decode(cursor)?;
        let id = record.id.clone();
        if references.insert(id.clone(), Arc::new(record)).is_some() {
            warn!("duplicate reference id {:?} in configuration frame, keeping the last", id);
        }
    }

    if !cursor.is_at_end() {
        debug!(
            "{} trailing bytes after configuration frame",
            cursor.remaining()
        );
    }

    Ok(ConfigurationEpoch {
        protocol_version,
        flags,
        target_event_count,
        tunables,
        links,
        references,
    })
}

/// A set of histogram values to send in one data frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataFrame {
    pub is_interpolated: bool,
    pub histograms: Vec<HistogramSeries>,
}

impl DataFrame {
    pub fn encode_body(&self, prefix: LengthPrefix) -> anyhow::Result<Vec<u8>> {
        let mut flags = DataFlags::empty();
        flags.set(DataFlags::INTERPOLATED, self.is_interpolated);

        let mut buf = Vec::new();
        buf.write_u8(PROTOCOL_VERSION)?;
        buf.write_u8(flags.bits())?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(u32::try_from(self.histograms.len())?)?;
        for series in &self.histograms {
            write_string(&mut buf, prefix, &series.id)?;
            series.encode(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn encode(&self, prefix: LengthPrefix) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        Envelope::new(FrameType::Data).encode(&mut buf)?;
        buf.extend(self.encode_body(prefix)?);
        Ok(buf)
    }
}

/// Decoded contents of a data frame, ready to be applied to the store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataFrameUpdate {
    /// Replacement series for ids present in the live map, in frame order.
    pub updates: Vec<HistogramSeries>,
    /// Ids that were not in the live map and were skipped.
    pub unknown_ids: Vec<String>,
    /// Largest event count carried by the frame, or the store's current value
    /// when the frame carries none.
    pub nevts: u64,
    pub is_interpolated: bool,
}

/// Decode a data frame body against the store's current live map.
///
/// The store is only read here. Unknown ids are skipped with a warning and
/// the cursor stays aligned on the next entry.
pub fn decode_data(cursor: &mut ByteCursor<'_>, store: &HistogramStore) -> Result<DataFrameUpdate> {
    read_version(cursor)?;
    let flags = DataFlags::from_bits_retain(cursor.read_u8()?);
    let _reserved = cursor.read_u16()?;
    let histogram_count = cursor.read_u32()?;
    let is_interpolated = flags.contains(DataFlags::INTERPOLATED);

    let mut updates = Vec::new();
    let mut unknown_ids = Vec::new();
    let mut max_events = 0u64;

    for _ in 0..histogram_count {
        let id = cursor.read_string()?;
        if store.contains(&id) {
            let mut series = HistogramSeries::decode(id, cursor)?;
            series.is_interpolated = is_interpolated;
            max_events = max_events.max(series.event_count);
            updates.push(series);
        } else {
            HistogramSeries::skip(cursor)?;
            warn!("{}", ProtocolError::UnknownHistogramId(id.clone()));
            unknown_ids.push(id);
        }
    }

    let nevts = if max_events > 0 {
        max_events
    } else {
        store.nevts()
    };

    Ok(DataFrameUpdate {
        updates,
        unknown_ids,
        nevts,
        is_interpolated,
    })
}
