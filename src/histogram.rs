//! Histogram data model and its wire encoding.

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::cursor::{write_blob, write_string, ByteCursor, LengthPrefix};
use crate::error::{ProtocolError, Result};

/// Encoded size of one bin: six `f64` fields.
pub const BIN_WIRE_SIZE: usize = 6 * 8;

/// Encoded size of the histogram payload header: `u32` bin count, `u64` event count.
pub const SERIES_HEADER_SIZE: usize = 4 + 8;

/// One bin: a value with asymmetric errors over the interval `x ± x_err_*`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BinSample {
    pub y: f64,
    pub y_err_plus: f64,
    pub y_err_minus: f64,
    pub x: f64,
    pub x_err_plus: f64,
    pub x_err_minus: f64,
}

impl BinSample {
    fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(BinSample {
            y: cursor.read_f64()?,
            y_err_plus: cursor.read_f64()?,
            y_err_minus: cursor.read_f64()?,
            x: cursor.read_f64()?,
            x_err_plus: cursor.read_f64()?,
            x_err_minus: cursor.read_f64()?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        for v in [
            self.y,
            self.y_err_plus,
            self.y_err_minus,
            self.x,
            self.x_err_plus,
            self.x_err_minus,
        ] {
            buf.write_f64::<LittleEndian>(v)?;
        }
        Ok(())
    }
}

/// A named series of bins.
///
/// `bin_count()` is always `bins.len()`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSeries {
    pub id: String,
    pub bins: Vec<BinSample>,
    pub event_count: u64,
    pub is_interpolated: bool,
}

impl HistogramSeries {
    pub fn new(id: impl Into<String>, bins: Vec<BinSample>, event_count: u64) -> Self {
        Self {
            id: id.into(),
            bins,
            event_count,
            is_interpolated: false,
        }
    }

    /// A series of `bin_count` all-zero bins with no events.
    pub fn zeroed(id: impl Into<String>, bin_count: usize) -> Self {
        Self::new(id, vec![BinSample::default(); bin_count], 0)
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// True when there is nothing to compare: no bins, or every value is zero.
    pub fn is_blank(&self) -> bool {
        self.bins.iter().all(|b| b.y == 0.0)
    }

    /// Decode a histogram payload, attaching the given id.
    pub fn decode(id: impl Into<String>, cursor: &mut ByteCursor<'_>) -> Result<Self> {
        let id = id.into();
        cursor.atomically(|c| {
            let bin_count = c.read_u32()? as usize;
            let event_count = c.read_u64()?;
            ensure_bins_fit(c, bin_count)?;
            let bins = (0..bin_count)
                .map(|_| BinSample::decode(c))
                .collect::<Result<Vec<_>>>()?;
            Ok(HistogramSeries {
                id,
                bins,
                event_count,
                is_interpolated: false,
            })
        })
    }

    /// Advance past a histogram payload without decoding its bins.
    pub fn skip(cursor: &mut ByteCursor<'_>) -> Result<()> {
        cursor.atomically(|c| {
            let bin_count = c.read_u32()? as usize;
            c.skip(8)?;
            ensure_bins_fit(c, bin_count)?;
            c.skip(bin_count * BIN_WIRE_SIZE)
        })
    }

    /// Append the histogram payload (without the id) to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        let bin_count = u32::try_from(self.bins.len())
            .map_err(|_| anyhow::anyhow!("histogram {} has too many bins", self.id))?;
        buf.write_u32::<LittleEndian>(bin_count)?;
        buf.write_u64::<LittleEndian>(self.event_count)?;
        for bin in &self.bins {
            bin.encode(buf)?;
        }
        Ok(())
    }
}

/// Fail before allocating if the declared bins cannot be in the buffer.
fn ensure_bins_fit(cursor: &ByteCursor<'_>, bin_count: usize) -> Result<()> {
    let remaining = cursor.remaining();
    match bin_count.checked_mul(BIN_WIRE_SIZE) {
        Some(needed) if needed <= remaining => Ok(()),
        Some(needed) => Err(ProtocolError::Underrun { needed, remaining }),
        None => Err(ProtocolError::Underrun {
            needed: usize::MAX,
            remaining,
        }),
    }
}

/// Descriptive fields of a reference measurement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub beam: String,
    pub energy: String,
    pub process: String,
    pub params: String,
    pub shortdesc: String,
}

/// Pre-rendered label bitmaps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRefs {
    pub title: Vec<u8>,
    pub xlabel: Vec<u8>,
    pub ylabel: Vec<u8>,
}

/// A reference measurement, immutable for the lifetime of its configuration epoch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: String,
    pub title: String,
    pub short_label: String,
    pub info: ReferenceInfo,
    pub images: ImageRefs,
    pub baseline: HistogramSeries,
}

impl ReferenceRecord {
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        cursor.atomically(|c| {
            let id = c.read_string()?;
            let title = c.read_string()?;
            let short_label = c.read_string()?;
            let info = ReferenceInfo {
                beam: c.read_string()?,
                energy: c.read_string()?,
                process: c.read_string()?,
                params: c.read_string()?,
                shortdesc: c.read_string()?,
            };
            let images = ImageRefs {
                title: c.read_blob()?,
                xlabel: c.read_blob()?,
                ylabel: c.read_blob()?,
            };
            let baseline = HistogramSeries::decode(id.clone(), c)?;
            Ok(ReferenceRecord {
                id,
                title,
                short_label,
                info,
                images,
                baseline,
            })
        })
    }

    pub fn encode(&self, buf: &mut Vec<u8>, prefix: LengthPrefix) -> anyhow::Result<()> {
        for text in [
            &self.id,
            &self.title,
            &self.short_label,
            &self.info.beam,
            &self.info.energy,
            &self.info.process,
            &self.info.params,
            &self.info.shortdesc,
        ] {
            write_string(buf, prefix, text)?;
        }
        for image in [&self.images.title, &self.images.xlabel, &self.images.ylabel] {
            write_blob(buf, image)?;
        }
        self.baseline.encode(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_series(id: &str, k: usize) -> HistogramSeries {
        let bins = (0..k)
            .map(|i| {
                let x = i as f64;
                BinSample {
                    y: 1.0 / (x + 3.0),
                    y_err_plus: 0.1 + x * 1e-3,
                    y_err_minus: 0.2 - x * 1e-4,
                    x: x + 0.5,
                    x_err_plus: 0.5,
                    x_err_minus: 0.5,
                }
            })
            .collect();
        HistogramSeries::new(id, bins, 1_000 * k as u64 + 7)
    }

    #[test]
    fn test_series_encode_decode_bit_identical() {
        for k in [0usize, 1, 100] {
            let series = sample_series("/ALEPH_1996_S3486095/d01-x01-y01", k);
            let mut buf = Vec::new();
            series.encode(&mut buf).unwrap();
            assert_eq!(buf.len(), SERIES_HEADER_SIZE + k * BIN_WIRE_SIZE);

            let mut cursor = ByteCursor::new(&buf);
            let decoded = HistogramSeries::decode(series.id.clone(), &mut cursor).unwrap();
            assert!(cursor.is_at_end());
            assert_eq!(decoded.bin_count(), k);
            assert_eq!(decoded.event_count, series.event_count);
            for (a, b) in decoded.bins.iter().zip(&series.bins) {
                assert_eq!(a.y.to_bits(), b.y.to_bits());
                assert_eq!(a.y_err_plus.to_bits(), b.y_err_plus.to_bits());
                assert_eq!(a.y_err_minus.to_bits(), b.y_err_minus.to_bits());
                assert_eq!(a.x.to_bits(), b.x.to_bits());
                assert_eq!(a.x_err_plus.to_bits(), b.x_err_plus.to_bits());
                assert_eq!(a.x_err_minus.to_bits(), b.x_err_minus.to_bits());
            }
        }
    }

    #[test]
    fn test_skip_matches_decode_width() {
        let series = sample_series("h", 5);
        let mut buf = Vec::new();
        series.encode(&mut buf).unwrap();
        buf.push(0xAB);

        let mut cursor = ByteCursor::new(&buf);
        HistogramSeries::skip(&mut cursor).unwrap();
        assert_eq!(cursor.read_u8().unwrap(), 0xAB);
    }

    #[test]
    fn test_truncated_series_fails_without_consuming() {
        let series = sample_series("h", 3);
        let mut buf = Vec::new();
        series.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);

        let mut cursor = ByteCursor::new(&buf);
        assert!(matches!(
            HistogramSeries::decode("h", &mut cursor),
            Err(ProtocolError::Underrun { .. })
        ));
        assert_eq!(cursor.offset(), 0);
        assert!(HistogramSeries::skip(&mut cursor).is_err());
        assert_eq!(cursor.offset(), 0);
    }

    #[test]
    fn test_huge_bin_count_is_underrun() {
        let mut buf = Vec::new();
        buf.write_u32::<LittleEndian>(u32::MAX).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();

        let mut cursor = ByteCursor::new(&buf);
        assert!(matches!(
            HistogramSeries::decode("h", &mut cursor),
            Err(ProtocolError::Underrun { .. })
        ));
    }

    #[test]
    fn test_reference_record_roundtrip() {
        let record = ReferenceRecord {
            id: "/OPAL_2004/d07-x01-y01".to_string(),
            title: "Thrust".to_string(),
            short_label: "T".to_string(),
            info: ReferenceInfo {
                beam: "ee".to_string(),
                energy: "91.2".to_string(),
                process: "zhad".to_string(),
                params: "".to_string(),
                shortdesc: "Event shapes".to_string(),
            },
            images: ImageRefs {
                title: vec![0x89, b'P', b'N', b'G'],
                xlabel: vec![],
                ylabel: vec![1, 2],
            },
            baseline: sample_series("/OPAL_2004/d07-x01-y01", 4),
        };

        let mut buf = Vec::new();
        record.encode(&mut buf, LengthPrefix::U16).unwrap();
        let mut cursor = ByteCursor::new(&buf);
        let decoded = ReferenceRecord::decode(&mut cursor).unwrap();
        assert!(cursor.is_at_end());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_blank_series() {
        assert!(HistogramSeries::zeroed("h", 4).is_blank());
        assert!(HistogramSeries::zeroed("h", 0).is_blank());
        assert!(!sample_series("h", 2).is_blank());
    }
}
