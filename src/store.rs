//! Owner of the current configuration epoch and the live histograms.
//!
//! Readers only ever get clones of the live series.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::frame::{ConfigurationEpoch, DataFrameUpdate};
use crate::histogram::{HistogramSeries, ReferenceRecord};
use crate::merge::{self, MergePolicy};
use crate::notify::{FrameMetadata, Notification, ReadyInfo};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
}

#[derive(Debug, Default)]
pub struct HistogramStore {
    epoch: Option<ConfigurationEpoch>,
    live: BTreeMap<String, HistogramSeries>,
    real_counts: BTreeMap<String, u64>,
    nevts: u64,
    is_interpolated: bool,
    merge_policy: MergePolicy,
    ready: bool,
}

impl HistogramStore {
    pub fn new(merge_policy: MergePolicy) -> Self {
        Self {
            merge_policy,
            ..Default::default()
        }
    }

    pub fn state(&self) -> SessionState {
        if self.ready {
            SessionState::Ready
        } else {
            SessionState::Uninitialized
        }
    }

    pub fn epoch(&self) -> Option<&ConfigurationEpoch> {
        self.epoch.as_ref()
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn contains(&self, id: &str) -> bool {
        self.live.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.live.keys().map(String::as_str)
    }

    /// Largest event count among the series updated by the most recent data
    /// frame that changed anything.
    pub fn nevts(&self) -> u64 {
        self.nevts
    }

    /// Whether the most recent data frame that changed anything was interpolated.
    pub fn is_interpolated(&self) -> bool {
        self.is_interpolated
    }

    /// A copy of the live series for `id`.
    pub fn snapshot(&self, id: &str) -> Option<HistogramSeries> {
        self.live.get(id).cloned()
    }

    pub fn reference(&self, id: &str) -> Option<Arc<ReferenceRecord>> {
        self.epoch.as_ref()?.references.get(id).cloned()
    }

    /// Fraction of the target event count reached so far.
    pub fn progress(&self) -> Option<f64> {
        let target = self.epoch.as_ref()?.target_event_count;
        if target == 0 {
            return None;
        }
        Some(self.nevts as f64 / target as f64)
    }

    /// Replace the current epoch wholesale.
    ///
    /// Every previously known histogram is reported removed before any new
    /// one is reported added. `Ready` is emitted only for the first epoch.
    pub fn apply_configuration(&mut self, epoch: ConfigurationEpoch) -> Vec<Notification> {
        let mut events = Vec::new();

        if let Some(old) = self.epoch.take() {
            let mut old_live = std::mem::take(&mut self.live);
            for (id, reference) in old.references {
                let series = old_live
                    .remove(&id)
                    .unwrap_or_else(|| HistogramSeries::zeroed(id.as_str(), reference.baseline.bin_count()));
                events.push(Notification::HistogramRemoved {
                    id,
                    series,
                    reference,
                });
            }
        }

        self.live = epoch
            .references
            .iter()
            .map(|(id, reference)| {
                (
                    id.clone(),
                    HistogramSeries::zeroed(id.as_str(), reference.baseline.bin_count()),
                )
            })
            .collect();
        self.real_counts.clear();
        self.nevts = 0;
        self.is_interpolated = false;

        for (id, reference) in &epoch.references {
            if let Some(series) = self.live.get(id) {
                events.push(Notification::HistogramAdded {
                    id: id.clone(),
                    series: series.clone(),
                    reference: reference.clone(),
                });
            }
        }

        info!(
            "configuration epoch applied: {} histograms, target {} events",
            epoch.references.len(),
            epoch.target_event_count
        );

        if !self.ready {
            self.ready = true;
            events.push(Notification::Ready(ReadyInfo {
                protocol_version: epoch.protocol_version,
                flags: epoch.flags,
                target_event_count: epoch.target_event_count,
            }));
        }

        self.epoch = Some(epoch);
        events
    }

    /// Apply a decoded data frame to the live map.
    ///
    /// The frame metadata is taken from the entries the merge policy accepted.
    /// A frame where nothing was applied leaves it as it was.
    pub fn apply_data(&mut self, update: DataFrameUpdate) -> Vec<Notification> {
        let mut events = Vec::with_capacity(update.updates.len() + 2);
        let mut applied = 0usize;
        let mut applied_nevts = 0u64;

        for incoming in update.updates {
            let id = incoming.id.clone();
            let Some(reference) = self
                .epoch
                .as_ref()
                .and_then(|e| e.references.get(&id))
                .cloned()
            else {
                debug!("histogram {} vanished before apply", id);
                continue;
            };
            let Some(current) = self.live.get_mut(&id) else {
                debug!("histogram {} vanished before apply", id);
                continue;
            };

            let real_count = self.real_counts.entry(id.clone()).or_default();

            if merge::apply(self.merge_policy, current, real_count, incoming) {
                applied += 1;
                applied_nevts = applied_nevts.max(current.event_count);
                events.push(Notification::HistogramUpdated {
                    id,
                    series: current.clone(),
                    reference,
                });
            } else {
                debug!("merge policy kept existing data for {}", id);
            }
        }

        if applied > 0 {
            if applied_nevts > 0 {
                self.nevts = applied_nevts;
            }
            self.is_interpolated = update.is_interpolated;
        }

        events.push(Notification::MetadataUpdated(FrameMetadata {
            nevts: self.nevts,
            is_interpolated: self.is_interpolated,
        }));
        events.push(Notification::DataArrived {
            is_interpolated: update.is_interpolated,
        });
        events
    }
}
