//! Group assignments.
//!
//! A [`Labeling`] holds one group id per record. Ids are contiguous from 0;
//! the density backend may additionally use [`NOISE`] for records that belong
//! to no dense neighbourhood.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Reserved id for records not assigned to any group.
pub const NOISE: usize = usize::MAX;

/// One group id per record, in record order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labeling {
    labels: Vec<usize>,
}

impl Labeling {
    /// Wrap raw ids, renumbering non-noise ids to `0..n_groups` in order of
    /// first appearance.
    pub fn compact(raw: Vec<usize>) -> Self {
        let (labels, _) = Self::compact_with_mapping(raw);
        labels
    }

    /// Like [`Labeling::compact`], also returning the old ids in their new
    /// order (`mapping[new] = old`).
    pub(crate) fn compact_with_mapping(mut raw: Vec<usize>) -> (Self, Vec<usize>) {
        let mut mapping: Vec<usize> = Vec::new();
        let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
        for label in raw.iter_mut() {
            if *label == NOISE {
                continue;
            }
            let next = seen.len();
            let new = *seen.entry(*label).or_insert_with(|| {
                mapping.push(*label);
                next
            });
            *label = new;
        }
        (Self { labels: raw }, mapping)
    }

    /// Wrap ids produced against an already-fitted group space. No
    /// renumbering: a batch may legitimately miss some fitted groups.
    pub(crate) fn from_raw(labels: Vec<usize>) -> Self {
        Self { labels }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when there are no records.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Raw ids.
    pub fn as_slice(&self) -> &[usize] {
        &self.labels
    }

    /// Consume into raw ids.
    pub fn into_vec(self) -> Vec<usize> {
        self.labels
    }

    /// Id of record `i`.
    pub fn get(&self, i: usize) -> Option<usize> {
        self.labels.get(i).copied()
    }

    /// Number of non-noise groups.
    pub fn n_groups(&self) -> usize {
        self.labels
            .iter()
            .filter(|&&l| l != NOISE)
            .max()
            .map_or(0, |&m| m + 1)
    }

    /// Number of records labelled [`NOISE`].
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE).count()
    }

    /// Size of each non-noise group, indexed by id.
    pub fn group_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_groups()];
        for &label in &self.labels {
            if label != NOISE {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// The same partition with ids `0..k` for the `k` groups present.
    ///
    /// Batches predicted against a fitted model can skip fitted ids; geometric
    /// metrics index per-group state by id and need them gap-free.
    pub(crate) fn dense(&self) -> Cow<'_, Labeling> {
        if self.group_sizes().contains(&0) {
            Cow::Owned(Self::compact(self.labels.clone()))
        } else {
            Cow::Borrowed(self)
        }
    }

    /// Distinct ids present, ascending, with [`NOISE`] last if present.
    pub fn distinct(&self) -> Vec<usize> {
        let ids: BTreeSet<usize> = self.labels.iter().copied().collect();
        ids.into_iter().collect()
    }
}

impl AsRef<[usize]> for Labeling {
    fn as_ref(&self) -> &[usize] {
        &self.labels
    }
}
