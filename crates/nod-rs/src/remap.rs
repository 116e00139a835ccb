//! Category id translation between label spaces.
//!
//! Every detection inside the pipeline carries a *shared* id: the contiguous,
//! 0-based index of the category in the evaluation taxonomy (sorted dataset
//! category ids). Ids from other spaces are translated on the way in, and
//! translated back when results are written.

use std::collections::HashMap;
use std::fmt;

use crate::error::{NodError, Result};
use crate::types::Category;

/// A label space that can be mapped to and from the shared index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelSpace {
    /// Class indices of the closed-set detector.
    ClosedSet,
    /// Category ids as they appear in the evaluation dataset files.
    Dataset,
}

impl fmt::Display for LabelSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelSpace::ClosedSet => f.write_str("closed-set"),
            LabelSpace::Dataset => f.write_str("dataset"),
        }
    }
}

/// Bijection between one label space and the shared index space.
#[derive(Debug, Clone)]
pub enum CategoryMapping {
    /// Explicit lookup table, e.g. dataset id -> contiguous id.
    Table {
        forward: HashMap<u64, u32>,
        reverse: HashMap<u32, u64>,
    },
    /// Source ids are the shared ids shifted by `shift` (1-indexed datasets use 1).
    IndexShift { shift: u64, num_categories: u32 },
}

impl CategoryMapping {
    /// Build a table mapping from `(source_id, shared_id)` pairs.
    ///
    /// Fails if either side repeats, since the mapping must round-trip.
    pub fn table<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, u32)>,
    {
        let mut forward = HashMap::new();
        let mut reverse = HashMap::new();
        for (src, shared) in pairs {
            if forward.insert(src, shared).is_some() {
                return Err(NodError::InvalidMapping(format!(
                    "source id {} appears twice",
                    src
                )));
            }
            if reverse.insert(shared, src).is_some() {
                return Err(NodError::InvalidMapping(format!(
                    "shared id {} is the target of two source ids",
                    shared
                )));
            }
        }
        Ok(CategoryMapping::Table { forward, reverse })
    }

    /// Dataset ids `1..=n` <-> shared ids `0..n`.
    pub fn index_shift(num_categories: u32) -> Self {
        CategoryMapping::IndexShift {
            shift: 1,
            num_categories,
        }
    }

    /// Sorted dataset category ids -> their position in that order.
    ///
    /// This is the contiguous index space of the accumulated precision table.
    pub fn from_categories(categories: &[Category]) -> Result<Self> {
        let mut ids: Vec<u64> = categories.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        Self::table(ids.into_iter().enumerate().map(|(i, id)| (id, i as u32)))
    }

    pub fn len(&self) -> usize {
        match self {
            CategoryMapping::Table { forward, .. } => forward.len(),
            CategoryMapping::IndexShift { num_categories, .. } => *num_categories as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forward(&self, id: u64) -> Option<u32> {
        match self {
            CategoryMapping::Table { forward, .. } => forward.get(&id).copied(),
            CategoryMapping::IndexShift {
                shift,
                num_categories,
            } => id
                .checked_sub(*shift)
                .filter(|&i| i < u64::from(*num_categories))
                .map(|i| i as u32),
        }
    }

    fn reverse(&self, shared: u32) -> Option<u64> {
        match self {
            CategoryMapping::Table { reverse, .. } => reverse.get(&shared).copied(),
            CategoryMapping::IndexShift {
                shift,
                num_categories,
            } => (shared < *num_categories).then(|| u64::from(shared) + shift),
        }
    }
}

/// Per-label-space mappings into the shared index space, built once at setup.
#[derive(Debug, Clone, Default)]
pub struct LabelRemapper {
    mappings: HashMap<LabelSpace, CategoryMapping>,
}

impl LabelRemapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mut self, space: LabelSpace, mapping: CategoryMapping) -> Self {
        self.mappings.insert(space, mapping);
        self
    }

    pub fn mapping(&self, space: LabelSpace) -> Option<&CategoryMapping> {
        self.mappings.get(&space)
    }

    /// Translate `id` from `space` into the shared index space.
    pub fn to_shared(&self, id: u64, space: LabelSpace) -> Result<u32> {
        self.mappings
            .get(&space)
            .and_then(|m| m.forward(id))
            .ok_or(NodError::UnknownCategory { id, space })
    }

    /// Translate a shared index back into `space`.
    pub fn from_shared(&self, shared: u32, space: LabelSpace) -> Result<u64> {
        self.mappings
            .get(&space)
            .and_then(|m| m.reverse(shared))
            .ok_or(NodError::UnknownCategory {
                id: u64::from(shared),
                space,
            })
    }
}
