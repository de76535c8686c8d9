//! Collection routing map
//!
//! Ordered, gap-free set of partition key ranges covering a collection's
//! effective partition key space at one point in time.

use std::collections::{BTreeSet, HashMap};

use crate::error::{ConsistencyResult, StoreError};

use super::types::{PartitionKeyRange, MAXIMUM_EXCLUSIVE_EPK, MINIMUM_INCLUSIVE_EPK};

#[derive(Debug, Clone)]
pub struct CollectionRoutingMap {
    collection_rid: String,
    ranges: Vec<PartitionKeyRange>,
    by_id: HashMap<String, usize>,
    /// Ids of ranges that were split into the current ones
    gone_ranges: BTreeSet<String>,
    change_id: u64,
}

impl CollectionRoutingMap {
    /// Build a map from unordered ranges. Fails unless the ranges tile the
    /// whole key space without gaps or overlaps.
    pub fn new(
        collection_rid: impl Into<String>,
        mut ranges: Vec<PartitionKeyRange>,
        change_id: u64,
    ) -> ConsistencyResult<Self> {
        let collection_rid = collection_rid.into();
        ranges.sort_by(|a, b| a.min_inclusive.cmp(&b.min_inclusive));

        let mut expected_min = MINIMUM_INCLUSIVE_EPK;
        for range in &ranges {
            if range.min_inclusive != expected_min {
                return Err(StoreError::internal(format!(
                    "routing map for {} has a gap or overlap at '{}'",
                    collection_rid, range.min_inclusive
                )));
            }
            expected_min = range.max_exclusive.as_str();
        }
        if ranges.is_empty() || expected_min != MAXIMUM_EXCLUSIVE_EPK {
            return Err(StoreError::internal(format!(
                "routing map for {} does not cover the key space",
                collection_rid
            )));
        }

        let by_id = ranges
            .iter()
            .enumerate()
            .map(|(i, range)| (range.id.clone(), i))
            .collect();
        let gone_ranges = ranges
            .iter()
            .flat_map(|range| range.parents.iter().cloned())
            .collect();

        Ok(Self {
            collection_rid,
            ranges,
            by_id,
            gone_ranges,
            change_id,
        })
    }

    pub fn collection_rid(&self) -> &str {
        &self.collection_rid
    }

    pub fn change_id(&self) -> u64 {
        self.change_id
    }

    pub fn ordered_ranges(&self) -> &[PartitionKeyRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range_by_id(&self, id: &str) -> Option<&PartitionKeyRange> {
        self.by_id.get(id).map(|i| &self.ranges[*i])
    }

    pub fn range_by_effective_partition_key(&self, epk: &str) -> Option<&PartitionKeyRange> {
        self.ranges.iter().find(|range| range.contains(epk))
    }

    /// Whether `id` names a range that has since been split.
    pub fn is_gone(&self, id: &str) -> bool {
        self.gone_ranges.contains(id)
    }
}
