//! Lineage tree and lineage-indexed column.
//!
//! The lineage taxonomy is an immutable forest with child → parent edges,
//! compiled at build time into compact integer ids with precomputed ancestor
//! chains. The per-partition column keeps two bitmap families:
//!
//! - `exact[x]`: rows whose lineage is exactly `x`;
//! - `sublineage[x]`: rows whose lineage is `x` or any descendant of `x`,
//!   maintained by adding each row to its lineage's bitmap and to every
//!   ancestor's bitmap.
//!
//! Query-time descendant checks therefore cost one hash lookup; no tree walk
//! happens on the query path.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::bitmap::{roaring_bytes, roaring_bytes_map};
use crate::error::PreprocessingError;

/// Compact lineage id within a [`LineageTree`].
pub type LineageIdx = u32;

/// Immutable lineage forest with precomputed ancestor chains.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LineageTree {
    names: Vec<String>,
    ids: HashMap<String, LineageIdx>,
    parents: Vec<Option<LineageIdx>>,
    ancestors: Vec<Vec<LineageIdx>>,
}

impl LineageTree {
    /// Build from `(child, parent)` definitions. Parents referenced before
    /// (or without) their own definition are registered as roots. Cycles are
    /// rejected.
    pub fn from_edges<S: AsRef<str>>(
        edges: &[(S, Option<S>)],
    ) -> Result<Self, PreprocessingError> {
        let mut tree = LineageTree::default();
        for (child, parent) in edges {
            let child_idx = tree.register(child.as_ref());
            let parent_idx = parent.as_ref().map(|name| tree.register(name.as_ref()));
            tree.parents[child_idx as usize] = parent_idx;
        }
        tree.compute_ancestors()?;
        Ok(tree)
    }

    fn register(&mut self, name: &str) -> LineageIdx {
        if let Some(idx) = self.ids.get(name) {
            return *idx;
        }
        let idx = self.names.len() as LineageIdx;
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), idx);
        self.parents.push(None);
        idx
    }

    fn compute_ancestors(&mut self) -> Result<(), PreprocessingError> {
        let node_count = self.names.len();
        let mut ancestors = Vec::with_capacity(node_count);
        for idx in 0..node_count {
            let mut chain = Vec::new();
            let mut current = self.parents[idx];
            while let Some(parent) = current {
                if chain.len() >= node_count {
                    return Err(PreprocessingError::LineageCycle(self.names[idx].clone()));
                }
                chain.push(parent);
                current = self.parents[parent as usize];
            }
            ancestors.push(chain);
        }
        self.ancestors = ancestors;
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<LineageIdx> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, idx: LineageIdx) -> &str {
        &self.names[idx as usize]
    }

    pub fn parent(&self, idx: LineageIdx) -> Option<LineageIdx> {
        self.parents[idx as usize]
    }

    /// Ancestors from the immediate parent up to the root, excluding `idx`
    /// itself.
    pub fn ancestors(&self, idx: LineageIdx) -> &[LineageIdx] {
        &self.ancestors[idx as usize]
    }

    /// Whether `ancestor` is `idx` or one of its ancestors.
    pub fn is_self_or_ancestor(&self, ancestor: LineageIdx, idx: LineageIdx) -> bool {
        ancestor == idx || self.ancestors(idx).contains(&ancestor)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-partition lineage column with exact and sublineage bitmap indices.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LineageColumnPartition {
    /// Per row: lineage idx + 1, with 0 = null.
    values: Vec<u32>,
    #[serde(with = "roaring_bytes_map")]
    exact: HashMap<LineageIdx, RoaringBitmap>,
    #[serde(with = "roaring_bytes_map")]
    sublineage: HashMap<LineageIdx, RoaringBitmap>,
    #[serde(with = "roaring_bytes")]
    null_bitmap: RoaringBitmap,
}

impl LineageColumnPartition {
    pub fn new() -> Self {
        LineageColumnPartition::default()
    }

    pub fn reserve(&mut self, row_count: usize) {
        self.values.reserve(row_count);
    }

    /// Insert a row with lineage `idx`, updating the exact bitmap of `idx`
    /// and the sublineage bitmaps of `idx` and all its ancestors.
    pub fn insert(&mut self, idx: LineageIdx, tree: &LineageTree) {
        let row = self.values.len() as u32;
        self.values.push(idx + 1);
        self.exact.entry(idx).or_default().insert(row);
        self.sublineage.entry(idx).or_default().insert(row);
        for &ancestor in tree.ancestors(idx) {
            self.sublineage.entry(ancestor).or_default().insert(row);
        }
    }

    pub fn insert_null(&mut self) {
        let row = self.values.len() as u32;
        self.values.push(0);
        self.null_bitmap.insert(row);
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn lineage_idx(&self, row: u32) -> Option<LineageIdx> {
        match self.values[row as usize] {
            0 => None,
            value => Some(value - 1),
        }
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.values[row as usize] == 0
    }

    /// Rows whose lineage is exactly `idx`.
    pub fn filter_exactly(&self, idx: LineageIdx) -> Option<&RoaringBitmap> {
        self.exact.get(&idx)
    }

    /// Rows whose lineage is `idx` or a descendant of `idx`; `None` when no
    /// row falls in that subtree.
    pub fn filter_including_sublineages(&self, idx: LineageIdx) -> Option<&RoaringBitmap> {
        self.sublineage.get(&idx)
    }

    pub fn null_bitmap(&self) -> &RoaringBitmap {
        &self.null_bitmap
    }
}
