//! Differential color store: every class is a δ-coded symmetric difference
//! against its cluster's reference list.
//!
//! Physical layout: all references first, then all edit lists in
//! cluster-grouped order, in one bit vector. A boundary bit vector marks the
//! last member of each cluster so `rank1(slot)` recovers the cluster index;
//! a per-class position array maps original class ids to grouped slots.

use std::path::Path;

use log::info;

use crate::bits::{
    read_delta, write_gap_list, BitCursor, BitVector, BitVectorBuilder, GapListCursor,
    RankedBitVector,
};
use crate::error::{Error, Result};
use crate::kmeans::{kmeans_divisive, ClusteringParams};
use crate::permute::{symmetric_difference, synthesize_references, ClusterPermutation, MajorityRule};
use crate::sketch::{read_color_sketches, sketch_color_lists, SketchParams};
use crate::source::ColorSource;

#[derive(Debug, Clone, Default)]
pub struct DifferentialColors {
    num_docs: u32,
    reference_offsets: Vec<u64>,
    list_offsets: Vec<u64>,
    /// Original class id -> slot in the cluster-grouped order.
    positions: Vec<u32>,
    colors: BitVector,
    clusters: RankedBitVector,
}

impl DifferentialColors {
    pub(crate) fn from_parts(
        num_docs: u32,
        reference_offsets: Vec<u64>,
        list_offsets: Vec<u64>,
        positions: Vec<u32>,
        colors: BitVector,
        clusters: RankedBitVector,
    ) -> Self {
        Self {
            num_docs,
            reference_offsets,
            list_offsets,
            positions,
            colors,
            clusters,
        }
    }

    pub fn num_color_classes(&self) -> usize {
        self.list_offsets.len() - 1
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn num_clusters(&self) -> usize {
        self.reference_offsets.len() - 1
    }

    /// Iterator over the full class list, in ascending order, reconstructed
    /// by merging the reference and edit streams with cancellation.
    pub fn colors(&self, color_id: usize) -> DifferentialIter<'_> {
        assert!(
            color_id < self.num_color_classes(),
            "color id {color_id} out of range"
        );
        let slot = self.positions[color_id] as u64;
        let list_begin = self.list_offsets[slot as usize];
        let reference_begin = self.reference_offsets[self.clusters.rank1(slot) as usize];
        let mut it = DifferentialIter {
            words: self.colors.words(),
            num_docs: self.num_docs,
            list_begin,
            reference_begin,
            edit_size: 0,
            reference_size: 0,
            edit_pos: 0,
            reference_pos: 0,
            curr_edit: 0,
            curr_reference: 0,
            curr: 0,
            edit_cursor: self.colors.cursor(list_begin),
            reference_cursor: self.colors.cursor(reference_begin),
        };
        it.rewind();
        it
    }

    /// Cluster index serving a class.
    pub fn cluster_of(&self, color_id: usize) -> usize {
        assert!(color_id < self.num_color_classes());
        self.clusters.rank1(self.positions[color_id] as u64) as usize
    }

    /// Decode a cluster's reference list.
    pub fn reference(&self, cluster_id: usize) -> Vec<u32> {
        assert!(cluster_id < self.num_clusters());
        GapListCursor::new(self.colors.cursor(self.reference_offsets[cluster_id])).collect()
    }

    /// Decode a class's edit list (the symmetric difference against its
    /// cluster's reference).
    pub fn edit_list(&self, color_id: usize) -> Vec<u32> {
        assert!(color_id < self.num_color_classes());
        let slot = self.positions[color_id] as usize;
        GapListCursor::new(self.colors.cursor(self.list_offsets[slot])).collect()
    }

    pub(crate) fn reference_offsets(&self) -> &[u64] {
        &self.reference_offsets
    }

    pub(crate) fn list_offsets(&self) -> &[u64] {
        &self.list_offsets
    }

    pub(crate) fn positions(&self) -> &[u32] {
        &self.positions
    }

    pub(crate) fn bit_vector(&self) -> &BitVector {
        &self.colors
    }

    pub(crate) fn cluster_bits(&self) -> &RankedBitVector {
        &self.clusters
    }

    pub fn num_bits(&self) -> u64 {
        self.colors.len()
            + self.clusters.len()
            + 64 * (self.reference_offsets.len() + self.list_offsets.len()) as u64
            + 32 * self.positions.len() as u64
    }
}

impl ColorSource for DifferentialColors {
    type Iter<'a>
        = DifferentialIter<'a>
    where
        Self: 'a;

    fn num_color_classes(&self) -> usize {
        self.num_color_classes()
    }

    fn num_docs(&self) -> u32 {
        self.num_docs
    }

    fn list_size(&self, id: usize) -> usize {
        self.colors(id).count()
    }

    fn colors(&self, id: usize) -> DifferentialIter<'_> {
        self.colors(id)
    }
}

/// Merge iterator over one class: reference XOR edits, ascending.
///
/// Holds two re-entrant cursors into the shared bit buffer; `num_docs()` is
/// the exhaustion sentinel, as in the collaborating stores.
#[derive(Debug, Clone)]
pub struct DifferentialIter<'a> {
    words: &'a [u64],
    num_docs: u32,
    list_begin: u64,
    reference_begin: u64,
    edit_cursor: BitCursor<'a>,
    reference_cursor: BitCursor<'a>,
    edit_size: u64,
    reference_size: u64,
    edit_pos: u64,
    reference_pos: u64,
    curr_edit: u32,
    curr_reference: u32,
    curr: u32,
}

impl DifferentialIter<'_> {
    /// Restart from the captured reference and edit-list heads.
    pub fn rewind(&mut self) {
        self.edit_cursor = BitCursor::new(self.words, self.list_begin);
        self.reference_cursor = BitCursor::new(self.words, self.reference_begin);
        self.edit_size = read_delta(&mut self.edit_cursor);
        self.reference_size = read_delta(&mut self.reference_cursor);
        self.curr_edit = if self.edit_size == 0 {
            self.num_docs
        } else {
            read_delta(&mut self.edit_cursor) as u32
        };
        self.curr_reference = if self.reference_size == 0 {
            self.num_docs
        } else {
            read_delta(&mut self.reference_cursor) as u32
        };
        self.edit_pos = 0;
        self.reference_pos = 0;
        self.update_curr();
    }

    /// Current value; `num_docs()` once exhausted.
    pub fn value(&self) -> u32 {
        self.curr
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    fn next_edit_val(&mut self) {
        self.edit_pos += 1;
        if self.edit_pos < self.edit_size {
            self.curr_edit += read_delta(&mut self.edit_cursor) as u32 + 1;
        } else {
            self.curr_edit = self.num_docs;
        }
    }

    fn next_reference_val(&mut self) {
        self.reference_pos += 1;
        if self.reference_pos < self.reference_size {
            self.curr_reference += read_delta(&mut self.reference_cursor) as u32 + 1;
        } else {
            self.curr_reference = self.num_docs;
        }
    }

    /// Cancel equal heads (they appear in both streams), then surface the
    /// smaller one.
    fn update_curr(&mut self) {
        while self.curr_reference == self.curr_edit
            && self.reference_pos <= self.reference_size
            && self.edit_pos <= self.edit_size
        {
            self.next_edit_val();
            self.next_reference_val();
        }
        self.curr = self.curr_edit.min(self.curr_reference);
    }

    fn advance(&mut self) {
        if self.reference_pos >= self.reference_size && self.edit_pos >= self.edit_size {
            self.curr = self.num_docs;
            return;
        }
        if self.reference_pos >= self.reference_size || self.curr_edit < self.curr_reference {
            self.next_edit_val();
        } else if self.edit_pos >= self.edit_size || self.curr_reference < self.curr_edit {
            self.next_reference_val();
        }
        self.update_curr();
    }
}

impl Iterator for DifferentialIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.curr == self.num_docs {
            return None;
        }
        let v = self.curr;
        self.advance();
        Some(v)
    }
}

/// Builder. Call order matters: every reference first (one per cluster, in
/// cluster order), then every list in cluster-grouped order with
/// non-decreasing cluster ids.
#[derive(Debug)]
pub struct DifferentialColorsBuilder {
    num_docs: u32,
    bvb: BitVectorBuilder,
    cluster_bits: BitVectorBuilder,
    reference_offsets: Vec<u64>,
    list_offsets: Vec<u64>,
    prev_cluster_id: u32,
}

impl DifferentialColorsBuilder {
    pub fn new(num_docs: u32) -> Self {
        Self {
            num_docs,
            bvb: BitVectorBuilder::new(),
            cluster_bits: BitVectorBuilder::new(),
            reference_offsets: vec![0],
            list_offsets: vec![0],
            prev_cluster_id: 0,
        }
    }

    pub fn encode_reference(&mut self, reference: &[u32]) {
        write_gap_list(&mut self.bvb, reference);
        self.reference_offsets.push(self.bvb.len());
        self.list_offsets[0] = self.bvb.len();
    }

    /// Diff `list` against its cluster's reference and append the edits.
    pub fn encode_list(
        &mut self,
        cluster_id: u32,
        reference: &[u32],
        list: impl Iterator<Item = u32>,
    ) {
        if cluster_id != self.prev_cluster_id {
            debug_assert_eq!(cluster_id, self.prev_cluster_id + 1);
            self.prev_cluster_id = cluster_id;
            let last = self.cluster_bits.len() - 1;
            self.cluster_bits.set(last, true);
        }
        self.cluster_bits.push(false);

        let list: Vec<u32> = list.collect();
        let edits = symmetric_difference(&list, reference);
        write_gap_list(&mut self.bvb, &edits);
        self.list_offsets.push(self.bvb.len());
    }

    pub fn build(self, positions: Vec<u32>) -> Result<DifferentialColors> {
        let num_lists = self.list_offsets.len() - 1;
        if positions.len() != num_lists {
            return Err(Error::Precondition(format!(
                "position map covers {} classes but {} lists were encoded",
                positions.len(),
                num_lists
            )));
        }
        Ok(DifferentialColors {
            num_docs: self.num_docs,
            reference_offsets: self.reference_offsets,
            list_offsets: self.list_offsets,
            positions,
            colors: self.bvb.build(),
            clusters: RankedBitVector::new(self.cluster_bits.build()),
        })
    }
}

/// Configuration of one sketch -> cluster -> synthesize -> encode pass.
#[derive(Debug, Clone)]
pub struct DiffPipelineConfig {
    pub p: u32,
    pub num_threads: usize,
    pub rule: MajorityRule,
    pub clustering: ClusteringParams,
}

impl Default for DiffPipelineConfig {
    fn default() -> Self {
        Self {
            p: 10,
            num_threads: 1,
            rule: MajorityRule::Strict,
            clustering: ClusteringParams::default(),
        }
    }
}

/// Run the full differential pipeline over `source`, spilling sketches into
/// `tmp_dir`. Every class must survive the full density band (0, 1], i.e.
/// lists must be non-empty.
pub fn build_differential<S: ColorSource + Sync>(
    source: &S,
    cfg: &DiffPipelineConfig,
    tmp_dir: &Path,
) -> Result<DifferentialColors> {
    let num_color_classes = source.num_color_classes();
    if num_color_classes == 0 {
        return Err(Error::Precondition("source has no color classes".into()));
    }

    info!("step 1. building sketches");
    let spill = tmp_dir.join("sketches.bin");
    let sketch_params = SketchParams {
        p: cfg.p,
        num_threads: cfg.num_threads,
        left: 0.0,
        right: 1.0,
    };
    sketch_color_lists(source, &sketch_params, &spill)?;

    info!("step 2. clustering sketches");
    let points = read_color_sketches(&spill)?;
    std::fs::remove_file(&spill).map_err(|e| Error::io(&spill, e))?;
    if points.num_points != num_color_classes {
        return Err(Error::Precondition(format!(
            "only {} of {} classes are sketchable; empty color lists cannot be encoded",
            points.num_points, num_color_classes
        )));
    }
    let ids = points.ids.expect("color spill carries ids");
    let clustering = kmeans_divisive(&points.registers, points.num_bytes_per_point, &cfg.clustering);
    info!("computed {} clusters", clustering.num_clusters);

    info!("step 3. synthesizing references");
    let perm = ClusterPermutation::new(&clustering);
    let references =
        synthesize_references(source, &perm, |point| ids[point as usize] as usize, cfg.rule);

    info!("step 4. encoding edit lists");
    let mut builder = DifferentialColorsBuilder::new(source.num_docs());
    for reference in &references {
        builder.encode_reference(reference);
    }
    let mut cluster_id = 0u32;
    for slot in 0..num_color_classes as u32 {
        while slot >= perm.cluster_begin[cluster_id as usize + 1] {
            cluster_id += 1;
        }
        let class_id = ids[perm.order[slot as usize] as usize] as usize;
        builder.encode_list(
            cluster_id,
            &references[cluster_id as usize],
            source.colors(class_id),
        );
    }

    let mut positions = vec![0u32; num_color_classes];
    for (point, &class_id) in ids.iter().enumerate() {
        positions[class_id as usize] = perm.positions[point];
    }
    builder.build(positions)
}
