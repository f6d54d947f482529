//! Meta color store: documents are clustered into contiguous partitions of
//! a permuted doc space; each class becomes a sequence of
//! (partition_id, partial_color_id) entries over per-partition stores of
//! deduplicated partial lists.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::info;
use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};
use crate::hybrid::{HybridColors, HybridColorsBuilder, HybridIter};
use crate::kmeans::{kmeans_divisive, ClusteringParams};
use crate::sketch::{read_doc_sketches, sketch_documents, SketchParams};
use crate::source::ColorSource;

/// Document permutation grouping similar documents into partitions that
/// tile [0, num_docs) contiguously.
#[derive(Debug, Clone)]
pub struct DocPermutation {
    /// Original doc id -> permuted doc id.
    pub permutation: Vec<u32>,
    /// Partition endpoints in the permuted space; len num_partitions + 1.
    pub partition_begin: Vec<u32>,
}

impl DocPermutation {
    /// A fixed permutation with explicit partition bounds (for callers that
    /// already know the partitioning, and for tests).
    pub fn from_parts(permutation: Vec<u32>, partition_begin: Vec<u32>) -> Self {
        assert_eq!(
            *partition_begin.last().expect("at least one partition") as usize,
            permutation.len()
        );
        Self {
            permutation,
            partition_begin,
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.partition_begin.len() - 1
    }

    pub fn partition_endpoints(&self, partition_id: usize) -> (u32, u32) {
        (
            self.partition_begin[partition_id],
            self.partition_begin[partition_id + 1],
        )
    }

    pub fn max_partition_size(&self) -> u32 {
        self.partition_begin
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0)
    }
}

/// Cluster documents by their column sketches (the transpose of the color
/// lists) and derive the partition permutation.
pub fn permute_documents<S: ColorSource + Sync>(
    source: &S,
    sketch: &SketchParams,
    clustering: &ClusteringParams,
    tmp_dir: &Path,
) -> Result<DocPermutation> {
    info!("step 1. building document sketches");
    let spill = tmp_dir.join("sketches.bin");
    sketch_documents(source, sketch, &spill)?;

    info!("step 2. clustering document sketches");
    let points = read_doc_sketches(&spill)?;
    std::fs::remove_file(&spill).map_err(|e| Error::io(&spill, e))?;
    let result = kmeans_divisive(&points.registers, points.num_bytes_per_point, clustering);
    info!("computed {} partitions", result.num_clusters);

    let num_docs = points.num_points;
    let mut partition_begin = vec![0u32; result.num_clusters + 1];
    for &c in &result.clusters {
        partition_begin[c as usize + 1] += 1;
    }
    for i in 0..result.num_clusters {
        partition_begin[i + 1] += partition_begin[i];
    }

    let mut next_slot = partition_begin.clone();
    let mut permutation = vec![0u32; num_docs];
    for (doc, &c) in result.clusters.iter().enumerate() {
        permutation[doc] = next_slot[c as usize];
        next_slot[c as usize] += 1;
    }

    Ok(DocPermutation {
        permutation,
        partition_begin,
    })
}

/// Two-level color store over the permuted doc space.
#[derive(Debug, Clone, Default)]
pub struct MetaColors {
    num_docs: u32,
    partition_begin: Vec<u32>,
    doc_permutation: Vec<u32>,
    /// Per-partition stores of partial lists, in partition-local offsets.
    partials: Vec<HybridColors>,
    /// Prefix counts of partial colors; len num_partitions + 1.
    num_partials_before: Vec<u64>,
    /// Per-class meta lists of globalized partial-color ids, stored with
    /// the same machinery as any other sorted-list store.
    meta: HybridColors,
}

impl MetaColors {
    pub(crate) fn from_parts(
        num_docs: u32,
        partition_begin: Vec<u32>,
        doc_permutation: Vec<u32>,
        partials: Vec<HybridColors>,
        meta: HybridColors,
    ) -> Self {
        let mut num_partials_before = Vec::with_capacity(partials.len() + 1);
        let mut acc = 0u64;
        num_partials_before.push(0);
        for p in &partials {
            acc += p.num_color_classes() as u64;
            num_partials_before.push(acc);
        }
        Self {
            num_docs,
            partition_begin,
            doc_permutation,
            partials,
            num_partials_before,
            meta,
        }
    }

    pub fn num_color_classes(&self) -> usize {
        self.meta.num_color_classes()
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn num_partitions(&self) -> usize {
        self.partials.len()
    }

    pub fn num_partial_colors(&self) -> u64 {
        *self.num_partials_before.last().unwrap_or(&0)
    }

    /// Doc permutation applied at build time; iteration yields permuted ids.
    pub fn doc_permutation(&self) -> &[u32] {
        &self.doc_permutation
    }

    pub fn partition_begin(&self) -> &[u32] {
        &self.partition_begin
    }

    pub fn num_partials_before(&self) -> &[u64] {
        &self.num_partials_before
    }

    pub fn partial_colors(&self, partition_id: usize) -> &HybridColors {
        &self.partials[partition_id]
    }

    /// The class's meta list: globalized partial-color ids, ascending.
    pub fn meta_colors(&self) -> &HybridColors {
        &self.meta
    }

    /// Map a global partial-color id to (partition_id, local id).
    pub fn partition_of(&self, global_id: u32) -> (usize, u32) {
        let partition_id = self
            .num_partials_before
            .partition_point(|&b| b <= global_id as u64)
            - 1;
        (
            partition_id,
            (global_id as u64 - self.num_partials_before[partition_id]) as u32,
        )
    }

    /// Iterate the class list in the permuted doc space, ascending.
    pub fn colors(&self, color_id: usize) -> MetaIter<'_> {
        MetaIter {
            store: self,
            meta_iter: self.meta.colors(color_id),
            current: None,
        }
    }

    /// Number of values `colors(id)` yields.
    pub fn color_list_size(&self, color_id: usize) -> usize {
        self.meta
            .colors(color_id)
            .map(|g| {
                let (p, local) = self.partition_of(g);
                self.partials[p].colors(local as usize).size()
            })
            .sum()
    }

    pub fn num_bits(&self) -> u64 {
        self.meta.num_bits()
            + self.partials.iter().map(|p| p.num_bits()).sum::<u64>()
            + 32 * (self.partition_begin.len() + self.doc_permutation.len()) as u64
    }
}

impl ColorSource for MetaColors {
    type Iter<'a>
        = MetaIter<'a>
    where
        Self: 'a;

    fn num_color_classes(&self) -> usize {
        self.num_color_classes()
    }

    fn num_docs(&self) -> u32 {
        self.num_docs
    }

    fn list_size(&self, id: usize) -> usize {
        self.color_list_size(id)
    }

    fn colors(&self, id: usize) -> MetaIter<'_> {
        self.colors(id)
    }
}

/// Composes the meta list with the per-partition partial stores.
#[derive(Debug, Clone)]
pub struct MetaIter<'a> {
    store: &'a MetaColors,
    meta_iter: HybridIter<'a>,
    current: Option<(HybridIter<'a>, u32)>,
}

impl Iterator for MetaIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if let Some((it, base)) = &mut self.current {
                if let Some(local) = it.next() {
                    return Some(local + *base);
                }
            }
            let global = self.meta_iter.next()?;
            let (partition_id, local_id) = self.store.partition_of(global);
            self.current = Some((
                self.store.partials[partition_id].colors(local_id as usize),
                self.store.partition_begin[partition_id],
            ));
        }
    }
}

fn put_u32(w: &mut impl Write, path: &Path, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes()).map_err(|e| Error::io(path, e))
}

fn get_u32(r: &mut impl Read, path: &Path) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| Error::io(path, e))?;
    Ok(u32::from_le_bytes(buf))
}

fn partial_key(partial: &[u32]) -> u128 {
    let mut bytes = Vec::with_capacity(partial.len() * 4);
    for &v in partial {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    xxh3_128(&bytes)
}

/// Build the meta store for a given document permutation.
///
/// Pass 1 streams every class through the partition walk, deduplicating
/// partial lists per partition and spilling (partition, local id) pairs to
/// the meta-colors scratch file; pass 2 re-reads the pairs and globalizes
/// the ids once all partition counts are known.
pub fn build_meta_from_permutation<S: ColorSource>(
    source: &S,
    doc_perm: &DocPermutation,
    tmp_dir: &Path,
) -> Result<MetaColors> {
    let num_docs = source.num_docs();
    let num_color_classes = source.num_color_classes();
    let num_partitions = doc_perm.num_partitions();
    if doc_perm.permutation.len() != num_docs as usize {
        return Err(Error::Precondition(format!(
            "doc permutation covers {} docs, store has {num_docs}",
            doc_perm.permutation.len()
        )));
    }

    info!("step 3. building partial/meta colors");
    let scratch = tmp_dir.join("metacolors.bin");
    let mut out = BufWriter::new(File::create(&scratch).map_err(|e| Error::io(&scratch, e))?);

    let mut partial_builders: Vec<HybridColorsBuilder> = (0..num_partitions)
        .map(|p| {
            let (begin, end) = doc_perm.partition_endpoints(p);
            HybridColorsBuilder::new(end - begin)
        })
        .collect();
    let mut dedup: Vec<FxHashMap<u128, u32>> = vec![FxHashMap::default(); num_partitions];

    let mut permuted_list = Vec::with_capacity(num_docs as usize);
    let mut partial_color: Vec<u32> = Vec::new();
    let mut pairs: Vec<(u32, u32)> = Vec::new();

    for color_id in 0..num_color_classes {
        permuted_list.clear();
        for doc in source.colors(color_id) {
            permuted_list.push(doc_perm.permutation[doc as usize]);
        }
        permuted_list.sort_unstable();

        pairs.clear();
        let mut partition_id = 0usize;
        let (mut begin, mut end) = doc_perm.partition_endpoints(0);
        partial_color.clear();
        for &doc in &permuted_list {
            while doc >= end {
                if !partial_color.is_empty() {
                    let id = dedup_partial(
                        &mut dedup[partition_id],
                        &mut partial_builders[partition_id],
                        &partial_color,
                    )?;
                    pairs.push((partition_id as u32, id));
                    partial_color.clear();
                }
                partition_id += 1;
                (begin, end) = doc_perm.partition_endpoints(partition_id);
            }
            debug_assert!(doc >= begin);
            partial_color.push(doc - begin);
        }
        if !partial_color.is_empty() {
            let id = dedup_partial(
                &mut dedup[partition_id],
                &mut partial_builders[partition_id],
                &partial_color,
            )?;
            pairs.push((partition_id as u32, id));
            partial_color.clear();
        }

        put_u32(&mut out, &scratch, pairs.len() as u32)?;
        for &(p, id) in &pairs {
            put_u32(&mut out, &scratch, p)?;
            put_u32(&mut out, &scratch, id)?;
        }
    }
    out.flush().map_err(|e| Error::io(&scratch, e))?;
    drop(out);

    let partials: Vec<HybridColors> = partial_builders.into_iter().map(|b| b.build()).collect();
    let mut num_partials_before = vec![0u64; num_partitions + 1];
    for (p, store) in partials.iter().enumerate() {
        num_partials_before[p + 1] = num_partials_before[p] + store.num_color_classes() as u64;
        info!(
            "partition {p}: {} docs, {} partial colors",
            doc_perm.partition_endpoints(p).1 - doc_perm.partition_endpoints(p).0,
            store.num_color_classes()
        );
    }
    let num_partial_colors = num_partials_before[num_partitions];
    info!("total num. partial colors = {num_partial_colors}");

    // Globalization pass over the scratch file.
    let mut meta_builder = HybridColorsBuilder::new(num_partial_colors as u32);
    let mut input = BufReader::new(File::open(&scratch).map_err(|e| Error::io(&scratch, e))?);
    let mut meta_list = Vec::new();
    for _ in 0..num_color_classes {
        let size = get_u32(&mut input, &scratch)?;
        meta_list.clear();
        for _ in 0..size {
            let partition_id = get_u32(&mut input, &scratch)? as usize;
            let local_id = get_u32(&mut input, &scratch)?;
            meta_list.push((num_partials_before[partition_id] + local_id as u64) as u32);
        }
        meta_builder.process_colors(&meta_list)?;
    }
    drop(input);
    std::fs::remove_file(&scratch).map_err(|e| Error::io(&scratch, e))?;

    Ok(MetaColors {
        num_docs,
        partition_begin: doc_perm.partition_begin.clone(),
        doc_permutation: doc_perm.permutation.clone(),
        partials,
        num_partials_before,
        meta: meta_builder.build(),
    })
}

fn dedup_partial(
    dedup: &mut FxHashMap<u128, u32>,
    builder: &mut HybridColorsBuilder,
    partial: &[u32],
) -> Result<u32> {
    let key = partial_key(partial);
    if let Some(&id) = dedup.get(&key) {
        return Ok(id);
    }
    let id = dedup.len() as u32;
    dedup.insert(key, id);
    builder.process_colors(partial)?;
    Ok(id)
}

/// Configuration of the meta build: doc-sketch parameters plus the document
/// clustering parameters (seed 0, as the original pipeline uses).
#[derive(Debug, Clone)]
pub struct MetaBuildConfig {
    pub p: u32,
    pub num_threads: usize,
    pub clustering: ClusteringParams,
}

impl Default for MetaBuildConfig {
    fn default() -> Self {
        Self {
            p: 10,
            num_threads: 1,
            clustering: ClusteringParams {
                seed: 0,
                ..ClusteringParams::default()
            },
        }
    }
}

/// Full meta build: cluster documents, then assemble the two-level store.
pub fn build_meta<S: ColorSource + Sync>(
    source: &S,
    cfg: &MetaBuildConfig,
    tmp_dir: &Path,
) -> Result<MetaColors> {
    let sketch = SketchParams {
        p: cfg.p,
        num_threads: cfg.num_threads,
        left: 0.0,
        right: 1.0,
    };
    let doc_perm = permute_documents(source, &sketch, &cfg.clustering, tmp_dir)?;
    build_meta_from_permutation(source, &doc_perm, tmp_dir)
}
