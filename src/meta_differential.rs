//! Meta-differential store: the sketch/cluster/reference/encode machinery
//! applied twice - once per partition over its partial lists, once over the
//! meta lists themselves.

use std::path::Path;

use log::info;

use crate::differential::{build_differential, DiffPipelineConfig, DifferentialColors, DifferentialIter};
use crate::error::Result;
use crate::kmeans::ClusteringParams;
use crate::meta::MetaColors;
use crate::permute::MajorityRule;
use crate::source::ColorSource;

#[derive(Debug, Clone, Default)]
pub struct MetaDifferentialColors {
    num_docs: u32,
    partition_begin: Vec<u32>,
    num_partials_before: Vec<u64>,
    doc_permutation: Vec<u32>,
    /// Inner stores: one differential store of partial lists per partition.
    partitions: Vec<DifferentialColors>,
    /// Outer store: the per-class meta lists, diffed against meta references
    /// in the global partial-color-id domain.
    meta: DifferentialColors,
}

impl MetaDifferentialColors {
    pub(crate) fn from_parts(
        num_docs: u32,
        partition_begin: Vec<u32>,
        num_partials_before: Vec<u64>,
        doc_permutation: Vec<u32>,
        partitions: Vec<DifferentialColors>,
        meta: DifferentialColors,
    ) -> Self {
        Self {
            num_docs,
            partition_begin,
            num_partials_before,
            doc_permutation,
            partitions,
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
        self.partitions.len()
    }

    pub fn doc_permutation(&self) -> &[u32] {
        &self.doc_permutation
    }

    pub fn partition_begin(&self) -> &[u32] {
        &self.partition_begin
    }

    pub fn num_partials_before(&self) -> &[u64] {
        &self.num_partials_before
    }

    pub fn partition_store(&self, partition_id: usize) -> &DifferentialColors {
        &self.partitions[partition_id]
    }

    pub fn meta_store(&self) -> &DifferentialColors {
        &self.meta
    }

    /// The class's meta list (global partial-color ids), ascending.
    pub fn meta_list(&self, color_id: usize) -> DifferentialIter<'_> {
        self.meta.colors(color_id)
    }

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
    pub fn colors(&self, color_id: usize) -> MetaDiffIter<'_> {
        MetaDiffIter {
            store: self,
            meta_iter: self.meta.colors(color_id),
            current: None,
        }
    }

    pub fn color_list_size(&self, color_id: usize) -> usize {
        self.meta
            .colors(color_id)
            .map(|g| {
                let (p, local) = self.partition_of(g);
                self.partitions[p].colors(local as usize).count()
            })
            .sum()
    }

    pub fn num_bits(&self) -> u64 {
        self.meta.num_bits()
            + self.partitions.iter().map(|p| p.num_bits()).sum::<u64>()
            + 32 * (self.partition_begin.len() + self.doc_permutation.len()) as u64
            + 64 * self.num_partials_before.len() as u64
    }
}

impl ColorSource for MetaDifferentialColors {
    type Iter<'a>
        = MetaDiffIter<'a>
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

    fn colors(&self, id: usize) -> MetaDiffIter<'_> {
        self.colors(id)
    }
}

/// Composes the outer differential meta list with the inner stores.
#[derive(Debug, Clone)]
pub struct MetaDiffIter<'a> {
    store: &'a MetaDifferentialColors,
    meta_iter: DifferentialIter<'a>,
    current: Option<(DifferentialIter<'a>, u32)>,
}

impl Iterator for MetaDiffIter<'_> {
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
                self.store.partitions[partition_id].colors(local_id as usize),
                self.store.partition_begin[partition_id],
            ));
        }
    }
}

/// Configuration of both recursive differential passes.
#[derive(Debug, Clone)]
pub struct MetaDiffConfig {
    pub p: u32,
    pub num_threads: usize,
    pub rule: MajorityRule,
    pub clustering: ClusteringParams,
}

impl Default for MetaDiffConfig {
    fn default() -> Self {
        Self {
            p: 10,
            num_threads: 1,
            rule: MajorityRule::Inclusive,
            clustering: ClusteringParams::default(),
        }
    }
}

/// Differentially re-encode an already-built meta store.
///
/// Small partitions are handled by clamping the thread count and the
/// minimum cluster size to the partition's list count; a partition whose
/// lists never split simply keeps a single reference.
pub fn build_meta_differential(
    meta: &MetaColors,
    cfg: &MetaDiffConfig,
    tmp_dir: &Path,
) -> Result<MetaDifferentialColors> {
    let mut partitions = Vec::with_capacity(meta.num_partitions());
    for partition_id in 0..meta.num_partitions() {
        info!("differential pass over partition {partition_id}");
        let store = meta.partial_colors(partition_id);
        let num_lists = store.num_color_classes();
        let inner_cfg = DiffPipelineConfig {
            p: cfg.p,
            num_threads: cfg.num_threads.min(num_lists).max(1),
            rule: cfg.rule,
            clustering: ClusteringParams {
                min_cluster_size: cfg.clustering.min_cluster_size.min(num_lists),
                ..cfg.clustering.clone()
            },
        };
        partitions.push(build_differential(store, &inner_cfg, tmp_dir)?);
    }

    info!("differential pass over meta color lists");
    let num_meta_lists = meta.num_color_classes();
    let outer_cfg = DiffPipelineConfig {
        p: cfg.p,
        num_threads: cfg.num_threads.min(num_meta_lists).max(1),
        rule: cfg.rule,
        clustering: cfg.clustering.clone(),
    };
    let outer = build_differential(meta.meta_colors(), &outer_cfg, tmp_dir)?;

    Ok(MetaDifferentialColors {
        num_docs: meta.num_docs(),
        partition_begin: meta.partition_begin().to_vec(),
        num_partials_before: meta.num_partials_before().to_vec(),
        doc_permutation: meta.doc_permutation().to_vec(),
        partitions,
        meta: outer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{build_meta_from_permutation, DocPermutation};
    use crate::source::VecListSource;
    use tempfile::tempdir;

    fn build_scenario() -> (Vec<Vec<u32>>, MetaDifferentialColors) {
        let lists = vec![
            vec![0, 1, 4],
            vec![2, 5],
            vec![0, 2, 3, 4],
            vec![0, 1, 4, 5],
            vec![0, 1],
        ];
        let source = VecListSource::new(&lists, 6);
        let doc_perm = DocPermutation::from_parts((0..6).collect(), vec![0, 3, 6]);
        let dir = tempdir().unwrap();
        let meta = build_meta_from_permutation(&source, &doc_perm, dir.path()).unwrap();
        let cfg = MetaDiffConfig {
            p: 4,
            ..MetaDiffConfig::default()
        };
        let store = build_meta_differential(&meta, &cfg, dir.path()).unwrap();
        (lists, store)
    }

    #[test]
    fn test_roundtrip_identity_permutation() {
        let (lists, store) = build_scenario();
        assert_eq!(store.num_color_classes(), lists.len());
        for (id, list) in lists.iter().enumerate() {
            let got: Vec<u32> = store.colors(id).collect();
            assert_eq!(&got, list, "class {id}");
            assert_eq!(store.color_list_size(id), list.len());
        }
    }

    #[test]
    fn test_meta_lists_survive_reencoding() {
        let (_, store) = build_scenario();
        for class in 0..store.num_color_classes() {
            let metas: Vec<u32> = store.meta_list(class).collect();
            assert!(!metas.is_empty());
            assert!(metas.windows(2).all(|w| w[0] < w[1]));
            for g in metas {
                let (p, local) = store.partition_of(g);
                assert!(p < store.num_partitions());
                assert!((local as usize) < store.partition_store(p).num_color_classes());
            }
        }
    }
}
