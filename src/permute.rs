//! Cluster-grouping permutation, majority-vote reference synthesis, and the
//! in-memory `Cluster` used by the clustering tool.

use crate::bits::{write_gap_list, BitVectorBuilder};
use crate::kmeans::Clustering;
use crate::source::ColorSource;

/// Majority threshold applied when voting a reference.
///
/// The class-level differential pipeline uses `Strict` (votes must exceed
/// ceil(size/2)); the meta pipelines historically used `Inclusive` (votes may
/// equal it). Both are supported; `Strict` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MajorityRule {
    #[default]
    Strict,
    Inclusive,
}

impl MajorityRule {
    fn admits(self, votes: u32, cluster_size: usize) -> bool {
        let threshold = (cluster_size as u32 + 1) / 2; // ceil(size/2)
        match self {
            MajorityRule::Strict => votes > threshold,
            MajorityRule::Inclusive => votes >= threshold,
        }
    }
}

/// A stable permutation grouping points by cluster id.
#[derive(Debug, Clone)]
pub struct ClusterPermutation {
    pub num_clusters: usize,
    /// Start slot of each cluster in the grouped order; len num_clusters + 1.
    pub cluster_begin: Vec<u32>,
    /// positions[i] = grouped slot of point i.
    pub positions: Vec<u32>,
    /// order[slot] = point occupying that grouped slot (inverse of positions).
    pub order: Vec<u32>,
}

impl ClusterPermutation {
    /// Group points by cluster, preserving input order within a cluster.
    pub fn new(clustering: &Clustering) -> Self {
        let num_clusters = clustering.num_clusters;
        let num_points = clustering.clusters.len();

        let mut cluster_begin = vec![0u32; num_clusters + 1];
        for &c in &clustering.clusters {
            cluster_begin[c as usize + 1] += 1;
        }
        for i in 0..num_clusters {
            cluster_begin[i + 1] += cluster_begin[i];
        }

        let mut next_slot = cluster_begin.clone();
        let mut positions = vec![0u32; num_points];
        let mut order = vec![0u32; num_points];
        for (i, &c) in clustering.clusters.iter().enumerate() {
            let slot = next_slot[c as usize];
            next_slot[c as usize] += 1;
            positions[i] = slot;
            order[slot as usize] = i as u32;
        }

        Self {
            num_clusters,
            cluster_begin,
            positions,
            order,
        }
    }

    /// Cluster id owning a grouped slot.
    pub fn cluster_of_slot(&self, slot: u32) -> u32 {
        debug_assert!((slot as usize) < self.order.len());
        // cluster_begin is sorted; find the last begin <= slot
        (self.cluster_begin.partition_point(|&b| b <= slot) - 1) as u32
    }

    pub fn cluster_size(&self, cluster_id: u32) -> usize {
        (self.cluster_begin[cluster_id as usize + 1] - self.cluster_begin[cluster_id as usize])
            as usize
    }
}

/// Majority-vote a reference list for every cluster.
///
/// `class_of_point(i)` maps a clustered point to the class whose list it
/// represents. Walks the grouped order once, accumulating a doc-vote
/// histogram that is reset between clusters; references come out in
/// ascending doc order by construction.
pub fn synthesize_references<S: ColorSource>(
    source: &S,
    perm: &ClusterPermutation,
    class_of_point: impl Fn(u32) -> usize,
    rule: MajorityRule,
) -> Vec<Vec<u32>> {
    let num_docs = source.num_docs() as usize;
    let mut references = Vec::with_capacity(perm.num_clusters);
    let mut votes = vec![0u32; num_docs];

    for cluster_id in 0..perm.num_clusters {
        let begin = perm.cluster_begin[cluster_id] as usize;
        let end = perm.cluster_begin[cluster_id + 1] as usize;
        for &point in &perm.order[begin..end] {
            for doc in source.colors(class_of_point(point)) {
                votes[doc as usize] += 1;
            }
        }
        let size = end - begin;
        let mut reference = Vec::new();
        for (doc, &v) in votes.iter().enumerate() {
            if rule.admits(v, size) {
                reference.push(doc as u32);
            }
        }
        votes.iter_mut().for_each(|v| *v = 0);
        references.push(reference);
    }
    references
}

/// Sorted symmetric difference of two strictly-increasing lists.
pub fn symmetric_difference(list: &[u32], reference: &[u32]) -> Vec<u32> {
    let mut edits = Vec::with_capacity(list.len() + reference.len());
    let (mut i, mut j) = (0usize, 0usize);
    while i < list.len() && j < reference.len() {
        if list[i] == reference[j] {
            i += 1;
            j += 1;
        } else if list[i] < reference[j] {
            edits.push(list[i]);
            i += 1;
        } else {
            edits.push(reference[j]);
            j += 1;
        }
    }
    edits.extend_from_slice(&list[i..]);
    edits.extend_from_slice(&reference[j..]);
    edits
}

/// One cluster held uncompressed: the reference plus the per-member edit
/// lists. This is the working representation of the `cluster` tool; the
/// differential store is its bit-packed equivalent.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub num_docs: u32,
    pub reference: Vec<u32>,
    pub edit_lists: Vec<Vec<u32>>,
}

impl Cluster {
    pub fn new(num_docs: u32, reference: Vec<u32>) -> Self {
        Self {
            num_docs,
            reference,
            edit_lists: Vec::new(),
        }
    }

    /// Diff a member list against the reference and keep the edits.
    pub fn append_color_list(&mut self, list: &[u32]) {
        self.edit_lists
            .push(symmetric_difference(list, &self.reference));
    }

    /// Reconstruct member i: values appearing in exactly one of the two
    /// sorted streams.
    pub fn colors(&self, i: usize) -> Vec<u32> {
        symmetric_difference(&self.edit_lists[i], &self.reference)
    }

    /// Size in bits of member i's edit list under the delta-gap encoding.
    pub fn compressed_bits(&self, i: usize) -> u64 {
        let mut bvb = BitVectorBuilder::new();
        write_gap_list(&mut bvb, &self.edit_lists[i]);
        bvb.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecListSource;

    fn identity_perm(clusters: Vec<u32>, num_clusters: usize) -> ClusterPermutation {
        ClusterPermutation::new(&Clustering {
            clusters,
            num_clusters,
        })
    }

    #[test]
    fn test_permutation_groups_and_is_stable() {
        let perm = identity_perm(vec![1, 0, 1, 0, 1], 2);
        assert_eq!(perm.cluster_begin, vec![0, 2, 5]);
        // stable: cluster 0 keeps input order 1, 3; cluster 1 keeps 0, 2, 4
        assert_eq!(perm.order, vec![1, 3, 0, 2, 4]);
        assert_eq!(perm.positions, vec![2, 0, 3, 1, 4]);
        assert_eq!(perm.cluster_of_slot(0), 0);
        assert_eq!(perm.cluster_of_slot(1), 0);
        assert_eq!(perm.cluster_of_slot(2), 1);
        assert_eq!(perm.cluster_of_slot(4), 1);
    }

    #[test]
    fn test_identical_lists_vote_themselves() {
        // scenario: {[0,1,2], [0,1,2]} in one cluster
        let lists = vec![vec![0, 1, 2], vec![0, 1, 2]];
        let source = VecListSource::new(&lists, 8);
        let perm = identity_perm(vec![0, 0], 1);
        let refs =
            synthesize_references(&source, &perm, |p| p as usize, MajorityRule::Strict);
        assert_eq!(refs, vec![vec![0, 1, 2]]);

        let mut cluster = Cluster::new(8, refs[0].clone());
        cluster.append_color_list(&lists[0]);
        cluster.append_color_list(&lists[1]);
        assert!(cluster.edit_lists[0].is_empty());
        assert!(cluster.edit_lists[1].is_empty());
    }

    #[test]
    fn test_shared_prefix_majority() {
        // scenario: {[0,1,2], [0,1,3], [0,1,4]} -> reference {0,1}
        let lists = vec![vec![0, 1, 2], vec![0, 1, 3], vec![0, 1, 4]];
        let source = VecListSource::new(&lists, 8);
        let perm = identity_perm(vec![0, 0, 0], 1);
        let refs =
            synthesize_references(&source, &perm, |p| p as usize, MajorityRule::Strict);
        assert_eq!(refs, vec![vec![0, 1]]);

        let mut cluster = Cluster::new(8, refs[0].clone());
        for list in &lists {
            cluster.append_color_list(list);
        }
        assert_eq!(cluster.edit_lists, vec![vec![2], vec![3], vec![4]]);
        for (i, list) in lists.iter().enumerate() {
            assert_eq!(&cluster.colors(i), list);
        }
    }

    #[test]
    fn test_no_majority_gives_empty_reference() {
        // scenario: {[], [0], [7]} -> no doc reaches a strict majority of 3
        let lists = vec![vec![], vec![0], vec![7]];
        let source = VecListSource::new(&lists, 8);
        let perm = identity_perm(vec![0, 0, 0], 1);
        let refs =
            synthesize_references(&source, &perm, |p| p as usize, MajorityRule::Strict);
        assert_eq!(refs, vec![Vec::<u32>::new()]);

        let mut cluster = Cluster::new(8, Vec::new());
        for list in &lists {
            cluster.append_color_list(list);
        }
        assert_eq!(cluster.edit_lists, lists);
    }

    #[test]
    fn test_strict_majority_excludes_half_votes() {
        // scenario: {[0,2,4,6], [0,2,5,6], [1,2,4,6]}
        // votes: 0:2, 1:1, 2:3, 4:2, 5:1, 6:3 -> reference [2,6]
        let lists = vec![vec![0, 2, 4, 6], vec![0, 2, 5, 6], vec![1, 2, 4, 6]];
        let source = VecListSource::new(&lists, 8);
        let perm = identity_perm(vec![0, 0, 0], 1);
        let refs =
            synthesize_references(&source, &perm, |p| p as usize, MajorityRule::Strict);
        assert_eq!(refs, vec![vec![2, 6]]);

        let mut cluster = Cluster::new(8, refs[0].clone());
        for list in &lists {
            cluster.append_color_list(list);
        }
        assert_eq!(
            cluster.edit_lists,
            vec![vec![0, 4], vec![0, 5], vec![1, 4]]
        );
        for (i, list) in lists.iter().enumerate() {
            assert_eq!(&cluster.colors(i), list);
        }
    }

    #[test]
    fn test_inclusive_rule_keeps_singleton_reference() {
        // disjoint lists in singleton clusters: each reference equals its
        // list under the inclusive rule
        let lists = vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]];
        let source = VecListSource::new(&lists, 8);
        let perm = identity_perm(vec![0, 1], 2);
        let refs =
            synthesize_references(&source, &perm, |p| p as usize, MajorityRule::Inclusive);
        assert_eq!(refs, lists);

        for (i, list) in lists.iter().enumerate() {
            let mut cluster = Cluster::new(8, refs[i].clone());
            cluster.append_color_list(list);
            assert!(cluster.edit_lists[0].is_empty());
        }
    }

    #[test]
    fn test_symmetric_difference_edges() {
        assert_eq!(symmetric_difference(&[], &[]), Vec::<u32>::new());
        assert_eq!(symmetric_difference(&[1, 2], &[]), vec![1, 2]);
        assert_eq!(symmetric_difference(&[], &[3]), vec![3]);
        assert_eq!(symmetric_difference(&[1, 2, 3], &[2]), vec![1, 3]);
        assert_eq!(symmetric_difference(&[1, 2], &[1, 2]), Vec::<u32>::new());
    }
}
