//! End-to-end build and read-back checks over every store flavor.

use chroma_index::formats::IndexFile;
use chroma_index::index::ColorStoreKind;
use chroma_index::kmeans::ClusteringParams;
use chroma_index::permute::MajorityRule;
use chroma_index::source::{ColorSource, VecListSource};
use chroma_index::{FilenameCatalog, Index, IndexBuildConfig};
use tempfile::tempdir;

/// Deterministic pseudo-random sorted lists (no RNG crates in tests so the
/// inputs are stable across toolchains).
fn make_lists(num_classes: usize, num_docs: u32, seed: u64) -> Vec<Vec<u32>> {
    let mut state = seed.wrapping_mul(0x9e3779b97f4a7c15).wrapping_add(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    (0..num_classes)
        .map(|_| {
            let size = 1 + (next() % (num_docs as u64 / 2)) as u32;
            let mut list: Vec<u32> = (0..size).map(|_| (next() % num_docs as u64) as u32).collect();
            list.sort_unstable();
            list.dedup();
            list
        })
        .collect()
}

fn small_config() -> IndexBuildConfig {
    IndexBuildConfig {
        p: 6,
        num_threads: 2,
        clustering: ClusteringParams {
            min_cluster_size: 8,
            ..ClusteringParams::default()
        },
        ..IndexBuildConfig::default()
    }
}

fn hybrid_index(lists: &[Vec<u32>], num_docs: u32) -> Index {
    let source = VecListSource::new(lists, num_docs);
    Index::build_hybrid(&source, FilenameCatalog::default(), vec![], vec![]).unwrap()
}

/// Round-trip, size consistency and monotonicity for one store.
fn assert_store_roundtrip(index: &Index, lists: &[Vec<u32>], num_docs: u32) {
    assert_eq!(index.num_color_classes(), lists.len());
    assert_eq!(index.num_docs(), num_docs);
    let perm = index.store().doc_permutation();
    for (id, list) in lists.iter().enumerate() {
        let mut expected = list.clone();
        if let Some(perm) = perm {
            for d in expected.iter_mut() {
                *d = perm[*d as usize];
            }
            expected.sort_unstable();
        }
        let got: Vec<u32> = index.colors(id).collect();
        assert_eq!(got, expected, "class {id} does not round-trip");
        assert_eq!(index.list_size(id), expected.len(), "class {id} size");
        assert!(
            got.windows(2).all(|w| w[0] < w[1]),
            "class {id} not strictly increasing"
        );
        assert!(
            got.iter().all(|&d| d < num_docs),
            "class {id} out of doc range"
        );
    }
}

#[test]
fn test_all_stores_roundtrip() {
    let num_docs = 64;
    let lists = make_lists(40, num_docs, 7);
    let hybrid = hybrid_index(&lists, num_docs);
    let cfg = small_config();

    assert_store_roundtrip(&hybrid, &lists, num_docs);
    assert_store_roundtrip(&hybrid.to_differential(&cfg).unwrap(), &lists, num_docs);
    assert_store_roundtrip(&hybrid.to_meta(&cfg).unwrap(), &lists, num_docs);
    assert_store_roundtrip(
        &hybrid.to_meta_differential(&cfg).unwrap(),
        &lists,
        num_docs,
    );
}

#[test]
fn test_builtin_check_passes() {
    let num_docs = 32;
    let lists = make_lists(24, num_docs, 99);
    let hybrid = hybrid_index(&lists, num_docs);
    let cfg = IndexBuildConfig {
        check: true,
        ..small_config()
    };
    hybrid.to_differential(&cfg).unwrap();
    hybrid.to_meta(&cfg).unwrap();
    hybrid.to_meta_differential(&cfg).unwrap();
}

#[test]
fn test_cluster_bijection_and_symmetric_difference_law() {
    let num_docs = 64;
    let lists = make_lists(30, num_docs, 3);
    let hybrid = hybrid_index(&lists, num_docs);
    let diff = hybrid.to_differential(&small_config()).unwrap();
    let ColorStoreKind::Differential(store) = diff.store() else {
        panic!("expected a differential store");
    };

    let num_clusters = store.num_clusters();
    assert!(num_clusters >= 1);

    // every cluster reference is sorted, deduplicated and in range
    for c in 0..num_clusters {
        let reference = store.reference(c);
        assert!(reference.windows(2).all(|w| w[0] < w[1]));
        assert!(reference.iter().all(|&d| d < num_docs));
    }

    for (id, list) in lists.iter().enumerate() {
        // bijection: every class maps to exactly one in-range cluster
        let c = store.cluster_of(id);
        assert!(c < num_clusters, "class {id} mapped to cluster {c}");

        // symmetric-difference law: colors(i) == reference (sym diff) edit_list(i)
        let reference = store.reference(c);
        let edits = store.edit_list(id);
        assert!(edits.windows(2).all(|w| w[0] < w[1]));
        let mut reconstructed: Vec<u32> = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < reference.len() && j < edits.len() {
            if reference[i] == edits[j] {
                i += 1;
                j += 1;
            } else if reference[i] < edits[j] {
                reconstructed.push(reference[i]);
                i += 1;
            } else {
                reconstructed.push(edits[j]);
                j += 1;
            }
        }
        reconstructed.extend_from_slice(&reference[i..]);
        reconstructed.extend_from_slice(&edits[j..]);
        assert_eq!(&reconstructed, list, "class {id}");
    }
}

#[test]
fn test_disjoint_lists_with_inclusive_rule() {
    // two disjoint lists, singleton clusters allowed: each reference equals
    // its list and both edit lists are empty
    let lists = vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]];
    let hybrid = hybrid_index(&lists, 8);
    let cfg = IndexBuildConfig {
        p: 6,
        clustering: ClusteringParams {
            min_cluster_size: 1,
            ..ClusteringParams::default()
        },
        rule: MajorityRule::Inclusive,
        ..IndexBuildConfig::default()
    };
    let diff = hybrid.to_differential(&cfg).unwrap();
    let ColorStoreKind::Differential(store) = diff.store() else {
        panic!("expected a differential store");
    };
    assert_eq!(store.num_clusters(), 2);
    for (id, list) in lists.iter().enumerate() {
        assert_eq!(&store.reference(store.cluster_of(id)), list);
        assert!(store.edit_list(id).is_empty());
        let got: Vec<u32> = diff.colors(id).collect();
        assert_eq!(&got, list);
    }
}

#[test]
fn test_shared_prefix_references_through_pipeline() {
    // {[0,1,2], [0,1,3], [0,1,4]}: one cluster, reference {0,1},
    // single-element edit lists
    let lists = vec![vec![0, 1, 2], vec![0, 1, 3], vec![0, 1, 4]];
    let hybrid = hybrid_index(&lists, 8);
    let cfg = IndexBuildConfig {
        p: 6,
        clustering: ClusteringParams {
            min_cluster_size: 3,
            ..ClusteringParams::default()
        },
        ..IndexBuildConfig::default()
    };
    let diff = hybrid.to_differential(&cfg).unwrap();
    let ColorStoreKind::Differential(store) = diff.store() else {
        panic!("expected a differential store");
    };
    assert_eq!(store.num_clusters(), 1);
    assert_eq!(store.reference(0), vec![0, 1]);
    assert_eq!(store.edit_list(0), vec![2]);
    assert_eq!(store.edit_list(1), vec![3]);
    assert_eq!(store.edit_list(2), vec![4]);
}

#[test]
fn test_serialized_artifacts_are_deterministic() {
    let num_docs = 48;
    let lists = make_lists(32, num_docs, 1234);
    let dir = tempdir().unwrap();

    let mut digests = Vec::new();
    for round in 0..2 {
        let hybrid = hybrid_index(&lists, num_docs);
        let md = hybrid.to_meta_differential(&small_config()).unwrap();
        let path = dir.path().join(format!("round{round}.cidx"));
        IndexFile::write(&path, &md).unwrap();
        digests.push(std::fs::read(&path).unwrap());
    }
    assert_eq!(
        digests[0], digests[1],
        "two builds on identical input must serialize byte-identically"
    );
}

#[test]
fn test_serialization_roundtrip_every_kind() {
    let num_docs = 40;
    let lists = make_lists(20, num_docs, 5);
    let hybrid = hybrid_index(&lists, num_docs);
    let cfg = IndexBuildConfig {
        clustering: ClusteringParams {
            min_cluster_size: 4,
            ..ClusteringParams::default()
        },
        ..small_config()
    };
    let dir = tempdir().unwrap();

    let stores = vec![
        hybrid.clone(),
        hybrid.to_differential(&cfg).unwrap(),
        hybrid.to_meta(&cfg).unwrap(),
        hybrid.to_meta_differential(&cfg).unwrap(),
    ];
    for (i, index) in stores.iter().enumerate() {
        let path = dir.path().join(format!("store{i}.cidx"));
        IndexFile::write(&path, index).unwrap();
        let loaded = IndexFile::read(&path).unwrap();
        assert_eq!(loaded.store().name(), index.store().name());
        assert_store_roundtrip(&loaded, &lists, num_docs);
    }
}

#[test]
fn test_meta_globalization_invariant() {
    let num_docs = 64;
    let lists = make_lists(26, num_docs, 77);
    let hybrid = hybrid_index(&lists, num_docs);
    let meta_index = hybrid.to_meta(&small_config()).unwrap();
    let ColorStoreKind::Meta(store) = meta_index.store() else {
        panic!("expected a meta store");
    };

    let before = store.num_partials_before();
    for class in 0..store.num_color_classes() {
        let mut prev_partition = None;
        for global in store.meta_colors().colors(class) {
            let (p, local) = store.partition_of(global);
            assert!((local as usize) < store.partial_colors(p).num_color_classes());
            assert_eq!(before[p] + local as u64, global as u64);
            // partition ids strictly ascend within a meta list
            if let Some(prev) = prev_partition {
                assert!(p > prev);
            }
            prev_partition = Some(p);
        }
    }
}

#[test]
fn test_infeasible_parameters_are_rejected_up_front() {
    let lists = make_lists(10, 32, 2);
    let hybrid = hybrid_index(&lists, 32);

    // min_cluster_size larger than the point count
    let cfg = IndexBuildConfig {
        clustering: ClusteringParams {
            min_cluster_size: 11,
            ..ClusteringParams::default()
        },
        ..IndexBuildConfig::default()
    };
    assert!(matches!(
        hybrid.to_differential(&cfg),
        Err(chroma_index::Error::InfeasibleParams(_))
    ));

    // more threads than sketchable lists
    let cfg = IndexBuildConfig {
        num_threads: 11,
        clustering: ClusteringParams {
            min_cluster_size: 2,
            ..ClusteringParams::default()
        },
        ..IndexBuildConfig::default()
    };
    assert!(matches!(
        hybrid.to_differential(&cfg),
        Err(chroma_index::Error::InfeasibleParams(_))
    ));
}

#[test]
fn test_filenames_follow_doc_permutation() {
    let num_docs = 16u32;
    let lists = make_lists(12, num_docs, 8);
    let source = VecListSource::new(&lists, num_docs);
    let catalog = FilenameCatalog::new((0..num_docs).map(|i| format!("doc{i}.fa")).collect());
    let hybrid = Index::build_hybrid(&source, catalog, vec![0xAA; 7], vec![0x55; 3]).unwrap();

    let cfg = IndexBuildConfig {
        clustering: ClusteringParams {
            min_cluster_size: 4,
            ..ClusteringParams::default()
        },
        ..small_config()
    };
    let meta_index = hybrid.to_meta(&cfg).unwrap();
    let perm = meta_index.store().doc_permutation().unwrap().to_vec();
    for doc in 0..num_docs as usize {
        assert_eq!(
            meta_index.filenames().filename(perm[doc] as usize),
            format!("doc{doc}.fa")
        );
    }
    // opaque payloads pass through untouched
    assert_eq!(meta_index.k2u(), &[0xAA; 7]);
    assert_eq!(meta_index.u2c(), &[0x55; 3]);
}
