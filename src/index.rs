//! Index façade: one color store plus the filename catalog and the opaque
//! K2U / U2C collaborator payloads, with build entry points per store
//! flavor.

use std::path::{Path, PathBuf};

use log::info;
use tempfile::TempDir;

use crate::catalog::FilenameCatalog;
use crate::differential::{build_differential, DiffPipelineConfig, DifferentialColors, DifferentialIter};
use crate::error::{Error, Result};
use crate::hybrid::{HybridColors, HybridColorsBuilder, HybridIter};
use crate::kmeans::ClusteringParams;
use crate::meta::{build_meta, MetaBuildConfig, MetaColors, MetaIter};
use crate::meta_differential::{build_meta_differential, MetaDiffConfig, MetaDifferentialColors, MetaDiffIter};
use crate::permute::MajorityRule;
use crate::source::ColorSource;

/// The four store flavors an index can carry.
#[derive(Debug, Clone)]
pub enum ColorStoreKind {
    Hybrid(HybridColors),
    Differential(DifferentialColors),
    Meta(MetaColors),
    MetaDifferential(MetaDifferentialColors),
}

impl ColorStoreKind {
    pub fn num_docs(&self) -> u32 {
        match self {
            ColorStoreKind::Hybrid(s) => s.num_docs(),
            ColorStoreKind::Differential(s) => s.num_docs(),
            ColorStoreKind::Meta(s) => s.num_docs(),
            ColorStoreKind::MetaDifferential(s) => s.num_docs(),
        }
    }

    pub fn num_color_classes(&self) -> usize {
        match self {
            ColorStoreKind::Hybrid(s) => s.num_color_classes(),
            ColorStoreKind::Differential(s) => s.num_color_classes(),
            ColorStoreKind::Meta(s) => s.num_color_classes(),
            ColorStoreKind::MetaDifferential(s) => s.num_color_classes(),
        }
    }

    pub fn colors(&self, id: usize) -> ColorsIter<'_> {
        match self {
            ColorStoreKind::Hybrid(s) => ColorsIter::Hybrid(s.colors(id)),
            ColorStoreKind::Differential(s) => ColorsIter::Differential(s.colors(id)),
            ColorStoreKind::Meta(s) => ColorsIter::Meta(s.colors(id)),
            ColorStoreKind::MetaDifferential(s) => ColorsIter::MetaDifferential(s.colors(id)),
        }
    }

    pub fn num_bits(&self) -> u64 {
        match self {
            ColorStoreKind::Hybrid(s) => s.num_bits(),
            ColorStoreKind::Differential(s) => s.num_bits(),
            ColorStoreKind::Meta(s) => s.num_bits(),
            ColorStoreKind::MetaDifferential(s) => s.num_bits(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorStoreKind::Hybrid(_) => "hybrid",
            ColorStoreKind::Differential(_) => "differential",
            ColorStoreKind::Meta(_) => "meta",
            ColorStoreKind::MetaDifferential(_) => "meta-differential",
        }
    }

    /// Doc permutation baked into the store, when one exists.
    pub fn doc_permutation(&self) -> Option<&[u32]> {
        match self {
            ColorStoreKind::Meta(s) => Some(s.doc_permutation()),
            ColorStoreKind::MetaDifferential(s) => Some(s.doc_permutation()),
            _ => None,
        }
    }
}

/// Uniform iterator over any store flavor.
#[derive(Debug, Clone)]
pub enum ColorsIter<'a> {
    Hybrid(HybridIter<'a>),
    Differential(DifferentialIter<'a>),
    Meta(MetaIter<'a>),
    MetaDifferential(MetaDiffIter<'a>),
}

impl Iterator for ColorsIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            ColorsIter::Hybrid(it) => it.next(),
            ColorsIter::Differential(it) => it.next(),
            ColorsIter::Meta(it) => it.next(),
            ColorsIter::MetaDifferential(it) => it.next(),
        }
    }
}

/// Parameters shared by the derived-store builds.
#[derive(Debug, Clone)]
pub struct IndexBuildConfig {
    pub p: u32,
    pub num_threads: usize,
    pub clustering: ClusteringParams,
    /// Majority rule for the class-level differential references. The meta
    /// pipelines keep their historical inclusive rule regardless.
    pub rule: MajorityRule,
    /// Re-iterate every class after the build and compare with the source.
    pub check: bool,
    /// Scratch directory; a private temp dir is created when unset and
    /// removed on every exit path.
    pub tmp_dir: Option<PathBuf>,
}

impl Default for IndexBuildConfig {
    fn default() -> Self {
        Self {
            p: 10,
            num_threads: 1,
            clustering: ClusteringParams::default(),
            rule: MajorityRule::Strict,
            check: false,
            tmp_dir: None,
        }
    }
}

enum Scratch {
    Owned(TempDir),
    Shared(PathBuf),
}

impl Scratch {
    fn create(tmp_dir: &Option<PathBuf>) -> Result<Self> {
        match tmp_dir {
            Some(dir) => Ok(Scratch::Shared(dir.clone())),
            None => Ok(Scratch::Owned(TempDir::new().map_err(|e| {
                Error::io(std::env::temp_dir(), e)
            })?)),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Scratch::Owned(dir) => dir.path(),
            Scratch::Shared(path) => path,
        }
    }
}

/// Read-only index over one store flavor.
#[derive(Debug, Clone)]
pub struct Index {
    colors: ColorStoreKind,
    filenames: FilenameCatalog,
    k2u: Vec<u8>,
    u2c: Vec<u8>,
}

impl Index {
    pub fn new(
        colors: ColorStoreKind,
        filenames: FilenameCatalog,
        k2u: Vec<u8>,
        u2c: Vec<u8>,
    ) -> Self {
        Self {
            colors,
            filenames,
            k2u,
            u2c,
        }
    }

    /// Build a hybrid index by copying the source lists.
    pub fn build_hybrid<S: ColorSource>(
        source: &S,
        filenames: FilenameCatalog,
        k2u: Vec<u8>,
        u2c: Vec<u8>,
    ) -> Result<Self> {
        if !filenames.is_empty() && filenames.len() != source.num_docs() as usize {
            return Err(Error::Precondition(format!(
                "{} filenames for {} docs",
                filenames.len(),
                source.num_docs()
            )));
        }
        let mut builder = HybridColorsBuilder::new(source.num_docs());
        let mut list = Vec::new();
        for id in 0..source.num_color_classes() {
            list.clear();
            list.extend(source.colors(id));
            builder.process_colors(&list)?;
        }
        Ok(Self {
            colors: ColorStoreKind::Hybrid(builder.build()),
            filenames,
            k2u,
            u2c,
        })
    }

    pub fn store(&self) -> &ColorStoreKind {
        &self.colors
    }

    pub fn filenames(&self) -> &FilenameCatalog {
        &self.filenames
    }

    pub fn k2u(&self) -> &[u8] {
        &self.k2u
    }

    pub fn u2c(&self) -> &[u8] {
        &self.u2c
    }

    pub fn num_docs(&self) -> u32 {
        self.colors.num_docs()
    }

    pub fn num_color_classes(&self) -> usize {
        self.colors.num_color_classes()
    }

    pub fn colors(&self, id: usize) -> ColorsIter<'_> {
        self.colors.colors(id)
    }

    /// Re-encode this index differentially (classes clustered by sketch).
    pub fn to_differential(&self, cfg: &IndexBuildConfig) -> Result<Index> {
        let num_classes = self.num_color_classes();
        if cfg.clustering.min_cluster_size > num_classes {
            return Err(Error::InfeasibleParams(format!(
                "min_cluster_size {} exceeds the {num_classes} color classes",
                cfg.clustering.min_cluster_size
            )));
        }
        let scratch = Scratch::create(&cfg.tmp_dir)?;
        let pipeline = DiffPipelineConfig {
            p: cfg.p,
            num_threads: cfg.num_threads,
            rule: cfg.rule,
            clustering: cfg.clustering.clone(),
        };
        let store = build_differential(self, &pipeline, scratch.path())?;
        let index = Index {
            colors: ColorStoreKind::Differential(store),
            filenames: self.filenames.clone(),
            k2u: self.k2u.clone(),
            u2c: self.u2c.clone(),
        };
        if cfg.check {
            index.check_against(self)?;
        }
        Ok(index)
    }

    /// Re-encode this index with the two-level meta representation.
    pub fn to_meta(&self, cfg: &IndexBuildConfig) -> Result<Index> {
        let num_docs = self.num_docs() as usize;
        if cfg.clustering.min_cluster_size > num_docs {
            return Err(Error::InfeasibleParams(format!(
                "min_cluster_size {} exceeds the {num_docs} documents being partitioned",
                cfg.clustering.min_cluster_size
            )));
        }
        let scratch = Scratch::create(&cfg.tmp_dir)?;
        let meta_cfg = MetaBuildConfig {
            p: cfg.p,
            num_threads: cfg.num_threads,
            clustering: ClusteringParams {
                seed: 0,
                ..cfg.clustering.clone()
            },
        };
        let store = build_meta(self, &meta_cfg, scratch.path())?;
        let filenames = if self.filenames.is_empty() {
            self.filenames.clone()
        } else {
            self.filenames.permuted(store.doc_permutation())
        };
        let index = Index {
            colors: ColorStoreKind::Meta(store),
            filenames,
            k2u: self.k2u.clone(),
            u2c: self.u2c.clone(),
        };
        if cfg.check {
            index.check_against(self)?;
        }
        Ok(index)
    }

    /// Re-encode this index with the recursive meta-differential layout.
    pub fn to_meta_differential(&self, cfg: &IndexBuildConfig) -> Result<Index> {
        let num_docs = self.num_docs() as usize;
        if cfg.clustering.min_cluster_size > num_docs {
            return Err(Error::InfeasibleParams(format!(
                "min_cluster_size {} exceeds the {num_docs} documents being partitioned",
                cfg.clustering.min_cluster_size
            )));
        }
        let scratch = Scratch::create(&cfg.tmp_dir)?;
        let meta_cfg = MetaBuildConfig {
            p: cfg.p,
            num_threads: cfg.num_threads,
            clustering: ClusteringParams {
                seed: 0,
                ..cfg.clustering.clone()
            },
        };
        let meta = build_meta(self, &meta_cfg, scratch.path())?;
        let md_cfg = MetaDiffConfig {
            p: cfg.p,
            num_threads: cfg.num_threads,
            rule: MajorityRule::Inclusive,
            clustering: cfg.clustering.clone(),
        };
        let store = build_meta_differential(&meta, &md_cfg, scratch.path())?;
        let filenames = if self.filenames.is_empty() {
            self.filenames.clone()
        } else {
            self.filenames.permuted(store.doc_permutation())
        };
        let index = Index {
            colors: ColorStoreKind::MetaDifferential(store),
            filenames,
            k2u: self.k2u.clone(),
            u2c: self.u2c.clone(),
        };
        if cfg.check {
            index.check_against(self)?;
        }
        Ok(index)
    }

    /// Verify that every class of `self` round-trips the lists of `other`,
    /// through the doc permutation when this store carries one.
    pub fn check_against(&self, other: &Index) -> Result<()> {
        info!("checking {} store against its source", self.colors.name());
        if self.num_color_classes() != other.num_color_classes() {
            return Err(Error::EncodingInvariant(format!(
                "class count changed: {} vs {}",
                self.num_color_classes(),
                other.num_color_classes()
            )));
        }
        let permutation = self.colors.doc_permutation();
        let mut expected = Vec::new();
        for id in 0..other.num_color_classes() {
            expected.clear();
            expected.extend(other.colors(id));
            if let Some(perm) = permutation {
                for d in expected.iter_mut() {
                    *d = perm[*d as usize];
                }
                expected.sort_unstable();
            }
            let got: Vec<u32> = self.colors(id).collect();
            if got != expected {
                return Err(Error::EncodingInvariant(format!(
                    "class {id} does not round-trip: expected {} values, got {}",
                    expected.len(),
                    got.len()
                )));
            }
        }
        info!("check passed for {} classes", self.num_color_classes());
        Ok(())
    }

    /// Space breakdown, in the spirit of the original index stats dump.
    pub fn print_stats(&self) {
        let store_bits = self.colors.num_bits();
        let other_bits = 8 * (self.k2u.len() + self.u2c.len()) as u64
            + self
                .filenames
                .names()
                .iter()
                .map(|n| 8 * n.len() as u64)
                .sum::<u64>();
        let total_bits = store_bits + other_bits;
        println!("store type: {}", self.colors.name());
        println!("total index size: {} bytes", total_bits / 8);
        println!("SPACE BREAKDOWN:");
        println!(
            "  colors: {} bytes ({:.1}%)",
            store_bits / 8,
            store_bits as f64 * 100.0 / total_bits as f64
        );
        println!(
            "  other (K2U + U2C + filenames): {} bytes ({:.1}%)",
            other_bits / 8,
            other_bits as f64 * 100.0 / total_bits as f64
        );

        let num_classes = self.num_color_classes();
        let num_ints: u64 = (0..num_classes)
            .map(|id| self.colors(id).count() as u64)
            .sum();
        println!("doc id range 0..{}", self.num_docs().saturating_sub(1));
        println!("number of distinct color classes: {num_classes}");
        println!(
            "number of ints in distinct color classes: {num_ints} ({:.2} bits/int)",
            store_bits as f64 / num_ints.max(1) as f64
        );
    }
}

impl ColorSource for Index {
    type Iter<'a>
        = ColorsIter<'a>
    where
        Self: 'a;

    fn num_color_classes(&self) -> usize {
        self.num_color_classes()
    }

    fn num_docs(&self) -> u32 {
        self.num_docs()
    }

    fn list_size(&self, id: usize) -> usize {
        match &self.colors {
            ColorStoreKind::Hybrid(s) => s.colors(id).size(),
            ColorStoreKind::Differential(s) => s.colors(id).count(),
            ColorStoreKind::Meta(s) => s.color_list_size(id),
            ColorStoreKind::MetaDifferential(s) => s.color_list_size(id),
        }
    }

    fn colors(&self, id: usize) -> ColorsIter<'_> {
        self.colors.colors(id)
    }
}
