//! CLI commands for chroma-index

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;

use crate::catalog::FilenameCatalog;
use crate::error::Error;
use crate::index::{Index, IndexBuildConfig};
use crate::ingest::read_color_lists;
use crate::kmeans::{kmeans_divisive, ClusteringParams};
use crate::lock::BuildLock;
use crate::permute::{synthesize_references, Cluster, ClusterPermutation, MajorityRule};
use crate::sketch::{read_color_sketches, sketch_color_lists, SketchParams};
use crate::source::{ColorSource, VecListSource};

/// Artifact extension, used to tell serialized indexes from raw list files.
const INDEX_EXTENSION: &str = "cidx";

#[derive(Parser)]
#[command(name = "chroma-index")]
#[command(about = "Compressed color-class store builder", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreMode {
    Hybrid,
    Differential,
    Meta,
    MetaDifferential,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an index artifact from a list file or an existing index
    Build {
        /// Input: a color list file, or a .cidx artifact to re-encode
        #[arg(short, long)]
        input: PathBuf,

        /// Output artifact path
        #[arg(short, long)]
        output: PathBuf,

        /// Store flavor to build
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: StoreMode,

        /// Number of threads for the sketching phase
        #[arg(short = 't', long, default_value = "1")]
        threads: usize,

        /// Sketch size exponent (2^p bytes per sketch)
        #[arg(short, long, default_value = "10")]
        p: u32,

        /// Minimum cluster size accepted by a k-means split
        #[arg(long, default_value = "50")]
        min_cluster_size: usize,

        /// Re-iterate every class after the build and compare with the source
        #[arg(long)]
        check: bool,
    },
    /// Sketch and cluster the color lists of an index, reporting cluster
    /// statistics without writing a new artifact
    Cluster {
        /// Input: a color list file or a .cidx artifact
        #[arg(short, long)]
        input: PathBuf,

        /// Optional JSON report destination
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum density of the lists to be clustered [0, 1]
        #[arg(short, long, default_value = "0")]
        left: f64,

        /// Maximum density of the lists to be clustered [0, 1]
        #[arg(short, long, default_value = "1")]
        right: f64,

        /// Number of threads
        #[arg(short = 't', long, default_value = "1")]
        threads: usize,

        /// Cluster the predefined density bands 0 <-> 25 <-> 75 <-> 100 and
        /// verify every list round-trips through its edit list
        #[arg(long)]
        test: bool,
    },
    /// Print the space breakdown of an index artifact
    Stats {
        /// Index artifact
        #[arg(short, long)]
        input: PathBuf,
    },
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Build {
                input,
                output,
                mode,
                threads,
                p,
                min_cluster_size,
                check,
            } => run_build(&input, &output, mode, threads, p, min_cluster_size, check),
            Commands::Cluster {
                input,
                output,
                left,
                right,
                threads,
                test,
            } => run_cluster(&input, output.as_deref(), left, right, threads, test),
            Commands::Stats { input } => {
                let index = crate::formats::IndexFile::read(&input)?;
                index.print_stats();
                Ok(())
            }
        }
    }
}

fn load_index(input: &Path) -> Result<Index> {
    if input.extension().and_then(|e| e.to_str()) == Some(INDEX_EXTENSION) {
        return Ok(crate::formats::IndexFile::read(input)?);
    }
    let parsed = read_color_lists(input)?;
    let source = VecListSource::new(&parsed.lists, parsed.num_docs);
    let index = Index::build_hybrid(&source, FilenameCatalog::default(), vec![], vec![])?;
    Ok(index)
}

#[allow(clippy::too_many_arguments)]
fn run_build(
    input: &Path,
    output: &Path,
    mode: StoreMode,
    threads: usize,
    p: u32,
    min_cluster_size: usize,
    check: bool,
) -> Result<()> {
    let source = load_index(input).with_context(|| format!("loading {}", input.display()))?;
    println!(
        "loaded {} classes over {} docs",
        source.num_color_classes(),
        source.num_docs()
    );

    let cfg = IndexBuildConfig {
        p,
        num_threads: threads,
        clustering: ClusteringParams {
            min_cluster_size,
            ..ClusteringParams::default()
        },
        check,
        ..IndexBuildConfig::default()
    };

    let index = match mode {
        StoreMode::Hybrid => source,
        StoreMode::Differential => source.to_differential(&cfg)?,
        StoreMode::Meta => source.to_meta(&cfg)?,
        StoreMode::MetaDifferential => source.to_meta_differential(&cfg)?,
    };

    crate::formats::IndexFile::write(output, &index)?;
    let lock = BuildLock::new(
        input,
        output,
        index.store().name(),
        index.num_docs(),
        index.num_color_classes() as u64,
        threads,
    );
    let lock_path = output.with_extension("lock.json");
    lock.write(&lock_path)?;

    println!(
        "✓ wrote {} ({} store, {} classes)",
        output.display(),
        index.store().name(),
        index.num_color_classes()
    );
    println!("✓ lock file: {}", lock_path.display());
    Ok(())
}

/// One clustered density band: the uncompressed clusters plus, per covered
/// class, its slot in the band's grouped order.
struct BandClusters {
    clusters: Vec<Cluster>,
    assignments: Vec<(u64, u32)>, // (class id, grouped slot)
}

fn cluster_band(
    index: &Index,
    left: f64,
    right: f64,
    threads: usize,
    tmp_dir: &Path,
) -> Result<Option<BandClusters>> {
    let num_docs = index.num_docs();
    // Pre-count the band so an empty band is skipped rather than failing the
    // thread feasibility check inside the sketcher.
    let min_colors = left * num_docs as f64;
    let max_colors = right * num_docs as f64;
    let in_band = (0..index.num_color_classes())
        .filter(|&id| {
            let size = index.list_size(id) as f64;
            size > min_colors && size <= max_colors
        })
        .count();
    if in_band == 0 {
        return Ok(None);
    }

    let params = SketchParams {
        p: 5,
        num_threads: threads.min(in_band),
        left,
        right,
    };
    let spill = tmp_dir.join("sketches.bin");
    sketch_color_lists(index, &params, &spill)?;
    let points = read_color_sketches(&spill)?;
    std::fs::remove_file(&spill).map_err(|e| Error::io(&spill, e))?;
    let ids = points.ids.expect("color spill carries ids");

    let clustering = kmeans_divisive(
        &points.registers,
        points.num_bytes_per_point,
        &ClusteringParams::default(),
    );
    println!("** clustering completed");
    println!("Computed {} partitions", clustering.num_clusters);

    let perm = ClusterPermutation::new(&clustering);
    let references = synthesize_references(
        index,
        &perm,
        |point| ids[point as usize] as usize,
        MajorityRule::Strict,
    );

    let mut clusters: Vec<Cluster> = references
        .into_iter()
        .map(|r| Cluster::new(num_docs, r))
        .collect();
    let mut list = Vec::new();
    for slot in 0..perm.order.len() as u32 {
        let cluster_id = perm.cluster_of_slot(slot) as usize;
        let class_id = ids[perm.order[slot as usize] as usize] as usize;
        list.clear();
        list.extend(index.colors(class_id));
        clusters[cluster_id].append_color_list(&list);
    }

    let assignments = ids
        .iter()
        .enumerate()
        .map(|(point, &class_id)| (class_id, perm.positions[point]))
        .collect();
    Ok(Some(BandClusters {
        clusters,
        assignments,
    }))
}

fn run_cluster(
    input: &Path,
    output: Option<&Path>,
    left: f64,
    right: f64,
    threads: usize,
    test: bool,
) -> Result<()> {
    let index = load_index(input).with_context(|| format!("loading {}", input.display()))?;
    let tmp = tempfile::tempdir().context("creating scratch directory")?;

    let bands: Vec<(f64, f64)> = if test {
        vec![(0.0, 0.25), (0.25, 0.75), (0.75, 1.0)]
    } else {
        vec![(left, right)]
    };

    let num_classes = index.num_color_classes();
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut map: Vec<Option<u32>> = vec![None; num_classes];
    let mut offset = 0u32;
    for &(band_left, band_right) in &bands {
        match cluster_band(&index, band_left, band_right, threads, tmp.path())? {
            Some(band) => {
                for (class_id, slot) in &band.assignments {
                    map[*class_id as usize] = Some(slot + offset);
                }
                offset += band.assignments.len() as u32;
                clusters.extend(band.clusters);
            }
            None => warn!("density band ({band_left}, {band_right}] is empty, skipped"),
        }
    }
    println!("{} clusters over {} bands", clusters.len(), bands.len());

    if test {
        let mut errors: Vec<usize> = Vec::new();
        let mut num_edits = 0u64;
        let mut compressed_bits = 0u64;
        let mut covered = 0usize;
        for (class_id, slot) in map.iter().enumerate() {
            let Some(slot) = slot else { continue };
            covered += 1;
            let mut pos = *slot as usize;
            let mut clst = 0usize;
            while pos >= clusters[clst].edit_lists.len() {
                pos -= clusters[clst].edit_lists.len();
                clst += 1;
            }
            num_edits += clusters[clst].edit_lists[pos].len() as u64;
            compressed_bits += clusters[clst].compressed_bits(pos);
            let resulting = clusters[clst].colors(pos);
            let expected: Vec<u32> = index.colors(class_id).collect();
            if resulting != expected {
                errors.push(class_id);
            }
        }
        println!("#Errors: {}", errors.len());
        println!(" Covered: {covered}/{num_classes}");
        println!(" Num_edits: {num_edits}");
        println!(" Compressed_size: {compressed_bits} bits");
        if !errors.is_empty() {
            bail!("{} color lists failed the cluster round-trip", errors.len());
        }
    }

    if let Some(report_path) = output {
        let report = serde_json::json!({
            "input": input,
            "bands": bands,
            "num_clusters": clusters.len(),
            "num_color_classes": num_classes,
        });
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", report_path.display()))?;
        println!("✓ report: {}", report_path.display());
    }
    Ok(())
}
