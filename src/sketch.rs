//! HyperLogLog sketching of color lists, run in parallel over load-balanced
//! slices, spilled to a binary scratch file for the clustering phase.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use log::{debug, info};
use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::error::{Error, Result};
use crate::source::ColorSource;

/// Fixed seed for the point hash; part of the artifact determinism contract.
const HLL_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// HyperLogLog sketch with 2^p one-byte registers.
///
/// Only the registers are ever used (as feature vectors for clustering and
/// for byte-wise-max union); no cardinality estimation is needed here.
#[derive(Debug, Clone)]
pub struct HllSketch {
    p: u32,
    registers: Vec<u8>,
}

impl HllSketch {
    pub fn new(p: u32) -> Self {
        debug_assert!((4..=16).contains(&p));
        Self {
            p,
            registers: vec![0; 1usize << p],
        }
    }

    pub fn add(&mut self, value: u64) {
        let h = xxh3_64_with_seed(&value.to_le_bytes(), HLL_HASH_SEED);
        let idx = (h >> (64 - self.p)) as usize;
        let lz = (h << self.p).leading_zeros().min(64 - self.p);
        let rank = (lz + 1) as u8;
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Byte-wise max union; commutative and associative.
    pub fn merge(&mut self, other: &HllSketch) {
        debug_assert_eq!(self.p, other.p);
        for (r, &o) in self.registers.iter_mut().zip(&other.registers) {
            if o > *r {
                *r = o;
            }
        }
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }
}

/// Parameters of a sketching pass.
#[derive(Debug, Clone)]
pub struct SketchParams {
    /// Each sketch has 2^p byte registers; p ∈ [4, 16].
    pub p: u32,
    pub num_threads: usize,
    /// Density filter: keep classes whose size lies in (left·D, right·D].
    pub left: f64,
    pub right: f64,
}

impl Default for SketchParams {
    fn default() -> Self {
        Self {
            p: 10,
            num_threads: 1,
            left: 0.0,
            right: 1.0,
        }
    }
}

impl SketchParams {
    pub fn validate(&self) -> Result<()> {
        if !(4..=16).contains(&self.p) {
            return Err(Error::InfeasibleParams(format!(
                "sketch parameter p = {} outside [4, 16]",
                self.p
            )));
        }
        if self.num_threads == 0 {
            return Err(Error::InfeasibleParams("num_threads must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.left)
            || !(0.0..=1.0).contains(&self.right)
            || self.left >= self.right
        {
            return Err(Error::InfeasibleParams(format!(
                "density range ({}, {}] is not a sub-range of [0, 1]",
                self.left, self.right
            )));
        }
        Ok(())
    }
}

/// Contiguous slices with roughly equal Σ list sizes, at most `num_threads`.
fn balance_slices(sizes: &[usize], num_threads: usize) -> Vec<Range<usize>> {
    let load: usize = sizes.iter().sum();
    let load_per_thread = (load / num_threads).max(1);
    let mut slices = Vec::with_capacity(num_threads);
    let mut begin = 0usize;
    let mut cur_load = 0usize;
    for (i, &size) in sizes.iter().enumerate() {
        cur_load += size;
        if (cur_load >= load_per_thread && slices.len() + 1 < num_threads) || i == sizes.len() - 1 {
            slices.push(begin..i + 1);
            begin = i + 1;
            cur_load = 0;
        }
    }
    slices
}

fn open_out(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(
        File::create(path).map_err(|e| Error::io(path, e))?,
    ))
}

fn put_u64(w: &mut impl Write, path: &Path, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes()).map_err(|e| Error::io(path, e))
}

/// Sketch the color lists of `source` that pass the density filter and spill
/// them to `path` (color-sketch spill layout: header, class ids, registers).
pub fn sketch_color_lists<S: ColorSource + Sync>(
    source: &S,
    params: &SketchParams,
    path: &Path,
) -> Result<()> {
    params.validate()?;

    let num_docs = source.num_docs() as u64;
    let num_color_classes = source.num_color_classes();
    let min_colors = params.left * num_docs as f64;
    let max_colors = params.right * num_docs as f64;

    let mut filtered_ids = Vec::new();
    let mut filtered_sizes = Vec::new();
    for color_id in 0..num_color_classes {
        let size = source.list_size(color_id);
        if size as f64 > min_colors && size as f64 <= max_colors {
            filtered_ids.push(color_id as u64);
            filtered_sizes.push(size);
        }
    }
    let num_filtered = filtered_ids.len();
    if num_filtered < params.num_threads {
        return Err(Error::InfeasibleParams(format!(
            "there are only {num_filtered} lists to sketch: reduce the number of threads"
        )));
    }

    let slices = balance_slices(&filtered_sizes, params.num_threads);
    debug!(
        "sketching {num_filtered} of {num_color_classes} lists over {} slices",
        slices.len()
    );

    // Disjoint output slices, merged by concatenation in slice order.
    let per_slice: Vec<Vec<HllSketch>> = slices
        .par_iter()
        .map(|range| {
            let mut sketches = Vec::with_capacity(range.len());
            for i in range.clone() {
                let mut sketch = HllSketch::new(params.p);
                for doc in source.colors(filtered_ids[i] as usize) {
                    sketch.add(doc as u64);
                }
                sketches.push(sketch);
            }
            sketches
        })
        .collect();

    let num_bytes = 1u64 << params.p;
    let mut out = open_out(path)?;
    put_u64(&mut out, path, num_bytes)?;
    put_u64(&mut out, path, num_docs)?;
    put_u64(&mut out, path, num_filtered as u64)?;
    for &id in &filtered_ids {
        put_u64(&mut out, path, id)?;
    }
    for sketches in &per_slice {
        for sketch in sketches {
            out.write_all(sketch.registers())
                .map_err(|e| Error::io(path, e))?;
        }
    }
    out.flush().map_err(|e| Error::io(path, e))?;
    info!("spilled {num_filtered} color sketches to {}", path.display());
    Ok(())
}

/// Sketch the documents of `source` (the transpose of the color lists) and
/// spill to `path` (doc-sketch spill layout: no doc count, no id array).
///
/// Workers iterate disjoint class slices but touch arbitrary documents, so
/// each owns a private full-length sketch vector; the reduction is the
/// commutative HLL union.
pub fn sketch_documents<S: ColorSource + Sync>(
    source: &S,
    params: &SketchParams,
    path: &Path,
) -> Result<()> {
    params.validate()?;

    let num_docs = source.num_docs() as usize;
    let num_color_classes = source.num_color_classes();
    if num_color_classes < params.num_threads {
        return Err(Error::InfeasibleParams(format!(
            "there are only {num_color_classes} lists: reduce the number of threads"
        )));
    }

    let sizes: Vec<usize> = (0..num_color_classes)
        .map(|id| source.list_size(id))
        .collect();
    let slices = balance_slices(&sizes, params.num_threads);

    let per_worker: Vec<Vec<HllSketch>> = slices
        .par_iter()
        .map(|range| {
            let mut sketches = vec![HllSketch::new(params.p); num_docs];
            for color_id in range.clone() {
                for doc in source.colors(color_id) {
                    sketches[doc as usize].add(color_id as u64);
                }
            }
            sketches
        })
        .collect();

    let mut merged = per_worker
        .into_iter()
        .reduce(|mut acc, worker| {
            for (a, w) in acc.iter_mut().zip(&worker) {
                a.merge(w);
            }
            acc
        })
        .unwrap_or_default();
    if merged.is_empty() {
        merged = vec![HllSketch::new(params.p); num_docs];
    }

    let num_bytes = 1u64 << params.p;
    let mut out = open_out(path)?;
    put_u64(&mut out, path, num_bytes)?;
    put_u64(&mut out, path, num_docs as u64)?;
    for sketch in &merged {
        out.write_all(sketch.registers())
            .map_err(|e| Error::io(path, e))?;
    }
    out.flush().map_err(|e| Error::io(path, e))?;
    info!("spilled {num_docs} document sketches to {}", path.display());
    Ok(())
}

/// Deserialized spill file: flat register bytes, one point per sketch.
#[derive(Debug)]
pub struct SketchPoints {
    pub num_bytes_per_point: usize,
    /// Universe size; absent in the doc-sketch variant.
    pub num_docs: Option<u64>,
    /// Original class ids; absent in the doc-sketch variant.
    pub ids: Option<Vec<u64>>,
    pub num_points: usize,
    pub registers: Vec<u8>,
}

fn get_u64(r: &mut impl Read, path: &Path) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| Error::io(path, e))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_points(
    r: &mut impl Read,
    path: &Path,
    num_points: usize,
    num_bytes_per_point: usize,
) -> Result<Vec<u8>> {
    let mut registers = vec![0u8; num_points * num_bytes_per_point];
    r.read_exact(&mut registers).map_err(|e| Error::io(path, e))?;
    Ok(registers)
}

/// Read a color-sketch spill file (the variant carrying ids and num_docs).
pub fn read_color_sketches(path: &Path) -> Result<SketchPoints> {
    let mut r = BufReader::new(File::open(path).map_err(|e| Error::io(path, e))?);
    let num_bytes_per_point = get_u64(&mut r, path)? as usize;
    let num_docs = get_u64(&mut r, path)?;
    let num_points = get_u64(&mut r, path)? as usize;
    let mut ids = Vec::with_capacity(num_points);
    for _ in 0..num_points {
        ids.push(get_u64(&mut r, path)?);
    }
    let registers = read_points(&mut r, path, num_points, num_bytes_per_point)?;
    Ok(SketchPoints {
        num_bytes_per_point,
        num_docs: Some(num_docs),
        ids: Some(ids),
        num_points,
        registers,
    })
}

/// Read a doc-sketch spill file (points only).
pub fn read_doc_sketches(path: &Path) -> Result<SketchPoints> {
    let mut r = BufReader::new(File::open(path).map_err(|e| Error::io(path, e))?);
    let num_bytes_per_point = get_u64(&mut r, path)? as usize;
    let num_points = get_u64(&mut r, path)? as usize;
    let registers = read_points(&mut r, path, num_points, num_bytes_per_point)?;
    Ok(SketchPoints {
        num_bytes_per_point,
        num_docs: None,
        ids: None,
        num_points,
        registers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecListSource;
    use tempfile::tempdir;

    #[test]
    fn test_hll_merge_is_union() {
        let mut a = HllSketch::new(6);
        let mut b = HllSketch::new(6);
        let mut both = HllSketch::new(6);
        for v in 0..500u64 {
            if v % 2 == 0 {
                a.add(v);
            } else {
                b.add(v);
            }
            both.add(v);
        }
        a.merge(&b);
        assert_eq!(a.registers(), both.registers());
    }

    #[test]
    fn test_balance_slices_covers_all() {
        let sizes = vec![5, 1, 1, 10, 2, 2, 2, 7];
        for t in 1..=4 {
            let slices = balance_slices(&sizes, t);
            assert!(slices.len() <= t);
            assert_eq!(slices.first().unwrap().start, 0);
            assert_eq!(slices.last().unwrap().end, sizes.len());
            for pair in slices.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
        }
    }

    #[test]
    fn test_color_spill_roundtrip_and_filter() {
        let lists = vec![
            vec![0, 1, 2, 3, 4, 5, 6, 7], // density 1.0: kept (right = 1)
            vec![0, 1],
            vec![3],
            vec![2, 4, 6],
        ];
        let source = VecListSource::new(&lists, 8);
        let dir = tempdir().unwrap();
        let path = dir.path().join("sketches.bin");
        let params = SketchParams {
            p: 4,
            num_threads: 2,
            left: 0.2, // drops the singleton list (1 <= 1.6)
            right: 1.0,
        };
        sketch_color_lists(&source, &params, &path).unwrap();

        let points = read_color_sketches(&path).unwrap();
        assert_eq!(points.num_bytes_per_point, 16);
        assert_eq!(points.num_docs, Some(8));
        assert_eq!(points.ids.as_deref(), Some(&[0u64, 1, 3][..]));
        assert_eq!(points.num_points, 3);
        assert_eq!(points.registers.len(), 3 * 16);

        // slice-parallel output must equal a sequential sketch
        let mut expected = HllSketch::new(4);
        for &doc in &lists[0] {
            expected.add(doc as u64);
        }
        assert_eq!(&points.registers[..16], expected.registers());
    }

    #[test]
    fn test_too_many_threads_is_infeasible() {
        let lists = vec![vec![0], vec![1]];
        let source = VecListSource::new(&lists, 4);
        let dir = tempdir().unwrap();
        let path = dir.path().join("sketches.bin");
        let params = SketchParams {
            p: 4,
            num_threads: 3,
            ..SketchParams::default()
        };
        let err = sketch_color_lists(&source, &params, &path).unwrap_err();
        assert!(matches!(err, crate::error::Error::InfeasibleParams(_)));
    }

    #[test]
    fn test_doc_sketches_are_transposed() {
        let lists = vec![vec![0, 2], vec![1, 2], vec![2]];
        let source = VecListSource::new(&lists, 3);
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc_sketches.bin");
        let params = SketchParams {
            p: 4,
            num_threads: 2,
            ..SketchParams::default()
        };
        sketch_documents(&source, &params, &path).unwrap();

        let points = read_doc_sketches(&path).unwrap();
        assert_eq!(points.num_points, 3);
        // doc 2 appears in classes {0, 1, 2}
        let mut expected = HllSketch::new(4);
        expected.add(0);
        expected.add(1);
        expected.add(2);
        assert_eq!(&points.registers[32..48], expected.registers());
    }
}
