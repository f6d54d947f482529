//! differential color store format: num_docs, reference/list offsets,
//! position map, raw bit vector, cluster-boundary bit vector

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{ArtifactReader, ArtifactWriter};
use crate::differential::DifferentialColors;
use crate::error::{Error, Result};

const MAGIC: u32 = 0x43444946; // "CDIF"

pub struct DifferentialColorsFile;

impl DifferentialColorsFile {
    pub fn write<P: AsRef<Path>>(path: P, store: &DifferentialColors) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut w = ArtifactWriter::new(BufWriter::new(file), path);
        w.header(MAGIC)?;
        write_body(&mut w, store)?;
        w.finish()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<DifferentialColors> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut r = ArtifactReader::new(BufReader::new(file), path);
        r.expect_header(MAGIC)?;
        let store = read_body(&mut r)?;
        r.verify_footer()?;
        Ok(store)
    }
}

pub(crate) fn write_body<W: Write>(
    w: &mut ArtifactWriter<W>,
    store: &DifferentialColors,
) -> Result<()> {
    w.put_u32(store.num_docs())?;
    w.put_u64_slice(store.reference_offsets())?;
    w.put_u64_slice(store.list_offsets())?;
    w.put_u32_slice(store.positions())?;
    w.put_bit_vector(store.bit_vector())?;
    w.put_bit_vector(store.cluster_bits().bits())
}

pub(crate) fn read_body<R: Read>(r: &mut ArtifactReader<R>) -> Result<DifferentialColors> {
    let num_docs = r.get_u32()?;
    let reference_offsets = r.get_u64_vec()?;
    let list_offsets = r.get_u64_vec()?;
    let positions = r.get_u32_vec()?;
    if reference_offsets.is_empty() || list_offsets.is_empty() {
        return Err(Error::format(r.path(), "empty offset array"));
    }
    if positions.len() != list_offsets.len() - 1 {
        return Err(Error::format(
            r.path(),
            format!(
                "position map covers {} classes, store has {}",
                positions.len(),
                list_offsets.len() - 1
            ),
        ));
    }
    let colors = r.get_bit_vector()?;
    let clusters = r.get_ranked_bit_vector()?;
    Ok(DifferentialColors::from_parts(
        num_docs,
        reference_offsets,
        list_offsets,
        positions,
        colors,
        clusters,
    ))
}
