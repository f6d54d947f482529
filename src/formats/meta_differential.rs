//! meta-differential store format: the outer differential store for the
//! meta layer plus one differential store per partition

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{ArtifactReader, ArtifactWriter};
use crate::differential::DifferentialColors;
use crate::error::{Error, Result};
use crate::meta_differential::MetaDifferentialColors;

const MAGIC: u32 = 0x434d4446; // "CMDF"

pub struct MetaDifferentialColorsFile;

impl MetaDifferentialColorsFile {
    pub fn write<P: AsRef<Path>>(path: P, store: &MetaDifferentialColors) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut w = ArtifactWriter::new(BufWriter::new(file), path);
        w.header(MAGIC)?;
        write_body(&mut w, store)?;
        w.finish()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<MetaDifferentialColors> {
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
    store: &MetaDifferentialColors,
) -> Result<()> {
    w.put_u32(store.num_docs())?;
    w.put_u32_slice(store.partition_begin())?;
    w.put_u64_slice(store.num_partials_before())?;
    w.put_u32_slice(store.doc_permutation())?;
    super::differential::write_body(w, store.meta_store())?;
    w.put_u32(store.num_partitions() as u32)?;
    for p in 0..store.num_partitions() {
        super::differential::write_body(w, store.partition_store(p))?;
    }
    Ok(())
}

pub(crate) fn read_body<R: Read>(r: &mut ArtifactReader<R>) -> Result<MetaDifferentialColors> {
    let num_docs = r.get_u32()?;
    let partition_begin = r.get_u32_vec()?;
    let num_partials_before = r.get_u64_vec()?;
    let doc_permutation = r.get_u32_vec()?;
    let meta = super::differential::read_body(r)?;
    let num_partitions = r.get_u32()? as usize;
    if partition_begin.len() != num_partitions + 1
        || num_partials_before.len() != num_partitions + 1
    {
        return Err(Error::format(r.path(), "partition array length mismatch"));
    }
    let mut partitions: Vec<DifferentialColors> = Vec::with_capacity(num_partitions);
    for _ in 0..num_partitions {
        partitions.push(super::differential::read_body(r)?);
    }
    Ok(MetaDifferentialColors::from_parts(
        num_docs,
        partition_begin,
        num_partials_before,
        doc_permutation,
        partitions,
        meta,
    ))
}
