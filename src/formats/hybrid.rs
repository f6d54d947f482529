//! hybrid color store format: num_docs, list offsets, raw bit vector

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{ArtifactReader, ArtifactWriter};
use crate::error::{Error, Result};
use crate::hybrid::HybridColors;

const MAGIC: u32 = 0x43485942; // "CHYB"

pub struct HybridColorsFile;

impl HybridColorsFile {
    pub fn write<P: AsRef<Path>>(path: P, store: &HybridColors) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut w = ArtifactWriter::new(BufWriter::new(file), path);
        w.header(MAGIC)?;
        write_body(&mut w, store)?;
        w.finish()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<HybridColors> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut r = ArtifactReader::new(BufReader::new(file), path);
        r.expect_header(MAGIC)?;
        let store = read_body(&mut r)?;
        r.verify_footer()?;
        Ok(store)
    }
}

pub(crate) fn write_body<W: Write>(w: &mut ArtifactWriter<W>, store: &HybridColors) -> Result<()> {
    w.put_u32(store.num_docs())?;
    w.put_u64_slice(store.list_offsets())?;
    w.put_bit_vector(store.bit_vector())
}

pub(crate) fn read_body<R: Read>(r: &mut ArtifactReader<R>) -> Result<HybridColors> {
    let num_docs = r.get_u32()?;
    let list_offsets = r.get_u64_vec()?;
    if list_offsets.is_empty() {
        return Err(Error::format(r.path(), "empty list offset array"));
    }
    let colors = r.get_bit_vector()?;
    Ok(HybridColors::from_parts(num_docs, list_offsets, colors))
}
