//! meta color store format: partition endpoints, doc permutation, the meta
//! list store, and one hybrid store per partition

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::{ArtifactReader, ArtifactWriter};
use crate::error::{Error, Result};
use crate::hybrid::HybridColors;
use crate::meta::MetaColors;

const MAGIC: u32 = 0x434d4554; // "CMET"

pub struct MetaColorsFile;

impl MetaColorsFile {
    pub fn write<P: AsRef<Path>>(path: P, store: &MetaColors) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        let mut w = ArtifactWriter::new(BufWriter::new(file), path);
        w.header(MAGIC)?;
        write_body(&mut w, store)?;
        w.finish()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<MetaColors> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut r = ArtifactReader::new(BufReader::new(file), path);
        r.expect_header(MAGIC)?;
        let store = read_body(&mut r)?;
        r.verify_footer()?;
        Ok(store)
    }
}

pub(crate) fn write_body<W: Write>(w: &mut ArtifactWriter<W>, store: &MetaColors) -> Result<()> {
    w.put_u32(store.num_docs())?;
    w.put_u32_slice(store.partition_begin())?;
    w.put_u32_slice(store.doc_permutation())?;
    super::hybrid::write_body(w, store.meta_colors())?;
    w.put_u32(store.num_partitions() as u32)?;
    for p in 0..store.num_partitions() {
        super::hybrid::write_body(w, store.partial_colors(p))?;
    }
    Ok(())
}

pub(crate) fn read_body<R: Read>(r: &mut ArtifactReader<R>) -> Result<MetaColors> {
    let num_docs = r.get_u32()?;
    let partition_begin = r.get_u32_vec()?;
    let doc_permutation = r.get_u32_vec()?;
    let meta = super::hybrid::read_body(r)?;
    let num_partitions = r.get_u32()? as usize;
    if partition_begin.len() != num_partitions + 1 {
        return Err(Error::format(
            r.path(),
            format!(
                "{} partition endpoints for {num_partitions} partitions",
                partition_begin.len()
            ),
        ));
    }
    let mut partials: Vec<HybridColors> = Vec::with_capacity(num_partitions);
    for _ in 0..num_partitions {
        partials.push(super::hybrid::read_body(r)?);
    }
    Ok(MetaColors::from_parts(
        num_docs,
        partition_begin,
        doc_permutation,
        partials,
        meta,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{build_meta_from_permutation, DocPermutation};
    use crate::source::VecListSource;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_roundtrip() -> Result<()> {
        let lists = vec![vec![0, 1, 4], vec![2, 5], vec![0, 2, 3, 4]];
        let source = VecListSource::new(&lists, 6);
        let doc_perm = DocPermutation::from_parts((0..6).collect(), vec![0, 3, 6]);
        let dir = tempdir().unwrap();
        let store = build_meta_from_permutation(&source, &doc_perm, dir.path())?;

        let tmp = NamedTempFile::new().unwrap();
        MetaColorsFile::write(tmp.path(), &store)?;
        let loaded = MetaColorsFile::read(tmp.path())?;

        assert_eq!(loaded.num_docs(), 6);
        assert_eq!(loaded.num_partitions(), 2);
        assert_eq!(loaded.num_partials_before(), store.num_partials_before());
        for (id, list) in lists.iter().enumerate() {
            let got: Vec<u32> = loaded.colors(id).collect();
            assert_eq!(&got, list, "class {id}");
        }
        Ok(())
    }
}
