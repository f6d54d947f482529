//! Whole-index artifact: store kind tag, filename catalog, opaque K2U/U2C
//! payloads, then the store body. Written atomically (temp file + rename).

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use super::{ArtifactReader, ArtifactWriter};
use crate::catalog::FilenameCatalog;
use crate::error::{Error, Result};
use crate::index::{ColorStoreKind, Index};

const MAGIC: u32 = 0x43494458; // "CIDX"

const KIND_HYBRID: u8 = 1;
const KIND_DIFFERENTIAL: u8 = 2;
const KIND_META: u8 = 3;
const KIND_META_DIFFERENTIAL: u8 = 4;

pub struct IndexFile;

impl IndexFile {
    /// Write the index artifact atomically: the bytes land in a temp file
    /// in the destination directory, renamed into place only on success.
    pub fn write<P: AsRef<Path>>(path: P, index: &Index) -> Result<()> {
        let path = path.as_ref();
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let tmp = match dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(|e| Error::io(path, e))?;

        {
            let mut w = ArtifactWriter::new(BufWriter::new(tmp.as_file()), path);
            w.header(MAGIC)?;
            write_body(&mut w, index)?;
            w.finish()?;
        }

        tmp.persist(path)
            .map_err(|e| Error::io(path, e.error))?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Index> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut r = ArtifactReader::new(BufReader::new(file), path);
        r.expect_header(MAGIC)?;
        let index = read_body(&mut r)?;
        r.verify_footer()?;
        Ok(index)
    }
}

fn write_body<W: Write>(w: &mut ArtifactWriter<W>, index: &Index) -> Result<()> {
    let kind = match index.store() {
        ColorStoreKind::Hybrid(_) => KIND_HYBRID,
        ColorStoreKind::Differential(_) => KIND_DIFFERENTIAL,
        ColorStoreKind::Meta(_) => KIND_META,
        ColorStoreKind::MetaDifferential(_) => KIND_META_DIFFERENTIAL,
    };
    w.put_bytes(&[kind])?;

    let names = index.filenames().names();
    w.put_u64(names.len() as u64)?;
    for name in names {
        w.put_u64(name.len() as u64)?;
        w.put_bytes(name.as_bytes())?;
    }
    w.put_u64(index.k2u().len() as u64)?;
    w.put_bytes(index.k2u())?;
    w.put_u64(index.u2c().len() as u64)?;
    w.put_bytes(index.u2c())?;

    match index.store() {
        ColorStoreKind::Hybrid(s) => super::hybrid::write_body(w, s),
        ColorStoreKind::Differential(s) => super::differential::write_body(w, s),
        ColorStoreKind::Meta(s) => super::meta::write_body(w, s),
        ColorStoreKind::MetaDifferential(s) => super::meta_differential::write_body(w, s),
    }
}

fn read_body<R: Read>(r: &mut ArtifactReader<R>) -> Result<Index> {
    let mut kind = [0u8; 1];
    r.get_bytes(&mut kind)?;

    let num_names = r.get_u64()? as usize;
    let mut names = Vec::with_capacity(num_names);
    for _ in 0..num_names {
        let len = r.get_u64()? as usize;
        let mut bytes = vec![0u8; len];
        r.get_bytes(&mut bytes)?;
        let name = String::from_utf8(bytes)
            .map_err(|_| Error::format(r.path(), "filename is not valid UTF-8"))?;
        names.push(name);
    }
    let k2u_len = r.get_u64()? as usize;
    let mut k2u = vec![0u8; k2u_len];
    r.get_bytes(&mut k2u)?;
    let u2c_len = r.get_u64()? as usize;
    let mut u2c = vec![0u8; u2c_len];
    r.get_bytes(&mut u2c)?;

    let colors = match kind[0] {
        KIND_HYBRID => ColorStoreKind::Hybrid(super::hybrid::read_body(r)?),
        KIND_DIFFERENTIAL => ColorStoreKind::Differential(super::differential::read_body(r)?),
        KIND_META => ColorStoreKind::Meta(super::meta::read_body(r)?),
        KIND_META_DIFFERENTIAL => {
            ColorStoreKind::MetaDifferential(super::meta_differential::read_body(r)?)
        }
        other => {
            return Err(Error::format(
                r.path(),
                format!("unknown store kind tag {other}"),
            ))
        }
    };

    Ok(Index::new(colors, FilenameCatalog::new(names), k2u, u2c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecListSource;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_with_payloads() -> Result<()> {
        let lists = vec![vec![0, 1, 2], vec![3, 4]];
        let source = VecListSource::new(&lists, 6);
        let catalog = FilenameCatalog::new(
            (0..6).map(|i| format!("sample{i}.fa")).collect(),
        );
        let index = Index::build_hybrid(&source, catalog, vec![1, 2, 3], vec![9, 8])?;

        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cidx");
        IndexFile::write(&path, &index)?;
        let loaded = IndexFile::read(&path)?;

        assert_eq!(loaded.num_docs(), 6);
        assert_eq!(loaded.num_color_classes(), 2);
        assert_eq!(loaded.k2u(), &[1, 2, 3]);
        assert_eq!(loaded.u2c(), &[9, 8]);
        assert_eq!(loaded.filenames().filename(0), "sample0.fa");
        for (id, list) in lists.iter().enumerate() {
            let got: Vec<u32> = loaded.colors(id).collect();
            assert_eq!(&got, list);
        }
        Ok(())
    }

    #[test]
    fn test_write_is_atomic_over_existing_file() -> Result<()> {
        let lists = vec![vec![0]];
        let source = VecListSource::new(&lists, 2);
        let index = Index::build_hybrid(&source, FilenameCatalog::default(), vec![], vec![])?;

        let dir = tempdir().unwrap();
        let path = dir.path().join("index.cidx");
        std::fs::write(&path, b"stale contents").unwrap();
        IndexFile::write(&path, &index)?;
        let loaded = IndexFile::read(&path)?;
        assert_eq!(loaded.num_color_classes(), 1);
        Ok(())
    }
}
