//! On-disk artifact formats.
//!
//! Every file shares the same framing: little-endian integers, a fixed
//! header (magic u32, version u16, reserved u16), a body, and a CRC-64-ISO
//! footer with two checksums: one over the body alone, one over header
//! plus body.

pub mod crc;
mod differential;
mod hybrid;
mod index;
mod meta;
mod meta_differential;

pub use differential::DifferentialColorsFile;
pub use hybrid::HybridColorsFile;
pub use index::IndexFile;
pub use meta::MetaColorsFile;
pub use meta_differential::MetaDifferentialColorsFile;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::bits::{BitVector, RankedBitVector};
use crate::error::{Error, Result};

pub(crate) const VERSION: u16 = 1;

/// Checksumming writer maintaining two independent digests: `body_crc`
/// covers the bytes after the header, `file_crc` covers header plus body.
/// A header flip therefore trips only the file checksum and a body flip
/// trips both.
pub(crate) struct ArtifactWriter<W: Write> {
    inner: W,
    body_digest: crc::Digest,
    file_digest: crc::Digest,
    in_body: bool,
    path: PathBuf,
}

impl<W: Write> ArtifactWriter<W> {
    pub fn new(inner: W, path: &Path) -> Self {
        Self {
            inner,
            body_digest: crc::Digest::new(),
            file_digest: crc::Digest::new(),
            in_body: false,
            path: path.to_path_buf(),
        }
    }

    pub fn header(&mut self, magic: u32) -> Result<()> {
        self.put_u32(magic)?;
        self.put_u16(VERSION)?;
        self.put_u16(0)?; // reserved
        self.in_body = true;
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .map_err(|e| Error::io(&self.path, e))?;
        self.file_digest.update(bytes);
        if self.in_body {
            self.body_digest.update(bytes);
        }
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u32_slice(&mut self, values: &[u32]) -> Result<()> {
        self.put_u64(values.len() as u64)?;
        for &v in values {
            self.put_u32(v)?;
        }
        Ok(())
    }

    pub fn put_u64_slice(&mut self, values: &[u64]) -> Result<()> {
        self.put_u64(values.len() as u64)?;
        for &v in values {
            self.put_u64(v)?;
        }
        Ok(())
    }

    pub fn put_bit_vector(&mut self, bv: &BitVector) -> Result<()> {
        self.put_u64(bv.len())?;
        for &word in bv.words() {
            self.put_u64(word)?;
        }
        Ok(())
    }

    /// Write the footer (body crc, file crc) and flush.
    pub fn finish(mut self) -> Result<u64> {
        let body_crc = self.body_digest.finalize();
        let file_crc = self.file_digest.finalize();
        self.inner
            .write_all(&body_crc.to_le_bytes())
            .and_then(|_| self.inner.write_all(&file_crc.to_le_bytes()))
            .and_then(|_| self.inner.flush())
            .map_err(|e| Error::io(&self.path, e))?;
        Ok(body_crc)
    }
}

/// Checksumming reader mirroring `ArtifactWriter`'s two-digest split.
pub(crate) struct ArtifactReader<R: Read> {
    inner: R,
    body_digest: crc::Digest,
    file_digest: crc::Digest,
    in_body: bool,
    path: PathBuf,
}

impl<R: Read> ArtifactReader<R> {
    pub fn new(inner: R, path: &Path) -> Self {
        Self {
            inner,
            body_digest: crc::Digest::new(),
            file_digest: crc::Digest::new(),
            in_body: false,
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn expect_header(&mut self, magic: u32) -> Result<()> {
        let got = self.get_u32()?;
        if got != magic {
            return Err(Error::format(
                &self.path,
                format!("magic mismatch: expected {magic:#010x}, got {got:#010x}"),
            ));
        }
        let version = self.get_u16()?;
        if version != VERSION {
            return Err(Error::format(
                &self.path,
                format!("unsupported version {version} (expected {VERSION})"),
            ));
        }
        self.get_u16()?; // reserved
        self.in_body = true;
        Ok(())
    }

    pub fn get_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::io(&self.path, e))?;
        self.file_digest.update(buf);
        if self.in_body {
            self.body_digest.update(buf);
        }
        Ok(())
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.get_bytes(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.get_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.get_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn get_u32_vec(&mut self) -> Result<Vec<u32>> {
        let len = self.get_u64()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.get_u32()?);
        }
        Ok(out)
    }

    pub fn get_u64_vec(&mut self) -> Result<Vec<u64>> {
        let len = self.get_u64()? as usize;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.get_u64()?);
        }
        Ok(out)
    }

    pub fn get_bit_vector(&mut self) -> Result<BitVector> {
        let num_bits = self.get_u64()?;
        let num_words = num_bits.div_ceil(64) as usize;
        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            words.push(self.get_u64()?);
        }
        Ok(BitVector::from_raw_parts(words, num_bits))
    }

    pub fn get_ranked_bit_vector(&mut self) -> Result<RankedBitVector> {
        Ok(RankedBitVector::new(self.get_bit_vector()?))
    }

    /// Verify both footer checksums against the digested stream.
    pub fn verify_footer(self) -> Result<()> {
        let mut inner = self.inner;
        let path = self.path;
        let expected_body = self.body_digest.finalize();
        let expected_file = self.file_digest.finalize();
        let mut buf = [0u8; 8];
        inner.read_exact(&mut buf).map_err(|e| Error::io(&path, e))?;
        let body_crc = u64::from_le_bytes(buf);
        inner.read_exact(&mut buf).map_err(|e| Error::io(&path, e))?;
        let file_crc = u64::from_le_bytes(buf);
        if body_crc != expected_body {
            return Err(Error::format(
                &path,
                format!(
                    "body CRC64 mismatch: expected {expected_body:#018x}, stored {body_crc:#018x}"
                ),
            ));
        }
        if file_crc != expected_file {
            return Err(Error::format(
                &path,
                format!(
                    "file CRC64 mismatch: expected {expected_file:#018x}, stored {file_crc:#018x}"
                ),
            ));
        }
        Ok(())
    }
}
