//! Self-describing array files
//!
//! Each segment array lives in its own file: a 24-byte header followed by a
//! raw contiguous little-endian payload. Readers memory-map the file and
//! hand out typed slices over the payload region.
//!
//! Header layout (little-endian):
//!
//!   Magic: "RCXA" (4 bytes)
//!   Version: u16
//!   DType: u8 (0=i64, 1=i32, 2=f32, 3=u64)
//!   Reserved: u8
//!   Count: u64 (element count)
//!   HeaderCRC32: u32 (CRC32 of the 16 bytes above)
//!   Padding: 4 zero bytes, so the payload starts 8-byte aligned

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::error::{RecollexError, Result};

pub const ARRAY_MAGIC: [u8; 4] = *b"RCXA";
pub const ARRAY_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 24;

/// Element type of an array file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    I64,
    I32,
    F32,
    U64,
}

impl DType {
    pub fn code(self) -> u8 {
        match self {
            DType::I64 => 0,
            DType::I32 => 1,
            DType::F32 => 2,
            DType::U64 => 3,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(DType::I64),
            1 => Ok(DType::I32),
            2 => Ok(DType::F32),
            3 => Ok(DType::U64),
            other => Err(RecollexError::Corruption(format!(
                "unknown array dtype code {other}"
            ))),
        }
    }

    pub fn elem_size(self) -> usize {
        match self {
            DType::I64 | DType::U64 => 8,
            DType::I32 | DType::F32 => 4,
        }
    }
}

/// Element types storable in an array file
pub trait ArrayElem: Copy + 'static {
    const DTYPE: DType;
    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()>;
}

impl ArrayElem for i64 {
    const DTYPE: DType = DType::I64;
    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }
}

impl ArrayElem for i32 {
    const DTYPE: DType = DType::I32;
    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }
}

impl ArrayElem for f32 {
    const DTYPE: DType = DType::F32;
    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }
}

impl ArrayElem for u64 {
    const DTYPE: DType = DType::U64;
    fn write_le<W: Write>(self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }
}

fn encode_header(dtype: DType, count: u64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&ARRAY_MAGIC);
    header[4..6].copy_from_slice(&ARRAY_VERSION.to_le_bytes());
    header[6] = dtype.code();
    header[8..16].copy_from_slice(&count.to_le_bytes());
    let crc = crc32fast::hash(&header[0..16]);
    header[16..20].copy_from_slice(&crc.to_le_bytes());
    header
}

/// Write an array file and fsync it
pub fn write_array<T: ArrayElem>(path: &Path, values: &[T]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&encode_header(T::DTYPE, values.len() as u64))?;
    for &v in values {
        v.write_le(&mut writer)?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(())
}

/// A memory-mapped array file
pub struct ArrayFile {
    mmap: Mmap,
    dtype: DType,
    count: usize,
}

impl ArrayFile {
    /// Map a file read-only and validate its header
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_SIZE {
            return Err(RecollexError::Corruption(format!(
                "array file {} too short for header",
                path.display()
            )));
        }
        if mmap[0..4] != ARRAY_MAGIC {
            return Err(RecollexError::Corruption(format!(
                "bad array magic in {}",
                path.display()
            )));
        }
        let version = u16::from_le_bytes([mmap[4], mmap[5]]);
        if version != ARRAY_VERSION {
            return Err(RecollexError::Corruption(format!(
                "unsupported array version {version} in {}",
                path.display()
            )));
        }
        let dtype = DType::from_code(mmap[6])?;
        let count = u64::from_le_bytes(mmap[8..16].try_into().expect("8 bytes")) as usize;
        let stored_crc = u32::from_le_bytes(mmap[16..20].try_into().expect("4 bytes"));
        if crc32fast::hash(&mmap[0..16]) != stored_crc {
            return Err(RecollexError::Corruption(format!(
                "array header CRC mismatch in {}",
                path.display()
            )));
        }
        let expected = HEADER_SIZE + count * dtype.elem_size();
        if mmap.len() != expected {
            return Err(RecollexError::Corruption(format!(
                "array file {} length {} does not match header ({expected})",
                path.display(),
                mmap.len()
            )));
        }
        Ok(Self { mmap, dtype, count })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Typed view over the payload
    pub fn slice<T: ArrayElem>(&self) -> Result<&[T]> {
        if self.dtype != T::DTYPE {
            return Err(RecollexError::Corruption(format!(
                "array dtype mismatch: stored {:?}, requested {:?}",
                self.dtype,
                T::DTYPE
            )));
        }
        if cfg!(target_endian = "big") {
            return Err(RecollexError::Corruption(
                "array files require a little-endian target".to_string(),
            ));
        }
        let bytes = &self.mmap[HEADER_SIZE..];
        // SAFETY: length and alignment are checked; the map outlives the slice.
        let (prefix, aligned, suffix) = unsafe { bytes.align_to::<T>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(RecollexError::Corruption(
                "array payload is not aligned".to_string(),
            ));
        }
        Ok(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_all_dtypes() {
        let dir = tempdir().unwrap();

        let p = dir.path().join("a_i64");
        write_array(&p, &[0i64, -5, 1 << 40]).unwrap();
        assert_eq!(
            ArrayFile::open(&p).unwrap().slice::<i64>().unwrap(),
            &[0i64, -5, 1 << 40]
        );

        let p = dir.path().join("a_i32");
        write_array(&p, &[7i32, 30521]).unwrap();
        assert_eq!(
            ArrayFile::open(&p).unwrap().slice::<i32>().unwrap(),
            &[7i32, 30521]
        );

        let p = dir.path().join("a_f32");
        write_array(&p, &[0.5f32, 1.25]).unwrap();
        assert_eq!(
            ArrayFile::open(&p).unwrap().slice::<f32>().unwrap(),
            &[0.5f32, 1.25]
        );

        let p = dir.path().join("a_u64");
        write_array(&p, &[1u64, u64::MAX]).unwrap();
        assert_eq!(
            ArrayFile::open(&p).unwrap().slice::<u64>().unwrap(),
            &[1u64, u64::MAX]
        );
    }

    #[test]
    fn test_empty_array() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("empty");
        write_array::<f32>(&p, &[]).unwrap();
        let arr = ArrayFile::open(&p).unwrap();
        assert!(arr.is_empty());
        assert!(arr.slice::<f32>().unwrap().is_empty());
    }

    #[test]
    fn test_dtype_mismatch() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("arr");
        write_array(&p, &[1i32, 2]).unwrap();
        let arr = ArrayFile::open(&p).unwrap();
        assert!(arr.slice::<f32>().is_err());
        assert!(arr.slice::<i32>().is_ok());
    }

    #[test]
    fn test_header_corruption_detected() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("arr");
        write_array(&p, &[1i64, 2, 3]).unwrap();

        // Flip a count byte: CRC catches it
        let mut bytes = std::fs::read(&p).unwrap();
        bytes[9] ^= 0xff;
        std::fs::write(&p, &bytes).unwrap();
        assert!(matches!(
            ArrayFile::open(&p),
            Err(RecollexError::Corruption(_))
        ));
    }

    #[test]
    fn test_truncated_payload_detected() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("arr");
        write_array(&p, &[1i64, 2, 3]).unwrap();
        let bytes = std::fs::read(&p).unwrap();
        std::fs::write(&p, &bytes[..bytes.len() - 8]).unwrap();
        assert!(matches!(
            ArrayFile::open(&p),
            Err(RecollexError::Corruption(_))
        ));
    }
}
