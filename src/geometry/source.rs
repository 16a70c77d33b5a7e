//! Random-access byte sources for geometry files.

use crate::decomp_error::DecompError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Positional reads from a geometry file.
pub trait BlockSource {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DecompError>;

    /// Total length of the file in bytes.
    fn byte_len(&self) -> Result<u64, DecompError>;
}

impl<S: BlockSource + ?Sized> BlockSource for &S {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DecompError> {
        (**self).read_at(offset, buf)
    }

    fn byte_len(&self) -> Result<u64, DecompError> {
        (**self).byte_len()
    }
}

/// A file on disk, opened on the first read.
///
/// Ranks outside the reading group never read the body, so they never open
/// the file.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DecompError> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            log::debug!("opening geometry file {}", self.path.display());
            *guard = Some(File::open(&self.path)?);
        }
        let end = offset.checked_add(buf.len() as u64).ok_or_else(|| {
            DecompError::format(format!("read of {} bytes at offset {offset} overflows", buf.len()))
        })?;
        if let Some(file) = guard.as_mut() {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf).map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => DecompError::format(format!(
                    "{} ends before byte {end}",
                    self.path.display()
                )),
                _ => DecompError::Io(e),
            })?;
        }
        Ok(())
    }

    fn byte_len(&self) -> Result<u64, DecompError> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            log::debug!("opening geometry file {}", self.path.display());
            *guard = Some(File::open(&self.path)?);
        }
        match guard.as_ref() {
            Some(file) => Ok(file.metadata()?.len()),
            None => Ok(0),
        }
    }
}

/// An in-memory geometry file.
#[derive(Clone, Debug)]
pub struct MemorySource(Bytes);

impl MemorySource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }
}

impl BlockSource for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DecompError> {
        let overflow = || {
            DecompError::format(format!("read of {} bytes at offset {offset} overflows", buf.len()))
        };
        let start = usize::try_from(offset).map_err(|_| overflow())?;
        let end = start.checked_add(buf.len()).ok_or_else(overflow)?;
        if end > self.0.len() {
            return Err(DecompError::format(format!(
                "geometry ends at byte {}, read wanted bytes {start}..{end}",
                self.0.len()
            )));
        }
        buf.copy_from_slice(&self.0[start..end]);
        Ok(())
    }

    fn byte_len(&self) -> Result<u64, DecompError> {
        Ok(self.0.len() as u64)
    }
}
