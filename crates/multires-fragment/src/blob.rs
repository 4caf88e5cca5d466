//! Sources of raw fragment payload bytes.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::payload::FragmentPayload;

/// Reads and decodes the payload of one fragment from a blob store.
///
/// Implementations are shared by loader worker threads.
pub trait FragmentBlobReader: Send + Sync {
    /// Read `length` bytes at `offset` and decode them as the payload of `id`.
    fn read(&self, id: u32, offset: u64, length: u32) -> io::Result<FragmentPayload>;
}

impl<R: FragmentBlobReader + ?Sized> FragmentBlobReader for Arc<R> {
    fn read(&self, id: u32, offset: u64, length: u32) -> io::Result<FragmentPayload> {
        (**self).read(id, offset, length)
    }
}

fn decode(bytes: &[u8]) -> io::Result<FragmentPayload> {
    FragmentPayload::decode(bytes).map_err(io::Error::from)
}

/// Blob held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryBlobReader {
    bytes: Arc<[u8]>,
}

impl MemoryBlobReader {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl FragmentBlobReader for MemoryBlobReader {
    fn read(&self, id: u32, offset: u64, length: u32) -> io::Result<FragmentPayload> {
        let start = usize::try_from(offset).map_err(|_| out_of_range(id))?;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| out_of_range(id))?;
        let bytes = self.bytes.get(start..end).ok_or_else(|| out_of_range(id))?;
        decode(bytes)
    }
}

fn out_of_range(id: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("blob range of fragment {id} lies outside the blob"),
    )
}

/// Blob stored in a file, read with a seek and an exact read per fragment.
#[derive(Debug)]
pub struct FileBlobReader {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileBlobReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(File::open(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FragmentBlobReader for FileBlobReader {
    fn read(&self, _id: u32, offset: u64, length: u32) -> io::Result<FragmentPayload> {
        let mut bytes = vec![0u8; length as usize];
        {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut bytes)?;
        }
        decode(&bytes)
    }
}
