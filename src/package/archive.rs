//! Archive container access over the mapped package bytes

use std::io::{self, Cursor, Write};

use log::debug;
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("not a valid archive: {0}")]
    Invalid(String),

    #[error("entry #{0} does not exist")]
    NoSuchEntry(usize),

    #[error("entry is damaged: {0}")]
    Damaged(String),

    #[error("entry truncated: expected {expected} bytes, copied {copied}")]
    Truncated { expected: u64, copied: u64 },

    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Handle to an entry found by [`PackageArchive::find_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryId(pub usize);

/// An opened archive. Dropping the value closes it.
pub trait PackageArchive {
    fn find_entry(&mut self, name: &str) -> Option<EntryId>;

    /// Write the decompressed contents of `entry` to `out`.
    fn extract_entry(&mut self, entry: EntryId, out: &mut dyn Write) -> Result<u64, ArchiveError>;
}

/// Zip archive read straight out of the package map.
pub struct ZipPackage<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> ZipPackage<'a> {
    pub fn open(bytes: &'a [u8]) -> Result<Self, ArchiveError> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ArchiveError::Invalid(e.to_string()))?;
        debug!("opened archive with {} entries", archive.len());
        Ok(Self { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }
}

impl PackageArchive for ZipPackage<'_> {
    fn find_entry(&mut self, name: &str) -> Option<EntryId> {
        let found = self.archive.index_for_name(name).map(EntryId);
        debug!("find entry {name}: {found:?}");
        found
    }

    fn extract_entry(&mut self, entry: EntryId, out: &mut dyn Write) -> Result<u64, ArchiveError> {
        let mut file = self.archive.by_index(entry.0).map_err(|e| match e {
            ZipError::FileNotFound => ArchiveError::NoSuchEntry(entry.0),
            other => ArchiveError::Damaged(other.to_string()),
        })?;
        let expected = file.size();

        // Read errors (bad deflate stream, CRC mismatch) surface from the zip
        // reader; write errors from `out`. Keep them apart.
        let mut copied = 0u64;
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = match io::Read::read(&mut file, &mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::Damaged(e.to_string())),
            };
            out.write_all(&buf[..n])?;
            copied += n as u64;
        }
        out.flush()?;

        if copied != expected {
            return Err(ArchiveError::Truncated { expected, copied });
        }
        debug!("extracted entry #{} ({copied} bytes)", entry.0);
        Ok(copied)
    }
}

impl Drop for ZipPackage<'_> {
    fn drop(&mut self) {
        debug!("closing archive");
    }
}
