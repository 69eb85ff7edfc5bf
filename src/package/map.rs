//! Read-only memory mapping of the package file

use std::fs::File;
use std::io;
use std::path::Path;

use log::debug;
use memmap2::Mmap;

/// Mapped view of a package, released when dropped.
pub trait PackageMap {
    fn bytes(&self) -> &[u8];
}

/// Produces mapped views of package files.
pub trait PackageMapper {
    fn map(&self, path: &Path) -> io::Result<Box<dyn PackageMap>>;
}

/// Package file mapped with `mmap(2)`.
#[derive(Debug)]
pub struct MappedPackage {
    map: Mmap,
}

impl MappedPackage {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "package file is empty",
            ));
        }

        // SAFETY: the mapping is read-only and the recovery environment does
        // not modify the package while an install is in progress.
        let map = unsafe { Mmap::map(&file)? };
        debug!("mapped {} ({} bytes)", path.display(), map.len());
        Ok(Self { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl PackageMap for MappedPackage {
    fn bytes(&self) -> &[u8] {
        &self.map
    }
}

impl Drop for MappedPackage {
    fn drop(&mut self) {
        debug!("releasing package map ({} bytes)", self.map.len());
    }
}

/// Default mapper over [`MappedPackage`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapMapper;

impl PackageMapper for MmapMapper {
    fn map(&self, path: &Path) -> io::Result<Box<dyn PackageMap>> {
        Ok(Box::new(MappedPackage::open(path)?))
    }
}
