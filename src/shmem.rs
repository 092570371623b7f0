//! Shared Memory Region (C2, spec.md §4.2): a named POSIX shared-memory
//! segment, identified by a random 64-bit id, mapped read/write by both the
//! creating and the opening endpoint.
//!
//! Built on `nix::sys::mman` + `memmap2`, the same pairing the wider
//! workspace reaches for when it needs raw mmap'd regions (`sqld`'s and
//! `libsql-sys`'s `nix` dependency with the `fs` feature; `memmap2` is the
//! maintained successor of the older `memmap` crate this workspace also
//! names).

use std::os::unix::io::AsRawFd;

use memmap2::MmapMut;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::error::{MdsError, Result};

fn shm_name(id: u64) -> String {
    format!("/mds-shm-{id:016x}")
}

/// A mapped shared-memory region. `Drop` always requests unlink of the
/// backing OS object — the creating side is nominally "the owner" (spec.md
/// §3), but the non-creating side also requests unlink on its own
/// destruction, and `shm_unlink` on an already-gone name is tolerated rather
/// than an error, so two holders racing their destructors never double-fault
/// (spec.md §8: "r is unlinked at most once even if two holders race their
/// destructors").
pub struct SharedMemoryRegion {
    pub id: u64,
    mmap: MmapMut,
    owner: bool,
}

impl SharedMemoryRegion {
    /// Creates a new region of `size` bytes with a random id. Retries with a
    /// fresh id on a name collision (spec.md §4.2).
    pub fn create(size: usize) -> Result<Self> {
        for _ in 0..8 {
            let id: u64 = rand::random();
            if id == 0 {
                continue;
            }
            match Self::create_with_id(id, size) {
                Ok(region) => return Ok(region),
                Err(MdsError::Generic(ref msg)) if msg.contains("EEXIST") => continue,
                Err(e) => return Err(e),
            }
        }
        Err(MdsError::Generic(
            "failed to allocate a shared-memory region after several id collisions".into(),
        ))
    }

    fn create_with_id(id: u64, size: usize) -> Result<Self> {
        let name = shm_name(id);
        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| MdsError::Generic(format!("shm_open({name}): {e}")))?;
        ftruncate(&fd, size as i64)
            .map_err(|e| MdsError::Generic(format!("ftruncate({name}): {e}")))?;
        let mmap = unsafe { MmapMut::map_mut(fd.as_raw_fd()) }
            .map_err(|e| MdsError::Generic(format!("mmap({name}): {e}")))?;
        Ok(Self {
            id,
            mmap,
            owner: true,
        })
    }

    /// Opens an existing region created by the other endpoint.
    pub fn open(id: u64) -> Result<Self> {
        let name = shm_name(id);
        let fd = shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty())
            .map_err(|e| MdsError::Generic(format!("shm_open({name}) for read: {e}")))?;
        let mmap = unsafe { MmapMut::map_mut(fd.as_raw_fd()) }
            .map_err(|e| MdsError::Generic(format!("mmap({name}): {e}")))?;
        Ok(Self {
            id,
            mmap,
            owner: false,
        })
    }

    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// True if this instance created the region (spec.md §3 "the creating
    /// side is the owner"); both sides unlink on drop regardless.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset.checked_add(data.len()).map_or(true, |end| end > self.mmap.len()) {
            return Err(MdsError::Protocol(format!(
                "shmem write out of bounds: offset={offset} len={} region_size={}",
                data.len(),
                self.mmap.len()
            )));
        }
        self.mmap[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        if offset.checked_add(len).map_or(true, |end| end > self.mmap.len()) {
            return Err(MdsError::Protocol(format!(
                "shmem read out of bounds: offset={offset} len={len} region_size={}",
                self.mmap.len()
            )));
        }
        Ok(&self.mmap[offset..offset + len])
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // Both the owning and the opening side request unlink on their own
        // destruction (spec.md §3); `shm_unlink` tolerating `ENOENT` is what
        // makes that safe regardless of which side gets there first.
        let name = shm_name(self.id);
        tracing::trace!(id = self.id, owner = self.owner, "unlinking shmem region");
        let _ = shm_unlink(name.as_str());
    }
}
