use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub enum Handle {
    File(Arc<OwnedFd>),
    Dir(Arc<OwnedFd>),
}

impl Handle {
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Handle::File(fd) | Handle::Dir(fd) => fd.as_fd(),
        }
    }
}

/// Open descriptors keyed by the `fh` handed to the kernel.
///
/// Ids start at 1 and are never reused within a mount.
#[derive(Debug)]
pub struct HandleTable {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, Handle>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&self, fd: OwnedFd) -> u64 {
        self.insert(Handle::File(Arc::new(fd)))
    }

    pub fn insert_dir(&self, fd: OwnedFd) -> u64 {
        self.insert(Handle::Dir(Arc::new(fd)))
    }

    /// `EBADF` for unknown ids and for directory handles.
    pub fn file(&self, id: u64) -> fuse3::Result<Handle> {
        self.get(id, true)
            .ok_or_else(|| fuse3::Errno::from(libc::EBADF))
    }

    /// `EBADF` for unknown ids and for file handles.
    pub fn dir(&self, id: u64) -> fuse3::Result<Handle> {
        self.get(id, false)
            .ok_or_else(|| fuse3::Errno::from(libc::EBADF))
    }

    pub fn remove(&self, id: u64) -> fuse3::Result<()> {
        self.entries
            .write()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| fuse3::Errno::from(libc::EBADF))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    fn insert(&self, handle: Handle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().unwrap().insert(id, handle);
        id
    }

    fn get(&self, id: u64, want_file: bool) -> Option<Handle> {
        let guard = self.entries.read().unwrap();
        let handle = guard.get(&id)?;
        match (want_file, handle) {
            (true, Handle::File(_)) | (false, Handle::Dir(_)) => Some(handle.clone()),
            _ => None,
        }
    }
}
