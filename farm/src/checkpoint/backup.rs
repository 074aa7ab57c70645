//! Whole-file snapshot rotation.
//!
//! The live datafile is the `-master-00` snapshot; before every
//! checkpoint flush the existing snapshots shift up by one so a crash
//! mid-write always leaves at least one consistent file behind.

use once_cell::sync::Lazy;
use std::{collections::BTreeMap, fs, io, path::PathBuf};
use tracing::debug;

static MASTER_AFFIX: Lazy<String> = Lazy::new(|| "-master-".to_owned());

/// File name of the `i`-th snapshot; index 0 is the live datafile.
pub fn snapshot_name(name: &str, i: usize) -> String {
    format!("{name}{}{i:02}.db", *MASTER_AFFIX)
}

/// The little slice of filesystem the rotation needs. Swapped for an
/// in-memory map in tests.
pub trait BlobStore {
    fn exists(&self, name: &str) -> bool;
    fn copy(&mut self, from: &str, to: &str) -> io::Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;
}

#[derive(Debug)]
pub struct FsBlobs {
    root: PathBuf,
}

impl FsBlobs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl BlobStore for FsBlobs {
    fn exists(&self, name: &str) -> bool {
        self.root.join(name).exists()
    }

    fn copy(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::copy(self.root.join(from), self.root.join(to)).map(|_| ())
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.root.join(from), self.root.join(to))
    }
}

#[derive(Debug, Default)]
pub struct MemBlobs {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemBlobs {
    pub fn insert(&mut self, name: &str, bytes: Vec<u8>) {
        self.blobs.insert(name.to_owned(), bytes);
    }

    pub fn get(&self, name: &str) -> Option<&Vec<u8>> {
        self.blobs.get(name)
    }
}

impl BlobStore for MemBlobs {
    fn exists(&self, name: &str) -> bool {
        self.blobs.contains_key(name)
    }

    fn copy(&mut self, from: &str, to: &str) -> io::Result<()> {
        let bytes = self
            .blobs
            .get(from)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?
            .clone();
        self.blobs.insert(to.to_owned(), bytes);

        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let bytes = self
            .blobs
            .remove(from)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        self.blobs.insert(to.to_owned(), bytes);

        Ok(())
    }
}

/// Shift the snapshots up by one slot, oldest first. The live file is
/// copied rather than renamed so it is still in place for the flush that
/// follows; existing backups move by rename. A snapshot about to shift
/// onto a missing slot is copied so gaps heal themselves.
pub fn rotate(blobs: &mut impl BlobStore, name: &str, retention: usize) -> io::Result<()> {
    if retention < 2 {
        return Ok(());
    }

    for i in (0..retention - 1).rev() {
        let current = snapshot_name(name, i);
        let backup = snapshot_name(name, i + 1);

        if !blobs.exists(&current) {
            continue;
        }

        if !blobs.exists(&backup) || i == 0 {
            blobs.copy(&current, &backup)?;
        } else {
            blobs.rename(&current, &backup)?;
        }

        debug!(from = %current, to = %backup, "Rotated snapshot");
    }

    Ok(())
}
