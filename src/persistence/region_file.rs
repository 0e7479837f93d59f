use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::persistence::{Document, PersistenceResult};
use crate::world::coords::RegionPos;

/// Resolves and performs region file I/O inside one dimension's directory.
///
/// Layout: `<world-root>/dimensions/<dimension>/r_<rx>_<ry>.region`. Writes
/// are safe writes: the document goes to `<file>.tmp`, is fsynced, and is
/// renamed over the original, so a crash leaves either the old file or the
/// new one. A stale `.tmp` found at load time is discarded.
#[derive(Debug, Clone)]
pub struct RegionFiles {
    dir: PathBuf,
}

impl RegionFiles {
    /// Opens (creating if needed) the region directory for one dimension
    /// under the world root.
    pub fn open(world_root: &Path, dimension: &str) -> PersistenceResult<Self> {
        let dir = world_root.join("dimensions").join(dimension);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file path for a region.
    pub fn path(&self, pos: RegionPos) -> PathBuf {
        self.dir.join(format!("r_{}_{}.region", pos.x, pos.y))
    }

    fn tmp_path(&self, pos: RegionPos) -> PathBuf {
        self.dir.join(format!("r_{}_{}.region.tmp", pos.x, pos.y))
    }

    pub fn exists(&self, pos: RegionPos) -> bool {
        self.path(pos).exists()
    }

    /// Reads and decodes a region document. Returns `Ok(None)` when the
    /// region has never been saved.
    pub fn read(&self, pos: RegionPos) -> PersistenceResult<Option<Document>> {
        // A leftover temp file means a save died mid-write; the rename
        // never happened, so the original (if any) is the authoritative
        // copy.
        let tmp = self.tmp_path(pos);
        if tmp.exists() {
            log::warn!("discarding partially-written {}", tmp.display());
            let _ = fs::remove_file(&tmp);
        }

        let path = self.path(pos);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(Document::decode(&bytes)?))
    }

    /// Encodes and safely writes a region document.
    pub fn write(&self, pos: RegionPos, doc: &Document) -> PersistenceResult<()> {
        let bytes = doc.encode()?;
        let tmp = self.tmp_path(pos);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.path(pos))?;
        Ok(())
    }
}
