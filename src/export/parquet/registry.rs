//! Leaf writer registry.
//!
//! Maps every leaf directory below the base directory to its
//! [`LeafWriter`]. The map lock is only held to look a leaf up; writes lock
//! the leaf alone, so different leaves never wait on each other.

use super::writer::{LeafWriter, Sample, WriterContext};
use crate::core::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Owner of all leaf writers of one Parquet sink.
pub struct Registry {
    basedir: PathBuf,
    ctx: Arc<WriterContext>,
    leaves: Mutex<BTreeMap<PathBuf, Arc<Mutex<LeafWriter>>>>,
}

impl Registry {
    /// Creates an empty registry rooted at `basedir`.
    pub fn new(basedir: impl Into<PathBuf>, ctx: WriterContext) -> Self {
        Self {
            basedir: basedir.into(),
            ctx: Arc::new(ctx),
            leaves: Mutex::new(BTreeMap::new()),
        }
    }

    /// Root of the metric tree.
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    fn leaf(&self, relative: &Path, sample: &Sample) -> Arc<Mutex<LeafWriter>> {
        let mut leaves = self.leaves.lock();
        let leaf = leaves.entry(relative.to_path_buf()).or_insert_with(|| {
            tracing::debug!(leaf = %relative.display(), kind = sample.kind().as_str(), "New parquet leaf");
            Arc::new(Mutex::new(LeafWriter::new(
                self.basedir.join(relative),
                sample.kind(),
                Arc::clone(&self.ctx),
            )))
        });
        Arc::clone(leaf)
    }

    /// Writes `sample` to the leaf at `relative`, creating the leaf with the
    /// sample's kind on first use.
    pub fn write(&self, relative: &Path, sample: Sample, now: SystemTime) -> Result<()> {
        let leaf = self.leaf(relative, &sample);
        let result = leaf.lock().write(sample, now);
        result
    }

    fn snapshot(&self) -> Vec<Arc<Mutex<LeafWriter>>> {
        self.leaves.lock().values().map(Arc::clone).collect()
    }

    /// Writes every leaf's buffered rows out. All leaves are attempted; the
    /// first error is returned.
    pub fn flush_all(&self, now: SystemTime) -> Result<()> {
        let mut first_error = None;
        for leaf in self.snapshot() {
            if let Err(err) = leaf.lock().flush(now) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes and renames every active file. All leaves are attempted; the
    /// first error is returned.
    pub fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for leaf in self.snapshot() {
            let mut leaf = leaf.lock();
            if let Err(err) = leaf.close() {
                tracing::error!(leaf = %leaf.dir().display(), error = %err, "Failed to close parquet leaf");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Rows buffered across all leaves.
    pub fn buffered(&self) -> usize {
        self.ctx.buffered()
    }

    /// Number of known leaves.
    pub fn len(&self) -> usize {
        self.leaves.lock().len()
    }

    /// True if no leaf was written yet.
    pub fn is_empty(&self) -> bool {
        self.leaves.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KestrelError;
    use crate::export::parquet::writer::rotated_file_name;
    use parquet::file::properties::WriterProperties;
    use std::time::Duration;

    fn registry(basedir: &Path, capacity: usize) -> Registry {
        let ctx = WriterContext::new(
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            capacity,
            WriterProperties::builder().build(),
        )
        .unwrap();
        Registry::new(basedir, ctx)
    }

    #[test]
    fn test_first_writer_fixes_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path(), 10);
        let now = SystemTime::now();
        let path = Path::new("host/load");

        reg.write(path, Sample::Double(1.0), now).unwrap();
        let err = reg.write(path, Sample::Int64(1), now).unwrap_err();
        assert!(matches!(err, KestrelError::Invalid(_)));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.buffered(), 1);
    }

    #[test]
    fn test_close_all_renames_every_leaf() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = registry(tmp.path(), 10);
        let now = SystemTime::now();

        reg.write(Path::new("h/a"), Sample::Int64(1), now).unwrap();
        reg.write(Path::new("h/b/x"), Sample::Double(2.0), now).unwrap();
        reg.flush_all(now).unwrap();
        assert_eq!(reg.buffered(), 0);
        assert!(tmp.path().join("h/a/active.parquet").exists());

        reg.close_all().unwrap();
        let name = rotated_file_name(now);
        assert!(tmp.path().join("h/a").join(&name).exists());
        assert!(tmp.path().join("h/b/x").join(&name).exists());
        assert!(!tmp.path().join("h/a/active.parquet").exists());
    }
}
