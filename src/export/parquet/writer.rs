//! Per-directory Parquet writer.
//!
//! Every leaf directory of the metric tree owns one [`LeafWriter`]. It keeps
//! a single `active.parquet` open, buffers rows in memory and rotates the
//! file once it is older than the configured file duration. A rotated file
//! is renamed after its creation time and is never touched again.
//!
//! A file whose row group or footer could not be written is deleted rather
//! than rotated, so every file not named `active.parquet` is complete.

use crate::core::{KestrelError, Result};
use chrono::{DateTime, Local};
use parquet::data_type::{DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use parquet::schema::types::Type;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Name of the file currently being written in a leaf directory.
pub const ACTIVE_FILE: &str = "active.parquet";

const INT64_SCHEMA: &str = "message schema { OPTIONAL INT64 value (INT_64); }";
const DOUBLE_SCHEMA: &str = "message schema { OPTIONAL DOUBLE value; }";

/// Failed renames of a closed file before it is given up and overwritten.
const RENAME_ATTEMPTS: u32 = 3;

/// Numeric kind of a leaf, fixed when the leaf is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// 64-bit signed integers (counters)
    Int64,
    /// 64-bit floats (gauges)
    Double,
}

impl ValueKind {
    fn schema(self) -> Result<Arc<Type>> {
        let message = match self {
            ValueKind::Int64 => INT64_SCHEMA,
            ValueKind::Double => DOUBLE_SCHEMA,
        };
        Ok(Arc::new(parse_message_type(message)?))
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Int64 => "int64",
            ValueKind::Double => "double",
        }
    }
}

/// One value to be written.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// Integer sample
    Int64(i64),
    /// Float sample
    Double(f64),
}

impl Sample {
    /// Kind of leaf this sample belongs to.
    pub fn kind(&self) -> ValueKind {
        match self {
            Sample::Int64(_) => ValueKind::Int64,
            Sample::Double(_) => ValueKind::Double,
        }
    }
}

/// Buffered rows of one leaf.
#[derive(Debug)]
enum Column {
    Int64(Vec<i64>),
    Double(Vec<f64>),
}

impl Column {
    fn new(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int64 => Column::Int64(Vec::new()),
            ValueKind::Double => Column::Double(Vec::new()),
        }
    }

    fn single(sample: Sample) -> Self {
        match sample {
            Sample::Int64(v) => Column::Int64(vec![v]),
            Sample::Double(v) => Column::Double(vec![v]),
        }
    }

    fn push(&mut self, sample: Sample) {
        match (self, sample) {
            (Column::Int64(values), Sample::Int64(v)) => values.push(v),
            (Column::Double(values), Sample::Double(v)) => values.push(v),
            // Kinds are checked by LeafWriter::write before buffering.
            _ => {},
        }
    }

    fn len(&self) -> usize {
        match self {
            Column::Int64(values) => values.len(),
            Column::Double(values) => values.len(),
        }
    }

    fn take(&mut self) -> Column {
        match self {
            Column::Int64(values) => Column::Int64(std::mem::take(values)),
            Column::Double(values) => Column::Double(std::mem::take(values)),
        }
    }
}

/// True once `duration` has passed since `since`. Deadlines past the end of
/// time never elapse.
fn elapsed(since: SystemTime, duration: Duration, now: SystemTime) -> bool {
    since.checked_add(duration).is_some_and(|deadline| now >= deadline)
}

/// Settings and counters shared by every leaf of one sink.
#[derive(Debug)]
pub struct WriterContext {
    /// Age at which the active file is rotated
    pub file_duration: Duration,
    /// Age at which buffered rows are written out
    pub buffer_duration: Duration,
    /// Cap on rows buffered across all leaves; 0 disables buffering
    pub buffer_capacity: usize,
    properties: Arc<WriterProperties>,
    buffered: AtomicUsize,
}

impl WriterContext {
    /// Creates a context. Fails if `buffer_duration > file_duration`.
    pub fn new(
        file_duration: Duration,
        buffer_duration: Duration,
        buffer_capacity: usize,
        properties: WriterProperties,
    ) -> Result<Self> {
        if buffer_duration > file_duration {
            return Err(KestrelError::invalid(format!(
                "buffer duration {buffer_duration:?} exceeds file duration {file_duration:?}"
            )));
        }
        Ok(Self {
            file_duration,
            buffer_duration,
            buffer_capacity,
            properties: Arc::new(properties),
            buffered: AtomicUsize::new(0),
        })
    }

    /// Rows currently buffered across all leaves.
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Reserves a buffer slot; fails once the capacity is reached.
    fn try_admit(&self) -> bool {
        let previous = self.buffered.fetch_add(1, Ordering::AcqRel);
        if previous >= self.buffer_capacity {
            self.buffered.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn release(&self, rows: usize) {
        if rows > 0 {
            self.buffered.fetch_sub(rows, Ordering::AcqRel);
        }
    }
}

enum LeafState<W: Write + Send> {
    Closed,
    Open {
        created_at: SystemTime,
        writer: SerializedFileWriter<W>,
    },
}

/// Creates the byte sink behind a new active file.
type Opener<W> = Box<dyn Fn(&Path) -> io::Result<W> + Send + Sync>;

/// File name a file created at `created_at` is given on rotation.
pub fn rotated_file_name(created_at: SystemTime) -> String {
    let local: DateTime<Local> = created_at.into();
    format!("{}.parquet", local.format("%Y%m%dT%H%M%S"))
}

fn write_row_group<W: Write + Send>(
    writer: &mut SerializedFileWriter<W>,
    column: &Column,
) -> Result<()> {
    let rows = column.len();
    if rows == 0 {
        return Ok(());
    }
    let definition_levels = vec![1i16; rows];
    let mut row_group = writer.next_row_group()?;
    if let Some(mut value) = row_group.next_column()? {
        match column {
            Column::Int64(values) => {
                value
                    .typed::<Int64Type>()
                    .write_batch(values, Some(&definition_levels), None)?;
            },
            Column::Double(values) => {
                value
                    .typed::<DoubleType>()
                    .write_batch(values, Some(&definition_levels), None)?;
            },
        }
        value.close()?;
    }
    row_group.close()?;
    Ok(())
}

/// Writer state of one leaf directory.
pub struct LeafWriter<W: Write + Send = File> {
    dir: PathBuf,
    kind: ValueKind,
    ctx: Arc<WriterContext>,
    opener: Opener<W>,
    state: LeafState<W>,
    buffer: Column,
    buffer_flush_time: SystemTime,
    /// Creation time of a closed file still named `active.parquet`
    pending_rename: Option<SystemTime>,
    rename_attempts: u32,
}

impl LeafWriter {
    /// Creates a closed writer for `dir`. Nothing touches the disk until the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>, kind: ValueKind, ctx: Arc<WriterContext>) -> Self {
        Self::with_opener(dir, kind, ctx, |path: &Path| File::create(path))
    }
}

impl<W: Write + Send> LeafWriter<W> {
    /// Like [`LeafWriter::new`], with `opener` creating the sink of each
    /// active file from its path.
    pub fn with_opener<F>(
        dir: impl Into<PathBuf>,
        kind: ValueKind,
        ctx: Arc<WriterContext>,
        opener: F,
    ) -> Self
    where
        F: Fn(&Path) -> io::Result<W> + Send + Sync + 'static,
    {
        Self {
            dir: dir.into(),
            kind,
            ctx,
            opener: Box::new(opener),
            state: LeafState::Closed,
            buffer: Column::new(kind),
            buffer_flush_time: SystemTime::UNIX_EPOCH,
            pending_rename: None,
            rename_attempts: 0,
        }
    }

    /// Leaf directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Numeric kind of this leaf.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// True while an active file is open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, LeafState::Open { .. })
    }

    /// Rows buffered by this leaf.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_FILE)
    }

    /// Writes one sample at `now`, rotating and flushing as due.
    ///
    /// A failed write drops `sample`, and a failed flush also drops the
    /// active file. The next write starts a fresh one.
    pub fn write(&mut self, sample: Sample, now: SystemTime) -> Result<()> {
        if sample.kind() != self.kind {
            return Err(KestrelError::invalid(format!(
                "{} sample written to {} leaf {}",
                sample.kind().as_str(),
                self.kind.as_str(),
                self.dir.display()
            )));
        }

        let rotate = match &self.state {
            LeafState::Closed => true,
            LeafState::Open { created_at, .. } => elapsed(*created_at, self.ctx.file_duration, now),
        };
        if rotate {
            self.open(now)?;
        }

        if elapsed(self.buffer_flush_time, self.ctx.buffer_duration, now) {
            self.flush(now)?;
        }

        if self.ctx.try_admit() {
            self.buffer.push(sample);
            return Ok(());
        }

        self.flush(now)?;
        self.write_direct(&Column::single(sample))
    }

    fn write_direct(&mut self, column: &Column) -> Result<()> {
        let LeafState::Open { writer, .. } = &mut self.state else {
            return Err(KestrelError::internal(format!(
                "write to closed leaf {}",
                self.dir.display()
            )));
        };
        let result = write_row_group(writer, column);
        if result.is_err() {
            // A row group left half written blocks every later row group
            // and the footer.
            self.state = LeafState::Closed;
            self.discard_active();
        }
        result
    }

    /// Deletes an `active.parquet` that can never be completed.
    fn discard_active(&self) {
        let path = self.active_path();
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::error!(file = %path.display(), "Discarded unfinished parquet file");
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {},
            Err(err) => {
                tracing::error!(
                    file = %path.display(),
                    error = %err,
                    "Failed to remove unfinished parquet file"
                );
            },
        }
    }

    /// Writes buffered rows to the active file.
    pub fn flush(&mut self, now: SystemTime) -> Result<()> {
        self.buffer_flush_time = now;
        let column = self.buffer.take();
        let rows = column.len();
        if rows == 0 {
            return Ok(());
        }
        self.ctx.release(rows);
        let result = self.write_direct(&column);
        if let Err(err) = &result {
            tracing::warn!(
                dir = %self.dir.display(),
                rows,
                error = %err,
                "Dropping buffered rows"
            );
        }
        result
    }

    /// Flushes, finalizes the active file and renames it after its
    /// creation time. A file whose footer cannot be written is deleted. A
    /// failed rename is retried by the next close, up to three times.
    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush(self.buffer_flush_time);

        if let LeafState::Open { created_at, writer } =
            std::mem::replace(&mut self.state, LeafState::Closed)
        {
            if let Err(err) = writer.close() {
                self.discard_active();
                return Err(err.into());
            }
            self.pending_rename = Some(created_at);
            self.rename_attempts = 0;
        }

        self.rename_pending()?;
        flushed
    }

    fn rename_pending(&mut self) -> Result<()> {
        let Some(created_at) = self.pending_rename else {
            return Ok(());
        };
        let target = self.dir.join(rotated_file_name(created_at));
        match fs::rename(self.active_path(), &target) {
            Ok(()) => {
                tracing::debug!(file = %target.display(), "Rotated parquet file");
                self.pending_rename = None;
                Ok(())
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    "Active parquet file disappeared before its rename"
                );
                self.pending_rename = None;
                Ok(())
            },
            Err(err) => {
                self.rename_attempts += 1;
                tracing::error!(
                    dir = %self.dir.display(),
                    target = %target.display(),
                    attempts = self.rename_attempts,
                    error = %err,
                    "Failed to rename active parquet file"
                );
                if self.rename_attempts >= RENAME_ATTEMPTS {
                    tracing::error!(
                        dir = %self.dir.display(),
                        "Giving up on rename, the active file will be overwritten"
                    );
                    self.pending_rename = None;
                    self.rename_attempts = 0;
                }
                Err(err.into())
            },
        }
    }

    /// Closes the current file, if any, and starts a fresh `active.parquet`
    /// created at `now`.
    pub fn open(&mut self, now: SystemTime) -> Result<()> {
        if let Err(err) = self.close() {
            // A completed file awaiting its rename is kept until the rename
            // succeeds or is given up.
            if self.pending_rename.is_some() {
                return Err(err);
            }
            tracing::warn!(dir = %self.dir.display(), error = %err, "Closing parquet file failed");
        }

        let writer = fs::create_dir_all(&self.dir)
            .and_then(|()| (self.opener)(&self.active_path()))
            .map_err(KestrelError::from)
            .and_then(|file| {
                Ok(SerializedFileWriter::new(
                    file,
                    self.kind.schema()?,
                    Arc::clone(&self.ctx.properties),
                )?)
            });

        match writer {
            Ok(writer) => {
                self.state = LeafState::Open {
                    created_at: now,
                    writer,
                };
                self.buffer_flush_time = now;
                Ok(())
            },
            Err(err) => {
                tracing::error!(
                    file = %self.active_path().display(),
                    error = %err,
                    "Failed to open parquet file"
                );
                Err(err)
            },
        }
    }
}

impl<W: Write + Send> Drop for LeafWriter<W> {
    fn drop(&mut self) {
        self.ctx.release(self.buffer.len());
    }
}
