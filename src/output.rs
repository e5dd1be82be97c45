//! File Output
//!
//! Rendered artifacts are [`OutputFile`]s collected into a [`FileSet`] and
//! written below a destination directory by a bounded pool of worker threads:
//!
//! - one job per file goes through a `crossbeam_channel`
//! - at most `limit` workers run at once
//! - exactly one result is drained per file, so a failing write never leaves
//!   the pool waiting
//! - failures are aggregated; a single failure is returned as itself

use crossbeam_channel::{bounded, unbounded};
use dashmap::DashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

use crate::error::{Error, MultiError, Result};

/// One artifact to write, addressed by a path relative to the destination
pub trait OutputFile: Send + Sync {
    fn path(&self) -> &Path;

    fn write_to(&self, out: &mut dyn Write) -> std::io::Result<()>;

    /// Consulted only when the target already exists, with the opened (not
    /// yet truncated) file. Returning `false` leaves it alone and counts as
    /// success.
    fn overwrite(&self, _existing: &fs::File) -> bool {
        true
    }
}

/// In-memory file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

impl RawFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

impl OutputFile for RawFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_to(&self, out: &mut dyn Write) -> std::io::Result<()> {
        out.write_all(&self.content)
    }
}

/// Anything that can materialize itself below a directory
pub trait HasLocalOutput {
    fn output_to(&self, dest: &Path) -> Result<()>;
}

/// Files keyed by relative path; adding a path twice replaces the first
pub struct FileSet {
    files: DashMap<PathBuf, Arc<dyn OutputFile>>,
    limit: usize,
}

impl Default for FileSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSet {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            limit: DEFAULT_WRITE_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn add(&self, file: impl OutputFile + 'static) {
        let file: Arc<dyn OutputFile> = Arc::new(file);
        self.files.insert(file.path().to_path_buf(), file);
    }

    pub fn get(&self, path: &Path) -> Option<Arc<dyn OutputFile>> {
        self.files.get(path).map(|f| Arc::clone(f.value()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files ordered by path
    pub fn files(&self) -> Vec<Arc<dyn OutputFile>> {
        let mut files: Vec<(PathBuf, Arc<dyn OutputFile>)> = self
            .files
            .iter()
            .map(|f| (f.key().clone(), Arc::clone(f.value())))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files.into_iter().map(|(_, f)| f).collect()
    }
}

impl HasLocalOutput for FileSet {
    fn output_to(&self, dest: &Path) -> Result<()> {
        write_files(self.files(), dest, self.limit)
    }
}

pub const DEFAULT_WRITE_LIMIT: usize = 4;

/// Write every file below `dest` using at most `limit` workers
pub fn write_files(files: Vec<Arc<dyn OutputFile>>, dest: &Path, limit: usize) -> Result<()> {
    let total = files.len();
    if total == 0 {
        return Ok(());
    }
    let workers = limit.max(1).min(total);

    let (job_tx, job_rx) = bounded::<Arc<dyn OutputFile>>(total);
    let (result_tx, result_rx) = unbounded::<Result<()>>();
    for file in files {
        job_tx
            .send(file)
            .map_err(|_| Error::Output("output job queue closed".to_string()))?;
    }
    drop(job_tx);

    let mut errors = MultiError::new();
    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move || {
                for file in job_rx.iter() {
                    let outcome = write_one(file.as_ref(), dest);
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        for _ in 0..total {
            match result_rx.recv() {
                Ok(outcome) => errors.push_result(outcome),
                Err(_) => {
                    errors.push(Error::Output("output workers exited early".to_string()));
                    break;
                }
            }
        }
    });

    info!(files = total, workers, failed = errors.len(), "wrote output");
    errors.into_result()
}

fn write_one(file: &dyn OutputFile, dest: &Path) -> Result<()> {
    let target = dest.join(file.path());
    let fail = |e: std::io::Error| Error::Output(format!("{}: {}", target.display(), e));

    if let Some(parent) = target.parent() {
        // create_dir_all succeeds when another worker created it first
        fs::create_dir_all(parent).map_err(fail)?;
    }

    let handle = match OpenOptions::new().read(true).write(true).open(&target) {
        Ok(mut existing) => {
            if !file.overwrite(&existing) {
                debug!(path = %target.display(), "keeping existing file");
                return Ok(());
            }
            // the hook may have read from the handle
            existing.set_len(0).map_err(fail)?;
            existing.rewind().map_err(fail)?;
            existing
        }
        Err(e) if e.kind() == ErrorKind::NotFound => fs::File::create(&target).map_err(fail)?,
        Err(e) => return Err(fail(e)),
    };

    let mut out = BufWriter::new(handle);
    file.write_to(&mut out).map_err(fail)?;
    out.flush().map_err(fail)?;
    debug!(path = %target.display(), "wrote file");
    Ok(())
}
