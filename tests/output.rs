//! Concurrent file output.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use infragraph::output::{write_files, FileSet, HasLocalOutput, OutputFile, RawFile};
use infragraph::Error;

/// Fails while writing
struct Broken(PathBuf);

impl OutputFile for Broken {
    fn path(&self) -> &Path {
        &self.0
    }

    fn write_to(&self, _out: &mut dyn Write) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "renderer crashed"))
    }
}

/// Only written when the target is empty
struct WriteOnce {
    path: PathBuf,
    body: String,
}

impl OutputFile for WriteOnce {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.body.as_bytes())
    }

    fn overwrite(&self, existing: &fs::File) -> bool {
        let mut current = String::new();
        let mut reader = existing;
        reader.read_to_string(&mut current).is_ok() && current.is_empty()
    }
}

/// Reads the previous body before agreeing to replace it
struct Regenerate {
    path: PathBuf,
    body: String,
    seen: Arc<parking_lot::Mutex<Option<String>>>,
}

impl OutputFile for Regenerate {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.body.as_bytes())
    }

    fn overwrite(&self, existing: &fs::File) -> bool {
        let mut current = String::new();
        let mut reader = existing;
        if reader.read_to_string(&mut current).is_err() {
            return false;
        }
        *self.seen.lock() = Some(current);
        true
    }
}

/// Never replaces an existing file
struct Protected {
    path: PathBuf,
    body: String,
    asked: Arc<AtomicUsize>,
}

impl OutputFile for Protected {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.body.as_bytes())
    }

    fn overwrite(&self, _existing: &fs::File) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        false
    }
}

/// Counts how many workers are writing at the same moment
struct Tracked {
    path: PathBuf,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl OutputFile for Tracked {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        self.active.fetch_sub(1, Ordering::SeqCst);
        out.write_all(b"ok")
    }
}

#[test]
fn test_one_failure_among_many() {
    let dir = tempfile::tempdir().unwrap();
    let mut files: Vec<Arc<dyn OutputFile>> = (0..20)
        .map(|i| Arc::new(RawFile::new(format!("out/{}.txt", i), format!("file {}", i))) as Arc<dyn OutputFile>)
        .collect();
    files.insert(7, Arc::new(Broken(PathBuf::from("out/broken.txt"))));

    let err = write_files(files, dir.path(), 3).unwrap_err();
    match &err {
        Error::Output(message) => assert!(message.contains("renderer crashed")),
        other => panic!("unexpected error: {}", other),
    }
    for i in 0..20 {
        let body = fs::read_to_string(dir.path().join(format!("out/{}.txt", i))).unwrap();
        assert_eq!(body, format!("file {}", i));
    }
}

#[test]
fn test_every_failure_reported() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<Arc<dyn OutputFile>> = vec![
        Arc::new(Broken(PathBuf::from("a.txt"))),
        Arc::new(RawFile::new("b.txt", "fine")),
        Arc::new(Broken(PathBuf::from("c.txt"))),
    ];

    match write_files(files, dir.path(), 2) {
        Err(Error::Multi(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected aggregated failures, got {:?}", other),
    }
}

#[test]
fn test_existing_file_kept_when_not_overwritable() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("keep.txt"), "hand edited").unwrap();

    let set = FileSet::new();
    set.add(WriteOnce {
        path: PathBuf::from("keep.txt"),
        body: "generated".to_string(),
    });
    set.add(WriteOnce {
        path: PathBuf::from("fresh.txt"),
        body: "generated".to_string(),
    });
    set.output_to(dir.path()).unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("keep.txt")).unwrap(), "hand edited");
    assert_eq!(fs::read_to_string(dir.path().join("fresh.txt")).unwrap(), "generated");
}

#[test]
fn test_worker_limit_respected() {
    let dir = tempfile::tempdir().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let files: Vec<Arc<dyn OutputFile>> = (0..16)
        .map(|i| {
            Arc::new(Tracked {
                path: PathBuf::from(format!("t{}.txt", i)),
                active: Arc::clone(&active),
                peak: Arc::clone(&peak),
            }) as Arc<dyn OutputFile>
        })
        .collect();

    write_files(files, dir.path(), 2).unwrap();
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 16);
}

#[test]
fn test_overwrite_after_reading_existing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("regen.txt"), "stale generated output").unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(None));
    let files: Vec<Arc<dyn OutputFile>> = vec![Arc::new(Regenerate {
        path: PathBuf::from("regen.txt"),
        body: "new".to_string(),
        seen: Arc::clone(&seen),
    })];
    write_files(files, dir.path(), 1).unwrap();

    assert_eq!(seen.lock().as_deref(), Some("stale generated output"));
    let bytes = fs::read(dir.path().join("regen.txt")).unwrap();
    assert_eq!(bytes, b"new");
}

#[test]
fn test_new_file_written_without_asking() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("old.txt"), "mine").unwrap();

    let asked = Arc::new(AtomicUsize::new(0));
    let set = FileSet::new();
    for name in ["old.txt", "nested/new.txt"] {
        set.add(Protected {
            path: PathBuf::from(name),
            body: "generated".to_string(),
            asked: Arc::clone(&asked),
        });
    }
    set.output_to(dir.path()).unwrap();

    assert_eq!(asked.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read_to_string(dir.path().join("old.txt")).unwrap(), "mine");
    assert_eq!(fs::read_to_string(dir.path().join("nested/new.txt")).unwrap(), "generated");
}
