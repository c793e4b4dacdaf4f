use chrono::Local;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Result, SieveError};
use crate::sink::ResultSink;

/// `$XDG_DATA_HOME/pipesieve`, falling back to `$HOME/.local/share/pipesieve`
pub fn data_dir() -> io::Result<PathBuf> {
    let xdg_data_home = env::var("XDG_DATA_HOME")
        .ok()
        .and_then(|path| {
            if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            }
        })
        .or_else(|| {
            env::var("HOME")
                .ok()
                .map(|home| PathBuf::from(home).join(".local/share"))
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "could not determine data directory (neither XDG_DATA_HOME nor HOME is set)",
            )
        })?;

    Ok(xdg_data_home.join("pipesieve"))
}

/// Write one prime per line using itoa for speed
pub fn write_primes<W: Write>(writer: &mut W, primes: &[u64]) -> io::Result<()> {
    let mut itoa_buf = itoa::Buffer::new();
    for &prime in primes {
        writer.write_all(itoa_buf.format(prime).as_bytes())?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Save primes to `<dir>/primes.txt`, one per line
pub fn save_primes_text(dir: &Path, primes: &[u64]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("primes.txt");

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;
    let mut writer = BufWriter::new(file);
    write_primes(&mut writer, primes)?;
    writer.flush()?;

    Ok(path)
}

/// Save primes to `<dir>/primes.bin`
/// Binary format: 8 bytes per prime (little-endian u64)
pub fn save_primes_binary(dir: &Path, primes: &[u64]) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join("primes.bin");

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)?;
    let mut writer = BufWriter::with_capacity(64 * 1024, file);
    for &prime in primes {
        writer.write_all(&prime.to_le_bytes())?;
    }
    writer.flush()?;

    Ok(path)
}

/// Append one line per run to `<dir>/execution_log.txt`
pub fn log_execution(
    dir: &Path,
    subcommand: &str,
    args: &str,
    queue_capacity: usize,
    duration_us: u128,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let log_path = dir.join("execution_log.txt");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");

    writeln!(
        file,
        "{} | {} | {} | cap{} | {}us",
        timestamp, subcommand, args, queue_capacity, duration_us
    )?;

    Ok(())
}

fn decode_le_u64(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect()
}

static SPOOL_SEQ: AtomicUsize = AtomicUsize::new(0);

/// File-backed result sink.
///
/// Appends go to a private spool file (8 bytes LE per prime). `freeze` reads
/// the spool back and deletes it. Whatever is still at the spool path on
/// drop is deleted too, including after a failed `freeze`.
pub struct SpoolSink {
    path: PathBuf,
    // None once frozen
    writer: Mutex<Option<BufWriter<File>>>,
    removed: AtomicBool,
}

impl SpoolSink {
    pub fn create_in(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let seq = SPOOL_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("spool_{}_{}.bin", std::process::id(), seq));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(SpoolSink {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            removed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remove_spool(&self) -> io::Result<()> {
        let result = if self.path.is_dir() {
            fs::remove_dir(&self.path)
        } else {
            fs::remove_file(&self.path)
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.removed.store(true, Ordering::Release);
        Ok(())
    }
}

impl ResultSink for SpoolSink {
    fn append(&self, value: u64) -> Result<()> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard.as_mut().ok_or(SieveError::SinkFrozen)?;
        writer.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn freeze(&self) -> Result<Vec<u64>> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SieveError::SinkFrozen)?;
        let read_back = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|file| {
                drop(file);
                fs::read(&self.path)
            });

        // Remove the spool whether or not the read succeeded
        let removed = self.remove_spool();
        let bytes = read_back?;
        removed?;
        Ok(decode_le_u64(&bytes))
    }
}

impl Drop for SpoolSink {
    fn drop(&mut self) {
        // Close the file before removing it
        drop(
            self.writer
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if self.removed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.remove_spool() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spool file");
        }
    }
}
