//! Testing utilities for mockwire crates.
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::{io, net};

pub mod logger {
    use log::*;

    struct Logger {
        level: Level,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                println!("test> [{}] {}", record.target(), record.args())
            }
        }

        fn flush(&self) {}
    }

    pub fn init(level: Level) {
        let logger = Logger { level };

        log::set_boxed_logger(Box::new(logger)).ok();
        log::set_max_level(level.to_level_filter());
    }
}

/// A directory holding named pipes, removed when dropped.
pub struct Fifos {
    dir: tempfile::TempDir,
}

impl Fifos {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Path of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a named pipe in the directory and return its path.
    pub fn create(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        mkfifo(&path)?;

        Ok(path)
    }
}

/// Create a named pipe at the given path.
pub fn mkfifo(path: &Path) -> io::Result<()> {
    let c = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c` is a valid, nul-terminated path.
    if unsafe { libc::mkfifo(c.as_ptr(), 0o600) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Loopback address with an OS-assigned port.
pub fn localhost() -> net::SocketAddr {
    net::SocketAddr::from(([127, 0, 0, 1], 0))
}
