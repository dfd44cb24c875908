// src/utils/logfile.rs

//! Log output that goes to the console and to an append-only file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Writes every buffer to the console first, then to the file.
pub struct TeeWriter<W> {
    console: W,
    file: File,
}

impl TeeWriter<io::Stderr> {
    /// Mirror stderr into `path`.
    pub fn stderr_and_file(path: &Path) -> io::Result<Self> {
        Self::open(io::stderr(), path)
    }
}

impl<W: Write> TeeWriter<W> {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn open(console: W, path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { console, file })
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.console.write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.console.flush()?;
        self.file.flush()
    }
}
