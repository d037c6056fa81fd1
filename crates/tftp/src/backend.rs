//! Storage backends
//!
//! Sessions never touch files directly; they drive a [`Reader`] or a
//! [`Writer`] capability handle supplied by the dispatcher. The traits are
//! the seam the transfer engine is tested through, and the filesystem
//! implementations below are what the server hands out in production.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A sequential byte source feeding a read (download) session.
pub trait Reader: Send {
    /// Read up to `size` bytes.
    ///
    /// Returns fewer than `size` bytes exactly and only when no more data
    /// remains, which is how the session recognizes the final block.
    fn read(&mut self, size: usize) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Release the source. Called on every terminal path; idempotent.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// A sequential byte sink fed by a write (upload) session.
pub trait Writer: Send {
    /// Append one block of data.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Commit the received data. Called once, when the final block has
    /// been accepted.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Discard everything received so far. Called when the transfer
    /// fails; a cancelled upload must leave no partial data behind.
    fn cancel(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Hands out [`FileReader`]s and [`FileWriter`]s confined to a root
/// directory.
///
/// Requested paths are canonicalized and checked against the root, so
/// `../` sequences (or symlinks pointing outside) cannot escape it.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a backend serving files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open `filename` for a download.
    ///
    /// Fails with `NotFound` for missing files and `PermissionDenied`
    /// for paths resolving outside the root.
    pub async fn reader_for(&self, filename: &str) -> io::Result<FileReader> {
        let requested = self.root.join(filename);

        let root_canon = self.root.canonicalize()?;
        let path_canon = requested.canonicalize()?;
        if !path_canon.starts_with(&root_canon) {
            return Err(escapes_root(filename));
        }

        FileReader::open(path_canon).await
    }

    /// Create `filename` for an upload.
    ///
    /// Fails with `AlreadyExists` if the file is present and
    /// `PermissionDenied` for paths resolving outside the root.
    pub async fn writer_for(&self, filename: &str) -> io::Result<FileWriter> {
        let requested = self.root.join(filename);

        // The destination does not exist yet, so canonicalize its parent.
        let root_canon = self.root.canonicalize()?;
        let parent = requested.parent().unwrap_or(&self.root).canonicalize()?;
        if !parent.starts_with(&root_canon) {
            return Err(escapes_root(filename));
        }

        let file_name = requested
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing file name"))?;
        let dest = parent.join(file_name);
        if fs::try_exists(&dest).await? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", filename),
            ));
        }

        FileWriter::create(dest).await
    }
}

fn escapes_root(filename: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("{} resolves outside the served root", filename),
    )
}

/// [`Reader`] over a file on disk.
#[derive(Debug)]
pub struct FileReader {
    file: Option<File>,
}

impl FileReader {
    /// Open the file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self { file: Some(file) })
    }
}

impl Reader for FileReader {
    async fn read(&mut self, size: usize) -> io::Result<Vec<u8>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };

        // A single read_buf may return short before EOF; keep filling so
        // a short result always means end of file.
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}

/// [`Writer`] committing to disk through a temporary sibling file.
///
/// Data accumulates in `<dest>.part`; `finish` renames it into place and
/// `cancel` removes it, so a failed upload never leaves a half-written
/// file where a provisioning client could boot from it.
#[derive(Debug)]
pub struct FileWriter {
    file: Option<File>,
    temp_path: PathBuf,
    dest_path: PathBuf,
}

impl FileWriter {
    /// Create the temporary file next to `dest`.
    pub async fn create(dest: PathBuf) -> io::Result<Self> {
        let mut temp = dest.clone().into_os_string();
        temp.push(".part");
        let temp_path = PathBuf::from(temp);

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        Ok(Self {
            file: Some(file),
            temp_path,
            dest_path: dest,
        })
    }
}

impl Writer for FileWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data).await,
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer already finished or cancelled",
            )),
        }
    }

    async fn finish(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            drop(file);
            fs::rename(&self.temp_path, &self.dest_path).await?;
        }
        Ok(())
    }

    async fn cancel(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            drop(file);
            fs::remove_file(&self.temp_path).await?;
        }
        Ok(())
    }
}
