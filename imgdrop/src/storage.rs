//! Local filesystem storage for uploaded images.
//!
//! Bodies are streamed into a hidden temp file inside the upload directory and renamed into place
//! once they pass validation, so a stored file is never observed half-written and a rejected or
//! aborted upload leaves nothing behind (the temp file is removed on drop).

use crate::config::UploadConfig;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::upload::SNIFF_LEN;

const STAGING_PREFIX: &str = ".incoming-";

/// The upload directory and the permissions things are created with.
#[derive(Debug, Clone)]
pub struct ImageStore {
    directory: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    dir_mode: u32,
    #[cfg_attr(not(unix), allow(dead_code))]
    file_mode: u32,
}

impl ImageStore {
    pub fn new(config: &UploadConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            dir_mode: config.dir_mode,
            file_mode: config.file_mode,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create the upload directory (and parents) if missing. Safe to call on every request.
    pub async fn ensure_directory(&self) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.dir_mode);

        builder.create(&self.directory).await
    }

    /// Open a fresh temp file in the upload directory for an incoming body.
    pub async fn stage(&self) -> io::Result<StagedFile> {
        let directory = self.directory.clone();
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(STAGING_PREFIX).tempfile_in(directory)
        })
        .await
        .map_err(io::Error::other)??;

        let writer = fs::File::from_std(temp.reopen()?);

        Ok(StagedFile {
            temp,
            writer,
            len: 0,
            head: Vec::with_capacity(SNIFF_LEN),
        })
    }

    /// Move a staged file into the upload directory under `file_name`.
    ///
    /// This is a rename on the same filesystem. An existing file with the same name is never
    /// replaced; the collision surfaces as [`io::ErrorKind::AlreadyExists`].
    pub async fn persist(&self, staged: StagedFile, file_name: &str) -> io::Result<PathBuf> {
        let StagedFile { temp, mut writer, .. } = staged;

        writer.flush().await?;
        writer.sync_all().await?;
        drop(writer);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(self.file_mode)).await?;
        }

        let destination = self.directory.join(file_name);
        let target = destination.clone();
        tokio::task::spawn_blocking(move || temp.persist_noclobber(&target))
            .await
            .map_err(io::Error::other)?
            .map_err(|e| e.error)?;

        Ok(destination)
    }
}

/// An upload body being written to the staging area.
#[derive(Debug)]
pub struct StagedFile {
    temp: NamedTempFile,
    writer: fs::File,
    len: u64,
    head: Vec<u8>,
}

impl StagedFile {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - self.head.len()).min(chunk.len());
            self.head.extend_from_slice(&chunk[..take]);
        }

        self.writer.write_all(chunk).await?;
        self.len += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first few bytes of the body, for content sniffing.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        self.temp.path()
    }
}

/// Whether a request path below the public prefix may be answered from the upload directory.
///
/// Only a single plain file name qualifies. Dotfiles (staged uploads among them), nested paths and
/// anything percent-encoded are refused before the file server decodes them.
pub fn is_served_name(path: &str) -> bool {
    let name = path.trim_start_matches('/');
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}
