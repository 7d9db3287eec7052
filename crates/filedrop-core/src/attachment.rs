//! Attachment construction.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use filedrop_mime::encoding::encode_base64_wrapped;
use tracing::debug;

/// Content type used for every attachment.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Filename used when a path has no usable final component.
const FALLBACK_FILENAME: &str = "attachment";

/// A file could not be used as an attachment.
#[derive(Debug, thiserror::Error)]
pub enum FileAccessError {
    /// Nothing exists at the path.
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The path exists but is a directory or special file.
    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// The process may not read the file.
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// Any other I/O failure while inspecting or reading the file.
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl FileAccessError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Read {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// A file ready to be attached to any number of messages.
///
/// Cloning is cheap: the raw bytes and the encoded body are shared.
#[derive(Debug, Clone)]
pub struct Attachment {
    filename: String,
    content: Bytes,
    encoded: Arc<str>,
}

impl Attachment {
    /// Creates an attachment from bytes already in memory.
    #[must_use]
    pub fn from_bytes(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let filename = filename.into();
        let content = content.into();
        let encoded = Arc::from(encode_base64_wrapped(&content));
        Self {
            filename: if filename.trim().is_empty() {
                FALLBACK_FILENAME.to_string()
            } else {
                filename
            },
            content,
            encoded,
        }
    }

    /// Base name presented to the recipient.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Raw file content.
    #[must_use]
    pub const fn content(&self) -> &Bytes {
        &self.content
    }

    /// Base64 body, wrapped at 76 columns with CRLF line ends.
    #[must_use]
    pub fn encoded(&self) -> &Arc<str> {
        &self.encoded
    }

    /// Always [`OCTET_STREAM`].
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        OCTET_STREAM
    }

    /// Size of the raw content in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// True for a zero-byte file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Checks that `path` names a regular file this process can open.
///
/// # Errors
///
/// Returns the matching [`FileAccessError`] variant.
pub async fn validate(path: &Path) -> Result<(), FileAccessError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| FileAccessError::from_io(path, e))?;
    if !metadata.is_file() {
        return Err(FileAccessError::NotAFile(path.to_path_buf()));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|e| FileAccessError::from_io(path, e))?;
    Ok(())
}

/// Reads and encodes a file.
///
/// # Errors
///
/// Returns a [`FileAccessError`]; no partial attachment is ever produced.
pub async fn build(path: &Path) -> Result<Attachment, FileAccessError> {
    validate(path).await?;
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| FileAccessError::from_io(path, e))?;
    let attachment = Attachment::from_bytes(filename_of(path), content);
    debug!(
        file = attachment.filename(),
        bytes = attachment.len(),
        "attachment prepared"
    );
    Ok(attachment)
}

fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_reads_and_encodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, b"a,b\n1,2\n").unwrap();

        let attachment = build(&path).await.unwrap();
        assert_eq!(attachment.filename(), "report.csv");
        assert_eq!(attachment.content().as_ref(), b"a,b\n1,2\n");
        assert_eq!(attachment.encoded().as_ref(), "YSxiCjEsMgo=\r\n");
        assert_eq!(attachment.content_type(), "application/octet-stream");
        assert_eq!(attachment.len(), 8);
    }

    #[tokio::test]
    async fn test_binary_content_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..=255).collect();
        std::fs::write(&path, &data).unwrap();

        let attachment = build(&path).await.unwrap();
        assert_eq!(attachment.content().as_ref(), data.as_slice());
        assert!(attachment.encoded().lines().all(|l| l.len() <= 76));
    }

    #[tokio::test]
    async fn test_empty_file_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, b"").unwrap();

        let attachment = build(&path).await.unwrap();
        assert!(attachment.is_empty());
        assert_eq!(attachment.encoded().as_ref(), "");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(matches!(
            build(&path).await,
            Err(FileAccessError::NotFound(p)) if p == path
        ));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate(dir.path()).await,
            Err(FileAccessError::NotAFile(_))
        ));
    }

    #[test]
    fn test_clones_share_buffers() {
        let a = Attachment::from_bytes("x.bin", vec![1u8; 1024]);
        let b = a.clone();
        assert_eq!(a.content().as_ptr(), b.content().as_ptr());
        assert!(Arc::ptr_eq(a.encoded(), b.encoded()));
    }

    #[test]
    fn test_filename_fallback() {
        assert_eq!(Attachment::from_bytes("  ", Vec::new()).filename(), "attachment");
        assert_eq!(filename_of(Path::new("/")), "attachment");
        assert_eq!(filename_of(Path::new("dir/notes.txt")), "notes.txt");
    }
}
