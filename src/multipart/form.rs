//! Collected multipart forms and their file backing stores.
//!
//! `read_form` walks every part and buckets it: text fields go into a
//! value map under a shared in-memory budget, file fields stay in memory
//! under their own budget and spill to a temp file once it runs out. Temp
//! files live until `remove_all`, which the connection calls after the
//! handler returns in case the handler forgot.

use crate::multipart::reader::{MultipartReader, Part};
use crate::protocol::{Header, MultipartError};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

/// Total in-memory budget for text fields; exceeding it fails the form.
const NON_FILE_MAX_MEMORY: u64 = 10 << 20;

/// Total in-memory budget for file contents; exceeding it spills the
/// current file to disk.
const FILE_MAX_MEMORY: u64 = 30 << 20;

const TMP_FILE_PREFIX: &str = "multipart-";

/// A fully collected multipart form.
#[derive(Debug, Default)]
pub struct MultipartForm {
    /// Text fields by form name
    pub values: HashMap<String, String>,
    /// Uploaded files by form name
    pub files: HashMap<String, FileHeader>,
}

impl MultipartForm {
    fn new() -> Self {
        Self::default()
    }

    /// Deletes every temp file backing a spilled upload. Safe to call more
    /// than once.
    pub async fn remove_all(&self) {
        for file_header in self.files.values() {
            let Some(path) = &file_header.tmp_path else { continue };
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), cause = %e, "can't remove multipart temp file");
                }
            }
        }
    }
}

/// One uploaded file: its metadata plus exactly one backing store, either
/// in-memory bytes or a temp file on disk.
#[derive(Debug)]
pub struct FileHeader {
    filename: String,
    headers: Header,
    size: u64,
    content: Bytes,
    tmp_path: Option<PathBuf>,
}

impl FileHeader {
    fn in_memory(filename: String, headers: Header, content: Bytes) -> Self {
        Self { filename, headers, size: content.len() as u64, content, tmp_path: None }
    }

    fn on_disk(filename: String, headers: Header, size: u64, tmp_path: PathBuf) -> Self {
        Self { filename, headers, size, content: Bytes::new(), tmp_path: Some(tmp_path) }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn headers(&self) -> &Header {
        &self.headers
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn in_disk(&self) -> bool {
        self.tmp_path.is_some()
    }

    /// The temp file path for a spilled upload.
    pub fn tmp_path(&self) -> Option<&Path> {
        self.tmp_path.as_deref()
    }

    /// Opens a reader over whichever backing store applies.
    pub async fn open(&self) -> io::Result<FileContent> {
        match &self.tmp_path {
            Some(path) => Ok(FileContent::Disk(File::open(path).await?)),
            None => Ok(FileContent::Memory(Cursor::new(self.content.clone()))),
        }
    }

    /// Copies the upload to `dest`, removing the partial destination on
    /// failure.
    pub async fn save(&self, dest: impl AsRef<Path>) -> io::Result<()> {
        let mut reader = self.open().await?;
        let mut file = File::create(dest.as_ref()).await?;
        if let Err(e) = tokio::io::copy(&mut reader, &mut file).await {
            drop(file);
            let _ = tokio::fs::remove_file(dest.as_ref()).await;
            return Err(e);
        }
        file.flush().await
    }
}

/// A reader over a file field's backing store.
pub enum FileContent {
    Memory(Cursor<Bytes>),
    Disk(File),
}

impl AsyncRead for FileContent {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FileContent::Memory(cursor) => Pin::new(cursor).poll_read(cx, buf),
            FileContent::Disk(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}

impl<'r, 'conn> MultipartReader<'r, 'conn> {
    /// Collects every named part into a [`MultipartForm`], spilling file
    /// fields to disk when the in-memory budget runs out.
    pub async fn read_form(&mut self) -> Result<MultipartForm, MultipartError> {
        let mut form = MultipartForm::new();
        let mut non_file_budget = NON_FILE_MAX_MEMORY;
        let mut file_budget = FILE_MAX_MEMORY;

        loop {
            let Some(mut part) = self.next_part().await? else { break };

            let form_name = part.form_name().to_string();
            if form_name.is_empty() {
                continue;
            }
            let file_name = part.file_name().to_string();

            if file_name.is_empty() {
                // text field: one past the budget is enough to tell a fit
                // from an overflow
                let (data, complete) = read_up_to(&mut part, non_file_budget + 1).await?;
                if !complete || data.len() as u64 > non_file_budget {
                    return Err(MultipartError::MessageTooLarge);
                }
                non_file_budget -= data.len() as u64;
                form.values.insert(form_name, String::from_utf8_lossy(&data).into_owned());
                continue;
            }

            // file field
            let (data, complete) = read_up_to(&mut part, file_budget + 1).await?;
            if complete && data.len() as u64 <= file_budget {
                file_budget -= data.len() as u64;
                let headers = part.headers().clone();
                form.files.insert(form_name, FileHeader::in_memory(file_name, headers, data.freeze()));
                continue;
            }

            // over budget: stream the rest of the part into a temp file
            let headers = part.headers().clone();
            let path = tmp_file_path();
            let size = match spill_to_disk(&path, &data, &mut part).await {
                Ok(size) => size,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e);
                }
            };
            debug!(path = %path.display(), size, "spilled multipart file to disk");

            let replaced = form.files.insert(form_name, FileHeader::on_disk(file_name, headers, size, path));
            if let Some(prev) = replaced {
                if let Some(prev_path) = prev.tmp_path {
                    let _ = tokio::fs::remove_file(prev_path).await;
                }
            }
        }

        Ok(form)
    }
}

/// Accumulates part data until `limit` bytes are held or the part ends.
/// The second value tells whether the part was read to its end.
async fn read_up_to(part: &mut Part<'_, '_, '_>, limit: u64) -> Result<(BytesMut, bool), MultipartError> {
    let mut data = BytesMut::new();
    while (data.len() as u64) < limit {
        match part.chunk().await? {
            Some(chunk) => data.extend_from_slice(&chunk),
            None => return Ok((data, true)),
        }
    }
    Ok((data, false))
}

async fn spill_to_disk(path: &Path, buffered: &[u8], part: &mut Part<'_, '_, '_>) -> Result<u64, MultipartError> {
    let mut file = File::create(path).await?;
    let mut size = buffered.len() as u64;
    file.write_all(buffered).await?;

    while let Some(chunk) = part.chunk().await? {
        size += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(size)
}

fn tmp_file_path() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    std::env::temp_dir().join(format!("{TMP_FILE_PREFIX}{}-{nanos}-{seq}", std::process::id()))
}
