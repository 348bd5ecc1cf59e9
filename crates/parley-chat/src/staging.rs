//! Local staging of request-scoped file bodies.
//!
//! Files are copied to the staging directory while the write transaction is
//! still open, so the request can drop its buffers as soon as it returns.
//! A [`StagedFile`] owns its copy and removes it when dropped, which covers
//! success, failure and rollback alike.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::models::{MessageId, RoomId};

const STAGE_CHUNK: usize = 64 * 1024;
const MAX_NAME_LEN: usize = 100;
const MAX_EXT_LEN: usize = 16;

pub(crate) const STAGED_PREFIX: &str = "chat-upload-";

/// A file as received from the request, before staging.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl IncomingFile {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    original_name: String,
    content_type: String,
    size: u64,
    sha256: String,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex SHA-256 of the staged bytes.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {}: {}", self.path.display(), e),
        }
    }
}

/// Writes incoming files into the staging directory.
pub struct Stager {
    dir: PathBuf,
}

impl Stager {
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy one file into staging. Blocking.
    pub fn stage(&self, file: &IncomingFile) -> io::Result<StagedFile> {
        let path = self.dir.join(format!(
            "{}{}{}",
            STAGED_PREFIX,
            Uuid::new_v4(),
            extension_of(&file.file_name)
        ));
        let mut out = fs::File::create(&path)?;

        // From here on the guard removes the partial copy on any error.
        let mut staged = StagedFile {
            path,
            original_name: file.file_name.clone(),
            content_type: file
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: 0,
            sha256: String::new(),
        };

        let mut hasher = Sha256::new();
        for chunk in file.data.chunks(STAGE_CHUNK) {
            out.write_all(chunk)?;
            hasher.update(chunk);
        }
        out.sync_all()?;

        staged.size = file.data.len() as u64;
        staged.sha256 = hex::encode(hasher.finalize());
        debug!(
            "Staged '{}' ({} bytes) at {}",
            staged.original_name,
            staged.size,
            staged.path.display()
        );
        Ok(staged)
    }

    /// Stage every non-empty file. On error, files staged so far are removed.
    pub fn stage_all(&self, files: &[IncomingFile]) -> io::Result<Vec<StagedFile>> {
        files
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| self.stage(f))
            .collect()
    }
}

/// Reduce a client-supplied file name to `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    // Browsers on Windows may send the full path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    let mut out: String = cleaned.chars().take(MAX_NAME_LEN).collect();
    if out.is_empty() {
        out.push_str("file");
    }
    out
}

/// `chat/{roomId}/message/{messageId}/{suffix}_{name}` with a fresh suffix
/// per call.
pub fn storage_key(chat_id: RoomId, message_id: MessageId, original_name: &str) -> String {
    format!(
        "chat/{}/message/{}/{}_{}",
        chat_id,
        message_id,
        Uuid::new_v4().simple(),
        sanitize_file_name(original_name)
    )
}

fn extension_of(name: &str) -> String {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext)
            if !ext.is_empty()
                && ext.len() <= MAX_EXT_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}
