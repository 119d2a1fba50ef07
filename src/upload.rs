//! Chunked transfer of local files into raw-file stores.

use std::fs::File;
use std::io::{self, Read};

use camino::Utf8Path;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::catalog::{Catalog, OriginalFileSpec, RawFileStore};
use crate::domain::EntityId;
use crate::error::ImporterError;
use crate::fs_util::sha256_file;

pub const RAW_FILE_CHUNK_SIZE: usize = 262_144;

pub const MIMETYPE_CSV: &str = "text/csv";
pub const MIMETYPE_JSON: &str = "application/json";
pub const MIMETYPE_OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub name: String,
    pub file_id: EntityId,
    pub size: u64,
    pub sha256: String,
}

pub fn mimetype_for(path: &Utf8Path) -> &'static str {
    match path.extension() {
        Some("json") => MIMETYPE_JSON,
        _ => MIMETYPE_OCTET_STREAM,
    }
}

/// Closes the wrapped store when dropped, whatever happened before.
struct StoreGuard<'a> {
    store: Box<dyn RawFileStore + 'a>,
    closed: bool,
}

impl<'a> StoreGuard<'a> {
    fn new(store: Box<dyn RawFileStore + 'a>) -> Self {
        Self {
            store,
            closed: false,
        }
    }

    fn close(mut self) -> Result<(), ImporterError> {
        self.closed = true;
        self.store.close()
    }
}

impl Drop for StoreGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.store.close() {
                tracing::warn!(error = %err, "closing raw file store failed");
            }
        }
    }
}

/// Streams `reader` into `store` in chunks of `chunk_size` bytes. Every chunk is
/// filled completely except the last one. Returns the byte count and the
/// SHA-256 of what was written.
pub fn write_chunks<R: Read>(
    mut reader: R,
    store: &mut dyn RawFileStore,
    chunk_size: usize,
) -> Result<(u64, String), ImporterError> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut hasher = Sha256::new();
    let mut offset = 0u64;

    loop {
        let filled = fill_chunk(&mut reader, &mut buf)
            .map_err(|err| ImporterError::Upload(format!("read failed at offset {offset}: {err}")))?;
        if filled == 0 {
            break;
        }
        store.write(&buf[..filled], offset)?;
        hasher.update(&buf[..filled]);
        offset += filled as u64;
        if filled < buf.len() {
            break;
        }
    }

    Ok((offset, hex::encode(hasher.finalize())))
}

fn fill_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Registers `path` as an original file, streams its bytes and saves the store.
pub fn upload_file<C: Catalog + ?Sized>(
    catalog: &C,
    path: &Utf8Path,
    mimetype: &str,
) -> Result<UploadedFile, ImporterError> {
    let name = path
        .file_name()
        .ok_or_else(|| ImporterError::Upload(format!("{path} has no file name")))?
        .to_string();
    let size = std::fs::metadata(path.as_std_path())
        .map_err(|err| ImporterError::Filesystem(format!("{path}: {err}")))?
        .len();
    let sha256 = sha256_file(path)?;

    let spec = OriginalFileSpec {
        name: name.clone(),
        path: path.to_path_buf(),
        size,
        mimetype: mimetype.to_string(),
        sha256: sha256.clone(),
    };
    tracing::debug!(file = %path, size, mimetype, "uploading file");

    let file = File::open(path.as_std_path())
        .map_err(|err| ImporterError::Filesystem(format!("open {path}: {err}")))?;
    let mut guard = StoreGuard::new(catalog.open_raw_file_store(&spec)?);
    let (written, streamed) = write_chunks(file, guard.store.as_mut(), RAW_FILE_CHUNK_SIZE)?;
    if written != size || streamed != sha256 {
        return Err(ImporterError::Upload(format!(
            "{path}: file changed during upload"
        )));
    }
    let file_id = guard.store.save()?;
    guard.close()?;

    Ok(UploadedFile {
        name,
        file_id,
        size,
        sha256,
    })
}
