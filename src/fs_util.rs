use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::error::ImporterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEntry {
    Dir { name: String, path: Utf8PathBuf },
    File { name: String, path: Utf8PathBuf },
    NonUtf8 { path: PathBuf, is_dir: bool },
}

/// Lists the immediate entries of `dir`, sorted by file name.
pub fn sorted_entries(dir: &Utf8Path) -> Result<Vec<LocalEntry>, ImporterError> {
    let read = fs::read_dir(dir.as_std_path())
        .map_err(|err| ImporterError::Filesystem(format!("read {dir}: {err}")))?;

    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.map_err(|err| ImporterError::Filesystem(format!("read {dir}: {err}")))?;
        let path = entry.path();
        let is_dir = path.is_dir();
        let local = match (entry.file_name().into_string(), Utf8PathBuf::from_path_buf(path)) {
            (Ok(name), Ok(path)) if is_dir => LocalEntry::Dir { name, path },
            (Ok(name), Ok(path)) => LocalEntry::File { name, path },
            (_, Ok(path)) => LocalEntry::NonUtf8 {
                path: path.into_std_path_buf(),
                is_dir,
            },
            (_, Err(path)) => LocalEntry::NonUtf8 { path, is_dir },
        };
        entries.push(local);
    }

    entries.sort_by(|a, b| entry_key(a).cmp(&entry_key(b)));
    Ok(entries)
}

fn entry_key(entry: &LocalEntry) -> PathBuf {
    match entry {
        LocalEntry::Dir { path, .. } | LocalEntry::File { path, .. } => {
            path.clone().into_std_path_buf()
        }
        LocalEntry::NonUtf8 { path, .. } => path.clone(),
    }
}

pub fn absolute_dir(path: &Path) -> Result<Utf8PathBuf, ImporterError> {
    if !path.is_dir() {
        return Err(ImporterError::InvalidTarget(path.to_path_buf()));
    }
    let absolute = std::path::absolute(path)
        .map_err(|err| ImporterError::Filesystem(format!("{}: {err}", path.display())))?;
    Utf8PathBuf::from_path_buf(absolute)
        .map_err(|path| ImporterError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Utf8Path) -> Result<String, ImporterError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| ImporterError::Filesystem(format!("open {path}: {err}")))?;
    sha256_reader(file).map_err(|err| ImporterError::Filesystem(format!("read {path}: {err}")))
}
