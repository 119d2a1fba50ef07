mod common;

use std::fs;

use assert_matches::assert_matches;
use tempfile::TempDir;

use common::{FakeCatalog, utf8};
use omero_importer::error::ImporterError;
use omero_importer::fs_util::sha256_file;
use omero_importer::upload::{MIMETYPE_OCTET_STREAM, RAW_FILE_CHUNK_SIZE, upload_file};

fn file_of(temp: &TempDir, name: &str, len: usize) -> camino::Utf8PathBuf {
    let path = temp.path().join(name);
    let bytes = (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    fs::write(&path, bytes).unwrap();
    utf8(&path)
}

fn expected_chunks(len: usize) -> Vec<usize> {
    let mut out = vec![RAW_FILE_CHUNK_SIZE; len / RAW_FILE_CHUNK_SIZE];
    if len % RAW_FILE_CHUNK_SIZE != 0 {
        out.push(len % RAW_FILE_CHUNK_SIZE);
    }
    out
}

#[test]
fn chunk_lengths_cover_the_file_exactly() {
    let temp = TempDir::new().unwrap();
    for len in [
        1,
        RAW_FILE_CHUNK_SIZE - 1,
        RAW_FILE_CHUNK_SIZE,
        RAW_FILE_CHUNK_SIZE + 1,
        3 * RAW_FILE_CHUNK_SIZE,
        2 * RAW_FILE_CHUNK_SIZE + 4_321,
    ] {
        let catalog = FakeCatalog::new();
        let path = file_of(&temp, &format!("f{len}.bin"), len);

        let uploaded = upload_file(&catalog, &path, MIMETYPE_OCTET_STREAM).unwrap();

        let writes = catalog.with(|state| state.chunk_writes.clone());
        let lengths = writes.iter().map(|(len, _)| *len).collect::<Vec<_>>();
        assert_eq!(lengths, expected_chunks(len), "file of {len} bytes");
        assert_eq!(lengths.iter().sum::<usize>(), len);
        assert_eq!(writes.len(), len.div_ceil(RAW_FILE_CHUNK_SIZE));

        let mut offset = 0u64;
        for (chunk, at) in &writes {
            assert_eq!(*at, offset);
            offset += *chunk as u64;
        }
        assert_eq!(uploaded.size, len as u64);
    }
}

#[test]
fn upload_registers_the_file_and_closes_the_store() {
    let temp = TempDir::new().unwrap();
    let path = file_of(&temp, "meta.json", 1_000);
    let catalog = FakeCatalog::new();

    let uploaded = upload_file(&catalog, &path, "application/json").unwrap();

    assert_eq!(uploaded.name, "meta.json");
    assert_eq!(uploaded.sha256, sha256_file(&path).unwrap());
    catalog.with(|state| {
        assert_eq!(state.store_closes, 1);
        assert_eq!(state.uploads.len(), 1);
        let (spec, bytes) = &state.uploads[0];
        assert_eq!(spec.mimetype, "application/json");
        assert_eq!(spec.size, 1_000);
        assert_eq!(bytes, &fs::read(path.as_std_path()).unwrap());
    });
}

#[test]
fn empty_file_uploads_without_writes() {
    let temp = TempDir::new().unwrap();
    let path = file_of(&temp, "empty.bin", 0);
    let catalog = FakeCatalog::new();

    let uploaded = upload_file(&catalog, &path, MIMETYPE_OCTET_STREAM).unwrap();

    assert_eq!(uploaded.size, 0);
    catalog.with(|state| {
        assert!(state.chunk_writes.is_empty());
        assert_eq!(state.uploads.len(), 1);
        assert_eq!(state.store_closes, 1);
    });
}

#[test]
fn store_is_closed_when_a_write_fails() {
    let temp = TempDir::new().unwrap();
    let path = file_of(&temp, "big.bin", 3 * RAW_FILE_CHUNK_SIZE);
    let catalog = FakeCatalog::new();
    catalog.with(|state| state.fail_write_at_chunk = Some(1));

    let result = upload_file(&catalog, &path, MIMETYPE_OCTET_STREAM);

    assert_matches!(result, Err(ImporterError::Upload(_)));
    catalog.with(|state| {
        assert_eq!(state.chunk_writes.len(), 1);
        assert_eq!(state.store_closes, 1);
        assert!(state.uploads.is_empty());
    });
}

#[test]
fn missing_file_fails_before_opening_a_store() {
    let temp = TempDir::new().unwrap();
    let path = utf8(&temp.path().join("absent.bin"));
    let catalog = FakeCatalog::new();

    assert_matches!(
        upload_file(&catalog, &path, MIMETYPE_OCTET_STREAM),
        Err(ImporterError::Filesystem(_))
    );
    assert!(catalog.calls().is_empty());
}
