mod common;

use tempfile::TempDir;

use common::{FakeCatalog, touch, utf8};
use omero_importer::app::{App, NoProgress};
use omero_importer::import::{ImportFilter, collect_candidates};
use omero_importer::reconcile::WalkOptions;

#[test]
fn extension_and_name_filters_must_both_match() {
    let filter = ImportFilter::new(".tif", "snr");

    assert!(filter.accepts("cell_snr_01.tif"));
    assert!(!filter.accepts("cell_01.tif"));
    assert!(!filter.accepts("cell_snr_01.png"));
    assert!(!filter.accepts("snr.tif.bak"));
}

#[test]
fn name_filter_alone_is_a_substring_match() {
    let filter = ImportFilter::new("", "snr");

    assert!(filter.accepts("snr"));
    assert!(filter.accepts("a_snr_b.czi"));
    assert!(!filter.accepts("SNR.tif"));
}

#[test]
fn candidates_are_sorted_files_passing_the_filter() {
    let temp = TempDir::new().unwrap();
    for name in ["z_snr.tif", "a_snr.tif", "b.tif", "c_snr.png"] {
        touch(&temp.path().join(name));
    }
    std::fs::create_dir(temp.path().join("d_snr.tif")).unwrap();

    let files = collect_candidates(&utf8(temp.path()), &ImportFilter::new(".tif", "snr")).unwrap();

    let names = files
        .iter()
        .map(|path| path.file_name().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a_snr.tif", "z_snr.tif"]);
}

#[test]
fn walk_applies_the_filter_to_every_batch() {
    let temp = TempDir::new().unwrap();
    for name in ["P/D1/keep_snr.tif", "P/D1/drop.tif", "P/D2/other_snr.tif", "P/D2/x.jpg"] {
        touch(&temp.path().join(name));
    }
    let app = App::new(FakeCatalog::new());

    app.import_tree(
        &utf8(temp.path()),
        WalkOptions {
            filter: ImportFilter::new(".tif", "snr"),
            dry_run: false,
        },
        &NoProgress,
    )
    .unwrap();

    let imported = app
        .catalog()
        .imports()
        .into_iter()
        .flat_map(|(_, files)| files)
        .collect::<Vec<_>>();
    assert_eq!(imported, vec!["keep_snr.tif", "other_snr.tif"]);
}
