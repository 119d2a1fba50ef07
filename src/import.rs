use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::catalog::Catalog;
use crate::domain::EntityId;
use crate::error::ImporterError;
use crate::fs_util::{LocalEntry, sorted_entries};

/// File-name filters applied to import candidates. Empty filters accept every file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFilter {
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub name: String,
}

impl ImportFilter {
    pub fn new(extension: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            name: name.into(),
        }
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        if !self.extension.is_empty() && !file_name.ends_with(&self.extension) {
            return false;
        }
        if !self.name.is_empty() && !file_name.contains(&self.name) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Imported,
    Planned,
    Empty,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub project: String,
    pub dataset: String,
    pub dataset_id: Option<EntityId>,
    pub files: Vec<Utf8PathBuf>,
    #[serde(flatten)]
    pub status: BatchStatus,
}

/// Regular files directly inside `dataset_dir` that pass `filter`, in name order.
pub fn collect_candidates(
    dataset_dir: &Utf8Path,
    filter: &ImportFilter,
) -> Result<Vec<Utf8PathBuf>, ImporterError> {
    let mut paths = Vec::new();
    for entry in sorted_entries(dataset_dir)? {
        match entry {
            LocalEntry::File { name, path } if filter.accepts(&name) => paths.push(path),
            LocalEntry::NonUtf8 { path, is_dir: false } => {
                tracing::warn!(path = %path.display(), "skipping file with non-utf8 name");
            }
            _ => {}
        }
    }
    Ok(paths)
}

/// Submits one batch to the import facility. Failures are reported in the
/// returned status and never abort the caller's walk.
pub fn dispatch<C: Catalog + ?Sized>(
    catalog: &C,
    dataset: EntityId,
    paths: &[Utf8PathBuf],
    sink: &dyn ProgressSink,
) -> BatchStatus {
    if paths.is_empty() {
        sink.event(ProgressEvent::phase(
            Phase::Import,
            format!("dataset {dataset}: nothing to import"),
        ));
        return BatchStatus::Empty;
    }

    for path in paths {
        tracing::warn!(%path, dataset = %dataset, "will be imported");
        sink.event(ProgressEvent::message(format!("import.candidate {path}")));
    }
    sink.event(ProgressEvent::phase(
        Phase::Import,
        format!("importing {} files into dataset {dataset}", paths.len()),
    ));

    let start = std::time::Instant::now();
    match catalog.import_files(dataset, paths) {
        Ok(()) => {
            let latency = start.elapsed().as_millis();
            tracing::info!(dataset = %dataset, files = paths.len(), latency_ms = latency as u64, "import finished");
            sink.event(ProgressEvent::message(format!(
                "import.done files={} latency_ms={latency}",
                paths.len()
            )));
            BatchStatus::Imported
        }
        Err(err) => {
            tracing::error!(dataset = %dataset, error = %err, "import batch failed");
            sink.event(ProgressEvent::message(format!("import.failed {err}")));
            BatchStatus::Failed {
                reason: err.to_string(),
            }
        }
    }
}
