//! Maps a local `root/<project>/<dataset>/<files>` tree onto remote Projects and
//! Datasets, creating what is missing and importing each Dataset's files.
//!
//! Every Project and Dataset directory yields one [`DirectoryOutcome`]; a
//! directory that cannot be reconciled is skipped with a [`SkipReason`] and the
//! walk moves on to its next sibling. Service and access errors raised while
//! listing remote collections abort the walk.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::catalog::Catalog;
use crate::domain::{EntityId, EntityKind};
use crate::error::ImporterError;
use crate::fs_util::{LocalEntry, sorted_entries};
use crate::import::{self, BatchOutcome, BatchStatus, ImportFilter};
use crate::lookup::NameIndex;

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub filter: ImportFilter,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NonUtf8Name,
    Unreadable(String),
    CreateFailed(String),
    LinkFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DirectoryStatus {
    Reused { id: EntityId },
    Created { id: EntityId },
    WouldCreate,
    Skipped { reason: SkipReason },
    /// Created on the server, then abandoned because its contents could not be read.
    CreatedThenSkipped { id: EntityId, reason: SkipReason },
}

impl DirectoryStatus {
    pub fn id(&self) -> Option<EntityId> {
        match self {
            DirectoryStatus::Reused { id }
            | DirectoryStatus::Created { id }
            | DirectoryStatus::CreatedThenSkipped { id, .. } => Some(*id),
            DirectoryStatus::WouldCreate | DirectoryStatus::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            DirectoryStatus::Skipped { .. } | DirectoryStatus::CreatedThenSkipped { .. }
        )
    }

    /// Marks a directory whose listing failed, keeping the id of anything
    /// already created for it.
    fn unreadable(&mut self, err: &ImporterError) {
        let reason = SkipReason::Unreadable(err.to_string());
        *self = match *self {
            DirectoryStatus::Created { id } => DirectoryStatus::CreatedThenSkipped { id, reason },
            _ => DirectoryStatus::Skipped { reason },
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryOutcome {
    pub kind: EntityKind,
    pub name: String,
    pub path: String,
    #[serde(flatten)]
    pub status: DirectoryStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    pub root: Utf8PathBuf,
    pub started_at: String,
    pub dry_run: bool,
    pub directories: Vec<DirectoryOutcome>,
    pub batches: Vec<BatchOutcome>,
}

impl WalkReport {
    pub fn created(&self, kind: EntityKind) -> usize {
        self.directories
            .iter()
            .filter(|dir| dir.kind == kind && matches!(
                    dir.status,
                    DirectoryStatus::Created { .. } | DirectoryStatus::CreatedThenSkipped { .. }
                ))
            .count()
    }

    pub fn skipped(&self) -> Vec<&DirectoryOutcome> {
        self.directories
            .iter()
            .filter(|dir| dir.status.is_skipped())
            .collect()
    }

    pub fn failed_batches(&self) -> Vec<&BatchOutcome> {
        self.batches
            .iter()
            .filter(|batch| matches!(batch.status, BatchStatus::Failed { .. }))
            .collect()
    }

    pub fn imported_files(&self) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.status == BatchStatus::Imported)
            .map(|batch| batch.files.len())
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.skipped().is_empty() && self.failed_batches().is_empty()
    }

    pub fn outcome(&self, kind: EntityKind, name: &str) -> Option<&DirectoryOutcome> {
        self.directories
            .iter()
            .find(|dir| dir.kind == kind && dir.name == name)
    }
}

pub struct Reconciler<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    index: NameIndex,
    options: WalkOptions,
    sink: &'a dyn ProgressSink,
}

impl<'a, C: Catalog + ?Sized> Reconciler<'a, C> {
    pub fn new(catalog: &'a C, options: WalkOptions, sink: &'a dyn ProgressSink) -> Self {
        Self {
            catalog,
            index: NameIndex::new(),
            options,
            sink,
        }
    }

    pub fn walk(&mut self, root: &Utf8Path) -> Result<WalkReport, ImporterError> {
        if !root.as_std_path().is_dir() {
            return Err(ImporterError::InvalidTarget(root.as_std_path().to_path_buf()));
        }

        let mut report = WalkReport {
            root: root.to_path_buf(),
            started_at: chrono::Utc::now().to_rfc3339(),
            dry_run: self.options.dry_run,
            ..WalkReport::default()
        };

        for entry in sorted_entries(root)? {
            match entry {
                LocalEntry::Dir { name, path } => self.walk_project(&name, &path, &mut report)?,
                LocalEntry::NonUtf8 { path, is_dir: true } => {
                    report.directories.push(DirectoryOutcome {
                        kind: EntityKind::Project,
                        name: path.to_string_lossy().to_string(),
                        path: path.display().to_string(),
                        status: DirectoryStatus::Skipped {
                            reason: SkipReason::NonUtf8Name,
                        },
                    });
                }
                _ => {}
            }
        }

        Ok(report)
    }

    fn walk_project(
        &mut self,
        name: &str,
        path: &Utf8Path,
        report: &mut WalkReport,
    ) -> Result<(), ImporterError> {
        self.sink.event(ProgressEvent::phase(
            Phase::Reconcile,
            format!("project {name}"),
        ));
        let status = self.resolve_project(name)?;
        let project_id = status.id();
        let skipped = matches!(status, DirectoryStatus::Skipped { .. });
        report.directories.push(DirectoryOutcome {
            kind: EntityKind::Project,
            name: name.to_string(),
            path: path.to_string(),
            status,
        });
        if skipped {
            return Ok(());
        }

        let entries = match sorted_entries(path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(project = name, error = %err, "cannot read project directory");
                if let Some(last) = report.directories.last_mut() {
                    last.status.unreadable(&err);
                }
                return Ok(());
            }
        };

        for entry in entries {
            match entry {
                LocalEntry::Dir {
                    name: dataset,
                    path: dataset_path,
                } => self.walk_dataset(name, project_id, &dataset, &dataset_path, report)?,
                LocalEntry::NonUtf8 { path, is_dir: true } => {
                    report.directories.push(DirectoryOutcome {
                        kind: EntityKind::Dataset,
                        name: path.to_string_lossy().to_string(),
                        path: path.display().to_string(),
                        status: DirectoryStatus::Skipped {
                            reason: SkipReason::NonUtf8Name,
                        },
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn walk_dataset(
        &mut self,
        project: &str,
        project_id: Option<EntityId>,
        name: &str,
        path: &Utf8Path,
        report: &mut WalkReport,
    ) -> Result<(), ImporterError> {
        self.sink.event(ProgressEvent::phase(
            Phase::Reconcile,
            format!("dataset {project}/{name}"),
        ));
        let status = match project_id {
            Some(project_id) => self.resolve_dataset(project_id, name)?,
            None => DirectoryStatus::WouldCreate,
        };
        let dataset_id = status.id();
        let skipped = matches!(status, DirectoryStatus::Skipped { .. });
        report.directories.push(DirectoryOutcome {
            kind: EntityKind::Dataset,
            name: name.to_string(),
            path: path.to_string(),
            status,
        });
        if skipped {
            return Ok(());
        }

        let files = match import::collect_candidates(path, &self.options.filter) {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(dataset = name, error = %err, "cannot read dataset directory");
                if let Some(last) = report.directories.last_mut() {
                    last.status.unreadable(&err);
                }
                return Ok(());
            }
        };

        let status = match (self.options.dry_run, dataset_id) {
            (false, Some(dataset_id)) => import::dispatch(self.catalog, dataset_id, &files, self.sink),
            (_, _) if files.is_empty() => BatchStatus::Empty,
            _ => BatchStatus::Planned,
        };
        report.batches.push(BatchOutcome {
            project: project.to_string(),
            dataset: name.to_string(),
            dataset_id,
            files,
            status,
        });
        Ok(())
    }

    fn resolve_project(&mut self, name: &str) -> Result<DirectoryStatus, ImporterError> {
        if let Some(id) = self.index.project_id(self.catalog, name)? {
            return Ok(DirectoryStatus::Reused { id });
        }
        if self.options.dry_run {
            return Ok(DirectoryStatus::WouldCreate);
        }

        tracing::info!(project = name, "creating project");
        self.sink.event(ProgressEvent::message(format!("create.project {name}")));
        match self.catalog.create_project(name) {
            Ok(id) => {
                self.index.insert_project(name, id);
                Ok(DirectoryStatus::Created { id })
            }
            Err(err) => {
                tracing::warn!(project = name, error = %err, "project creation failed, re-querying");
                match self.index.refresh_project(self.catalog, name)? {
                    Some(id) => Ok(DirectoryStatus::Reused { id }),
                    None => Ok(DirectoryStatus::Skipped {
                        reason: SkipReason::CreateFailed(err.to_string()),
                    }),
                }
            }
        }
    }

    fn resolve_dataset(
        &mut self,
        project: EntityId,
        name: &str,
    ) -> Result<DirectoryStatus, ImporterError> {
        if let Some(id) = self.index.dataset_id(self.catalog, project, name)? {
            return Ok(DirectoryStatus::Reused { id });
        }
        if self.options.dry_run {
            return Ok(DirectoryStatus::WouldCreate);
        }

        tracing::info!(dataset = name, project = %project, "creating dataset");
        self.sink.event(ProgressEvent::message(format!("create.dataset {name}")));
        let id = match self.catalog.create_dataset(name) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(dataset = name, error = %err, "dataset creation failed, re-querying");
                return match self.index.refresh_dataset(self.catalog, project, name)? {
                    Some(id) => Ok(DirectoryStatus::Reused { id }),
                    None => Ok(DirectoryStatus::Skipped {
                        reason: SkipReason::CreateFailed(err.to_string()),
                    }),
                };
            }
        };

        if let Err(err) = self.catalog.link_dataset_to_project(id, project) {
            tracing::warn!(dataset = name, project = %project, error = %err, "linking dataset failed");
            return Ok(DirectoryStatus::Skipped {
                reason: SkipReason::LinkFailed(err.to_string()),
            });
        }
        self.index.insert_dataset(project, name, id);
        Ok(DirectoryStatus::Created { id })
    }
}
