use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;

use crate::annotate::{Annotator, ImageLocation};
use crate::catalog::Catalog;
use crate::domain::{EntityId, EntityRef, TargetRef};
use crate::error::ImporterError;
use crate::reconcile::{Reconciler, WalkOptions, WalkReport};
use crate::table::TableData;
use crate::upload::UploadedFile;

#[derive(Debug, Clone, Serialize)]
pub struct AnnotationResult {
    pub target: EntityRef,
    pub kind: String,
    pub annotation_id: EntityId,
    /// Set when the annotation carried an uploaded file (table CSV export, file annotation).
    pub file_annotation_id: Option<EntityId>,
    pub file: Option<UploadedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageInfoResult {
    pub image_id: EntityId,
    pub location: Option<ImageLocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResult {
    pub name: String,
    pub user_id: Option<EntityId>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Import,
    Annotate,
    Info,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Reconcile,
    Import,
    Annotate,
    Close,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Connect => "Connect",
            Phase::Reconcile => "Reconcile",
            Phase::Import => "Import",
            Phase::Annotate => "Annotate",
            Phase::Close => "Close",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn phase(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            message: format!("phase={}; {}", phase.label(), message.into()),
            elapsed: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Discards every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct App<C: Catalog> {
    catalog: C,
}

impl<C: Catalog> App<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn into_catalog(self) -> C {
        self.catalog
    }

    pub fn import_tree(
        &self,
        root: &Utf8Path,
        options: WalkOptions,
        sink: &dyn ProgressSink,
    ) -> Result<WalkReport, ImporterError> {
        let start = std::time::Instant::now();
        sink.event(ProgressEvent::phase(
            Phase::Reconcile,
            format!("walking {root}"),
        ));

        let mut reconciler = Reconciler::new(&self.catalog, options, sink);
        let report = reconciler.walk(root)?;

        tracing::info!(
            root = %root,
            directories = report.directories.len(),
            batches = report.batches.len(),
            imported = report.imported_files(),
            "walk finished"
        );
        sink.event(
            ProgressEvent::message(format!(
                "walk.done directories={} imported={}",
                report.directories.len(),
                report.imported_files()
            ))
            .with_elapsed(start.elapsed()),
        );
        Ok(report)
    }

    pub fn annotate_map(
        &self,
        target: &TargetRef,
        description: &str,
        pairs: Vec<(String, String)>,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotationResult, ImporterError> {
        let annotator = Annotator::new(&self.catalog, sink);
        let target = annotator.resolve_target(target)?;
        let annotation_id = annotator.write_map(target, description, pairs)?;
        Ok(AnnotationResult {
            target,
            kind: "map".to_string(),
            annotation_id,
            file_annotation_id: None,
            file: None,
        })
    }

    pub fn annotate_table(
        &self,
        target: &TargetRef,
        name: &str,
        description: &str,
        table: TableData,
        save_as_csv: bool,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotationResult, ImporterError> {
        let annotator = Annotator::new(&self.catalog, sink);
        let target = annotator.resolve_target(target)?;
        let written = annotator.write_table(target, name, description, &table, save_as_csv)?;
        Ok(AnnotationResult {
            target,
            kind: "table".to_string(),
            annotation_id: written.table_id,
            file_annotation_id: written.csv.as_ref().map(|csv| csv.annotation_id),
            file: written.csv.map(|csv| csv.upload),
        })
    }

    pub fn annotate_file(
        &self,
        target: &TargetRef,
        path: &Utf8Path,
        namespace: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotationResult, ImporterError> {
        let annotator = Annotator::new(&self.catalog, sink);
        let target = annotator.resolve_target(target)?;
        let written = annotator.write_file(target, path, namespace)?;
        Ok(AnnotationResult {
            target,
            kind: "file".to_string(),
            annotation_id: written.annotation_id,
            file_annotation_id: Some(written.annotation_id),
            file: Some(written.upload),
        })
    }

    pub fn image_info(
        &self,
        image_id: EntityId,
        sink: &dyn ProgressSink,
    ) -> Result<ImageInfoResult, ImporterError> {
        let annotator = Annotator::new(&self.catalog, sink);
        let location = annotator.image_info(image_id)?;
        Ok(ImageInfoResult { image_id, location })
    }

    pub fn user_id(&self, name: &str, sink: &dyn ProgressSink) -> Result<UserResult, ImporterError> {
        sink.event(ProgressEvent::phase(
            Phase::Connect,
            format!("looking up user {name}"),
        ));
        let user_id = self.catalog.lookup_user(name)?;
        Ok(UserResult {
            name: name.to_string(),
            user_id,
        })
    }
}
