//! Attaches key/value maps, tables and files to Projects, Datasets and Images.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::app::{Phase, ProgressEvent, ProgressSink};
use crate::catalog::{Annotation, Catalog, NS_CLIENT_CREATED, NS_FILE_ANNOTATION};
use crate::domain::{EntityId, EntityKind, EntityRef, TargetRef};
use crate::error::ImporterError;
use crate::lookup::{find_dataset, find_image, find_project};
use crate::table::TableData;
use crate::upload::{self, MIMETYPE_CSV, UploadedFile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageLocation {
    pub image_id: EntityId,
    pub dataset_id: EntityId,
    pub project_id: EntityId,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileWritten {
    pub annotation_id: EntityId,
    pub upload: UploadedFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableWritten {
    pub table_id: EntityId,
    pub csv: Option<FileWritten>,
}

/// Parses `key=value`, splitting at the first `=`. Values may be empty, keys may not.
pub fn parse_key_value(input: &str) -> Result<(String, String), ImporterError> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| ImporterError::InvalidKeyValue(input.to_string()))?;
    if key.is_empty() {
        return Err(ImporterError::InvalidKeyValue(input.to_string()));
    }
    Ok((key.to_string(), value.to_string()))
}

pub struct Annotator<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    sink: &'a dyn ProgressSink,
}

impl<'a, C: Catalog + ?Sized> Annotator<'a, C> {
    pub fn new(catalog: &'a C, sink: &'a dyn ProgressSink) -> Self {
        Self { catalog, sink }
    }

    pub fn resolve_target(&self, target: &TargetRef) -> Result<EntityRef, ImporterError> {
        self.sink.event(ProgressEvent::phase(
            Phase::Annotate,
            format!("resolving {target}"),
        ));
        match target {
            TargetRef::Id(entity) => {
                self.verify_exists(*entity)?;
                Ok(*entity)
            }
            TargetRef::Path {
                project,
                dataset,
                image,
            } => {
                let project_record = find_project(self.catalog, project)?
                    .ok_or_else(|| ImporterError::EntityNotFound(format!("project {project}")))?;
                let Some(dataset) = dataset else {
                    return Ok(EntityRef::new(EntityKind::Project, project_record.id));
                };

                let dataset_record = find_dataset(self.catalog, project_record.id, dataset)?
                    .ok_or_else(|| {
                        ImporterError::EntityNotFound(format!("dataset {project}/{dataset}"))
                    })?;
                let Some(image) = image else {
                    return Ok(EntityRef::new(EntityKind::Dataset, dataset_record.id));
                };

                let image_record = find_image(self.catalog, dataset_record.id, image)?
                    .ok_or_else(|| {
                        ImporterError::EntityNotFound(format!("image {project}/{dataset}/{image}"))
                    })?;
                Ok(EntityRef::new(EntityKind::Image, image_record.id))
            }
        }
    }

    /// Datasets and Images are only found through their parents.
    fn verify_exists(&self, entity: EntityRef) -> Result<(), ImporterError> {
        let found = match entity.kind {
            EntityKind::Project => self
                .catalog
                .list_projects()?
                .iter()
                .any(|project| project.id == entity.id),
            EntityKind::Dataset => {
                let mut found = false;
                for project in self.catalog.list_projects()? {
                    if self
                        .catalog
                        .list_datasets(project.id)?
                        .iter()
                        .any(|dataset| dataset.id == entity.id)
                    {
                        found = true;
                        break;
                    }
                }
                found
            }
            EntityKind::Image => self.image_info(entity.id)?.is_some(),
        };
        if found {
            Ok(())
        } else {
            Err(ImporterError::EntityNotFound(entity.to_string()))
        }
    }

    pub fn write_map(
        &self,
        target: EntityRef,
        description: &str,
        pairs: Vec<(String, String)>,
    ) -> Result<EntityId, ImporterError> {
        self.sink.event(ProgressEvent::phase(
            Phase::Annotate,
            format!("map annotation with {} pairs on {target}", pairs.len()),
        ));
        let annotation = Annotation::Map {
            description: description.to_string(),
            namespace: NS_CLIENT_CREATED.to_string(),
            pairs,
        };
        let id = self.catalog.attach_annotation(target, &annotation)?;
        tracing::info!(target = %target, annotation = %id, "map annotation attached");
        Ok(id)
    }

    pub fn write_table(
        &self,
        target: EntityRef,
        name: &str,
        description: &str,
        table: &TableData,
        save_as_csv: bool,
    ) -> Result<TableWritten, ImporterError> {
        for column in table.heterogeneous_columns() {
            tracing::warn!(
                table = name,
                column,
                "column holds values of more than one type; submitting as given"
            );
        }

        self.sink.event(ProgressEvent::phase(
            Phase::Annotate,
            format!(
                "table {name} ({} columns, {} rows) on {target}",
                table.columns.len(),
                table.row_count()
            ),
        ));
        let annotation = Annotation::Table {
            name: name.to_string(),
            table: table.clone(),
        };
        let table_id = self.catalog.attach_annotation(target, &annotation)?;
        tracing::info!(target = %target, table = name, annotation = %table_id, "table attached");

        if !save_as_csv {
            return Ok(TableWritten {
                table_id,
                csv: None,
            });
        }

        let dir = tempfile::tempdir()
            .map_err(|err| ImporterError::Filesystem(format!("temporary directory: {err}")))?;
        let csv_path = Utf8PathBuf::from_path_buf(dir.path().join(format!("{name}_CSV.csv")))
            .map_err(|path| ImporterError::Filesystem(format!("non-utf8 path: {}", path.display())))?;
        fs::write(csv_path.as_std_path(), table.to_csv())
            .map_err(|err| ImporterError::Filesystem(format!("write {csv_path}: {err}")))?;

        let csv = self.attach_uploaded(
            target,
            &csv_path,
            MIMETYPE_CSV,
            Some(description.to_string()),
            NS_CLIENT_CREATED,
        )?;
        Ok(TableWritten {
            table_id,
            csv: Some(csv),
        })
    }

    pub fn write_file(
        &self,
        target: EntityRef,
        path: &Utf8Path,
        namespace: Option<&str>,
    ) -> Result<FileWritten, ImporterError> {
        if !path.as_std_path().is_file() {
            return Err(ImporterError::Filesystem(format!("{path} is not a file")));
        }
        self.attach_uploaded(
            target,
            path,
            upload::mimetype_for(path),
            None,
            namespace.unwrap_or(NS_FILE_ANNOTATION),
        )
    }

    fn attach_uploaded(
        &self,
        target: EntityRef,
        path: &Utf8Path,
        mimetype: &str,
        description: Option<String>,
        namespace: &str,
    ) -> Result<FileWritten, ImporterError> {
        self.sink.event(ProgressEvent::phase(
            Phase::Annotate,
            format!("uploading {path}"),
        ));
        let start = std::time::Instant::now();
        let uploaded = upload::upload_file(self.catalog, path, mimetype)?;
        self.sink.event(
            ProgressEvent::message(format!(
                "upload.done file={} bytes={}",
                uploaded.file_id, uploaded.size
            ))
            .with_elapsed(start.elapsed()),
        );

        let annotation = Annotation::File {
            file: uploaded.file_id,
            description,
            namespace: namespace.to_string(),
        };
        let annotation_id = self.catalog.attach_annotation(target, &annotation)?;
        tracing::info!(
            target = %target,
            file = %uploaded.file_id,
            annotation = %annotation_id,
            "file annotation attached"
        );
        Ok(FileWritten {
            annotation_id,
            upload: uploaded,
        })
    }

    /// Locates an Image by scanning every Project, Dataset and Image.
    pub fn image_info(&self, image_id: EntityId) -> Result<Option<ImageLocation>, ImporterError> {
        self.sink.event(ProgressEvent::phase(
            Phase::Annotate,
            format!("locating image {image_id}"),
        ));
        for project in self.catalog.list_projects()? {
            for dataset in self.catalog.list_datasets(project.id)? {
                if let Some(image) = self
                    .catalog
                    .list_images(dataset.id)?
                    .into_iter()
                    .find(|image| image.id == image_id)
                {
                    return Ok(Some(ImageLocation {
                        image_id,
                        dataset_id: dataset.id,
                        project_id: project.id,
                        path: format!("{}/{}/{}", project.name, dataset.name, image.name),
                    }));
                }
            }
        }
        Ok(None)
    }
}
