use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::{DatasetRecord, EntityId, EntityRef, ImageRecord, ProjectRecord};
use crate::error::ImporterError;
use crate::table::TableData;

/// Namespace that keeps map and file annotations editable in OMERO.web and OMERO.insight.
pub const NS_CLIENT_CREATED: &str = "openmicroscopy.org/omero/client/mapAnnotation";

pub const NS_FILE_ANNOTATION: &str = "micro-meta-app.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    Map {
        description: String,
        namespace: String,
        pairs: Vec<(String, String)>,
    },
    Table {
        name: String,
        table: TableData,
    },
    File {
        file: EntityId,
        description: Option<String>,
        namespace: String,
    },
}

/// Metadata registered for a file before its bytes are transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginalFileSpec {
    pub name: String,
    pub path: Utf8PathBuf,
    pub size: u64,
    pub mimetype: String,
    pub sha256: String,
}

pub trait RawFileStore {
    fn write(&mut self, chunk: &[u8], offset: u64) -> Result<(), ImporterError>;
    fn save(&mut self) -> Result<EntityId, ImporterError>;
    fn close(&mut self) -> Result<(), ImporterError>;
}

pub trait Catalog: Send {
    fn list_projects(&self) -> Result<Vec<ProjectRecord>, ImporterError>;
    fn list_datasets(&self, project: EntityId) -> Result<Vec<DatasetRecord>, ImporterError>;
    fn list_images(&self, dataset: EntityId) -> Result<Vec<ImageRecord>, ImporterError>;
    fn create_project(&self, name: &str) -> Result<EntityId, ImporterError>;
    fn create_dataset(&self, name: &str) -> Result<EntityId, ImporterError>;
    fn link_dataset_to_project(
        &self,
        dataset: EntityId,
        project: EntityId,
    ) -> Result<(), ImporterError>;
    fn import_files(&self, dataset: EntityId, paths: &[Utf8PathBuf]) -> Result<(), ImporterError>;
    fn attach_annotation(
        &self,
        target: EntityRef,
        annotation: &Annotation,
    ) -> Result<EntityId, ImporterError>;
    fn open_raw_file_store<'a>(
        &'a self,
        spec: &OriginalFileSpec,
    ) -> Result<Box<dyn RawFileStore + 'a>, ImporterError>;
    fn lookup_user(&self, name: &str) -> Result<Option<EntityId>, ImporterError>;
}
