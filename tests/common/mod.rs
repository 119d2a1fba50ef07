#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;

use omero_importer::app::{ProgressEvent, ProgressSink};
use omero_importer::catalog::{Annotation, Catalog, OriginalFileSpec, RawFileStore};
use omero_importer::domain::{DatasetRecord, EntityId, EntityRef, ImageRecord, ProjectRecord};
use omero_importer::error::ImporterError;
use omero_importer::session::SessionHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListProjects,
    ListDatasets(EntityId),
    ListImages(EntityId),
    CreateProject(String),
    CreateDataset(String),
    Link { dataset: EntityId, project: EntityId },
    Import { dataset: EntityId, files: Vec<String> },
    Attach(EntityRef),
    OpenStore(String),
    LookupUser(String),
}

#[derive(Debug, Default)]
pub struct State {
    next_id: i64,
    pub projects: Vec<ProjectRecord>,
    pub datasets: HashMap<EntityId, Vec<DatasetRecord>>,
    pub unlinked: Vec<DatasetRecord>,
    pub images: HashMap<EntityId, Vec<ImageRecord>>,
    pub users: HashMap<String, EntityId>,
    pub calls: Vec<Call>,
    pub annotations: Vec<(EntityRef, EntityId, Annotation)>,
    pub uploads: Vec<(OriginalFileSpec, Vec<u8>)>,
    pub chunk_writes: Vec<(usize, u64)>,
    pub store_closes: usize,
    pub session_closes: usize,
    pub fail_create_project: HashSet<String>,
    /// Create calls that fail after another client created the entity.
    pub racing_create_project: HashSet<String>,
    pub fail_create_dataset: HashSet<String>,
    pub fail_link: HashSet<String>,
    pub fail_import: HashSet<EntityId>,
    pub fail_listing: bool,
    pub fail_write_at_chunk: Option<usize>,
    pub fail_close: bool,
}

#[derive(Debug, Default)]
pub struct FakeCatalog {
    pub state: Mutex<State>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        let catalog = Self::default();
        catalog.with(|state| state.next_id = 100);
        catalog
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_project(&self, name: &str) -> EntityId {
        self.with(|state| {
            let id = state.allocate();
            state.projects.push(ProjectRecord {
                id,
                name: name.to_string(),
            });
            state.datasets.entry(id).or_default();
            id
        })
    }

    pub fn add_dataset(&self, project: EntityId, name: &str) -> EntityId {
        self.with(|state| {
            let id = state.allocate();
            state.datasets.entry(project).or_default().push(DatasetRecord {
                id,
                name: name.to_string(),
            });
            state.images.entry(id).or_default();
            id
        })
    }

    pub fn add_image(&self, dataset: EntityId, name: &str) -> EntityId {
        self.with(|state| {
            let id = state.allocate();
            state.images.entry(dataset).or_default().push(ImageRecord {
                id,
                name: name.to_string(),
            });
            id
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|state| state.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|state| state.calls.clear());
    }

    pub fn creates(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::CreateProject(_) | Call::CreateDataset(_)))
            .collect()
    }

    pub fn imports(&self) -> Vec<(EntityId, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Import { dataset, files } => Some((dataset, files)),
                _ => None,
            })
            .collect()
    }

    pub fn project_id(&self, name: &str) -> Option<EntityId> {
        self.with(|state| {
            state
                .projects
                .iter()
                .find(|project| project.name == name)
                .map(|project| project.id)
        })
    }

    pub fn dataset_id(&self, project: EntityId, name: &str) -> Option<EntityId> {
        self.with(|state| {
            state
                .datasets
                .get(&project)
                .and_then(|datasets| datasets.iter().find(|dataset| dataset.name == name))
                .map(|dataset| dataset.id)
        })
    }
}

impl State {
    fn allocate(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::new(self.next_id)
    }

    fn listing(&self) -> Result<(), ImporterError> {
        if self.fail_listing {
            Err(ImporterError::ServiceUnavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Catalog for FakeCatalog {
    fn list_projects(&self) -> Result<Vec<ProjectRecord>, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::ListProjects);
            state.listing()?;
            Ok(state.projects.clone())
        })
    }

    fn list_datasets(&self, project: EntityId) -> Result<Vec<DatasetRecord>, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::ListDatasets(project));
            state.listing()?;
            Ok(state.datasets.get(&project).cloned().unwrap_or_default())
        })
    }

    fn list_images(&self, dataset: EntityId) -> Result<Vec<ImageRecord>, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::ListImages(dataset));
            state.listing()?;
            Ok(state.images.get(&dataset).cloned().unwrap_or_default())
        })
    }

    fn create_project(&self, name: &str) -> Result<EntityId, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::CreateProject(name.to_string()));
            if state.fail_create_project.contains(name) {
                return Err(ImporterError::CommandFailed {
                    command: "omero obj".to_string(),
                    message: "create refused".to_string(),
                });
            }
            let id = state.allocate();
            state.projects.push(ProjectRecord {
                id,
                name: name.to_string(),
            });
            state.datasets.entry(id).or_default();
            if state.racing_create_project.contains(name) {
                return Err(ImporterError::CommandFailed {
                    command: "omero obj".to_string(),
                    message: "duplicate".to_string(),
                });
            }
            Ok(id)
        })
    }

    fn create_dataset(&self, name: &str) -> Result<EntityId, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::CreateDataset(name.to_string()));
            if state.fail_create_dataset.contains(name) {
                return Err(ImporterError::CommandFailed {
                    command: "omero obj".to_string(),
                    message: "create refused".to_string(),
                });
            }
            let id = state.allocate();
            state.unlinked.push(DatasetRecord {
                id,
                name: name.to_string(),
            });
            Ok(id)
        })
    }

    fn link_dataset_to_project(
        &self,
        dataset: EntityId,
        project: EntityId,
    ) -> Result<(), ImporterError> {
        self.with(|state| {
            state.calls.push(Call::Link { dataset, project });
            let position = state
                .unlinked
                .iter()
                .position(|record| record.id == dataset)
                .ok_or_else(|| ImporterError::EntityNotFound(format!("Dataset:{dataset}")))?;
            if state.fail_link.contains(&state.unlinked[position].name) {
                return Err(ImporterError::AccessDenied("link refused".to_string()));
            }
            let record = state.unlinked.remove(position);
            state.datasets.entry(project).or_default().push(record);
            state.images.entry(dataset).or_default();
            Ok(())
        })
    }

    fn import_files(&self, dataset: EntityId, paths: &[Utf8PathBuf]) -> Result<(), ImporterError> {
        self.with(|state| {
            let files = paths
                .iter()
                .map(|path| path.file_name().unwrap_or_default().to_string())
                .collect::<Vec<_>>();
            state.calls.push(Call::Import {
                dataset,
                files: files.clone(),
            });
            if state.fail_import.contains(&dataset) {
                return Err(ImporterError::Import {
                    dataset: dataset.get(),
                    message: "unknown format".to_string(),
                });
            }
            for file in files {
                let id = state.allocate();
                state
                    .images
                    .entry(dataset)
                    .or_default()
                    .push(ImageRecord { id, name: file });
            }
            Ok(())
        })
    }

    fn attach_annotation(
        &self,
        target: EntityRef,
        annotation: &Annotation,
    ) -> Result<EntityId, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::Attach(target));
            let id = state.allocate();
            state.annotations.push((target, id, annotation.clone()));
            Ok(id)
        })
    }

    fn open_raw_file_store<'a>(
        &'a self,
        spec: &OriginalFileSpec,
    ) -> Result<Box<dyn RawFileStore + 'a>, ImporterError> {
        self.with(|state| state.calls.push(Call::OpenStore(spec.name.clone())));
        Ok(Box::new(FakeStore {
            catalog: self,
            spec: spec.clone(),
            bytes: Vec::new(),
            chunks: 0,
        }))
    }

    fn lookup_user(&self, name: &str) -> Result<Option<EntityId>, ImporterError> {
        self.with(|state| {
            state.calls.push(Call::LookupUser(name.to_string()));
            Ok(state.users.get(name).copied())
        })
    }
}

/// Lets a test keep inspecting the fake after handing a session to `run_session`.
impl Catalog for &FakeCatalog {
    fn list_projects(&self) -> Result<Vec<ProjectRecord>, ImporterError> {
        (**self).list_projects()
    }

    fn list_datasets(&self, project: EntityId) -> Result<Vec<DatasetRecord>, ImporterError> {
        (**self).list_datasets(project)
    }

    fn list_images(&self, dataset: EntityId) -> Result<Vec<ImageRecord>, ImporterError> {
        (**self).list_images(dataset)
    }

    fn create_project(&self, name: &str) -> Result<EntityId, ImporterError> {
        (**self).create_project(name)
    }

    fn create_dataset(&self, name: &str) -> Result<EntityId, ImporterError> {
        (**self).create_dataset(name)
    }

    fn link_dataset_to_project(
        &self,
        dataset: EntityId,
        project: EntityId,
    ) -> Result<(), ImporterError> {
        (**self).link_dataset_to_project(dataset, project)
    }

    fn import_files(&self, dataset: EntityId, paths: &[Utf8PathBuf]) -> Result<(), ImporterError> {
        (**self).import_files(dataset, paths)
    }

    fn attach_annotation(
        &self,
        target: EntityRef,
        annotation: &Annotation,
    ) -> Result<EntityId, ImporterError> {
        (**self).attach_annotation(target, annotation)
    }

    fn open_raw_file_store<'a>(
        &'a self,
        spec: &OriginalFileSpec,
    ) -> Result<Box<dyn RawFileStore + 'a>, ImporterError> {
        (**self).open_raw_file_store(spec)
    }

    fn lookup_user(&self, name: &str) -> Result<Option<EntityId>, ImporterError> {
        (**self).lookup_user(name)
    }
}

impl SessionHandle for &FakeCatalog {
    fn close(&mut self) -> Result<(), ImporterError> {
        self.with(|state| {
            state.session_closes += 1;
            if state.fail_close {
                Err(ImporterError::ServiceUnavailable("logout failed".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

pub struct FakeStore<'a> {
    catalog: &'a FakeCatalog,
    spec: OriginalFileSpec,
    bytes: Vec<u8>,
    chunks: usize,
}

impl RawFileStore for FakeStore<'_> {
    fn write(&mut self, chunk: &[u8], offset: u64) -> Result<(), ImporterError> {
        let index = self.chunks;
        self.chunks += 1;
        self.catalog.with(|state| {
            if state.fail_write_at_chunk == Some(index) {
                return Err(ImporterError::Upload("write refused".to_string()));
            }
            state.chunk_writes.push((chunk.len(), offset));
            Ok(())
        })?;
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn save(&mut self) -> Result<EntityId, ImporterError> {
        self.catalog.with(|state| {
            let id = state.allocate();
            state
                .uploads
                .push((self.spec.clone(), std::mem::take(&mut self.bytes)));
            Ok(id)
        })
    }

    fn close(&mut self) -> Result<(), ImporterError> {
        self.catalog.with(|state| state.store_closes += 1);
        Ok(())
    }
}

/// Collects every progress message.
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

pub fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"image bytes").unwrap();
}

pub fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}
