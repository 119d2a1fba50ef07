//! Name-based lookups against the remote catalog.
//!
//! Names are compared with exact, case-sensitive equality. When several remote
//! entities share a name the first one returned by the catalog wins.

use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::domain::{DatasetRecord, EntityId, ImageRecord, ProjectRecord};
use crate::error::ImporterError;

pub fn find_project<C: Catalog + ?Sized>(
    catalog: &C,
    name: &str,
) -> Result<Option<ProjectRecord>, ImporterError> {
    Ok(catalog
        .list_projects()?
        .into_iter()
        .find(|project| project.name == name))
}

pub fn find_dataset<C: Catalog + ?Sized>(
    catalog: &C,
    project: EntityId,
    name: &str,
) -> Result<Option<DatasetRecord>, ImporterError> {
    Ok(catalog
        .list_datasets(project)?
        .into_iter()
        .find(|dataset| dataset.name == name))
}

pub fn find_image<C: Catalog + ?Sized>(
    catalog: &C,
    dataset: EntityId,
    name: &str,
) -> Result<Option<ImageRecord>, ImporterError> {
    Ok(catalog
        .list_images(dataset)?
        .into_iter()
        .find(|image| image.name == name))
}

/// Per-run cache of Project and Dataset identifiers keyed by name.
///
/// Each collection is fetched from the catalog once, on first use, and kept in
/// sync with the entities this process creates. It is never persisted.
#[derive(Debug, Default)]
pub struct NameIndex {
    projects: Option<HashMap<String, EntityId>>,
    datasets: HashMap<EntityId, HashMap<String, EntityId>>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project_id<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        name: &str,
    ) -> Result<Option<EntityId>, ImporterError> {
        if self.projects.is_none() {
            let mut map = HashMap::new();
            for project in catalog.list_projects()? {
                map.entry(project.name).or_insert(project.id);
            }
            self.projects = Some(map);
        }
        Ok(self
            .projects
            .as_ref()
            .and_then(|map| map.get(name).copied()))
    }

    pub fn dataset_id<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        project: EntityId,
        name: &str,
    ) -> Result<Option<EntityId>, ImporterError> {
        if !self.datasets.contains_key(&project) {
            let mut map = HashMap::new();
            for dataset in catalog.list_datasets(project)? {
                map.entry(dataset.name).or_insert(dataset.id);
            }
            self.datasets.insert(project, map);
        }
        Ok(self
            .datasets
            .get(&project)
            .and_then(|map| map.get(name).copied()))
    }

    /// Re-reads the remote Projects, bypassing the cached collection.
    pub fn refresh_project<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        name: &str,
    ) -> Result<Option<EntityId>, ImporterError> {
        self.projects = None;
        self.project_id(catalog, name)
    }

    /// Re-reads the Datasets of `project`, bypassing the cached collection.
    pub fn refresh_dataset<C: Catalog + ?Sized>(
        &mut self,
        catalog: &C,
        project: EntityId,
        name: &str,
    ) -> Result<Option<EntityId>, ImporterError> {
        self.datasets.remove(&project);
        self.dataset_id(catalog, project, name)
    }

    /// Records a Project created by this process. An index that has not been
    /// loaded yet is left alone; the next lookup fetches the entity remotely.
    /// A fresh Project has no Datasets, so its Dataset index starts out empty.
    pub fn insert_project(&mut self, name: &str, id: EntityId) {
        if let Some(map) = self.projects.as_mut() {
            map.insert(name.to_string(), id);
        }
        self.datasets.entry(id).or_default();
    }

    pub fn insert_dataset(&mut self, project: EntityId, name: &str, id: EntityId) {
        if let Some(map) = self.datasets.get_mut(&project) {
            map.insert(name.to_string(), id);
        }
    }
}
