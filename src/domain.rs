use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ImporterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = ImporterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let id = value
            .trim()
            .parse::<i64>()
            .map_err(|_| ImporterError::InvalidEntityRef(value.to_string()))?;
        if id < 0 {
            return Err(ImporterError::InvalidEntityRef(value.to_string()));
        }
        Ok(Self(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Project,
    Dataset,
    Image,
}

impl EntityKind {
    /// Model class name used by the OMERO object layer.
    pub fn class_name(self) -> &'static str {
        match self {
            EntityKind::Project => "Project",
            EntityKind::Dataset => "Dataset",
            EntityKind::Image => "Image",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Project => write!(f, "project"),
            EntityKind::Dataset => write!(f, "dataset"),
            EntityKind::Image => write!(f, "image"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = ImporterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(EntityKind::Project),
            "dataset" => Ok(EntityKind::Dataset),
            "image" => Ok(EntityKind::Image),
            _ => Err(ImporterError::InvalidEntityRef(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.class_name(), self.id)
    }
}

impl FromStr for EntityRef {
    type Err = ImporterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (kind, id) = value
            .split_once(':')
            .ok_or_else(|| ImporterError::InvalidEntityRef(value.to_string()))?;
        Ok(Self {
            kind: kind.parse()?,
            id: id.parse()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRecord {
    pub id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRecord {
    pub id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: EntityId,
    pub name: String,
}

/// Annotation target as given by the caller, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    Id(EntityRef),
    Path {
        project: String,
        dataset: Option<String>,
        image: Option<String>,
    },
}

impl TargetRef {
    pub fn project(name: impl Into<String>) -> Self {
        TargetRef::Path {
            project: name.into(),
            dataset: None,
            image: None,
        }
    }

    pub fn dataset(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        TargetRef::Path {
            project: project.into(),
            dataset: Some(dataset.into()),
            image: None,
        }
    }

    pub fn image(
        project: impl Into<String>,
        dataset: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        TargetRef::Path {
            project: project.into(),
            dataset: Some(dataset.into()),
            image: Some(image.into()),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Id(entity) => write!(f, "{entity}"),
            TargetRef::Path {
                project,
                dataset,
                image,
            } => {
                write!(f, "{project}")?;
                if let Some(dataset) = dataset {
                    write!(f, "/{dataset}")?;
                }
                if let Some(image) = image {
                    write!(f, "/{image}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ref_accepts_class_or_lowercase_kind() {
        let upper: EntityRef = "Image:62102".parse().unwrap();
        let lower: EntityRef = "image:62102".parse().unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "Image:62102");
    }

    #[test]
    fn entity_ref_rejects_negative_ids() {
        assert!("project:-1".parse::<EntityRef>().is_err());
        assert!("screen:4".parse::<EntityRef>().is_err());
    }
}
