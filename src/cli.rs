//! Write side of the catalog: the `omero` command-line tool, joined to the
//! session opened through OMERO.web.

use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8PathBuf;
use regex::Regex;

use crate::catalog::Annotation;
use crate::domain::{EntityId, EntityRef};
use crate::error::ImporterError;

#[derive(Debug, Clone)]
pub struct OmeroCli {
    program: PathBuf,
    host: String,
    port: u16,
    session_key: Option<String>,
}

impl OmeroCli {
    /// Uses `program` when given, else the first `omero` on `PATH`.
    pub fn locate(program: Option<&Path>, host: &str, port: u16) -> Result<Self, ImporterError> {
        let program = match program {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => return Err(ImporterError::MissingTool(path.display().to_string())),
            None => find_in_path("omero").ok_or_else(|| ImporterError::MissingTool("omero".to_string()))?,
        };
        Ok(Self {
            program,
            host: host.to_string(),
            port,
            session_key: None,
        })
    }

    /// Attaches the tool to an existing server session; later commands run in it.
    pub fn join_session(&mut self, session_key: &str) -> Result<(), ImporterError> {
        self.exec(&login_args(&self.host, self.port, session_key))?;
        self.session_key = Some(session_key.to_string());
        Ok(())
    }

    /// Detaches the tool from the joined session. Does nothing when no session
    /// is joined, so repeated calls are safe.
    pub fn leave_session(&mut self) -> Result<(), ImporterError> {
        if self.session_key.take().is_none() {
            return Ok(());
        }
        self.exec(&["logout".to_string()]).map(|_| ())
    }

    pub fn tool_version(&self) -> Option<String> {
        let output = Command::new(&self.program).arg("version").output().ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() { None } else { Some(stdout) }
    }

    pub fn create_object(&self, class: &str, name: &str) -> Result<EntityId, ImporterError> {
        let stdout = self.run(&object_args(class, [format!("name={name}")]))?;
        parse_object_id(&stdout, class)
    }

    pub fn link(&self, link_class: &str, parent: &str, child: &str) -> Result<EntityId, ImporterError> {
        let stdout = self.run(&link_args(link_class, parent, child))?;
        parse_object_id(&stdout, link_class)
    }

    pub fn import(&self, dataset: EntityId, paths: &[Utf8PathBuf]) -> Result<(), ImporterError> {
        self.run(&import_args(dataset, paths))
            .map(|_| ())
            .map_err(|err| ImporterError::Import {
                dataset: dataset.get(),
                message: err.to_string(),
            })
    }

    /// Uploads a local file and returns the id of the new original file.
    pub fn upload(&self, path: &Path, mimetype: &str) -> Result<EntityId, ImporterError> {
        let stdout = self.run(&[
            "upload".to_string(),
            "--mimetype".to_string(),
            mimetype.to_string(),
            path.display().to_string(),
        ])?;
        parse_object_id(&stdout, "OriginalFile")
    }

    /// Creates the annotation object and links it to `target`.
    pub fn annotate(
        &self,
        target: EntityRef,
        annotation: &Annotation,
        staging: Option<&Path>,
    ) -> Result<EntityId, ImporterError> {
        let annotation_id = match annotation {
            Annotation::Map {
                description,
                namespace,
                pairs,
            } => {
                let stdout = self.run(&object_args(
                    "MapAnnotation",
                    [format!("ns={namespace}"), format!("description={description}")],
                ))?;
                let id = parse_object_id(&stdout, "MapAnnotation")?;
                for (key, value) in pairs {
                    self.run(&map_set_args(id, key, value))?;
                }
                id
            }
            Annotation::File {
                file,
                description,
                namespace,
            } => {
                let stdout = self.run(&file_annotation_args(*file, namespace, description.as_deref()))?;
                parse_object_id(&stdout, "FileAnnotation")?
            }
            Annotation::Table { name, table } => {
                let staging = staging.ok_or_else(|| {
                    ImporterError::Filesystem("no staging directory for table".to_string())
                })?;
                let csv = staging.join(format!("{name}.csv"));
                std::fs::write(&csv, table.to_populate_csv())
                    .map_err(|err| ImporterError::Filesystem(format!("{}: {err}", csv.display())))?;
                // populate creates and links the table annotation itself
                let stdout = self.run(&populate_args(&csv, name, target))?;
                return parse_object_id(&stdout, "FileAnnotation")
                    .or_else(|_| parse_object_id(&stdout, "OriginalFile"));
            }
        };

        self.run(&annotation_link_args(target, annotation, annotation_id))?;
        Ok(annotation_id)
    }

    fn run(&self, args: &[String]) -> Result<String, ImporterError> {
        if self.session_key.is_none() {
            return Err(ImporterError::SessionClosed);
        }
        self.exec(args)
    }

    fn exec(&self, args: &[String]) -> Result<String, ImporterError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        let command = format!("omero {}", args.first().map(String::as_str).unwrap_or_default());
        tracing::debug!(command = %command, args = args.len(), "running omero");

        let output = cmd.output().map_err(|err| ImporterError::CommandFailed {
            command: command.clone(),
            message: err.to_string(),
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(command, stderr))
    }
}

fn login_args(host: &str, port: u16, session_key: &str) -> Vec<String> {
    vec![
        "login".to_string(),
        "-s".to_string(),
        host.to_string(),
        "-p".to_string(),
        port.to_string(),
        "-k".to_string(),
        session_key.to_string(),
    ]
}

fn object_args(class: &str, fields: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut args = vec!["obj".to_string(), "new".to_string(), class.to_string()];
    args.extend(fields);
    args
}

fn link_args(link_class: &str, parent: &str, child: &str) -> Vec<String> {
    object_args(link_class, [format!("parent={parent}"), format!("child={child}")])
}

fn map_set_args(annotation: EntityId, key: &str, value: &str) -> Vec<String> {
    vec![
        "obj".to_string(),
        "map-set".to_string(),
        format!("MapAnnotation:{annotation}"),
        "mapValue".to_string(),
        key.to_string(),
        value.to_string(),
    ]
}

fn file_annotation_args(file: EntityId, namespace: &str, description: Option<&str>) -> Vec<String> {
    let mut fields = vec![format!("file=OriginalFile:{file}"), format!("ns={namespace}")];
    if let Some(description) = description {
        fields.push(format!("description={description}"));
    }
    object_args("FileAnnotation", fields)
}

fn populate_args(csv: &Path, table_name: &str, target: EntityRef) -> Vec<String> {
    vec![
        "metadata".to_string(),
        "populate".to_string(),
        "--file".to_string(),
        csv.display().to_string(),
        "--table-name".to_string(),
        table_name.to_string(),
        target.to_string(),
    ]
}

/// `<Kind>AnnotationLink` with the target as parent and the annotation as child.
fn annotation_link_args(target: EntityRef, annotation: &Annotation, annotation_id: EntityId) -> Vec<String> {
    link_args(
        &format!("{}AnnotationLink", target.kind.class_name()),
        &target.to_string(),
        &format!("{}:{annotation_id}", annotation_class(annotation)),
    )
}

/// The tool's defaults already read full metadata, stop a batch on its first
/// error and keep error reports local.
fn import_args(dataset: EntityId, paths: &[Utf8PathBuf]) -> Vec<String> {
    let mut args = vec![
        "import".to_string(),
        "-d".to_string(),
        dataset.to_string(),
        "--no-upgrade-check".to_string(),
        "--".to_string(),
    ];
    args.extend(paths.iter().map(|path| path.to_string()));
    args
}

fn annotation_class(annotation: &Annotation) -> &'static str {
    match annotation {
        Annotation::Map { .. } => "MapAnnotation",
        Annotation::Table { .. } | Annotation::File { .. } => "FileAnnotation",
    }
}

fn classify_failure(command: String, stderr: String) -> ImporterError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("securityviolation") || lower.contains("permission denied") {
        return ImporterError::AccessDenied(stderr);
    }
    let message = if stderr.is_empty() {
        "command failed".to_string()
    } else {
        stderr
    };
    ImporterError::CommandFailed { command, message }
}

/// Finds the last `Class:123` reference for `class` in the tool's output.
pub fn parse_object_id(stdout: &str, class: &str) -> Result<EntityId, ImporterError> {
    let re = Regex::new(r"\b([A-Za-z]+):(\d+)\b")
        .map_err(|err| ImporterError::UnexpectedResponse(err.to_string()))?;
    re.captures_iter(stdout)
        .filter(|caps| &caps[1] == class)
        .filter_map(|caps| caps[2].parse::<i64>().ok())
        .last()
        .map(EntityId::new)
        .ok_or_else(|| {
            ImporterError::UnexpectedResponse(format!("no {class} id in omero output: {stdout}"))
        })
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&paths) {
        let candidate = path.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
