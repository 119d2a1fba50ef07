//! One authenticated OMERO session per invocation.
//!
//! `Session` logs in through OMERO.web, joins the `omero` tool to the same
//! server session and implements [`Catalog`] on top of both. Dropping it logs
//! out, so every exit path tears the session down.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::app::{App, Phase, ProgressEvent, ProgressSink};
use crate::catalog::{Annotation, Catalog, OriginalFileSpec, RawFileStore};
use crate::cli::OmeroCli;
use crate::config::{Credentials, Settings};
use crate::domain::{DatasetRecord, EntityId, EntityKind, EntityRef, ImageRecord, ProjectRecord};
use crate::error::ImporterError;
use crate::web::{EventContext, WebClient};

/// A catalog connection that must be released when the work is done.
pub trait SessionHandle: Catalog {
    fn close(&mut self) -> Result<(), ImporterError>;
}

/// Runs `work` against `session` and closes the session afterwards, whether
/// or not the work succeeded. An error from the work takes precedence over
/// an error from closing.
pub fn run_session<S, T, F>(session: S, sink: &dyn ProgressSink, work: F) -> Result<T, ImporterError>
where
    S: SessionHandle,
    F: FnOnce(&App<S>) -> Result<T, ImporterError>,
{
    let app = App::new(session);
    let result = work(&app);
    let mut session = app.into_catalog();

    sink.event(ProgressEvent::phase(Phase::Close, "closing session"));
    let closed = session.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "closing session after failure");
            Err(err)
        }
    }
}

pub struct Session {
    web: WebClient,
    cli: OmeroCli,
    context: EventContext,
    closed: bool,
}

impl Session {
    pub fn connect(settings: &Settings, credentials: &Credentials) -> Result<Self, ImporterError> {
        let cli = OmeroCli::locate(settings.omero_bin.as_deref(), &settings.host, settings.port)?;
        tracing::debug!(version = ?cli.tool_version(), "found omero tool");
        let mut web = WebClient::new(&settings.web_url, settings.timeout)?;
        tracing::info!(host = %settings.host, port = settings.port, web = %settings.web_url, "connecting");

        let context = web.login(
            &settings.host,
            settings.port,
            &credentials.username,
            &credentials.password,
        )?;
        let mut session = Self {
            web,
            cli,
            context,
            closed: false,
        };
        // the web session is live from here on; a failed join still logs out on drop
        let key = session.context.session_uuid.clone();
        session.cli.join_session(&key)?;
        tracing::info!(
            user_id = %session.user_id(),
            group_id = %session.group_id(),
            "session established"
        );
        Ok(session)
    }

    pub fn user_id(&self) -> EntityId {
        EntityId::new(self.context.user_id)
    }

    pub fn group_id(&self) -> EntityId {
        EntityId::new(self.context.group_id)
    }

    fn ensure_open(&self) -> Result<(), ImporterError> {
        if self.closed {
            Err(ImporterError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl SessionHandle for Session {
    /// Logs out. Later calls are no-ops.
    fn close(&mut self) -> Result<(), ImporterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let detached = self.cli.leave_session();
        if let Err(err) = &detached {
            tracing::warn!(error = %err, "omero logout failed");
        }
        self.web.logout()?;
        detached?;
        tracing::info!("session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = SessionHandle::close(self) {
            tracing::warn!(error = %err, "closing session failed");
        }
    }
}

impl Catalog for Session {
    fn list_projects(&self) -> Result<Vec<ProjectRecord>, ImporterError> {
        self.ensure_open()?;
        self.web.projects()
    }

    fn list_datasets(&self, project: EntityId) -> Result<Vec<DatasetRecord>, ImporterError> {
        self.ensure_open()?;
        self.web.datasets(project)
    }

    fn list_images(&self, dataset: EntityId) -> Result<Vec<ImageRecord>, ImporterError> {
        self.ensure_open()?;
        self.web.images(dataset)
    }

    fn create_project(&self, name: &str) -> Result<EntityId, ImporterError> {
        self.cli.create_object(EntityKind::Project.class_name(), name)
    }

    fn create_dataset(&self, name: &str) -> Result<EntityId, ImporterError> {
        self.cli.create_object(EntityKind::Dataset.class_name(), name)
    }

    fn link_dataset_to_project(
        &self,
        dataset: EntityId,
        project: EntityId,
    ) -> Result<(), ImporterError> {
        self.cli
            .link(
                "ProjectDatasetLink",
                &EntityRef::new(EntityKind::Project, project).to_string(),
                &EntityRef::new(EntityKind::Dataset, dataset).to_string(),
            )
            .map(|_| ())
    }

    fn import_files(&self, dataset: EntityId, paths: &[Utf8PathBuf]) -> Result<(), ImporterError> {
        self.cli.import(dataset, paths)
    }

    fn attach_annotation(
        &self,
        target: EntityRef,
        annotation: &Annotation,
    ) -> Result<EntityId, ImporterError> {
        match annotation {
            Annotation::Table { .. } => {
                let staging = tempfile::tempdir()
                    .map_err(|err| ImporterError::Filesystem(format!("temporary directory: {err}")))?;
                self.cli.annotate(target, annotation, Some(staging.path()))
            }
            _ => self.cli.annotate(target, annotation, None),
        }
    }

    fn open_raw_file_store<'a>(
        &'a self,
        spec: &OriginalFileSpec,
    ) -> Result<Box<dyn RawFileStore + 'a>, ImporterError> {
        self.ensure_open()?;
        Ok(Box::new(SpooledRawFileStore::create(&self.cli, spec)?))
    }

    fn lookup_user(&self, name: &str) -> Result<Option<EntityId>, ImporterError> {
        self.ensure_open()?;
        self.web.experimenter_id(name)
    }
}

/// Collects written chunks in a local spool file named after the original
/// file; `save` hands the spool to `omero upload`.
pub struct SpooledRawFileStore<'a> {
    cli: &'a OmeroCli,
    mimetype: String,
    path: PathBuf,
    file: Option<File>,
    spool: Option<TempDir>,
}

impl<'a> SpooledRawFileStore<'a> {
    fn create(cli: &'a OmeroCli, spec: &OriginalFileSpec) -> Result<Self, ImporterError> {
        let spool = tempfile::tempdir()
            .map_err(|err| ImporterError::Filesystem(format!("temporary directory: {err}")))?;
        let path = spool.path().join(&spec.name);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .map_err(|err| ImporterError::Filesystem(format!("{}: {err}", path.display())))?;
        Ok(Self {
            cli,
            mimetype: spec.mimetype.clone(),
            path,
            file: Some(file),
            spool: Some(spool),
        })
    }
}

impl RawFileStore for SpooledRawFileStore<'_> {
    fn write(&mut self, chunk: &[u8], offset: u64) -> Result<(), ImporterError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| ImporterError::Upload("raw file store is closed".to_string()))?;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(chunk))
            .map_err(|err| ImporterError::Upload(format!("spool write at {offset}: {err}")))
    }

    fn save(&mut self) -> Result<EntityId, ImporterError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| ImporterError::Upload("raw file store is closed".to_string()))?;
        file.flush()
            .map_err(|err| ImporterError::Upload(format!("spool flush: {err}")))?;
        drop(file);
        self.cli.upload(&self.path, &self.mimetype)
    }

    fn close(&mut self) -> Result<(), ImporterError> {
        self.file = None;
        match self.spool.take() {
            Some(spool) => spool
                .close()
                .map_err(|err| ImporterError::Filesystem(format!("remove spool: {err}"))),
            None => Ok(()),
        }
    }
}
