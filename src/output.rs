use std::io::{self, Write};

use crossterm::style::Stylize;
use serde::Serialize;

use crate::app::{AnnotationResult, ImageInfoResult, ProgressEvent, ProgressSink, UserResult};
use crate::reconcile::{DirectoryStatus, WalkReport};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(report: &WalkReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_annotation(result: &AnnotationResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_image_info(result: &ImageInfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_user(result: &UserResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    /// Stdout carries only the final document. Files about to be imported are
    /// announced on stderr; other progress goes to the log.
    fn event(&self, event: ProgressEvent) {
        match announced_candidate(&event.message) {
            Some(path) => eprintln!("will import {path}"),
            None => tracing::debug!(message = %event.message, "progress"),
        }
    }
}

fn announced_candidate(message: &str) -> Option<&str> {
    message.strip_prefix("import.candidate ")
}

/// Human-readable summaries printed after the interactive view closes.
pub struct Summary;

impl Summary {
    pub fn print_import(report: &WalkReport) -> io::Result<()> {
        let mut stdout = io::stdout();
        let title = if report.dry_run { "Import plan" } else { "Import" };
        writeln!(stdout, "{} {}", title.bold(), report.root)?;
        for dir in &report.directories {
            let status = match &dir.status {
                DirectoryStatus::Reused { id } => format!("reused {id}").grey(),
                DirectoryStatus::Created { id } => format!("created {id}").green(),
                DirectoryStatus::WouldCreate => "would create".to_string().yellow(),
                DirectoryStatus::Skipped { reason } => format!("skipped ({reason:?})").red(),
                DirectoryStatus::CreatedThenSkipped { id, reason } => {
                    format!("created {id}, skipped ({reason:?})").red()
                }
            };
            writeln!(stdout, "  {:<8} {:<30} {status}", dir.kind.to_string(), dir.name)?;
        }
        let failed = report.failed_batches().len();
        let line = format!(
            "{} files imported, {} directories skipped, {failed} batches failed",
            report.imported_files(),
            report.skipped().len()
        );
        if report.is_complete() {
            writeln!(stdout, "{}", line.green())
        } else {
            writeln!(stdout, "{}", line.red())
        }
    }

    pub fn print_annotation(result: &AnnotationResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "{} {} annotation {} on {}",
            "Attached".green(),
            result.kind,
            result.annotation_id,
            result.target
        )?;
        if let Some(file) = &result.file {
            writeln!(
                stdout,
                "  file {} ({} bytes, sha256 {})",
                file.name, file.size, file.sha256
            )?;
        }
        Ok(())
    }

    pub fn print_image_info(result: &ImageInfoResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        match &result.location {
            Some(location) => writeln!(
                stdout,
                "Image {} -> {} (dataset {}, project {})",
                result.image_id, location.path, location.dataset_id, location.project_id
            ),
            None => writeln!(stdout, "{}", format!("Image {} not found", result.image_id).yellow()),
        }
    }

    pub fn print_user(result: &UserResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        match result.user_id {
            Some(id) => writeln!(stdout, "User {} has id {id}", result.name),
            None => writeln!(stdout, "{}", format!("User {} not found", result.name).yellow()),
        }
    }
}
