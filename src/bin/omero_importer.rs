use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use omero_importer::annotate::parse_key_value;
use omero_importer::app::{App, Phase, ProgressEvent, ProgressSink, ProgressSinkKind};
use omero_importer::config::{ConfigLoader, Credentials, Overrides, Settings};
use omero_importer::domain::{EntityId, EntityRef, TargetRef};
use omero_importer::error::ImporterError;
use omero_importer::fs_util::absolute_dir;
use omero_importer::output::{JsonOutput, OutputMode, Summary};
use omero_importer::reconcile::WalkOptions;
use omero_importer::session::{Session, run_session};
use omero_importer::table::TableData;
use omero_importer::tui::Tui;

#[derive(Parser)]
#[command(name = "omero-importer")]
#[command(about = "Bulk import and metadata annotation for OMERO servers")]
#[command(version)]
struct Cli {
    #[arg(short = 'H', long, global = true, help = "OMERO server host [default: localhost]")]
    host: Option<String>,

    #[arg(short = 'P', long, global = true, help = "OMERO server port [default: 4064]")]
    port: Option<String>,

    #[arg(short = 'u', long, global = true)]
    username: Option<String>,

    #[arg(short = 'p', long, global = true, env = "OMERO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, global = true, help = "OMERO.web base URL [default: http://<host>:4080]")]
    web_url: Option<String>,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create missing Projects/Datasets from a directory tree and import its files")]
    Import(ImportArgs),
    #[command(about = "Attach metadata to a Project, Dataset or Image")]
    Annotate(AnnotateArgs),
    #[command(about = "Show where an Image lives")]
    ImageInfo(ImageInfoArgs),
    #[command(about = "Look up a user's id")]
    UserId(UserIdArgs),
}

#[derive(Args)]
struct ImportArgs {
    #[arg(short = 't', long)]
    target: PathBuf,

    #[arg(long, help = "Only import files whose name ends with this suffix")]
    ext: Option<String>,

    #[arg(long, help = "Only import files whose name contains this text")]
    name: Option<String>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct AnnotateArgs {
    #[command(subcommand)]
    command: AnnotateCommand,
}

#[derive(Subcommand)]
enum AnnotateCommand {
    #[command(about = "Attach a key/value map")]
    Map(MapArgs),
    #[command(about = "Attach a table, optionally with a CSV export")]
    Table(TableArgs),
    #[command(about = "Upload a file and attach it")]
    File(FileArgs),
}

#[derive(Args, Clone)]
struct TargetArgs {
    #[arg(long, help = "Entity as <kind>:<id>, e.g. image:62102", conflicts_with = "project")]
    id: Option<EntityRef>,

    #[arg(long)]
    project: Option<String>,

    #[arg(long, requires = "project")]
    dataset: Option<String>,

    #[arg(long, requires = "dataset")]
    image: Option<String>,
}

impl TargetArgs {
    fn into_target(self) -> Result<TargetRef, ImporterError> {
        match (self.id, self.project) {
            (Some(entity), _) => Ok(TargetRef::Id(entity)),
            (None, Some(project)) => Ok(TargetRef::Path {
                project,
                dataset: self.dataset,
                image: self.image,
            }),
            (None, None) => Err(ImporterError::InvalidEntityRef(
                "pass --id <kind>:<id> or --project".to_string(),
            )),
        }
    }
}

#[derive(Args)]
struct MapArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long = "kv", required = true, num_args = 1..)]
    pairs: Vec<String>,
}

#[derive(Args)]
struct TableArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long)]
    name: String,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long, help = "JSON file with {\"columns\": [...], \"data\": [[...], ...]}")]
    table: PathBuf,

    #[arg(long)]
    csv: bool,
}

#[derive(Args)]
struct FileArgs {
    #[command(flatten)]
    target: TargetArgs,

    #[arg(long)]
    file: Utf8PathBuf,

    #[arg(long)]
    namespace: Option<String>,
}

#[derive(Args)]
struct ImageInfoArgs {
    image_id: EntityId,
}

#[derive(Args)]
struct UserIdArgs {
    name: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ImporterError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImporterError) -> u8 {
    match error {
        ImporterError::MissingCredentials
        | ImporterError::InvalidPort(_)
        | ImporterError::InvalidTarget(_)
        | ImporterError::ConfigRead(_)
        | ImporterError::ConfigParse(_)
        | ImporterError::InvalidEntityRef(_)
        | ImporterError::InvalidKeyValue(_)
        | ImporterError::InvalidTable(_) => 2,
        ImporterError::ServiceUnavailable(_)
        | ImporterError::ServiceStatus { .. }
        | ImporterError::UnexpectedResponse(_)
        | ImporterError::MissingTool(_)
        | ImporterError::CommandFailed { .. }
        | ImporterError::Import { .. }
        | ImporterError::Upload(_)
        | ImporterError::SessionClosed => 3,
        ImporterError::AccessDenied(_) => 4,
        ImporterError::PartialImport { .. } => 5,
        ImporterError::EntityNotFound(_) => 6,
        ImporterError::Filesystem(_) => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let ext_filter = match &cli.command {
        Commands::Import(args) => args.ext.clone(),
        _ => None,
    };
    let name_filter = match &cli.command {
        Commands::Import(args) => args.name.clone(),
        _ => None,
    };
    let (settings, credentials) = ConfigLoader::resolve_settings(
        config,
        Overrides {
            host: cli.host,
            port: cli.port,
            username: cli.username,
            password: cli.password,
            web_url: cli.web_url,
            ext_filter,
            name_filter,
        },
    )?;

    match cli.command {
        Commands::Import(args) => run_import(args, settings, credentials, output_mode),
        Commands::Annotate(args) => run_annotate(args, settings, credentials, output_mode),
        Commands::ImageInfo(args) => {
            let result = execute(
                settings,
                credentials,
                output_mode,
                ProgressSinkKind::Info,
                move |app, sink| app.image_info(args.image_id, sink),
            )?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_image_info(&result),
                OutputMode::Interactive => Summary::print_image_info(&result),
            }
            .into_diagnostic()
        }
        Commands::UserId(args) => {
            let result = execute(
                settings,
                credentials,
                output_mode,
                ProgressSinkKind::User,
                move |app, sink| app.user_id(&args.name, sink),
            )?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_user(&result),
                OutputMode::Interactive => Summary::print_user(&result),
            }
            .into_diagnostic()
        }
    }
}

fn run_import(
    args: ImportArgs,
    settings: Settings,
    credentials: Credentials,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let root = absolute_dir(&args.target)?;
    let options = WalkOptions {
        filter: settings.filter.clone(),
        dry_run: args.dry_run,
    };

    let report = execute(
        settings,
        credentials,
        output_mode,
        ProgressSinkKind::Import,
        move |app, sink| app.import_tree(&root, options, sink),
    )?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_import(&report),
        OutputMode::Interactive => Summary::print_import(&report),
    }
    .into_diagnostic()?;

    if !report.is_complete() {
        return Err(ImporterError::PartialImport {
            skipped: report.skipped().len(),
            failed: report.failed_batches().len(),
        }
        .into());
    }
    Ok(())
}

fn run_annotate(
    args: AnnotateArgs,
    settings: Settings,
    credentials: Credentials,
    output_mode: OutputMode,
) -> miette::Result<()> {
    // inputs are validated before connecting
    let result = match args.command {
        AnnotateCommand::Map(map) => {
            let target = map.target.into_target()?;
            let pairs = map
                .pairs
                .iter()
                .map(|pair| parse_key_value(pair))
                .collect::<Result<Vec<_>, _>>()?;
            let description = map.description;
            execute(
                settings,
                credentials,
                output_mode,
                ProgressSinkKind::Annotate,
                move |app, sink| app.annotate_map(&target, &description, pairs, sink),
            )?
        }
        AnnotateCommand::Table(table_args) => {
            let target = table_args.target.into_target()?;
            let table = TableData::from_json_file(&table_args.table)?;
            let (name, description, csv) =
                (table_args.name, table_args.description, table_args.csv);
            execute(
                settings,
                credentials,
                output_mode,
                ProgressSinkKind::Annotate,
                move |app, sink| app.annotate_table(&target, &name, &description, table, csv, sink),
            )?
        }
        AnnotateCommand::File(file_args) => {
            let target = file_args.target.into_target()?;
            if !file_args.file.as_std_path().is_file() {
                return Err(ImporterError::InvalidTarget(file_args.file.into_std_path_buf()).into());
            }
            let (path, namespace) = (file_args.file, file_args.namespace);
            execute(
                settings,
                credentials,
                output_mode,
                ProgressSinkKind::Annotate,
                move |app, sink| app.annotate_file(&target, &path, namespace.as_deref(), sink),
            )?
        }
    };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_annotation(&result),
        OutputMode::Interactive => Summary::print_annotation(&result),
    }
    .into_diagnostic()
}

/// Connects, runs `work` and closes the session, on a worker thread behind the
/// progress view in interactive mode.
fn execute<T, F>(
    settings: Settings,
    credentials: Credentials,
    output_mode: OutputMode,
    kind: ProgressSinkKind,
    work: F,
) -> miette::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&App<Session>, &dyn ProgressSink) -> Result<T, ImporterError> + Send + 'static,
{
    let task = move |sink: &dyn ProgressSink| {
        sink.event(ProgressEvent::phase(
            Phase::Connect,
            format!("{}@{}:{}", credentials.username, settings.host, settings.port),
        ));
        let session = Session::connect(&settings, &credentials)?;
        run_session(session, sink, |app| work(app, sink))
    };

    match output_mode {
        OutputMode::NonInteractive => Ok(task(&JsonOutput)?),
        OutputMode::Interactive => {
            let mut tui = Tui::new(kind);
            tui.run(task)
        }
    }
}
