use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tabledit_adapters::mysql::MysqlEditBackend;
use tabledit_core::audit_trail::FileAuditTrail;
use tabledit_core::columns::ColumnInfo;
use tabledit_core::edit_session::{ApplyPolicy, EditSession, PageBackend};
use tabledit_core::settings::{ConnectionProfile, EditorSettings, FileSettings};
use tabledit_core::sql_render::{SqlDialect, TableTarget};
use tabledit_core::value::{RowSnapshot, Scalar};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseOutcome {
    Command(Command),
    HelpRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Fetch(FetchArgs),
    Plan(PlanArgs),
    Apply(ApplyArgs),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FetchArgs {
    table: String,
    database: Option<String>,
    page: usize,
    profile: String,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PlanArgs {
    batch_path: PathBuf,
    dialect: Option<SqlDialect>,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApplyArgs {
    batch_path: PathBuf,
    profile: String,
    config_path: Option<PathBuf>,
    continue_on_failure: bool,
}

/// A page snapshot plus the cell edits made against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EditBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    table: String,
    columns: Vec<ColumnInfo>,
    rows: Vec<RowSnapshot>,
    #[serde(default)]
    edits: Vec<BatchEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchEdit {
    row_index: usize,
    column: String,
    new_value: Scalar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_value: Option<Scalar>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let command = match parse_args_from(std::env::args().skip(1))? {
        ParseOutcome::HelpRequested => {
            print_help();
            return Ok(());
        }
        ParseOutcome::Command(command) => command,
    };

    match command {
        Command::Fetch(args) => run_fetch(&args, &mut io::stdout().lock()).await?,
        Command::Plan(args) => run_plan(&args, &mut io::stdout().lock())?,
        Command::Apply(args) => run_apply(&args, &mut io::stdout().lock()).await?,
    }
    Ok(())
}

async fn run_fetch(args: &FetchArgs, out: &mut impl Write) -> io::Result<()> {
    let settings = load_settings(args.config_path.as_deref())?;
    let profile = find_profile(&settings, &args.profile)?;

    let backend = MysqlEditBackend::from_profile(profile);
    let result = fetch_batch(&backend, settings.editor(), args).await;
    backend.disconnect().await.map_err(io_other)?;
    write_json(&result?, out)
}

fn run_plan(args: &PlanArgs, out: &mut impl Write) -> io::Result<()> {
    let mut editor = match &args.config_path {
        Some(path) => FileSettings::load_from_path(path)
            .map_err(io_other)?
            .editor()
            .clone(),
        None => EditorSettings::default(),
    };
    if let Some(dialect) = args.dialect {
        editor.dialect = dialect;
    }

    let batch = read_batch(&args.batch_path)?;
    let session = session_from_batch(&batch, &editor)?;
    write_plan(&session, out)
}

async fn run_apply(args: &ApplyArgs, out: &mut impl Write) -> io::Result<()> {
    let settings = load_settings(args.config_path.as_deref())?;
    let profile = find_profile(&settings, &args.profile)?;

    let mut editor = settings.editor().clone();
    editor.dialect = SqlDialect::MySql;
    if args.continue_on_failure {
        editor.apply_policy = ApplyPolicy::ContinueOnFailure;
    }
    let audit = if editor.audit {
        Some(FileAuditTrail::next_to_settings(settings.path()).map_err(io_other)?)
    } else {
        None
    };

    let batch = read_batch(&args.batch_path)?;
    let mut session = session_from_batch(&batch, &editor)?.read_only(profile.read_only);

    let backend = MysqlEditBackend::from_profile(profile);
    let result = session.apply(&backend, audit.as_ref()).await;
    backend.disconnect().await.map_err(io_other)?;
    let report = result.map_err(io_other)?;

    write_json(&report, out)?;
    if report.is_complete() {
        Ok(())
    } else {
        Err(io_other(format!(
            "{} change(s) were not applied",
            session.pending_changes().len()
        )))
    }
}

fn load_settings(config_path: Option<&Path>) -> io::Result<FileSettings> {
    match config_path {
        Some(path) => FileSettings::load_from_path(path),
        None => FileSettings::load_default(),
    }
    .map_err(io_other)
}

fn find_profile<'a>(settings: &'a FileSettings, name: &str) -> io::Result<&'a ConnectionProfile> {
    settings
        .profile(name)
        .ok_or_else(|| io_other(format!("unknown profile `{name}`")))
}

/// Loads one page at the configured page size into an edit-free batch.
async fn fetch_batch<B>(
    backend: &B,
    editor: &EditorSettings,
    args: &FetchArgs,
) -> io::Result<EditBatch>
where
    B: PageBackend + Sync + ?Sized,
{
    let target = TableTarget::new(args.database.as_deref(), &args.table).map_err(io_other)?;
    let mut session = EditSession::from_settings(target, editor);
    let loaded = session
        .reload_page(backend, args.page)
        .await
        .map_err(io_other)?;
    tracing::info!(
        table = %args.table,
        page = args.page,
        page_size = session.page_size(),
        loaded,
        "page fetched"
    );

    Ok(EditBatch {
        database: args.database.clone(),
        table: args.table.clone(),
        columns: session.columns().to_vec(),
        rows: session.rows().to_vec(),
        edits: Vec::new(),
    })
}

fn read_batch(path: &Path) -> io::Result<EditBatch> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| io_other(format!("failed to read {}: {error}", path.display())))?;
    parse_batch(&raw)
}

fn parse_batch(raw: &str) -> io::Result<EditBatch> {
    serde_json::from_str(raw).map_err(|error| io_other(format!("invalid batch file: {error}")))
}

fn session_from_batch(batch: &EditBatch, editor: &EditorSettings) -> io::Result<EditSession> {
    let target = TableTarget::new(batch.database.as_deref(), &batch.table).map_err(io_other)?;
    let mut session = EditSession::from_settings(target, editor);
    session.load_page(batch.columns.clone(), batch.rows.clone());

    for edit in &batch.edits {
        let outcome = match &edit.original_value {
            Some(original) => session.record_change(
                edit.row_index,
                &edit.column,
                original.clone(),
                edit.new_value.clone(),
            ),
            None => session.record_edit(edit.row_index, &edit.column, edit.new_value.clone()),
        };
        tracing::debug!(
            row_index = edit.row_index,
            column = %edit.column,
            ?outcome,
            "batch edit recorded"
        );
    }
    Ok(session)
}

fn write_plan(session: &EditSession, out: &mut impl Write) -> io::Result<()> {
    let plan = session.plan();
    let statements = session.preview().map_err(io_other)?;

    if plan.is_empty() {
        writeln!(out, "-- no pending changes")?;
        return Ok(());
    }
    for (statement, sql) in plan.statements.iter().zip(&statements) {
        writeln!(out, "-- row {}", statement.row_index)?;
        writeln!(out, "{sql};")?;
    }
    for skipped in &plan.skipped {
        writeln!(out, "-- skipped row {}: {}", skipped.row_index, skipped.reason)?;
    }
    Ok(())
}

fn write_json(value: &impl Serialize, out: &mut impl Write) -> io::Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(io_other)?;
    writeln!(out, "{rendered}")
}

fn parse_args_from(args: impl IntoIterator<Item = String>) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();
    let subcommand = match args.next() {
        None => return Ok(ParseOutcome::HelpRequested),
        Some(subcommand) if matches!(subcommand.as_str(), "-h" | "--help" | "help") => {
            return Ok(ParseOutcome::HelpRequested);
        }
        Some(subcommand) => subcommand,
    };

    let mut positional = None;
    let mut dialect = None;
    let mut config_path = None;
    let mut profile = None;
    let mut database = None;
    let mut page = None;
    let mut continue_on_failure = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--dialect" => {
                dialect = Some(
                    next_value(&mut args, "--dialect")?
                        .parse::<SqlDialect>()
                        .map_err(io_other)?,
                );
            }
            "--config" => config_path = Some(PathBuf::from(next_value(&mut args, "--config")?)),
            "--profile" => profile = Some(next_value(&mut args, "--profile")?),
            "--database" => database = Some(next_value(&mut args, "--database")?),
            "--page" => {
                page = Some(
                    next_value(&mut args, "--page")?
                        .parse::<usize>()
                        .map_err(|error| io_other(format!("invalid --page value: {error}")))?,
                );
            }
            "--continue-on-failure" => continue_on_failure = true,
            flag if flag.starts_with("--") => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
            _ if positional.is_none() => positional = Some(arg.clone()),
            _ => return Err(io_other(format!("unexpected argument `{arg}`"))),
        }
    }

    match subcommand.as_str() {
        "fetch" => {
            if dialect.is_some() || continue_on_failure {
                return Err(io_other(
                    "`fetch` does not take --dialect or --continue-on-failure",
                ));
            }
            Ok(ParseOutcome::Command(Command::Fetch(FetchArgs {
                table: positional.ok_or_else(|| io_other("missing <table> argument"))?,
                database,
                page: page.unwrap_or(0),
                profile: profile.ok_or_else(|| io_other("`fetch` requires --profile"))?,
                config_path,
            })))
        }
        "plan" => {
            if profile.is_some() || database.is_some() || page.is_some() || continue_on_failure {
                return Err(io_other("`plan` only takes --dialect and --config"));
            }
            Ok(ParseOutcome::Command(Command::Plan(PlanArgs {
                batch_path: batch_path(positional)?,
                dialect,
                config_path,
            })))
        }
        "apply" => {
            if dialect.is_some() {
                return Err(io_other("`apply` always uses the mysql dialect"));
            }
            if database.is_some() || page.is_some() {
                return Err(io_other("`apply` takes the table from the batch file"));
            }
            Ok(ParseOutcome::Command(Command::Apply(ApplyArgs {
                batch_path: batch_path(positional)?,
                profile: profile.ok_or_else(|| io_other("`apply` requires --profile"))?,
                config_path,
                continue_on_failure,
            })))
        }
        other => Err(io_other(format!("unknown command `{other}`"))),
    }
}

fn batch_path(positional: Option<String>) -> io::Result<PathBuf> {
    positional
        .map(PathBuf::from)
        .ok_or_else(|| io_other("missing <batch.json> argument"))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "tabledit: turn grid cell edits into row-targeted UPDATE statements\n\n\
Usage:\n  tabledit fetch <table> --profile NAME [--database NAME] [--page N] [--config PATH]\n  \
tabledit plan <batch.json> [--dialect mysql|postgres|sqlite] [--config PATH]\n  \
tabledit apply <batch.json> --profile NAME [--config PATH] [--continue-on-failure]\n\n\
`fetch` prints a batch file for one page (sized by `[editor] page_size`); add\n\
entries to its `edits` list, then `plan` or `apply` it.\n\n\
Environment:\n  TABLEDIT_CONFIG_DIR overrides the settings directory.\n  \
TABLEDIT_DB_PASSWORD is used for authentication.\n  RUST_LOG controls log output.\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}
