//! Subcommands and their execution against a database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Subcommand};
use recordbase_core::query::Filter;
use recordbase_core::storage::ListOptions;
use recordbase_core::{Database, ResourceDef, SchemaDocument, User};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::formatter::Formatter;

/// Errors surfaced by the command-line tool.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Core(#[from] recordbase_core::Error),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidInput(String),
}

impl CliError {
    /// Process exit code: 2 for routine denials and misses, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Core(e) if e.is_permission_denied() || e.is_not_found() => 2,
            _ => 1,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the configuration catalog
    #[command(subcommand)]
    Schema(SchemaCommand),

    /// Work with records
    #[command(subcommand)]
    Record(RecordCommand),

    /// Run a named aggregation of a resource
    Aggregate {
        /// Resource id or name
        resource: String,
        /// Aggregation name
        name: String,
        #[command(flatten)]
        user: UserArg,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchemaCommand {
    /// Apply a JSON document of permissions, roles, resources and forms
    Apply {
        /// Path to the document
        file: PathBuf,
    },
    /// List resources
    Resources,
}

#[derive(Subcommand, Debug)]
pub enum RecordCommand {
    /// Create a record
    Create {
        /// Resource id or name
        resource: String,
        /// Create through this form
        #[arg(long)]
        form: Option<String>,
        /// Record data: inline JSON object, or @path to a JSON file
        #[arg(long)]
        data: String,
        #[command(flatten)]
        user: UserArg,
    },
    /// Replace a record's data
    Update {
        id: String,
        /// Record data: inline JSON object, or @path to a JSON file
        #[arg(long)]
        data: String,
        #[command(flatten)]
        user: UserArg,
    },
    /// Show a record
    Get {
        id: String,
        #[command(flatten)]
        user: UserArg,
    },
    /// List the records of a resource
    List {
        /// Resource id or name
        resource: String,
        /// Include archived records
        #[arg(long)]
        archived: bool,
        /// Filter as JSON, e.g. {"field":"country","operator":"eq","value":"FR"}
        #[arg(long)]
        filter: Option<String>,
        /// List through this form
        #[arg(long)]
        form: Option<String>,
        #[command(flatten)]
        user: UserArg,
    },
    /// Archive a record
    Archive {
        id: String,
        #[command(flatten)]
        user: UserArg,
    },
    /// Restore an archived record
    Unarchive {
        id: String,
        #[command(flatten)]
        user: UserArg,
    },
    /// Permanently delete records
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        user: UserArg,
    },
    /// Show the change history of a record
    History {
        id: String,
        #[command(flatten)]
        user: UserArg,
    },
}

/// The acting user, read from a JSON file.
#[derive(Args, Debug)]
pub struct UserArg {
    /// JSON file with {"id", "roles", "positionAttributes"}
    #[arg(long = "user", value_name = "FILE")]
    pub path: PathBuf,
}

impl UserArg {
    fn load(&self) -> Result<User, CliError> {
        Ok(serde_json::from_str(&read_file(&self.path)?)?)
    }
}

/// Execute a command and return its formatted output.
pub fn execute(
    db: &Database,
    command: Command,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    match command {
        Command::Schema(SchemaCommand::Apply { file }) => {
            let document: SchemaDocument = serde_json::from_str(&read_file(&file)?)?;
            let summary = db.apply_schema(document)?;
            info!(file = %file.display(), "schema applied");
            Ok(formatter.format_summary(&summary))
        }
        Command::Schema(SchemaCommand::Resources) => {
            let resources = db.catalog().list_resources()?;
            Ok(formatter.format_resources(&resources))
        }
        Command::Record(command) => execute_record(db, command, formatter),
        Command::Aggregate {
            resource,
            name,
            user,
        } => {
            let resource = resolve_resource(db, &resource)?;
            let rows = db.records().aggregate(&resource.id, &name, &user.load()?)?;
            Ok(formatter.format_rows(&rows))
        }
    }
}

fn execute_record(
    db: &Database,
    command: RecordCommand,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let store = db.records();
    match command {
        RecordCommand::Create {
            resource,
            form,
            data,
            user,
        } => {
            let resource = resolve_resource(db, &resource)?;
            let record =
                store.create(&resource.id, form.as_deref(), parse_data(&data)?, &user.load()?)?;
            Ok(formatter.format_record(&record))
        }
        RecordCommand::Update { id, data, user } => {
            let record = store.update(&id, parse_data(&data)?, &user.load()?)?;
            Ok(formatter.format_record(&record))
        }
        RecordCommand::Get { id, user } => {
            Ok(formatter.format_record(&store.get(&id, &user.load()?)?))
        }
        RecordCommand::List {
            resource,
            archived,
            filter,
            form,
            user,
        } => {
            let resource = resolve_resource(db, &resource)?;
            let mut options = ListOptions::default();
            if archived {
                options = options.with_archived();
            }
            if let Some(filter) = filter {
                options = options.with_filter(serde_json::from_str::<Filter>(&filter)?);
            }
            if let Some(form) = form {
                options = options.with_form(form);
            }
            let records = store.list(&resource.id, &user.load()?, options)?;
            Ok(formatter.format_records(&records))
        }
        RecordCommand::Archive { id, user } => {
            Ok(formatter.format_record(&store.archive(&id, &user.load()?)?))
        }
        RecordCommand::Unarchive { id, user } => {
            Ok(formatter.format_record(&store.unarchive(&id, &user.load()?)?))
        }
        RecordCommand::Delete { ids, user } => {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let deleted = store.delete(&ids, &user.load()?)?;
            Ok(formatter.format_message(&format!("{} record(s) deleted", deleted)))
        }
        RecordCommand::History { id, user } => {
            let history = store.history(&id, &user.load()?)?;
            Ok(formatter.format_history(&history))
        }
    }
}

/// Look a resource up by id, falling back to its name.
fn resolve_resource(db: &Database, key: &str) -> Result<Arc<ResourceDef>, CliError> {
    match db.catalog().resource(key) {
        Ok(resource) => Ok(resource),
        Err(e) if e.is_not_found() => Ok(db.catalog().resource_by_name(key)?),
        Err(e) => Err(e.into()),
    }
}

/// Parse record data given inline or as `@path`.
fn parse_data(arg: &str) -> Result<Map<String, Value>, CliError> {
    let text = match arg.strip_prefix('@') {
        Some(path) => read_file(Path::new(path))?,
        None => arg.to_string(),
    };
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(CliError::InvalidInput(
            "record data must be a JSON object".to_string(),
        )),
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}
