use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use mdlog_core::{
    AppendType, BoardFilters, Error, ErrorCode, HeartbeatStatus, KeyId, MintKeyRequest, Permission,
    Priority, ScopeType,
};
use mdlog_engine::{AppendRequest, Engine, FileRef};

#[derive(Parser)]
#[command(name = "mdlog", version)]
struct Cli {
    /// Capability key (falls back to $MDLOG_KEY)
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create .mdlog/ in the current directory and a workspace with its root key
    Init {
        #[arg(long, default_value = "default")]
        name: String,
    },

    /// Mint, revoke and list capability keys
    #[command(subcommand)]
    Key(KeyCommand),

    /// Create and list log files
    #[command(subcommand)]
    File(FileCommand),

    /// Append any record type to a file's log
    Append {
        #[arg(long)]
        file: String,
        #[arg(long = "type", value_parser = parse_type)]
        ty: AppendType,
        #[arg(long)]
        author: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long = "ref")]
        reference: Option<i64>,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,
        /// Comma-separated
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,
        #[arg(long)]
        due_at: Option<i64>,
        #[arg(long)]
        lease: Option<i64>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Claim a task
    Claim {
        #[arg(long)]
        file: String,
        #[arg(long)]
        task: i64,
        #[arg(long)]
        author: String,
        #[arg(long)]
        lease: Option<i64>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Extend a claim's lease
    Renew {
        #[arg(long)]
        file: String,
        #[arg(long)]
        claim: i64,
        #[arg(long)]
        author: String,
        #[arg(long)]
        lease: Option<i64>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Finish a claim with a response
    Complete {
        #[arg(long)]
        file: String,
        #[arg(long)]
        claim: i64,
        #[arg(long)]
        author: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Release a claim
    Cancel {
        #[arg(long)]
        file: String,
        #[arg(long)]
        claim: i64,
        #[arg(long)]
        author: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Mark a claim as blocked
    Block {
        #[arg(long)]
        file: String,
        #[arg(long)]
        claim: i64,
        #[arg(long)]
        author: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },

    /// Report agent liveness
    Heartbeat {
        #[arg(long)]
        author: String,
        #[arg(long, value_parser = parse_heartbeat, default_value = "idle")]
        status: HeartbeatStatus,
        #[arg(long)]
        current_task: Option<String>,
    },

    /// Print the live board
    Board {
        /// Comma-separated task statuses
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        /// Comma-separated priorities
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Drop expired idempotency records
    Purge,
}

#[derive(Subcommand)]
enum KeyCommand {
    Mint {
        #[arg(long)]
        name: Option<String>,
        /// read, append, write (admin is an alias for write)
        #[arg(long, value_parser = parse_permission)]
        permission: Option<Permission>,
        #[arg(long, value_parser = parse_scope)]
        scope: Option<ScopeType>,
        #[arg(long)]
        path: Option<String>,
        /// Bind the key to one author name
        #[arg(long)]
        author: Option<String>,
        /// Comma-separated append types
        #[arg(long, value_delimiter = ',', value_parser = parse_type)]
        types: Option<Vec<AppendType>>,
        #[arg(long)]
        wip_limit: Option<u32>,
        /// Key lifetime in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
    Revoke {
        id: String,
    },
    List,
}

#[derive(Subcommand)]
enum FileCommand {
    Create { path: String },
    List,
}

fn parse_type(s: &str) -> Result<AppendType, String> {
    AppendType::parse(s).ok_or_else(|| format!("unknown append type {s:?}"))
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    Priority::parse(s).ok_or_else(|| format!("unknown priority {s:?}"))
}

fn parse_permission(s: &str) -> Result<Permission, String> {
    Permission::parse(s).ok_or_else(|| format!("unknown permission {s:?}"))
}

fn parse_scope(s: &str) -> Result<ScopeType, String> {
    ScopeType::parse(s).ok_or_else(|| format!("unknown scope {s:?}"))
}

fn parse_heartbeat(s: &str) -> Result<HeartbeatStatus, String> {
    HeartbeatStatus::parse(s).ok_or_else(|| format!("unknown status {s:?}"))
}

/// Print a result as JSON. Domain errors go out in their public form with a
/// non-zero exit code.
fn emit<T: Serialize>(result: Result<T, Error>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.public().body())?);
            std::process::exit(1);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let root = std::env::current_dir()?;
    let engine = Engine::open(&root)?;
    tracing::debug!(root = %root.display(), db = %engine.config().db_path(&root).display(), "engine opened");

    if let Command::Init { name } = &cli.cmd {
        return emit(engine.bootstrap_workspace(name));
    }

    let token = cli.key.or_else(|| std::env::var("MDLOG_KEY").ok());
    let identity = match token.as_deref() {
        Some(token) => engine.authorize(token, None),
        None => Err(Error::new(ErrorCode::Unauthorized, "missing key (use --key or MDLOG_KEY)")),
    };
    let identity = match identity {
        Ok(identity) => identity,
        Err(err) => return emit::<()>(Err(err)),
    };
    let now = mdlog_core::now_unix();

    match cli.cmd {
        Command::Init { .. } => Ok(()),
        Command::Key(KeyCommand::Mint {
            name,
            permission,
            scope,
            path,
            author,
            types,
            wip_limit,
            expires_in,
        }) => {
            let request = MintKeyRequest {
                name,
                permission,
                scope_type: scope,
                scope_path: path,
                bound_author: author,
                allowed_types: types,
                wip_limit,
                expires_at_unix: expires_in.map(|secs| now + secs),
            };
            emit(engine.mint_key(&identity, &request))
        }
        Command::Key(KeyCommand::Revoke { id }) => emit(engine.revoke_key(&identity, &KeyId::from_str(id))),
        Command::Key(KeyCommand::List) => emit(engine.list_keys(&identity)),
        Command::File(FileCommand::Create { path }) => emit(engine.create_file(&identity, &path)),
        Command::File(FileCommand::List) => emit(engine.list_files(&identity)),
        Command::Append {
            file,
            ty,
            author,
            content,
            reference,
            priority,
            labels,
            due_at,
            lease,
            idempotency_key,
        } => {
            let request = AppendRequest {
                content,
                reference,
                priority,
                labels,
                due_at_unix: due_at,
                lease_seconds: lease,
                idempotency_key,
                ..AppendRequest::new(ty, author)
            };
            emit(engine.append(&identity, &FileRef::parse(&file), request))
        }
        Command::Claim {
            file,
            task,
            author,
            lease,
            idempotency_key,
        } => emit(engine.submit_claim(
            &identity,
            &FileRef::parse(&file),
            task,
            &author,
            lease,
            idempotency_key.as_deref(),
        )),
        Command::Renew {
            file,
            claim,
            author,
            lease,
            idempotency_key,
        } => emit(engine.renew_claim(
            &identity,
            &FileRef::parse(&file),
            claim,
            &author,
            lease,
            idempotency_key.as_deref(),
        )),
        Command::Complete {
            file,
            claim,
            author,
            content,
            idempotency_key,
        } => emit(engine.complete_claim(
            &identity,
            &FileRef::parse(&file),
            claim,
            &author,
            content,
            idempotency_key.as_deref(),
        )),
        Command::Cancel {
            file,
            claim,
            author,
            reason,
            idempotency_key,
        } => emit(engine.cancel_claim(
            &identity,
            &FileRef::parse(&file),
            claim,
            &author,
            reason,
            idempotency_key.as_deref(),
        )),
        Command::Block {
            file,
            claim,
            author,
            reason,
            idempotency_key,
        } => emit(engine.block_claim(
            &identity,
            &FileRef::parse(&file),
            claim,
            &author,
            reason,
            idempotency_key.as_deref(),
        )),
        Command::Heartbeat {
            author,
            status,
            current_task,
        } => emit(engine.heartbeat(&identity, &author, status, current_task)),
        Command::Board {
            status,
            agent,
            priority,
            folder,
            limit,
            cursor,
        } => {
            let filters = BoardFilters {
                status,
                agent,
                priority,
                folder,
                limit,
                cursor,
            };
            emit(engine.query_board(&identity, &filters))
        }
        Command::Purge => emit(engine.purge_idempotency(&identity).map(|removed| serde_json::json!({ "removed": removed }))),
    }
}
