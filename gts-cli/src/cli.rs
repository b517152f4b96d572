use anyhow::Result;
use clap::{Parser, Subcommand};
use gts::GtsOps;
use serde::Serialize;
use std::io::Write;

use gts_cli::server::GtsHttpServer;

#[derive(Parser)]
#[command(name = "gts")]
#[command(about = "GTS registry CLI and server", long_about = None)]
struct Cli {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to an optional GTS config JSON overriding the field-scan lists
    #[arg(long)]
    config: Option<String>,

    /// Path to entity files or directories used to seed the registry
    #[arg(long)]
    path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a GTS identifier
    ValidateId {
        #[arg(long)]
        gts_id: String,
    },
    /// Parse a GTS identifier into its segments
    ParseId {
        #[arg(long)]
        gts_id: String,
    },
    /// Match an identifier against a wildcard pattern
    MatchIdPattern {
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        candidate: String,
    },
    /// Derive the deterministic UUID of an identifier
    Uuid {
        #[arg(long)]
        gts_id: String,
    },
    /// Extract ids from a JSON document (a file path or inline JSON)
    ExtractId {
        #[arg(long)]
        document: String,
    },
    /// Validate an instance against its type chain
    ValidateInstance {
        #[arg(long)]
        gts_id: String,
    },
    /// Validate a schema as a refinement of its ancestors
    ValidateSchema {
        #[arg(long)]
        gts_id: String,
    },
    /// Validate an entity, dispatching on its id shape
    ValidateEntity {
        #[arg(long)]
        gts_id: String,
    },
    /// Resolve the reference graph of an entity
    ResolveRelationships {
        #[arg(long)]
        gts_id: String,
    },
    /// Check minor-version compatibility of two schemas
    Compatibility {
        #[arg(long)]
        old_schema_id: String,
        #[arg(long)]
        new_schema_id: String,
    },
    /// Cast an instance to a sibling minor version
    Cast {
        #[arg(long)]
        from_id: String,
        #[arg(long)]
        to_schema_id: String,
    },
    /// Query entities with a pattern and attribute filters
    Query {
        #[arg(long)]
        expr: String,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Resolve an attribute path inside an entity (`<id>@<dotted.path>`)
    Attr {
        #[arg(long)]
        gts_with_path: String,
    },
    /// List registered entities
    List {
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Start the HTTP server
    Server {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value = "8000")]
        port: u16,
    },
    /// Write the OpenAPI document describing the HTTP surface
    OpenapiSpec {
        #[arg(long)]
        out: String,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value = "8000")]
        port: u16,
    },
}

/// Parse args, set up logging and dispatch.
///
/// # Errors
/// Propagates IO and server failures.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // WARN with no -v, INFO with -v, DEBUG with -vv.
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let path = cli.path.map(|p| vec![p]);
    let ops = GtsOps::new(path, cli.config, usize::from(cli.verbose));

    match cli.command {
        Commands::Server { host, port } => {
            println!("starting the server @ http://{host}:{port}");
            if cli.verbose == 0 {
                println!("use --verbose to see server logs");
            }
            let server = GtsHttpServer::new(ops, host, port, cli.verbose);
            server.run().await?;
        }
        Commands::OpenapiSpec { out, host, port } => {
            let server = GtsHttpServer::new(ops, host, port, cli.verbose);
            std::fs::write(&out, serde_json::to_string_pretty(&server.openapi_spec())?)?;
            print_json(&serde_json::json!({ "ok": true, "out": out }))?;
        }
        Commands::ValidateId { gts_id } => print_json(&ops.validate_id(&gts_id))?,
        Commands::ParseId { gts_id } => print_json(&ops.parse_id(&gts_id))?,
        Commands::MatchIdPattern { pattern, candidate } => {
            print_json(&ops.match_id_pattern(&candidate, &pattern))?;
        }
        Commands::Uuid { gts_id } => print_json(&ops.uuid(&gts_id))?,
        Commands::ExtractId { document } => {
            let raw = if std::path::Path::new(&document).exists() {
                std::fs::read_to_string(&document)?
            } else {
                document
            };
            let content: serde_json::Value = serde_json::from_str(&raw)?;
            print_json(&ops.extract_id(&content))?;
        }
        Commands::ValidateInstance { gts_id } => print_json(&ops.validate_instance(&gts_id))?,
        Commands::ValidateSchema { gts_id } => print_json(&ops.validate_schema(&gts_id))?,
        Commands::ValidateEntity { gts_id } => print_json(&ops.validate_entity(&gts_id))?,
        Commands::ResolveRelationships { gts_id } => print_json(&ops.schema_graph(&gts_id))?,
        Commands::Compatibility {
            old_schema_id,
            new_schema_id,
        } => print_json(&ops.compatibility(&old_schema_id, &new_schema_id))?,
        Commands::Cast {
            from_id,
            to_schema_id,
        } => print_json(&ops.cast(&from_id, &to_schema_id))?,
        Commands::Query { expr, limit } => print_json(&ops.query(&expr, limit))?,
        Commands::Attr { gts_with_path } => print_json(&ops.attr(&gts_with_path))?,
        Commands::List { limit } => print_json(&ops.get_entities(limit))?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, value)?;
    writeln!(handle)?;
    Ok(())
}
