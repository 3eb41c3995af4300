use clap::{Parser, Subcommand};
use env_logger::Env;
use sediment::{
    content, ingest, serve, Database, ExpressionEngine, Orchestrator, PayloadDraft, PayloadKind,
    SubscriberOptions, TransformError, TransformSpec,
};

#[derive(Parser, Debug)]
#[command(name = "sediment")]
#[command(
    author,
    version,
    about = "Capture MQTT traffic and CLI payloads into an append-only store with transformation lineage"
)]
struct Args {
    /// Database path
    #[arg(long, env = "DATABASE_PATH", default_value = sediment::db::DEFAULT_DB_PATH)]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to an MQTT broker and capture every message as a raw payload
    Connect {
        /// MQTT broker hostname
        #[arg(long, default_value = "localhost")]
        mqtt_host: String,

        /// MQTT broker port
        #[arg(long, default_value = "1883")]
        mqtt_port: u16,
    },

    /// Add a schema payload (content is canonicalized JSON)
    AddSchema {
        /// Inline JSON, '@path' for a file, or '-' for stdin
        #[arg(short, long, default_value = "-")]
        content: String,
    },

    /// Add a transformer payload (content is stored verbatim)
    AddTransformer {
        /// Inline text, '@path' for a file, or '-' for stdin
        #[arg(short, long, default_value = "-")]
        content: String,
    },

    /// Show per-type payload counts
    Summary,

    /// List payloads of a given type
    ListPayloads {
        /// Payload type: schema, transformer, raw, derived
        #[arg(short = 't', long = "type", default_value = "raw")]
        kind: PayloadKind,
    },

    /// List schema payloads
    ListSchemas,

    /// List transformer payloads
    ListTransformers,

    /// List recorded transformation edges
    Lineage,

    /// Apply a stored transformer to a stored payload
    ApplyTransform {
        /// Transform specification: input:inputSchema/transformer:outputSchema
        #[arg(short, long)]
        spec: String,
    },

    /// Set the soft-delete marker on a payload
    Disable {
        /// Payload id
        id: i64,

        /// Clear the marker instead of setting it
        #[arg(long)]
        enable: bool,
    },

    /// Serve the read-only viewer API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,
    },
}

fn main() {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let args = Args::parse();

    let db = match Database::open_at(&args.database) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Connect {
            mqtt_host,
            mqtt_port,
        } => {
            let options = SubscriberOptions {
                host: mqtt_host,
                port: mqtt_port,
            };
            if let Err(e) = ingest::run(&db, &options) {
                eprintln!("Subscriber error: {}", e);
                std::process::exit(1);
            }
        }

        Command::AddSchema { content } => {
            let draft = resolve_or_exit(&content, content::schema_payload);
            insert_and_report(&db, &draft, "schema");
        }

        Command::AddTransformer { content } => {
            let draft =
                resolve_or_exit(&content, |c| Ok(content::transformer_payload(c)));
            insert_and_report(&db, &draft, "transformer");
        }

        Command::Summary => match db.summary() {
            Ok(summary) => {
                println!("Total payloads: {}", summary.total);
                println!("  schema:      {}", summary.schema);
                println!("  transformer: {}", summary.transformer);
                println!("  raw:         {}", summary.raw);
                println!("  derived:     {}", summary.derived);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },

        Command::ListPayloads { kind } => list_payloads(&db, kind),
        Command::ListSchemas => list_payloads(&db, PayloadKind::Schema),
        Command::ListTransformers => list_payloads(&db, PayloadKind::Transformer),

        Command::Lineage => match db.list_transformations() {
            Ok(edges) => {
                if edges.is_empty() {
                    println!("No transformations recorded.");
                } else {
                    println!(
                        "{:<5} {:<7} {:<10} {:<12} {:<11} {:<7} {}",
                        "ID", "INPUT", "IN-SCHEMA", "TRANSFORMER", "OUT-SCHEMA", "OUTPUT", "EXECUTED"
                    );
                    println!("{}", "-".repeat(70));
                    for e in edges {
                        println!(
                            "{:<5} {:<7} {:<10} {:<12} {:<11} {:<7} {}",
                            e.id,
                            e.input_id,
                            e.input_schema_id,
                            e.transformer_id,
                            e.output_schema_id,
                            e.output_id,
                            e.time_executed
                        );
                    }
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },

        Command::ApplyTransform { spec } => apply_transform(&db, &spec),

        Command::Disable { id, enable } => match db.set_disabled(id, !enable) {
            Ok(()) => {
                let verb = if enable { "Enabled" } else { "Disabled" };
                println!("{} payload {}", verb, id);
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },

        Command::Serve { port } => {
            if let Err(e) = serve::start(&db, port) {
                eprintln!("Server error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn resolve_or_exit<F>(arg: &str, build: F) -> PayloadDraft
where
    F: FnOnce(&str) -> Result<PayloadDraft, content::ContentError>,
{
    match content::resolve(arg).and_then(|c| build(&c)) {
        Ok(draft) => draft,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn insert_and_report(db: &Database, draft: &PayloadDraft, label: &str) {
    match db.insert_payload(draft) {
        Ok(id) => println!("Added {} payload {}", label, id),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn list_payloads(db: &Database, kind: PayloadKind) {
    match db.list_payloads(kind) {
        Ok(payloads) => {
            if payloads.is_empty() {
                println!("No {} payloads found.", kind);
            } else {
                for p in payloads {
                    println!("[{}] {}", p.id, p.rendered());
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn apply_transform(db: &Database, spec_arg: &str) {
    let spec: TransformSpec = match spec_arg.parse() {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let engine = ExpressionEngine::new();
    match Orchestrator::new(db, &engine).apply(&spec) {
        Ok(outcome) => {
            let pretty = serde_json::to_string_pretty(&outcome.output)
                .unwrap_or_else(|_| outcome.output.to_string());
            println!("{}", pretty);
            println!(
                "Derived payload {} recorded (edge {})",
                outcome.output_id, outcome.edge_id
            );
        }
        // An expected outcome of the idempotency contract, reported as a
        // rejection rather than a failure.
        Err(e @ TransformError::AlreadyTransformed { .. }) => {
            eprintln!("Rejected: {}", e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
