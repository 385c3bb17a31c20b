use chatbi_core::config::ChatBiConfig;
use chatbi_core::execution::SqliteExecutor;
use chatbi_core::intent::QueryPlan;
use chatbi_core::query_engine::{ChatBiCompiler, ChatBiEngine, CompileOutcome, RecordedPlan};
use chatbi_core::security::{Role, UserContext};
use chatbi_core::semantic::SCHEMA_REGISTRY;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatbi")]
#[command(about = "Compile natural-language query plans into safe, parameterized SQL")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Caller {
    /// Id of the calling user
    #[arg(long, default_value_t = 1)]
    user_id: i64,

    /// Username of the calling user
    #[arg(long, default_value = "cli")]
    username: String,

    /// Role of the calling user (ADMIN or USER)
    #[arg(long, default_value = "USER")]
    role: String,
}

impl Caller {
    fn context(&self) -> UserContext {
        UserContext::new(self.user_id, self.username.clone(), Role::parse(&self.role))
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a plan and print the clarification or the built query
    Compile {
        /// Plan JSON file (reads stdin when omitted)
        plan: Option<PathBuf>,

        #[command(flatten)]
        caller: Caller,

        /// The user question, used for permission heuristics
        #[arg(short, long, default_value = "")]
        question: String,
    },
    /// Compile a plan and execute it against a SQLite database
    Run {
        /// Plan JSON file (reads stdin when omitted)
        plan: Option<PathBuf>,

        /// Path to the SQLite database
        #[arg(short, long)]
        db: PathBuf,

        #[command(flatten)]
        caller: Caller,

        /// The user question
        #[arg(short, long)]
        question: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Compile { plan, caller, question } => run_compile(plan, caller, question),
        Commands::Run { plan, db, caller, question, format } => {
            run_query(plan, db, caller, question, format)
        }
    }
}

fn read_plan(path: Option<PathBuf>) -> Result<QueryPlan> {
    let text = match path {
        Some(path) => fs::read_to_string(&path)
            .with_context(|| format!("failed to read plan file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("failed to read plan from stdin")?;
            buf
        }
    };
    Ok(QueryPlan::from_model_output(&text)?)
}

fn run_compile(plan: Option<PathBuf>, caller: Caller, question: String) -> Result<()> {
    let config = ChatBiConfig::from_env()?;
    let plan = read_plan(plan)?;
    let user = caller.context();
    info!("Compiling plan for user {} ({})", user.username, user.role.as_str());

    let compiler = ChatBiCompiler::new(&SCHEMA_REGISTRY, config.limit_policy());
    let output = match compiler.compile(&user, &question, plan)? {
        CompileOutcome::Clarify { question, .. } => json!({
            "needClarification": true,
            "clarifyingQuestion": question,
        }),
        CompileOutcome::Ready { query, .. } => serde_json::to_value(&query)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn run_query(
    plan: Option<PathBuf>,
    db: PathBuf,
    caller: Caller,
    question: String,
    format: OutputFormat,
) -> Result<()> {
    let config = ChatBiConfig::from_env()?;
    let plan = read_plan(plan)?;
    let executor = SqliteExecutor::open(&db)?;
    let engine = ChatBiEngine::new(RecordedPlan(plan), executor, config);

    let response = engine.ask(&caller.context(), &question)?;
    match (format, &response.result) {
        (OutputFormat::Csv, Some(result)) => result.write_csv(io::stdout().lock())?,
        (OutputFormat::Csv, None) => println!("{}", response.answer),
        (OutputFormat::Json, _) => println!("{}", serde_json::to_string_pretty(&response)?),
    }
    Ok(())
}
