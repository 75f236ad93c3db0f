//! Operator CLI driving the same knowledge-base service as the HTTP server.
//!
//! Command output goes to stdout; logs go to stderr (filter with `RUST_LOG`).
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use graphkb::{
    config,
    indexing::log_build_failure,
    llm::OpenAiClient,
    logging::{self, LogOptions, LogSink},
    service::KnowledgeBaseService,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "graphkb-cli",
    about = "Manage per-conversation graph knowledge bases"
)]
struct Cli {
    /// Override GRAPHRAG_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Target {
    /// Conversation id owning the knowledge base.
    #[arg(long, short = 'c')]
    conversation: Uuid,
}

#[derive(Subcommand)]
enum Command {
    /// Extract and store a document file.
    Add {
        #[command(flatten)]
        target: Target,
        /// File to ingest (PDF or text).
        path: PathBuf,
        /// Stored name; defaults to the file's own name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List stored documents.
    List {
        #[command(flatten)]
        target: Target,
    },
    /// Build the graph index.
    Build {
        #[command(flatten)]
        target: Target,
        /// Dump input statistics and full error detail.
        #[arg(long)]
        debug: bool,
    },
    /// Query the graph index.
    Query {
        #[command(flatten)]
        target: Target,
        text: String,
        #[arg(long, default_value = "local")]
        mode: String,
        #[arg(long)]
        debug: bool,
    },
    /// Keyword search over the stored documents.
    Search {
        #[command(flatten)]
        target: Target,
        text: String,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Retrieve context and generate an answer.
    Ask {
        #[command(flatten)]
        target: Target,
        question: String,
        #[arg(long, default_value = "local")]
        mode: String,
        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },
    /// Check the generation endpoint and show the configured model.
    Health,
    /// Show document and artifact counts.
    Stats {
        #[command(flatten)]
        target: Target,
    },
    /// Remove the conversation's workspace.
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// Print the engine settings a build would write.
    RenderConfig {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing_with(LogOptions {
        default_directive: "warn",
        sink: LogSink::Stderr,
    });

    let mut config = config::load_config().context("failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.graphrag_data_dir = dir;
    }
    let service = KnowledgeBaseService::new(Arc::new(config));

    match cli.command {
        Command::Add { target, path, name } => {
            let bytes =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let name = match name {
                Some(name) => name,
                None => path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .context("path has no file name")?,
            };
            let stored = service
                .ingest_upload(target.conversation, &name, bytes)
                .await
                .with_context(|| format!("failed to ingest {}", path.display()))?;
            println!("{}", stored.display());
        }
        Command::List { target } => {
            let documents = service
                .list_documents(target.conversation)
                .context("failed to list documents")?;
            for document in documents {
                println!("{}\t{}", document.filename, document.characters);
            }
        }
        Command::Build { target, debug } => {
            let id = target.conversation;
            match service.build_index_report(id, debug).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(error) => {
                    log_build_failure(id, &error, debug);
                    return Err(error).context("index build failed");
                }
            }
        }
        Command::Query {
            target,
            text,
            mode,
            debug,
        } => match service.query(target.conversation, &text, &mode, debug).await {
            Some(answer) => println!("{answer}"),
            None => bail!("no answer from the graph index"),
        },
        Command::Search {
            target,
            text,
            max_results,
        } => match service.search(target.conversation, &text, max_results) {
            Some(results) => println!("{results}"),
            None => bail!("no matching paragraphs"),
        },
        Command::Ask {
            target,
            question,
            mode,
            stream: false,
        } => {
            let answer = service
                .answer(target.conversation, &question, &mode)
                .await
                .context("failed to generate an answer")?;
            println!("{}", answer.text);
            if let Some(source) = answer.source {
                eprintln!("context source: {}", serde_json::to_string(&source)?);
            }
        }
        Command::Ask {
            target,
            question,
            mode,
            stream: true,
        } => {
            let (source, mut chunks) = service
                .answer_stream(target.conversation, &question, &mode)
                .await
                .context("failed to start answer generation")?;
            if let Some(source) = source {
                eprintln!("context source: {}", serde_json::to_string(&source)?);
            }
            let mut stdout = io::stdout().lock();
            while let Some(chunk) = chunks.next().await {
                write!(stdout, "{}", chunk.context("answer stream failed")?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
        Command::Health => {
            let client = OpenAiClient::from_config(service.config())
                .context("generation client is not configured")?;
            let info = client
                .model_info()
                .await
                .with_context(|| format!("model endpoint rejected {}", client.model()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Stats { target } => {
            let stats = service
                .stats(target.conversation)
                .context("failed to read workspace statistics")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Delete { target } => {
            if !service.delete(target.conversation).await {
                bail!("no knowledge base found for {}", target.conversation);
            }
        }
        Command::RenderConfig { target } => {
            let rendered = service
                .render_engine_config(target.conversation)
                .context("failed to render engine settings")?;
            print!("{rendered}");
        }
    }

    Ok(())
}
