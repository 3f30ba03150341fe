//! docchat command-line interface
//!
//! Run with: cargo run -p docchat -- <ingest|ask|chat>

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docchat::providers::{EmbeddingProvider, OllamaProvider};
use docchat::{AnswerStream, Conversation, IngestPipeline, RagConfig, RagContext, VectorIndex};

const SNIPPET_CHARS: usize = 200;

/// Chat with a folder of documents through a local Ollama server
#[derive(Parser)]
#[command(name = "docchat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed the source folder, then save the index
    Ingest {
        /// Folder to ingest (overrides `source_dir`)
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Answer a single question
    Ask {
        question: String,
    },

    /// Summarize one file (txt, pdf, docx, ...) with its key points
    Summarize {
        file: PathBuf,
    },

    /// Interactive multi-turn chat (`/file <path>` analyzes a file, `/reset` clears history, `/exit` quits)
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docchat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => RagConfig::from_file(path)?,
        None => RagConfig::default(),
    };

    match cli.command {
        Command::Ingest { source } => {
            if let Some(source) = source {
                config.source_dir = source;
            }
            ingest(&config).await
        }
        Command::Ask { question } => {
            let mut conversation = Conversation::new(open_context(&config).await?);
            print_answer(&mut conversation, &question).await?;
            Ok(())
        }
        Command::Summarize { file } => {
            // no index needed; the file itself is the context
            config.validate()?;
            let (embedder, llm) = OllamaProvider::new(&config.llm)?.split();
            let index = VectorIndex::new(embedder.model());
            let context =
                RagContext::new(index, Arc::new(embedder), Arc::new(llm), config.retrieval.top_k)?;
            let mut conversation = Conversation::new(context);
            print_file_analysis(&mut conversation, &file).await?;
            Ok(())
        }
        Command::Chat => chat(&config).await,
    }
}

async fn ingest(config: &RagConfig) -> anyhow::Result<()> {
    config.validate()?;
    let provider = OllamaProvider::new(&config.llm)?;
    warn_if_offline(provider.embedder(), &config.llm.base_url).await;
    let (embedder, _) = provider.split();

    let pipeline = IngestPipeline::from_config(config)?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let result = pipeline
        .build(&config.source_dir, &embedder, &config.index.location, |p| {
            pb.set_length(p.total as u64);
            pb.set_position(p.processed as u64);
            let name = p
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match p.error {
                Some(error) => pb.println(format!("{} {}: {}", style("skip").yellow(), name, error)),
                None => pb.set_message(name),
            }
        })
        .await;
    pb.finish_and_clear();

    let report = result?;
    println!(
        "{} Indexed {} chunks from {} documents ({} files seen, {} unsupported, {} failed)",
        style("✓").green().bold(),
        report.chunks,
        report.documents,
        report.files_seen,
        report.unsupported_skipped,
        report.failures.len()
    );
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            failure.path.display(),
            failure.message
        );
    }
    println!("Index saved to {}", report.location.display());
    Ok(())
}

/// Load the index; an unreachable embedding service is fatal here
async fn open_context(config: &RagConfig) -> anyhow::Result<RagContext> {
    config.validate()?;
    let provider = OllamaProvider::new(&config.llm)?;
    let (embedder, llm) = provider.split();

    RagContext::load(config, Arc::new(embedder), Arc::new(llm))
        .await
        .with_context(|| {
            format!(
                "cannot open the knowledge base at {} (is Ollama running at {}?)",
                config.index.location.display(),
                config.llm.base_url
            )
        })
}

async fn warn_if_offline(embedder: &dyn EmbeddingProvider, base_url: &str) {
    if !embedder.health_check().await.unwrap_or(false) {
        tracing::warn!("Ollama not reachable at {}; start it with `ollama serve`", base_url);
    }
}

/// Stream one answer to stdout, then list its sources
async fn print_answer(conversation: &mut Conversation, question: &str) -> docchat::Result<()> {
    let stream = conversation.ask_stream(question).await?;
    print_stream(stream).await
}

/// Stream a file summary to stdout
async fn print_file_analysis(conversation: &mut Conversation, file: &Path) -> docchat::Result<()> {
    println!("{}", style(format!("Analyzing {}", file.display())).dim());
    let stream = conversation.analyze_file(file).await?;
    print_stream(stream).await
}

async fn print_stream(mut stream: AnswerStream<'_>) -> docchat::Result<()> {
    let mut stdout = std::io::stdout();

    while let Some(token) = stream.next().await {
        let token = token?;
        print!("{}", token);
        stdout.flush()?;
    }
    println!();

    if !stream.sources().is_empty() {
        println!("{}", style("Sources:").dim());
        for (i, hit) in stream.sources().iter().enumerate() {
            println!(
                "  {}",
                style(format!(
                    "[{}] {} ({:.2})",
                    i + 1,
                    hit.chunk.metadata.format_citation(),
                    hit.score
                ))
                .dim()
            );
            println!("      {}", style(format!("> {}", hit.snippet(SNIPPET_CHARS))).dim().italic());
        }
    }
    Ok(())
}

async fn chat(config: &RagConfig) -> anyhow::Result<()> {
    let mut conversation = Conversation::new(open_context(config).await?);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "{} ({} chunks indexed). Type /file <path> to analyze a file, /reset to start over, /exit to quit.",
        style("docchat").bold(),
        conversation.context().index().len()
    );

    loop {
        print!("{} ", style(">").cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();

        match question {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                conversation.reset();
                println!("{}", style("History cleared.").dim());
                continue;
            }
            _ => {}
        }

        let result = match question.strip_prefix("/file") {
            Some(path) if path.is_empty() || path.starts_with(char::is_whitespace) => {
                let path = path.trim();
                if path.is_empty() {
                    println!("{}", style("usage: /file <path>").dim());
                    continue;
                }
                print_file_analysis(&mut conversation, Path::new(path)).await
            }
            _ => print_answer(&mut conversation, question).await,
        };

        if let Err(e) = result {
            println!();
            eprintln!("{} {}", style("error:").red().bold(), e);
            if e.is_fatal() {
                return Err(e.into());
            }
        }
    }

    Ok(())
}
