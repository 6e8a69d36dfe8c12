mod cli;

use std::path::PathBuf;

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::{Parser, Subcommand};
use semsearch::config;
use semsearch::{BertEmbedder, EmbeddingPolicy, Pooling, SearchContext, VectorStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "semsearch", about = "Exhaustive semantic search over a precomputed embedding store")]
struct Args {
    /// Directory with embeddings.npy, chunks.json and optional manifest.json
    #[arg(long, global = true, env = "SEMSEARCH_DATA_DIR", default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Hugging Face model id of the sentence encoder
    #[arg(long, global = true, env = "SEMSEARCH_MODEL_ID", default_value = config::DEFAULT_MODEL_ID)]
    model_id: String,

    /// Local directory with config.json, tokenizer.json and model.safetensors (skips the Hub)
    #[arg(long, global = true, env = "SEMSEARCH_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Token pooling applied to the encoder output
    #[arg(long, global = true, env = "SEMSEARCH_POOLING", value_enum, default_value_t = Pooling::Mean)]
    pooling: Pooling,

    /// L2-normalize embeddings after pooling
    #[arg(long, global = true, env = "SEMSEARCH_NORMALIZE")]
    normalize: bool,

    /// Address the HTTP server binds to
    #[arg(long, global = true, env = "SEMSEARCH_HOST", default_value = config::DEFAULT_HOST)]
    host: String,

    #[arg(short, long, global = true, env = "SEMSEARCH_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP search API (default)
    Serve,
    /// Run a single search and print the results
    Query {
        /// Prompt text; multiple words are joined with spaces
        #[arg(required = true)]
        prompt: Vec<String>,

        #[arg(short = 'k', long, default_value_t = config::DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Interactive search session
    Repl {
        #[arg(short = 'k', long, default_value_t = config::DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Embed a JSON list of chunks and write a store into --data-dir
    Build {
        /// JSON array of chunk strings
        #[arg(long)]
        chunks: PathBuf,

        #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
}

impl Args {
    fn policy(&self) -> EmbeddingPolicy {
        EmbeddingPolicy {
            model_id: self.model_id.clone(),
            pooling: self.pooling,
            normalize: self.normalize,
        }
    }

    fn load_embedder(&self) -> anyhow::Result<BertEmbedder> {
        BertEmbedder::load(self.policy(), self.model_dir.as_deref()).context("loading embedding model")
    }

    /// Load store, verify shapes, initialize embedder, verify policy.
    fn load_context(&self) -> anyhow::Result<SearchContext> {
        let store = VectorStore::load(&self.data_dir)
            .with_context(|| format!("loading store from '{}'", self.data_dir.display()))?;
        let embedder = self.load_embedder()?;
        Ok(SearchContext::new(store, Box::new(embedder))?)
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("semsearch=info,actix_web=info")),
        )
        .init();

    let args = Args::parse();

    match &args.command {
        None | Some(Command::Serve) => serve(&args).await,
        Some(Command::Query { prompt, top_k }) => {
            let ctx = args.load_context()?;
            cli::run_query(&ctx, &prompt.join(" "), *top_k)
        }
        Some(Command::Repl { top_k }) => {
            let ctx = args.load_context()?;
            cli::run_repl(&ctx, *top_k)
        }
        Some(Command::Build { chunks, batch_size }) => {
            let embedder = args.load_embedder()?;
            cli::run_build(&embedder, chunks, &args.data_dir, *batch_size)
        }
    }
}

async fn serve(args: &Args) -> anyhow::Result<()> {
    let (host, port) = (args.host.as_str(), args.port);
    let ctx = web::Data::new(args.load_context()?);

    tracing::info!(
        rows = ctx.store().rows(),
        dim = ctx.store().dimension(),
        policy = %ctx.policy(),
        "Search context ready"
    );
    tracing::info!("Open http://{}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(ctx.clone())
            .wrap(middleware::Logger::default())
            .configure(semsearch::server::config)
    })
    .bind((host, port))
    .with_context(|| format!("binding {}:{}", host, port))?
    .run()
    .await?;

    Ok(())
}
