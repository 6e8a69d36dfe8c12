use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context};
use semsearch::config::clamp_top_k;
use semsearch::store::decode_chunks;
use semsearch::{Embedder, SearchContext, SearchError, SearchResponse, VectorStore};

/// One-shot mode - embed a prompt, search, print results
pub fn run_query(ctx: &SearchContext, prompt: &str, top_k: usize) -> anyhow::Result<()> {
    let response = ctx.search(prompt, top_k)?;
    print_response(&response);
    Ok(())
}

/// REPL mode - interactive session over one loaded context
pub fn run_repl(ctx: &SearchContext, top_k: usize) -> anyhow::Result<()> {
    println!("semsearch - {} chunks x {} dims", ctx.store().rows(), ctx.store().dimension());
    println!("Type a prompt to search, 'help' for commands, 'exit' or 'quit' to quit\n");

    let mut top_k = clamp_top_k(top_k as f64);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("semsearch> ");
        io::stdout().flush()?;

        let input = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(error)) => {
                eprintln!("Error reading input: {}", error);
                continue;
            }
            None => break,
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if input == "exit" || input == "quit" {
            println!("Goodbye!");
            break;
        }

        if input == "help" {
            print_help();
            continue;
        }

        if let Some(value) = input.strip_prefix(":k") {
            match value.trim().parse::<f64>() {
                Ok(k) => {
                    top_k = clamp_top_k(k);
                    println!("top_k = {}", top_k);
                }
                Err(_) => eprintln!("Error: ':k' expects a number"),
            }
            continue;
        }

        match ctx.search(input, top_k) {
            Ok(response) => print_response(&response),
            Err(error @ SearchError::InvalidQuery(_)) => eprintln!("Error: {}", error),
            Err(error) => eprintln!("Search failed: {}", error),
        }
    }

    Ok(())
}

/// Build mode - embed a JSON list of chunks and write a complete store
pub fn run_build(
    embedder: &dyn Embedder,
    chunks_path: &Path,
    data_dir: &Path,
    batch_size: usize,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(chunks_path)
        .with_context(|| format!("reading chunks from '{}'", chunks_path.display()))?;
    let chunks = decode_chunks(&bytes)?;
    if chunks.is_empty() {
        bail!("'{}' contains no chunks to embed", chunks_path.display());
    }

    let batch_size = batch_size.max(1);
    let total_batches = chunks.len().div_ceil(batch_size);
    println!("Embedding {} chunks (batch_size={})...", chunks.len(), batch_size);

    let start = Instant::now();
    let mut dimension: Option<usize> = None;
    let mut vectors: Vec<f32> = Vec::new();

    for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<&str> = batch.iter().map(|s| s.as_str()).collect();
        for vector in embedder.embed_batch(&texts)? {
            let dim = *dimension.get_or_insert(vector.len());
            if vector.len() != dim {
                bail!("embedder returned {} dims after {} dims", vector.len(), dim);
            }
            vectors.extend(vector);
        }

        if (batch_idx + 1) % 50 == 0 || batch_idx + 1 == total_batches {
            let done = ((batch_idx + 1) * batch_size).min(chunks.len());
            println!(
                "  Batch {}/{}: {}/{} chunks (elapsed {:.1}s)",
                batch_idx + 1,
                total_batches,
                done,
                chunks.len(),
                start.elapsed().as_secs_f64()
            );
        }
    }

    let dimension = dimension.context("embedder returned no vectors")?;
    let rows = chunks.len();
    let store = VectorStore::new(vectors, dimension, chunks)?;
    store.write(data_dir, embedder.policy())?;

    tracing::info!(rows, dimension, dir = %data_dir.display(), "Store written");
    println!("Wrote {} x {} store to '{}'", rows, dimension, data_dir.display());
    Ok(())
}

fn print_response(response: &SearchResponse) {
    println!("Prompt: \"{}\" (dim {})", response.prompt, response.embedding_dim);
    println!(
        "Closest (euclidean): #{} distance {:.4}",
        response.closest_euclidean.index, response.closest_euclidean.distance
    );
    println!(
        "Closest (cosine):    #{} score {:.4}\n",
        response.closest_cosine.index, response.closest_cosine.score
    );

    println!("Top {} chunks (Euclidean):", response.top_euclidean.len());
    for hit in &response.top_euclidean {
        println!("  {:2}. [{}] distance {:.4}  {}", hit.rank, hit.index, hit.distance, preview(&hit.text));
    }

    println!("Top {} chunks (Cosine):", response.top_cosine.len());
    for hit in &response.top_cosine {
        println!("  {:2}. [{}] score {:.4}  {}", hit.rank, hit.index, hit.score, preview(&hit.text));
    }
    println!();
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 100;
    let line = text.replace('\n', " ");
    if line.chars().count() <= MAX_CHARS {
        return line;
    }
    let cut: String = line.chars().take(MAX_CHARS).collect();
    format!("{}...", cut)
}

fn print_help() {
    println!("Available commands:");
    println!("  <prompt>                         - Search for the nearest chunks");
    println!("  :k <number>                      - Set how many results to show (1-30)");
    println!("  help                             - Show this help");
    println!("  exit, quit                       - Exit the program");
}
