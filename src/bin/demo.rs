//! Graph RAG demo against a Postgres-backed knowledge base.
//!
//! Reads configuration from the environment (and `.env`), smoke-tests the
//! completion and embedding endpoints, then runs one question through the
//! local, global and hybrid modes with streamed answers.
//!
//! Usage:
//!   cargo run --bin demo

use std::io::Write as _;

use anyhow::Result;
use futures::StreamExt;

use pgrag::rag::{mode_from_str, EmbeddingFunc, GraphRag};
use pgrag::{
    configure_logging, Config, EmbeddingClient, LlmClient, QueryParam, QueryResponse, Storages,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    std::fs::create_dir_all(&config.working_dir)?;

    configure_logging(&config)?;
    println!(
        "\nGraph RAG demo log file: {}\n",
        config.log_file_path().display()
    );

    let llm = LlmClient::from_config(&config.llm)?;
    let embedding = EmbeddingClient::from_config(&config.embedding)?;

    // Endpoint smoke test before touching the database.
    let result = llm.complete("How are you?", None, &[]).await?;
    println!("llm_model_func: {}", result);
    let vectors = embedding.embed(&["How are you?".to_string()]).await?;
    println!("embedding_func: ({}, {})", vectors.len(), vectors[0].len());

    let rag = match initialize_rag(&config, llm, embedding).await {
        Ok(rag) => rag,
        Err(e) => {
            println!("An error occurred: {e}");
            return Ok(());
        }
    };

    if let Err(e) = run_queries(&rag).await {
        println!("An error occurred: {e}");
    }
    rag.finalize_storages().await;

    println!("\nDone!");
    Ok(())
}

async fn initialize_rag(
    config: &Config,
    llm: LlmClient,
    embedding: EmbeddingClient,
) -> Result<GraphRag> {
    let dimension = embedding.probe_dimension().await?;
    println!("Detected embedding dimension: {dimension}");

    let embedding_func = EmbeddingFunc {
        dim: dimension,
        max_token_size: config.embedding_max_token_size,
        client: embedding,
    };

    let storages = Storages::connect(config).await?;
    let rag = GraphRag::builder(&config.working_dir, llm, embedding_func)
        .max_parallel_insert(config.max_parallel_insert)
        .build(storages);

    rag.initialize_storages().await?;
    rag.initialize_pipeline_status().await?;
    Ok(rag)
}

async fn run_queries(rag: &GraphRag) -> Result<()> {
    let question = "What is the Integrity at 11? now: 2025 year, 4th month, 15st day";

    run_query(
        rag,
        question,
        QueryParam {
            mode: mode_from_str("local"),
            stream: true,
            top_k: 10,
            max_context_tokens: 1000,
            ..QueryParam::default()
        },
        "local",
    )
    .await?;

    run_query(
        rag,
        question,
        QueryParam {
            mode: mode_from_str("global"),
            stream: true,
            ..QueryParam::default()
        },
        "global",
    )
    .await?;

    run_query(
        rag,
        question,
        QueryParam {
            mode: mode_from_str("hybrid"),
            stream: true,
            ..QueryParam::default()
        },
        "hybrid",
    )
    .await?;

    Ok(())
}

async fn run_query(rag: &GraphRag, question: &str, param: QueryParam, label: &str) -> Result<()> {
    println!("\n=====================");
    println!("Query mode: {label}");
    println!("=====================");

    match rag.query(question, param).await? {
        QueryResponse::Text(text) => println!("{text}"),
        QueryResponse::Stream(mut stream) => {
            while let Some(fragment) = stream.next().await {
                print!("{}", fragment?);
                std::io::stdout().flush()?;
            }
            println!();
        }
    }
    Ok(())
}
