use chrono::Utc;
use clap::{Parser, Subcommand};
use docindex_core::{
    document_index_schema, ensure_index, upload_candidates, FileRecord, FileStatus, FsBlobStore,
    IndexingContext, IndexingCoordinator, IndexingOptions, JsonFileRecordStore,
    LocalWorkflowEngine, OpenSearchIndex, ServiceConfig, WorkflowStatusReport,
    DEFAULT_EXTENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docindex", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenSearch base URL
    #[arg(long, env = "OPENSEARCH_URL", default_value = "http://localhost:9200")]
    opensearch_url: String,

    /// Search index name
    #[arg(long, env = "DOCINDEX_INDEX", default_value = "documents")]
    index: String,

    /// Directory holding uploaded blobs and the file record store
    #[arg(long, env = "DOCINDEX_DATA_DIR", default_value = ".docindex")]
    data_dir: PathBuf,

    /// Maximum chunk length in characters
    #[arg(long, env = "DOCINDEX_CHUNK_MAX_CHARS", default_value = "1000")]
    chunk_max_chars: usize,

    /// Characters carried over between adjacent chunks
    #[arg(long, env = "DOCINDEX_CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Embedding vector dimension
    #[arg(long, env = "DOCINDEX_EMBEDDING_DIMENSIONS", default_value = "1536")]
    embedding_dimensions: usize,

    /// How many times an activity may run before the workflow fails
    #[arg(long, env = "DOCINDEX_ACTIVITY_ATTEMPTS", default_value = "3")]
    activity_attempts: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file, or every supported file below a folder, and index it.
    Upload {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        path: PathBuf,
    },
    /// List an owner's files with reconciled status.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Show one file's reconciled status.
    Status {
        #[arg(long)]
        file_id: String,
    },
    /// Show the workflow run behind a file.
    Workflow {
        #[arg(long)]
        file_id: String,
    },
    /// Start a new indexing run for a file and wait for it.
    Reindex {
        #[arg(long)]
        file_id: String,
    },
    /// Delete a file, its blob and its indexed chunks.
    Delete {
        #[arg(long)]
        file_id: String,
    },
    /// Vector search over an owner's chunks.
    Search {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Show a chunk and the blob it came from.
    Chunk {
        #[arg(long)]
        id: String,
    },
    /// Create the search index if it does not exist.
    EnsureIndex,
}

fn print_record(record: &FileRecord) {
    println!(
        "{} status={} filename={} owner={} uploaded_at={}",
        record.file_id,
        record.status,
        record.filename,
        record.owner_id,
        record.uploaded_at.to_rfc3339()
    );
    if let Some(indexed_at) = record.indexed_at {
        println!("  indexed_at={}", indexed_at.to_rfc3339());
    }
    if let Some(error) = &record.error_message {
        println!("  error={error}");
    }
    if let Some(run_id) = &record.run_id {
        println!("  run_id={run_id}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let options = IndexingOptions {
        chunk_max_chars: cli.chunk_max_chars,
        chunk_overlap_chars: cli.chunk_overlap,
        index_name: cli.index.clone(),
        embedding_dimensions: cli.embedding_dimensions,
        ..IndexingOptions::default()
    };
    options.validate()?;
    let services = ServiceConfig::from_env()?;

    let records = JsonFileRecordStore::open(cli.data_dir.join("records.json")).await?;
    let context = Arc::new(IndexingContext {
        blobs: Arc::new(FsBlobStore::new(cli.data_dir.join("blobs"))),
        analyzer: services.document_analyzer(),
        embedder: services.embedding_service(options.embedding_dimensions),
        search: Arc::new(OpenSearchIndex::new(&cli.opensearch_url, &options.index_name)),
        records: Arc::new(records),
        options: options.clone(),
    });
    let engine = Arc::new(LocalWorkflowEngine::with_retries(
        cli.activity_attempts,
        Duration::from_millis(500),
    ));
    let coordinator = IndexingCoordinator::new(Arc::clone(&context), engine.clone());

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.data_dir.display(),
        "docindex boot"
    );

    match cli.command {
        Command::Upload { owner, path } => {
            let files = upload_candidates(&path, &DEFAULT_EXTENSIONS)?;
            let mut indexed = 0usize;

            for file in files {
                let filename = file
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                let bytes = tokio::fs::read(&file).await?;

                let record = match coordinator.upload(&owner, &filename, bytes).await {
                    Ok(record) => record,
                    Err(error) => {
                        warn!(path = %file.display(), error = %error, "skipped file");
                        continue;
                    }
                };

                if let Some(run_id) = &record.run_id {
                    engine.wait_for_run(run_id).await?;
                }
                let record = coordinator.get_file(&record.file_id).await?;
                if record.status == FileStatus::Completed {
                    indexed += 1;
                }
                print_record(&record);
            }

            println!("{indexed} file(s) indexed at {}", Utc::now().to_rfc3339());
        }
        Command::List { owner } => {
            let records = coordinator.list_files(&owner).await?;
            if records.is_empty() {
                println!("no files for {owner}");
            }
            for record in &records {
                print_record(record);
            }
        }
        Command::Status { file_id } => {
            print_record(&coordinator.get_file(&file_id).await?);
        }
        Command::Workflow { file_id } => match coordinator.workflow_status(&file_id).await? {
            WorkflowStatusReport::NoWorkflow => println!("{file_id} has no workflow run"),
            WorkflowStatusReport::Run(run) => {
                println!(
                    "run_id={} workflow={} state={:?} started_at={}",
                    run.run_id,
                    run.workflow,
                    run.state,
                    run.started_at.to_rfc3339()
                );
                if let Some(finished_at) = run.finished_at {
                    println!("  finished_at={}", finished_at.to_rfc3339());
                }
                if let Some(error) = run.error {
                    println!("  error={error}");
                }
                for activity in run.completed_activities {
                    println!("  completed {activity}");
                }
            }
            WorkflowStatusReport::Unavailable { run_id, error } => {
                println!("run_id={run_id} status unavailable: {error}");
            }
        },
        Command::Reindex { file_id } => {
            let receipt = coordinator.reindex(&file_id).await?;
            println!(
                "{} run_id={} status={}",
                receipt.file_id, receipt.run_id, receipt.status
            );
            engine.wait_for_run(&receipt.run_id).await?;
            print_record(&coordinator.get_file(&file_id).await?);
        }
        Command::Delete { file_id } => {
            if coordinator.delete(&file_id).await? {
                println!("deleted {file_id}");
            } else {
                println!("{file_id} not found");
            }
        }
        Command::Search {
            owner,
            query,
            top_k,
        } => {
            let hits = coordinator.search(&owner, &query, top_k).await?;
            println!("query: {query}");
            for hit in hits {
                println!(
                    "[{}] file={} chunk={} file_id={}",
                    hit.id, hit.filename, hit.chunk_index, hit.file_id
                );
                println!("  {}", hit.content);
            }
        }
        Command::Chunk { id } => {
            let detail = coordinator.chunk_detail(&id).await?;
            println!(
                "[{}] file={} chunk={} blob={}",
                detail.document.id,
                detail.document.filename,
                detail.document.chunk_index,
                detail.blob_reference
            );
            println!("{}", detail.document.content);
        }
        Command::EnsureIndex => {
            let schema = document_index_schema(&options);
            if ensure_index(context.search.as_ref(), &schema).await {
                println!("index {} is ready", schema.name);
            } else {
                anyhow::bail!("failed to create search index {}", schema.name);
            }
        }
    }

    Ok(())
}
