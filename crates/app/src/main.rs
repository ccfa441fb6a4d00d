mod server;
mod telemetry;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use cymbal_rag_core::{
    Embedder, GoogleApiClient, HttpConfig, IndexConfig, IngestionOptions, QaCoordinator,
    QdrantStore, QuestionAnswering, RetrievalOptions, RetryPolicy, SamplingParameters,
    ServiceConfig, VectorIndex, VectorSearchConfig, VectorSearchStore, VertexConfig,
    VertexEmbedder, VertexTextModel, WebPageLoader, WebsiteIndexer, CYMBAL_BANK_PAGES,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cymbal-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Google Cloud project hosting the models and the index
    #[arg(long, env = "PROJECT_ID")]
    project_id: String,

    /// Vertex AI region
    #[arg(long, env = "REGION", default_value = "us-central1")]
    region: String,

    /// Vector index backend
    #[arg(long, env = "INDEX_BACKEND", value_enum, default_value_t = IndexBackend::Vertex)]
    index_backend: IndexBackend,

    /// Vector Search index id
    #[arg(long, env = "ME_INDEX_ID")]
    index_id: Option<String>,

    /// Vector Search index endpoint id
    #[arg(long, env = "ME_INDEX_ENDPOINT_ID")]
    index_endpoint_id: Option<String>,

    /// Bucket holding the indexed chunk texts, defaults to `{project}-me-bucket-3`
    #[arg(long, env = "ME_EMBEDDING_BUCKET")]
    embedding_bucket: Option<String>,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "cymbal_pages")]
    qdrant_collection: String,

    /// Bearer token for Google APIs; the metadata server is used when absent
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long, env = "TEXT_MODEL", default_value = "text-bison@002")]
    text_model: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "textembedding-gecko@003")]
    embedding_model: String,

    /// Per-request timeout for upstream calls, in seconds
    #[arg(long, default_value = "60")]
    http_timeout_secs: u64,

    /// Retries after a transient upstream failure
    #[arg(long, default_value = "2")]
    max_retries: u32,

    /// Number of chunks retrieved per question
    #[arg(long, default_value = "5")]
    top_k: usize,

    /// Minimum similarity for a retrieved chunk
    #[arg(long, default_value = "0.6")]
    distance_threshold: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum IndexBackend {
    Vertex,
    Qdrant,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the question-answering and tenure webhooks.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
        bind_addr: IpAddr,
        #[arg(long, env = "PORT", default_value = "8080")]
        port: u16,
    },
    /// Load the website pages, chunk them and upsert them into the index.
    Ingest {
        /// Page to load; repeat to override the built-in Cymbal Bank pages.
        #[arg(long = "url")]
        urls: Vec<String>,
        /// Page fetches started per second.
        #[arg(long, default_value = "1.0")]
        requests_per_second: f64,
    },
    /// Answer one question and print the answer with its references.
    Ask {
        #[arg(long)]
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;
    let cli = Cli::parse();
    let config = service_config(&cli)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project = %config.vertex.project_id,
        region = %config.vertex.region,
        started_at = %Utc::now().to_rfc3339(),
        "cymbal-rag boot"
    );

    let client = GoogleApiClient::new(
        config.http.token_source(),
        config.http.timeout,
        config.http.retry,
    )?;
    let embedder = Arc::new(VertexEmbedder::new(
        client.clone(),
        config.vertex.clone(),
        config.ingestion.embedding_batch_size,
    ));

    match cli.command {
        Command::Serve { bind_addr, port } => {
            let coordinator = coordinator(&config, &client, embedder)?;
            let app = server::router(Arc::new(coordinator));
            server::serve(SocketAddr::new(bind_addr, port), app).await?;
        }
        Command::Ingest {
            urls,
            requests_per_second,
        } => {
            let urls = if urls.is_empty() {
                CYMBAL_BANK_PAGES.iter().map(|page| page.to_string()).collect()
            } else {
                urls
            };
            let options = IngestionOptions {
                requests_per_second,
                ..config.ingestion.clone()
            };

            let index = vector_index(&config, &client, embedder.dimensions())?;
            if let IndexConfig::Qdrant { url, collection } = &config.index {
                QdrantStore::new(
                    url,
                    collection,
                    embedder.dimensions(),
                    config.http.timeout,
                    config.http.retry,
                )?
                .ensure_collection()
                .await?;
            }

            let loader = WebPageLoader::new(options.requests_per_second)?
                .with_retry(config.http.retry);
            let indexer = WebsiteIndexer::new(loader, embedder, index, &options)?;
            let report = indexer.index_pages(&urls).await?;

            for skipped in &report.skipped_pages {
                warn!(url = %skipped.url, reason = %skipped.reason, "page not indexed");
            }
            println!(
                "{} chunks from {} pages indexed at {} ({} skipped)",
                report.chunks,
                report.documents,
                Utc::now().to_rfc3339(),
                report.skipped_pages.len()
            );
        }
        Command::Ask { query } => {
            let coordinator = coordinator(&config, &client, embedder)?;
            let formatted = coordinator.answer(&query).await?;

            println!("query: {query}");
            println!("{}", formatted.answer);
            for (position, reference) in formatted.references.iter().enumerate() {
                println!(
                    "[{position}] score={} source={}",
                    reference
                        .matching_score
                        .map(|score| format!("{score:.4}"))
                        .unwrap_or_else(|| "-".to_string()),
                    reference.document_source.as_deref().unwrap_or("-"),
                );
                println!("{}", reference.page_content);
            }
        }
    }

    Ok(())
}

fn service_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut vertex = VertexConfig::new(&cli.project_id, &cli.region);
    vertex.text_model = cli.text_model.clone();
    vertex.embedding_model = cli.embedding_model.clone();

    let index = match cli.index_backend {
        IndexBackend::Vertex => {
            let (Some(index_id), Some(index_endpoint_id)) =
                (cli.index_id.as_ref(), cli.index_endpoint_id.as_ref())
            else {
                anyhow::bail!(
                    "the vertex backend needs ME_INDEX_ID and ME_INDEX_ENDPOINT_ID"
                );
            };
            let bucket = cli
                .embedding_bucket
                .clone()
                .unwrap_or_else(|| format!("{}-me-bucket-3", cli.project_id));
            IndexConfig::VectorSearch(VectorSearchConfig::new(index_id, index_endpoint_id, bucket))
        }
        IndexBackend::Qdrant => IndexConfig::Qdrant {
            url: cli.qdrant_url.clone(),
            collection: cli.qdrant_collection.clone(),
        },
    };

    Ok(ServiceConfig {
        vertex,
        index,
        http: HttpConfig {
            access_token: cli.access_token.clone(),
            timeout: Duration::from_secs(cli.http_timeout_secs),
            retry: RetryPolicy {
                max_retries: cli.max_retries,
                ..RetryPolicy::default()
            },
        },
        ingestion: IngestionOptions::default(),
        retrieval: RetrievalOptions {
            top_k: cli.top_k,
            distance_threshold: cli.distance_threshold,
        },
        sampling: SamplingParameters::default(),
    })
}

fn vector_index(
    config: &ServiceConfig,
    client: &GoogleApiClient,
    dimensions: usize,
) -> anyhow::Result<Arc<dyn VectorIndex + Send + Sync>> {
    Ok(match &config.index {
        IndexConfig::VectorSearch(search) => Arc::new(VectorSearchStore::new(
            client.clone(),
            config.vertex.clone(),
            search.clone(),
        )),
        IndexConfig::Qdrant { url, collection } => Arc::new(QdrantStore::new(
            url,
            collection,
            dimensions,
            config.http.timeout,
            config.http.retry,
        )?),
    })
}

type Coordinator = QaCoordinator<
    Arc<VertexEmbedder>,
    Arc<dyn VectorIndex + Send + Sync>,
    Arc<VertexTextModel>,
>;

fn coordinator(
    config: &ServiceConfig,
    client: &GoogleApiClient,
    embedder: Arc<VertexEmbedder>,
) -> anyhow::Result<Coordinator> {
    let index = vector_index(config, client, embedder.dimensions())?;
    let generator = Arc::new(VertexTextModel::new(client.clone(), config.vertex.clone()));

    Ok(QaCoordinator::new(
        embedder,
        index,
        generator,
        config.retrieval,
        config.sampling,
    ))
}
