use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use morsel::{
    api::routes,
    chat::ChatSession,
    config::Config,
    pipeline::RagPipeline,
    services::{completion_client::CompletionClient, vector_client::VectorIndexClient},
    storage::JsonConversationStore,
};

#[derive(Parser)]
#[command(name = "morsel", about = "Retrieval-augmented chat for a food knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// Ask one question from the terminal
    Ask {
        question: String,
        /// Model id; unrecognized values fall back to the fast model
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "morsel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load config
    let config = Arc::new(RwLock::new(Config::load()?));

    // Build collaborator clients
    let (vector_url, vector_key, completion_url, completion_key) = {
        let cfg = config.read().await;
        (
            cfg.vector_url.clone(),
            cfg.vector_api_key.clone(),
            cfg.completion_url.clone(),
            cfg.completion_api_key.clone(),
        )
    };

    let search = Arc::new(VectorIndexClient::new(vector_url.clone(), vector_key));
    let completion = Arc::new(CompletionClient::new(completion_url.clone(), completion_key));

    // Verify completion provider health on startup
    match completion.health_check().await {
        Ok(true) => tracing::info!("✅ Completion provider reachable"),
        Ok(false) => tracing::warn!("⚠️ Completion provider health check returned false"),
        Err(e) => tracing::warn!(
            "⚠️ Completion provider not available: {}. Queries will fail until it is.",
            e
        ),
    }

    let pipeline = Arc::new(RagPipeline::new(search, completion));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pipeline, vector_url, completion_url).await,
        Command::Ask { question, model } => ask(config, pipeline, &question, model).await,
    }
}

async fn serve(
    config: Arc<RwLock<Config>>,
    pipeline: Arc<RagPipeline>,
    vector_url: String,
    completion_url: String,
) -> anyhow::Result<()> {
    let state = routes::AppState {
        config: config.clone(),
        pipeline,
    };

    let app = routes::create_router(state);

    let port = config.read().await.server_port;
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Server listening on {}", addr);
    tracing::info!("📊 Vector index: {}", vector_url);
    tracing::info!("🤖 Completion provider: {}", completion_url);
    tracing::info!("💬 Chat: POST /api/v1/chat (blocking), /api/v1/chat/stream (streaming)");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn ask(
    config: Arc<RwLock<Config>>,
    pipeline: Arc<RagPipeline>,
    question: &str,
    model: Option<String>,
) -> anyhow::Result<()> {
    let data_dir = config.read().await.data_dir();
    let store = JsonConversationStore::in_dir(&data_dir);
    let mut session = ChatSession::open(store);

    let message_id = session.begin_exchange(question)?;

    match pipeline.answer(question, model.as_deref()).await {
        Ok(response) => {
            session.complete_exchange(
                message_id,
                response.answer.clone(),
                response.sources.clone(),
                Some(response.metrics.clone()),
            )?;

            println!("{}\n", response.answer);
            if !response.sources.is_empty() {
                println!("Sources:");
                for (i, source) in response.sources.iter().enumerate() {
                    println!(
                        "  [{}] {}% match ({}) {}",
                        i + 1,
                        source.relevance_percent(),
                        source.metadata.origin,
                        source.metadata.text
                    );
                }
            }
            let m = &response.metrics;
            let tokens = m
                .tokens_used
                .map(|t| format!(", {} tokens", t))
                .unwrap_or_default();
            println!(
                "\nsearch {} ms, llm {} ms, total {} ms{}",
                m.vector_search_time, m.llm_processing_time, m.total_response_time, tokens
            );
            Ok(())
        }
        Err(e) => {
            session.fail_exchange(message_id, e.to_string())?;
            Err(e.into())
        }
    }
}
