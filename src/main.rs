//! Voice Agent Session Orchestrator process.
//!
//! Startup: load config -> init logging -> init STT/TTS/LLM/tool registries
//! -> connect to the call room named on the command line and run until the
//! room disconnects.
//!
//! Usage: aerovox-server <room-name>

use std::env;
use std::sync::Arc;

use aerovox::config::ConfigHandle;
use aerovox::llm::anthropic::AnthropicProvider;
use aerovox::llm::LlmRegistry;
use aerovox::pipeline::PipelineDeps;
use aerovox::session::SessionStore;
use aerovox::tools::flight_search::{Cabin, FlightSearchClient, FlightSearchRequest};
use aerovox::tools::{RegisteredTool, ToolDispatcher, ToolProgress};
use aerovox::voice::{room::RoomSession, stt, tts};
use serde_json::{json, Value};
use tracing::{error, info};

fn register_flight_search_tool(dispatcher: &mut ToolDispatcher, client: Arc<FlightSearchClient>) {
    let dispatch = {
        let client = Arc::clone(&client);
        move |args: Value, progress: tokio::sync::mpsc::Sender<ToolProgress>| {
            let client = Arc::clone(&client);
            Box::pin(async move {
                let request: FlightSearchRequest = serde_json::from_value(args)
                    .map_err(|e| aerovox::tools::ToolError::ProviderFailed { tool: "search_flights".to_string(), message: e.to_string() })?;
                client.search(request, uuid::Uuid::new_v4(), progress).await
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, aerovox::tools::ToolError>> + Send>>
        }
    };

    dispatcher.register(RegisteredTool {
        spec: aerovox::llm::ToolSpec {
            name: "search_flights".to_string(),
            description: "Search for flights between two airports on a given date".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "origin": {"type": "string", "description": "IATA origin airport code"},
                    "destination": {"type": "string", "description": "IATA destination airport code"},
                    "date": {"type": "string", "description": "Departure date, YYYY-MM-DD"},
                    "return_date": {"type": "string", "description": "Return date, YYYY-MM-DD"},
                    "adults": {"type": "integer", "description": "Number of adult passengers"},
                    "cabin": {"type": "string", "enum": ["economy", "premium", "business", "first"]}
                },
                "required": ["origin", "destination", "date", "adults"]
            }),
        },
        dispatch: Arc::new(dispatch),
    });
    let _ = Cabin::Economy;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    aerovox::logging::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <room-name>", args[0]);
        std::process::exit(1);
    }
    let room_name = args[1].clone();

    let config = ConfigHandle::from_env();
    info!(room = %room_name, "aerovox starting");

    stt::init_registry();
    if let Err(e) = stt::initialize().await {
        tracing::warn!(error = %e, "no STT adapter could be initialized; STT will error until one is available");
    }

    tts::init_registry();
    if let Err(e) = tts::initialize().await {
        tracing::warn!(error = %e, "no TTS adapter could be initialized; TTS will error until one is available");
    }

    let mut llm_registry = LlmRegistry::new();
    llm_registry.register(Box::new(AnthropicProvider::new()));
    let llm_registry = Arc::new(llm_registry);

    let snapshot = config.snapshot();
    let flight_client = Arc::new(FlightSearchClient::new(
        snapshot.flight_api_url.clone(),
        None,
        snapshot.tool_primary_timeout,
        snapshot.tool_fallback_timeout,
        snapshot.enable_mock_fallback,
    ));
    let mut tool_dispatcher = ToolDispatcher::new();
    register_flight_search_tool(&mut tool_dispatcher, flight_client);
    let tool_dispatcher = Arc::new(tool_dispatcher);

    let session_store = SessionStore::new(config.clone());
    session_store.spawn_ttl_sweep();

    let deps = Arc::new(PipelineDeps {
        session_store,
        llm_registry,
        tool_dispatcher,
        config: config.clone(),
    });

    let room = match RoomSession::connect(&room_name, deps).await {
        Ok(room) => room,
        Err(e) => {
            error!(error = %e, "failed to connect to room");
            return Err(e.into());
        }
    };

    info!(room = %room_name, "aerovox ready");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, closing room");
    room.close().await;

    Ok(())
}
