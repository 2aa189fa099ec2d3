//! A stdio MCP server exposing the `get_current_weather` tool, the
//! `resource://supported-locations` resource and the `weather_assistant_role`
//! prompt.
//!
//! Needs `OPENWEATHER_API_KEY`. Point a client at it with e.g.
//! `cargo run -p stdio-probe -- cargo run -q -p weather-server`.

use anyhow::Result;
use clap::Parser;
use mcp_stdio_bridge::weather::{WeatherConfig, WeatherService};
use mcp_stdio_bridge::{
    CallToolResult, GetPromptResult, Prompt, PromptMessage, Resource, ResourceContents,
    StdioServer, Tool, ToolAnnotations,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Override the provider base URL.
    #[arg(long)]
    base_url: Option<String>,
}

fn weather_tool() -> Tool {
    Tool {
        name: "get_current_weather".to_string(),
        description: Some(
            "Current conditions plus today's and tomorrow's 3-hourly forecast for a location"
                .to_string(),
        ),
        input_schema: json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City name, e.g. 'Taipei' or 'London,UK'"
                },
                "timezone_offset": {
                    "type": "integer",
                    "description": "Hours east of UTC used to split today from tomorrow",
                    "default": 0
                }
            },
            "required": ["location"]
        }),
        annotations: Some(ToolAnnotations {
            title: Some("Current weather".to_string()),
            read_only_hint: Some(true),
            open_world_hint: Some(true),
        }),
    }
}

const SUPPORTED_LOCATIONS_URI: &str = "resource://supported-locations";
const SUPPORTED_LOCATIONS: [&str; 3] = ["Taipei", "Taichung", "Kaohsiung"];

const ASSISTANT_ROLE: &str = "You are a friendly, professional weather assistant. \
Your main job is to give accurate, up-to-date forecasts and practical advice \
based on the conditions. When asked about the weather, use the available tools \
first. Keep answers short, clear and warm.";

fn supported_locations() -> Resource {
    Resource {
        uri: SUPPORTED_LOCATIONS_URI.to_string(),
        name: "SupportedLocations".to_string(),
        description: Some("Cities the weather tool can be asked about".to_string()),
        mime_type: Some("application/json".to_string()),
    }
}

async fn read_supported_locations(uri: String) -> mcp_stdio_bridge::Result<Vec<ResourceContents>> {
    Ok(vec![ResourceContents {
        uri,
        mime_type: Some("application/json".to_string()),
        text: serde_json::to_string(&SUPPORTED_LOCATIONS)?,
    }])
}

fn assistant_role() -> Prompt {
    Prompt {
        name: "weather_assistant_role".to_string(),
        description: Some("System-style role for a weather assistant".to_string()),
        arguments: None,
    }
}

async fn render_assistant_role(_args: Value) -> mcp_stdio_bridge::Result<GetPromptResult> {
    Ok(GetPromptResult {
        description: Some("Weather assistant role".to_string()),
        messages: vec![PromptMessage::user(ASSISTANT_ROLE)],
    })
}

async fn get_current_weather(
    service: Arc<WeatherService>,
    args: Value,
) -> mcp_stdio_bridge::Result<CallToolResult> {
    let Some(location) = args.get("location").and_then(Value::as_str) else {
        return Ok(CallToolResult::error("'location' is required"));
    };
    let offset = args
        .get("timezone_offset")
        .and_then(Value::as_i64)
        .and_then(|o| i32::try_from(o).ok())
        .unwrap_or(0);

    match service.get_forecast(location, offset).await {
        Ok(forecast) => Ok(CallToolResult::text(serde_json::to_string_pretty(&forecast)?)),
        Err(e) => {
            warn!(location, error = %e, "Weather lookup failed");
            Ok(CallToolResult::error(e.to_string()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries protocol lines only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = WeatherConfig::from_env();
    if let Some(base_url) = args.base_url {
        config = config.base_url(base_url);
    }
    let service = Arc::new(WeatherService::new(config)?);

    let server = StdioServer::new("weather-server", env!("CARGO_PKG_VERSION"))
        .resource(supported_locations(), read_supported_locations)
        .prompt(assistant_role(), render_assistant_role);
    server.register_tool(weather_tool(), move |args: Value| {
        get_current_weather(Arc::clone(&service), args)
    });

    info!("Weather server ready");
    server.serve_stdio().await?;
    Ok(())
}
