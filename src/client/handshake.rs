//! The three-step bring-up sequence: `initialize`, `notifications/initialized`,
//! `tools/list`.

use super::client::{into_result, StdioClient, DEFAULT_RESPONSE_TIMEOUT};
use crate::{
    error::{Error, HandshakeStep, Result},
    types::{
        ClientCapabilities, Implementation, InitializeRequestParams, ListToolsParams,
        LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_LIST,
    },
};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Default pause after `notifications/initialized`. The protocol gives no
/// acknowledgement for it, so this is only a grace period.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for [`handshake`].
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub protocol_version: String,
    pub client_info: Implementation,
    /// Window for each of the two replies.
    pub response_timeout: Duration,
    pub settle_interval: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
        }
    }
}

/// The raw replies collected during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeOutcome {
    /// The full `initialize` response, as received.
    pub initialize: Value,
    /// The full `tools/list` response, as received.
    pub tools: Value,
}

impl HandshakeOutcome {
    /// The `result` of the `tools/list` reply.
    pub fn tools_result(&self) -> Option<&Value> {
        self.tools.get("result")
    }
}

/// Runs the bring-up sequence against a freshly started child.
///
/// Ids come from [`StdioClient::next_id`], so on a new client the two
/// requests carry ids 0 and 1. Any failure aborts the sequence and comes back
/// as [`Error::Handshake`] naming the step; nothing is retried.
pub async fn handshake(client: &StdioClient, config: &HandshakeConfig) -> Result<HandshakeOutcome> {
    let init_params = InitializeRequestParams {
        protocol_version: config.protocol_version.clone(),
        capabilities: ClientCapabilities::default(),
        client_info: config.client_info.clone(),
    };
    let initialize = exchange(
        client,
        HandshakeStep::Initialize,
        METHOD_INITIALIZE,
        init_params,
        config.response_timeout,
    )
    .await?;
    info!(response = %initialize, "Initialize completed");

    client
        .notify::<Value>(METHOD_INITIALIZED, None)
        .await
        .map_err(|e| at(HandshakeStep::Initialized, e))?;
    tokio::time::sleep(config.settle_interval).await;

    let tools = exchange(
        client,
        HandshakeStep::List,
        METHOD_TOOLS_LIST,
        ListToolsParams::default(),
        config.response_timeout,
    )
    .await?;
    info!(response = %tools, "Tool list received");

    Ok(HandshakeOutcome { initialize, tools })
}

/// One request/response step. A reply carrying `error`, or neither `result`
/// nor `error`, fails the step.
async fn exchange<P: Serialize>(
    client: &StdioClient,
    step: HandshakeStep,
    method: &str,
    params: P,
    timeout: Duration,
) -> Result<Value> {
    let id = client.next_id();
    debug!(%step, id, "Handshake step");
    client
        .request(id, method, params)
        .await
        .map_err(|e| at(step, e))?;
    let response = client
        .await_response(id, timeout)
        .await
        .map_err(|e| at(step, e))?;
    into_result(response.clone()).map_err(|e| at(step, e))?;
    Ok(response)
}

fn at(step: HandshakeStep, source: Error) -> Error {
    Error::Handshake {
        step,
        source: Box::new(source),
    }
}
