//! Defines the `ServerSession`, which reads requests line by line and writes
//! one reply line per request.

use super::server::{RegisteredTool, StdioServer};
use crate::{
    error::Result,
    protocol,
    types::{
        CallToolParams, CallToolResult, ErrorData, ErrorResponse, GetPromptParams,
        InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
        PromptsCapability, ReadResourceParams, ReadResourceResult, RequestId,
        ResourcesCapability, Response, ServerCapabilities, ToolsCapability, INTERNAL_ERROR,
        INVALID_PARAMS, LATEST_PROTOCOL_VERSION, METHOD_INITIALIZE, METHOD_NOT_FOUND,
        METHOD_PING, METHOD_PROMPTS_GET, METHOD_PROMPTS_LIST, METHOD_RESOURCES_LIST,
        METHOD_RESOURCES_READ, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, RESOURCE_NOT_FOUND,
    },
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tracing::{debug, trace, warn};

type Outcome = std::result::Result<Value, ErrorData>;

pub(crate) struct ServerSession {
    server: StdioServer,
}

impl ServerSession {
    pub(crate) fn new(server: StdioServer) -> Self {
        Self { server }
    }

    /// Runs until `reader` reaches end-of-stream. Lines that are not JSON,
    /// including ones that are not even UTF-8, are skipped, same as on the
    /// client side.
    pub(crate) async fn run<R, W>(self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            let Some(msg) = protocol::decode(&line) else {
                continue;
            };
            if let Some(reply) = self.handle_message(msg).await {
                let reply_line = protocol::encode(&reply)?;
                protocol::write_line(&mut writer, &reply_line).await?;
                trace!(reply = %reply_line, "Sent reply");
            }
        }
        debug!(server = %self.server.info.name, "Input closed; session finished");
        Ok(())
    }

    pub(crate) async fn handle_message(&self, msg: Value) -> Option<Value> {
        let Some(method) = msg.get("method").and_then(Value::as_str) else {
            trace!("Ignoring message without a method");
            return None;
        };
        let id = match msg.get("id") {
            Some(id) if !id.is_null() => serde_json::from_value::<RequestId>(id.clone()).ok(),
            _ => None,
        };
        let Some(id) = id else {
            debug!(method, "Received notification");
            return None;
        };
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        let outcome = match method {
            METHOD_INITIALIZE => self.initialize(&params),
            METHOD_PING => Ok(json!({})),
            METHOD_TOOLS_LIST => to_outcome(&ListToolsResult {
                tools: self.server.tools(),
                next_cursor: None,
            }),
            METHOD_TOOLS_CALL => self.call_tool(params).await,
            METHOD_RESOURCES_LIST => to_outcome(&ListResourcesResult {
                resources: self.server.resources(),
            }),
            METHOD_RESOURCES_READ => self.read_resource(params).await,
            METHOD_PROMPTS_LIST => to_outcome(&ListPromptsResult {
                prompts: self.server.prompts(),
            }),
            METHOD_PROMPTS_GET => self.get_prompt(params).await,
            other => Err(error_data(
                METHOD_NOT_FOUND,
                format!("Method '{}' not found", other),
            )),
        };

        let reply = match outcome {
            Ok(result) => serde_json::to_value(Response::new(id, result)),
            Err(error) => serde_json::to_value(ErrorResponse {
                jsonrpc: crate::types::JSONRPC_VERSION.to_string(),
                id,
                error,
            }),
        };
        reply.ok()
    }

    fn initialize(&self, params: &Value) -> Outcome {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(LATEST_PROTOCOL_VERSION);
        debug!(protocol_version, "Initialize requested");
        to_outcome(&InitializeResult {
            protocol_version: protocol_version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                resources: (!self.server.resources.is_empty()).then(|| ResourcesCapability {
                    subscribe: Some(false),
                    list_changed: Some(false),
                }),
                prompts: (!self.server.prompts.is_empty()).then(|| PromptsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.server.info.clone(),
        })
    }

    async fn call_tool(&self, params: Value) -> Outcome {
        let CallToolParams { name, mut arguments } = serde_json::from_value(params)
            .map_err(|e| error_data(INVALID_PARAMS, format!("Invalid tools/call params: {}", e)))?;
        if arguments.is_null() {
            arguments = json!({});
        }

        // Clone out of the map so no shard lock is held across the await.
        let handler = {
            let Some(entry) = self.server.tools.get(&name) else {
                return Err(error_data(INVALID_PARAMS, format!("Unknown tool: {}", name)));
            };
            validate_arguments(entry.value(), &arguments)?;
            entry.handler.clone()
        };

        match handler.call(arguments).await {
            Ok(result) => to_outcome(&result),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool failed");
                to_outcome(&CallToolResult::error(e.to_string()))
            }
        }
    }

    async fn read_resource(&self, params: Value) -> Outcome {
        let ReadResourceParams { uri } = serde_json::from_value(params).map_err(|e| {
            error_data(INVALID_PARAMS, format!("Invalid resources/read params: {}", e))
        })?;
        let handler = match self.server.resources.get(&uri) {
            Some(entry) => entry.handler.clone(),
            None => {
                return Err(error_data(
                    RESOURCE_NOT_FOUND,
                    format!("Resource not found: {}", uri),
                ))
            }
        };

        match handler.read(uri.clone()).await {
            Ok(contents) => to_outcome(&ReadResourceResult { contents }),
            Err(e) => {
                warn!(%uri, error = %e, "Resource read failed");
                Err(error_data(INTERNAL_ERROR, e.to_string()))
            }
        }
    }

    async fn get_prompt(&self, params: Value) -> Outcome {
        let GetPromptParams { name, arguments } = serde_json::from_value(params).map_err(|e| {
            error_data(INVALID_PARAMS, format!("Invalid prompts/get params: {}", e))
        })?;
        let handler = match self.server.prompts.get(&name) {
            Some(entry) => entry.handler.clone(),
            None => return Err(error_data(INVALID_PARAMS, format!("Unknown prompt: {}", name))),
        };

        match handler.get(arguments.unwrap_or(Value::Null)).await {
            Ok(result) => to_outcome(&result),
            Err(e) => {
                warn!(prompt = %name, error = %e, "Prompt failed");
                Err(error_data(INTERNAL_ERROR, e.to_string()))
            }
        }
    }
}

#[cfg(feature = "schema-validation")]
fn validate_arguments(
    registered: &RegisteredTool,
    arguments: &Value,
) -> std::result::Result<(), ErrorData> {
    let Some(validator) = &registered.validator else {
        return Ok(());
    };
    validator.validate(arguments).map_err(|validation_error| {
        error_data(
            INVALID_PARAMS,
            format!(
                "Invalid arguments for '{}': {}",
                registered.tool.name, validation_error
            ),
        )
    })
}

#[cfg(not(feature = "schema-validation"))]
fn validate_arguments(
    _registered: &RegisteredTool,
    _arguments: &Value,
) -> std::result::Result<(), ErrorData> {
    Ok(())
}

fn error_data(code: i32, message: String) -> ErrorData {
    ErrorData {
        code,
        message,
        data: None,
    }
}

fn to_outcome<T: Serialize>(value: &T) -> Outcome {
    serde_json::to_value(value).map_err(|e| error_data(INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::{
        Content, GetPromptResult, Prompt, PromptArgument, PromptMessage, Resource,
        ResourceContents, Tool,
    };
    use tokio::io::{AsyncWriteExt, BufReader};

    async fn echo(args: Value) -> Result<CallToolResult> {
        Ok(CallToolResult::text(args["text"].as_str().unwrap_or_default()))
    }

    async fn broken(_args: Value) -> Result<CallToolResult> {
        Err(Error::Other("backend unavailable".to_string()))
    }

    async fn cities(uri: String) -> Result<Vec<ResourceContents>> {
        Ok(vec![ResourceContents {
            uri,
            mime_type: Some("application/json".to_string()),
            text: json!(["Taipei", "Kaohsiung"]).to_string(),
        }])
    }

    async fn greeting(args: Value) -> Result<GetPromptResult> {
        let name = args["name"].as_str().unwrap_or("there");
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage::user(format!("Say hello to {}.", name))],
        })
    }

    fn test_server() -> StdioServer {
        StdioServer::new("test-server", "9.9.9")
            .tool(
                Tool {
                    name: "echo".to_string(),
                    description: Some("Echoes `text` back".to_string()),
                    input_schema: json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }),
                    annotations: None,
                },
                echo,
            )
            .tool(
                Tool {
                    name: "broken".to_string(),
                    ..Default::default()
                },
                broken,
            )
            .resource(
                Resource {
                    uri: "resource://cities".to_string(),
                    name: "Cities".to_string(),
                    description: None,
                    mime_type: Some("application/json".to_string()),
                },
                cities,
            )
            .prompt(
                Prompt {
                    name: "greeting".to_string(),
                    description: Some("Greets someone".to_string()),
                    arguments: Some(vec![PromptArgument {
                        name: "name".to_string(),
                        description: None,
                        required: Some(false),
                    }]),
                },
                greeting,
            )
    }

    async fn request(server: &StdioServer, id: i64, method: &str, params: Value) -> Value {
        server
            .handle_message(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn resources_are_listed_and_read() {
        let server = test_server();
        let reply = request(&server, 1, "resources/list", json!({})).await;
        assert_eq!(reply["result"]["resources"][0]["uri"], "resource://cities");
        assert_eq!(reply["result"]["resources"][0]["mimeType"], "application/json");

        let reply = request(&server, 2, "resources/read", json!({ "uri": "resource://cities" })).await;
        let contents = &reply["result"]["contents"][0];
        assert_eq!(contents["uri"], "resource://cities");
        let cities: Vec<String> = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
        assert_eq!(cities, vec!["Taipei", "Kaohsiung"]);

        let reply = request(&server, 3, "resources/read", json!({ "uri": "resource://nope" })).await;
        assert_eq!(reply["error"]["code"], RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn prompts_are_listed_and_rendered() {
        let server = test_server();
        let reply = request(&server, 1, "prompts/list", json!({})).await;
        let listed: ListPromptsResult = serde_json::from_value(reply["result"].clone()).unwrap();
        assert_eq!(listed.prompts.len(), 1);
        assert_eq!(listed.prompts[0].name, "greeting");

        let reply = request(
            &server,
            2,
            "prompts/get",
            json!({ "name": "greeting", "arguments": { "name": "Ada" } }),
        )
        .await;
        let rendered: GetPromptResult = serde_json::from_value(reply["result"].clone()).unwrap();
        assert_eq!(rendered.messages, vec![PromptMessage::user("Say hello to Ada.")]);

        // Arguments are optional.
        let reply = request(&server, 3, "prompts/get", json!({ "name": "greeting" })).await;
        assert_eq!(
            reply["result"]["messages"][0]["content"]["text"],
            "Say hello to there."
        );

        let reply = request(&server, 4, "prompts/get", json!({ "name": "farewell" })).await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn capabilities_follow_what_is_registered() {
        let reply = request(&test_server(), 0, "initialize", json!({})).await;
        let capabilities = &reply["result"]["capabilities"];
        assert_eq!(capabilities["resources"]["subscribe"], false);
        assert_eq!(capabilities["prompts"]["listChanged"], false);

        let bare = StdioServer::new("bare", "0.0.1");
        let reply = request(&bare, 0, "initialize", json!({})).await;
        let capabilities = reply["result"]["capabilities"].as_object().unwrap();
        assert!(capabilities.contains_key("tools"));
        assert!(!capabilities.contains_key("resources"));
        assert!(!capabilities.contains_key("prompts"));
    }

    #[tokio::test]
    async fn initialize_echoes_requested_version() {
        let server = test_server();
        let reply = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-03", "capabilities": {} }
            }))
            .await
            .unwrap();
        assert_eq!(reply["id"], 0);
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-03");
        assert_eq!(reply["result"]["serverInfo"]["name"], "test-server");
        assert_eq!(reply["result"]["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn notifications_and_replies_get_no_answer() {
        let server = test_server();
        let notification = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert_eq!(server.handle_message(notification).await, None);

        let stray_reply = json!({ "jsonrpc": "2.0", "id": 3, "result": {} });
        assert_eq!(server.handle_message(stray_reply).await, None);
    }

    #[tokio::test]
    async fn tools_list_is_sorted() {
        let server = test_server();
        let reply = server
            .handle_message(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
            .await
            .unwrap();
        let result: ListToolsResult = serde_json::from_value(reply["result"].clone()).unwrap();
        let names: Vec<_> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["broken", "echo"]);
    }

    #[tokio::test]
    async fn tools_call_runs_handler() {
        let server = test_server();
        let reply = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "echo", "arguments": { "text": "hi" } }
            }))
            .await
            .unwrap();
        let result: CallToolResult = serde_json::from_value(reply["result"].clone()).unwrap();
        assert!(!result.is_error);
        assert_eq!(
            result.content,
            vec![Content::Text {
                text: "hi".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn failing_tool_reports_in_band() {
        let server = test_server();
        let reply = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "broken" }
            }))
            .await
            .unwrap();
        assert_eq!(reply["result"]["isError"], true);
        assert!(reply["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("backend unavailable"));
    }

    #[tokio::test]
    async fn unknown_method_and_tool_are_errors() {
        let server = test_server();
        let reply = server
            .handle_message(json!({ "jsonrpc": "2.0", "id": 4, "method": "sampling/createMessage" }))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        let reply = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/call",
                "params": { "name": "nope", "arguments": {} }
            }))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
        assert_eq!(reply["id"], 5);
    }

    #[cfg(feature = "schema-validation")]
    #[tokio::test]
    async fn arguments_are_validated_against_schema() {
        let server = test_server();
        let reply = server
            .handle_message(json!({
                "jsonrpc": "2.0",
                "id": 6,
                "method": "tools/call",
                "params": { "name": "echo", "arguments": { "text": 42 } }
            }))
            .await
            .unwrap();
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn serve_survives_a_line_that_is_not_utf8() {
        let server = test_server();
        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_side);
        let serving = tokio::spawn(async move {
            server
                .serve(BufReader::new(server_read), server_write)
                .await
        });

        client_side
            .write_all(b"\xff\xfe\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        client_side.shutdown().await.unwrap();

        let mut replies = Vec::new();
        let mut lines = BufReader::new(&mut client_side).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        serving.await.unwrap().unwrap();

        assert_eq!(replies, vec![json!({ "jsonrpc": "2.0", "id": 1, "result": {} })]);
    }

    #[tokio::test]
    async fn serve_answers_each_request_line_and_skips_noise() {
        let server = test_server();
        let (mut client_side, server_side) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_side);
        let serving = tokio::spawn(async move {
            server
                .serve(BufReader::new(server_read), server_write)
                .await
        });

        client_side
            .write_all(
                b"hello there\n\
                {\"jsonrpc\":\"2.0\",\"id\":0,\"method\":\"initialize\",\"params\":{}}\n\
                {\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
                {\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            )
            .await
            .unwrap();
        client_side.shutdown().await.unwrap();

        let mut replies = Vec::new();
        let mut lines = BufReader::new(&mut client_side).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        serving.await.unwrap().unwrap();

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 0);
        assert_eq!(replies[1], json!({ "jsonrpc": "2.0", "id": 1, "result": {} }));
    }
}
