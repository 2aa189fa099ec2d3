//! Defines the `StdioServer` builder and the `ToolHandler` trait.

use super::session::ServerSession;
use crate::{
    error::Result,
    types::{
        CallToolResult, GetPromptResult, Implementation, Prompt, Resource, ResourceContents, Tool,
    },
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{debug, info};
#[cfg(feature = "schema-validation")]
use tracing::warn;

/// Something that can execute a tool call.
///
/// Implemented for any `Fn(Value) -> impl Future<Output = Result<CallToolResult>>`,
/// so plain async closures can be registered directly.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<CallToolResult>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<CallToolResult> {
        (self)(arguments).await
    }
}

/// Produces the contents of a resource. Receives the URI being read.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: String) -> Result<Vec<ResourceContents>>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<ResourceContents>>> + Send + 'static,
{
    async fn read(&self, uri: String) -> Result<Vec<ResourceContents>> {
        (self)(uri).await
    }
}

/// Renders a prompt. Receives the `arguments` object of `prompts/get`, or
/// `Value::Null` when none were sent.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn get(&self, arguments: Value) -> Result<GetPromptResult>;
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<GetPromptResult>> + Send + 'static,
{
    async fn get(&self, arguments: Value) -> Result<GetPromptResult> {
        (self)(arguments).await
    }
}

pub(crate) struct RegisteredResource {
    pub(crate) resource: Resource,
    pub(crate) handler: Arc<dyn ResourceHandler>,
}

pub(crate) struct RegisteredPrompt {
    pub(crate) prompt: Prompt,
    pub(crate) handler: Arc<dyn PromptHandler>,
}

pub(crate) struct RegisteredTool {
    pub(crate) tool: Tool,
    pub(crate) handler: Arc<dyn ToolHandler>,
    #[cfg(feature = "schema-validation")]
    pub(crate) validator: Option<Arc<jsonschema::Validator>>,
}

/// The child side of the protocol: answers `initialize`, `ping`, `tools/*`,
/// `resources/*` and `prompts/*` on line-delimited JSON.
///
/// # Example
///
/// ```no_run
/// use mcp_stdio_bridge::{CallToolResult, Result, StdioServer, Tool};
/// use serde_json::Value;
///
/// async fn echo(args: Value) -> Result<CallToolResult> {
///     Ok(CallToolResult::text(args.to_string()))
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let server = StdioServer::new("echo-server", "0.1.0").tool(
///         Tool {
///             name: "echo".to_string(),
///             ..Default::default()
///         },
///         echo,
///     );
///
///     // Runs until stdin is closed.
///     server.serve_stdio().await
/// }
/// ```
#[derive(Clone)]
pub struct StdioServer {
    pub(crate) info: Implementation,
    pub(crate) tools: Arc<DashMap<String, RegisteredTool>>,
    /// Keyed by URI.
    pub(crate) resources: Arc<DashMap<String, RegisteredResource>>,
    pub(crate) prompts: Arc<DashMap<String, RegisteredPrompt>>,
}

impl StdioServer {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            info: Implementation {
                name: name.to_string(),
                version: version.to_string(),
            },
            tools: Arc::new(DashMap::new()),
            resources: Arc::new(DashMap::new()),
            prompts: Arc::new(DashMap::new()),
        }
    }

    /// Builder form of [`Self::register_tool`].
    pub fn tool<H>(self, tool: Tool, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        self.register_tool(tool, handler);
        self
    }

    /// Adds or replaces a tool. Safe to call while a session is running.
    pub fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        debug!(tool = %tool.name, "Registering tool");
        #[cfg(feature = "schema-validation")]
        let validator = match jsonschema::validator_for(&tool.input_schema) {
            Ok(validator) => Some(Arc::new(validator)),
            Err(e) => {
                warn!(tool = %tool.name, error = %e, "Input schema does not compile; arguments will not be validated");
                None
            }
        };
        let name = tool.name.clone();
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                handler: Arc::new(handler),
                #[cfg(feature = "schema-validation")]
                validator,
            },
        );
    }

    /// Registered tools, sorted by name.
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .iter()
            .map(|entry| entry.value().tool.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn resource<H>(self, resource: Resource, handler: H) -> Self
    where
        H: ResourceHandler + 'static,
    {
        self.register_resource(resource, handler);
        self
    }

    /// Adds or replaces the resource at `resource.uri`.
    pub fn register_resource<H>(&self, resource: Resource, handler: H)
    where
        H: ResourceHandler + 'static,
    {
        debug!(uri = %resource.uri, "Registering resource");
        self.resources.insert(
            resource.uri.clone(),
            RegisteredResource {
                resource,
                handler: Arc::new(handler),
            },
        );
    }

    pub fn prompt<H>(self, prompt: Prompt, handler: H) -> Self
    where
        H: PromptHandler + 'static,
    {
        self.register_prompt(prompt, handler);
        self
    }

    pub fn register_prompt<H>(&self, prompt: Prompt, handler: H)
    where
        H: PromptHandler + 'static,
    {
        debug!(prompt = %prompt.name, "Registering prompt");
        self.prompts.insert(
            prompt.name.clone(),
            RegisteredPrompt {
                prompt,
                handler: Arc::new(handler),
            },
        );
    }

    /// Registered resources, sorted by URI.
    pub fn resources(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .resources
            .iter()
            .map(|entry| entry.value().resource.clone())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    /// Registered prompts, sorted by name.
    pub fn prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .iter()
            .map(|entry| entry.value().prompt.clone())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    /// Handles one decoded message. Returns the reply, if the message needs one.
    pub async fn handle_message(&self, msg: Value) -> Option<Value> {
        ServerSession::new(self.clone()).handle_message(msg).await
    }

    /// Serves the process's own stdin/stdout until stdin is closed.
    pub async fn serve_stdio(&self) -> Result<()> {
        info!(server = %self.info.name, "Serving on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serves any line-oriented reader/writer pair until the reader hits EOF.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        ServerSession::new(self.clone()).run(reader, writer).await
    }
}
