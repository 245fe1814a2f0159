//! Tool server — routes JSON-RPC requests to registered tools.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};
use toolport_protocol::{HandlerResult, Methods, RpcError, RpcMessage, RpcRequest, RpcResponse};
use toolport_transport::{MessageHandler, Outbound};
use tracing::{debug, info, warn};

use crate::coordinator::{WorkspaceGate, format_workspace_error};
use crate::tools::{Tool, ToolDyn, ToolError, ToolOutput};

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Collects tools and settings before the server starts handling traffic.
pub struct ToolServerBuilder {
    name: String,
    version: String,
    tools: Vec<Box<dyn ToolDyn>>,
    names: HashSet<String>,
    gate: Option<Arc<dyn WorkspaceGate>>,
}

impl ToolServerBuilder {
    /// Register a tool. Names must be unique.
    pub fn register_tool<T: Tool>(&mut self, tool: T) -> Result<(), ToolError> {
        if !self.names.insert(tool.name().to_string()) {
            return Err(ToolError::Duplicate(tool.name().to_string()));
        }
        info!("Registering tool: {}", tool.name());
        self.tools.push(Box::new(tool));
        Ok(())
    }

    /// Check the `workspace` argument of every tool call against `gate`.
    pub fn workspace_gate(mut self, gate: Arc<dyn WorkspaceGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn build(self, outbound: Outbound) -> ToolServer {
        ToolServer {
            inner: Arc::new(Dispatcher {
                name: self.name,
                version: self.version,
                tools: self.tools,
                gate: self.gate,
            }),
            outbound,
        }
    }
}

struct Dispatcher {
    name: String,
    version: String,
    tools: Vec<Box<dyn ToolDyn>>,
    gate: Option<Arc<dyn WorkspaceGate>>,
}

/// Handles `initialize`, `ping`, `tools/list` and `tools/call`.
///
/// Each inbound request is processed on its own task and answered through
/// the transport's [`Outbound`] handle.
pub struct ToolServer {
    inner: Arc<Dispatcher>,
    outbound: Outbound,
}

impl ToolServer {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ToolServerBuilder {
        ToolServerBuilder {
            name: name.into(),
            version: version.into(),
            tools: Vec::new(),
            names: HashSet::new(),
            gate: None,
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.inner.tools.iter().map(|t| t.name_dyn()).collect()
    }

    /// Process one message. Returns the reply for requests, `None` for
    /// anything that needs no answer.
    pub async fn handle(&self, message: RpcMessage) -> Option<RpcResponse> {
        self.inner.handle(message).await
    }
}

impl MessageHandler for ToolServer {
    fn on_message(&self, message: RpcMessage) {
        let inner = self.inner.clone();
        let outbound = self.outbound.clone();
        tokio::spawn(async move {
            if let Some(response) = inner.handle(message).await {
                outbound.send(response.into());
            }
        });
    }
}

impl Dispatcher {
    async fn handle(&self, message: RpcMessage) -> Option<RpcResponse> {
        match message {
            RpcMessage::Request(request) => {
                let id = request.id.clone();
                let response = match self.route_request(request).await {
                    Ok(result) => RpcResponse::success(id, result),
                    Err(error) => RpcResponse::error(Some(id), error),
                };
                Some(response)
            }
            RpcMessage::Notification(notification) => {
                debug!("Notification: {}", notification.method);
                None
            }
            RpcMessage::Response(response) => {
                warn!("Unexpected response from caller: {:?}", response.id());
                None
            }
        }
    }

    async fn route_request(&self, request: RpcRequest) -> HandlerResult {
        debug!("Request {}: {}", request.id, request.method);
        match request.method.as_str() {
            Methods::INITIALIZE => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": self.name, "version": self.version },
            })),
            Methods::PING => Ok(json!({})),
            Methods::TOOLS_LIST => Ok(self.list_tools()),
            Methods::TOOLS_CALL => self.call_tool(request.params).await,
            other => Err(RpcError::method_not_found(other)),
        }
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name_dyn(),
                    "description": t.description_dyn(),
                    "inputSchema": t.input_schema_dyn(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Option<Value>) -> HandlerResult {
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("Missing tool name"))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let tool = self
            .tools
            .iter()
            .find(|t| t.name_dyn() == name)
            .ok_or_else(|| RpcError::invalid_params(format!("Tool {name} not found")))?;

        if let (Some(gate), Some(requested)) = (
            &self.gate,
            arguments.get("workspace").and_then(Value::as_str),
        ) {
            let outcome = gate.require(requested).await;
            if !outcome.success {
                return Ok(ToolOutput::error(format_workspace_error(&outcome)).into_result());
            }
        }

        let output = match tool.call_dyn(arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool {name} failed: {e}");
                ToolOutput::error(e.to_string())
            }
        };
        Ok(output.into_result())
    }
}
