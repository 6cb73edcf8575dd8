//! MCP session management (spawn, handshake, request/response, close).

use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, Incoming, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    RequestId, Tool,
};

/// Default timeout for MCP operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of a single reply line (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Configuration for an MCP server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

impl ServerConfig {
    /// Config for `command` with no arguments and the default timeout.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

type BoxReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Transport {
    reader: BoxReader,
    writer: BoxWriter,
}

/// A live connection to an MCP server.
///
/// Requests are serialized over the single transport. Once closed, either by
/// [`Session::close`] or because the server went away, every operation fails
/// with [`Error::Closed`].
pub struct Session {
    name: String,
    transport: Mutex<Transport>,
    child: Mutex<Option<Child>>,
    next_id: AtomicI64,
    closed: AtomicBool,
    timeout: Duration,
    server_info: Option<InitializeResult>,
}

impl Session {
    /// Spawn a server process and complete the MCP handshake with it.
    ///
    /// The process is killed when the session is closed or dropped.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        info!(server = %config.name, command = %config.command, "spawned MCP server");

        let mut session = Self::new(config.name, stdout, stdin, config.timeout);
        *session.child.get_mut() = Some(child);
        session.initialize().await?;
        Ok(session)
    }

    /// Complete the MCP handshake over an already-open byte stream.
    pub async fn connect<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut session = Self::new(name.into(), reader, writer, timeout);
        session.initialize().await?;
        Ok(session)
    }

    fn new<R, W>(name: String, reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            name,
            transport: Mutex::new(Transport {
                reader: BufReader::new(reader),
                writer: Box::new(writer),
            }),
            child: Mutex::new(None),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            timeout,
            server_info: None,
        }
    }

    /// Get the configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the server reported about itself during the handshake.
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// List every tool the server offers, following pagination cursors.
    ///
    /// A cursor the server already handed out is rejected as
    /// [`Error::InvalidResponse`].
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = None;
        loop {
            let page: ListToolsResult = self
                .request("tools/list", Some(ListToolsParams { cursor }))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        return Err(Error::InvalidResponse(format!(
                            "tools/list repeated cursor {next:?}"
                        )));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        debug!(server = %self.name, count = tools.len(), "listed tools");
        Ok(tools)
    }

    /// Call a tool by name.
    ///
    /// A result flagged `isError` is returned as [`Error::ToolCallFailed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }

        Ok(result)
    }

    /// Close the session and terminate the server process, if any.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.transport.lock().await.writer.shutdown().await {
            debug!(server = %self.name, error = %e, "transport shutdown failed");
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(server = %self.name, error = %e, "failed to kill MCP server");
            }
        }

        info!(server = %self.name, "MCP session closed");
        Ok(())
    }

    // --- Internal methods ---

    async fn initialize(&mut self) -> Result<()> {
        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await?;

        self.notify(JsonRpcNotification::new("notifications/initialized"))
            .await?;

        info!(
            server = %self.name,
            remote = %result.server_info.name,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );
        self.server_info = Some(result);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.ensure_open()?;

        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }
        let request_json = serde_json::to_string(&request)?;

        // Held until the matching reply arrives.
        let mut transport = self.transport.lock().await;
        self.ensure_open()?;

        debug!(server = %self.name, method, ?id, "sending request");
        write_line(&mut transport.writer, &request_json).await?;

        let response = timeout(self.timeout, self.read_response(&mut transport.reader, &id))
            .await
            .map_err(|_| Error::Timeout)??;

        let result_value = response.into_result()?;
        serde_json::from_value(result_value)
            .map_err(|e| Error::InvalidResponse(format!("{method}: {e}")))
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.ensure_open()?;
        let notification_json = serde_json::to_string(&notification)?;
        let mut transport = self.transport.lock().await;
        write_line(&mut transport.writer, &notification_json).await
    }

    async fn read_response(&self, reader: &mut BoxReader, id: &RequestId) -> Result<JsonRpcResponse> {
        loop {
            let mut buf = Vec::new();
            let bytes_read = (&mut *reader)
                .take(MAX_OUTPUT_SIZE as u64 + 1)
                .read_until(b'\n', &mut buf)
                .await?;
            if bytes_read == 0 {
                self.closed.store(true, Ordering::SeqCst);
                return Err(Error::ServerExited);
            }

            if buf.len() > MAX_OUTPUT_SIZE && buf.last() != Some(&b'\n') {
                return Err(Error::OutputTooLarge {
                    size: buf.len(),
                    max: MAX_OUTPUT_SIZE,
                });
            }

            let Ok(line) = std::str::from_utf8(&buf) else {
                warn!(server = %self.name, bytes = buf.len(), "skipping non-UTF-8 line from server");
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Incoming::parse(line) {
                Ok(Incoming::Response(response)) if response.id.as_ref() == Some(id) => {
                    return Ok(response);
                }
                Ok(Incoming::Response(response)) => {
                    debug!(server = %self.name, expected = ?id, got = ?response.id, "skipping stale response");
                }
                Ok(Incoming::Other(method)) => {
                    debug!(server = %self.name, method = %method, "skipping server message");
                }
                Err(e) => {
                    warn!(server = %self.name, error = %e, "skipping unparseable line from server");
                }
            }
        }
    }
}

async fn write_line(writer: &mut BoxWriter, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
