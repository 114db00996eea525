//! Stdio ingress: line-delimited JSON tool protocol.
//!
//! Each stdin line is one request `{"tool": ..., "arguments": {...},
//! "correlation_id": ...}`; each stdout line is one response envelope.
//! Logs go to stderr, never stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use opsbox::{ToolDispatcher, ToolRequest, ToolResponse};

/// Runs the stdio loop until stdin closes.
pub async fn run(dispatcher: Arc<ToolDispatcher>) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    info!("stdio ingress ready");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => {
                debug!(tool = %request.tool, "stdio request");
                dispatcher.dispatch(request).await
            }
            Err(err) => {
                warn!(error = %err, "unparsable stdio request");
                malformed_request(err.to_string())
            }
        };
        write_response(&mut stdout, &response).await?;
    }
    info!("stdin closed, stdio ingress stopping");
    Ok(())
}

fn malformed_request(message: String) -> ToolResponse {
    // Route through the dispatcher so the envelope shape stays uniform.
    ToolResponse {
        success: false,
        data: None,
        error: Some(opsbox::ToolError::new(
            opsbox::ErrorCode::ValidationError,
            format!("unparsable request: {message}"),
            "",
        )),
        metadata: opsbox::ResponseMetadata {
            correlation_id: String::new(),
            execution_time_ms: 0,
            cache_hit: false,
            degraded: false,
            adapter_errors: Vec::new(),
        },
    }
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    response: &ToolResponse,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).map_err(std::io::Error::other)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}
