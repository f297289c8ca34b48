//! Stdin/stdout JSON bridge for aggregated search.
//!
//! Reads newline-delimited JSON [`SearchRequest`] messages, runs each through
//! the [`SearchService`] and writes one [`SearchResponse`] or
//! [`ErrorResponse`] per line.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.
//!
//! [`SearchResponse`]: research_search::SearchResponse

use research_search::{ErrorResponse, SearchError, SearchRequest, SearchService};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{AppError, Result};

/// Serve requests from `reader` until EOF, writing replies to `writer`.
///
/// A line that is not a valid request yields a `validation` failure
/// envelope; the bridge keeps reading.
///
/// # Errors
///
/// Returns [`AppError::Bridge`] if reading or writing fails.
pub async fn run_bridge<R, W>(service: &SearchService, reader: R, writer: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut writer = BufWriter::new(writer);

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| AppError::Bridge(format!("failed to read request: {e}")))?
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let reply = handle_line(service, trimmed).await?;
        write_line(&mut writer, &reply).await?;
    }

    tracing::info!("input closed (EOF); shutting down search bridge");
    Ok(())
}

/// Run [`run_bridge`] over the process's stdin and stdout.
///
/// # Errors
///
/// Same as [`run_bridge`].
pub async fn run_stdio_bridge(service: &SearchService) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    run_bridge(service, stdin, &mut stdout).await
}

async fn handle_line(service: &SearchService, line: &str) -> Result<String> {
    let outcome = match serde_json::from_str::<SearchRequest>(line) {
        Ok(request) => service.handle(request).await,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse search request");
            Err(SearchError::Validation(format!("malformed request: {e}")))
        }
    };

    let json = match outcome {
        Ok(response) => serde_json::to_string(&response),
        Err(err) => {
            tracing::warn!(kind = err.kind(), error = %err, "search request failed");
            serde_json::to_string(&ErrorResponse::from(&err))
        }
    };
    json.map_err(|e| AppError::Bridge(format!("failed to serialize reply: {e}")))
}

async fn write_line<W>(writer: &mut W, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| AppError::Bridge(format!("failed to write reply: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| AppError::Bridge(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::Bridge(format!("failed to flush output: {e}")))?;
    Ok(())
}
