//! Stdio JSON-RPC server.
//!
//! Reads one request per line through [`FramedRead`] with the bounded
//! [`LineCodec`], dispatches it to the [`Bridge`], and funnels responses and
//! outbound notifications through a single writer task so lines are never
//! interleaved on the output stream.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::bridge::Bridge;
use crate::classifier::codec::LineCodec;
use crate::models::notification::Notification;
use crate::rpc::{
    failure, method_not_found, session_descriptor, success, AuthenticateParams,
    NewSessionParams, PermissionResponseParams, PromptParams, RpcRequest, SessionParams,
};
use crate::{AppError, Result};

/// Capacity of the outbound line queue.
const OUTBOUND_DEPTH: usize = 256;

/// Serve the host protocol until `input` closes or `ct` fires.
///
/// `notifications` is the receiving end of the channel the bridge was built
/// with; its items are written to `output` as JSON-RPC notifications.
///
/// # Errors
///
/// Returns `AppError::Io` if reading `input` fails.
pub async fn serve<R, W>(
    bridge: Arc<Bridge>,
    notifications: mpsc::Receiver<Notification>,
    input: R,
    output: W,
    ct: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::channel::<Value>(OUTBOUND_DEPTH);
    let writer = tokio::spawn(run_writer(output, line_rx, ct.clone()));
    let forwarder = tokio::spawn(forward_notifications(notifications, line_tx.clone()));

    let mut framed = FramedRead::new(input, LineCodec::new());
    let outcome = loop {
        tokio::select! {
            biased;

            () = ct.cancelled() => {
                info!("rpc server cancelled");
                break Ok(());
            }

            item = framed.next() => {
                let response = match item {
                    None => {
                        info!("host closed input");
                        break Ok(());
                    }
                    Some(Err(AppError::Io(msg))) => break Err(AppError::Io(msg)),
                    Some(Err(err)) => {
                        warn!(%err, "unreadable request line");
                        Some(failure(Value::Null, &AppError::Protocol(err.to_string())))
                    }
                    Some(Ok(line)) => handle_line(&bridge, &line).await,
                };

                if let Some(response) = response {
                    if line_tx.send(response).await.is_err() {
                        warn!("output closed, stopping rpc server");
                        break Ok(());
                    }
                }
            }
        }
    };

    forwarder.abort();
    drop(line_tx);
    if writer.await.is_err() {
        warn!("rpc writer task ended abnormally");
    }
    outcome
}

/// Parse and dispatch one request line, returning the response if one is due.
pub async fn handle_line(bridge: &Bridge, line: &str) -> Option<Value> {
    if line.trim().is_empty() {
        return None;
    }

    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            warn!(%err, "malformed request");
            return Some(failure(Value::Null, &AppError::from(err)));
        }
    };

    let span = info_span!("rpc", method = %request.method);
    async move {
        let id = request.id.clone();
        let result = dispatch(bridge, &request).await;

        // Notifications (no id) get no response, even on failure.
        let id = id?;
        Some(match result {
            Ok(value) => success(id, value),
            Err(Dispatch::UnknownMethod) => method_not_found(id, &request.method),
            Err(Dispatch::Failed(err)) => {
                debug!(code = err.code(), %err, "request failed");
                failure(id, &err)
            }
        })
    }
    .instrument(span)
    .await
}

enum Dispatch {
    UnknownMethod,
    Failed(AppError),
}

impl From<AppError> for Dispatch {
    fn from(err: AppError) -> Self {
        Self::Failed(err)
    }
}

async fn dispatch(bridge: &Bridge, request: &RpcRequest) -> std::result::Result<Value, Dispatch> {
    match request.method.as_str() {
        "initialize" => Ok(bridge.initialize()),
        "authenticate" => {
            let params: AuthenticateParams = params(&request.params)?;
            bridge.authenticate(&params.credential)?;
            Ok(json!({ "authenticated": true }))
        }
        "session/new" => {
            let params: NewSessionParams = if request.params.is_null() {
                NewSessionParams::default()
            } else {
                params(&request.params)?
            };
            let session = bridge
                .new_session(params.working_directory, &params.open_files)
                .await?;
            Ok(session_descriptor(&session))
        }
        "session/prompt" => {
            let params: PromptParams = params(&request.params)?;
            bridge.prompt(&params.session_id, &params.text()).await?;
            Ok(json!({ "sessionId": params.session_id, "queued": true }))
        }
        "session/cancel" => {
            let params: SessionParams = params(&request.params)?;
            bridge.cancel(&params.session_id).await?;
            Ok(json!({ "cancelled": true }))
        }
        "session/remove" => {
            let params: SessionParams = params(&request.params)?;
            bridge.remove_session(&params.session_id).await?;
            Ok(json!({ "removed": true }))
        }
        "permission/response" => {
            let params: PermissionResponseParams = params(&request.params)?;
            bridge.permission_response(&params.request_id, params.option)?;
            Ok(json!({ "accepted": true }))
        }
        _ => Err(Dispatch::UnknownMethod),
    }
}

fn params<T: DeserializeOwned>(raw: &Value) -> Result<T> {
    serde_json::from_value(raw.clone())
        .map_err(|err| AppError::InvalidRequest(format!("invalid params: {err}")))
}

async fn forward_notifications(
    mut notifications: mpsc::Receiver<Notification>,
    line_tx: mpsc::Sender<Value>,
) {
    while let Some(notification) = notifications.recv().await {
        if line_tx.send(notification.to_json_rpc()).await.is_err() {
            debug!("output closed, dropping notifications");
            return;
        }
    }
}

async fn run_writer<W>(output: W, mut lines: mpsc::Receiver<Value>, ct: CancellationToken)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(output, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = ct.cancelled() => break,

            line = lines.recv() => {
                let Some(value) = line else { break };
                if let Err(err) = framed.send(value.to_string()).await {
                    warn!(%err, "failed to write to host");
                    return;
                }
            }
        }
    }

    if let Err(err) = SinkExt::<String>::close(&mut framed).await {
        debug!(%err, "closing host output failed");
    }
}
