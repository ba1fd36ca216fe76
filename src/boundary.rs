//! Transport-facing request contract.
//!
//! No HTTP server lives in this crate; a host embeds the runtime and maps its
//! listener onto `handle_request`. The route shape is
//! `{method} /Workflow/{workflow}/{operation}/{key}`:
//!
//! - `GET` is the read path. The operation name travels in the path (`get`,
//!   `advance`, `activities`); the body is ignored.
//! - `PUT` is the write path. The body must parse as an integer and the
//!   dispatched operation is always `advance`, whatever the path says.
//! - Any other method is rejected before dispatch.
//!
//! The host supplies a stable call id per logical client request (and reuses
//! it on retries) so that redelivery never mutates twice.

use std::time::Duration;
use tracing::debug;

use crate::runtime::coordinator::{CallStatus, ClientCall, RequestCoordinator};
use crate::WorkflowError;

/// Request method. Only reads and writes exist on this surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

impl Method {
    /// Narrow a transport method name. Anything but GET or PUT is rejected;
    /// hosts turn the error into a `BadRequest`.
    pub fn from_name(name: &str) -> Result<Self, String> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            other => Err(format!("unsupported method: {other}")),
        }
    }
}

/// One inbound request as extracted from the transport.
#[derive(Debug, Clone)]
pub struct BoundaryRequest {
    pub method: Method,
    pub workflow: String,
    pub operation: String,
    pub key: String,
    /// Raw request body; consulted only on the write path.
    pub body: Option<String>,
}

/// Transport-agnostic response, ready for a host to map onto status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryResponse {
    /// The operation completed; the body is the actor's result (empty when
    /// the operation produced none).
    Ok(String),
    /// The caller-supplied wait bound elapsed. The operation stays dispatched
    /// and the same call id can be re-presented to collect the result.
    Accepted,
    /// Rejected before any operation was dispatched.
    BadRequest(String),
    /// Storage failed past its redelivery-safe retries, or the runtime shut
    /// down mid-call.
    ServerError(String),
}

/// Map a transport request onto exactly one coordinated call.
///
/// `timeout` of `None` waits unboundedly; `Some(t)` turns the call into a
/// long-poll that answers `Accepted` on expiry.
pub async fn handle_request(
    coordinator: &RequestCoordinator,
    call_id: &str,
    request: BoundaryRequest,
    timeout: Option<Duration>,
) -> BoundaryResponse {
    let call = match build_call(call_id, &request) {
        Ok(call) => call,
        Err(reason) => {
            debug!(call_id, %reason, "request rejected at the boundary");
            return BoundaryResponse::BadRequest(reason);
        }
    };

    let status = match timeout {
        None => coordinator
            .execute(call)
            .await
            .map(CallStatus::Completed),
        Some(t) => coordinator.execute_with_timeout(call, t).await,
    };

    match status {
        Ok(CallStatus::Completed(result)) => BoundaryResponse::Ok(result.unwrap_or_default()),
        Ok(CallStatus::Pending) => BoundaryResponse::Accepted,
        Err(WorkflowError::UnknownWorkflow { workflow }) => {
            BoundaryResponse::BadRequest(format!("unknown workflow: {workflow}"))
        }
        Err(WorkflowError::MalformedInput(reason)) => BoundaryResponse::BadRequest(reason),
        Err(e) => BoundaryResponse::ServerError(e.to_string()),
    }
}

/// Narrow a request into a `ClientCall`, rejecting malformed input before
/// anything is journaled or enqueued.
fn build_call(call_id: &str, request: &BoundaryRequest) -> Result<ClientCall, String> {
    if request.workflow.is_empty() {
        return Err("missing workflow".to_string());
    }
    if request.key.is_empty() {
        return Err("missing key".to_string());
    }
    match request.method {
        Method::Get => Ok(ClientCall::read(
            call_id,
            request.workflow.clone(),
            request.operation.clone(),
            request.key.clone(),
        )),
        Method::Put => {
            let body = request.body.as_deref().unwrap_or("");
            let value: i64 = body
                .trim()
                .parse()
                .map_err(|_| format!("body is not an integer: {body:?}"))?;
            Ok(ClientCall::write(
                call_id,
                request.workflow.clone(),
                request.key.clone(),
                value,
            ))
        }
    }
}
