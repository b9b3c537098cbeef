//! # Call Diagnostics Handlers
//!
//! Read-only views over the relay's in-memory state:
//! - `GET /api/v1/calls`: live sessions and which legs are attached
//! - `GET /api/v1/calls/{call_id}/completed`: whether a call has reached a
//!   terminal state - the check the hang-up collaborator makes before
//!   issuing a provider-side hang-up, so ending a call twice stays a no-op

use crate::relay::completion::CompletionTracker;
use crate::websocket::BridgeRegistry;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Enumerate live call sessions from the registry snapshot.
pub async fn list_calls(registry: web::Data<BridgeRegistry>) -> HttpResponse {
    let snapshot = registry.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_calls": snapshot.len(),
        "calls": snapshot,
    }))
}

/// Report whether a call has been marked completed.
pub async fn call_completed(
    path: web::Path<String>,
    completions: web::Data<CompletionTracker>,
) -> HttpResponse {
    let call_id = path.into_inner();
    let completed = completions.is_completed(&call_id);

    HttpResponse::Ok().json(json!({
        "call_id": call_id,
        "completed": completed,
    }))
}
