//! Newline-delimited JSON request/response surface over [`SandboxService`].
//!
//! Each request line is an object tagged by `op`; each answer is a single
//! line, either `{"status":"ok","data":...}` or
//! `{"status":"error","code":...,"message":...}`.
//!
//! Requests on one connection run concurrently, so answers arrive in
//! completion order. A request may carry an `id` of any JSON type; it is
//! echoed on its answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{Result, WardenError};
use crate::sandbox::{SandboxService, SecurityPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    ExecuteCode {
        code: String,
        environment_id: String,
    },
    Quarantine {
        environment_id: String,
    },
    Restore {
        environment_id: String,
    },
    Stats {
        environment_id: String,
    },
    ListEnvironments,
    GlobalMetrics,
    ListPolicies,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcResponse {
    Ok { data: serde_json::Value },
    Error { code: String, message: String },
}

/// One answer line: the response plus the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub response: RpcResponse,
}

impl RpcResponse {
    fn ok<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => RpcResponse::Ok { data },
            Err(e) => Self::error(&WardenError::from(e)),
        }
    }

    fn error(err: &WardenError) -> Self {
        RpcResponse::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(&data),
            Err(e) => Self::error(&e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RpcResponse::Ok { .. })
    }
}

/// Run one request against the service.
pub async fn dispatch(service: &SandboxService, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::ExecuteCode {
            code,
            environment_id,
        } => RpcResponse::from_result(
            service
                .execute_code(&code, &environment_id)
                .await
                .map_err(WardenError::from),
        ),
        RpcRequest::Quarantine { environment_id } => RpcResponse::from_result(
            service
                .quarantine(&environment_id)
                .await
                .map_err(WardenError::from),
        ),
        RpcRequest::Restore { environment_id } => RpcResponse::from_result(
            service
                .restore(&environment_id)
                .await
                .map_err(WardenError::from),
        ),
        RpcRequest::Stats { environment_id } => RpcResponse::from_result(
            service
                .stats(&environment_id)
                .await
                .map_err(WardenError::from),
        ),
        RpcRequest::ListEnvironments => RpcResponse::ok(&service.list_environments().await),
        RpcRequest::GlobalMetrics => RpcResponse::ok(&service.global_metrics().await),
        RpcRequest::ListPolicies => {
            let policies: Vec<&SecurityPolicy> = service.policies().iter().collect();
            RpcResponse::ok(&policies)
        }
    }
}

/// Decode one request line and dispatch it.
///
/// The `id` is recovered even when the rest of the request is invalid.
pub async fn handle_line(service: &SandboxService, line: &str) -> RpcReply {
    let mut value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return RpcReply {
                id: None,
                response: RpcResponse::error(&WardenError::from(e)),
            }
        }
    };
    let id = value.as_object_mut().and_then(|fields| fields.remove("id"));
    let response = match serde_json::from_value::<RpcRequest>(value) {
        Ok(request) => dispatch(service, request).await,
        Err(e) => RpcResponse::error(&WardenError::from(e)),
    };
    RpcReply { id, response }
}

/// Answer request lines from `reader` on `writer` until end of input.
///
/// Each request is dispatched on its own task, so a long execution does not
/// hold up a later quarantine. Blank lines are skipped. Once input ends the
/// requests still running are answered before returning. Returns the number
/// of requests answered.
pub async fn serve<R, W>(service: Arc<SandboxService>, reader: R, mut writer: W) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut tasks: JoinSet<RpcReply> = JoinSet::new();
    let mut reading = true;
    let mut answered = 0;
    while reading || !tasks.is_empty() {
        tokio::select! {
            line = lines.next_line(), if reading => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let service = Arc::clone(&service);
                    tasks.spawn(async move { handle_line(&service, line.trim()).await });
                }
                None => {
                    debug!(pending = tasks.len(), "request stream closed");
                    reading = false;
                }
            },
            Some(joined) = tasks.join_next() => {
                let reply = joined.unwrap_or_else(|e| {
                    error!(error = %e, "request task failed");
                    RpcReply {
                        id: None,
                        response: RpcResponse::error(&WardenError::Task(e.to_string())),
                    }
                });
                let mut encoded = serde_json::to_vec(&reply)?;
                encoded.push(b'\n');
                writer.write_all(&encoded).await?;
                writer.flush().await?;
                answered += 1;
            }
        }
    }
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: RpcRequest = serde_json::from_str(
            r#"{"op":"execute_code","code":"return 1","environment_id":"js-sandbox"}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            RpcRequest::ExecuteCode {
                code: "return 1".into(),
                environment_id: "js-sandbox".into(),
            }
        );
        let request: RpcRequest = serde_json::from_str(r#"{"op":"list_policies"}"#).unwrap();
        assert_eq!(request, RpcRequest::ListPolicies);
    }

    #[test]
    fn test_response_wire_format() {
        let ok = RpcResponse::ok(&serde_json::json!([1]));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"status": "ok", "data": [1]})
        );
        let err = RpcResponse::error(&WardenError::InvalidConfig("bad".into()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "invalid_config");
    }

    #[tokio::test]
    async fn test_unknown_op_is_invalid_request() {
        let service = SandboxService::with_defaults().unwrap();
        let reply = handle_line(&service, r#"{"op":"reboot","id":7}"#).await;
        assert_eq!(reply.id, Some(serde_json::json!(7)));
        match reply.response {
            RpcResponse::Error { code, .. } => assert_eq!(code, "invalid_request"),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_carries_id_beside_status() {
        let reply = RpcReply {
            id: Some(serde_json::json!("a-1")),
            response: RpcResponse::ok(&serde_json::json!(true)),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"id": "a-1", "status": "ok", "data": true})
        );
        let anonymous = RpcReply {
            id: None,
            response: RpcResponse::ok(&serde_json::json!(null)),
        };
        assert_eq!(
            serde_json::to_value(&anonymous).unwrap(),
            serde_json::json!({"status": "ok", "data": null})
        );
    }
}
