//! The synchronous RPC seam consumed by remote operators: the request
//! envelope, the client trait production transports implement, and the
//! shared decoding of failed transport results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use osprey_common::error::{codes, OspreyError, OspreyResult};
use osprey_common::json;
use osprey_common::types::{ServerId, ShardId};

/// Request verb. The peer protocol only ever uses these two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
        }
    }
}

/// Transport-level outcome of a synchronous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcStatus {
    /// The peer answered with a success response.
    Ok,
    /// No reply within the timeout.
    Timeout,
    /// The peer became unreachable.
    BackendUnavailable,
    /// The peer answered with an error response; the body may carry
    /// `errorNum` / `errorMessage`.
    Error,
}

/// Result envelope of one synchronous request.
#[derive(Debug, Clone)]
pub struct RpcResult {
    pub status: RpcStatus,
    /// Shard the request addressed (diagnostics).
    pub shard_id: ShardId,
    /// Server the request addressed (diagnostics).
    pub server_id: ServerId,
    /// Raw response body.
    pub body: String,
}

/// Synchronous request/response client. Production transports live outside
/// this crate; tests script the trait.
pub trait RpcClient: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn sync_request(
        &self,
        client_txn_id: &str,
        coord_txn_id: u64,
        server: &ServerId,
        method: HttpMethod,
        path: &str,
        body: &str,
        headers: &HashMap<String, String>,
        timeout_secs: f64,
    ) -> RpcResult;
}

static COORDINATOR_TICKET: AtomicU64 = AtomicU64::new(0);

/// A fresh coordinator transaction id for one outgoing request.
pub fn next_coordinator_ticket() -> u64 {
    COORDINATOR_TICKET.fetch_add(1, Ordering::Relaxed) + 1
}

/// Decode a failed transport result into a local error.
///
/// Returns `Ok(true)` when the caller should treat the response as success
/// anyway: a peer reporting "query not found" during `is_shutdown` is
/// tolerated so repeated or racing shutdowns do not propagate. Returns
/// `Ok(false)` for a clean response.
pub fn check_sync_result(res: &RpcResult, is_shutdown: bool) -> OspreyResult<bool> {
    match res.status {
        RpcStatus::Ok => Ok(false),
        RpcStatus::Timeout => Err(OspreyError::ClusterTimeout {
            shard: res.shard_id.clone(),
            server: res.server_id.clone(),
        }),
        RpcStatus::BackendUnavailable => Err(OspreyError::ConnectionLost {
            shard: res.shard_id.clone(),
            server: res.server_id.clone(),
        }),
        RpcStatus::Error => {
            let parsed: Value = serde_json::from_str(&res.body).unwrap_or(Value::Null);

            let mut error_num = codes::NO_ERROR;
            let mut message = String::new();
            if json::get_bool(&parsed, "error", true) {
                error_num = codes::INTERNAL;
                message = format!(
                    "error message received from shard '{}' on cluster node '{}': ",
                    res.shard_id, res.server_id
                );
            }

            if parsed.is_object() {
                let num = json::get_i64(&parsed, "errorNum", 0) as i32;
                if num != codes::NO_ERROR {
                    error_num = num;
                }
                let peer_message = json::get_str(&parsed, "errorMessage", "");
                if !peer_message.is_empty() {
                    message.push_str(peer_message);
                } else {
                    message.push_str("(no valid error in response)");
                }
            } else {
                message.push_str("(no valid response)");
            }

            if is_shutdown && error_num == codes::QUERY_NOT_FOUND {
                // tolerated: the peer already forgot the query
                tracing::debug!(
                    shard = %res.shard_id,
                    server = %res.server_id,
                    "peer reported query-not-found during shutdown, ignoring"
                );
                return Ok(true);
            }

            if error_num > 0 && !message.is_empty() {
                return Err(OspreyError::from_wire(error_num, message));
            }

            Err(OspreyError::Communication(format!(
                "bad response from shard '{}' on cluster node '{}'",
                res.shard_id, res.server_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(status: RpcStatus, body: &str) -> RpcResult {
        RpcResult {
            status,
            shard_id: ShardId::from("s1"),
            server_id: ServerId("db-2".into()),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_ok_passes_through() {
        let res = envelope(RpcStatus::Ok, "{}");
        assert!(!check_sync_result(&res, false).expect("ok"));
    }

    #[test]
    fn test_timeout_becomes_cluster_timeout() {
        let res = envelope(RpcStatus::Timeout, "");
        let err = check_sync_result(&res, false).unwrap_err();
        assert!(matches!(err, OspreyError::ClusterTimeout { .. }));
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn test_backend_unavailable_becomes_connection_lost() {
        let res = envelope(RpcStatus::BackendUnavailable, "");
        let err = check_sync_result(&res, false).unwrap_err();
        assert!(matches!(err, OspreyError::ConnectionLost { .. }));
    }

    #[test]
    fn test_error_body_with_error_num_is_rethrown() {
        let res = envelope(
            RpcStatus::Error,
            r#"{"error": true, "errorNum": 4711, "errorMessage": "boom"}"#,
        );
        let err = check_sync_result(&res, false).unwrap_err();
        match err {
            OspreyError::Remote { code, message } => {
                assert_eq!(code, 4711);
                assert!(message.contains("boom"));
                assert!(message.contains("s1"));
            }
            other => panic!("expected Remote, got {:?}", other),
        }
    }

    #[test]
    fn test_error_without_usable_fields_is_internal_coded() {
        let res = envelope(RpcStatus::Error, "not json at all");
        let err = check_sync_result(&res, false).unwrap_err();
        // no object body: falls back to the generic internal code
        assert_eq!(err.error_code(), codes::INTERNAL);
    }

    #[test]
    fn test_query_not_found_tolerated_only_during_shutdown() {
        let body = format!(
            r#"{{"error": true, "errorNum": {}, "errorMessage": "query not found"}}"#,
            codes::QUERY_NOT_FOUND
        );
        let res = envelope(RpcStatus::Error, &body);
        assert!(check_sync_result(&res, true).expect("tolerated"));
        let err = check_sync_result(&res, false).unwrap_err();
        assert_eq!(err, OspreyError::QueryNotFound);
    }

    #[test]
    fn test_coordinator_tickets_are_fresh() {
        let a = next_coordinator_ticket();
        let b = next_coordinator_ticket();
        assert!(b > a);
    }
}
