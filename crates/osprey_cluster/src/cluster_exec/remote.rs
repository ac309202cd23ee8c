//! RPC-forwarding operator: an upstream sub-plan living on a peer server,
//! pulled through one synchronous request per iterator call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use osprey_common::config::ClusterExecConfig;
use osprey_common::error::{codes, OspreyError, OspreyResult};
use osprey_common::json as json_util;
use osprey_common::types::{QueryId, ServerId, ShardId};
use osprey_executor::batch::TupleBatch;
use osprey_executor::block::ExecutionBlock;
use osprey_executor::context::QueryContext;
use osprey_executor::stats::ExecutionStats;

use crate::dispatcher::DispatcherThread;
use crate::rpc::{check_sync_result, next_coordinator_ticket, HttpMethod, RpcClient, RpcResult};

/// Client transaction id attached to every request of this layer.
const CLIENT_TXN_ID: &str = "AQL";

/// Replaces an upstream sub-plan with a forwarder to the server that owns
/// it. Every pull becomes a request carrying the remote query id in the
/// path.
///
/// Around each request the block yields its dispatcher slot (if the
/// calling thread is a pool worker), so other cursors can run while the
/// request blocks. Only blocks flagged responsible emit
/// initialize/initializeCursor/shutdown; the rest short-circuit so shared
/// remote queries are not initialized twice.
pub struct RemoteBlock {
    /// Peer server owning the remote sub-plan.
    server: ServerId,
    /// Own shard name; set on data-bearing nodes and attached as the
    /// `Shard-Id` header, unset on coordinators.
    own_shard: Option<ShardId>,
    query_id: QueryId,
    responsible_for_initialize_cursor: bool,
    client: Arc<dyn RpcClient>,
    query: Arc<QueryContext>,
    timeout_secs: f64,
    /// Stats reported by the previous pull; the next response is folded in
    /// as a delta against this baseline.
    delta_stats: ExecutionStats,
}

impl RemoteBlock {
    pub fn new(
        server: ServerId,
        own_shard: Option<ShardId>,
        query_id: QueryId,
        responsible_for_initialize_cursor: bool,
        client: Arc<dyn RpcClient>,
        query: Arc<QueryContext>,
    ) -> Self {
        RemoteBlock {
            server,
            own_shard,
            query_id,
            responsible_for_initialize_cursor,
            client,
            query,
            timeout_secs: ClusterExecConfig::default().rpc_timeout_secs,
            delta_stats: ExecutionStats::default(),
        }
    }

    pub fn with_config(mut self, config: &ClusterExecConfig) -> Self {
        self.timeout_secs = config.rpc_timeout_secs;
        self
    }

    /// Issue one synchronous request for the iterator call `operation`,
    /// yielding the dispatcher slot for the duration of the call.
    fn send_request(
        &self,
        method: HttpMethod,
        operation: &str,
        body: &str,
    ) -> OspreyResult<RpcResult> {
        let path = format!(
            "/_db/{}/_api/aql/{}/{}",
            json_util::url_encode(self.query.database()),
            operation,
            self.query_id
        );

        let mut headers: HashMap<String, String> = HashMap::new();
        if let Some(own_shard) = &self.own_shard {
            headers.insert("Shard-Id".to_string(), own_shard.0.clone());
        }

        let current = DispatcherThread::current();
        if let Some(thread) = &current {
            thread.block();
        }

        let started = Instant::now();
        let result = self.client.sync_request(
            CLIENT_TXN_ID,
            next_coordinator_ticket(),
            &self.server,
            method,
            &path,
            body,
            &headers,
            self.timeout_secs,
        );

        if let Some(thread) = &current {
            thread.unblock();
        }

        osprey_observability::record_remote_request(
            operation,
            started.elapsed().as_micros() as u64,
            matches!(result.status, crate::rpc::RpcStatus::Ok),
        );
        Ok(result)
    }

    fn parse_body(res: &RpcResult) -> OspreyResult<Value> {
        serde_json::from_str(&res.body)
            .map_err(|e| OspreyError::Serialization(format!("malformed response body: {}", e)))
    }

    /// Map the `code` field of a response to a status.
    fn code_to_status(body: &Value) -> OspreyResult<()> {
        let code = json_util::get_i64(body, "code", codes::INTERNAL as i64) as i32;
        if code == codes::NO_ERROR {
            Ok(())
        } else {
            Err(OspreyError::from_wire(
                code,
                json_util::get_str(body, "errorMessage", "remote operation failed"),
            ))
        }
    }

    /// Fail when the peer flagged the response as an error.
    fn ensure_no_error(body: &Value, operation: &str) -> OspreyResult<()> {
        if json_util::get_bool(body, "error", true) {
            return Err(OspreyError::Communication(format!(
                "peer reported an error for {}",
                operation
            )));
        }
        Ok(())
    }
}

impl ExecutionBlock for RemoteBlock {
    fn initialize(&mut self) -> OspreyResult<()> {
        if !self.responsible_for_initialize_cursor {
            return Ok(());
        }

        let res = self.send_request(HttpMethod::Put, "initialize", "{}")?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;
        Self::code_to_status(&body)
    }

    fn initialize_cursor(&mut self, seed: Option<&TupleBatch>, pos: usize) -> OspreyResult<()> {
        if !self.responsible_for_initialize_cursor {
            return Ok(());
        }

        let body = match seed {
            None => json!({"exhausted": true, "error": false}),
            Some(items) => json!({
                "exhausted": false,
                "error": false,
                "pos": pos,
                "items": items.to_wire(),
            }),
        };

        let res = self.send_request(HttpMethod::Put, "initializeCursor", &body.to_string())?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;
        Self::code_to_status(&body)
    }

    fn shutdown(&mut self, error_code: i32) -> OspreyResult<()> {
        if !self.responsible_for_initialize_cursor {
            return Ok(());
        }

        let res = self.send_request(
            HttpMethod::Put,
            "shutdown",
            &json!({ "code": error_code }).to_string(),
        )?;
        if check_sync_result(&res, true)? {
            // the peer already forgot the query; repeated or racing
            // shutdowns must not propagate
            return Ok(());
        }

        let body = Self::parse_body(&res)?;

        // drain peer warnings into the local query
        if let Some(warnings) = body.get("warnings").and_then(Value::as_array) {
            for warning in warnings {
                if let (Some(code), Some(message)) = (
                    warning.get("code").and_then(Value::as_i64),
                    warning.get("message").and_then(Value::as_str),
                ) {
                    self.query.register_warning(code as i32, message);
                }
            }
        }

        Self::code_to_status(&body)
    }

    fn get_some(
        &mut self,
        at_least: usize,
        at_most: usize,
    ) -> OspreyResult<Option<TupleBatch>> {
        let body = json!({"atLeast": at_least, "atMost": at_most});
        let res = self.send_request(HttpMethod::Put, "getSome", &body.to_string())?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;

        let new_stats = ExecutionStats::from_wire(body.get("stats").unwrap_or(&Value::Null));
        self.query.add_stats_delta(&self.delta_stats, &new_stats);
        self.delta_stats = new_stats;

        if json_util::get_bool(&body, "exhausted", true) {
            return Ok(None);
        }

        let items = body
            .get("items")
            .ok_or_else(|| OspreyError::Serialization("getSome response has no items".into()))?;
        Ok(Some(TupleBatch::from_wire(items)?))
    }

    fn skip_some(&mut self, at_least: usize, at_most: usize) -> OspreyResult<usize> {
        let body = json!({"atLeast": at_least, "atMost": at_most});
        let res = self.send_request(HttpMethod::Put, "skipSome", &body.to_string())?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;
        Self::ensure_no_error(&body, "skipSome")?;
        Ok(json_util::get_u64(&body, "skipped", 0) as usize)
    }

    fn has_more(&mut self) -> OspreyResult<bool> {
        let res = self.send_request(HttpMethod::Get, "hasMore", "")?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;
        Self::ensure_no_error(&body, "hasMore")?;
        Ok(json_util::get_bool(&body, "hasMore", true))
    }

    fn count(&self) -> OspreyResult<i64> {
        let res = self.send_request(HttpMethod::Get, "count", "")?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;
        Self::ensure_no_error(&body, "count")?;
        Ok(json_util::get_i64(&body, "count", 0))
    }

    fn remaining(&mut self) -> OspreyResult<i64> {
        let res = self.send_request(HttpMethod::Get, "remaining", "")?;
        check_sync_result(&res, false)?;
        let body = Self::parse_body(&res)?;
        Self::ensure_no_error(&body, "remaining")?;
        Ok(json_util::get_i64(&body, "remaining", 0))
    }
}
