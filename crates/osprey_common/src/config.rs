use serde::{Deserialize, Serialize};

/// Configuration of the cluster execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterExecConfig {
    /// Default number of rows per pulled batch.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    /// Timeout for a single synchronous peer request, in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: f64,
    /// Number of worker slots in the bounded dispatcher.
    #[serde(default = "default_dispatcher_slots")]
    pub dispatcher_slots: usize,
}

fn default_batch_size() -> usize {
    1000
}

fn default_rpc_timeout_secs() -> f64 {
    3600.0
}

fn default_dispatcher_slots() -> usize {
    8
}

impl Default for ClusterExecConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            dispatcher_slots: default_dispatcher_slots(),
        }
    }
}
