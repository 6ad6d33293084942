//! Durable message queue with prefetch-bounded consumers, heartbeats and
//! explicit acknowledgements. The keys layout is compatible with other
//! clients of the same broker so that producers written in any language
//! may share the queues.

mod broker;
mod connection;
mod consumer;

use serde::Deserialize;

pub(crate) use broker::*;
pub(crate) use connection::*;
pub(crate) use consumer::*;

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// Address of the queue broker, `host:port` for `tcp` or a socket path
    /// for `unix` transport
    pub(crate) wait_hosts: String,

    /// Name of the queue that carries metric events
    pub(crate) log_metric_queue: String,

    #[serde(default = "default_db_index")]
    pub(crate) queue_db_index: i64,

    #[serde(default = "default_transport")]
    pub(crate) queue_transport: String,
}

fn default_db_index() -> i64 {
    1
}

fn default_transport() -> String {
    "tcp".to_owned()
}
