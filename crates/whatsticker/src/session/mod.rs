//! Protocol session layer. The bot only sees it through the [`Session`] trait
//! and the stream of [`InboundEvent`]s.

mod event;
mod sidecar;

use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;
use std::sync::Arc;

pub(crate) use event::*;
pub(crate) use sidecar::SidecarSession;

#[async_trait]
pub(crate) trait Session: Send + Sync + 'static {
    /// Identifier of the paired device, if the session has logged in already
    fn device_id(&self) -> Option<String>;

    async fn connect(&self) -> Result;

    /// Best-effort disconnect, failures are only logged
    async fn disconnect(&self);
}

pub(crate) type SessionHandle = Arc<dyn Session>;

pub(crate) type EventStream = BoxStream<'static, InboundEvent>;

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct Config {
    /// Program that runs the protocol client and speaks JSON lines over stdio
    pub(crate) sidecar_cmd: String,

    /// Extra arguments for the sidecar, split like a shell would do it
    #[serde(default)]
    pub(crate) sidecar_args: String,

    /// Path to the database where the sidecar keeps the device credentials
    #[serde(default = "default_device_store")]
    pub(crate) device_store: String,
}

fn default_device_store() -> String {
    "db/examplestore.db".to_owned()
}
