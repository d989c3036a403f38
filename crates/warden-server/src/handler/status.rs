//! Health-check handler.

use async_trait::async_trait;
use serde_json::{json, Value};
use warden_core::RpcError;

use super::Handler;

/// Minimal end-to-end liveness probe: `status` returns `1`.
pub struct StatusHandler;

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(&self, _args: &[Value]) -> Result<Value, RpcError> {
        Ok(json!(1))
    }
}
