//! Named operation handlers and the registry that dispatches to them.
//!
//! The registry is fixed at server construction from the typed
//! [`crate::HandlerSpec`] list; operations cannot appear or disappear at
//! runtime. Each entry records whether the operation is reachable without
//! a verified client certificate — only enrollment is.

mod ca;
mod status;

pub use ca::CaHandler;
pub use status::StatusHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use warden_ca::CertificateAuthority;
use warden_core::{ErrorKind, RpcError};

use crate::{HandlerSpec, Result, ServerError};

/// A named operation implementation.
///
/// Handler failures are returned as wire errors, caught at the dispatch
/// boundary; they never take down the connection loop.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, args: &[Value]) -> std::result::Result<Value, RpcError>;
}

struct Registration {
    handler: Arc<dyn Handler>,
    /// Whether the operation may be invoked by a peer without a verified
    /// client certificate.
    open: bool,
}

/// Fixed mapping from operation name to handler.
pub struct HandlerRegistry {
    entries: HashMap<&'static str, Registration>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Build the registry from the configured handler specs.
    ///
    /// Fails with a config error if the status handler is missing: a
    /// server with no health probe is a misconfiguration, not a variant.
    pub fn from_specs(specs: &[HandlerSpec], authority: &CertificateAuthority) -> Result<Self> {
        if !specs.contains(&HandlerSpec::Status) {
            return Err(ServerError::Config(
                "handler set must include the status handler".into(),
            ));
        }

        let mut entries = HashMap::new();
        for spec in specs {
            match spec {
                HandlerSpec::Status => {
                    entries.insert(
                        "status",
                        Registration {
                            handler: Arc::new(StatusHandler),
                            open: false,
                        },
                    );
                }
                HandlerSpec::Ca { autosign } => {
                    authority.set_autosign(*autosign);
                    entries.insert(
                        "ca.enroll",
                        Registration {
                            handler: Arc::new(CaHandler::new(authority.clone())),
                            // The one operation reachable before the peer
                            // holds a certificate.
                            open: true,
                        },
                    );
                }
            }
        }

        Ok(Self { entries })
    }

    /// Whether the operation requires a verified client certificate.
    /// Unknown operations do: they are refused before the name lookup even
    /// reports, so probing the operation space needs a certificate too.
    pub fn requires_auth(&self, operation: &str) -> bool {
        self.entries.get(operation).map_or(true, |r| !r.open)
    }

    /// Dispatch an operation by name.
    pub async fn dispatch(
        &self,
        operation: &str,
        args: &[Value],
    ) -> std::result::Result<Value, RpcError> {
        let Some(registration) = self.entries.get(operation) else {
            return Err(RpcError::new(
                ErrorKind::UnknownOperation,
                format!("no handler registered for {operation}"),
            ));
        };

        debug!(operation, "dispatching");
        registration.handler.handle(args).await
    }
}
