//! Function invocation load generator.
//!
//! Fires asynchronous (event) invocations at the deployed functions, picking
//! one at random per iteration. Only the acceptance of the invocation is
//! measured; the function's own outcome is never awaited.

use async_trait::async_trait;
use chrono::Utc;
use rand::prelude::*;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{task_rng, BackendKind, BackendResult, InertReason, LoadGenerator, Pacing};
use crate::error::OperationError;
use crate::registry::EndpointRegistry;

/// Value of the `source` field in every payload.
pub const PAYLOAD_SOURCE: &str = "stack-loadtest";

/// Body sent with each invocation.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationPayload {
    pub source: &'static str,
    pub generated_at: String,
    pub sequence: u64,
}

impl InvocationPayload {
    pub fn new(sequence: u64) -> Self {
        Self {
            source: PAYLOAD_SOURCE,
            generated_at: Utc::now().to_rfc3339(),
            sequence,
        }
    }
}

/// Submits one asynchronous invocation.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<(), OperationError>;
}

/// Drives the function backend.
pub struct FunctionLoadGenerator {
    invoker: Option<Box<dyn FunctionInvoker>>,
    functions: Vec<String>,
    inert: Option<InertReason>,
    pacing: Pacing,
}

impl FunctionLoadGenerator {
    /// Build from the registry's function set. `make_invoker` runs only when
    /// there is something to invoke.
    pub fn new<F>(registry: &EndpointRegistry, capable: bool, make_invoker: F) -> Self
    where
        F: FnOnce() -> Box<dyn FunctionInvoker>,
    {
        if !capable {
            return Self::inert(InertReason::CapabilityUnavailable(BackendKind::Function));
        }
        let functions: Vec<String> = registry.function_names().into_iter().collect();
        if functions.is_empty() {
            return Self::inert(InertReason::NoFunctions);
        }
        info!(
            backend = %BackendKind::Function,
            functions = functions.len(),
            region = registry.region().unwrap_or("default"),
            "Function targets discovered"
        );
        Self {
            invoker: Some(make_invoker()),
            functions,
            inert: None,
            pacing: Pacing::default(),
        }
    }

    pub fn inert(reason: InertReason) -> Self {
        warn!(backend = %BackendKind::Function, reason = %reason, "Backend inert");
        Self {
            invoker: None,
            functions: Vec::new(),
            inert: Some(reason),
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Function names this generator targets, sorted.
    pub fn functions(&self) -> &[String] {
        &self.functions
    }
}

#[async_trait]
impl LoadGenerator for FunctionLoadGenerator {
    fn kind(&self) -> BackendKind {
        BackendKind::Function
    }

    fn inert_reason(&self) -> Option<&InertReason> {
        self.inert.as_ref()
    }

    async fn run(&mut self, budget: u64, cancel: CancellationToken) -> BackendResult {
        let Some(invoker) = self.invoker.as_deref() else {
            return match &self.inert {
                Some(reason) => BackendResult::inert(BackendKind::Function, reason),
                None => BackendResult::new(BackendKind::Function),
            };
        };
        let mut result = BackendResult::new(BackendKind::Function);
        let mut rng = task_rng();

        for sequence in 0..budget {
            if cancel.is_cancelled() {
                break;
            }
            let Some(name) = self.functions.choose(&mut rng) else {
                break;
            };
            let outcome = match serde_json::to_vec(&InvocationPayload::new(sequence)) {
                Ok(payload) => invoker.invoke(name, payload).await,
                Err(e) => Err(OperationError::Invoke {
                    message: format!("payload encoding failed: {e}"),
                }),
            };
            match outcome {
                Ok(()) => result.record_success(),
                Err(err) => {
                    debug!(backend = %BackendKind::Function, function = %name, error = %err, "Operation failed");
                    result.record_error(&err);
                }
            }
            if !self.pacing.pause(&mut rng, &cancel).await {
                break;
            }
        }
        result
    }
}
