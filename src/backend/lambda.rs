//! AWS Lambda adapter for the function generator.

use async_trait::async_trait;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use tokio::sync::OnceCell;

use super::function::FunctionInvoker;
use crate::error::OperationError;

/// Event-type invoker bound to one region.
///
/// The SDK client is built on the first invocation.
pub struct LambdaInvoker {
    region: Option<String>,
    client: OnceCell<aws_sdk_lambda::Client>,
}

impl LambdaInvoker {
    pub fn new(region: Option<String>) -> Self {
        Self {
            region,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &aws_sdk_lambda::Client {
        self.client
            .get_or_init(|| async {
                let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
                if let Some(region) = &self.region {
                    loader = loader.region(aws_config::Region::new(region.clone()));
                }
                aws_sdk_lambda::Client::new(&loader.load().await)
            })
            .await
    }
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    async fn invoke(&self, function_name: &str, payload: Vec<u8>) -> Result<(), OperationError> {
        let output = self
            .client()
            .await
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| OperationError::Invoke {
                message: DisplayErrorContext(&e).to_string(),
            })?;

        // Event invocations are accepted with 202.
        match output.status_code() {
            200..=299 => Ok(()),
            status => Err(OperationError::Invoke {
                message: format!("unexpected status {status}"),
            }),
        }
    }
}
