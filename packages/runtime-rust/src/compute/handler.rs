use async_trait::async_trait;
use bytes::Bytes;
use switchyard_core::StructuredError;

use super::{ComputeModule, ComputePool};
use crate::invoke::{Handler, InvocationContext};

/// Routes invocations to a compute pool. The receiver's operation name is
/// passed to the instance; the payload stays opaque.
#[derive(Debug)]
pub struct ComputeHandler<M: ComputeModule> {
    pool: ComputePool<M>,
}

impl<M: ComputeModule> Clone for ComputeHandler<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<M: ComputeModule> ComputeHandler<M> {
    #[must_use]
    pub fn new(pool: ComputePool<M>) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &ComputePool<M> {
        &self.pool
    }
}

#[async_trait]
impl<M: ComputeModule> Handler for ComputeHandler<M> {
    async fn call(&self, ctx: InvocationContext, payload: Bytes) -> Result<Bytes, StructuredError> {
        self.pool
            .invoke(&ctx.cancel, ctx.receiver.operation(), payload)
            .await
            .map_err(|e| e.with_metadata("call_id", ctx.call_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{ErrCode, Receiver};

    use super::*;
    use crate::compute::{ComputeError, ComputeInstance};
    use crate::config::PoolConfig;

    struct Upper;
    struct UpperInstance;

    #[async_trait]
    impl ComputeModule for Upper {
        type Instance = UpperInstance;

        fn name(&self) -> &str {
            "upper"
        }

        async fn instantiate(&self) -> anyhow::Result<UpperInstance> {
            Ok(UpperInstance)
        }
    }

    #[async_trait]
    impl ComputeInstance for UpperInstance {
        async fn invoke(&mut self, operation: &str, payload: Bytes) -> Result<Bytes, ComputeError> {
            match operation {
                "upper" => Ok(Bytes::from(
                    String::from_utf8_lossy(&payload).to_uppercase(),
                )),
                other => Err(StructuredError::new(ErrCode::Unimplemented, format!("no export {other}")).into()),
            }
        }
    }

    async fn handler() -> ComputeHandler<Upper> {
        let config = PoolConfig {
            size: Some(1),
            checkout_timeout_ms: None,
        };
        ComputeHandler::new(ComputePool::new(Upper, &config).await.unwrap())
    }

    #[tokio::test]
    async fn passes_operation_and_payload() {
        let handler = handler().await;
        let ctx = InvocationContext::new(Receiver::new("text.v1", "upper"));
        let out = handler.call(ctx, Bytes::from("abc")).await.unwrap();
        assert_eq!(out, Bytes::from("ABC"));
        assert_eq!(handler.pool().available(), 1);
    }

    #[tokio::test]
    async fn canceled_context_fails_checkout() {
        let handler = handler().await;
        let _held = handler
            .pool()
            .checkout(&tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();

        let ctx = InvocationContext::new(Receiver::new("text.v1", "upper"));
        ctx.cancel.cancel();
        let err = handler.call(ctx, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code, ErrCode::Canceled);
    }

    #[tokio::test]
    async fn application_errors_are_returned() {
        let handler = handler().await;
        let ctx = InvocationContext::new(Receiver::new("text.v1", "lower"));
        let err = handler.call(ctx, Bytes::new()).await.unwrap_err();
        assert_eq!(err.code, ErrCode::Unimplemented);
        assert!(err.metadata.contains_key("call_id"));
    }
}
