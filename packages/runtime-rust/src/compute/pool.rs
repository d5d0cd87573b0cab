//! Fixed-size instance pool.
//!
//! One semaphore permit per instance. Holding a permit guarantees an idle
//! instance is available: an instance goes back on the idle list before its
//! permit is released, and a retired slot forgets its permit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use switchyard_core::StructuredError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{CheckoutError, ComputeError, ComputeInstance, ComputeModule, InstantiationError};
use crate::config::PoolConfig;
use crate::plugin::ManagedPlugin;
use crate::telemetry::POOL_BORROWED;

struct PoolInner<M: ComputeModule> {
    name: String,
    module: M,
    idle: Mutex<Vec<M::Instance>>,
    permits: Arc<Semaphore>,
    size: usize,
    retired: AtomicUsize,
    checkout_timeout: Option<Duration>,
}

impl<M: ComputeModule> PoolInner<M> {
    async fn instantiate(&self) -> Result<M::Instance, InstantiationError> {
        self.module
            .instantiate()
            .await
            .map_err(|source| InstantiationError {
                module: self.name.clone(),
                source,
            })
    }

    /// Refills a slot whose instance failed. The permit is released only
    /// once the new instance is idle.
    async fn replace(&self, permit: OwnedSemaphorePermit) {
        if self.permits.is_closed() {
            return;
        }
        match self.instantiate().await {
            Ok(instance) => {
                self.idle.lock().push(instance);
                drop(permit);
                info!(pool = %self.name, "replaced failed compute instance");
            }
            Err(e) => {
                error!(
                    pool = %self.name,
                    error = %e,
                    cause = %e.source,
                    "could not replace compute instance; retiring its slot"
                );
                self.retire(permit);
            }
        }
    }

    /// Gives up a slot for good. Once every slot is retired the pool is
    /// closed, so waiting and later checkouts fail instead of hanging.
    fn retire(&self, permit: OwnedSemaphorePermit) {
        permit.forget();
        let retired = self.retired.fetch_add(1, Ordering::Relaxed) + 1;
        if retired >= self.size {
            self.permits.close();
            self.idle.lock().clear();
            error!(pool = %self.name, retired, "every compute slot retired; pool closed");
        } else {
            warn!(pool = %self.name, retired, size = self.size, "compute slot retired");
        }
    }
}

/// Bounded pool of interchangeable instances of one [`ComputeModule`].
///
/// Cloning is cheap; clones share the same instances.
pub struct ComputePool<M: ComputeModule> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ComputeModule> Clone for ComputePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ComputeModule> std::fmt::Debug for ComputePool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("name", &self.inner.name)
            .field("size", &self.inner.size)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

impl<M: ComputeModule> ComputePool<M> {
    /// Instantiates every instance up front.
    ///
    /// # Errors
    ///
    /// Returns the first `InstantiationError`; nothing is pooled then.
    pub async fn new(module: M, config: &PoolConfig) -> Result<Self, InstantiationError> {
        let size = config.effective_size();
        let name = module.name().to_string();
        let inner = PoolInner {
            name,
            module,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            size,
            retired: AtomicUsize::new(0),
            checkout_timeout: config.checkout_timeout(),
        };

        let mut instances = Vec::with_capacity(size);
        for _ in 0..size {
            instances.push(inner.instantiate().await?);
        }
        *inner.idle.lock() = instances;

        info!(pool = %inner.name, size, "compute pool ready");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Borrows an idle instance, waiting until one is checked in, the
    /// configured checkout timeout passes, or `cancel` fires.
    ///
    /// # Errors
    ///
    /// `CheckoutError::Canceled`, `TimedOut`, or `Closed` after shutdown.
    pub async fn checkout(&self, cancel: &CancellationToken) -> Result<PooledInstance<M>, CheckoutError> {
        let permits = Arc::clone(&self.inner.permits);
        let timeout = self.inner.checkout_timeout;
        let acquire = async move {
            let acquire = permits.acquire_owned();
            match timeout {
                Some(limit) => tokio::time::timeout(limit, acquire)
                    .await
                    .map_err(|_| CheckoutError::TimedOut)?
                    .map_err(|_| CheckoutError::Closed),
                None => acquire.await.map_err(|_| CheckoutError::Closed),
            }
        };

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CheckoutError::Canceled),
            permit = acquire => permit?,
        };

        let Some(instance) = self.inner.idle.lock().pop() else {
            // Only reachable after shutdown cleared the idle list.
            permit.forget();
            return Err(CheckoutError::Closed);
        };

        metrics::gauge!(POOL_BORROWED, "pool" => self.inner.name.clone()).increment(1.0);
        Ok(PooledInstance {
            instance: Some(instance),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
            poisoned: false,
        })
    }

    /// Checks out an instance, runs one operation, and checks it back in.
    ///
    /// # Errors
    ///
    /// Checkout failures and invocation failures, as structured errors.
    pub async fn invoke(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes, StructuredError> {
        let mut instance = self.checkout(cancel).await?;
        Ok(instance.invoke(operation, payload).await?)
    }

    /// Configured number of instances.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Instances idle right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Slots lost to failed replacements.
    #[must_use]
    pub fn retired(&self) -> usize {
        self.inner.retired.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Closes the pool: waiting and later checkouts fail with
    /// `CheckoutError::Closed`, idle instances are dropped, and borrowed ones
    /// are dropped on check-in.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle.lock().clear();
        info!(pool = %self.inner.name, "compute pool closed");
    }
}

#[async_trait]
impl<M: ComputeModule> ManagedPlugin for ComputePool<M> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.close();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PooledInstance
// ---------------------------------------------------------------------------

/// A borrowed instance. Dropping it checks the instance back in, or replaces
/// it if an invocation reported a fatal failure.
pub struct PooledInstance<M: ComputeModule> {
    instance: Option<M::Instance>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<M>>,
    poisoned: bool,
}

impl<M: ComputeModule> PooledInstance<M> {
    /// Runs one operation on the borrowed instance.
    ///
    /// # Errors
    ///
    /// Whatever the instance reports. A fatal error marks the instance for
    /// replacement.
    pub async fn invoke(&mut self, operation: &str, payload: Bytes) -> Result<Bytes, ComputeError> {
        let Some(instance) = self.instance.as_mut() else {
            return Err(ComputeError::Fatal(anyhow::anyhow!("instance already checked in")));
        };
        let result = instance.invoke(operation, payload).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(pool = %self.pool.name, operation, error = %e, "compute instance failed");
                self.poisoned = true;
            }
        }
        result
    }

    /// Whether the instance will be replaced instead of reused.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl<M: ComputeModule> Drop for PooledInstance<M> {
    fn drop(&mut self) {
        metrics::gauge!(POOL_BORROWED, "pool" => self.pool.name.clone()).decrement(1.0);
        let (Some(instance), Some(permit)) = (self.instance.take(), self.permit.take()) else {
            return;
        };

        if self.pool.permits.is_closed() {
            return;
        }
        if !self.poisoned {
            self.pool.idle.lock().push(instance);
            drop(permit);
            return;
        }

        drop(instance);
        let pool = Arc::clone(&self.pool);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { pool.replace(permit).await });
            }
            Err(_) => {
                error!(pool = %pool.name, "no runtime to replace failed compute instance; retiring its slot");
                pool.retire(permit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use switchyard_core::ErrCode;

    use super::*;

    /// Echoes payloads; `"trap"` fails fatally, `"reject"` fails with an
    /// application error.
    struct Echo {
        created: Arc<AtomicUsize>,
        fail_instantiate: Arc<AtomicBool>,
    }

    impl Echo {
        fn new() -> Self {
            Self {
                created: Arc::new(AtomicUsize::new(0)),
                fail_instantiate: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    struct EchoInstance {
        id: usize,
    }

    #[async_trait]
    impl ComputeModule for Echo {
        type Instance = EchoInstance;

        fn name(&self) -> &str {
            "echo"
        }

        async fn instantiate(&self) -> anyhow::Result<EchoInstance> {
            if self.fail_instantiate.load(Ordering::SeqCst) {
                anyhow::bail!("module failed to link");
            }
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(EchoInstance { id })
        }
    }

    #[async_trait]
    impl ComputeInstance for EchoInstance {
        async fn invoke(&mut self, operation: &str, payload: Bytes) -> Result<Bytes, ComputeError> {
            match operation {
                "trap" => Err(ComputeError::Fatal(anyhow::anyhow!("trap"))),
                "reject" => Err(StructuredError::new(ErrCode::InvalidArgument, "rejected").into()),
                "id" => Ok(Bytes::from(self.id.to_string())),
                _ => Ok(payload),
            }
        }
    }

    fn config(size: usize) -> PoolConfig {
        PoolConfig {
            size: Some(size),
            checkout_timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn instantiates_size_instances_up_front() {
        let module = Echo::new();
        let created = Arc::clone(&module.created);
        let pool = ComputePool::new(module, &config(3)).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn instantiation_failure_is_reported() {
        let module = Echo::new();
        module.fail_instantiate.store(true, Ordering::SeqCst);
        let err = ComputePool::new(module, &config(2)).await.unwrap_err();
        assert_eq!(err.module, "echo");
        assert_eq!(StructuredError::from(err).code, ErrCode::Internal);
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_blocks_at_capacity_until_checkin() {
        let pool = ComputePool::new(Echo::new(), &config(2)).await.unwrap();
        let cancel = CancellationToken::new();

        let a = pool.checkout(&cancel).await.unwrap();
        let _b = pool.checkout(&cancel).await.unwrap();
        assert_eq!(pool.available(), 0);

        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.checkout(&cancel).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(a);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_a_waiting_checkout() {
        let pool = ComputePool::new(Echo::new(), &config(1)).await.unwrap();
        let _held = pool.checkout(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.checkout(&cancel).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(CheckoutError::Canceled));
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn checkout_timeout_applies() {
        let cfg = PoolConfig {
            size: Some(1),
            checkout_timeout_ms: Some(100),
        };
        let pool = ComputePool::new(Echo::new(), &cfg).await.unwrap();
        let cancel = CancellationToken::new();
        let _held = pool.checkout(&cancel).await.unwrap();

        let err = pool.checkout(&cancel).await.map(|_| ()).unwrap_err();
        assert_eq!(err, CheckoutError::TimedOut);
    }

    #[tokio::test]
    async fn application_error_keeps_instance() {
        let module = Echo::new();
        let created = Arc::clone(&module.created);
        let pool = ComputePool::new(module, &config(1)).await.unwrap();
        let cancel = CancellationToken::new();

        let err = pool.invoke(&cancel, "reject", Bytes::new()).await.unwrap_err();
        assert_eq!(err.code, ErrCode::InvalidArgument);

        let id = pool.invoke(&cancel, "id", Bytes::new()).await.unwrap();
        assert_eq!(id, Bytes::from("0"));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_failure_replaces_instance() {
        let module = Echo::new();
        let created = Arc::clone(&module.created);
        let pool = ComputePool::new(module, &config(1)).await.unwrap();
        let cancel = CancellationToken::new();

        let err = pool.invoke(&cancel, "trap", Bytes::new()).await.unwrap_err();
        assert_eq!(err.code, ErrCode::Internal);

        // The replacement is created off the check-in path; the next checkout
        // waits for it.
        let id = pool.invoke(&cancel, "id", Bytes::new()).await.unwrap();
        assert_eq!(id, Bytes::from("1"));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.retired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_replacement_retires_slot() {
        let module = Echo::new();
        let fail = Arc::clone(&module.fail_instantiate);
        let pool = ComputePool::new(module, &config(2)).await.unwrap();
        let cancel = CancellationToken::new();

        fail.store(true, Ordering::SeqCst);
        let _ = pool.invoke(&cancel, "trap", Bytes::new()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(pool.retired(), 1);
        assert_eq!(pool.available(), 1);
        assert_eq!(
            pool.invoke(&cancel, "echo", Bytes::from("x")).await.unwrap(),
            Bytes::from("x")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retiring_every_slot_closes_pool() {
        let module = Echo::new();
        let fail = Arc::clone(&module.fail_instantiate);
        let pool = ComputePool::new(module, &config(1)).await.unwrap();
        let cancel = CancellationToken::new();

        fail.store(true, Ordering::SeqCst);
        let _ = pool.invoke(&cancel, "trap", Bytes::new()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(pool.retired(), 1);
        assert!(pool.is_closed());
        let err = tokio::time::timeout(Duration::from_secs(1), pool.checkout(&cancel))
            .await
            .expect("checkout on a fully retired pool must not hang")
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, CheckoutError::Closed);
    }

    #[tokio::test]
    async fn shutdown_closes_pool() {
        let pool = ComputePool::new(Echo::new(), &config(1)).await.unwrap();
        let borrowed = pool.checkout(&CancellationToken::new()).await.unwrap();

        ManagedPlugin::shutdown(&pool).await.unwrap();
        assert!(pool.is_closed());
        drop(borrowed);

        let err = pool.checkout(&CancellationToken::new()).await.map(|_| ()).unwrap_err();
        assert_eq!(err, CheckoutError::Closed);
    }
}
