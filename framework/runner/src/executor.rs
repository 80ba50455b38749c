use std::future::Future;

use tokio::task::JoinHandle;

use crate::shutdown::{ShutdownHandle, ShutdownSignalError};

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    shutdown_handle: ShutdownHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, shutdown_handle: ShutdownHandle) -> Self {
        Self {
            runtime,
            shutdown_handle,
        }
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// Note that the future will be cancelled if the runner is shutdown. You do not need to do anything
    /// special to handle this, but you should be aware that submitting a future which does not support
    /// cancelling may prevent the runner from shutting down.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut shutdown_listener = self.shutdown_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = shutdown_listener.wait_for_shutdown() => {
                    Err(anyhow::anyhow!(ShutdownSignalError::default()))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// Note that the future will not be cancelled if the runner is shutdown. It is also not guaranteed
    /// that the runner will wait for the future to complete before shutting down.
    pub fn spawn<T: Send + 'static>(
        &self,
        fut: impl Future<Output = T> + Send + 'static,
    ) -> JoinHandle<T> {
        self.runtime.spawn(fut)
    }

    /// Drive a future to completion without watching for shutdown. Used for the scheduler, which
    /// handles shutdown itself so that virtual users are drained rather than dropped.
    pub(crate) fn block_on<T>(&self, fut: impl Future<Output = T>) -> T {
        self.runtime.block_on(fut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> (Executor, ShutdownHandle) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let shutdown_handle = ShutdownHandle::new();
        (Executor::new(runtime, shutdown_handle.clone()), shutdown_handle)
    }

    #[test]
    fn execute_in_place_returns_result() {
        let (executor, _) = executor();

        let value = executor.execute_in_place(async { Ok(5) }).unwrap();
        assert_eq!(5, value);
    }

    #[test]
    fn execute_in_place_is_cancelled_by_shutdown() {
        let (executor, shutdown_handle) = executor();
        shutdown_handle.shutdown();

        let result = executor.execute_in_place(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(())
        });

        assert!(result.unwrap_err().is::<ShutdownSignalError>());
    }
}
