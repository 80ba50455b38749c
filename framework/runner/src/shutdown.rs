use tokio::signal;

pub use surge_core::prelude::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};

/// Trigger a graceful shutdown of the run when the operator presses Ctrl-C.
pub(crate) fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<ShutdownHandle> {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C, the run can only end on its own: {e:?}");
            return;
        }
        println!("Received shutdown signal, waiting for virtual users to finish their iteration...");
        listener_handle.shutdown();
    });

    Ok(handle)
}
