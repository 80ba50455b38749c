use tokio::sync::watch;

/// Create a linked stop handle and listener for a single virtual user.
pub fn vu_stop_signal() -> (VuStopHandle, VuStopListener) {
    let (sender, receiver) = watch::channel(false);
    (VuStopHandle { sender }, VuStopListener { receiver })
}

/// Held by the scheduler to retire one virtual user.
#[derive(Debug)]
pub struct VuStopHandle {
    sender: watch::Sender<bool>,
}

impl VuStopHandle {
    /// Ask the virtual user to stop. It will finish its current iteration first.
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    /// Withdraw a stop request. A virtual user that has not yet reached the end of its iteration
    /// carries on as if it was never asked to stop.
    pub fn resume(&self) {
        self.sender.send_replace(false);
    }
}

/// Held by the virtual user, checked at iteration boundaries.
#[derive(Debug, Clone)]
pub struct VuStopListener {
    receiver: watch::Receiver<bool>,
}

impl VuStopListener {
    /// Point in time check. A dropped handle counts as a stop request, nothing can retire the
    /// virtual user any more.
    pub fn should_stop(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&mut self) {
        // An error means the handle was dropped, which is treated the same as a stop.
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}
