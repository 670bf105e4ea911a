use crate::events::Notification;
use std::sync::Arc;
use tracing::{error, info};

/// Delivery of user-facing notifications. Display mechanics live behind this.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: &Notification);
}

/// Shows notifications through the desktop notification daemon. `show()`
/// blocks on D-Bus, so wrap this in [`Offloaded`] inside the runtime.
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn deliver(&self, notification: &Notification) {
        if let Err(e) = notify_rust::Notification::new()
            .summary(notification.title())
            .body(&notification.body())
            .appname("kairos")
            .show()
        {
            error!("Failed to send notification: {}", e);
        }
    }
}

/// Delivers on tokio's blocking pool and returns immediately. Outside a
/// tokio runtime the inner notifier is called inline.
pub struct Offloaded<N> {
    inner: Arc<N>,
}

impl<N: Notifier + 'static> Offloaded<N> {
    pub fn new(inner: N) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<N: Notifier + 'static> Notifier for Offloaded<N> {
    fn deliver(&self, notification: &Notification) {
        let inner = Arc::clone(&self.inner);
        let notification = notification.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || inner.deliver(&notification));
            }
            Err(_) => inner.deliver(&notification),
        }
    }
}

/// Used when desktop notifications are disabled.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, notification: &Notification) {
        info!("{}: {}", notification.title(), notification.body());
    }
}
