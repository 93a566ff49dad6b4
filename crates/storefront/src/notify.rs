//! Buyer-facing notifications raised by checkout.
//!
//! The storefront never prints; it hands notices to a [`Notifier`] and the
//! front end decides how to show them.

use std::sync::Mutex;

/// A notice for the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Success(String),
    Error(String),
    /// Payment approved; show the order confirmation.
    OrderCompleted { order_number: String },
    /// Send the buyer to a hosted payment page.
    Redirect { url: String },
}

/// Sink for buyer notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Info(message) => tracing::info!(%message, "notice"),
            Notice::Success(message) => tracing::info!(%message, "success notice"),
            Notice::Error(message) => tracing::warn!(%message, "error notice"),
            Notice::OrderCompleted { order_number } => {
                tracing::info!(%order_number, "order completed");
            }
            Notice::Redirect { url } => tracing::info!(%url, "redirect to hosted payment"),
        }
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notice received so far.
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|notices| notices.clone())
            .unwrap_or_default()
    }

    /// How many notices matched `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Notice) -> bool) -> usize {
        self.notices().iter().filter(|n| predicate(n)).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_counts() {
        let notifier = RecordingNotifier::new();
        notifier.notify(Notice::Info("Calculando frete".to_string()));
        notifier.notify(Notice::OrderCompleted {
            order_number: "VT-1".to_string(),
        });
        assert_eq!(notifier.notices().len(), 2);
        assert_eq!(
            notifier.count(|n| matches!(n, Notice::OrderCompleted { .. })),
            1
        );
    }
}
