// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fire-and-forget notification dispatch.
//!
//! Notifications ride an unbounded channel to a worker thread, fully
//! decoupled from the transactional path. Delivery failures are logged and
//! never propagate; a purchase succeeds whether or not anyone hears about
//! it.

use crate::base::AccountId;
use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tracing::{info, warn};

/// An outbound user notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub account_id: AccountId,
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_link: Option<String>,
}

/// Downstream delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Delivery backend (push service, in-app inbox, ...).
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Sink that just logs; the default for the binary and demos.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            account = %notification.account_id,
            kind = %notification.kind,
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}

/// Handle for enqueuing notifications.
///
/// Cloneable; the worker thread exits once every clone is dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Sender<Notification>,
}

impl Notifier {
    /// Starts a worker thread draining into `sink`.
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> Self {
        let (sender, receiver) = channel::unbounded::<Notification>();

        thread::spawn(move || {
            for notification in receiver.iter() {
                if let Err(err) = sink.deliver(&notification) {
                    warn!(
                        account = %notification.account_id,
                        kind = %notification.kind,
                        %err,
                        "notification delivery failed"
                    );
                }
            }
        });

        Self { sender }
    }

    /// Enqueues a notification. Never blocks and never fails the caller.
    pub fn send(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            warn!("notification worker gone, dropping notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::Receiver;
    use std::time::Duration;

    struct ForwardingSink {
        delivered: Sender<Notification>,
    }

    impl NotificationSink for ForwardingSink {
        fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
            self.delivered
                .send(notification.clone())
                .map_err(|e| DeliveryError(e.to_string()))
        }
    }

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn deliver(&self, _notification: &Notification) -> Result<(), DeliveryError> {
            Err(DeliveryError("push service unreachable".to_string()))
        }
    }

    fn sample(account: &str) -> Notification {
        Notification {
            account_id: AccountId::from(account),
            kind: "purchase".to_string(),
            title: "Purchase complete".to_string(),
            message: "You purchased Profile Boost".to_string(),
            action_link: None,
        }
    }

    fn forwarding() -> (Arc<ForwardingSink>, Receiver<Notification>) {
        let (delivered, received) = channel::unbounded();
        (Arc::new(ForwardingSink { delivered }), received)
    }

    #[test]
    fn notifications_reach_the_sink() {
        let (sink, received) = forwarding();
        let notifier = Notifier::spawn(sink);

        notifier.send(sample("acct-1"));

        let delivered = received
            .recv_timeout(Duration::from_secs(5))
            .expect("worker delivers");
        assert_eq!(delivered.account_id, AccountId::from("acct-1"));
        assert_eq!(delivered.kind, "purchase");
    }

    #[test]
    fn delivery_failure_does_not_panic_or_block() {
        let notifier = Notifier::spawn(Arc::new(FailingSink));
        notifier.send(sample("acct-1"));
        notifier.send(sample("acct-2"));
        // Both sends return immediately; failures are swallowed by the worker.
    }

    #[test]
    fn preserves_send_order() {
        let (sink, received) = forwarding();
        let notifier = Notifier::spawn(sink);

        for i in 0..10 {
            notifier.send(sample(&format!("acct-{i}")));
        }
        for i in 0..10 {
            let delivered = received
                .recv_timeout(Duration::from_secs(5))
                .expect("worker delivers");
            assert_eq!(delivered.account_id, AccountId::from(format!("acct-{i}").as_str()));
        }
    }
}
