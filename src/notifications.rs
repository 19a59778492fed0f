//! Best-effort display-notification and telemetry dispatch. Runs off the
//! request's critical path; a failed send is logged and otherwise forgotten.

use crate::delivery::{DeliveryRequest, Notification, Telemetry, TelemetryEntry};
use crate::remote::SharedCaller;

pub struct NotificationDispatcher {
    caller: SharedCaller,
}

impl NotificationDispatcher {
    pub fn new(caller: SharedCaller) -> Self {
        NotificationDispatcher { caller }
    }

    /// Fire-and-forget: spawns the remote call and returns immediately.
    /// Nothing to send is a no-op.
    pub fn dispatch(
        &self,
        mut request: DeliveryRequest,
        notifications: Vec<Notification>,
        telemetry: Vec<TelemetryEntry>,
    ) {
        if notifications.is_empty() && telemetry.is_empty() {
            return;
        }

        request.notifications = notifications;
        if !telemetry.is_empty() {
            request.telemetry = Some(Telemetry { entries: telemetry });
        }

        let caller = self.caller.clone();
        tokio::spawn(async move {
            let count = request.notifications.len();
            if let Err(e) = caller.call(request).await {
                log::warn!("notification dispatch failed ({count} notifications): {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryResponse;
    use crate::errors::DecisioningError;
    use crate::remote::RemoteDeliveryCaller;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    pub(crate) struct RecordingCaller {
        pub calls: Mutex<Vec<DeliveryRequest>>,
    }

    impl RecordingCaller {
        pub fn new() -> Arc<Self> {
            Arc::new(RecordingCaller {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RemoteDeliveryCaller for RecordingCaller {
        async fn call(
            &self,
            request: DeliveryRequest,
        ) -> Result<DeliveryResponse, DecisioningError> {
            self.calls.lock().unwrap().push(request);
            Ok(DeliveryResponse::default())
        }
    }

    fn display_notification(id: &str) -> Notification {
        Notification {
            id: id.to_string(),
            notification_type: "display".to_string(),
            timestamp: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_sends_once() {
        let caller = RecordingCaller::new();
        let dispatcher = NotificationDispatcher::new(caller.clone());

        dispatcher.dispatch(
            DeliveryRequest::default(),
            vec![display_notification("n1")],
            Vec::new(),
        );
        tokio::task::yield_now().await;

        let calls = caller.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].notifications.len(), 1);
        assert_eq!(calls[0].notifications[0].id, "n1");
    }

    #[tokio::test]
    async fn test_empty_dispatch_is_a_no_op() {
        let caller = RecordingCaller::new();
        let dispatcher = NotificationDispatcher::new(caller.clone());

        dispatcher.dispatch(DeliveryRequest::default(), Vec::new(), Vec::new());
        tokio::task::yield_now().await;
        assert!(caller.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_telemetry_rides_along() {
        let caller = RecordingCaller::new();
        let dispatcher = NotificationDispatcher::new(caller.clone());

        dispatcher.dispatch(
            DeliveryRequest::default(),
            Vec::new(),
            vec![TelemetryEntry {
                execution: 3,
                ..Default::default()
            }],
        );
        tokio::task::yield_now().await;

        let calls = caller.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].telemetry.as_ref().unwrap().entries.len(), 1);
    }
}
