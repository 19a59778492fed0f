//! Cluster locator: learns, once per process, which delivery node the
//! client's traffic should stick to. The hint is baked into generated
//! visitor ids so the remote service routes follow-up calls to the same
//! node.

use crate::delivery::DeliveryRequest;
use crate::remote::SharedCaller;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

const MAX_ATTEMPTS: u32 = 10;
const RETRY_STEP: Duration = Duration::from_secs(5);

/// A visitor id carries the hint as a `.{hint}_0` suffix.
pub fn location_hint_to_node_details(hint: &str) -> String {
    format!("{hint}_0")
}

/// Pull the cluster hint out of a server-assigned visitor id.
pub fn hint_from_tnt_id(tnt_id: &str) -> Option<String> {
    let (_, suffix) = tnt_id.split_once('.')?;
    let hint = suffix.split('_').next().unwrap_or(suffix);
    (!hint.is_empty()).then(|| hint.to_string())
}

#[derive(Default)]
pub struct ClusterLocator {
    hint: Arc<RwLock<Option<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterLocator {
    pub fn new() -> Self {
        ClusterLocator::default()
    }

    pub fn location_hint(&self) -> Option<String> {
        self.hint.read().unwrap().clone()
    }

    /// Begin hint discovery in the background: one lightweight delivery call,
    /// retried with a linearly increasing delay up to a bounded attempt
    /// count. Idempotent while a discovery task is running.
    pub fn start(&self, caller: SharedCaller) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let hint = Arc::clone(&self.hint);
        *task = Some(tokio::spawn(async move {
            for attempt in 1..=MAX_ATTEMPTS {
                match caller.call(DeliveryRequest::default()).await {
                    Ok(response) => {
                        let discovered = response
                            .id
                            .as_ref()
                            .and_then(|id| id.tnt_id.as_deref())
                            .and_then(hint_from_tnt_id);
                        if let Some(discovered) = discovered {
                            log::debug!("cluster hint discovered: {discovered}");
                            *hint.write().unwrap() = Some(discovered);
                            return;
                        }
                        log::debug!("cluster discovery response carried no hint");
                        return;
                    }
                    Err(e) => {
                        log::debug!("cluster discovery attempt {attempt} failed: {e}");
                        tokio::time::sleep(RETRY_STEP * attempt).await;
                    }
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
