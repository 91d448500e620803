//! Mock relay for testing
//!
//! Records every delivery and origin deletion, and can be told to fail.

use super::traits::*;
use crate::store::RelayTarget;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock relay for testing
#[derive(Clone, Default)]
pub struct MockRelay {
    state: Arc<Mutex<MockRelayState>>,
}

#[derive(Default)]
struct MockRelayState {
    deliveries: Vec<MockDelivery>,
    deletions: Vec<String>,
    attempts: u32,
    /// Status codes returned by the next deliveries, in order
    scripted_failures: Vec<u16>,
    always_fail: Option<u16>,
    fail_deletes: bool,
    latency: Duration,
    next_remote_id: u64,
}

/// A successful delivery, as seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct MockDelivery {
    pub target_id: String,
    pub body: serde_json::Value,
}

impl MockRelay {
    /// Create new mock relay
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockRelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next delivery attempts with the given status codes
    pub fn fail_next(&self, codes: &[u16]) {
        let mut state = self.lock();
        state.scripted_failures.extend(codes.iter().rev());
    }

    /// Fail every delivery with `code` until `recover` is called
    pub fn fail_always(&self, code: u16) {
        self.lock().always_fail = Some(code);
    }

    pub fn recover(&self) {
        let mut state = self.lock();
        state.always_fail = None;
        state.scripted_failures.clear();
    }

    pub fn fail_deletes(&self) {
        self.lock().fail_deletes = true;
    }

    /// Delay each delivery, to widen race windows in concurrency tests
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Successful deliveries for assertions
    pub fn deliveries(&self) -> Vec<MockDelivery> {
        self.lock().deliveries.clone()
    }

    /// Delivery attempts started, failed and abandoned ones included
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Origin urls deleted so far
    pub fn deletions(&self) -> Vec<String> {
        self.lock().deletions.clone()
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn deliver(
        &self,
        message: &RenderedMessage,
        target: &RelayTarget,
    ) -> RelayResult<DeliveryReceipt> {
        let latency = {
            let mut state = self.lock();
            state.attempts += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();

        if let Some(code) = state.scripted_failures.pop().or(state.always_fail) {
            return Err(RelayError::Status {
                code,
                body: "mock failure".to_string(),
            });
        }

        state.deliveries.push(MockDelivery {
            target_id: target.id.clone(),
            body: message.0.clone(),
        });
        state.next_remote_id += 1;
        Ok(DeliveryReceipt {
            status: 200,
            remote_id: Some(state.next_remote_id.to_string()),
        })
    }

    async fn delete_origin(&self, origin: &OriginResponse) -> RelayResult<()> {
        let mut state = self.lock();
        if state.fail_deletes {
            return Err(RelayError::Unavailable("mock delete failure".to_string()));
        }
        state.deletions.push(origin.url.clone());
        Ok(())
    }
}
