use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{EventQueue, QueueError, QueueMessage, MAX_RECEIVE_BATCH};

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<(u64, String)>,
    in_flight: HashMap<String, (u64, String)>,
    next_id: u64,
}

/// In-memory queue for tests and single-process mode.
///
/// Messages move to an in-flight set on receive; [`InMemoryEventQueue::redeliver`]
/// pushes them back, modeling a visibility timeout expiring.
#[derive(Debug, Default)]
pub struct InMemoryEventQueue {
    state: Mutex<State>,
}

impl InMemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requeue all in-flight messages (test support).
    pub fn redeliver(&self) {
        if let Ok(mut state) = self.state.lock() {
            let mut redelivered: Vec<(u64, String)> = state.in_flight.drain().map(|(_, m)| m).collect();
            redelivered.sort_by_key(|(id, _)| *id);
            for message in redelivered {
                state.pending.push_back(message);
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn publish(&self, body: String) -> Result<(), QueueError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::Other("lock poisoned".to_string()))?;
        let id = state.next_id;
        state.next_id += 1;
        state.pending.push_back((id, body));
        Ok(())
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::Other("lock poisoned".to_string()))?;

        let mut messages = Vec::new();
        while messages.len() < max.min(MAX_RECEIVE_BATCH) {
            let Some((id, body)) = state.pending.pop_front() else {
                break;
            };
            let receipt = format!("receipt-{id}");
            state.in_flight.insert(receipt.clone(), (id, body.clone()));
            messages.push(QueueMessage { receipt, body });
        }

        Ok(messages)
    }

    async fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| QueueError::Other("lock poisoned".to_string()))?;
        state.in_flight.remove(receipt);
        Ok(())
    }
}
