//! In-memory webhook event store.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::foundation::{DomainError, ErrorCode, Timestamp};
use crate::domain::webhook::{ClaimResult, WebhookEvent};
use crate::ports::WebhookEventRepository;

type EventKey = (String, String);

/// Claims are decided under one mutex, standing in for the unique index.
#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    events: Mutex<HashMap<EventKey, WebhookEvent>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.events.lock().await.len()
    }
}

fn key(gateway_id: &str, event_id: &str) -> EventKey {
    (gateway_id.to_string(), event_id.to_string())
}

fn not_found() -> DomainError {
    DomainError::new(ErrorCode::WebhookEventNotFound, "Webhook event not found")
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn claim(
        &self,
        event: &WebhookEvent,
        lease: Duration,
        now: Timestamp,
    ) -> Result<ClaimResult, DomainError> {
        let mut events = self.events.lock().await;
        let existing = match events.entry(key(&event.gateway_id, &event.event_id)) {
            Entry::Vacant(slot) => {
                let mut stored = event.clone();
                stored.claimed_at = Some(now);
                slot.insert(stored);
                return Ok(ClaimResult::Claimed);
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if existing.processed {
            return Ok(ClaimResult::AlreadyProcessed);
        }
        match existing.claimed_at {
            Some(claimed_at) if now.duration_since(&claimed_at) < lease => {
                Ok(ClaimResult::InFlight)
            }
            _ => {
                existing.claimed_at = Some(now);
                Ok(ClaimResult::Claimed)
            }
        }
    }

    async fn mark_processed(
        &self,
        gateway_id: &str,
        event_id: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let mut events = self.events.lock().await;
        let event = events.get_mut(&key(gateway_id, event_id)).ok_or_else(not_found)?;
        event.processed = true;
        event.processed_at = Some(now);
        event.claimed_at = None;
        event.last_error = note.map(str::to_string);
        Ok(())
    }

    async fn release(
        &self,
        gateway_id: &str,
        event_id: &str,
        error: &str,
    ) -> Result<(), DomainError> {
        let mut events = self.events.lock().await;
        let event = events.get_mut(&key(gateway_id, event_id)).ok_or_else(not_found)?;
        event.claimed_at = None;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn find(
        &self,
        gateway_id: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, DomainError> {
        Ok(self.events.lock().await.get(&key(gateway_id, event_id)).cloned())
    }

    async fn purge_processed_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|_, e| !(e.processed && e.created_at < cutoff));
        Ok((before - events.len()) as u64)
    }
}
