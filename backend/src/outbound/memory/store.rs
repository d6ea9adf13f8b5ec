//! Mutex-guarded store implementing the persistence ports.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::ports::{
    ClaimOutcome, LedgerError, NotificationLedger, OutboxRepository, OutboxRepositoryError,
    ProductRepository, ProductRepositoryError, UserStore, UserStoreError,
};
use crate::domain::{
    EmailAddress, EventId, NewOutboxEntry, NewUser, OutboxEntry, Product, ProductId, User,
    ValidationToken,
};

#[derive(Default)]
struct StoreState {
    users: Vec<NewUser>,
    outbox: Vec<OutboxEntry>,
    processed: Vec<(EventId, String)>,
    tokens: Vec<ValidationToken>,
    products: Vec<Product>,
}

/// Shared in-memory backing for every persistence port.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, String> {
        self.state
            .lock()
            .map_err(|_| "in-memory store lock poisoned".to_owned())
    }

    fn snapshot<T>(&self, read: impl FnOnce(&StoreState) -> T) -> T {
        match self.state.lock() {
            Ok(state) => read(&state),
            Err(poisoned) => read(&poisoned.into_inner()),
        }
    }

    /// Append an outbox entry outside of a user write.
    pub fn enqueue(&self, entry: NewOutboxEntry) {
        match self.state.lock() {
            Ok(mut state) => state.outbox.push(OutboxEntry::from_new(entry)),
            Err(poisoned) => poisoned.into_inner().outbox.push(OutboxEntry::from_new(entry)),
        }
    }

    /// Every outbox entry in insertion order.
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.snapshot(|state| state.outbox.clone())
    }

    /// Every stored validation token.
    pub fn validation_tokens(&self) -> Vec<ValidationToken> {
        self.snapshot(|state| state.tokens.clone())
    }

    /// Event ids recorded in the processed-event ledger.
    pub fn processed_events(&self) -> Vec<EventId> {
        self.snapshot(|state| state.processed.iter().map(|(id, _)| *id).collect())
    }

    /// Number of stored users.
    pub fn user_count(&self) -> usize {
        self.snapshot(|state| state.users.len())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user_with_outbox(
        &self,
        user: &NewUser,
        entry: &NewOutboxEntry,
    ) -> Result<User, UserStoreError> {
        let mut state = self.lock().map_err(UserStoreError::query)?;
        if state.users.iter().any(|existing| existing.email == user.email) {
            return Err(UserStoreError::duplicate_email(user.email.to_string()));
        }
        state.users.push(user.clone());
        state.outbox.push(OutboxEntry::from_new(entry.clone()));
        Ok(user.to_user())
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, UserStoreError> {
        let state = self.lock().map_err(UserStoreError::query)?;
        Ok(state
            .users
            .iter()
            .find(|user| &user.email == email)
            .map(NewUser::to_user))
    }

    async fn exists_by_email(&self, email: &EmailAddress) -> Result<bool, UserStoreError> {
        let state = self.lock().map_err(UserStoreError::query)?;
        Ok(state.users.iter().any(|user| &user.email == email))
    }

    async fn list_users(&self) -> Result<Vec<User>, UserStoreError> {
        let state = self.lock().map_err(UserStoreError::query)?;
        Ok(state.users.iter().map(NewUser::to_user).collect())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn fetch_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, OutboxRepositoryError> {
        let state = self.lock().map_err(OutboxRepositoryError::query)?;
        // The oldest pending entry of an aggregate gates the rest of it.
        let mut gated: HashSet<Uuid> = HashSet::new();
        let mut due: Vec<(usize, &OutboxEntry)> = state
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_pending() && gated.insert(entry.aggregate_id))
            .filter(|(_, entry)| entry.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|(index, entry)| (entry.created_at, *index));
        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn mark_published(
        &self,
        id: EventId,
        at: DateTime<Utc>,
    ) -> Result<bool, OutboxRepositoryError> {
        let mut state = self.lock().map_err(OutboxRepositoryError::query)?;
        let Some(entry) = state
            .outbox
            .iter_mut()
            .find(|entry| entry.id == id && entry.published_at.is_none())
        else {
            return Ok(false);
        };
        entry.published_at = Some(at);
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: EventId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxRepositoryError> {
        let mut state = self.lock().map_err(OutboxRepositoryError::query)?;
        if let Some(entry) = state.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.attempts = attempts;
            entry.next_attempt_at = next_attempt_at;
            entry.last_error = Some(error.to_owned());
        }
        Ok(())
    }

    async fn mark_dead_lettered(
        &self,
        id: EventId,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), OutboxRepositoryError> {
        let mut state = self.lock().map_err(OutboxRepositoryError::query)?;
        if let Some(entry) = state.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.attempts = entry.attempts.saturating_add(1);
            entry.dead_lettered_at = Some(at);
            entry.last_error = Some(error.to_owned());
        }
        Ok(())
    }

    async fn list_dead_lettered(
        &self,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, OutboxRepositoryError> {
        let state = self.lock().map_err(OutboxRepositoryError::query)?;
        let mut dead: Vec<OutboxEntry> = state
            .outbox
            .iter()
            .filter(|entry| entry.dead_lettered_at.is_some())
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.dead_lettered_at.cmp(&a.dead_lettered_at));
        dead.truncate(limit);
        Ok(dead)
    }

    async fn purge_published_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, OutboxRepositoryError> {
        let mut state = self.lock().map_err(OutboxRepositoryError::query)?;
        let before = state.outbox.len();
        state
            .outbox
            .retain(|entry| !entry.published_at.is_some_and(|at| at < cutoff));
        Ok(u64::try_from(before - state.outbox.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl NotificationLedger for InMemoryStore {
    async fn claim(
        &self,
        event_id: EventId,
        event_type: &str,
        token: &ValidationToken,
    ) -> Result<ClaimOutcome, LedgerError> {
        let mut state = self.lock().map_err(LedgerError::query)?;
        if state.processed.iter().any(|(id, _)| *id == event_id) {
            return Ok(ClaimOutcome::AlreadyProcessed);
        }
        if state.tokens.iter().any(|stored| stored.token == token.token) {
            return Err(LedgerError::query("validation token collision"));
        }
        state.processed.push((event_id, event_type.to_owned()));
        state.tokens.push(token.clone());
        Ok(ClaimOutcome::Claimed)
    }

    async fn release(&self, event_id: EventId) -> Result<(), LedgerError> {
        let mut state = self.lock().map_err(LedgerError::query)?;
        state.processed.retain(|(id, _)| *id != event_id);
        state.tokens.retain(|token| token.event_id != event_id);
        Ok(())
    }
}

fn sorted_by_name(mut products: Vec<Product>) -> Vec<Product> {
    products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    products
}

#[async_trait]
impl ProductRepository for InMemoryStore {
    async fn list_all(&self) -> Result<Vec<Product>, ProductRepositoryError> {
        let state = self.lock().map_err(ProductRepositoryError::query)?;
        Ok(sorted_by_name(state.products.clone()))
    }

    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, ProductRepositoryError> {
        let state = self.lock().map_err(ProductRepositoryError::query)?;
        Ok(state.products.iter().find(|product| product.id == id).cloned())
    }

    async fn find_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Product>, ProductRepositoryError> {
        let state = self.lock().map_err(ProductRepositoryError::query)?;
        Ok(sorted_by_name(
            state
                .products
                .iter()
                .filter(|product| product.category.eq_ignore_ascii_case(category))
                .cloned()
                .collect(),
        ))
    }

    async fn search_by_name(&self, fragment: &str) -> Result<Vec<Product>, ProductRepositoryError> {
        let needle = fragment.to_lowercase();
        let state = self.lock().map_err(ProductRepositoryError::query)?;
        Ok(sorted_by_name(
            state
                .products
                .iter()
                .filter(|product| product.name.to_lowercase().contains(&needle))
                .cloned()
                .collect(),
        ))
    }

    async fn save(&self, product: &Product) -> Result<(), ProductRepositoryError> {
        let mut state = self.lock().map_err(ProductRepositoryError::query)?;
        match state.products.iter_mut().find(|stored| stored.id == product.id) {
            Some(stored) => *stored = product.clone(),
            None => state.products.push(product.clone()),
        }
        Ok(())
    }

    async fn delete(&self, id: ProductId) -> Result<bool, ProductRepositoryError> {
        let mut state = self.lock().map_err(ProductRepositoryError::query)?;
        let before = state.products.len();
        state.products.retain(|product| product.id != id);
        Ok(state.products.len() != before)
    }
}
