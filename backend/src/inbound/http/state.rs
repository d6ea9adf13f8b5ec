//! Shared HTTP adapter state.
//!
//! Handlers accept this state via `actix_web::web::Data` so they only depend
//! on domain ports and remain testable without I/O.

use std::sync::Arc;

use crate::domain::ports::{OutboxRepository, ProductCatalogue, UserRegistration};

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Registration use case.
    pub registration: Arc<dyn UserRegistration>,
    /// Product catalogue use case.
    pub catalogue: Arc<dyn ProductCatalogue>,
    /// Read-only operator view of the outbox.
    pub outbox: Arc<dyn OutboxRepository>,
}

impl HttpState {
    /// Bundle the use cases and the outbox view.
    pub fn new(
        registration: Arc<dyn UserRegistration>,
        catalogue: Arc<dyn ProductCatalogue>,
        outbox: Arc<dyn OutboxRepository>,
    ) -> Self {
        Self {
            registration,
            catalogue,
            outbox,
        }
    }
}
