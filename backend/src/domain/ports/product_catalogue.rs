//! Driving port for the product catalogue.

use async_trait::async_trait;

use crate::domain::{Error, Product, ProductDraft, ProductId};

/// Domain use-case port for catalogue maintenance and lookup.
#[async_trait]
pub trait ProductCatalogue: Send + Sync {
    /// Every product.
    async fn list_all(&self) -> Result<Vec<Product>, Error>;

    /// Validate and store a new product.
    async fn create(&self, draft: ProductDraft) -> Result<Product, Error>;

    /// One product; `NotFound` when absent.
    async fn get(&self, id: ProductId) -> Result<Product, Error>;

    /// Products in a category; `NotFound` when there are none.
    async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, Error>;

    /// Products whose name contains `fragment`; `NotFound` when none match.
    async fn search_by_name(&self, fragment: &str) -> Result<Vec<Product>, Error>;

    /// Flip the `active` flag.
    async fn toggle_active(&self, id: ProductId) -> Result<Product, Error>;

    /// Remove a product. Deleting an absent product succeeds.
    async fn delete(&self, id: ProductId) -> Result<(), Error>;

    /// Add `delta` (possibly negative) to the stock level.
    async fn adjust_stock(&self, id: ProductId, delta: i32) -> Result<Product, Error>;
}
