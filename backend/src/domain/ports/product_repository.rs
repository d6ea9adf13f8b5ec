//! Port for product persistence.

use async_trait::async_trait;

use crate::domain::{Product, ProductId};

use super::define_port_error;

define_port_error! {
    /// Failures raised by product repository adapters.
    pub enum ProductRepositoryError {
        /// The store could not be reached or did not answer in time.
        Connection { message: String } => "product repository connection failed: {message}" [transient],
        /// Query or mutation failed during execution.
        Query { message: String } => "product repository query failed: {message}",
    }
}

/// Durable storage for the product catalogue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// All products ordered by name.
    async fn list_all(&self) -> Result<Vec<Product>, ProductRepositoryError>;

    /// Fetch one product.
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, ProductRepositoryError>;

    /// Products whose category equals `category`, ignoring case.
    async fn find_by_category(&self, category: &str)
    -> Result<Vec<Product>, ProductRepositoryError>;

    /// Products whose name contains `fragment`, ignoring case.
    async fn search_by_name(&self, fragment: &str) -> Result<Vec<Product>, ProductRepositoryError>;

    /// Insert a new product or replace an existing one with the same id.
    async fn save(&self, product: &Product) -> Result<(), ProductRepositoryError>;

    /// Remove a product. Returns whether a row was deleted.
    async fn delete(&self, id: ProductId) -> Result<bool, ProductRepositoryError>;
}
