//! Catalogue use cases over the product repository port.

use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use tracing::info;

use super::ports::{ProductCatalogue, ProductRepository, ProductRepositoryError};
use super::{Error, Product, ProductDraft, ProductId, product_violation_details};

fn map_repository_error(error: ProductRepositoryError) -> Error {
    match error {
        ProductRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("product catalogue unavailable: {message}"))
        }
        ProductRepositoryError::Query { message } => {
            Error::internal(format!("product catalogue query failed: {message}"))
        }
    }
}

fn product_not_found(id: ProductId) -> Error {
    Error::not_found(format!("Product not found: {id}"))
}

/// Product catalogue service.
pub struct ProductCatalogueService {
    repository: Arc<dyn ProductRepository>,
    clock: Arc<dyn Clock>,
}

impl ProductCatalogueService {
    /// Build the service over a repository.
    pub fn new(repository: Arc<dyn ProductRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    async fn load(&self, id: ProductId) -> Result<Product, Error> {
        self.repository
            .find_by_id(id)
            .await
            .map_err(map_repository_error)?
            .ok_or_else(|| product_not_found(id))
    }

    async fn store(&self, mut product: Product) -> Result<Product, Error> {
        product.updated_at = self.clock.utc();
        self.repository
            .save(&product)
            .await
            .map_err(map_repository_error)?;
        Ok(product)
    }
}

#[async_trait]
impl ProductCatalogue for ProductCatalogueService {
    async fn list_all(&self) -> Result<Vec<Product>, Error> {
        self.repository.list_all().await.map_err(map_repository_error)
    }

    async fn create(&self, draft: ProductDraft) -> Result<Product, Error> {
        let product = draft.into_product(self.clock.utc()).map_err(|violations| {
            Error::invalid_request("product request is invalid")
                .with_details(product_violation_details(&violations))
        })?;
        self.repository
            .save(&product)
            .await
            .map_err(map_repository_error)?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    async fn get(&self, id: ProductId) -> Result<Product, Error> {
        self.load(id).await
    }

    async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, Error> {
        let products = self
            .repository
            .find_by_category(category.trim())
            .await
            .map_err(map_repository_error)?;
        if products.is_empty() {
            return Err(Error::not_found(format!(
                "No products found in category: {category}"
            )));
        }
        Ok(products)
    }

    async fn search_by_name(&self, fragment: &str) -> Result<Vec<Product>, Error> {
        let products = self
            .repository
            .search_by_name(fragment.trim())
            .await
            .map_err(map_repository_error)?;
        if products.is_empty() {
            return Err(Error::not_found(format!(
                "No products found matching name: {fragment}"
            )));
        }
        Ok(products)
    }

    async fn toggle_active(&self, id: ProductId) -> Result<Product, Error> {
        let mut product = self.load(id).await?;
        product.active = !product.active;
        self.store(product).await
    }

    async fn delete(&self, id: ProductId) -> Result<(), Error> {
        let removed = self
            .repository
            .delete(id)
            .await
            .map_err(map_repository_error)?;
        if removed {
            info!(product_id = %id, "product deleted");
        }
        Ok(())
    }

    async fn adjust_stock(&self, id: ProductId, delta: i32) -> Result<Product, Error> {
        let mut product = self.load(id).await?;
        let stock = product
            .stock
            .checked_add(delta)
            .filter(|stock| *stock >= 0)
            .ok_or_else(|| {
                Error::invalid_request("Stock must not be negative").with_details(
                    serde_json::json!({
                        "field": "stock",
                        "current": product.stock,
                        "delta": delta,
                    }),
                )
            })?;
        product.stock = stock;
        self.store(product).await
    }
}
