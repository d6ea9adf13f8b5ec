//! PostgreSQL-backed `ProductRepository` implementation using Diesel ORM.

use async_trait::async_trait;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{ProductRepository, ProductRepositoryError};
use crate::domain::{Product, ProductId};

use super::diesel_error_mapping::{DieselFailure, classify_diesel_error, map_pool_error_message};
use super::models::ProductRow;
use super::pool::{DbPool, PoolError};
use super::schema::products;

/// Diesel-backed implementation of the `ProductRepository` port.
#[derive(Clone)]
pub struct DieselProductRepository {
    pool: DbPool,
}

impl DieselProductRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> ProductRepositoryError {
    ProductRepositoryError::connection(map_pool_error_message(error))
}

fn map_diesel_error(error: diesel::result::Error, operation: &str) -> ProductRepositoryError {
    match classify_diesel_error(error, operation) {
        DieselFailure::Connection(message) => ProductRepositoryError::connection(message),
        DieselFailure::UniqueViolation(_) => {
            ProductRepositoryError::query("unique constraint violated")
        }
        DieselFailure::Query(message) => ProductRepositoryError::query(message),
    }
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            category: row.category,
            sub_category: row.sub_category,
            image_url: row.image_url,
            package_type: row.package_type,
            content: row.content,
            price_minor: row.price_minor,
            currency: row.currency,
            active: row.active,
            stock: row.stock,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Product> for ProductRow {
    fn from(product: &Product) -> Self {
        Self {
            id: *product.id.as_uuid(),
            name: product.name.clone(),
            description: product.description.clone(),
            category: product.category.clone(),
            sub_category: product.sub_category.clone(),
            image_url: product.image_url.clone(),
            package_type: product.package_type.clone(),
            content: product.content.clone(),
            price_minor: product.price_minor,
            currency: product.currency.clone(),
            active: product.active,
            stock: product.stock,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

/// Escape `LIKE` wildcards so `value` matches literally.
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn like_pattern(fragment: &str) -> String {
    format!("%{}%", escape_like(fragment))
}

#[async_trait]
impl ProductRepository for DieselProductRepository {
    async fn list_all(&self) -> Result<Vec<Product>, ProductRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ProductRow> = products::table
            .order((products::name.asc(), products::id.asc()))
            .select(ProductRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "list_all"))?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, ProductRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<ProductRow> = products::table
            .filter(products::id.eq(id.as_uuid()))
            .select(ProductRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(|err| map_diesel_error(err, "find_by_id"))?;
        Ok(row.map(Product::from))
    }

    async fn find_by_category(
        &self,
        category: &str,
    ) -> Result<Vec<Product>, ProductRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ProductRow> = products::table
            .filter(products::category.ilike(escape_like(category)))
            .order((products::name.asc(), products::id.asc()))
            .select(ProductRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "find_by_category"))?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn search_by_name(&self, fragment: &str) -> Result<Vec<Product>, ProductRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ProductRow> = products::table
            .filter(products::name.ilike(like_pattern(fragment)))
            .order((products::name.asc(), products::id.asc()))
            .select(ProductRow::as_select())
            .load(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "search_by_name"))?;
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn save(&self, product: &Product) -> Result<(), ProductRepositoryError> {
        let row = ProductRow::from(product);
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(products::table)
            .values(&row)
            .on_conflict(products::id)
            .do_update()
            .set((
                products::name.eq(excluded(products::name)),
                products::description.eq(excluded(products::description)),
                products::category.eq(excluded(products::category)),
                products::sub_category.eq(excluded(products::sub_category)),
                products::image_url.eq(excluded(products::image_url)),
                products::package_type.eq(excluded(products::package_type)),
                products::content.eq(excluded(products::content)),
                products::price_minor.eq(excluded(products::price_minor)),
                products::currency.eq(excluded(products::currency)),
                products::active.eq(excluded(products::active)),
                products::stock.eq(excluded(products::stock)),
                products::updated_at.eq(excluded(products::updated_at)),
            ))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| map_diesel_error(err, "save"))
    }

    async fn delete(&self, id: ProductId) -> Result<bool, ProductRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let deleted = diesel::delete(products::table.filter(products::id.eq(id.as_uuid())))
            .execute(&mut conn)
            .await
            .map_err(|err| map_diesel_error(err, "delete"))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case("yerba", "%yerba%")]
    #[case("50%", "%50\\%%")]
    #[case("a_b", "%a\\_b%")]
    fn like_patterns_escape_wildcards(#[case] fragment: &str, #[case] expected: &str) {
        assert_eq!(like_pattern(fragment), expected);
    }

    #[rstest]
    fn rows_round_trip_through_domain() {
        let now = Utc::now();
        let product = Product {
            id: ProductId::random(),
            name: "Yerba".to_owned(),
            description: None,
            category: "Beverages".to_owned(),
            sub_category: Some("Tea".to_owned()),
            image_url: None,
            package_type: None,
            content: Some("1kg".to_owned()),
            price_minor: 1_250,
            currency: "ARS".to_owned(),
            active: true,
            stock: 3,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(Product::from(ProductRow::from(&product)), product);
    }
}
