//! Product catalogue handlers.
//!
//! ```text
//! GET    /api/v1/products
//! POST   /api/v1/products
//! GET    /api/v1/products/id/{id}
//! GET    /api/v1/products/category/{category}
//! GET    /api/v1/products/name/{name}
//! PUT    /api/v1/products/{id}/status
//! DELETE /api/v1/products/{id}
//! PUT    /api/v1/products/{id}/stock/{delta}
//! ```

use actix_web::{HttpResponse, delete, get, post, put, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Product, ProductDraft, ProductId};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

/// Body for `POST /api/v1/products`.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateProductRequest {
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Top-level category.
    pub category: String,
    /// Optional finer category.
    pub sub_category: Option<String>,
    /// Link to a product image.
    pub image_url: Option<String>,
    /// Packaging, such as `box`.
    pub package_type: Option<String>,
    /// Amount per package.
    pub content: Option<String>,
    /// Price in minor currency units.
    pub price_minor: i64,
    /// ISO 4217 code.
    pub currency: String,
    /// Whether the product is listed.
    pub active: bool,
    /// Units on hand.
    pub stock: i32,
}

impl From<CreateProductRequest> for ProductDraft {
    fn from(value: CreateProductRequest) -> Self {
        Self {
            name: value.name,
            description: value.description,
            category: value.category,
            sub_category: value.sub_category,
            image_url: value.image_url,
            package_type: value.package_type,
            content: value.content,
            price_minor: value.price_minor,
            currency: value.currency,
            active: value.active,
            stock: value.stock,
        }
    }
}

/// Product as returned by the catalogue endpoints.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    /// Product identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Top-level category.
    pub category: String,
    /// Optional finer category.
    pub sub_category: Option<String>,
    /// Link to a product image.
    pub image_url: Option<String>,
    /// Packaging, such as `box`.
    pub package_type: Option<String>,
    /// Amount per package.
    pub content: Option<String>,
    /// Price in minor currency units.
    pub price_minor: i64,
    /// ISO 4217 code.
    pub currency: String,
    /// Whether the product is listed.
    pub active: bool,
    /// Units on hand.
    pub stock: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: *product.id.as_uuid(),
            name: product.name,
            description: product.description,
            category: product.category,
            sub_category: product.sub_category,
            image_url: product.image_url,
            package_type: product.package_type,
            content: product.content,
            price_minor: product.price_minor,
            currency: product.currency,
            active: product.active,
            stock: product.stock,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

fn respond_all(products: Vec<Product>) -> web::Json<Vec<ProductResponse>> {
    web::Json(products.into_iter().map(ProductResponse::from).collect())
}

/// List every product.
#[get("/products")]
pub async fn list_products(
    state: web::Data<HttpState>,
) -> ApiResult<web::Json<Vec<ProductResponse>>> {
    Ok(respond_all(state.catalogue.list_all().await?))
}

/// Create a product.
#[post("/products")]
pub async fn create_product(
    state: web::Data<HttpState>,
    payload: web::Json<CreateProductRequest>,
) -> ApiResult<HttpResponse> {
    let product = state
        .catalogue
        .create(ProductDraft::from(payload.into_inner()))
        .await?;
    Ok(HttpResponse::Created().json(ProductResponse::from(product)))
}

/// Fetch one product by id.
#[get("/products/id/{id}")]
pub async fn get_product(
    state: web::Data<HttpState>,
    path: web::Path<Uuid>,
) -> ApiResult<web::Json<ProductResponse>> {
    let product = state
        .catalogue
        .get(ProductId::from_uuid(path.into_inner()))
        .await?;
    Ok(web::Json(product.into()))
}

/// Products in a category; 404 when there are none.
#[get("/products/category/{category}")]
pub async fn products_by_category(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<Vec<ProductResponse>>> {
    Ok(respond_all(
        state.catalogue.list_by_category(&path.into_inner()).await?,
    ))
}

/// Products whose name contains the path segment; 404 when none match.
#[get("/products/name/{name}")]
pub async fn products_by_name(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<Vec<ProductResponse>>> {
    Ok(respond_all(
        state.catalogue.search_by_name(&path.into_inner()).await?,
    ))
}

/// Flip the `active` flag.
#[put("/products/{id}/status")]
pub async fn toggle_product_status(
    state: web::Data<HttpState>,
    path: web::Path<Uuid>,
) -> ApiResult<web::Json<ProductResponse>> {
    let product = state
        .catalogue
        .toggle_active(ProductId::from_uuid(path.into_inner()))
        .await?;
    Ok(web::Json(product.into()))
}

/// Remove a product.
#[delete("/products/{id}")]
pub async fn delete_product(
    state: web::Data<HttpState>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    state
        .catalogue
        .delete(ProductId::from_uuid(path.into_inner()))
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// Add a signed delta to the stock level.
#[put("/products/{id}/stock/{delta}")]
pub async fn adjust_product_stock(
    state: web::Data<HttpState>,
    path: web::Path<(Uuid, i32)>,
) -> ApiResult<web::Json<ProductResponse>> {
    let (id, delta) = path.into_inner();
    let product = state
        .catalogue
        .adjust_stock(ProductId::from_uuid(id), delta)
        .await?;
    Ok(web::Json(product.into()))
}
