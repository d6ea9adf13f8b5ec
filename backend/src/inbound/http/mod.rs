//! HTTP inbound adapter exposing REST endpoints.
//!
//! ```text
//! POST /api/v1/users
//! GET  /api/v1/users
//! GET  /api/v1/products ...
//! GET  /api/v1/admin/outbox/dead-letters?limit=50
//! ```

pub mod error;
pub mod health;
pub mod outbox_admin;
pub mod products;
pub mod state;
pub mod users;

use actix_web::{Scope, web};

pub use crate::domain::ApiResult;
pub use error::json_config;

/// Every versioned API route, with JSON extraction failures reported in the
/// domain error shape.
///
/// # Examples
/// ```
/// use actix_web::App;
/// use accounts::inbound::http::api_v1;
///
/// let app = App::new().service(api_v1());
/// ```
pub fn api_v1() -> Scope {
    web::scope("/api/v1")
        .app_data(json_config())
        .service(users::create_user)
        .service(users::list_users)
        .service(products::list_products)
        .service(products::create_product)
        .service(products::get_product)
        .service(products::products_by_category)
        .service(products::products_by_name)
        .service(products::toggle_product_status)
        .service(products::delete_product)
        .service(products::adjust_product_stock)
        .service(outbox_admin::list_dead_letters)
}
