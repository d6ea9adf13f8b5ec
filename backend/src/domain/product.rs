//! Product catalogue entities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Stable product identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(Uuid);

impl ProductId {
    /// Allocate a fresh identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an identifier read back from storage or a path segment.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Product as stored in the catalogue.
///
/// Prices are kept in minor currency units to avoid float rounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Stable identifier.
    pub id: ProductId,
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
    /// Amount per package, such as `500 g`.
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

/// Unvalidated input for a new product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductDraft {
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
    /// Amount per package, such as `500 g`.
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

/// A product draft rule that was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductViolation {
    /// Name is blank.
    NameRequired,
    /// Category is blank.
    CategoryRequired,
    /// Price is below zero.
    NegativePrice,
    /// Currency is not three ASCII letters.
    InvalidCurrency,
    /// Stock is below zero.
    NegativeStock,
}

impl ProductViolation {
    /// Client-facing message.
    pub fn message(self) -> &'static str {
        match self {
            Self::NameRequired => "Name is required",
            Self::CategoryRequired => "Category is required",
            Self::NegativePrice => "Price must not be negative",
            Self::InvalidCurrency => "Currency must be a three-letter ISO 4217 code",
            Self::NegativeStock => "Stock must not be negative",
        }
    }
}

/// Detail payload listing every violation.
pub fn product_violation_details(violations: &[ProductViolation]) -> Value {
    let messages: Vec<&str> = violations.iter().map(|v| v.message()).collect();
    json!({ "messages": messages, "codes": violations })
}

fn trimmed_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl ProductDraft {
    /// Check every rule, collecting all violations.
    ///
    /// # Examples
    /// ```
    /// use accounts::domain::{ProductDraft, ProductViolation};
    /// use chrono::Utc;
    ///
    /// let draft = ProductDraft { price_minor: -1, ..ProductDraft::default() };
    /// let violations = draft.into_product(Utc::now()).expect_err("invalid");
    /// assert!(violations.contains(&ProductViolation::NegativePrice));
    /// assert!(violations.contains(&ProductViolation::NameRequired));
    /// ```
    pub fn into_product(self, now: DateTime<Utc>) -> Result<Product, Vec<ProductViolation>> {
        let mut violations = Vec::new();
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            violations.push(ProductViolation::NameRequired);
        }
        let category = self.category.trim().to_owned();
        if category.is_empty() {
            violations.push(ProductViolation::CategoryRequired);
        }
        if self.price_minor < 0 {
            violations.push(ProductViolation::NegativePrice);
        }
        let currency = self.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            violations.push(ProductViolation::InvalidCurrency);
        }
        if self.stock < 0 {
            violations.push(ProductViolation::NegativeStock);
        }
        if !violations.is_empty() {
            return Err(violations);
        }

        Ok(Product {
            id: ProductId::random(),
            name,
            description: trimmed_optional(self.description),
            category,
            sub_category: trimmed_optional(self.sub_category),
            image_url: trimmed_optional(self.image_url),
            package_type: trimmed_optional(self.package_type),
            content: trimmed_optional(self.content),
            price_minor: self.price_minor,
            currency,
            active: self.active,
            stock: self.stock,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn draft() -> ProductDraft {
        ProductDraft {
            name: " Yerba Mate ".to_owned(),
            category: "Beverages".to_owned(),
            sub_category: Some("  ".to_owned()),
            price_minor: 1_250,
            currency: "ars".to_owned(),
            active: true,
            stock: 10,
            ..ProductDraft::default()
        }
    }

    #[rstest]
    fn valid_drafts_are_normalised(draft: ProductDraft) {
        let product = draft.into_product(Utc::now()).expect("valid draft");
        assert_eq!(product.name, "Yerba Mate");
        assert_eq!(product.currency, "ARS");
        assert!(product.sub_category.is_none());
        assert_eq!(product.created_at, product.updated_at);
    }

    #[rstest]
    fn all_violations_are_collected(mut draft: ProductDraft) {
        draft.name = String::new();
        draft.currency = "EURO".to_owned();
        draft.stock = -1;
        let violations = draft.into_product(Utc::now()).expect_err("invalid");
        assert_eq!(
            violations,
            vec![
                ProductViolation::NameRequired,
                ProductViolation::InvalidCurrency,
                ProductViolation::NegativeStock,
            ]
        );
    }

    #[rstest]
    fn details_carry_messages_and_codes() {
        let details = product_violation_details(&[ProductViolation::NegativePrice]);
        assert_eq!(details["messages"], json!(["Price must not be negative"]));
        assert_eq!(details["codes"], json!(["negative_price"]));
    }
}
