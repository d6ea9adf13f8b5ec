//! Users API handlers.
//!
//! ```text
//! POST /api/v1/users {"username":"alice","email":"alice@x.com","telephone":"555-0100",
//!                     "password":"Abcdef1!","confirmPassword":"Abcdef1!"}
//! GET /api/v1/users
//! ```

use actix_web::{HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::domain::{RegistrationForm, User};
use crate::inbound::http::ApiResult;
use crate::inbound::http::state::HttpState;

/// Registration body. Missing fields deserialize as empty so the validation
/// gate reports them alongside every other violation.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateUserRequest {
    /// Requested display name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Optional phone number.
    pub telephone: Option<String>,
    /// Plain-text password.
    pub password: String,
    /// Repeat of `password`.
    pub confirm_password: String,
}

impl From<CreateUserRequest> for RegistrationForm {
    fn from(value: CreateUserRequest) -> Self {
        Self {
            username: value.username,
            email: value.email,
            telephone: value.telephone,
            password: Zeroizing::new(value.password),
            confirm_password: Zeroizing::new(value.confirm_password),
        }
    }
}

/// Public view of a user; the password hash never leaves the store.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// User identifier.
    pub id: Uuid,
    /// Display name.
    pub username: String,
    /// Contact address.
    pub email: String,
    /// Phone number, if given.
    pub telephone: Option<String>,
    /// Authorisation role, such as `ROLE_USER`.
    pub role: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: *user.id.as_uuid(),
            username: user.username.to_string(),
            email: user.email.to_string(),
            telephone: user.telephone.map(|t| t.as_ref().to_owned()),
            role: user.role.as_ref().to_owned(),
        }
    }
}

/// Register a user and enqueue its `UserCreated` event in one write.
#[post("/users")]
pub async fn create_user(
    state: web::Data<HttpState>,
    payload: web::Json<CreateUserRequest>,
) -> ApiResult<HttpResponse> {
    let form = RegistrationForm::from(payload.into_inner());
    let user = state.registration.register(form).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// List registered users, oldest first.
#[get("/users")]
pub async fn list_users(state: web::Data<HttpState>) -> ApiResult<web::Json<Vec<UserResponse>>> {
    let users = state.registration.list_users().await?;
    Ok(web::Json(users.into_iter().map(UserResponse::from).collect()))
}

#[cfg(test)]
mod tests;
