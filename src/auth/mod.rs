/*!
 * Caller identity.
 *
 * Authentication happens upstream. The gateway forwards the authenticated
 * user as `x-user-id`; anonymous shoppers carry a guest session id in
 * `x-session-id`. Handlers extract [`Identity`] and turn it into a
 * [`CartOwner`] for cart, reservation and checkout operations. Roles granted
 * upstream arrive comma-separated in `x-user-roles`; back-office routes are
 * gated with [`AuthRouterExt::with_role`].
 */

use crate::errors::{ApiError, ServiceError};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const ROLES_HEADER: &str = "x-user-roles";

pub const ADMIN_ROLE: &str = "admin";

const MAX_SESSION_ID_LEN: usize = 128;

/// Owner of a cart, stock reservation or checkout session. Exactly one of a
/// user or a guest session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    User(Uuid),
    Guest(String),
}

impl CartOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            CartOwner::User(id) => Some(*id),
            CartOwner::Guest(_) => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            CartOwner::User(_) => None,
            CartOwner::Guest(session) => Some(session.as_str()),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, CartOwner::Guest(_))
    }

    /// Splits the owner into the nullable `(user_id, session_id)` column pair.
    pub fn columns(&self) -> (Option<Uuid>, Option<String>) {
        match self {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Guest(session) => (None, Some(session.clone())),
        }
    }

    /// Rebuilds an owner from stored columns; user wins when both are set.
    pub fn from_columns(user_id: Option<Uuid>, session_id: Option<&str>) -> Option<Self> {
        match (user_id, session_id) {
            (Some(id), _) => Some(CartOwner::User(id)),
            (None, Some(session)) => Some(CartOwner::Guest(session.to_string())),
            (None, None) => None,
        }
    }
}

impl fmt::Display for CartOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartOwner::User(id) => write!(f, "user:{}", id),
            CartOwner::Guest(session) => write!(f, "guest:{}", session),
        }
    }
}

/// Identity headers forwarded by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub roles: Vec<String>,
}

impl Identity {
    /// The signed-in user when present, otherwise the guest session.
    pub fn owner(&self) -> Result<CartOwner, ApiError> {
        if let Some(id) = self.user_id {
            return Ok(CartOwner::User(id));
        }
        self.guest_owner()
    }

    pub fn guest_owner(&self) -> Result<CartOwner, ApiError> {
        self.session_id
            .clone()
            .map(CartOwner::Guest)
            .ok_or(ApiError::Unauthorized)
    }

    pub fn require_user(&self) -> Result<Uuid, ApiError> {
        self.user_id.ok_or(ApiError::Unauthorized)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

fn roles_from(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

/// Rejects requests whose caller lacks `required_role`.
pub async fn role_middleware(
    State(required_role): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if request.headers().get(USER_ID_HEADER).is_none() {
        return Err(ApiError::Unauthorized);
    }
    let roles = roles_from(request.headers());
    if !roles.iter().any(|r| r.eq_ignore_ascii_case(&required_role)) {
        return Err(ApiError::ServiceError(ServiceError::Forbidden(format!(
            "{} role required",
            required_role
        ))));
    }
    Ok(next.run(request).await)
}

pub trait AuthRouterExt {
    fn with_role(self, role: &str) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_role(self, role: &str) -> Self {
        self.layer(axum::middleware::from_fn_with_state(
            role.to_string(),
            role_middleware,
        ))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = match parts.headers.get(USER_ID_HEADER) {
            Some(value) => {
                let raw = value.to_str().map_err(|_| ApiError::Unauthorized)?;
                Some(Uuid::parse_str(raw.trim()).map_err(|_| ApiError::BadRequest {
                    message: format!("{} must be a UUID", USER_ID_HEADER),
                })?)
            }
            None => None,
        };

        let session_id = match parts.headers.get(SESSION_ID_HEADER) {
            Some(value) => {
                let raw = value.to_str().map_err(|_| ApiError::Unauthorized)?.trim();
                if raw.is_empty() || raw.len() > MAX_SESSION_ID_LEN {
                    return Err(ApiError::BadRequest {
                        message: format!(
                            "{} must be between 1 and {} characters",
                            SESSION_ID_HEADER, MAX_SESSION_ID_LEN
                        ),
                    });
                }
                Some(raw.to_string())
            }
            None => None,
        };

        Ok(Identity {
            user_id,
            session_id,
            roles: roles_from(&parts.headers),
        })
    }
}
