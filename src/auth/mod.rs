pub mod api_tokens;
pub mod cookies;
pub mod error;
pub mod flow;
pub mod middleware;
pub mod rate_limit;
pub mod sessions;
pub mod social;
pub mod token;
pub mod users;

use crate::auth::users::User;

/// Signed-in browser user, attached to request extensions by
/// [`middleware::load_session`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// The CSRF token for this request, attached by
/// [`middleware::csrf_protection`] so pages can embed it in forms.
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);
