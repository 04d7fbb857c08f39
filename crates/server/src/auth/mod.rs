pub mod middleware;
pub mod oauth;
pub mod session;

pub use middleware::RouterScope;
pub use oauth::{GoogleOAuth, OAuthProvider, OAuthUserInfo};
pub use session::{
    CurrentSession, OAUTH_STATE_COOKIE, PendingSession, SESSION_COOKIE, session_cookie,
};
