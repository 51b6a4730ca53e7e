use tracing::{info, warn};

use crate::{
    api::{ApiClient, UserInfo},
    error::MapError,
    notify::Notification,
};

/// Signed-in state of the client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthSession {
    pub token: Option<String>,
    pub user: Option<UserInfo>,
}

impl AuthSession {
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Forgets the user and hands back the token for the server-side logout.
    pub fn clear(&mut self) -> Option<String> {
        self.user = None;
        self.token.take()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.email.as_str())
    }
}

/// Result of a login attempt: the session to adopt (if any) and the alert to show.
#[derive(Debug)]
pub struct LoginOutcome {
    pub session: Option<AuthSession>,
    pub notification: Notification,
}

/// Logs in, then fetches the current user with the new token.
///
/// A rejected login leaves no session and shows a sticky error. If only the
/// user lookup fails, the token is kept and the user stays unknown.
pub async fn log_in(api: &ApiClient, username: &str, password: &str) -> LoginOutcome {
    let token = match api.login(username, password).await {
        Ok(token) => token.access_token,
        Err(err) => {
            warn!(%err, "login failed");
            let text = match err {
                MapError::Auth(detail) => detail,
                other => other.to_string(),
            };
            return LoginOutcome {
                session: None,
                notification: Notification::error("Error logging in", text).sticky(),
            };
        }
    };

    match api.current_user(&token).await {
        Ok(user) => {
            info!(email = %user.email, "logged in");
            LoginOutcome {
                session: Some(AuthSession { token: Some(token), user: Some(user) }),
                notification: Notification::success("Logged in", "You have successfully logged in"),
            }
        }
        Err(err) => {
            warn!(%err, "user info lookup failed");
            LoginOutcome {
                session: Some(AuthSession { token: Some(token), user: None }),
                notification: Notification::error(
                    "Error getting user info",
                    "There was an error getting user info",
                ),
            }
        }
    }
}

/// Tells the server the session ended. The caller has already cleared its
/// local session with [`AuthSession::clear`]; a failed server call is only logged.
pub async fn log_out(api: &ApiClient, token: Option<String>) -> Notification {
    if let Err(err) = api.logout(token.as_deref()).await {
        warn!(%err, "server logout failed");
    }
    Notification::success("Logged out", "You have successfully logged out")
}
