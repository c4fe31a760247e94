//! Landing route for the identity provider's email action links.
//!
//! The provider validates `oobCode` itself; this route only forwards the
//! user to the page of the app that completes the flow.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use serde::Deserialize;

use crate::state::AppState;

pub const VERIFY_EMAIL_PATH: &str = "/verify-email";
pub const RESET_PASSWORD_PATH: &str = "/reset-password";
pub const HOME_PATH: &str = "/";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthActionQuery {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub oob_code: Option<String>,
}

/// Path (with query) the action link should land on.
pub fn resolve_action_target(mode: Option<&str>, oob_code: Option<&str>) -> String {
    let Some(code) = oob_code.map(str::trim).filter(|code| !code.is_empty()) else {
        return HOME_PATH.to_string();
    };
    let path = match mode.map(str::trim) {
        Some("verifyEmail") => VERIFY_EMAIL_PATH,
        Some("resetPassword") => RESET_PASSWORD_PATH,
        _ => return HOME_PATH.to_string(),
    };
    format!("{path}?oobCode={}", urlencoding::encode(code))
}

pub async fn auth_action(
    State(state): State<AppState>,
    Query(query): Query<AuthActionQuery>,
) -> Redirect {
    let target = resolve_action_target(query.mode.as_deref(), query.oob_code.as_deref());
    tracing::debug!("auth action mode={:?} -> {target}", query.mode);
    Redirect::to(&format!("{}{target}", state.public_app_url()))
}
