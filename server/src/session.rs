use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{AppState, SharedState};

/// Stateless signed-cookie sessions.
///
/// The cookie value is `nonce.signature` where the signature is a SHA-256
/// over the server secret and the nonce. No session table is kept: a
/// cookie is valid iff its signature recomputes, so cookies survive a
/// restart only when the operator pins `--secret-key`.
///
/// The cookie name embeds the bound port so independent instances on one
/// host keep separate sessions.
#[derive(Debug)]
pub struct SessionAuth {
    secret: String,
    cookie_name: String,
}

impl SessionAuth {
    pub fn new(secret: String, port: u16) -> Self {
        SessionAuth {
            secret,
            cookie_name: format!("webedit_session_{}", port),
        }
    }

    fn sign(&self, nonce: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b".");
        hasher.update(nonce.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    fn issue(&self) -> Cookie<'static> {
        let mut nonce_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = URL_SAFE_NO_PAD.encode(nonce_bytes);
        let sig = self.sign(&nonce);

        let mut cookie = Cookie::new(self.cookie_name.clone(), format!("{}.{}", nonce, sig));
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie
    }

    pub fn verify(&self, jar: &CookieJar) -> bool {
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return false;
        };
        let Some((nonce, sig)) = cookie.value().split_once('.') else {
            return false;
        };
        self.sign(nonce) == sig
    }

    fn clear(&self) -> Cookie<'static> {
        let mut cookie = Cookie::from(self.cookie_name.clone());
        cookie.set_path("/");
        cookie
    }
}

/// Generates a per-run secret: SHA-256 over fresh OS randomness.
pub fn make_secret() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// True when the request may reach the edit/save handlers: either no
/// password is configured (open mode) or the session cookie checks out.
pub fn is_authenticated(state: &AppState, jar: &CookieJar) -> bool {
    state.password.is_none() || state.auth.verify(jar)
}

#[derive(Debug, Deserialize)]
pub struct NextParam {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    password: String,
}

fn login_form(message: &str) -> Html<String> {
    // Deliberately minimal glue; the real UI lives in the front end.
    Html(format!(
        "<!doctype html><title>webedit login</title>\
         <p>{}</p>\
         <form method=\"post\">\
         <input type=\"password\" name=\"password\" autofocus>\
         <button type=\"submit\">Log in</button>\
         </form>",
        message
    ))
}

pub async fn login_page() -> Html<String> {
    login_form("Enter the editor password.")
}

pub async fn login(
    State(state): State<SharedState>,
    Query(q): Query<NextParam>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(password) = &state.password else {
        // Open mode: nothing to log in to.
        return Redirect::to("/").into_response();
    };

    // Plain equality; timing-channel hardening is out of scope for a
    // single shared secret on a trusted network.
    if &form.password == password {
        info!("login succeeded");
        let jar = jar.add(state.auth.issue());
        let next = q.next.as_deref().unwrap_or("/");
        (jar, Redirect::to(next)).into_response()
    } else {
        info!("login failed: wrong password");
        login_form("Wrong password.").into_response()
    }
}

pub async fn logout(State(state): State<SharedState>, jar: CookieJar) -> Response {
    let jar = jar.remove(state.auth.clear());
    (jar, Html("<p>Logged out.</p>".to_string())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_cookie_verifies() {
        let auth = SessionAuth::new("secret".into(), 9113);
        let jar = CookieJar::new().add(auth.issue());
        assert!(auth.verify(&jar));
    }

    #[test]
    fn missing_or_malformed_cookie_fails() {
        let auth = SessionAuth::new("secret".into(), 9113);
        assert!(!auth.verify(&CookieJar::new()));

        let jar =
            CookieJar::new().add(Cookie::new("webedit_session_9113", "no-dot-in-here"));
        assert!(!auth.verify(&jar));
    }

    #[test]
    fn cookie_signed_with_other_secret_fails() {
        let auth = SessionAuth::new("secret".into(), 9113);
        let other = SessionAuth::new("different".into(), 9113);
        let jar = CookieJar::new().add(other.issue());
        assert!(!auth.verify(&jar));
    }

    #[test]
    fn cookie_is_scoped_to_port() {
        let auth = SessionAuth::new("secret".into(), 9113);
        let other_port = SessionAuth::new("secret".into(), 9114);
        let jar = CookieJar::new().add(other_port.issue());
        assert!(!auth.verify(&jar));
    }

    #[test]
    fn secrets_are_unique_per_call() {
        assert_ne!(make_secret(), make_secret());
    }
}
