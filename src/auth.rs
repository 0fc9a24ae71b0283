//! Authentication against the portal's single sign-on.
//!
//! The portal has no login API. A session is established by replaying the
//! browser's login page: a fixed, ordered sequence of requests across the
//! portal and its SSO server, each relying on cookies the previous one set.
//! [`PortalSession`] owns that cookie state, runs at most one handshake at a
//! time and transparently logs in again when a page comes back logged out.

use std::{
    fmt,
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, info, warn};
use parking_lot::RwLock;
use scraper::{Html, Selector};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    config::Endpoints,
    error::PortalError,
    form::Form,
    requests::{PortalRequest, Transport},
    user::{Profile, parse_profile},
};

static SECURE_TOKEN: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name=secureToken]").expect("token selector"));
static SECURE_SESSION_ID: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name=secureSessionId]").expect("session selector"));
static INCORRECT_COUNT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name=incorrectCount]").expect("count selector"));

const PORTAL_LOGIN_OK_CODE: i64 = 1000;
const SSO_SERVICE_ID: u32 = 30;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    id: String,
    password: String,
}

impl Credentials {
    pub fn new(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            password: password.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn login_form(&self) -> Form {
        Form::new()
            .text("issacweb_data", "")
            .text("challenge", "")
            .text("response", "")
            .text("id", &self.id)
            .text("pw", &self.password)
            .text("LoginID", &self.id)
            .text("LoginPW", &self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("password", &"***")
            .finish()
    }
}

/// The requests of a login, in the order they must be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStep {
    Landing,
    LoginPage,
    PortalLogin,
    SsoLogin,
    CheckToken,
    CheckAuth,
    UpdateSecureToken,
    AgentAuth,
    SsoLogOn,
    Profile,
}

impl HandshakeStep {
    pub fn name(self) -> &'static str {
        match self {
            HandshakeStep::Landing => "landing",
            HandshakeStep::LoginPage => "login page",
            HandshakeStep::PortalLogin => "portal login",
            HandshakeStep::SsoLogin => "sso login",
            HandshakeStep::CheckToken => "check token",
            HandshakeStep::CheckAuth => "check auth",
            HandshakeStep::UpdateSecureToken => "update secure token",
            HandshakeStep::AgentAuth => "agent auth",
            HandshakeStep::SsoLogOn => "sso log-on",
            HandshakeStep::Profile => "profile",
        }
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Probing,
    Authenticating(HandshakeStep),
    Authenticated(Profile),
    Failed(String),
}

/// Token pair the SSO server hands out for correct credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SsoGrant {
    token: String,
    session_id: String,
}

impl SsoGrant {
    fn extract(body: &str) -> Result<Self, PortalError> {
        let document = Html::parse_document(body);
        let value = |selector: &Selector| {
            document
                .select(selector)
                .next()
                .and_then(|input| input.value().attr("value"))
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match (value(&SECURE_TOKEN), value(&SECURE_SESSION_ID)) {
            (Some(token), Some(session_id)) => Ok(Self { token, session_id }),
            _ => Err(PortalError::InvalidCredentials {
                incorrect_count: value(&INCORRECT_COUNT).and_then(|count| count.trim().parse().ok()),
            }),
        }
    }

    fn form(&self) -> Form {
        Form::new()
            .text("secureToken", &self.token)
            .text("secureSessionId", &self.session_id)
    }
}

#[derive(Debug, Deserialize)]
struct PortalLoginReply {
    #[serde(rename = "Code")]
    code: i64,
    #[serde(rename = "Msg")]
    msg: String,
    #[serde(rename = "Obj")]
    obj: serde_json::Value,
}

fn check_portal_login(body: &str) -> Result<(), PortalError> {
    let failed = |reason: String| PortalError::HandshakeStepFailed {
        step: HandshakeStep::PortalLogin,
        reason,
        cause: None,
    };
    let reply: PortalLoginReply =
        serde_json::from_str(body).map_err(|err| failed(format!("unreadable reply: {err}")))?;
    if reply.code == PORTAL_LOGIN_OK_CODE && reply.msg == "OK" && reply.obj == 0 {
        Ok(())
    } else {
        Err(failed(format!(
            "unexpected reply (Code={}, Msg={}, Obj={})",
            reply.code, reply.msg, reply.obj
        )))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Probe {
    Live(Profile),
    LoggedOut,
    Unreachable,
}

#[derive(Default)]
struct Gate {
    generation: u64,
    /// Credentials of the most recent attempt and what came of it.
    attempted: Option<Credentials>,
    outcome: Option<Result<Profile, PortalError>>,
    /// Credentials that last produced a session, used to log in again.
    remembered: Option<Credentials>,
}

/// The authenticated connection to the portal.
pub struct PortalSession {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    phase: RwLock<AuthPhase>,
    generation: AtomicU64,
    gate: Mutex<Gate>,
}

impl PortalSession {
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
            phase: RwLock::new(AuthPhase::Unauthenticated),
            generation: AtomicU64::new(0),
            gate: Mutex::new(Gate::default()),
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn phase(&self) -> AuthPhase {
        self.phase.read().clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        match &*self.phase.read() {
            AuthPhase::Authenticated(profile) => Some(profile.clone()),
            _ => None,
        }
    }

    fn set_phase(&self, phase: AuthPhase) {
        *self.phase.write() = phase;
    }

    /// Logs in, or confirms the current session is still good.
    ///
    /// Only one handshake runs at a time. A caller that queued behind a
    /// handshake for the same credentials gets that handshake's outcome rather
    /// than starting another.
    pub async fn authenticate(&self, credentials: Credentials) -> Result<Profile, PortalError> {
        let observed = self.generation.load(Ordering::Acquire);
        let mut gate = self.gate.lock().await;
        if gate.generation != observed && gate.attempted.as_ref() == Some(&credentials) {
            if let Some(outcome) = gate.outcome.clone() {
                debug!("joining the login that just finished for {}", credentials.id());
                return outcome;
            }
        }
        self.attempt(&mut gate, credentials).await
    }

    /// Logs in again with the remembered credentials, unless somebody already
    /// did since `observed`.
    async fn reauthenticate(&self, observed: u64) -> Result<(), PortalError> {
        let mut gate = self.gate.lock().await;
        if gate.generation != observed {
            return match &gate.outcome {
                Some(Ok(_)) => Ok(()),
                Some(Err(err)) => Err(err.clone()),
                None => Err(PortalError::SessionExpired),
            };
        }
        let Some(credentials) = gate.remembered.clone() else {
            return Err(PortalError::SessionExpired);
        };
        warn!("session expired, logging in again as {}", credentials.id());
        self.attempt(&mut gate, credentials).await.map(|_| ())
    }

    async fn attempt(
        &self,
        gate: &mut Gate,
        credentials: Credentials,
    ) -> Result<Profile, PortalError> {
        let previous = self.phase();
        let checkpoint = self.transport.checkpoint();

        let probe = self.probe().await;
        let outcome = match &probe {
            Probe::Live(profile) => {
                info!("session already valid for {}", profile.id);
                // Unchecked credentials never replace ones a handshake accepted.
                if gate.remembered.is_none() && profile.id == credentials.id() {
                    gate.remembered = Some(credentials.clone());
                }
                Ok(profile.clone())
            }
            Probe::LoggedOut | Probe::Unreachable => {
                let outcome = self.handshake(&credentials).await;
                if outcome.is_ok() {
                    gate.remembered = Some(credentials.clone());
                }
                outcome
            }
        };

        match &outcome {
            Ok(profile) => {
                info!("logged in as {} ({})", profile.name, profile.id);
                self.transport.release(checkpoint);
                self.set_phase(AuthPhase::Authenticated(profile.clone()));
            }
            Err(err) => {
                warn!("login as {} failed: {err}", credentials.id());
                self.transport.rollback(checkpoint);
                match previous {
                    // The portal was unreachable rather than logged out, so the
                    // restored cookies still hold the earlier session.
                    AuthPhase::Authenticated(_) if probe == Probe::Unreachable => {
                        self.set_phase(previous)
                    }
                    _ => self.set_phase(AuthPhase::Failed(err.to_string())),
                }
            }
        }

        gate.attempted = Some(credentials);
        gate.outcome = Some(outcome.clone());
        gate.generation += 1;
        self.generation.store(gate.generation, Ordering::Release);
        outcome
    }

    async fn probe(&self) -> Probe {
        self.set_phase(AuthPhase::Probing);
        let request = PortalRequest::get(&self.endpoints.profile);
        let body = match self.transport.send(&request).await {
            Ok(body) => body,
            Err(err) => {
                debug!("probe failed: {err}");
                return Probe::Unreachable;
            }
        };
        match parse_profile(&body) {
            Ok(profile) => Probe::Live(profile),
            Err(err) => {
                debug!("not logged in yet: {err}");
                Probe::LoggedOut
            }
        }
    }

    async fn handshake(&self, credentials: &Credentials) -> Result<Profile, PortalError> {
        let e = &self.endpoints;
        let login_form = credentials.login_form();

        self.step(HandshakeStep::Landing, PortalRequest::get(&e.landing))
            .await?;
        self.step(HandshakeStep::LoginPage, PortalRequest::get(&e.login_page))
            .await?;

        let reply = self
            .step(
                HandshakeStep::PortalLogin,
                PortalRequest::post(&e.portal_login, login_form.clone()),
            )
            .await?;
        check_portal_login(&reply)?;

        let body = self
            .step(
                HandshakeStep::SsoLogin,
                PortalRequest::post(&e.sso_login, login_form),
            )
            .await?;
        let grant = SsoGrant::extract(&body)?;

        let token_form = grant.form();
        let follow_ups = [
            (
                HandshakeStep::CheckToken,
                &e.check_token,
                token_form
                    .clone()
                    .text("isToken", "Y")
                    .text("reTry", "N")
                    .text("method", "checkToken")
                    .text("incorrectCount", 0),
            ),
            (
                HandshakeStep::CheckAuth,
                &e.check_auth,
                token_form.clone().text("isToken", "Y"),
            ),
            (
                HandshakeStep::UpdateSecureToken,
                &e.update_secure_token,
                token_form
                    .text("method", "updateSecureToken")
                    .text("ssid", SSO_SERVICE_ID),
            ),
            (
                HandshakeStep::AgentAuth,
                &e.agent_auth,
                Form::new().text("method", "auth"),
            ),
            (
                HandshakeStep::SsoLogOn,
                &e.sso_logon,
                Form::new()
                    .text("ssoUid", credentials.id())
                    .text("returnURL", "/"),
            ),
        ];
        for (step, url, form) in follow_ups {
            self.step(step, PortalRequest::post(url, form)).await?;
        }

        let body = self
            .step(HandshakeStep::Profile, PortalRequest::get(&e.profile))
            .await?;
        parse_profile(&body).map_err(|err| PortalError::HandshakeStepFailed {
            step: HandshakeStep::Profile,
            reason: err.to_string(),
            cause: None,
        })
    }

    async fn step(
        &self,
        step: HandshakeStep,
        request: PortalRequest,
    ) -> Result<String, PortalError> {
        self.set_phase(AuthPhase::Authenticating(step));
        info!("login step: {step}");
        self.transport
            .send(&request)
            .await
            .map_err(|cause| PortalError::HandshakeStepFailed {
                step,
                reason: cause.to_string(),
                cause: Some(cause),
            })
    }

    /// Loads a page and runs `extract` over its body.
    ///
    /// When the page looks logged out the session logs in again and the
    /// request is retried once; whatever the retry yields is returned.
    pub async fn fetch_page<T, F>(&self, request: PortalRequest, extract: F) -> Result<T, PortalError>
    where
        F: Fn(&str) -> Result<T, PortalError> + Send + Sync,
        T: Send,
    {
        let observed = self.generation.load(Ordering::Acquire);
        match self.load(&request, &extract).await {
            Err(err) if err.indicates_logged_out() => {
                warn!("{} looks logged out ({err})", request.url);
                self.reauthenticate(observed).await?;
                self.load(&request, &extract).await
            }
            result => result,
        }
    }

    async fn load<T, F>(&self, request: &PortalRequest, extract: &F) -> Result<T, PortalError>
    where
        F: Fn(&str) -> Result<T, PortalError> + Send + Sync,
        T: Send,
    {
        let body = self.transport.send(request).await?;
        extract(&body)
    }

    /// Drops the session's cookies and remembered credentials.
    pub async fn logout(&self) {
        let mut gate = self.gate.lock().await;
        self.transport.clear_cookies();
        *gate = Gate {
            generation: gate.generation + 1,
            ..Gate::default()
        };
        self.generation.store(gate.generation, Ordering::Release);
        self.set_phase(AuthPhase::Unauthenticated);
        info!("logged out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_form_matches_the_browser() {
        let form = Credentials::new("20161234", "p@ss word").login_form();
        assert_eq!(
            form.encode(),
            "issacweb_data=&challenge=&response=&id=20161234&pw=p%40ss+word\
             &LoginID=20161234&LoginPW=p%40ss+word"
        );
    }

    #[test]
    fn debug_hides_the_password() {
        let credentials = Credentials::new("20161234", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }

    #[test]
    fn grant_is_read_from_hidden_inputs() {
        let body = r#"<form>
            <input type="hidden" name="secureToken" value="TOKEN">
            <input type="hidden" name="secureSessionId" value="SID">
        </form>"#;
        let grant = SsoGrant::extract(body).unwrap();
        assert_eq!(grant.form().encode(), "secureToken=TOKEN&secureSessionId=SID");
    }

    #[test]
    fn missing_grant_reports_failure_counter() {
        let body = r#"<input type="hidden" name="incorrectCount" value="3">"#;
        assert!(matches!(
            SsoGrant::extract(body),
            Err(PortalError::InvalidCredentials {
                incorrect_count: Some(3)
            })
        ));

        let body = r#"<input name="secureToken" value=""><input name="incorrectCount" value="">"#;
        assert!(matches!(
            SsoGrant::extract(body),
            Err(PortalError::InvalidCredentials {
                incorrect_count: None
            })
        ));
    }

    #[test]
    fn portal_login_reply_must_be_ok() {
        assert!(check_portal_login(r#"{"Code":1000,"Msg":"OK","Obj":0}"#).is_ok());
        assert!(matches!(
            check_portal_login(r#"{"Code":2000,"Msg":"FAIL","Obj":0}"#),
            Err(PortalError::HandshakeStepFailed {
                step: HandshakeStep::PortalLogin,
                ..
            })
        ));
        assert!(check_portal_login("<html>").is_err());
    }
}
