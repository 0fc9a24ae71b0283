use std::collections::HashSet;

use parking_lot::RwLock;
use reqwest::{
    Url,
    cookie::{CookieStore, Jar},
    header::HeaderValue,
};

/// Position in the jar's history that [`SessionJar::rollback`] can return to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieCheckpoint(usize);

impl CookieCheckpoint {
    /// A checkpoint after the first `position` cookie changes.
    pub fn new(position: usize) -> Self {
        Self(position)
    }

    pub fn position(self) -> usize {
        self.0
    }
}

#[derive(Default)]
struct JarState {
    jar: Jar,
    // Set-Cookie headers in arrival order. While no checkpoint is held only the
    // latest header per cookie is kept.
    history: Vec<(HeaderValue, Url)>,
    pinned: Option<usize>,
}

impl JarState {
    /// Drops every header a later one for the same cookie overrides.
    fn compact(&mut self) {
        let mut seen = HashSet::new();
        let mut kept: Vec<_> = self
            .history
            .drain(..)
            .rev()
            .filter(|(header, url)| seen.insert(cookie_key(header, url)))
            .collect();
        kept.reverse();
        self.history = kept;
    }
}

/// What identifies a cookie in a jar: its name, the host that set it and its
/// `Domain` and `Path` attributes. Unreadable headers are their own key.
fn cookie_key(header: &HeaderValue, url: &Url) -> (String, String, String, String) {
    let host = url.host_str().unwrap_or_default().to_string();
    let Ok(text) = header.to_str() else {
        return (
            String::from_utf8_lossy(header.as_bytes()).into_owned(),
            host,
            String::new(),
            String::new(),
        );
    };
    let mut parts = text.split(';');
    let name = parts
        .next()
        .and_then(|pair| pair.split('=').next())
        .unwrap_or_default()
        .trim()
        .to_string();
    let (mut domain, mut path) = (String::new(), String::new());
    for attribute in parts {
        let (key, value) = attribute.split_once('=').unwrap_or((attribute, ""));
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" => domain = value.trim().trim_start_matches('.').to_ascii_lowercase(),
            "path" => path = value.trim().to_string(),
            _ => {}
        }
    }
    (name, host, domain, path)
}

/// Cookie store shared by every request of a session.
///
/// Wraps reqwest's [`Jar`] and remembers the Set-Cookie headers it was fed, so a
/// failed login can be undone by replaying the history up to a checkpoint.
#[derive(Default)]
pub struct SessionJar {
    state: RwLock<JarState>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in the history. The history is kept in full from the
    /// earliest held checkpoint until it is rolled back or released.
    pub fn checkpoint(&self) -> CookieCheckpoint {
        let mut state = self.state.write();
        let position = state.history.len();
        state.pinned.get_or_insert(position);
        CookieCheckpoint(position)
    }

    pub fn rollback(&self, checkpoint: CookieCheckpoint) {
        let mut state = self.state.write();
        state.pinned = None;
        if checkpoint.0 < state.history.len() {
            state.history.truncate(checkpoint.0);
            let jar = Jar::default();
            for (header, url) in &state.history {
                jar.set_cookies(&mut std::iter::once(header), url);
            }
            state.jar = jar;
        }
        state.compact();
    }

    /// Gives up the option to roll back to `checkpoint` or anything later.
    pub fn release(&self, checkpoint: CookieCheckpoint) {
        let mut state = self.state.write();
        if state.pinned.is_some_and(|pinned| pinned >= checkpoint.0) {
            state.pinned = None;
            state.compact();
        }
    }

    pub fn clear(&self) {
        *self.state.write() = JarState::default();
    }
}

impl CookieStore for SessionJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<HeaderValue> = cookie_headers.cloned().collect();
        if headers.is_empty() {
            return;
        }
        let mut state = self.state.write();
        state.jar.set_cookies(&mut headers.iter(), url);
        state
            .history
            .extend(headers.into_iter().map(|header| (header, url.clone())));
        if state.pinned.is_none() {
            state.compact();
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.state.read().jar.cookies(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn door() -> Url {
        Url::parse("https://door.deu.ac.kr/Mypage/MyInfo").unwrap()
    }

    fn set(jar: &SessionJar, cookie: &'static str) {
        let header = HeaderValue::from_static(cookie);
        jar.set_cookies(&mut std::iter::once(&header), &door());
    }

    #[test]
    fn rollback_forgets_cookies_set_after_checkpoint() {
        let jar = SessionJar::new();
        set(&jar, "ASP.NET_SessionId=abc; Path=/");
        let checkpoint = jar.checkpoint();
        set(&jar, "SSOToken=xyz; Path=/");
        assert!(jar.cookies(&door()).unwrap().to_str().unwrap().contains("SSOToken"));

        jar.rollback(checkpoint);

        let cookies = jar.cookies(&door()).unwrap();
        assert_eq!(cookies.to_str().unwrap(), "ASP.NET_SessionId=abc");
    }

    #[test]
    fn rollback_restores_overwritten_values() {
        let jar = SessionJar::new();
        set(&jar, "ASP.NET_SessionId=first; Path=/");
        let checkpoint = jar.checkpoint();
        set(&jar, "ASP.NET_SessionId=second; Path=/");

        jar.rollback(checkpoint);

        let cookies = jar.cookies(&door()).unwrap();
        assert_eq!(cookies.to_str().unwrap(), "ASP.NET_SessionId=first");
    }

    #[test]
    fn history_keeps_one_header_per_cookie_without_checkpoint() {
        let jar = SessionJar::new();
        set(&jar, "ASP.NET_SessionId=abc; Path=/");
        for _ in 0..10_000 {
            set(&jar, ".ASPXAUTH=abc; Path=/");
        }
        set(&jar, ".ASPXAUTH=other; Path=/LMS");
        assert_eq!(jar.checkpoint().position(), 3);

        let cookies = jar.cookies(&door()).unwrap();
        let cookies = cookies.to_str().unwrap();
        assert!(cookies.contains("ASP.NET_SessionId=abc"));
        assert!(cookies.contains(".ASPXAUTH=abc"));
        assert!(!cookies.contains("other"));
    }

    #[test]
    fn held_checkpoint_survives_repeated_cookies_until_released() {
        let jar = SessionJar::new();
        set(&jar, "ASP.NET_SessionId=first; Path=/");
        let checkpoint = jar.checkpoint();
        for _ in 0..5 {
            set(&jar, "ASP.NET_SessionId=second; Path=/");
        }
        assert_eq!(jar.checkpoint().position(), 6);

        jar.release(checkpoint);
        assert_eq!(jar.checkpoint().position(), 1);
        let cookies = jar.cookies(&door()).unwrap();
        assert_eq!(cookies.to_str().unwrap(), "ASP.NET_SessionId=second");
    }

    #[test]
    fn clear_empties_the_jar() {
        let jar = SessionJar::new();
        set(&jar, "ASP.NET_SessionId=abc; Path=/");
        jar.clear();
        assert!(jar.cookies(&door()).is_none());
        assert_eq!(jar.checkpoint(), CookieCheckpoint(0));
    }
}
