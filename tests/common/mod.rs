//! A scripted, in-process portal implementing `Transport`.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use door_client::{
    CookieCheckpoint, Credentials, Endpoints, Method, PortalRequest, Transport, TransportError,
};
use parking_lot::Mutex;

pub const ID: &str = "201611234";
pub const PASSWORD: &str = "hunter2";

pub const TOKEN: &str = "TOKEN";
pub const SESSION_ID: &str = "SID";

pub const MY_INFO: &str = r#"
    <html><body><div class="form_table"><table>
      <tr><th>구분</th><td>학부</td><th>전공</th><td>컴퓨터공학</td></tr>
      <tr><th>성명</th><td>홍길동</td><th>학번</th><td>201611234</td></tr>
    </table></div></body></html>"#;

pub const LOGIN_PAGE: &str = r#"
    <html><body><form action="/Account/LoginDEU">
      <input name="LoginID"><input name="LoginPW" type="password">
    </form></body></html>"#;

pub const MY_PAGE: &str = r#"
    <div id="sub_content2"><table>
      <thead><tr><th>년도/학기</th><th>구분</th><th>교과목명</th><th>담당교수</th><th>강의시간</th></tr></thead>
      <tbody>
        <tr><td>2020/1</td><td>전공</td><td><a href="/LMS/LectureRoom/Main/77441">자료구조</a></td><td>김교수</td><td>월1,2</td></tr>
        <tr><td>2020/1</td><td>교양</td><td><a href="/LMS/LectureRoom/Main/77502">글쓰기</a></td><td>이교수</td><td>화3</td></tr>
      </tbody>
    </table></div>"#;

// Cookie the portal sets once the last login step went through.
const AUTH_COOKIE: &str = ".ASPXAUTH";

pub fn endpoints() -> Endpoints {
    Endpoints::new("https://door.test", "https://sso.test")
}

pub fn credentials() -> Credentials {
    Credentials::new(ID, PASSWORD)
}

struct State {
    requests: Vec<PortalRequest>,
    // Cookie names in the order they were set.
    cookies: Vec<&'static str>,
    incorrect_count: u32,
    failing: HashSet<String>,
    pages: HashMap<String, String>,
}

pub struct FakeDoor {
    endpoints: Endpoints,
    state: Mutex<State>,
}

impl FakeDoor {
    pub fn new() -> Self {
        let endpoints = endpoints();
        let mut pages = HashMap::new();
        pages.insert(endpoints.courses.clone(), MY_PAGE.to_string());
        Self {
            endpoints,
            state: Mutex::new(State {
                requests: Vec::new(),
                cookies: Vec::new(),
                incorrect_count: 2,
                failing: HashSet::new(),
                pages,
            }),
        }
    }

    /// Serves `body` at `url` to logged-in clients.
    pub fn page(&self, url: &str, body: &str) {
        self.state
            .lock()
            .pages
            .insert(url.to_string(), body.to_string());
    }

    /// Answers 500 at `url` from now on.
    pub fn fail(&self, url: &str) {
        self.state.lock().failing.insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.state.lock().failing.remove(url);
    }

    /// The server forgets the session.
    pub fn expire(&self) {
        self.state.lock().cookies.retain(|name| *name != AUTH_COOKIE);
    }

    pub fn requests(&self) -> Vec<PortalRequest> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    pub fn cookies(&self) -> Vec<&'static str> {
        self.state.lock().cookies.clone()
    }

    fn respond(&self, request: &PortalRequest) -> Result<String, TransportError> {
        let e = &self.endpoints;
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if state.failing.contains(&request.url) {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: 500,
            });
        }

        let form_value = |key: &str| {
            request
                .form
                .as_ref()
                .and_then(|form| form.value(key))
                .unwrap_or_default()
                .to_string()
        };
        let logged_in = state.cookies.contains(&AUTH_COOKIE);

        let url = request.url.as_str();
        let body = if url == e.landing {
            state.cookies.push("ASP.NET_SessionId");
            String::new()
        } else if url == e.portal_login {
            r#"{"Code":1000,"Msg":"OK","Obj":0}"#.to_string()
        } else if url == e.sso_login {
            if form_value("id") == ID && form_value("pw") == PASSWORD {
                state.cookies.push("SSO_SESSION");
                format!(
                    r#"<form><input type="hidden" name="secureToken" value="{TOKEN}">
                       <input type="hidden" name="secureSessionId" value="{SESSION_ID}"></form>"#
                )
            } else {
                state.incorrect_count += 1;
                format!(
                    r#"<form><input type="hidden" name="incorrectCount" value="{}"></form>"#,
                    state.incorrect_count
                )
            }
        } else if url == e.sso_logon {
            if state.cookies.contains(&"SSO_SESSION") && request.method == Method::Post {
                state.cookies.push(AUTH_COOKIE);
            }
            String::new()
        } else if url == e.profile {
            let page = if logged_in { MY_INFO } else { LOGIN_PAGE };
            page.to_string()
        } else if let Some(page) = state.pages.get(url) {
            if logged_in {
                page.clone()
            } else {
                LOGIN_PAGE.to_string()
            }
        } else {
            String::new()
        };
        Ok(body)
    }
}

#[async_trait]
impl Transport for FakeDoor {
    async fn send(&self, request: &PortalRequest) -> Result<String, TransportError> {
        // Give concurrent callers a chance to interleave, like a real round trip.
        tokio::task::yield_now().await;
        self.respond(request)
    }

    fn checkpoint(&self) -> CookieCheckpoint {
        CookieCheckpoint::new(self.state.lock().cookies.len())
    }

    fn rollback(&self, checkpoint: CookieCheckpoint) {
        self.state.lock().cookies.truncate(checkpoint.position());
    }

    fn release(&self, _checkpoint: CookieCheckpoint) {}

    fn clear_cookies(&self) {
        self.state.lock().cookies.clear();
    }
}
