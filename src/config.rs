use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};

const ENV_PREFIX: &str = "DOOR_";

/// The env vars that tune how we talk to the portal. All optional.
#[derive(Debug, Default, Deserialize)]
pub struct PortalEnv {
    base_url: Option<String>,
    sso_url: Option<String>,
    request_interval_ms: Option<u64>,
    timeout_secs: Option<u64>,
    user_agent: Option<String>,
    #[serde(default)]
    accept_invalid_certs: bool,
    poll_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub endpoints: Endpoints,
    /// Minimum spacing between two requests; zero disables pacing.
    pub request_interval: Duration,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
    /// How often a watching caller should refresh lecture progress.
    pub poll_interval: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            request_interval: Duration::ZERO,
            timeout: Duration::from_secs(30),
            user_agent: None,
            accept_invalid_certs: false,
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = PortalEnv::load_from_env()?;
        Ok(Self::from(env))
    }
}

impl From<PortalEnv> for PortalConfig {
    fn from(env: PortalEnv) -> Self {
        let defaults = PortalConfig::default();
        let endpoints = match (env.base_url, env.sso_url) {
            (None, None) => Endpoints::default(),
            (door, sso) => Endpoints::new(
                door.as_deref().unwrap_or(DOOR_HOST),
                sso.as_deref().unwrap_or(SSO_HOST),
            ),
        };
        Self {
            endpoints,
            request_interval: env
                .request_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_interval),
            timeout: env
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            user_agent: env.user_agent,
            accept_invalid_certs: env.accept_invalid_certs,
            poll_interval: env
                .poll_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
        }
    }
}

const DOOR_HOST: &str = "https://door.deu.ac.kr";
const SSO_HOST: &str = "https://sso.deu.ac.kr";

/// Placeholder replaced by the course id in course-scoped paths.
pub const COURSE_PLACEHOLDER: &str = "{course}";

/// Every URL the client talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub landing: String,
    pub login_page: String,
    pub portal_login: String,
    pub sso_login: String,
    pub check_token: String,
    pub check_auth: String,
    pub update_secure_token: String,
    pub agent_auth: String,
    pub sso_logon: String,
    pub profile: String,
    pub courses: String,
    pub syllabus: String,
    pub lectures: String,
    pub notices: String,
    pub references: String,
    pub assignments: String,
}

impl Default for Endpoints {
    /// The live portal. Landing and the token update go over plain http.
    fn default() -> Self {
        Self {
            landing: "http://door.deu.ac.kr/".into(),
            update_secure_token: "http://sso.deu.ac.kr/LoginServlet".into(),
            ..Self::new(DOOR_HOST, SSO_HOST)
        }
    }
}

impl Endpoints {
    /// Endpoints for a portal served from `door` with its SSO server at `sso`.
    pub fn new(door: &str, sso: &str) -> Self {
        let door = door.trim_end_matches('/');
        let sso = sso.trim_end_matches('/');
        Self {
            landing: format!("{door}/"),
            login_page: format!("{door}/sso/login.aspx"),
            portal_login: format!("{door}/Account/LoginDEU"),
            sso_login: format!("{sso}/LoginServlet?method=idpwProcessEx&ssid=30"),
            check_token: format!("{door}/sso/business.aspx"),
            check_auth: format!("{door}/sso/checkauth.aspx"),
            update_secure_token: format!("{sso}/LoginServlet"),
            agent_auth: format!("{door}/sso/agentProc.aspx"),
            sso_logon: format!("{door}/Account/SSOLogOnProcess"),
            profile: format!("{door}/Mypage/MyInfo"),
            courses: format!("{door}/MyPage"),
            syllabus: format!("{door}/LMS/LectureRoom/CourseLecturePlan/{COURSE_PLACEHOLDER}"),
            lectures: format!("{door}/LMS/StudyRoom/Index/{COURSE_PLACEHOLDER}"),
            notices: format!("{door}/BBS/Board/List/CourseNotice?cNo={COURSE_PLACEHOLDER}"),
            references: format!(
                "{door}/BBS/Board/List/CourseReference?cNo={COURSE_PLACEHOLDER}"
            ),
            assignments: format!(
                "{door}/LMS/LectureRoom/CourseHomeworkStudentList/{COURSE_PLACEHOLDER}"
            ),
        }
    }

    pub fn for_course(template: &str, course_id: &str) -> String {
        template.replace(COURSE_PLACEHOLDER, course_id)
    }
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config = envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .context("failed to load DOOR_* env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}
