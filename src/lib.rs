mod auth;
mod config;
mod context;
mod cookies;
mod course;
mod error;
mod form;
mod lecture;
mod post;
mod ratelimit;
mod requests;
mod secrets;
mod store;
mod sync;
mod table;
mod text_manipulators;
mod user;

pub use auth::{AuthPhase, Credentials, HandshakeStep, PortalSession};
pub use config::{COURSE_PLACEHOLDER, Endpoints, PortalConfig};
pub use context::PortalContext;
pub use cookies::{CookieCheckpoint, SessionJar};
pub use course::{Course, Syllabus, fetch_courses, fetch_syllabus, parse_courses, parse_syllabus};
pub use error::{PortalError, StoreError, SyncError, TransportError};
pub use form::{Form, FormValue};
pub use lecture::{Lecture, LectureWeek, fetch_lecture_week, fetch_lectures, parse_lectures};
pub use post::{
    Assignment, Post, PostVariant, fetch_assignments, fetch_notices, fetch_references,
    parse_assignments, parse_posts,
};
pub use requests::{Method, PortalRequest, RequestClient, Transport};
pub use secrets::{EnvSecretStore, MemorySecretStore, SecretStore};
pub use store::{
    FetchStatus, FetchableEntry, FetchableMap, FetchableStore, Keyed, MapSnapshot, MapTicket,
    PerCourse, Ticket,
};
pub use sync::{PROFILE_KEY, PortalStore, Synchronizer};
pub use table::{Cell, TableRecord, extract_first, extract_table, table_rows};
pub use text_manipulators::Period;
pub use user::{Profile, fetch_profile, parse_profile};
