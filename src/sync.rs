//! Drives fetchers through the store's ticket protocol so callers only trigger
//! refreshes and read the store.

use std::{future::Future, sync::Arc};

use futures::future::join_all;
use log::{info, warn};

use crate::{
    auth::{Credentials, PortalSession},
    course::{Course, Syllabus, fetch_courses, fetch_syllabus},
    error::{PortalError, SyncError},
    lecture::{LectureWeek, fetch_lecture_week, fetch_lectures},
    post::{Assignment, Post, fetch_assignments, fetch_notices, fetch_references},
    store::{FetchableMap, FetchableStore, Keyed, PerCourse},
    user::{Profile, fetch_profile},
};

/// Key of the signed-in user's profile.
pub const PROFILE_KEY: &str = "me";

/// Everything fetched from the portal.
#[derive(Default)]
pub struct PortalStore {
    pub profile: FetchableStore<Profile>,
    pub courses: FetchableMap<Course>,
    pub syllabi: FetchableStore<Syllabus>,
    pub lectures: PerCourse<LectureWeek>,
    pub notices: PerCourse<Post>,
    pub references: PerCourse<Post>,
    pub assignments: PerCourse<Assignment>,
}

impl PortalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn sync_map<T, F>(map: &FetchableMap<T>, fetch: F) -> Result<(), SyncError>
where
    T: Clone + Keyed,
    F: Future<Output = Result<Vec<T>, PortalError>>,
{
    let ticket = map.begin_fetch_all()?;
    let result = fetch.await;
    let failure = result.as_ref().err().cloned();
    map.complete_fetch_all(ticket, result)?;
    failure.map_or(Ok(()), |err| Err(err.into()))
}

async fn sync_entry<T, F>(store: &FetchableStore<T>, key: &str, fetch: F) -> Result<(), SyncError>
where
    T: Clone,
    F: Future<Output = Result<T, PortalError>>,
{
    let ticket = store.begin_fetch(key)?;
    let result = fetch.await;
    let failure = result.as_ref().err().cloned();
    store.complete_fetch(ticket, result)?;
    failure.map_or(Ok(()), |err| Err(err.into()))
}

#[derive(Clone)]
pub struct Synchronizer {
    session: Arc<PortalSession>,
    store: Arc<PortalStore>,
}

impl Synchronizer {
    pub fn new(session: Arc<PortalSession>, store: Arc<PortalStore>) -> Self {
        Self { session, store }
    }

    pub fn session(&self) -> &PortalSession {
        &self.session
    }

    pub fn store(&self) -> &PortalStore {
        &self.store
    }

    /// Logs in and records the resulting profile, or the failure, under
    /// [`PROFILE_KEY`].
    pub async fn authenticate(&self, credentials: Credentials) -> Result<(), SyncError> {
        sync_entry(
            &self.store.profile,
            PROFILE_KEY,
            self.session.authenticate(credentials),
        )
        .await
    }

    pub async fn refresh_profile(&self) -> Result<(), SyncError> {
        sync_entry(&self.store.profile, PROFILE_KEY, fetch_profile(&self.session)).await
    }

    pub async fn refresh_courses(&self) -> Result<(), SyncError> {
        sync_map(&self.store.courses, fetch_courses(&self.session)).await
    }

    pub async fn refresh_syllabus(&self, course_id: &str) -> Result<(), SyncError> {
        sync_entry(
            &self.store.syllabi,
            course_id,
            fetch_syllabus(&self.session, course_id),
        )
        .await
    }

    pub async fn refresh_lectures(&self, course_id: &str) -> Result<(), SyncError> {
        let lectures = self.store.lectures.course(course_id);
        sync_map(&lectures, fetch_lectures(&self.session, course_id)).await
    }

    /// Refreshes one week without touching the rest of the course's weeks.
    pub async fn refresh_lecture_week(&self, course_id: &str, week: u32) -> Result<(), SyncError> {
        let lectures = self.store.lectures.course(course_id);
        let ticket = lectures.begin_fetch(&week.to_string())?;
        let result = fetch_lecture_week(&self.session, course_id, week).await;
        let failure = result.as_ref().err().cloned();
        lectures.complete_fetch(ticket, result)?;
        failure.map_or(Ok(()), |err| Err(err.into()))
    }

    pub async fn refresh_notices(&self, course_id: &str) -> Result<(), SyncError> {
        let notices = self.store.notices.course(course_id);
        sync_map(&notices, fetch_notices(&self.session, course_id)).await
    }

    pub async fn refresh_references(&self, course_id: &str) -> Result<(), SyncError> {
        let references = self.store.references.course(course_id);
        sync_map(&references, fetch_references(&self.session, course_id)).await
    }

    pub async fn refresh_assignments(&self, course_id: &str) -> Result<(), SyncError> {
        let assignments = self.store.assignments.course(course_id);
        sync_map(&assignments, fetch_assignments(&self.session, course_id)).await
    }

    /// Every per-course resource of one course, concurrently. Returns the
    /// first failure after all of them have finished.
    pub async fn refresh_course(&self, course_id: &str) -> Result<(), SyncError> {
        let (syllabus, lectures, notices, references, assignments) = futures::join!(
            self.refresh_syllabus(course_id),
            self.refresh_lectures(course_id),
            self.refresh_notices(course_id),
            self.refresh_references(course_id),
            self.refresh_assignments(course_id),
        );
        syllabus
            .and(lectures)
            .and(notices)
            .and(references)
            .and(assignments)
    }

    /// Refreshes every known course. Failures are logged and returned per
    /// course so one broken page doesn't hide the others.
    pub async fn refresh_all_courses(&self) -> Vec<(String, Result<(), SyncError>)> {
        let ids = self.store.courses.ids();
        let results = join_all(ids.iter().map(|id| self.refresh_course(id))).await;
        let results: Vec<_> = ids.into_iter().zip(results).collect();
        for (id, result) in &results {
            match result {
                Ok(()) => info!("course {id} refreshed"),
                Err(err) => warn!("course {id}: {err}"),
            }
        }
        results
    }

    pub async fn refresh_all_syllabi(&self) -> Vec<(String, Result<(), SyncError>)> {
        let ids = self.store.courses.ids();
        let results = join_all(ids.iter().map(|id| self.refresh_syllabus(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Drops the session and leaves the store as it is.
    pub async fn logout(&self) {
        self.session.logout().await;
    }
}
