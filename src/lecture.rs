use std::sync::LazyLock;

use chrono::NaiveDateTime;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    auth::PortalSession,
    config::Endpoints,
    error::PortalError,
    requests::PortalRequest,
    store::Keyed,
    table::{TableRecord, extract_first},
    text_manipulators::{Period, parse_number, parse_percent},
};

static LECTURE_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#sub_content2 table").expect("lecture table selector"));

const WEEK: &str = "주차";
const TOPIC: &str = "주제";
const TITLE: &str = "강의명";
const PERIOD: &str = "학습기간";
const DURATION: &str = "학습시간";
const PROGRESS: &str = "진도율";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lecture {
    pub title: String,
    pub url: Option<String>,
    pub period: Option<Period>,
    pub duration: Option<String>,
    /// Percentage watched, when the portal reports it.
    pub progress: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LectureWeek {
    pub week: u32,
    pub description: String,
    pub period: Option<Period>,
    pub lectures: Vec<Lecture>,
}

impl LectureWeek {
    pub fn is_current(&self, now: NaiveDateTime) -> bool {
        self.period.is_some_and(|period| period.contains(now))
    }

    /// Mean progress over the lectures that report one.
    pub fn progress(&self) -> Option<u8> {
        let known: Vec<u32> = self
            .lectures
            .iter()
            .filter_map(|lecture| lecture.progress.map(u32::from))
            .collect();
        if known.is_empty() {
            return None;
        }
        Some((known.iter().sum::<u32>() / known.len() as u32) as u8)
    }
}

impl Keyed for LectureWeek {
    fn key(&self) -> String {
        self.week.to_string()
    }
}

fn lecture(record: &TableRecord) -> Option<Lecture> {
    Some(Lecture {
        title: record.non_empty(TITLE)?.to_string(),
        url: record.url(TITLE).map(str::to_string),
        period: record.text(PERIOD).and_then(Period::parse),
        duration: record.non_empty(DURATION).map(str::to_string),
        progress: record.text(PROGRESS).and_then(parse_percent),
    })
}

/// Online lectures grouped by week. Weeks keep the order the portal lists
/// them in; a week spanning several rows collects all their lectures.
pub fn parse_lectures(html: &str) -> Result<Vec<LectureWeek>, PortalError> {
    let document = Html::parse_document(html);
    let records = extract_first(&document, &LECTURE_TABLE)
        .ok_or_else(|| PortalError::extraction("lecture table"))?;

    let mut weeks: Vec<LectureWeek> = Vec::new();
    for record in &records {
        let Some(week) = record.text(WEEK).and_then(parse_number) else {
            continue;
        };
        let index = match weeks.iter().position(|w| w.week == week) {
            Some(index) => index,
            None => {
                weeks.push(LectureWeek {
                    week,
                    description: record.text(TOPIC).unwrap_or_default().to_string(),
                    period: record.text(PERIOD).and_then(Period::parse),
                    lectures: Vec::new(),
                });
                weeks.len() - 1
            }
        };
        if let Some(lecture) = lecture(record) {
            weeks[index].lectures.push(lecture);
        }
    }
    Ok(weeks)
}

pub async fn fetch_lectures(
    session: &PortalSession,
    course_id: &str,
) -> Result<Vec<LectureWeek>, PortalError> {
    let url = Endpoints::for_course(&session.endpoints().lectures, course_id);
    session.fetch_page(PortalRequest::get(url), parse_lectures).await
}

/// A single week, for refreshing one entry without reloading the list view.
pub async fn fetch_lecture_week(
    session: &PortalSession,
    course_id: &str,
    week: u32,
) -> Result<LectureWeek, PortalError> {
    fetch_lectures(session, course_id)
        .await?
        .into_iter()
        .find(|w| w.week == week)
        .ok_or_else(|| PortalError::extraction(format!("week {week} of course {course_id}")))
}
