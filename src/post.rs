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
    text_manipulators::{Period, entity_id_from_url, parse_datetime, parse_number},
};

static BOARD_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#sub_content2 table").expect("board selector"));

const NUMBER: &str = "번호";
const TITLE: &str = "제목";
const AUTHOR: &str = "작성자";
const CREATED: &str = "작성일";
const VIEWS: &str = "조회";
const DUE: &str = "제출기간";
const SUBMITTED: &str = "제출여부";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostVariant {
    Notice,
    Reference,
    Assignment,
}

/// One row of a course board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub variant: PostVariant,
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub views: Option<u32>,
}

impl Keyed for Post {
    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(flatten)]
    pub post: Post,
    pub due: Option<Period>,
    pub submitted: bool,
}

impl Assignment {
    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        !self.submitted && self.due.is_some_and(|due| due.to < now)
    }
}

impl Keyed for Assignment {
    fn key(&self) -> String {
        self.post.id.clone()
    }
}

fn post(variant: PostVariant, record: &TableRecord) -> Option<Post> {
    let title = record.non_empty(TITLE)?.to_string();
    let url = record.url(TITLE).map(str::to_string);
    // Notices pinned to the top show an icon instead of a number, so the link
    // is the more reliable id.
    let id = url
        .as_deref()
        .and_then(entity_id_from_url)
        .or_else(|| record.non_empty(NUMBER).map(str::to_string))?;
    Some(Post {
        variant,
        id,
        title,
        url,
        author: record.non_empty(AUTHOR).map(str::to_string),
        created_at: record.text(CREATED).and_then(parse_datetime),
        views: record.text(VIEWS).and_then(parse_number),
    })
}

fn is_submitted(text: &str) -> bool {
    text == "Y" || (text.contains("제출") && !text.contains('미'))
}

/// Board rows as posts. Rows without a title, such as the "no posts"
/// placeholder, are skipped.
pub fn parse_posts(variant: PostVariant, html: &str) -> Result<Vec<Post>, PortalError> {
    let document = Html::parse_document(html);
    let records =
        extract_first(&document, &BOARD_TABLE).ok_or_else(|| PortalError::extraction("board table"))?;
    Ok(records.iter().filter_map(|record| post(variant, record)).collect())
}

pub fn parse_assignments(html: &str) -> Result<Vec<Assignment>, PortalError> {
    let document = Html::parse_document(html);
    let records = extract_first(&document, &BOARD_TABLE)
        .ok_or_else(|| PortalError::extraction("assignment table"))?;
    Ok(records
        .iter()
        .filter_map(|record| {
            Some(Assignment {
                post: post(PostVariant::Assignment, record)?,
                due: record.text(DUE).and_then(Period::parse),
                submitted: record.text(SUBMITTED).is_some_and(is_submitted),
            })
        })
        .collect())
}

async fn fetch_board(
    session: &PortalSession,
    template: &str,
    course_id: &str,
    variant: PostVariant,
) -> Result<Vec<Post>, PortalError> {
    let url = Endpoints::for_course(template, course_id);
    session
        .fetch_page(PortalRequest::get(url), |html| parse_posts(variant, html))
        .await
}

pub async fn fetch_notices(session: &PortalSession, course_id: &str) -> Result<Vec<Post>, PortalError> {
    fetch_board(session, &session.endpoints().notices, course_id, PostVariant::Notice).await
}

pub async fn fetch_references(
    session: &PortalSession,
    course_id: &str,
) -> Result<Vec<Post>, PortalError> {
    let template = &session.endpoints().references;
    fetch_board(session, template, course_id, PostVariant::Reference).await
}

pub async fn fetch_assignments(
    session: &PortalSession,
    course_id: &str,
) -> Result<Vec<Assignment>, PortalError> {
    let url = Endpoints::for_course(&session.endpoints().assignments, course_id);
    session
        .fetch_page(PortalRequest::get(url), parse_assignments)
        .await
}
