use std::{collections::BTreeMap, sync::LazyLock};

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    auth::PortalSession,
    config::Endpoints,
    error::PortalError,
    requests::PortalRequest,
    store::Keyed,
    table::{extract_first, table_rows},
    text_manipulators::entity_id_from_url,
};

static COURSE_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#sub_content2 table").expect("course table selector"));
static SYLLABUS_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.form_table table").expect("syllabus selector"));

// Column headers of the enrolled-course table.
const TERM: &str = "년도/학기";
const KIND: &str = "구분";
const NAME: &str = "교과목명";
const PROFESSOR: &str = "담당교수";
const SCHEDULE: &str = "강의시간";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub professor: Option<String>,
    /// 전공, 교양, ...
    pub kind: Option<String>,
    pub term: Option<String>,
    pub schedule: Option<String>,
    pub url: String,
}

impl Keyed for Course {
    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Enrolled courses, in the order the portal lists them. Rows without a link
/// to a lecture room (e.g. "no courses" placeholders) are skipped.
pub fn parse_courses(html: &str) -> Result<Vec<Course>, PortalError> {
    let document = Html::parse_document(html);
    let records =
        extract_first(&document, &COURSE_TABLE).ok_or_else(|| PortalError::extraction("course table"))?;

    let courses = records
        .iter()
        .filter_map(|record| {
            let url = record.url(NAME)?.to_string();
            Some(Course {
                id: entity_id_from_url(&url)?,
                name: record.non_empty(NAME)?.to_string(),
                professor: record.non_empty(PROFESSOR).map(str::to_string),
                kind: record.non_empty(KIND).map(str::to_string),
                term: record.non_empty(TERM).map(str::to_string),
                schedule: record.non_empty(SCHEDULE).map(str::to_string),
                url,
            })
        })
        .collect();
    Ok(courses)
}

pub async fn fetch_courses(session: &PortalSession) -> Result<Vec<Course>, PortalError> {
    let request = PortalRequest::get(&session.endpoints().courses);
    session.fetch_page(request, parse_courses).await
}

/// The course plan ("강의계획서"): label/value cell pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Syllabus {
    pub course_id: String,
    pub description: Option<String>,
    pub goal: Option<String>,
    pub professor: Option<String>,
    pub textbook: Option<String>,
    pub evaluation: Option<String>,
    /// Every label/value pair on the page, including the ones above.
    pub fields: BTreeMap<String, String>,
}

pub fn parse_syllabus(course_id: &str, html: &str) -> Result<Syllabus, PortalError> {
    let document = Html::parse_document(html);
    let table = document
        .select(&SYLLABUS_TABLE)
        .next()
        .ok_or_else(|| PortalError::extraction("syllabus table"))?;

    let mut fields = BTreeMap::new();
    for row in table_rows(table) {
        for pair in row.chunks(2) {
            if let [label, value] = pair {
                if !label.text.is_empty() {
                    fields.insert(label.text.clone(), value.text.clone());
                }
            }
        }
    }

    let field = |label: &str| fields.get(label).filter(|v| !v.is_empty()).cloned();
    Ok(Syllabus {
        course_id: course_id.to_string(),
        description: field("교과목개요"),
        goal: field("학습목표"),
        professor: field("담당교수"),
        textbook: field("주교재"),
        evaluation: field("평가방법"),
        fields,
    })
}

pub async fn fetch_syllabus(session: &PortalSession, course_id: &str) -> Result<Syllabus, PortalError> {
    let url = Endpoints::for_course(&session.endpoints().syllabus, course_id);
    session
        .fetch_page(PortalRequest::get(url), |html| parse_syllabus(course_id, html))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MY_PAGE: &str = r#"
        <div id="sub_content2">
          <table>
            <thead><tr><th>년도/학기</th><th>구분</th><th>교과목명</th><th>담당교수</th><th>강의시간</th></tr></thead>
            <tbody>
              <tr><td>2020/1</td><td>전공</td><td><a href="/LMS/LectureRoom/Main/77441">자료구조</a></td><td>김교수</td><td>월1,2</td></tr>
              <tr><td>2020/1</td><td>교양</td><td><a href="/LMS/LectureRoom/Main/77502">글쓰기</a></td><td></td></tr>
              <tr><td colspan="5">수강 과목이 없습니다.</td></tr>
            </tbody>
          </table>
        </div>"#;

    #[test]
    fn parses_enrolled_courses_in_order() {
        let courses = parse_courses(MY_PAGE).unwrap();
        assert_eq!(courses.len(), 2);
        assert_eq!(
            courses[0],
            Course {
                id: "77441".into(),
                name: "자료구조".into(),
                professor: Some("김교수".into()),
                kind: Some("전공".into()),
                term: Some("2020/1".into()),
                schedule: Some("월1,2".into()),
                url: "/LMS/LectureRoom/Main/77441".into(),
            }
        );
        assert_eq!(courses[1].id, "77502");
        assert_eq!(courses[1].professor, None);
        assert_eq!(courses[1].schedule, None);
    }

    #[test]
    fn missing_table_is_extraction_failure() {
        assert!(matches!(
            parse_courses("<html><body>로그인</body></html>"),
            Err(PortalError::ExtractionFailed(_))
        ));
    }

    #[test]
    fn syllabus_reads_label_value_pairs() {
        let html = r#"
            <div class="form_table"><table>
              <tr><th>교과목개요</th><td>자료구조의 기초</td><th>담당교수</th><td>김교수</td></tr>
              <tr><th>학습목표</th><td>리스트와 트리</td></tr>
              <tr><th>주교재</th><td></td></tr>
            </table></div>"#;
        let syllabus = parse_syllabus("77441", html).unwrap();
        assert_eq!(syllabus.description.as_deref(), Some("자료구조의 기초"));
        assert_eq!(syllabus.goal.as_deref(), Some("리스트와 트리"));
        assert_eq!(syllabus.professor.as_deref(), Some("김교수"));
        assert_eq!(syllabus.textbook, None);
        assert_eq!(syllabus.fields.len(), 4);
    }
}
