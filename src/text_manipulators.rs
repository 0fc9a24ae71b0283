use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use url::Url;

// Any absolute base works: only path and query of the href are inspected.
const ID_BASE: &str = "https://door.deu.ac.kr/";
const ID_QUERY_KEYS: [&str; 4] = ["cNo", "CourseNo", "boardNo", "id"];

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})[-./](\d{1,2})[-./](\d{1,2})(?:\.?\s+(\d{1,2}):(\d{2}))?")
        .expect("date pattern")
});
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("number pattern"));

/// Text content of a node, trimmed.
pub fn extract_text(node: ElementRef) -> String {
    node.text().collect::<String>().trim().to_string()
}

/// `href` of the first descendant (or the node itself) that carries a
/// non-empty one.
pub fn first_href(node: ElementRef) -> Option<String> {
    std::iter::once(node)
        .chain(node.descendants().filter_map(ElementRef::wrap))
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

/// Portal id hidden in a link: a well-known query parameter if present,
/// otherwise the last path segment.
pub fn entity_id_from_url(href: &str) -> Option<String> {
    let base = Url::parse(ID_BASE).ok()?;
    let url = base.join(href).ok()?;
    let from_query = url.query_pairs().find_map(|(key, value)| {
        (ID_QUERY_KEYS.contains(&key.as_ref()) && !value.is_empty()).then(|| value.into_owned())
    });
    from_query.or_else(|| {
        url.path_segments()?
            .filter(|segment| !segment.is_empty())
            .last()
            .map(str::to_string)
    })
}

/// First run of digits in `text`.
pub fn parse_number(text: &str) -> Option<u32> {
    NUMBER.find(text)?.as_str().parse().ok()
}

/// `"85%"`, `"85.0 %"` → 85, clamped to 100.
pub fn parse_percent(text: &str) -> Option<u8> {
    let number = parse_number(text)?;
    Some(number.min(100) as u8)
}

/// First date in `text`, with its time when one follows.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    DATE.captures_iter(text).find_map(|caps| {
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let date = NaiveDate::from_ymd_opt(field(1)? as i32, field(2)?, field(3)?)?;
        let time = match (field(4), field(5)) {
            (Some(hour), Some(minute)) => NaiveTime::from_hms_opt(hour, minute, 0)?,
            _ => NaiveTime::MIN,
        };
        Some(date.and_time(time))
    })
}

/// A `from ~ to` range as the portal prints it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

impl Period {
    pub fn parse(text: &str) -> Option<Self> {
        let (from, to) = text.split_once('~')?;
        Some(Self {
            from: parse_datetime(from)?,
            to: parse_datetime(to)?,
        })
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.from <= at && at <= self.to
    }
}
