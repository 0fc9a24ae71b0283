use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::{
    auth::PortalSession, error::PortalError, requests::PortalRequest, table::table_rows,
};

static PROFILE_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.form_table > table").expect("profile selector"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    /// 학부, 대학원, ...
    #[serde(rename = "type")]
    pub kind: String,
    pub major: String,
}

/// Reads the profile off the "my info" page.
///
/// The table has label cells and value cells side by side and no header row:
///
/// | 구분 | *type* | 전공 | *major* |
/// |------|--------|------|---------|
/// | 성명 | *name* | 학번 | *id*    |
pub fn parse_profile(html: &str) -> Result<Profile, PortalError> {
    let document = Html::parse_document(html);
    let table = document
        .select(&PROFILE_TABLE)
        .next()
        .ok_or_else(|| PortalError::extraction("profile table"))?;

    let rows = table_rows(table);
    let value = |row: usize, column: usize| {
        rows.get(row)
            .and_then(|cells| cells.get(column))
            .map(|cell| cell.text.clone())
    };

    match (value(1, 3), value(1, 1), value(0, 1), value(0, 3)) {
        (Some(id), Some(name), Some(kind), Some(major)) if !id.is_empty() => Ok(Profile {
            id,
            name,
            kind,
            major,
        }),
        _ => Err(PortalError::extraction("profile cells")),
    }
}

pub async fn fetch_profile(session: &PortalSession) -> Result<Profile, PortalError> {
    let request = PortalRequest::get(&session.endpoints().profile);
    session.fetch_page(request, parse_profile).await
}
