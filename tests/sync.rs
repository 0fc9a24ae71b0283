mod common;

use std::sync::Arc;

use common::{FakeDoor, ID, credentials, endpoints};
use door_client::{
    Endpoints, FetchStatus, PROFILE_KEY, PortalConfig, PortalContext, PortalError, SyncError,
};
use pretty_assertions::assert_eq;

const STUDY_ROOM: &str = r#"
    <div id="sub_content2"><table>
      <thead><tr><th>주차</th><th>주제</th><th>강의명</th><th>학습기간</th><th>학습시간</th><th>진도율</th></tr></thead>
      <tbody>
        <tr><td>1주차</td><td>오리엔테이션</td><td>강의 소개</td><td>2020.03.16 ~ 2020.03.22</td><td>25분</td><td>100%</td></tr>
        <tr><td>2주차</td><td>배열</td><td>배열과 포인터</td><td>2020.03.23 ~ 2020.03.29</td><td>30분</td><td>40%</td></tr>
      </tbody>
    </table></div>"#;

const NOTICES: &str = r#"
    <div id="sub_content2"><table>
      <thead><tr><th>번호</th><th>제목</th><th>작성자</th><th>작성일</th><th>조회</th></tr></thead>
      <tbody>
        <tr><td>1</td><td><a href="/BBS/Board/View?boardNo=981">시험 안내</a></td><td>김교수</td><td>2020-04-01</td><td>57</td></tr>
      </tbody>
    </table></div>"#;

fn context(door: &Arc<FakeDoor>) -> PortalContext {
    let config = PortalConfig {
        endpoints: endpoints(),
        ..PortalConfig::default()
    };
    PortalContext::with_transport(config, Arc::clone(door) as _)
}

#[tokio::test]
async fn login_and_course_list_land_in_the_store() {
    let door = Arc::new(FakeDoor::new());
    let context = context(&door);
    let sync = &context.synchronizer;

    sync.authenticate(credentials()).await.unwrap();
    sync.refresh_courses().await.unwrap();

    let profile = context.store.profile.get(PROFILE_KEY);
    assert_eq!(profile.status, FetchStatus::Fulfilled);
    assert_eq!(profile.data.unwrap().id, ID);

    assert_eq!(context.store.courses.status(), FetchStatus::Fulfilled);
    assert_eq!(context.store.courses.ids(), ["77441", "77502"]);
    assert!(context.store.courses.last_fetched_at().is_some());
}

#[tokio::test]
async fn failed_login_is_recorded_on_the_profile() {
    let door = Arc::new(FakeDoor::new());
    let context = context(&door);

    let err = context
        .synchronizer
        .authenticate(door_client::Credentials::new(ID, "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Portal(PortalError::InvalidCredentials { .. })
    ));
    let profile = context.store.profile.get(PROFILE_KEY);
    assert!(matches!(profile.status, FetchStatus::Error(_)));
    assert_eq!(profile.data, None);
}

#[tokio::test]
async fn failed_retry_keeps_the_previous_data() {
    let door = Arc::new(FakeDoor::new());
    let context = context(&door);
    let sync = &context.synchronizer;
    sync.authenticate(credentials()).await.unwrap();
    sync.refresh_courses().await.unwrap();
    let before = context.store.courses.values();

    door.page(&endpoints().courses, "<html><body>점검 중입니다</body></html>");
    let err = sync.refresh_courses().await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Portal(PortalError::ExtractionFailed(_))
    ));
    assert!(matches!(
        context.store.courses.status(),
        FetchStatus::Error(_)
    ));
    assert_eq!(context.store.courses.values(), before);
    // Initial load, the logged-out looking page and its single retry.
    assert_eq!(door.requests_to(&endpoints().courses), 3);
}

#[tokio::test]
async fn course_resources_are_kept_per_course() {
    let door = Arc::new(FakeDoor::new());
    let e = endpoints();
    door.page(&Endpoints::for_course(&e.lectures, "77441"), STUDY_ROOM);
    door.page(&Endpoints::for_course(&e.notices, "77441"), NOTICES);
    let context = context(&door);
    let sync = &context.synchronizer;
    sync.authenticate(credentials()).await.unwrap();

    sync.refresh_lectures("77441").await.unwrap();
    sync.refresh_notices("77441").await.unwrap();

    let lectures = context.store.lectures.course("77441");
    assert_eq!(lectures.ids(), ["1", "2"]);
    assert_eq!(lectures.values()[1].progress(), Some(40));
    assert_eq!(context.store.notices.course("77441").ids(), ["981"]);
    assert_eq!(context.store.lectures.course("77502").ids(), Vec::<String>::new());

    sync.refresh_lecture_week("77441", 2).await.unwrap();
    assert_eq!(
        lectures.get("2").map(|entry| entry.status),
        Some(FetchStatus::Fulfilled)
    );
}

#[tokio::test]
async fn syllabi_are_refreshed_for_every_course() {
    let door = Arc::new(FakeDoor::new());
    door.page(
        &Endpoints::for_course(&endpoints().syllabus, "77441"),
        r#"<div class="form_table"><table>
             <tr><th>교과목개요</th><td>자료구조의 기초</td><th>담당교수</th><td>김교수</td></tr>
           </table></div>"#,
    );
    let context = context(&door);
    let sync = &context.synchronizer;
    sync.authenticate(credentials()).await.unwrap();
    sync.refresh_courses().await.unwrap();

    let results = sync.refresh_all_syllabi().await;

    assert_eq!(
        results.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
        ["77441", "77502"]
    );
    assert!(results[0].1.is_ok());
    assert!(matches!(
        results[1].1,
        Err(SyncError::Portal(PortalError::ExtractionFailed(_)))
    ));
    let syllabus = context.store.syllabi.get("77441");
    assert_eq!(
        syllabus.data.and_then(|syllabus| syllabus.description).as_deref(),
        Some("자료구조의 기초")
    );
    assert!(matches!(
        context.store.syllabi.status("77502"),
        FetchStatus::Error(_)
    ));
}

#[tokio::test]
async fn duplicate_refresh_is_rejected_while_one_is_in_flight() {
    let door = Arc::new(FakeDoor::new());
    let context = context(&door);
    let sync = &context.synchronizer;
    sync.authenticate(credentials()).await.unwrap();

    let (first, second) = tokio::join!(sync.refresh_courses(), sync.refresh_courses());

    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::Store(_))));
    assert_eq!(door.requests_to(&endpoints().courses), 1);
}
