use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use dotenv::dotenv;
use door_client::{EnvSecretStore, PROFILE_KEY, PortalContext, SecretStore, Synchronizer};
use log::{LevelFilter, info, warn};
use serde_json::json;

extern crate env_logger;
extern crate log;

const ID_VAR: &str = "DOOR_ID";

fn dump(synchronizer: &Synchronizer) -> anyhow::Result<String> {
    let store = synchronizer.store();
    let courses: Vec<_> = store
        .courses
        .values()
        .into_iter()
        .map(|course| {
            let id = course.id.clone();
            json!({
                "course": course,
                "syllabus": store.syllabi.get(&id),
                "lectures": store.lectures.course(&id).snapshot(),
                "notices": store.notices.course(&id).snapshot(),
                "references": store.references.course(&id).snapshot(),
                "assignments": store.assignments.course(&id).snapshot(),
            })
        })
        .collect();
    let dump = json!({
        "profile": store.profile.get(PROFILE_KEY),
        "courses": courses,
    });
    Ok(serde_json::to_string_pretty(&dump)?)
}

async fn watch_lectures(context: &PortalContext) {
    let synchronizer = &context.synchronizer;
    let period = context.config.poll_interval.max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    // The first tick fires immediately and the store is already fresh.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let now = Local::now().naive_local();
        for course in synchronizer.store().courses.values() {
            if let Err(err) = synchronizer.refresh_lectures(&course.id).await {
                warn!("{}: {err}", course.name);
                continue;
            }
            let weeks = synchronizer.store().lectures.course(&course.id).values();
            for week in weeks.iter().filter(|week| week.is_current(now)) {
                info!(
                    "{} week {}: {}%",
                    course.name,
                    week.week,
                    week.progress().unwrap_or(0)
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let watch = std::env::args().skip(1).any(|arg| arg == "--watch");

    let context = PortalContext::new()?;
    let id = std::env::var(ID_VAR).with_context(|| format!("{ID_VAR} is not set"))?;
    let credentials = EnvSecretStore.credentials(&id).await?;

    let synchronizer = &context.synchronizer;
    synchronizer
        .authenticate(credentials)
        .await
        .context("login failed")?;
    synchronizer
        .refresh_courses()
        .await
        .context("could not load the course list")?;
    info!("{} courses", synchronizer.store().courses.ids().len());

    let failed = synchronizer
        .refresh_all_courses()
        .await
        .into_iter()
        .filter(|(_, result)| result.is_err())
        .count();
    if failed > 0 {
        warn!("{failed} courses could not be refreshed completely");
    }

    println!("{}", dump(synchronizer)?);

    if watch {
        info!(
            "watching lecture progress every {}s",
            context.config.poll_interval.as_secs()
        );
        watch_lectures(&context).await;
    }
    Ok(())
}
