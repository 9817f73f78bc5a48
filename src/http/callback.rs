use super::http_error::HttpError;
use crate::database::{Database, Run};
use crate::message::ResultMessage;
use actix_web::http::Method;
use log::{info, warn};

/// Apply a result reported by a worker to the run it belongs to
/// Requests are validated before anything is written, so a rejected request never changes the run.
pub fn handle(
    db: &Database,
    method: &Method,
    slug: &str,
    run_id: i32,
    body: &[u8],
) -> Result<Run, HttpError> {
    if *method != Method::POST {
        return Err(HttpError::MethodNotAllowed);
    }

    let run = db.get_run(slug, run_id)?.ok_or(HttpError::NotFound)?;
    if run.status.is_terminal() {
        warn!("{slug}: rejecting result for run {run_id}, which is already {}", run.status);
        return Err(HttpError::BadRequest(format!(
            "Run {run_id} is not in progress"
        )));
    }

    let result = serde_json::from_slice::<ResultMessage>(body).map_err(|err| {
        warn!("{slug}: rejecting malformed result for run {run_id}: {err}");
        HttpError::BadRequest(format!("Invalid result: {err}"))
    })?;

    let status = result.run_status();
    if !db.complete_run(run_id, status, &result.output)? {
        // Another request completed the run after it was loaded
        warn!("{slug}: run {run_id} was completed concurrently");
        return Err(HttpError::BadRequest(format!(
            "Run {run_id} is not in progress"
        )));
    }
    info!("{slug}: run {run_id} {status} with exit code {}", result.status);

    db.get_run(slug, run_id)?.ok_or(HttpError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandDefinition;
    use crate::run_status::RunStatus;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn setup() -> (Database, Run) {
        let db = Database::open_in_memory().unwrap();
        let mut definitions = BTreeMap::new();
        for slug in ["backup", "cleanup"] {
            definitions.insert(
                slug.to_owned(),
                CommandDefinition {
                    title: slug.to_owned(),
                    description: None,
                    command: format!("echo {slug}"),
                },
            );
        }
        db.sync_commands(&definitions).unwrap();
        let command = db.get_command("backup").unwrap().unwrap();
        let run = db.insert_run(&command).unwrap();
        (db, run)
    }

    fn post(db: &Database, slug: &str, run_id: i32, body: &str) -> Result<Run, HttpError> {
        handle(db, &Method::POST, slug, run_id, body.as_bytes())
    }

    #[test]
    fn test_success() {
        let (db, run) = setup();
        let run = post(&db, "backup", run.id, r#"{"status": 0, "output": "X"}"#).unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.output.as_deref(), Some("X"));
        assert_eq!(
            db.get_command_status("backup").unwrap(),
            Some(RunStatus::Succeeded)
        );
    }

    #[test]
    fn test_failure() {
        let (db, run) = setup();
        let run = post(&db, "backup", run.id, r#"{"status": 7, "output": "Y"}"#).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.output.as_deref(), Some("Y"));
    }

    #[test]
    fn test_duplicate_result() {
        let (db, run) = setup();
        post(&db, "backup", run.id, r#"{"status": 0, "output": "X"}"#).unwrap();

        assert_matches!(
            post(&db, "backup", run.id, r#"{"status": 1, "output": "Z"}"#),
            Err(HttpError::BadRequest(_))
        );
        let stored = db.get_run("backup", run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.output.as_deref(), Some("X"));
    }

    #[test]
    fn test_wrong_method() {
        let (db, run) = setup();
        assert_matches!(
            handle(&db, &Method::GET, "backup", run.id, b""),
            Err(HttpError::MethodNotAllowed)
        );
        // The method is checked before the run is looked up
        assert_matches!(
            handle(&db, &Method::PUT, "backup", 999, b""),
            Err(HttpError::MethodNotAllowed)
        );
    }

    #[test]
    fn test_unknown_run() {
        let (db, run) = setup();
        assert_matches!(
            post(&db, "backup", run.id + 1, r#"{"status": 0, "output": ""}"#),
            Err(HttpError::NotFound)
        );
        assert_matches!(
            post(&db, "cleanup", run.id, r#"{"status": 0, "output": ""}"#),
            Err(HttpError::NotFound)
        );
        assert_matches!(
            post(&db, "missing", run.id, r#"{"status": 0, "output": ""}"#),
            Err(HttpError::NotFound)
        );
    }

    #[test]
    fn test_malformed_result() {
        let (db, run) = setup();
        for body in ["not json", r#"{"status": 0}"#, r#"{"status": "0", "output": ""}"#] {
            assert_matches!(post(&db, "backup", run.id, body), Err(HttpError::BadRequest(_)));
        }
        let stored = db.get_run("backup", run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::InProgress);
        assert_eq!(stored.output, None);
    }
}
