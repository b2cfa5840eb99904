use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use stm_core::db::open_db;
use stm_core::{
    Conflict, ProjectDraft, ProjectService, ServiceError, SqliteStorage, TaskDraft, TaskService,
};

const SQUARE: &str = r#"{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}"#;

fn seed(path: &Path) -> uuid::Uuid {
    let conn = open_db(path).unwrap();
    let draft = ProjectDraft {
        name: "Contested".to_string(),
        users: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        owner: "a".to_string(),
        ..ProjectDraft::default()
    };
    let task = TaskDraft {
        process_points: 0,
        max_process_points: 4,
        geometry: SQUARE.to_string(),
    };
    let project = ProjectService::new(SqliteStorage::new(&conn))
        .create_project_with_tasks(&draft, &[task], "a")
        .unwrap();
    project.task_ids[0]
}

#[test]
fn concurrent_assignments_leave_exactly_one_assignee() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let task_id = seed(&path);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["b", "c"]
        .into_iter()
        .map(|user| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                barrier.wait();
                TaskService::new(SqliteStorage::new(&conn))
                    .assign_user(task_id, user)
                    .map(|task| task.assigned_user)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "{results:?}");
    assert!(results.iter().any(|result| matches!(
        result,
        Err(ServiceError::Conflict(Conflict::AlreadyAssigned { .. }))
    )));

    let conn = open_db(&path).unwrap();
    let stored = TaskService::new(SqliteStorage::new(&conn))
        .get_task(task_id, "a")
        .unwrap();
    assert_eq!(&stored.assigned_user, winners[0]);
}

#[test]
fn concurrent_progress_reports_keep_points_in_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.db");
    let task_id = seed(&path);

    let handles: Vec<_> = (0..4)
        .map(|points| {
            let path = path.clone();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                TaskService::new(SqliteStorage::new(&conn))
                    .set_process_points(task_id, points, "b")
                    .unwrap()
                    .version
            })
        })
        .collect();
    let mut versions: Vec<i64> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    versions.sort_unstable();
    versions.dedup();
    assert_eq!(versions.len(), 4);

    let conn = open_db(&path).unwrap();
    let stored = TaskService::new(SqliteStorage::new(&conn))
        .get_task(task_id, "a")
        .unwrap();
    assert!((0..=4).contains(&stored.process_points));
    assert_eq!(stored.version, versions[3]);
}
