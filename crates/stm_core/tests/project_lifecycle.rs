use rusqlite::Connection;
use std::time::Duration;
use stm_core::db::open_db_in_memory;
use stm_core::model::task::MAX_PROCESS_POINTS;
use stm_core::{
    Conflict, Denial, ErrorKind, Missing, Project, ProjectDraft, ProjectService,
    ProjectValidationError, ServiceError, ServiceOptions, SqliteStorage, TaskDraft, TaskService,
};
use uuid::Uuid;

const SQUARE: &str = r#"{"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}"#;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn task_drafts(max_points: &[i64]) -> Vec<TaskDraft> {
    max_points
        .iter()
        .map(|max| TaskDraft {
            process_points: 0,
            max_process_points: *max,
            geometry: SQUARE.to_string(),
        })
        .collect()
}

fn project_draft(owner: &str, users: &[&str]) -> ProjectDraft {
    ProjectDraft {
        name: "Harbour district".to_string(),
        description: "map every building".to_string(),
        users: users.iter().map(|user| user.to_string()).collect(),
        owner: owner.to_string(),
        ..ProjectDraft::default()
    }
}

fn create_project(conn: &Connection, owner: &str, users: &[&str], max_points: &[i64]) -> Project {
    ProjectService::new(SqliteStorage::new(conn))
        .create_project_with_tasks(&project_draft(owner, users), &task_drafts(max_points), owner)
        .unwrap()
}

fn assert_owner_is_member(project: &Project) {
    assert!(project.users.contains(&project.owner), "{project:?}");
}

#[test]
fn created_project_sums_task_points() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b"], &[10, 5]);

    assert_eq!(project.total_process_points, 15);
    assert_eq!(project.done_process_points, 0);
    assert_eq!(project.task_ids.len(), 2);
    assert_owner_is_member(&project);
}

#[test]
fn staged_tasks_are_bound_by_add_project() {
    let conn = setup();
    let tasks = TaskService::new(SqliteStorage::new(&conn))
        .stage_tasks(&task_drafts(&[4, 6]))
        .unwrap();
    assert!(tasks.iter().all(|task| task.project_id.is_none()));

    let mut draft = project_draft("a", &["a"]);
    draft.task_ids = tasks.iter().map(|task| task.id).collect();
    let project = ProjectService::new(SqliteStorage::new(&conn))
        .add_project(&draft, "a")
        .unwrap();

    assert_eq!(project.task_ids, draft.task_ids);
    assert_eq!(project.total_process_points, 10);
}

#[test]
fn add_project_validation_failures() {
    let conn = setup();
    let service = ProjectService::new(SqliteStorage::new(&conn));
    let staged = TaskService::new(SqliteStorage::new(&conn))
        .stage_tasks(&task_drafts(&[1]))
        .unwrap();

    let mut with_id = project_draft("a", &["a"]);
    with_id.id = Some(Uuid::new_v4());
    with_id.task_ids = vec![staged[0].id];
    assert!(matches!(
        service.add_project(&with_id, "a"),
        Err(ServiceError::InvalidProject(ProjectValidationError::IdAlreadySet))
    ));

    let mut owner_outside = project_draft("a", &["b"]);
    owner_outside.task_ids = vec![staged[0].id];
    assert!(matches!(
        service.add_project(&owner_outside, "a"),
        Err(ServiceError::InvalidProject(ProjectValidationError::OwnerNotInUsers))
    ));

    let no_tasks = project_draft("a", &["a"]);
    let err = service.add_project(&no_tasks, "a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut long = project_draft("a", &["a"]);
    long.task_ids = vec![staged[0].id];
    long.description = "x".repeat(10_001);
    assert!(matches!(
        service.add_project(&long, "a"),
        Err(ServiceError::InvalidProject(
            ProjectValidationError::DescriptionTooLong { length: 10_001, .. }
        ))
    ));
}

#[test]
fn add_project_requires_requester_to_be_the_owner() {
    let conn = setup();
    let service = ProjectService::new(SqliteStorage::new(&conn));
    let err = service
        .create_project_with_tasks(&project_draft("a", &["a", "b"]), &task_drafts(&[1]), "b")
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::NotAuthorized(Denial::NotDraftOwner)
    ));
    assert!(service.get_projects("a").unwrap().is_empty());
}

#[test]
fn unknown_task_ids_are_not_found() {
    let conn = setup();
    let missing = Uuid::new_v4();
    let mut draft = project_draft("a", &["a"]);
    draft.task_ids = vec![missing];

    let err = ProjectService::new(SqliteStorage::new(&conn))
        .add_project(&draft, "a")
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(Missing::Task(id)) if id == missing));
}

#[test]
fn reusing_a_bound_task_conflicts_without_partial_state() {
    let conn = setup();
    let first = create_project(&conn, "a", &["a"], &[3]);

    let mut draft = project_draft("a", &["a"]);
    draft.task_ids = first.task_ids.clone();
    let service = ProjectService::new(SqliteStorage::new(&conn));
    let err = service.add_project(&draft, "a").unwrap_err();

    assert!(matches!(err, ServiceError::Conflict(Conflict::TasksAlreadyUsed)));
    let projects = service.get_projects("a").unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, first.id);
    let project_rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM projects;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(project_rows, 1);
}

#[test]
fn reads_require_membership() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b"], &[2]);
    let service = ProjectService::new(SqliteStorage::new(&conn));

    assert_eq!(service.get_project(project.id, "b").unwrap().id, project.id);
    assert!(matches!(
        service.get_project(project.id, "c"),
        Err(ServiceError::NotAuthorized(Denial::NotMember { .. }))
    ));
    assert!(matches!(
        service.get_project(Uuid::new_v4(), "a"),
        Err(ServiceError::NotFound(Missing::Project(_)))
    ));

    let by_task = service.get_project_by_task(project.task_ids[0], "b").unwrap();
    assert_eq!(by_task.id, project.id);
    assert_eq!(
        service
            .get_project_by_task(project.task_ids[0], "c")
            .unwrap_err()
            .kind(),
        ErrorKind::NotAuthorized
    );
}

#[test]
fn progress_is_recomputed_from_live_tasks() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a"], &[10, 5]);
    let tasks = TaskService::new(SqliteStorage::new(&conn));
    tasks.set_process_points(project.task_ids[0], 7, "a").unwrap();
    tasks.set_process_points(project.task_ids[1], 5, "a").unwrap();

    let service = ProjectService::new(SqliteStorage::new(&conn));
    let reloaded = service.get_project(project.id, "a").unwrap();
    assert_eq!(reloaded.done_process_points, 12);
    assert_eq!(reloaded.total_process_points, 15);

    tasks.set_process_points(project.task_ids[0], 2, "a").unwrap();
    let listed = service.get_projects("a").unwrap();
    assert_eq!(listed[0].done_process_points, 7);
}

#[test]
fn add_user_requires_ownership_and_rejects_duplicates() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b"], &[1]);
    let service = ProjectService::new(SqliteStorage::new(&conn));

    assert!(matches!(
        service.add_user("c", project.id, "b"),
        Err(ServiceError::NotAuthorized(Denial::NotOwner { .. }))
    ));

    let updated = service.add_user("c", project.id, "a").unwrap();
    assert!(updated.is_member("c"));
    assert_owner_is_member(&updated);

    assert!(matches!(
        service.add_user("c", project.id, "a"),
        Err(ServiceError::Conflict(Conflict::AlreadyMember { .. }))
    ));
    assert!(matches!(
        service.add_user("  ", project.id, "a"),
        Err(ServiceError::InvalidUser(_))
    ));
}

#[test]
fn remove_user_rules() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b", "c"], &[1]);
    let service = ProjectService::new(SqliteStorage::new(&conn));

    assert!(matches!(
        service.remove_user(project.id, "b", "c"),
        Err(ServiceError::NotAuthorized(Denial::NonOwnerRemovingOther { .. }))
    ));
    assert!(matches!(
        service.remove_user(project.id, "a", "a"),
        Err(ServiceError::NotAuthorized(Denial::OwnerCannotBeRemoved { .. }))
    ));
    assert!(matches!(
        service.remove_user(project.id, "b", "a"),
        Err(ServiceError::NotAuthorized(Denial::OwnerCannotBeRemoved { .. }))
    ));
    assert!(matches!(
        service.remove_user(project.id, "z", "b"),
        Err(ServiceError::NotAuthorized(Denial::NotMember { .. }))
    ));

    let updated = service.remove_user(project.id, "b", "b").unwrap();
    assert!(!updated.is_member("b"));
    let updated = service.remove_user(project.id, "a", "c").unwrap();
    assert_eq!(updated.users.len(), 1);
    assert_owner_is_member(&updated);
}

#[test]
fn removing_the_same_member_twice_fails_the_second_time_without_changes() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b"], &[1]);
    let service = ProjectService::new(SqliteStorage::new(&conn));

    let after_first = service.remove_user(project.id, "a", "b").unwrap();
    let err = service.remove_user(project.id, "a", "b").unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::NotAuthorized | ErrorKind::NotFound
    ));
    let after_second = service.get_project(project.id, "a").unwrap();
    assert_eq!(after_first, after_second);
}

#[test]
fn owner_cannot_leave_but_members_can() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b"], &[1]);
    let service = ProjectService::new(SqliteStorage::new(&conn));

    assert!(matches!(
        service.leave_project(project.id, "a"),
        Err(ServiceError::NotAuthorized(Denial::OwnerCannotLeave { .. }))
    ));
    let updated = service.leave_project(project.id, "b").unwrap();
    assert!(!updated.is_member("b"));
    assert!(service.get_projects("b").unwrap().is_empty());
    assert!(matches!(
        service.leave_project(project.id, "b"),
        Err(ServiceError::NotAuthorized(Denial::NotMember { .. }))
    ));
}

#[test]
fn delete_project_requires_ownership_and_removes_tasks() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a", "b"], &[10, 5]);
    let service = ProjectService::new(SqliteStorage::new(&conn));
    let tasks = TaskService::new(SqliteStorage::new(&conn));

    assert!(matches!(
        service.delete_project(project.id, "b"),
        Err(ServiceError::NotAuthorized(Denial::NotOwner { .. }))
    ));
    assert_eq!(service.get_project(project.id, "b").unwrap(), project);
    assert_eq!(tasks.get_tasks(project.id, "b").unwrap().len(), 2);

    service.delete_project(project.id, "a").unwrap();
    assert!(matches!(
        service.get_project(project.id, "a"),
        Err(ServiceError::NotFound(Missing::Project(_)))
    ));
    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM tasks;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
    let memberships: i64 = conn
        .query_row("SELECT COUNT(*) FROM project_users;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(memberships, 0);
}

#[test]
fn expired_deadline_rolls_back_the_unit_of_work() {
    let conn = setup();
    let options = ServiceOptions {
        operation_timeout: Some(Duration::ZERO),
        ..ServiceOptions::default()
    };
    let service = ProjectService::with_options(SqliteStorage::new(&conn), options);

    let err = service
        .create_project_with_tasks(&project_draft("a", &["a"]), &task_drafts(&[3]), "a")
        .unwrap_err();
    assert!(matches!(err, ServiceError::DeadlineExceeded { .. }));
    assert_eq!(err.kind(), ErrorKind::Internal);

    let tasks: i64 = conn
        .query_row("SELECT COUNT(*) FROM tasks;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tasks, 0);
    assert!(ProjectService::new(SqliteStorage::new(&conn))
        .get_projects("a")
        .unwrap()
        .is_empty());
}

#[test]
fn padded_handles_round_trip_and_blank_handles_are_invalid() {
    let conn = setup();
    let project = create_project(&conn, "a", &["a"], &[1]);
    let service = ProjectService::new(SqliteStorage::new(&conn));

    let added = service.add_user(" carol ", project.id, " a ").unwrap();
    assert!(added.is_member("carol"));
    assert_eq!(service.get_project(project.id, "carol ").unwrap().id, project.id);

    let removed = service.remove_user(project.id, "a", " carol ").unwrap();
    assert!(!removed.is_member("carol"));

    for blank in ["", "   "] {
        let err = service.remove_user(project.id, "a", blank).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            service.leave_project(project.id, blank).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            service.get_project(project.id, blank).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            service.delete_project(project.id, blank).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }
    assert_eq!(service.get_project(project.id, "a").unwrap().users.len(), 1);
}

#[test]
fn extreme_point_values_are_bounded() {
    let conn = setup();
    let service = ProjectService::new(SqliteStorage::new(&conn));

    let err = service
        .create_project_with_tasks(
            &project_draft("a", &["a"]),
            &task_drafts(&[i64::MAX, i64::MAX]),
            "a",
        )
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTaskDraft { index: 0, .. }));
    assert!(service.get_projects("a").unwrap().is_empty());

    let project = create_project(&conn, "a", &["a"], &[MAX_PROCESS_POINTS, MAX_PROCESS_POINTS]);
    assert_eq!(project.total_process_points, 2 * MAX_PROCESS_POINTS);

    let tasks = TaskService::new(SqliteStorage::new(&conn));
    for task_id in &project.task_ids {
        tasks.set_process_points(*task_id, MAX_PROCESS_POINTS, "a").unwrap();
    }
    let reloaded = service.get_project(project.id, "a").unwrap();
    assert_eq!(reloaded.done_process_points, 2 * MAX_PROCESS_POINTS);
}
