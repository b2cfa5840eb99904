//! Request boundary for the task manager core.
//!
//! # Responsibility
//! - Authenticate the bearer credential of every request.
//! - Open one storage connection per request and run one manager call on it.
//! - Map manager errors onto status codes with JSON bodies.
//!
//! # Invariants
//! - Handlers never panic; every outcome is an `ApiResponse`.
//! - Internal failures are logged with detail and answered generically.
//! - No routing happens here; one handler exists per endpoint.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use stm_core::auth::unix_now;
use stm_core::{
    connect_db, open_db_with, ConfigError, CoreConfig, DbError, DbOptions, ErrorKind, IdentityProvider,
    ProjectDraft, ProjectService, ServiceError, ServiceOptions, SqliteStorage, TaskDraft,
    TaskService, TokenError, TokenSigner, UserId,
};
use uuid::Uuid;

const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(err) => {
                error!("event=api_encode module=api status=error error={err}");
                Self::error(500, INTERNAL_ERROR_MESSAGE)
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }).to_string(),
        }
    }

    fn bad_request(message: impl Display) -> Self {
        Self::error(400, &message.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Status code for a manager error kind.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation => 400,
        ErrorKind::NotAuthorized => 403,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::Internal => 500,
    }
}

/// Boundary construction failure.
#[derive(Debug)]
pub enum ApiInitError {
    MissingDatabasePath,
    Config(ConfigError),
    Token(TokenError),
    Db(DbError),
}

impl Display for ApiInitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDatabasePath => write!(f, "database_path must be configured"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Token(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ApiInitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingDatabasePath => None,
            Self::Config(err) => Some(err),
            Self::Token(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

/// `POST /projects` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddProjectRequest {
    pub project: ProjectDraft,
    /// Tasks created together with the project.
    #[serde(default)]
    pub tasks: Vec<TaskDraft>,
}

/// `POST /tasks` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTasksRequest {
    /// Existing project to append to; tasks are staged when absent.
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub tasks: Vec<TaskDraft>,
}

/// Shared state of all handlers.
pub struct ApiContext {
    db_path: PathBuf,
    db_options: DbOptions,
    service_options: ServiceOptions,
    signer: TokenSigner,
}

impl ApiContext {
    /// Validates `config`, migrates the database once and builds the signer.
    pub fn new(config: CoreConfig) -> Result<Self, ApiInitError> {
        config.validate().map_err(ApiInitError::Config)?;
        let db_path = config
            .database_path
            .clone()
            .ok_or(ApiInitError::MissingDatabasePath)?;
        let db_options = config.db_options();
        open_db_with(&db_path, &db_options).map_err(ApiInitError::Db)?;
        let signer = config.token_signer().map_err(ApiInitError::Token)?;

        info!("event=api_init module=api status=ok");
        Ok(Self {
            db_path,
            db_options,
            service_options: config.service_options(),
            signer,
        })
    }

    /// Stand-in for the identity provider callback: issues a token for `user`.
    pub fn issue_token(&self, user: &str) -> ApiResponse {
        match self.signer.issue(user, unix_now()) {
            Ok(token) => match self.signer.encode(&token) {
                Ok(encoded) => ApiResponse::json(
                    200,
                    &json!({ "token": encoded, "validUntil": token.valid_until }),
                ),
                Err(err) => {
                    error!("event=token_issue module=api status=error error={err}");
                    ApiResponse::error(500, INTERNAL_ERROR_MESSAGE)
                }
            },
            Err(err) => ApiResponse::bad_request(err),
        }
    }

    /// `GET /projects`
    pub fn get_projects(&self, credential: Option<&str>) -> ApiResponse {
        self.handle("get_projects", credential, |user, storage| {
            ProjectService::with_options(storage, self.service_options).get_projects(user)
        })
    }

    /// `POST /projects`
    pub fn add_project(&self, credential: Option<&str>, body: &str) -> ApiResponse {
        let request: AddProjectRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(err) => return self.reject_body(credential, err),
        };
        self.handle("add_project", credential, |user, storage| {
            let service = ProjectService::with_options(storage, self.service_options);
            if request.tasks.is_empty() {
                service.add_project(&request.project, user)
            } else {
                service.create_project_with_tasks(&request.project, &request.tasks, user)
            }
        })
    }

    /// `DELETE /projects/{id}`
    pub fn delete_project(&self, credential: Option<&str>, project_id: &str) -> ApiResponse {
        let Some(project_id) = parse_id(project_id) else {
            return self.reject_id(credential, "project id");
        };
        self.handle("delete_project", credential, |user, storage| {
            ProjectService::with_options(storage, self.service_options)
                .delete_project(project_id, user)
                .map(|()| json!({ "id": project_id }))
        })
    }

    /// `POST /projects/{id}/users?uid=`
    pub fn add_user(&self, credential: Option<&str>, project_id: &str, uid: &str) -> ApiResponse {
        let Some(project_id) = parse_id(project_id) else {
            return self.reject_id(credential, "project id");
        };
        self.handle("add_user", credential, |user, storage| {
            ProjectService::with_options(storage, self.service_options)
                .add_user(uid, project_id, user)
        })
    }

    /// `DELETE /projects/{id}/users/{uid}`
    pub fn remove_user(&self, credential: Option<&str>, project_id: &str, uid: &str) -> ApiResponse {
        let Some(project_id) = parse_id(project_id) else {
            return self.reject_id(credential, "project id");
        };
        self.handle("remove_user", credential, |user, storage| {
            ProjectService::with_options(storage, self.service_options)
                .remove_user(project_id, user, uid)
        })
    }

    /// `DELETE /projects/{id}/users`
    pub fn leave_project(&self, credential: Option<&str>, project_id: &str) -> ApiResponse {
        let Some(project_id) = parse_id(project_id) else {
            return self.reject_id(credential, "project id");
        };
        self.handle("leave_project", credential, |user, storage| {
            ProjectService::with_options(storage, self.service_options)
                .leave_project(project_id, user)
        })
    }

    /// `GET /projects/{id}/tasks`
    pub fn get_tasks(&self, credential: Option<&str>, project_id: &str) -> ApiResponse {
        let Some(project_id) = parse_id(project_id) else {
            return self.reject_id(credential, "project id");
        };
        self.handle("get_tasks", credential, |user, storage| {
            TaskService::with_options(storage, self.service_options).get_tasks(project_id, user)
        })
    }

    /// `POST /tasks`
    pub fn add_tasks(&self, credential: Option<&str>, body: &str) -> ApiResponse {
        let request: AddTasksRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(err) => return self.reject_body(credential, err),
        };
        self.handle("add_tasks", credential, |user, storage| {
            let service = TaskService::with_options(storage, self.service_options);
            match request.project_id {
                Some(project_id) => service.add_tasks(&request.tasks, project_id, user),
                None => service.stage_tasks(&request.tasks),
            }
        })
    }

    /// `POST /task/assignedUser?id=`; assigns the caller.
    pub fn assign_user(&self, credential: Option<&str>, task_id: &str) -> ApiResponse {
        let Some(task_id) = parse_id(task_id) else {
            return self.reject_id(credential, "task id");
        };
        self.handle("assign_user", credential, |user, storage| {
            TaskService::with_options(storage, self.service_options).assign_user(task_id, user)
        })
    }

    /// `DELETE /task/assignedUser?id=`
    pub fn unassign_user(&self, credential: Option<&str>, task_id: &str) -> ApiResponse {
        let Some(task_id) = parse_id(task_id) else {
            return self.reject_id(credential, "task id");
        };
        self.handle("unassign_user", credential, |user, storage| {
            TaskService::with_options(storage, self.service_options).unassign_user(task_id, user)
        })
    }

    /// `POST /task/processPoints?id=&process_points=[&version=]`
    pub fn set_process_points(
        &self,
        credential: Option<&str>,
        task_id: &str,
        process_points: &str,
        expected_version: Option<&str>,
    ) -> ApiResponse {
        let Some(task_id) = parse_id(task_id) else {
            return self.reject_id(credential, "task id");
        };
        let Ok(points) = process_points.trim().parse::<i64>() else {
            return self.reject_id(credential, "process_points");
        };
        let expected_version = match expected_version.map(|value| value.trim().parse::<i64>()) {
            None => None,
            Some(Ok(version)) => Some(version),
            Some(Err(_)) => return self.reject_id(credential, "version"),
        };
        self.handle("set_process_points", credential, |user, storage| {
            TaskService::with_options(storage, self.service_options).set_process_points_checked(
                task_id,
                points,
                user,
                expected_version,
            )
        })
    }

    fn authenticate(&self, credential: Option<&str>) -> Result<UserId, ApiResponse> {
        self.signer.authenticate(credential).map_err(|err| {
            debug!("event=api_auth module=api status=denied reason={err}");
            ApiResponse::error(401, "unauthenticated")
        })
    }

    fn handle<T: Serialize>(
        &self,
        event: &'static str,
        credential: Option<&str>,
        op: impl FnOnce(&str, SqliteStorage<'_>) -> Result<T, ServiceError>,
    ) -> ApiResponse {
        let user = match self.authenticate(credential) {
            Ok(user) => user,
            Err(response) => return response,
        };
        let conn = match connect_db(&self.db_path, &self.db_options) {
            Ok(conn) => conn,
            Err(err) => {
                error!("event={event} module=api status=error stage=db_open error={err}");
                return ApiResponse::error(500, INTERNAL_ERROR_MESSAGE);
            }
        };

        match op(&user, SqliteStorage::new(&conn)) {
            Ok(value) => ApiResponse::json(200, &value),
            Err(err) => error_response(event, &err),
        }
    }

    // Unauthenticated callers get 401 even when their input is also malformed.
    fn reject_body(&self, credential: Option<&str>, err: serde_json::Error) -> ApiResponse {
        match self.authenticate(credential) {
            Ok(_) => ApiResponse::bad_request(format!("invalid request body: {err}")),
            Err(response) => response,
        }
    }

    fn reject_id(&self, credential: Option<&str>, what: &str) -> ApiResponse {
        match self.authenticate(credential) {
            Ok(_) => ApiResponse::bad_request(format!("invalid {what}")),
            Err(response) => response,
        }
    }
}

fn error_response(event: &str, err: &ServiceError) -> ApiResponse {
    let status = status_for(err.kind());
    if err.kind() == ErrorKind::Internal {
        error!("event={event} module=api status=error http_status={status} error={err}");
        return ApiResponse::error(status, INTERNAL_ERROR_MESSAGE);
    }
    debug!("event={event} module=api status=rejected http_status={status}");
    ApiResponse::error(status, &err.to_string())
}

fn parse_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}
