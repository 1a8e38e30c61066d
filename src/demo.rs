//! Demo user service served by the `apiserver-kit` binary.
//!
//! Routes under `/api/v1/users`:
//! - `GET    /`        list, `?limit=` and `?prefix=`
//! - `GET    /{name}`  fetch one user
//! - `POST   /`        create from a JSON or form body
//! - `PUT    /{name}`  replace
//! - `DELETE /{name}`  remove
//!
//! Write routes carry the `users:write` ACL, which rejects anonymous users.

use std::sync::Arc;

use axum::body::Body as AxumBody;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::authn::user::ANONYMOUS;
use crate::error::ApiError;
use crate::request::context::user_from;
use crate::request::RequestContext;
use crate::rest::params::{ParamSchema, RequestParams, Validate, ValidationError};
use crate::rest::route::{route_filter, AclResolver, RouteError, RouteFilter, ServiceOptions};
use crate::rest::{Body, Param, RequestScope, Route, ScopeRegistry, WebService};

pub const USERS_ROOT: &str = "/api/v1/users";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct User {
    pub name: String,
    pub email: String,
    pub age: u32,
}

impl Validate for User {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::new("name must not be empty"));
        }
        if !self.email.is_empty() && !self.email.contains('@') {
            return Err(ValidationError::new(format!("invalid email {:?}", self.email)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserList {
    pub items: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserName {
    pub name: String,
}

impl Validate for UserName {}

impl RequestParams for UserName {
    fn describe() -> ParamSchema {
        ParamSchema::builder()
            .path("name")
            .description("name of the user")
            .build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ListUsers {
    pub limit: usize,
    pub prefix: Option<String>,
}

impl Validate for ListUsers {}

impl RequestParams for ListUsers {
    fn describe() -> ParamSchema {
        ParamSchema::builder()
            .query("limit")
            .description("maximum number of users returned, 0 for all")
            .query("prefix")
            .description("only users whose name starts with this")
            .build()
    }
}

/// In-memory user storage.
#[derive(Debug, Default)]
pub struct UserStore {
    users: DashMap<String, User>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, params: &ListUsers) -> UserList {
        let mut items: Vec<User> = self
            .users
            .iter()
            .filter(|u| params.prefix.as_deref().map_or(true, |p| u.name.starts_with(p)))
            .map(|u| u.value().clone())
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        if params.limit > 0 {
            items.truncate(params.limit);
        }
        UserList { items }
    }

    pub fn get(&self, name: &str) -> Result<User, ApiError> {
        self.users
            .get(name)
            .map(|u| u.value().clone())
            .ok_or_else(|| ApiError::not_found(format!("user {:?} not found", name)))
    }

    pub fn create(&self, user: User) -> Result<User, ApiError> {
        match self.users.entry(user.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(ApiError::already_exists(format!(
                "user {:?} already exists",
                user.name
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    pub fn update(&self, name: &str, mut user: User) -> Result<User, ApiError> {
        if !user.name.is_empty() && user.name != name {
            return Err(ApiError::bad_request(format!(
                "name in body {:?} does not match path {:?}",
                user.name, name
            )));
        }
        user.name = name.to_string();
        match self.users.get_mut(name) {
            Some(mut existing) => {
                *existing = user.clone();
                Ok(user)
            }
            None => Err(ApiError::not_found(format!("user {:?} not found", name))),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), ApiError> {
        self.users
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found(format!("user {:?} not found", name)))
    }
}

async fn require_identified_user(req: Request<AxumBody>, next: Next) -> Response {
    match user_from(&RequestContext::of(&req)) {
        Some(user) if user.name != ANONYMOUS => next.run(req).await,
        _ => ApiError::forbidden("users:write requires an identified user").into_response(),
    }
}

async fn pass_through(req: Request<AxumBody>, next: Next) -> Response {
    next.run(req).await
}

/// `users:read` lets everyone through, `users:write` rejects anonymous users.
pub fn acl_resolver() -> AclResolver {
    Arc::new(|acl: &str| {
        let filter: RouteFilter = match acl {
            "users:read" => route_filter(pass_through),
            "users:write" => route_filter(require_identified_user),
            other => return Err(format!("unknown acl {:?}", other)),
        };
        Ok((filter, "users".to_string()))
    })
}

/// The `/api/v1/users` web service backed by `store`.
pub fn users_service(store: Arc<UserStore>) -> WebService {
    let list = store.clone();
    let fetch = store.clone();
    let create = store.clone();
    let update = store.clone();
    let remove = store;

    WebService::new(USERS_ROOT)
        .route(
            Route::new("LIST", "/", move |_scope: RequestScope, Param(p): Param<ListUsers>| {
                let store = list.clone();
                async move { Ok::<_, ApiError>(store.list(&p)) }
            })
            .acl("users:read")
            .desc("list users"),
        )
        .route(
            Route::get("/{name}", move |_scope: RequestScope, Param(p): Param<UserName>| {
                let store = fetch.clone();
                async move { store.get(&p.name) }
            })
            .acl("users:read")
            .desc("read a user"),
        )
        .route(
            Route::new("CREATE", "/", move |scope: RequestScope, Body(user): Body<User>| {
                let store = create.clone();
                async move {
                    tracing::info!(
                        user = %user.name,
                        by = %scope.user().map(|u| u.name).unwrap_or_default(),
                        "Creating user"
                    );
                    store.create(user)
                }
            })
            .acl("users:write")
            .desc("create a user"),
        )
        .route(
            Route::put(
                "/{name}",
                move |_scope: RequestScope, Param(p): Param<UserName>, Body(user): Body<User>| {
                    let store = update.clone();
                    async move { store.update(&p.name, user) }
                },
            )
            .acl("users:write")
            .desc("replace a user"),
        )
        .route(
            Route::delete("/{name}", move |_scope: RequestScope, Param(p): Param<UserName>| {
                let store = remove.clone();
                async move { store.delete(&p.name) }
            })
            .acl("users:write")
            .desc("delete a user"),
        )
}

/// Users service plus `/healthz`.
pub fn api_router(store: Arc<UserStore>, scopes: &mut ScopeRegistry) -> Result<Router, RouteError> {
    let opts = ServiceOptions {
        acl: Some(acl_resolver()),
        tags: vec!["users".to_string()],
        ..Default::default()
    };
    let users = users_service(store).build(&opts, scopes)?;
    Ok(users.route("/healthz", get(|| async { "ok" })))
}
