//! One set of handlers serves every role collection; the collection is carried as an
//! `Extension<Resource>` layered onto each nested router.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Action, Resource, RoleTree, MAX_ANCESTRY_DEPTH};
use crate::db::{self, row_parsers};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::actor::{
    Actor, ActorCreateRequest, ActorUpdateRequest, DbActor, FirebaseTokenRequest, InviteAgainRequest, ACTOR_COLUMNS,
};
use crate::models::notification::{NewNotificationsResponse, NotificationPage, PageQuery};
use crate::models::onboarding::StatusResponse;
use crate::notify::inbox;
use crate::onboarding;
use crate::routes::auth::fetch_actor_by_id;
use crate::utils::{normalize_email, timestamp, utc_now};

async fn fetch_member(pool: &SqlitePool, resource: Resource, id: Uuid) -> AppResult<DbActor> {
    let sql = format!("SELECT {} FROM actors WHERE id = ? AND role = ?", ACTOR_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .bind(resource.role_kind().as_str())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", resource.model())))?;
    row_parsers::db_actor_from_row(&row)
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/{collection}",
    tag = "Actors",
    params(("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates")),
    responses(
        (status = 200, description = "Members of the collection visible to the caller", body = [Actor]),
        (status = 403, description = "Permission denied")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_actors(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Actor>>> {
    let principal = &auth.principal;
    state.gatekeeper.require(principal, Action::List, resource, None).await?;

    let rows = if principal.is_superuser() {
        let sql = format!(
            "SELECT {} FROM actors WHERE role = ? ORDER BY date_joined DESC, id",
            ACTOR_COLUMNS
        );
        sqlx::query(&sql)
            .bind(resource.role_kind().as_str())
            .fetch_all(&state.pool)
            .await?
    } else {
        // The caller plus descendants within the levels that can hold authority.
        let sql = format!(
            "WITH RECURSIVE subtree(id, hop) AS ( \
                SELECT id, 0 FROM actors WHERE id = ? \
                UNION ALL \
                SELECT a.id, subtree.hop + 1 FROM actors a JOIN subtree ON a.parent_id = subtree.id \
                WHERE subtree.hop < ? \
             ) \
             SELECT {} FROM actors WHERE role = ? AND id IN (SELECT id FROM subtree) \
             ORDER BY date_joined DESC, id",
            ACTOR_COLUMNS
        );
        sqlx::query(&sql)
            .bind(principal.user_id.to_string())
            .bind(resource.ancestry_depth() as i64)
            .bind(resource.role_kind().as_str())
            .fetch_all(&state.pool)
            .await?
    };

    let actors = rows
        .iter()
        .map(|row| row_parsers::db_actor_from_row(row).map(Actor::from))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(actors))
}

/// Parent of a new member: the requested one, else the inviter. It must be of the kind one
/// level up. Non-superusers may only place the member under themselves or their own descendants.
async fn resolve_parent(
    state: &AppState,
    auth: &AuthUser,
    resource: Resource,
    requested: Option<Uuid>,
) -> AppResult<Option<Uuid>> {
    let principal = &auth.principal;

    let Some(parent_kind) = resource.role_kind().parent_kind() else {
        if requested.is_some() {
            return Err(AppError::bad_request(format!("a {} has no parent", resource.model())));
        }
        if !principal.is_superuser() {
            return Err(AppError::forbidden("permission denied"));
        }
        return Ok(None);
    };

    let parent_id = match requested {
        Some(id) => id,
        // Superusers sit outside the tree; without an explicit parent the member is a root.
        None if principal.is_superuser() => return Ok(None),
        None => principal.user_id,
    };
    let lineage = state
        .gatekeeper
        .tree()
        .lineage(parent_id, MAX_ANCESTRY_DEPTH)
        .await?
        .ok_or_else(|| AppError::bad_request("parent not found"))?;

    if lineage.target.role != parent_kind {
        return Err(AppError::bad_request(format!(
            "parent of a {} must be a {}",
            resource.model(),
            parent_kind.as_str()
        )));
    }

    if !principal.is_superuser()
        && !lineage.is_self(principal.user_id)
        && !lineage.has_ancestor_within(principal.user_id, resource.ancestry_depth().saturating_sub(1))
    {
        return Err(AppError::forbidden("permission denied"));
    }

    Ok(Some(parent_id))
}

#[utoipa::path(
    post,
    path = "/{collection}",
    tag = "Actors",
    params(("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates")),
    request_body = ActorCreateRequest,
    responses(
        (status = 201, description = "Member created and invited", body = Actor),
        (status = 400, description = "Invalid parent or payload"),
        (status = 403, description = "Permission denied"),
        (status = 409, description = "Email already in use")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_actor(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Json(payload): Json<ActorCreateRequest>,
) -> AppResult<(StatusCode, Json<Actor>)> {
    state
        .gatekeeper
        .require(&auth.principal, Action::Create, resource, None)
        .await?;

    let email = normalize_email(&payload.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    ensure_email_available(&state.pool, &email).await?;

    let parent_id = resolve_parent(&state, &auth, resource, payload.parent_id).await?;

    let inviter = fetch_actor_by_id(&state.pool, auth.id()).await?;
    let locale = state.settings.select_locale(payload.lang.as_deref());
    let now = utc_now();
    let actor_id = Uuid::new_v4();

    // Row and invite token commit together; a UNIQUE(email) race surfaces as 409.
    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO actors (id, email, first_name, last_name, phone_number, description, role, parent_id, is_active, date_joined) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(actor_id.to_string())
    .bind(&email)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(payload.phone_number.as_deref().unwrap_or_default())
    .bind(payload.description.as_deref().unwrap_or_default())
    .bind(resource.role_kind().as_str())
    .bind(parent_id.map(|id| id.to_string()))
    .bind(timestamp(now))
    .execute(&mut *tx)
    .await
    .map_err(|err| db::conflict_on_unique(err, "email already in use"))?;

    let token = onboarding::issue_invite(&mut tx, actor_id, now).await?;
    let actor = onboarding::load_actor(&mut tx, actor_id).await?;
    tx.commit().await?;

    onboarding::send_invite(&state.notifier, &token, &inviter.full_name(), &locale);

    tracing::info!(actor_id = %actor_id, inviter = %inviter.id, role = actor.role.as_str(), "member created");
    Ok((StatusCode::CREATED, Json(actor.into())))
}

#[utoipa::path(
    get,
    path = "/{collection}/{id}",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID")
    ),
    responses(
        (status = 200, description = "Member", body = Actor),
        (status = 403, description = "Permission denied"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_actor(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Actor>> {
    state
        .gatekeeper
        .require(&auth.principal, Action::Retrieve, resource, Some(id))
        .await?;
    let actor = fetch_member(&state.pool, resource, id).await?;
    Ok(Json(actor.into()))
}

async fn apply_update(
    state: &AppState,
    resource: Resource,
    auth: &AuthUser,
    id: Uuid,
    action: Action,
    payload: ActorUpdateRequest,
) -> AppResult<Actor> {
    state.gatekeeper.require(&auth.principal, action, resource, Some(id)).await?;
    let current = fetch_member(&state.pool, resource, id).await?;

    if action == Action::Update && (payload.first_name.is_none() || payload.last_name.is_none()) {
        return Err(AppError::bad_request("first_name and last_name are required"));
    }

    let first_name = payload.first_name.map(|s| s.trim().to_string()).unwrap_or(current.first_name);
    let last_name = payload.last_name.map(|s| s.trim().to_string()).unwrap_or(current.last_name);
    let phone_number = payload.phone_number.unwrap_or(current.phone_number);
    let description = payload.description.unwrap_or(current.description);

    sqlx::query("UPDATE actors SET first_name = ?, last_name = ?, phone_number = ?, description = ? WHERE id = ?")
        .bind(&first_name)
        .bind(&last_name)
        .bind(&phone_number)
        .bind(&description)
        .bind(id.to_string())
        .execute(&state.pool)
        .await?;

    Ok(fetch_member(&state.pool, resource, id).await?.into())
}

#[utoipa::path(
    put,
    path = "/{collection}/{id}",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID")
    ),
    request_body = ActorUpdateRequest,
    responses(
        (status = 200, description = "Member updated", body = Actor),
        (status = 403, description = "Permission denied"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_actor(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActorUpdateRequest>,
) -> AppResult<Json<Actor>> {
    Ok(Json(apply_update(&state, resource, &auth, id, Action::Update, payload).await?))
}

#[utoipa::path(
    patch,
    path = "/{collection}/{id}",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID")
    ),
    request_body = ActorUpdateRequest,
    responses(
        (status = 200, description = "Member updated", body = Actor),
        (status = 403, description = "Permission denied"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn partial_update_actor(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ActorUpdateRequest>,
) -> AppResult<Json<Actor>> {
    Ok(Json(
        apply_update(&state, resource, &auth, id, Action::PartialUpdate, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/{collection}/{id}",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID")
    ),
    responses(
        (status = 204, description = "Member deleted"),
        (status = 403, description = "Permission denied"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_actor(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .gatekeeper
        .require(&auth.principal, Action::Destroy, resource, Some(id))
        .await?;

    let result = sqlx::query("DELETE FROM actors WHERE id = ? AND role = ?")
        .bind(id.to_string())
        .bind(resource.role_kind().as_str())
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("{} not found", resource.model())));
    }

    tracing::info!(actor_id = %id, by = %auth.id(), "member deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/{collection}/{id}/invite-again",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID")
    ),
    request_body = InviteAgainRequest,
    responses(
        (status = 200, description = "Invite re-issued", body = StatusResponse),
        (status = 403, description = "Permission denied"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn invite_again(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<InviteAgainRequest>,
) -> AppResult<Json<StatusResponse>> {
    state
        .gatekeeper
        .require(&auth.principal, Action::InviteAgain, resource, Some(id))
        .await?;

    let actor = fetch_member(&state.pool, resource, id).await?;
    let inviter = fetch_actor_by_id(&state.pool, auth.id()).await?;
    let locale = state.settings.select_locale(payload.lang.as_deref());
    onboarding::invite(&state.pool, &state.notifier, &actor, &inviter.full_name(), &locale, utc_now()).await?;

    Ok(ok())
}

#[utoipa::path(
    post,
    path = "/budgets/{id}/set-firebase-token",
    tag = "Actors",
    params(("id" = Uuid, Path, description = "Budget owner ID, must be the caller")),
    request_body = FirebaseTokenRequest,
    responses(
        (status = 200, description = "Device token stored", body = StatusResponse),
        (status = 403, description = "Permission denied")
    ),
    security(("bearer_auth" = []))
)]
pub async fn set_firebase_token(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<FirebaseTokenRequest>,
) -> AppResult<Json<StatusResponse>> {
    state
        .gatekeeper
        .require(&auth.principal, Action::SetFirebaseToken, resource, Some(id))
        .await?;

    let token = payload.token.trim();
    if token.is_empty() {
        return Err(AppError::bad_request("token must not be empty"));
    }

    let actor = fetch_member(&state.pool, resource, id).await?;
    inbox::set_device_token(&state.pool, actor.id, token).await?;
    Ok(ok())
}

#[utoipa::path(
    get,
    path = "/{collection}/{id}/notifications",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID"),
        PageQuery
    ),
    responses(
        (status = 200, description = "Notifications, newest first; marks them seen", body = NotificationPage),
        (status = 403, description = "Permission denied")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<NotificationPage>> {
    state
        .gatekeeper
        .require(&auth.principal, Action::Notifications, resource, Some(id))
        .await?;

    let actor = fetch_member(&state.pool, resource, id).await?;
    let (limit, offset) = page.limit_offset();
    let (count, results) = inbox::list(&state.pool, actor.id, limit, offset).await?;
    Ok(Json(NotificationPage { count, results }))
}

#[utoipa::path(
    get,
    path = "/{collection}/{id}/new-notifications",
    tag = "Actors",
    params(
        ("collection" = String, Path, description = "budgets, brigadiers, coordinators or candidates"),
        ("id" = Uuid, Path, description = "Actor ID")
    ),
    responses(
        (status = 200, description = "Unread notification count", body = NewNotificationsResponse),
        (status = 403, description = "Permission denied")
    ),
    security(("bearer_auth" = []))
)]
pub async fn new_notifications(
    State(state): State<AppState>,
    Extension(resource): Extension<Resource>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<NewNotificationsResponse>> {
    state
        .gatekeeper
        .require(&auth.principal, Action::NewNotifications, resource, Some(id))
        .await?;

    let actor = fetch_member(&state.pool, resource, id).await?;
    let new_messages = inbox::unseen(&state.pool, actor.id).await?;
    Ok(Json(NewNotificationsResponse { new_messages }))
}

async fn ensure_email_available(pool: &SqlitePool, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM actors WHERE email = ?")
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

