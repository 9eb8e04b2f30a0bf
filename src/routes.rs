//! Handlers for `/vibes`. Every handler requires a [`CurrentUser`].

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
    access::{ensure_found, require_ownership},
    auth::CurrentUser,
    blanks::remove_blank_fields,
    error::AppError,
    model::{FavoriteDraft, LikeDraft, User, Vibe, VibeDraft, VibePatch, VibeView},
    server::AppState,
    storage::Store,
};

/// `{"vibe": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct VibeBody<T> {
    pub vibe: T,
}

/// `{"vibes": [...]}`
#[derive(Debug, Serialize, Deserialize)]
pub struct VibesBody {
    pub vibes: Vec<VibeView>,
}

/// Pull `body[key]` out of a JSON request body with blank strings removed.
///
/// An empty body, or a missing or `null` section, yields `T::default()`.
/// Anything that does not parse is a [`AppError::MalformedPayload`].
fn section<T: DeserializeOwned + Default>(body: &[u8], key: &str) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let body: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedPayload(format!("invalid JSON: {e}")))?;
    match remove_blank_fields(body) {
        Value::Object(mut map) => match map.remove(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| AppError::MalformedPayload(format!("`{key}`: {e}"))),
        },
        _ => Err(AppError::MalformedPayload("expected a JSON object".into())),
    }
}

/// Dereference each vibe's owner, loading every user at most once.
fn populate(store: &Store, vibes: Vec<Vibe>) -> Result<Vec<VibeView>, AppError> {
    let mut owners: HashMap<String, Option<User>> = HashMap::new();
    let mut views = Vec::with_capacity(vibes.len());
    for vibe in vibes {
        let owner = match owners.entry(vibe.owner.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(store.get::<User>(&vibe.owner)?),
        };
        views.push(vibe.populate(owner.as_ref()));
    }
    Ok(views)
}

/// `POST /vibes`: create a vibe owned by the caller.
pub async fn create_vibe(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    body: Bytes,
) -> Result<(StatusCode, Json<VibeBody<Vibe>>), AppError> {
    let draft: VibeDraft = section(&body, "vibe")?;
    let vibe = draft.into_vibe(&user.id, Utc::now())?;
    state.store.insert_vibe(&vibe)?;
    info!(vibe = %vibe.id, owner = %user.id, "created vibe");
    Ok((StatusCode::CREATED, Json(VibeBody { vibe })))
}

/// `GET /vibes`: the caller's own vibes.
pub async fn list_own(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<VibesBody>, AppError> {
    let vibes = state.store.vibes_by_owner(&user.id)?;
    Ok(Json(VibesBody {
        vibes: populate(&state.store, vibes)?,
    }))
}

/// `GET /vibes/all`
pub async fn list_all(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
) -> Result<Json<VibesBody>, AppError> {
    let vibes = state.store.list::<Vibe>()?;
    Ok(Json(VibesBody {
        vibes: populate(&state.store, vibes)?,
    }))
}

/// `GET /vibes/favorites`: vibes the caller currently favorites.
pub async fn list_favorites(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<VibesBody>, AppError> {
    let vibes = state.store.favorited_vibes(&user.id)?;
    Ok(Json(VibesBody {
        vibes: populate(&state.store, vibes)?,
    }))
}

/// `GET /vibes/:id`
pub async fn show_vibe(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<VibeBody<VibeView>>, AppError> {
    let vibe = ensure_found(state.store.get::<Vibe>(&id)?)?;
    let mut views = populate(&state.store, vec![vibe])?;
    let vibe = ensure_found(views.pop())?;
    Ok(Json(VibeBody { vibe }))
}

/// `PATCH /vibes/:id`: owner-only partial update of the mutable fields.
///
/// The body is only read once the vibe is known to exist and belong to the
/// caller.
pub async fn update_vibe(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let vibe = ensure_found(state.store.get::<Vibe>(&id)?)?;
    require_ownership(&user.id, &vibe.owner)?;
    let patch: VibePatch = section(&body, "vibe")?;
    // Owners are immutable, so the check above still holds under the lock.
    ensure_found(
        state
            .store
            .update::<Vibe>(&id, |vibe| patch.apply(vibe, Utc::now()))?,
    )?;
    info!(vibe = %id, "updated vibe");
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /vibes/likes/:id`: any authenticated user may like any vibe.
pub async fn like_vibe(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let draft: LikeDraft = section(&body, "like")?;
    let like = ensure_found(state.store.append_like(&id, &user.id, draft)?)?;
    info!(vibe = %id, like = %like.id, user = %user.id, "liked vibe");
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /vibes/favorites/:id`: set the caller's favorite flag on a vibe.
pub async fn favorite_vibe(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let draft: FavoriteDraft = section(&body, "favorite")?;
    let fav = ensure_found(state.store.upsert_favorite(&id, &user.id, draft.value())?)?;
    info!(vibe = %id, favorite = %fav.id, value = fav.value, "set favorite");
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /vibes/:id`: owner-only; also removes the vibe's likes and
/// favorites.
pub async fn delete_vibe(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let vibe = ensure_found(state.store.get::<Vibe>(&id)?)?;
    require_ownership(&user.id, &vibe.owner)?;
    ensure_found(state.store.delete_vibe(&id)?)?;
    info!(vibe = %id, "deleted vibe");
    Ok(StatusCode::NO_CONTENT)
}
