//! Documents persisted by the store and the request/response shapes built
//! around them.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Document identifier: 32 lowercase hex characters.
pub type Id = String;

/// Generate a fresh document identifier.
pub fn new_id() -> Id {
    Uuid::new_v4().simple().to_string()
}

/// Whether `id` has the shape of an identifier produced by [`new_id`].
///
/// Anything else is treated as absent and never turned into a path.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// A record stored in its own collection directory.
pub trait Document: Serialize + DeserializeOwned {
    /// Directory name of the collection under the store root.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;
}

/// A user's post: an image with a caption.
///
/// ```json
/// {
///   "id": "3f1c0e5b7d2a4c6e8f90a1b2c3d4e5f6",
///   "img": "/files/img-1700000000000.png",
///   "title": "sunset",
///   "description": "golden hour at the pier",
///   "comment": "no filter",
///   "likes": [],
///   "favorites": [],
///   "owner": "9a8b7c6d5e4f30211203f4e5d6c7b8a9",
///   "createdAt": "2024-01-01T00:00:00Z",
///   "updatedAt": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vibe {
    pub id: Id,
    /// Image location, usually a path returned by the upload endpoint.
    pub img: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Like ids in the order they were added.
    #[serde(default)]
    pub likes: Vec<Id>,
    /// Favorite ids, at most one per user.
    #[serde(default)]
    pub favorites: Vec<Id>,
    /// Creating user. Never changes after creation.
    pub owner: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Vibe {
    const COLLECTION: &'static str = "vibes";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Vibe {
    /// Expand the owner reference into the public view of `owner`.
    pub fn populate(self, owner: Option<&User>) -> VibeView {
        VibeView {
            id: self.id,
            img: self.img,
            title: self.title,
            description: self.description,
            comment: self.comment,
            likes: self.likes,
            favorites: self.favorites,
            owner: owner.map(User::public),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A vibe with its owner dereferenced. `owner` is `null` when the user
/// record no longer exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VibeView {
    pub id: Id,
    pub img: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub likes: Vec<Id>,
    pub favorites: Vec<Id>,
    pub owner: Option<PublicUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a create request. Client-supplied `owner`, `likes` and other
/// unknown keys are dropped during deserialization.
#[derive(Debug, Default, Deserialize)]
pub struct VibeDraft {
    pub img: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub comment: Option<String>,
}

impl VibeDraft {
    /// Build a vibe owned by `owner`, failing on the first missing required
    /// field.
    pub fn into_vibe(self, owner: &str, now: DateTime<Utc>) -> Result<Vibe, AppError> {
        Ok(Vibe {
            id: new_id(),
            img: required("img", self.img)?,
            title: required("title", self.title)?,
            description: required("description", self.description)?,
            comment: self.comment,
            likes: Vec::new(),
            favorites: Vec::new(),
            owner: owner.to_string(),
            created_at: now,
            updated_at: now,
        })
    }
}

fn required(field: &str, value: Option<String>) -> Result<String, AppError> {
    value.ok_or_else(|| AppError::Validation(format!("`{field}` is required")))
}

/// The fields of a vibe an owner may change. Everything else in an update
/// payload is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct VibePatch {
    pub img: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub comment: Option<String>,
}

impl VibePatch {
    /// Apply the present fields to `vibe` and bump its `updated_at`.
    pub fn apply(self, vibe: &mut Vibe, now: DateTime<Utc>) {
        if let Some(img) = self.img {
            vibe.img = img;
        }
        if let Some(title) = self.title {
            vibe.title = title;
        }
        if let Some(description) = self.description {
            vibe.description = description;
        }
        if let Some(comment) = self.comment {
            vibe.comment = Some(comment);
        }
        vibe.updated_at = now;
    }
}

/// One like action. A user may like the same vibe more than once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: Id,
    pub value: i64,
    pub owner: Id,
    pub vibe: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Like {
    const COLLECTION: &'static str = "likes";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LikeDraft {
    pub value: Option<i64>,
}

impl LikeDraft {
    pub fn into_like(self, owner: &str, vibe: &str, now: DateTime<Utc>) -> Like {
        Like {
            id: new_id(),
            value: self.value.unwrap_or(1),
            owner: owner.to_string(),
            vibe: vibe.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user's favorite flag on a vibe; one record per (vibe, user).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: Id,
    pub value: bool,
    pub owner: Id,
    pub vibe: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Favorite {
    const COLLECTION: &'static str = "favorites";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FavoriteDraft {
    pub value: Option<bool>,
}

impl FavoriteDraft {
    /// Requested flag; favoriting without a body means `true`.
    pub fn value(&self) -> bool {
        self.value.unwrap_or(true)
    }
}

/// An account able to authenticate with a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub email: String,
    /// SHA-256 hex digest of the bearer token.
    pub token_digest: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl User {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What other clients get to see of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Id,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> VibeDraft {
        VibeDraft {
            img: Some("/files/img.png".into()),
            title: Some("sunset".into()),
            description: Some("golden hour".into()),
            comment: None,
        }
    }

    #[test]
    fn new_ids_are_valid() {
        let id = new_id();
        assert!(is_valid_id(&id));
        assert_ne!(id, new_id());
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../../etc/passwd"));
        assert!(!is_valid_id(&"A".repeat(32)));
        assert!(!is_valid_id(&"a".repeat(31)));
        assert!(is_valid_id(&"a".repeat(32)));
    }

    #[test]
    fn draft_sets_owner_and_timestamps() {
        let now = Utc::now();
        let vibe = draft().into_vibe("owner1", now).unwrap();
        assert_eq!(vibe.owner, "owner1");
        assert_eq!(vibe.created_at, now);
        assert_eq!(vibe.updated_at, now);
        assert!(vibe.likes.is_empty());
    }

    #[test]
    fn draft_requires_title() {
        let mut d = draft();
        d.title = None;
        match d.into_vibe("owner1", Utc::now()) {
            Err(AppError::Validation(msg)) => assert!(msg.contains("title")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn draft_ignores_client_owner() {
        let body = serde_json::json!({
            "img": "a", "title": "b", "description": "c", "owner": "intruder"
        });
        let d: VibeDraft = serde_json::from_value(body).unwrap();
        let vibe = d.into_vibe("caller", Utc::now()).unwrap();
        assert_eq!(vibe.owner, "caller");
    }

    #[test]
    fn patch_only_touches_allowed_fields() {
        let created = Utc::now();
        let mut vibe = draft().into_vibe("owner1", created).unwrap();
        let patch: VibePatch = serde_json::from_value(serde_json::json!({
            "title": "sunrise",
            "owner": "intruder",
            "likes": ["x"],
        }))
        .unwrap();
        let later = created + chrono::Duration::seconds(5);
        patch.apply(&mut vibe, later);
        assert_eq!(vibe.title, "sunrise");
        assert_eq!(vibe.description, "golden hour");
        assert_eq!(vibe.owner, "owner1");
        assert!(vibe.likes.is_empty());
        assert_eq!(vibe.updated_at, later);
        assert_eq!(vibe.created_at, created);
    }

    #[test]
    fn vibe_serializes_camel_case() {
        let vibe = draft().into_vibe("owner1", Utc::now()).unwrap();
        let v = serde_json::to_value(&vibe).unwrap();
        assert!(v.get("createdAt").is_some());
        assert!(v.get("updatedAt").is_some());
        assert!(v.get("comment").is_none());
    }

    #[test]
    fn populate_hides_token_digest() {
        let now = Utc::now();
        let user = User {
            id: new_id(),
            email: "a@example.com".into(),
            token_digest: "secret".into(),
            created_at: now,
            updated_at: now,
        };
        let view = draft().into_vibe(&user.id, now).unwrap().populate(Some(&user));
        let v = serde_json::to_value(&view).unwrap();
        assert_eq!(v["owner"]["email"], "a@example.com");
        assert!(v["owner"].get("tokenDigest").is_none());
    }

    #[test]
    fn like_and_favorite_defaults() {
        let like = LikeDraft::default().into_like("u", "v", Utc::now());
        assert_eq!(like.value, 1);
        assert!(FavoriteDraft::default().value());
        assert!(!FavoriteDraft { value: Some(false) }.value());
    }
}
