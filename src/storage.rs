//! File-backed document store.
//!
//! Every document lives in its own JSON file under
//! `<root>/<collection>/<id[0..2]>/<id[2..4]>/<id>.json`. Lookups that are not
//! by id go through small index files under `<root>/index/`, which can always
//! be rebuilt from the documents with [`Store::reindex`].

use std::{
    collections::HashSet,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::{thread_rng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::model::{is_valid_id, new_id, Document, Favorite, Like, LikeDraft, User, Vibe};

/// Vibe ids per owner, one `<user id>.txt` file each.
const OWNER_INDEX: &str = "index/vibes-by-owner";
/// Favorite ids per owner, one `<user id>.txt` file each.
const FAVORITE_INDEX: &str = "index/favorites-by-owner";
/// User id per token digest.
const TOKEN_INDEX: &str = "index/users-by-token";
/// User id per digest of the lowercased email.
const EMAIL_INDEX: &str = "index/users-by-email";

/// Persistent store for vibes, their reactions, and users rooted at `root`.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    /// Serializes every read-modify-write sequence.
    write_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Create a new store rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Ensure the on-disk directory structure exists.
    pub fn init(&self) -> Result<()> {
        let dirs = [
            Vibe::COLLECTION,
            Like::COLLECTION,
            Favorite::COLLECTION,
            User::COLLECTION,
            OWNER_INDEX,
            FAVORITE_INDEX,
            TOKEN_INDEX,
            EMAIL_INDEX,
        ];
        for d in dirs {
            fs::create_dir_all(self.root.join(d))?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch a document by id. Malformed ids are reported as absent.
    pub fn get<T: Document>(&self, id: &str) -> Result<Option<T>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let path = self.doc_path::<T>(id);
        match fs::read_to_string(&path) {
            Ok(data) => {
                let doc = serde_json::from_str(&data)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(Some(doc))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Load every document of a collection, oldest first.
    pub fn list<T: Document>(&self) -> Result<Vec<T>> {
        let dir = self.root.join(T::COLLECTION);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut docs: Vec<T> = vec![];
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            let is_doc = entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "json");
            if is_doc {
                let data = fs::read_to_string(entry.path())?;
                let doc = serde_json::from_str(&data)
                    .with_context(|| format!("parsing {}", entry.path().display()))?;
                docs.push(doc);
            }
        }
        sort_by_creation(&mut docs);
        Ok(docs)
    }

    /// Apply `f` to a stored document and write it back, all under the write
    /// lock. Returns `None` when the document does not exist.
    pub fn update<T: Document>(&self, id: &str, f: impl FnOnce(&mut T)) -> Result<Option<T>> {
        let _guard = self.lock();
        let Some(mut doc) = self.get::<T>(id)? else {
            return Ok(None);
        };
        f(&mut doc);
        self.write_doc(&doc)?;
        Ok(Some(doc))
    }

    /// Persist a new vibe and index it under its owner.
    pub fn insert_vibe(&self, vibe: &Vibe) -> Result<()> {
        let _guard = self.lock();
        if self.doc_path::<Vibe>(&vibe.id).exists() {
            bail!("vibe already exists: {}", vibe.id);
        }
        self.write_doc(vibe)?;
        self.append_index(OWNER_INDEX, &vibe.owner, &vibe.id)?;
        debug!(vibe = %vibe.id, owner = %vibe.owner, "inserted vibe");
        Ok(())
    }

    /// Vibes created by `owner`, oldest first.
    pub fn vibes_by_owner(&self, owner: &str) -> Result<Vec<Vibe>> {
        if !is_valid_id(owner) {
            return Ok(vec![]);
        }
        let ids = read_ids(&self.index_path(OWNER_INDEX, owner))?;
        let mut vibes = vec![];
        for id in ids {
            // Index entries may outlive their vibe until the next reindex.
            if let Some(vibe) = self.get::<Vibe>(&id)? {
                if vibe.owner == owner {
                    vibes.push(vibe);
                }
            }
        }
        sort_by_creation(&mut vibes);
        Ok(vibes)
    }

    /// Vibes for which `owner` holds a favorite set to `true`, oldest first.
    pub fn favorited_vibes(&self, owner: &str) -> Result<Vec<Vibe>> {
        if !is_valid_id(owner) {
            return Ok(vec![]);
        }
        let mut vibes = vec![];
        for id in read_ids(&self.index_path(FAVORITE_INDEX, owner))? {
            let Some(fav) = self.get::<Favorite>(&id)? else {
                continue;
            };
            if fav.owner != owner || !fav.value {
                continue;
            }
            if let Some(vibe) = self.get::<Vibe>(&fav.vibe)? {
                vibes.push(vibe);
            }
        }
        sort_by_creation(&mut vibes);
        Ok(vibes)
    }

    /// Record a like by `owner` and append it to the vibe's likes.
    ///
    /// Returns `None` when the vibe does not exist.
    pub fn append_like(&self, vibe_id: &str, owner: &str, draft: LikeDraft) -> Result<Option<Like>> {
        let _guard = self.lock();
        let Some(mut vibe) = self.get::<Vibe>(vibe_id)? else {
            return Ok(None);
        };
        let now = Utc::now();
        let like = draft.into_like(owner, &vibe.id, now);
        vibe.likes.push(like.id.clone());
        vibe.updated_at = now;
        self.write_with_vibe(&like, &vibe)?;
        debug!(vibe = %vibe.id, like = %like.id, count = vibe.likes.len(), "appended like");
        Ok(Some(like))
    }

    /// Set `owner`'s favorite flag on a vibe, creating the favorite on first
    /// use. Returns `None` when the vibe does not exist.
    pub fn upsert_favorite(&self, vibe_id: &str, owner: &str, value: bool) -> Result<Option<Favorite>> {
        let _guard = self.lock();
        let Some(mut vibe) = self.get::<Vibe>(vibe_id)? else {
            return Ok(None);
        };
        let now = Utc::now();
        for id in &vibe.favorites {
            if let Some(mut fav) = self.get::<Favorite>(id)? {
                if fav.owner == owner {
                    fav.value = value;
                    fav.updated_at = now;
                    self.write_doc(&fav)?;
                    return Ok(Some(fav));
                }
            }
        }
        let fav = Favorite {
            id: new_id(),
            value,
            owner: owner.to_string(),
            vibe: vibe.id.clone(),
            created_at: now,
            updated_at: now,
        };
        vibe.favorites.push(fav.id.clone());
        vibe.updated_at = now;
        self.write_with_vibe(&fav, &vibe)?;
        self.append_index(FAVORITE_INDEX, owner, &fav.id)?;
        debug!(vibe = %vibe.id, favorite = %fav.id, "created favorite");
        Ok(Some(fav))
    }

    /// Delete a vibe together with its likes and favorites.
    ///
    /// Returns the deleted vibe, or `None` if it was already gone.
    pub fn delete_vibe(&self, id: &str) -> Result<Option<Vibe>> {
        let _guard = self.lock();
        let Some(vibe) = self.get::<Vibe>(id)? else {
            return Ok(None);
        };
        for like in &vibe.likes {
            self.remove_doc::<Like>(like)?;
        }
        for id in &vibe.favorites {
            if let Some(fav) = self.get::<Favorite>(id)? {
                self.remove_from_index(FAVORITE_INDEX, &fav.owner, &fav.id)?;
            }
            self.remove_doc::<Favorite>(id)?;
        }
        self.remove_doc::<Vibe>(&vibe.id)?;
        self.remove_from_index(OWNER_INDEX, &vibe.owner, &vibe.id)?;
        debug!(
            vibe = %vibe.id,
            likes = vibe.likes.len(),
            favorites = vibe.favorites.len(),
            "deleted vibe"
        );
        Ok(Some(vibe))
    }

    /// Create a user and return it with its freshly issued bearer token.
    ///
    /// Only the token's digest is stored, so the token cannot be recovered
    /// later.
    pub fn create_user(&self, email: &str) -> Result<(User, String)> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            bail!("invalid email: {email:?}");
        }
        let _guard = self.lock();
        let email_path = self.index_path(EMAIL_INDEX, &digest(&email.to_lowercase()));
        if email_path.exists() {
            bail!("user already exists: {email}");
        }
        let token = generate_token();
        let now = Utc::now();
        let user = User {
            id: new_id(),
            email: email.to_string(),
            token_digest: digest(&token),
            created_at: now,
            updated_at: now,
        };
        self.write_doc(&user)?;
        write_atomic(
            &self.index_path(TOKEN_INDEX, &user.token_digest),
            user.id.as_bytes(),
        )?;
        write_atomic(&email_path, user.id.as_bytes())?;
        info!(user = %user.id, "created user");
        Ok((user, token))
    }

    /// Resolve a bearer token to its user.
    pub fn user_by_token(&self, token: &str) -> Result<Option<User>> {
        let token_digest = digest(token);
        let path = self.index_path(TOKEN_INDEX, &token_digest);
        let id = match fs::read_to_string(&path) {
            Ok(data) => data.trim().to_string(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let user = self.get::<User>(&id)?;
        Ok(user.filter(|u| u.token_digest == token_digest))
    }

    /// Rebuild all indexes from the stored documents.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.lock();
        let index_dir = self.root.join("index");
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        for d in [OWNER_INDEX, FAVORITE_INDEX, TOKEN_INDEX, EMAIL_INDEX] {
            fs::create_dir_all(self.root.join(d))?;
        }
        let vibes = self.list::<Vibe>()?;
        for vibe in &vibes {
            self.append_index(OWNER_INDEX, &vibe.owner, &vibe.id)?;
        }
        for fav in self.list::<Favorite>()? {
            self.append_index(FAVORITE_INDEX, &fav.owner, &fav.id)?;
        }
        let users = self.list::<User>()?;
        for user in &users {
            write_atomic(
                &self.index_path(TOKEN_INDEX, &user.token_digest),
                user.id.as_bytes(),
            )?;
            write_atomic(
                &self.index_path(EMAIL_INDEX, &digest(&user.email.to_lowercase())),
                user.id.as_bytes(),
            )?;
        }
        info!(vibes = vibes.len(), users = users.len(), "rebuilt indexes");
        Ok(())
    }

    /// Compute the canonical path for a document id.
    fn doc_path<T: Document>(&self, id: &str) -> PathBuf {
        self.root
            .join(T::COLLECTION)
            .join(&id[0..2])
            .join(&id[2..4])
            .join(format!("{id}.json"))
    }

    fn index_path(&self, prefix: &str, name: &str) -> PathBuf {
        self.root.join(prefix).join(format!("{name}.txt"))
    }

    fn write_doc<T: Document>(&self, doc: &T) -> Result<()> {
        let id = doc.id();
        if !is_valid_id(id) {
            bail!("invalid document id: {id:?}");
        }
        write_atomic(&self.doc_path::<T>(id), &serde_json::to_vec(doc)?)
    }

    /// Write a new reaction document and the vibe that now references it.
    /// The reaction is removed again when the vibe cannot be written.
    fn write_with_vibe<T: Document>(&self, reaction: &T, vibe: &Vibe) -> Result<()> {
        self.write_doc(reaction)?;
        if let Err(err) = self.write_doc(vibe) {
            if let Err(cleanup) = self.remove_doc::<T>(reaction.id()) {
                warn!(id = reaction.id(), "failed to remove orphaned reaction: {cleanup:#}");
            }
            return Err(err);
        }
        Ok(())
    }

    fn remove_doc<T: Document>(&self, id: &str) -> Result<bool> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        match fs::remove_file(self.doc_path::<T>(id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Append an id to the index file under `prefix/name.txt`.
    fn append_index(&self, prefix: &str, name: &str, id: &str) -> Result<()> {
        let path = self.index_path(prefix, name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(f, "{id}")?;
        Ok(())
    }

    fn remove_from_index(&self, prefix: &str, name: &str, id: &str) -> Result<()> {
        let path = self.index_path(prefix, name);
        let mut ids = read_ids(&path)?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() == before {
            return Ok(());
        }
        let mut content = ids.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        write_atomic(&path, content.as_bytes())
    }
}

/// Read newline-separated ids from a text file, first occurrence wins.
fn read_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let data = fs::read_to_string(path)?;
    let mut seen = HashSet::new();
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

/// Write `data` to a temporary file next to `path`, then rename it into place.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent_dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
    tmp.write_all(data)?;
    tmp.persist(path)?;
    Ok(())
}

fn sort_by_creation<T: Document>(docs: &mut [T]) {
    docs.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}

/// SHA-256 hex digest used for token and email index keys.
fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// 32 random bytes, hex encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
