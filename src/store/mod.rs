//! Durable JSON stores for tasks and meetings.
//!
//! One [`Store`] exists per entity kind for the life of the process. It owns
//! the entity map, the monotonic id counter, and the board-channel pointer,
//! and is the only thing that mutates them.
//!
//! Every mutation works on a copy of the state, persists that copy as a full
//! snapshot, and only then swaps it in. A failed write therefore leaves memory
//! and disk in agreement, and a failed precondition (unknown id, rejected
//! closure) never touches the file.
//!
//! On-disk shape, with ids as string keys:
//!
//! ```json
//! { "tasks": { "1": { ... } }, "task_counter": 1, "task_channel_id": null }
//! ```

use crate::error::{BoardError, Result};
use crate::model::{ChannelId, EntityKind, Meeting, MeetingPatch, Task, TaskPatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// An entity kind that can live in a [`Store`].
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + 'static {
    const KIND: EntityKind;
    /// JSON key of the entity map.
    const COLLECTION_KEY: &'static str;
    /// JSON key of the id counter.
    const COUNTER_KEY: &'static str;
    /// JSON key of the board-channel pointer.
    const CHANNEL_KEY: &'static str;

    /// Typed partial update.
    type Patch: Send;

    fn id(&self) -> u64;
    fn assign_id(&mut self, id: u64);
    fn apply_patch(&mut self, patch: Self::Patch);
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;
    const COLLECTION_KEY: &'static str = "tasks";
    const COUNTER_KEY: &'static str = "task_counter";
    const CHANNEL_KEY: &'static str = "task_channel_id";

    type Patch = TaskPatch;

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn apply_patch(&mut self, patch: TaskPatch) {
        self.apply(patch);
    }
}

impl Entity for Meeting {
    const KIND: EntityKind = EntityKind::Meeting;
    const COLLECTION_KEY: &'static str = "meetings";
    const COUNTER_KEY: &'static str = "meeting_counter";
    const CHANNEL_KEY: &'static str = "meeting_channel_id";

    type Patch = MeetingPatch;

    fn id(&self) -> u64 {
        self.id
    }

    fn assign_id(&mut self, id: u64) {
        self.id = id;
    }

    fn apply_patch(&mut self, patch: MeetingPatch) {
        self.apply(patch);
    }
}

pub type TaskStore = Store<Task>;
pub type MeetingStore = Store<Meeting>;

#[derive(Debug, Clone)]
struct StoreState<E> {
    entities: BTreeMap<u64, E>,
    counter: u64,
    board_channel: Option<ChannelId>,
}

impl<E> Default for StoreState<E> {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            counter: 0,
            board_channel: None,
        }
    }
}

/// File-backed store for one entity kind.
#[derive(Debug)]
pub struct Store<E: Entity> {
    path: PathBuf,
    state: Mutex<StoreState<E>>,
}

impl<E: Entity> Store<E> {
    /// Open the store at `path`, creating an empty file if none exists.
    ///
    /// A file that cannot be read or parsed is renamed to `<file>.corrupt`
    /// and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Storage`] if the initial empty file cannot be
    /// written.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match load_state::<E>(&path) {
            Ok(Some(state)) => {
                tracing::info!(
                    "loaded {} {} record(s) from {}",
                    state.entities.len(),
                    E::KIND,
                    path.display()
                );
                state
            }
            Ok(None) => {
                let state = StoreState::default();
                persist(&path, &state)?;
                tracing::info!("created empty {} store at {}", E::KIND, path.display());
                state
            }
            Err(reason) => {
                tracing::warn!(
                    "{} store at {} is unreadable ({reason}); starting empty",
                    E::KIND,
                    path.display()
                );
                quarantine(&path);
                let state = StoreState::default();
                persist(&path, &state)?;
                state
            }
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new entity under the next counter value.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Storage`] if the snapshot cannot be written; the
    /// counter is not advanced in that case.
    pub fn add(&self, mut draft: E) -> Result<E> {
        self.mutate(|state| {
            state.counter += 1;
            draft.assign_id(state.counter);
            state.entities.insert(state.counter, draft.clone());
            Ok(draft)
        })
    }

    /// Apply a typed patch to an existing entity.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotFound`] when `id` is absent (nothing is written), or
    /// [`BoardError::Storage`] on write failure.
    pub fn update(&self, id: u64, patch: E::Patch) -> Result<E> {
        self.update_with(id, |entity| {
            entity.apply_patch(patch);
            Ok(())
        })
    }

    /// Read-modify-write under the store lock. An error from `f` aborts the
    /// update without persisting.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotFound`], whatever `f` returns, or
    /// [`BoardError::Storage`].
    pub fn update_with<F>(&self, id: u64, f: F) -> Result<E>
    where
        F: FnOnce(&mut E) -> Result<()>,
    {
        self.mutate(|state| {
            let entity = state.entities.get_mut(&id).ok_or(BoardError::NotFound {
                kind: E::KIND,
                id,
            })?;
            f(entity)?;
            Ok(entity.clone())
        })
    }

    /// Remove an entity and return it so callers can clean up after it.
    ///
    /// # Errors
    ///
    /// [`BoardError::NotFound`] or [`BoardError::Storage`].
    pub fn delete(&self, id: u64) -> Result<E> {
        self.mutate(|state| {
            state.entities.remove(&id).ok_or(BoardError::NotFound {
                kind: E::KIND,
                id,
            })
        })
    }

    /// # Errors
    ///
    /// [`BoardError::NotFound`] when `id` is absent.
    pub fn get(&self, id: u64) -> Result<E> {
        self.lock()
            .entities
            .get(&id)
            .cloned()
            .ok_or(BoardError::NotFound { kind: E::KIND, id })
    }

    /// Owned copy of every entity, ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<E> {
        self.lock().entities.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entities.is_empty()
    }

    #[must_use]
    pub fn board_channel(&self) -> Option<ChannelId> {
        self.lock().board_channel
    }

    /// # Errors
    ///
    /// [`BoardError::Storage`] on write failure.
    pub fn set_board_channel(&self, channel: ChannelId) -> Result<()> {
        self.mutate(|state| {
            state.board_channel = Some(channel);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// [`BoardError::Storage`] on write failure.
    pub fn clear_board_channel(&self) -> Result<()> {
        self.mutate(|state| {
            state.board_channel = None;
            Ok(())
        })
    }

    /// Drop every entity, the counter, and the channel pointer.
    ///
    /// # Errors
    ///
    /// [`BoardError::Storage`] on write failure.
    pub fn reset(&self) -> Result<()> {
        self.mutate(|state| {
            *state = StoreState::default();
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState<E>> {
        // State is only swapped after a successful write, so a poisoned guard
        // still holds a consistent snapshot.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState<E>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        persist(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }
}

fn to_json<E: Entity>(state: &StoreState<E>) -> Result<Value> {
    let mut entities = Map::new();
    for (id, entity) in &state.entities {
        let value = serde_json::to_value(entity)
            .map_err(|e| BoardError::Storage(format!("cannot serialize {} {id}: {e}", E::KIND)))?;
        entities.insert(id.to_string(), value);
    }
    let mut root = Map::new();
    root.insert(E::COLLECTION_KEY.to_owned(), Value::Object(entities));
    root.insert(E::COUNTER_KEY.to_owned(), Value::from(state.counter));
    root.insert(
        E::CHANNEL_KEY.to_owned(),
        state.board_channel.map_or(Value::Null, |c| Value::from(c.get())),
    );
    Ok(Value::Object(root))
}

fn from_json<E: Entity>(root: Value) -> std::result::Result<StoreState<E>, String> {
    let Value::Object(mut root) = root else {
        return Err("top level is not an object".to_owned());
    };

    let mut entities = BTreeMap::new();
    match root.remove(E::COLLECTION_KEY) {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, value) in map {
                let entity: E =
                    serde_json::from_value(value).map_err(|e| format!("entry `{key}`: {e}"))?;
                entities.insert(entity.id(), entity);
            }
        }
        Some(_) => return Err(format!("`{}` is not an object", E::COLLECTION_KEY)),
    }

    let counter = root
        .get(E::COUNTER_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(0);
    // Ids are never reused, even when the counter lags the stored entities.
    let counter = counter.max(entities.keys().next_back().copied().unwrap_or(0));

    let board_channel = root
        .get(E::CHANNEL_KEY)
        .and_then(Value::as_u64)
        .map(ChannelId);

    Ok(StoreState {
        entities,
        counter,
        board_channel,
    })
}

/// `Ok(None)` when the file does not exist; `Err` carries the reason the file
/// could not be used.
fn load_state<E: Entity>(path: &Path) -> std::result::Result<Option<StoreState<E>>, String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("cannot read: {e}")),
    };
    let root: Value = serde_json::from_slice(&bytes).map_err(|e| format!("cannot parse: {e}"))?;
    from_json(root).map(Some)
}

fn persist<E: Entity>(path: &Path, state: &StoreState<E>) -> Result<()> {
    let json = serde_json::to_string_pretty(&to_json(state)?)
        .map_err(|e| BoardError::Storage(format!("cannot serialize store: {e}")))?;
    atomic_write(path, &json)
}

/// Write to a sibling temp file, then rename it over `path`.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BoardError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
    }
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, content)
        .map_err(|e| BoardError::Storage(format!("cannot write {}: {e}", temp_path.display())))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| BoardError::Storage(format!("cannot replace {}: {e}", path.display())))?;
    Ok(())
}

/// Move an unusable store file aside so it can be inspected later.
fn quarantine(path: &Path) {
    let mut aside = path.as_os_str().to_owned();
    aside.push(".corrupt");
    let aside = PathBuf::from(aside);
    match std::fs::rename(path, &aside) {
        Ok(()) => tracing::warn!("moved unreadable store to {}", aside.display()),
        Err(e) => tracing::warn!("could not move {} aside: {e}", path.display()),
    }
}
