//! Asynchronous image resources shared between widgets.
//!
//! Decoding runs on tokio's blocking pool. Results come back through an
//! unbounded channel that the event loop drains with
//! [`AsyncResourceManager::dispatch`], so textures are created and listeners
//! are called on the loop thread only. Resources are keyed by path and
//! revision and reference counted: every accepted [`ResourceGateway::request_image`]
//! takes one reference, [`ResourceGateway::unload`] and
//! [`ResourceGateway::unload_by_id`] give one back.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use crate::command::absolute_path;
use crate::decoder::{AnimatedImage, DecodeError};
use crate::error::Error;
use crate::texture::{AnimationTimeline, TextureRef};

/// Opaque handle of an accepted decode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(NonZeroU64);

impl ResourceId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives decode results. Called on the event-loop thread only.
pub trait AssetListener {
    /// `asset` is `None` when the resource failed to decode.
    fn on_asset_update(&mut self, id: ResourceId, asset: Option<TextureRef>);
}

pub type ListenerRef = Weak<RefCell<dyn AssetListener>>;

pub trait ResourceGateway {
    /// Starts (or joins) decoding `path` at `revision`. A bound listener is
    /// notified exactly once, later, from the event loop. Returns `None` when
    /// the request is rejected outright.
    fn request_image(
        &self,
        path: &str,
        revision: u64,
        listener: Option<ListenerRef>,
    ) -> Option<ResourceId>;

    fn asset_by_id(&self, id: ResourceId) -> Option<TextureRef>;

    fn timeline_by_id(&self, id: ResourceId) -> Option<Rc<AnimationTimeline>>;

    fn unload(&self, texture: &TextureRef);

    fn unload_by_id(&self, id: ResourceId);
}

#[derive(Debug)]
pub enum Completion {
    Decoded {
        id: ResourceId,
        path: PathBuf,
        result: Result<AnimatedImage, DecodeError>,
    },
    /// Redelivery for a listener that joined an already finished resource.
    Posted { id: ResourceId },
}

pub type CompletionReceiver = UnboundedReceiver<Completion>;

enum EntryState {
    Loading,
    Ready {
        asset: TextureRef,
        timeline: Rc<AnimationTimeline>,
    },
    Failed,
}

struct Entry {
    key: (String, u64),
    refs: usize,
    state: EntryState,
    listeners: Vec<ListenerRef>,
}

#[derive(Default)]
struct Arena {
    entries: HashMap<ResourceId, Entry>,
    by_key: HashMap<(String, u64), ResourceId>,
}

pub struct AsyncResourceManager {
    runtime: Handle,
    completions: UnboundedSender<Completion>,
    next_id: Cell<NonZeroU64>,
    arena: RefCell<Arena>,
}

impl AsyncResourceManager {
    pub fn new(runtime: Handle) -> (Rc<Self>, CompletionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Rc::new(Self {
            runtime,
            completions: tx,
            next_id: Cell::new(NonZeroU64::MIN),
            arena: RefCell::new(Arena::default()),
        });
        (manager, rx)
    }

    /// Applies one completion and notifies its listeners.
    pub fn dispatch(&self, completion: Completion) {
        let (id, listeners) = match completion {
            Completion::Decoded { id, path, result } => {
                let mut arena = self.arena.borrow_mut();
                let Some(entry) = arena.entries.get_mut(&id) else {
                    debug!(resource = %id, path = %path.display(), "dropping decode for released resource");
                    return;
                };
                entry.state = match result {
                    Ok(image) => {
                        let (asset, timeline) = AnimationTimeline::upload(&image);
                        EntryState::Ready {
                            asset,
                            timeline: Rc::new(timeline),
                        }
                    }
                    Err(source) => {
                        let err = Error::Decode { path, source };
                        error!(resource = %id, error = %err, "image decode failed");
                        EntryState::Failed
                    }
                };
                (id, std::mem::take(&mut entry.listeners))
            }
            Completion::Posted { id } => {
                let mut arena = self.arena.borrow_mut();
                match arena.entries.get_mut(&id) {
                    Some(entry) if !matches!(entry.state, EntryState::Loading) => {
                        (id, std::mem::take(&mut entry.listeners))
                    }
                    _ => return,
                }
            }
        };

        let asset = self.asset_by_id(id);
        let mut busy = Vec::new();
        for weak in listeners {
            let Some(listener) = weak.upgrade() else {
                continue;
            };
            match listener.try_borrow_mut() {
                Ok(mut listener) => listener.on_asset_update(id, asset.clone()),
                Err(_) => busy.push(weak),
            };
        }
        if busy.is_empty() {
            return;
        }

        // busy listeners keep their place and get the update on the next pass
        let mut arena = self.arena.borrow_mut();
        if let Some(entry) = arena.entries.get_mut(&id) {
            warn!(resource = %id, listeners = busy.len(), "listener busy; reposting asset update");
            entry.listeners.extend(busy);
            let _ = self.completions.send(Completion::Posted { id });
        }
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.arena.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// References currently held on `id`.
    pub fn refs(&self, id: ResourceId) -> usize {
        self.arena.borrow().entries.get(&id).map_or(0, |e| e.refs)
    }

    fn allocate_id(&self) -> ResourceId {
        let id = self.next_id.get();
        self.next_id.set(id.saturating_add(1));
        ResourceId(id)
    }

    fn spawn_decode(&self, id: ResourceId, path: PathBuf) {
        let tx = self.completions.clone();
        self.runtime.spawn_blocking(move || {
            let result = AnimatedImage::open(&path);
            // the receiver is gone only when the event loop shut down
            let _ = tx.send(Completion::Decoded { id, path, result });
        });
    }

    fn release(&self, id: ResourceId) {
        let mut arena = self.arena.borrow_mut();
        let Some(entry) = arena.entries.get_mut(&id) else {
            debug!(resource = %id, "release of unknown resource");
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(entry) = arena.entries.remove(&id) {
                arena.by_key.remove(&entry.key);
            }
            debug!(resource = %id, "resource evicted");
        }
    }
}

impl ResourceGateway for AsyncResourceManager {
    fn request_image(
        &self,
        path: &str,
        revision: u64,
        listener: Option<ListenerRef>,
    ) -> Option<ResourceId> {
        if path.is_empty() {
            warn!("rejecting image request with an empty path");
            return None;
        }

        let key = (path.to_owned(), revision);
        let mut arena = self.arena.borrow_mut();
        if let Some(&id) = arena.by_key.get(&key) {
            if let Some(entry) = arena.entries.get_mut(&id) {
                entry.refs += 1;
                if let Some(listener) = listener {
                    entry.listeners.push(listener);
                    if !matches!(entry.state, EntryState::Loading) {
                        let _ = self.completions.send(Completion::Posted { id });
                    }
                }
                debug!(resource = %id, path, revision, refs = entry.refs, "joined image request");
                return Some(id);
            }
        }

        let id = self.allocate_id();
        arena.by_key.insert(key.clone(), id);
        arena.entries.insert(
            id,
            Entry {
                key,
                refs: 1,
                state: EntryState::Loading,
                listeners: listener.into_iter().collect(),
            },
        );
        drop(arena);

        debug!(resource = %id, path, revision, "requesting image decode");
        self.spawn_decode(id, absolute_path(path));
        Some(id)
    }

    fn asset_by_id(&self, id: ResourceId) -> Option<TextureRef> {
        match &self.arena.borrow().entries.get(&id)?.state {
            EntryState::Ready { asset, .. } => Some(Rc::clone(asset)),
            EntryState::Loading | EntryState::Failed => None,
        }
    }

    fn timeline_by_id(&self, id: ResourceId) -> Option<Rc<AnimationTimeline>> {
        match &self.arena.borrow().entries.get(&id)?.state {
            EntryState::Ready { timeline, .. } => Some(Rc::clone(timeline)),
            EntryState::Loading | EntryState::Failed => None,
        }
    }

    fn unload(&self, texture: &TextureRef) {
        let owner = self
            .arena
            .borrow()
            .entries
            .iter()
            .find_map(|(id, entry)| match &entry.state {
                EntryState::Ready { asset, .. } if asset.id() == texture.id() => Some(*id),
                _ => None,
            });
        match owner {
            Some(id) => self.release(id),
            None => debug!(texture = texture.id(), "unload of untracked texture"),
        }
    }

    fn unload_by_id(&self, id: ResourceId) {
        self.release(id);
    }
}
