//! Optimistic like/save state.
//!
//! Each (post, user) pair owns a [`Slot`]. A click applies the new value at
//! once and hands back a [`Ticket`]; the mutation's outcome is then reported
//! with that ticket. Only the newest ticket may change what is displayed, so
//! a late response for an older click can never overwrite a newer one.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::gateway::GatewayResult;
use crate::model::{Post, PostId, RecordId, User, UserId};
use crate::query::Queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    Idle,
    OptimisticallyApplied,
    Confirmed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

#[derive(Debug, Clone)]
pub struct Slot<V> {
    state: InteractionState,
    displayed: V,
    /// Last value known to be stored remotely
    baseline: V,
    generation: u64,
    baseline_generation: u64,
}

impl<V: Clone + PartialEq> Slot<V> {
    pub fn new(value: V) -> Self {
        Self {
            state: InteractionState::Idle,
            displayed: value.clone(),
            baseline: value,
            generation: 0,
            baseline_generation: 0,
        }
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn displayed(&self) -> &V {
        &self.displayed
    }

    pub fn is_pending(&self) -> bool {
        self.state == InteractionState::OptimisticallyApplied
    }

    /// Show `value` immediately; the returned ticket settles it later.
    pub fn apply(&mut self, value: V) -> Ticket {
        self.generation += 1;
        self.displayed = value;
        self.state = InteractionState::OptimisticallyApplied;
        Ticket {
            generation: self.generation,
        }
    }

    /// The mutation for `ticket` succeeded with `stored` as the remote value.
    ///
    /// Returns whether the displayed value was affected.
    pub fn confirm(&mut self, ticket: Ticket, stored: V) -> bool {
        if ticket.generation > self.baseline_generation {
            self.baseline = stored.clone();
            self.baseline_generation = ticket.generation;
        }
        if ticket.generation != self.generation {
            return false;
        }
        self.displayed = stored;
        self.state = InteractionState::Confirmed;
        true
    }

    /// The mutation for `ticket` failed. The newest ticket rolls the display
    /// back to the last stored value; older tickets change nothing.
    pub fn fail(&mut self, ticket: Ticket) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        self.displayed = self.baseline.clone();
        self.state = InteractionState::RolledBack;
        true
    }

    /// Adopt a freshly fetched remote value unless a click is still pending.
    pub fn observe(&mut self, stored: V) {
        if self.is_pending() {
            return;
        }
        if self.displayed != stored {
            self.state = InteractionState::Idle;
        }
        self.displayed = stored.clone();
        self.baseline = stored;
        self.baseline_generation = self.generation;
    }
}

/// Liker set after `user` toggles their like
pub fn toggled_likes(likes: &[UserId], user: &UserId) -> Vec<UserId> {
    if likes.contains(user) {
        likes.iter().filter(|id| *id != user).cloned().collect()
    } else {
        let mut next = likes.to_vec();
        next.push(user.clone());
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveState {
    pub saved: bool,
    /// Unknown while a save is still pending
    pub record: Option<RecordId>,
}

impl SaveState {
    pub fn from_user(user: &User, post: &PostId) -> Self {
        let record = user.saved_record_for(post).map(|r| r.id.clone());
        Self {
            saved: record.is_some(),
            record,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikeView {
    pub post_id: PostId,
    pub likes: Vec<UserId>,
    pub count: usize,
    pub liked: bool,
    pub state: InteractionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveView {
    pub post_id: PostId,
    pub saved: bool,
    pub state: InteractionState,
}

/// A like click that has been displayed but not yet sent
#[derive(Debug)]
pub struct PendingLike {
    pub post_id: PostId,
    pub likes: Vec<UserId>,
    ticket: Ticket,
}

#[derive(Debug)]
pub struct PendingSave {
    pub post_id: PostId,
    /// `Some` when unsaving: the record to delete, if known
    pub unsave: Option<Option<RecordId>>,
    ticket: Ticket,
}

/// Like and save interactions of one signed-in user
pub struct Interactions {
    queries: Arc<Queries>,
    user: UserId,
    likes: Mutex<HashMap<PostId, Slot<Vec<UserId>>>>,
    saves: Mutex<HashMap<PostId, Slot<SaveState>>>,
}

impl Interactions {
    pub fn new(queries: Arc<Queries>, user: UserId) -> Self {
        Self {
            queries,
            user,
            likes: Mutex::new(HashMap::new()),
            saves: Mutex::new(HashMap::new()),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    fn likes(&self) -> MutexGuard<'_, HashMap<PostId, Slot<Vec<UserId>>>> {
        self.likes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn saves(&self) -> MutexGuard<'_, HashMap<PostId, Slot<SaveState>>> {
        self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn like_view(&self, post_id: &PostId, slot: &Slot<Vec<UserId>>) -> LikeView {
        let likes = slot.displayed().clone();
        LikeView {
            post_id: post_id.clone(),
            count: likes.len(),
            liked: likes.contains(&self.user),
            likes,
            state: slot.state(),
        }
    }

    /// Current like display for a fetched post
    pub fn observe_post(&self, post: &Post) -> LikeView {
        let mut likes = self.likes();
        let slot = likes
            .entry(post.id.clone())
            .or_insert_with(|| Slot::new(post.likes.clone()));
        slot.observe(post.likes.clone());
        self.like_view(&post.id, slot)
    }

    pub fn like_state(&self, post_id: &PostId) -> Option<LikeView> {
        let likes = self.likes();
        likes.get(post_id).map(|slot| self.like_view(post_id, slot))
    }

    /// Apply a like toggle to the display before anything is sent
    pub fn begin_like(&self, post: &Post) -> (PendingLike, LikeView) {
        let mut likes = self.likes();
        let slot = likes
            .entry(post.id.clone())
            .or_insert_with(|| Slot::new(post.likes.clone()));
        let next = toggled_likes(slot.displayed(), &self.user);
        let ticket = slot.apply(next.clone());
        let view = self.like_view(&post.id, slot);
        (
            PendingLike {
                post_id: post.id.clone(),
                likes: next,
                ticket,
            },
            view,
        )
    }

    pub async fn finish_like(&self, pending: PendingLike) -> GatewayResult<LikeView> {
        let result = self
            .queries
            .like_post(&pending.post_id, &pending.likes)
            .await;

        let mut likes = self.likes();
        let slot = likes
            .entry(pending.post_id.clone())
            .or_insert_with(|| Slot::new(pending.likes.clone()));
        match result {
            Ok(post) => {
                slot.confirm(pending.ticket, post.likes);
                Ok(self.like_view(&pending.post_id, slot))
            }
            Err(e) => {
                if slot.fail(pending.ticket) {
                    tracing::warn!(post_id = %pending.post_id, "Like failed, rolled back: {}", e);
                }
                Err(e)
            }
        }
    }

    pub async fn toggle_like(&self, post: &Post) -> GatewayResult<LikeView> {
        let (pending, _) = self.begin_like(post);
        self.finish_like(pending).await
    }

    fn save_view(post_id: &PostId, slot: &Slot<SaveState>) -> SaveView {
        SaveView {
            post_id: post_id.clone(),
            saved: slot.displayed().saved,
            state: slot.state(),
        }
    }

    /// Current save display, seeded from the user's saved records
    pub fn observe_saves(&self, user: &User, post: &PostId) -> SaveView {
        let mut saves = self.saves();
        let stored = SaveState::from_user(user, post);
        let slot = saves
            .entry(post.clone())
            .or_insert_with(|| Slot::new(stored.clone()));
        slot.observe(stored);
        Self::save_view(post, slot)
    }

    pub fn begin_save(&self, user: &User, post: &PostId) -> (PendingSave, SaveView) {
        let mut saves = self.saves();
        let slot = saves
            .entry(post.clone())
            .or_insert_with(|| Slot::new(SaveState::from_user(user, post)));
        let current = slot.displayed().clone();
        let (next, unsave) = if current.saved {
            (
                SaveState {
                    saved: false,
                    record: None,
                },
                Some(current.record),
            )
        } else {
            (
                SaveState {
                    saved: true,
                    record: None,
                },
                None,
            )
        };
        let ticket = slot.apply(next);
        (
            PendingSave {
                post_id: post.clone(),
                unsave,
                ticket,
            },
            Self::save_view(post, slot),
        )
    }

    pub async fn finish_save(&self, pending: PendingSave) -> GatewayResult<SaveView> {
        let result = match &pending.unsave {
            Some(Some(record)) => self
                .queries
                .delete_saved_post(&self.user, record)
                .await
                .map(|()| SaveState {
                    saved: false,
                    record: None,
                }),
            Some(None) => self
                .queries
                .unsave_post(&self.user, &pending.post_id)
                .await
                .map(|()| SaveState {
                    saved: false,
                    record: None,
                }),
            None => self
                .queries
                .save_post(&self.user, &pending.post_id)
                .await
                .map(|record| SaveState {
                    saved: true,
                    record: Some(record.id),
                }),
        };

        let mut saves = self.saves();
        let slot = saves.entry(pending.post_id.clone()).or_insert_with(|| {
            Slot::new(SaveState {
                saved: pending.unsave.is_some(),
                record: None,
            })
        });
        match result {
            Ok(stored) => {
                slot.confirm(pending.ticket, stored);
                Ok(Self::save_view(&pending.post_id, slot))
            }
            Err(e) => {
                if slot.fail(pending.ticket) {
                    tracing::warn!(post_id = %pending.post_id, "Save failed, rolled back: {}", e);
                }
                Err(e)
            }
        }
    }

    pub async fn toggle_save(&self, user: &User, post: &PostId) -> GatewayResult<SaveView> {
        let (pending, _) = self.begin_save(user, post);
        self.finish_save(pending).await
    }
}
