//! Optimistic, reversible deletion for one list of records.
//!
//! `request_delete` removes the item locally and starts a countdown; the
//! remote delete only happens when the countdown expires (or on
//! [`DeletionController::finalize_now`]). `undo` and a failed remote delete
//! both go through the same restore routine.
//!
//! The pending deletion lives in the shared state behind a mutex. Whichever
//! path takes it out first (timer expiry, finalize, undo) owns the outcome;
//! the others find nothing pending. Timer ticks carry the ticket of the
//! deletion they were started for, so a tick that outlives its deletion is a
//! no-op.

use std::{sync::Arc, time::Duration};

use shared::{domain::Record, protocol::NoticeKind};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    error::DeletionError,
    notifier::{Notifier, UiDispatcher},
    store::{remote_message, RecordStore},
};

pub const DEFAULT_GRACE_PERIOD_SECS: u32 = 5;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Shortest countdown step; `interval_at` rejects a zero period.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);
pub const UNDO_MESSAGE: &str = "Deletion undone";

#[derive(Debug, Clone, Copy)]
pub struct DeletionConfig {
    pub grace_period_secs: u32,
    pub tick_interval: Duration,
    /// Spawn a background task that calls `tick` every `tick_interval`.
    /// Disable to drive the countdown by hand.
    pub auto_tick: bool,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            auto_tick: true,
        }
    }
}

impl DeletionConfig {
    pub fn manual(grace_period_secs: u32) -> Self {
        Self {
            grace_period_secs,
            auto_tick: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingDeletion<R> {
    pub entity: R,
    pub original_index: usize,
    pub remaining_seconds: u32,
    pub grace_period_secs: u32,
    ticket: u64,
}

impl<R> PendingDeletion<R> {
    /// Fraction of the undo window left, for a progress indicator.
    pub fn progress(&self) -> f32 {
        if self.grace_period_secs == 0 {
            return 0.0;
        }
        self.remaining_seconds as f32 / self.grace_period_secs as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListEvent<Id> {
    Countdown {
        id: Id,
        remaining_seconds: u32,
        progress: f32,
    },
    Removed {
        id: Id,
    },
    Restored {
        id: Id,
        index: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome<Id> {
    Committed { id: Id },
    RestoredByUndo { id: Id, index: usize },
    RestoredByFailure { id: Id, index: usize, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome<Id> {
    Counting { remaining_seconds: u32 },
    Finished(DeletionOutcome<Id>),
    Idle,
}

struct PendingSlot<R> {
    deletion: PendingDeletion<R>,
    timer: Option<JoinHandle<()>>,
}

struct ListState<R: Record> {
    items: Vec<R>,
    pending: Option<PendingSlot<R>>,
    committing: Vec<R::Id>,
    next_ticket: u64,
}

pub struct DeletionController<R: Record> {
    store: Arc<dyn RecordStore<R>>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Option<UiDispatcher>,
    config: DeletionConfig,
    state: Arc<Mutex<ListState<R>>>,
    events: broadcast::Sender<ListEvent<R::Id>>,
}

impl<R: Record> Clone for DeletionController<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            dispatcher: self.dispatcher.clone(),
            config: self.config,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

impl<R: Record> DeletionController<R> {
    pub fn new(
        store: Arc<dyn RecordStore<R>>,
        notifier: Arc<dyn Notifier>,
        config: DeletionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            notifier,
            dispatcher: None,
            config: DeletionConfig {
                grace_period_secs: config.grace_period_secs.max(1),
                tick_interval: config.tick_interval.max(MIN_TICK_INTERVAL),
                ..config
            },
            state: Arc::new(Mutex::new(ListState {
                items: Vec::new(),
                pending: None,
                committing: Vec::new(),
                next_ticket: 0,
            })),
            events,
        }
    }

    /// Also report confirmed removals to a dispatcher so parent views refresh.
    pub fn with_dispatcher(mut self, dispatcher: UiDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn config(&self) -> DeletionConfig {
        self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ListEvent<R::Id>> {
        self.events.subscribe()
    }

    pub async fn set_items(&self, items: Vec<R>) -> Result<(), DeletionError> {
        let mut state = self.state.lock().await;
        if state.pending.is_some() || !state.committing.is_empty() {
            return Err(DeletionError::ReloadWhilePending);
        }
        state.items = items;
        Ok(())
    }

    /// Replaces the local list with the store's current contents.
    pub async fn reload(&self) -> Result<usize, DeletionError> {
        {
            let state = self.state.lock().await;
            if state.pending.is_some() || !state.committing.is_empty() {
                return Err(DeletionError::ReloadWhilePending);
            }
        }
        let items = self.store.list().await.map_err(|err| {
            warn!(table = R::TABLE, error = %err, "deletion: list reload failed");
            DeletionError::Reload(remote_message(&err))
        })?;
        let count = items.len();
        self.set_items(items).await?;
        debug!(table = R::TABLE, count, "deletion: list reloaded");
        Ok(count)
    }

    pub async fn items(&self) -> Vec<R> {
        self.state.lock().await.items.clone()
    }

    pub async fn pending(&self) -> Option<PendingDeletion<R>> {
        self.state
            .lock()
            .await
            .pending
            .as_ref()
            .map(|slot| slot.deletion.clone())
    }

    pub async fn is_committing(&self) -> bool {
        !self.state.lock().await.committing.is_empty()
    }

    /// Removes `id` from the list and starts the undo countdown. An earlier
    /// deletion that is still pending is committed first.
    pub async fn request_delete(&self, id: R::Id) -> Result<PendingDeletion<R>, DeletionError> {
        loop {
            let mut state = self.state.lock().await;
            if state.pending.is_some() {
                drop(state);
                info!(
                    table = R::TABLE,
                    "deletion: new request while one is pending; committing the earlier one"
                );
                match self.finalize_now().await {
                    Ok(_) | Err(DeletionError::NothingPending) => continue,
                    Err(err) => return Err(err),
                }
            }

            let index = state
                .items
                .iter()
                .position(|item| item.id() == id)
                .ok_or_else(|| DeletionError::NotInList { id: id.to_string() })?;
            let entity = state.items.remove(index);
            state.next_ticket += 1;
            let deletion = PendingDeletion {
                entity,
                original_index: index,
                remaining_seconds: self.config.grace_period_secs,
                grace_period_secs: self.config.grace_period_secs,
                ticket: state.next_ticket,
            };
            let timer = self
                .config
                .auto_tick
                .then(|| self.spawn_countdown(deletion.ticket));
            state.pending = Some(PendingSlot {
                deletion: deletion.clone(),
                timer,
            });
            drop(state);

            info!(
                table = R::TABLE,
                %id,
                index,
                grace_period_secs = deletion.grace_period_secs,
                "deletion: item removed locally; undo window open"
            );
            self.emit_countdown(&deletion);
            return Ok(deletion);
        }
    }

    /// Advances the countdown by one step and commits when it reaches zero.
    pub async fn tick(&self) -> TickOutcome<R::Id> {
        let ticket = match self.state.lock().await.pending.as_ref() {
            Some(slot) => slot.deletion.ticket,
            None => return TickOutcome::Idle,
        };
        self.tick_ticket(ticket, false).await
    }

    /// Cancels the pending deletion and puts the item back. No remote call.
    pub async fn undo(&self) -> Result<DeletionOutcome<R::Id>, DeletionError> {
        let (id, index) = {
            let mut state = self.state.lock().await;
            let Some(slot) = state.pending.take() else {
                return Err(match state.committing.first() {
                    Some(id) => DeletionError::CommitInFlight { id: id.to_string() },
                    None => DeletionError::NothingPending,
                });
            };
            if let Some(timer) = slot.timer {
                timer.abort();
            }
            let id = slot.deletion.entity.id();
            let index = restore(
                &mut state.items,
                slot.deletion.entity,
                slot.deletion.original_index,
            );
            (id, index)
        };

        info!(table = R::TABLE, %id, index, "deletion: undone");
        self.notifier.notify(NoticeKind::Success, UNDO_MESSAGE);
        let _ = self.events.send(ListEvent::Restored { id, index });
        Ok(DeletionOutcome::RestoredByUndo { id, index })
    }

    /// Skips the rest of the countdown and commits immediately.
    pub async fn finalize_now(&self) -> Result<DeletionOutcome<R::Id>, DeletionError> {
        let deletion = {
            let mut state = self.state.lock().await;
            let Some(slot) = state.pending.take() else {
                return Err(DeletionError::NothingPending);
            };
            if let Some(timer) = slot.timer {
                timer.abort();
            }
            state.committing.push(slot.deletion.entity.id());
            slot.deletion
        };
        Ok(self.commit(deletion).await)
    }

    async fn tick_ticket(&self, ticket: u64, from_timer: bool) -> TickOutcome<R::Id> {
        let expired = {
            let mut state = self.state.lock().await;
            let Some(slot) = state.pending.as_mut() else {
                return TickOutcome::Idle;
            };
            if slot.deletion.ticket != ticket {
                return TickOutcome::Idle;
            }

            slot.deletion.remaining_seconds = slot.deletion.remaining_seconds.saturating_sub(1);
            if slot.deletion.remaining_seconds > 0 {
                let remaining_seconds = slot.deletion.remaining_seconds;
                self.emit_countdown(&slot.deletion);
                return TickOutcome::Counting { remaining_seconds };
            }

            let Some(slot) = state.pending.take() else {
                return TickOutcome::Idle;
            };
            // The timer task may be the caller; only a manual tick stops it.
            if let Some(timer) = slot.timer {
                if !from_timer {
                    timer.abort();
                }
            }
            state.committing.push(slot.deletion.entity.id());
            slot.deletion
        };

        self.emit_countdown(&expired);
        TickOutcome::Finished(self.commit(expired).await)
    }

    async fn commit(&self, deletion: PendingDeletion<R>) -> DeletionOutcome<R::Id> {
        let id = deletion.entity.id();
        let label = deletion.entity.label();
        info!(table = R::TABLE, %id, "deletion: committing remote delete");

        let result = self.store.delete(id).await;

        let restored_at = {
            let mut state = self.state.lock().await;
            if let Some(pos) = state.committing.iter().position(|pending| *pending == id) {
                state.committing.remove(pos);
            }
            match &result {
                Ok(()) => None,
                Err(_) => Some(restore(
                    &mut state.items,
                    deletion.entity,
                    deletion.original_index,
                )),
            }
        };

        match (result, restored_at) {
            (Ok(()), _) => {
                info!(table = R::TABLE, %id, "deletion: committed");
                self.notifier
                    .notify(NoticeKind::Success, &format!("{label} deleted"));
                let _ = self.events.send(ListEvent::Removed { id });
                if let Some(dispatcher) = &self.dispatcher {
                    dispatcher.item_removed(R::TABLE, id);
                }
                DeletionOutcome::Committed { id }
            }
            (Err(err), restored_at) => {
                let index = restored_at.unwrap_or(deletion.original_index);
                let message = remote_message(&err);
                warn!(
                    table = R::TABLE,
                    %id,
                    index,
                    error = %message,
                    "deletion: remote delete failed; item restored"
                );
                self.notifier.notify(NoticeKind::Error, &message);
                let _ = self.events.send(ListEvent::Restored { id, index });
                DeletionOutcome::RestoredByFailure { id, index, message }
            }
        }
    }

    fn spawn_countdown(&self, ticket: u64) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.config.tick_interval;
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match controller.tick_ticket(ticket, true).await {
                    TickOutcome::Counting { .. } => {}
                    TickOutcome::Finished(_) | TickOutcome::Idle => break,
                }
            }
        })
    }

    fn emit_countdown(&self, deletion: &PendingDeletion<R>) {
        let _ = self.events.send(ListEvent::Countdown {
            id: deletion.entity.id(),
            remaining_seconds: deletion.remaining_seconds,
            progress: deletion.progress(),
        });
    }
}

/// Re-inserts `entity` at `index`, clamped to the current list length.
fn restore<R>(items: &mut Vec<R>, entity: R, index: usize) -> usize {
    let index = index.min(items.len());
    items.insert(index, entity);
    index
}

#[cfg(test)]
#[path = "tests/deletion_tests.rs"]
mod tests;
