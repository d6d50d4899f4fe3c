//! Discussion threads bound to tasks.
//!
//! A task owns at most one thread. Bindings are verified against the platform
//! before they are trusted; a binding whose thread has vanished is cleared.

use crate::board::{Block, COLOR_BLUE, RefreshHook};
use crate::error::{BoardError, Result};
use crate::model::{ChannelId, EntityKind, Task, ThreadBinding, UserId, mention_list};
use crate::platform::{ChatPlatform, PlatformError};
use crate::store::TaskStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of checking a task's thread binding against the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// No thread is bound.
    None,
    Live(ChannelId),
    /// The thread was gone; the binding has been cleared.
    Absent,
    /// The platform could not confirm either way. Treated as present.
    Unknown(ChannelId),
}

impl ThreadState {
    /// Thread that should be considered present.
    #[must_use]
    pub fn present(self) -> Option<ChannelId> {
        match self {
            Self::Live(id) | Self::Unknown(id) => Some(id),
            Self::None | Self::Absent => None,
        }
    }
}

pub struct ThreadManager {
    tasks: Arc<TaskStore>,
    platform: Arc<dyn ChatPlatform>,
}

impl ThreadManager {
    #[must_use]
    pub fn new(tasks: Arc<TaskStore>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self { tasks, platform }
    }

    /// Resolve the task's thread. A missing thread clears the binding, but
    /// only if the task is still bound to that same thread.
    pub async fn verify(&self, task: &Task) -> ThreadState {
        let Some(binding) = task.thread else {
            return ThreadState::None;
        };
        match self.platform.resolve_thread(binding.thread_id).await {
            Ok(()) => ThreadState::Live(binding.thread_id),
            Err(PlatformError::NotFound(_)) => {
                let cleared = self.tasks.update_with(task.id, |t| {
                    if t.thread == Some(binding) {
                        t.thread = None;
                    }
                    Ok(())
                });
                match cleared {
                    Ok(_) => warn!(
                        "thread {} of task #{} is gone; binding cleared",
                        binding.thread_id, task.id
                    ),
                    Err(BoardError::NotFound { .. }) => {}
                    Err(e) => warn!("could not clear thread binding of task #{}: {e}", task.id),
                }
                ThreadState::Absent
            }
            Err(e) => {
                warn!(
                    "could not verify thread {} of task #{}: {e}",
                    binding.thread_id, task.id
                );
                ThreadState::Unknown(binding.thread_id)
            }
        }
    }

    /// Verify every bound thread; returns how many bindings were cleared.
    pub async fn verify_all(&self) -> usize {
        let mut healed = 0;
        for task in self.tasks.all().into_iter().filter(|t| t.thread.is_some()) {
            if self.verify(&task).await == ThreadState::Absent {
                healed += 1;
            }
        }
        healed
    }

    /// Open a discussion thread for a task under the task board.
    ///
    /// # Errors
    ///
    /// [`BoardError::Conflict`] when a thread is already present,
    /// [`BoardError::Validation`] when nobody is assigned, and
    /// [`BoardError::BoardMissing`] when the task board channel is unset or
    /// gone.
    pub async fn create_thread(&self, task_id: u64, user: UserId) -> Result<ChannelId> {
        let task = self.tasks.get(task_id)?;
        if let Some(existing) = self.verify(&task).await.present() {
            return Err(BoardError::Conflict(format!(
                "Task #{task_id} already has a thread: {}",
                existing.mention()
            )));
        }
        if task.assigned_users.is_empty() {
            return Err(BoardError::Validation(
                "Task must have at least one assigned user to create a thread".to_owned(),
            ));
        }
        let board = self
            .tasks
            .board_channel()
            .ok_or(BoardError::BoardMissing(EntityKind::Task))?;
        if !self.platform.channel_exists(board).await? {
            return Err(BoardError::BoardMissing(EntityKind::Task));
        }

        let thread_id = self
            .platform
            .create_thread(board, &format!("Task #{} - {}", task.id, task.title))
            .await?;
        let binding = ThreadBinding {
            thread_id,
            creator_id: user,
        };
        let bound = self.tasks.update_with(task_id, |t| {
            t.thread = Some(binding);
            Ok(())
        });
        let task = match bound {
            Ok(task) => task,
            Err(e) => {
                // The task went away mid-flight; don't leave an orphan thread.
                self.retire(binding).await;
                return Err(e);
            }
        };

        let intro = Block::new(format!("📝 Task #{} Discussion", task.id), COLOR_BLUE)
            .description(task.description.clone())
            .field(
                "Assigned Users",
                mention_list(&task.assigned_users, "None"),
                false,
            );
        if let Err(e) = self.platform.post_block(thread_id, &intro).await {
            warn!("could not post intro in thread {thread_id}: {e}");
        }
        info!("thread {thread_id} created for task #{task_id} by user {user}");
        Ok(thread_id)
    }

    /// Delete a task's thread. Only its creator may do this.
    ///
    /// # Errors
    ///
    /// [`BoardError::Validation`] when no thread is bound and
    /// [`BoardError::PermissionDenied`] when `user` did not create it.
    pub async fn delete_thread(&self, task_id: u64, user: UserId) -> Result<ChannelId> {
        let task = self.tasks.get(task_id)?;
        let Some(binding) = task.thread else {
            return Err(BoardError::Validation(
                "This task doesn't have a thread".to_owned(),
            ));
        };
        if binding.creator_id != user {
            return Err(BoardError::PermissionDenied(
                "Only the thread creator can delete the thread".to_owned(),
            ));
        }

        match self.platform.delete_thread(binding.thread_id).await {
            Ok(()) | Err(PlatformError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.tasks.update_with(task_id, |t| {
            if t.thread == Some(binding) {
                t.thread = None;
            }
            Ok(())
        })?;
        info!("thread {} of task #{task_id} deleted", binding.thread_id);
        Ok(binding.thread_id)
    }

    /// Best-effort removal of a thread whose task no longer needs it.
    pub async fn retire(&self, binding: ThreadBinding) -> bool {
        match self.platform.delete_thread(binding.thread_id).await {
            Ok(()) => true,
            Err(PlatformError::NotFound(_)) => {
                debug!("thread {} already gone", binding.thread_id);
                true
            }
            Err(e) => {
                warn!("could not delete thread {}: {e}", binding.thread_id);
                false
            }
        }
    }
}

#[async_trait]
impl RefreshHook for ThreadManager {
    async fn before_render(&self) -> usize {
        self.verify_all().await
    }
}
