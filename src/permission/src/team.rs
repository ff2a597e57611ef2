//! Team context for team-scoped permission lookups
//!
//! A process-wide default team id is kept for single-tenant callers. Request
//! handlers serving several teams concurrently should instead run their work
//! inside [`with_team`], which scopes the id to the current task.

use parking_lot::RwLock;
use std::future::Future;

use crate::types::TeamId;

tokio::task_local! {
    static CURRENT_TEAM: Option<TeamId>;
}

/// Runs `fut` with `team_id` as the team context of the current task
///
/// ```
/// use gatehouse_permission::team::{current_scoped_team, with_team};
///
/// # tokio_test::block_on(async {
/// let seen = with_team(Some(7), async { current_scoped_team() }).await;
/// assert_eq!(seen, Some(Some(7)));
/// assert_eq!(current_scoped_team(), None);
/// # });
/// ```
pub async fn with_team<F>(team_id: Option<TeamId>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_TEAM.scope(team_id, fut).await
}

/// Team id scoped to the current task, if [`with_team`] set one
pub fn current_scoped_team() -> Option<Option<TeamId>> {
    CURRENT_TEAM.try_with(|team_id| *team_id).ok()
}

/// Team context: task-scoped id first, then the process default
#[derive(Debug, Default)]
pub struct TeamContext {
    default: RwLock<Option<TeamId>>,
}

impl TeamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the process default team id
    pub fn set(&self, team_id: Option<TeamId>) {
        *self.default.write() = team_id;
    }

    /// Effective team id for the calling task
    pub fn get(&self) -> Option<TeamId> {
        current_scoped_team().unwrap_or_else(|| *self.default.read())
    }

    /// Clears the process default team id
    pub fn clear(&self) {
        self.set(None);
    }
}
