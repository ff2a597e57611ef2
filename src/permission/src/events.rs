//! Attach/detach events and listener registration
//!
//! Listeners run synchronously on the mutating task, after the store write
//! and before the cache is invalidated. A listener that needs fresh data
//! must invalidate the cache itself.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::types::{PermissionId, RoleId, SubjectRef};

/// Entity whose links changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTarget {
    Subject(SubjectRef),
    Role { role_id: RoleId },
}

/// Permission graph mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PermissionEvent {
    RoleAttached {
        target: EventTarget,
        role_ids: Vec<RoleId>,
        timestamp: DateTime<Utc>,
    },
    RoleDetached {
        target: EventTarget,
        role_ids: Vec<RoleId>,
        timestamp: DateTime<Utc>,
    },
    PermissionAttached {
        target: EventTarget,
        permission_ids: Vec<PermissionId>,
        timestamp: DateTime<Utc>,
    },
    PermissionDetached {
        target: EventTarget,
        permission_ids: Vec<PermissionId>,
        timestamp: DateTime<Utc>,
    },
}

impl PermissionEvent {
    pub fn role_attached(target: EventTarget, role_ids: Vec<RoleId>) -> Self {
        Self::RoleAttached { target, role_ids, timestamp: Utc::now() }
    }

    pub fn role_detached(target: EventTarget, role_ids: Vec<RoleId>) -> Self {
        Self::RoleDetached { target, role_ids, timestamp: Utc::now() }
    }

    pub fn permission_attached(target: EventTarget, permission_ids: Vec<PermissionId>) -> Self {
        Self::PermissionAttached { target, permission_ids, timestamp: Utc::now() }
    }

    pub fn permission_detached(target: EventTarget, permission_ids: Vec<PermissionId>) -> Self {
        Self::PermissionDetached { target, permission_ids, timestamp: Utc::now() }
    }

    /// Entity the event is about
    pub fn target(&self) -> &EventTarget {
        match self {
            PermissionEvent::RoleAttached { target, .. } => target,
            PermissionEvent::RoleDetached { target, .. } => target,
            PermissionEvent::PermissionAttached { target, .. } => target,
            PermissionEvent::PermissionDetached { target, .. } => target,
        }
    }

    /// Role or permission ids involved
    pub fn ids(&self) -> &[u64] {
        match self {
            PermissionEvent::RoleAttached { role_ids, .. } => role_ids,
            PermissionEvent::RoleDetached { role_ids, .. } => role_ids,
            PermissionEvent::PermissionAttached { permission_ids, .. } => permission_ids,
            PermissionEvent::PermissionDetached { permission_ids, .. } => permission_ids,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PermissionEvent::RoleAttached { timestamp, .. } => *timestamp,
            PermissionEvent::RoleDetached { timestamp, .. } => *timestamp,
            PermissionEvent::PermissionAttached { timestamp, .. } => *timestamp,
            PermissionEvent::PermissionDetached { timestamp, .. } => *timestamp,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PermissionEvent::RoleAttached { .. } => "RoleAttached",
            PermissionEvent::RoleDetached { .. } => "RoleDetached",
            PermissionEvent::PermissionAttached { .. } => "PermissionAttached",
            PermissionEvent::PermissionDetached { .. } => "PermissionDetached",
        }
    }
}

/// Receives permission events; must not block
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PermissionEvent);
}

impl<F> EventListener for F
where
    F: Fn(&PermissionEvent) + Send + Sync,
{
    fn on_event(&self, event: &PermissionEvent) {
        self(event)
    }
}

/// Fans events out to registered listeners
pub struct EventDispatcher {
    enabled: bool,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every listener, in registration order
    pub fn dispatch(&self, event: PermissionEvent) {
        if !self.enabled {
            return;
        }

        // Clone the list so listeners may subscribe others without deadlocking
        let listeners: Vec<Arc<dyn EventListener>> = self.listeners.read().clone();
        debug!("Dispatching {} to {} listeners", event.name(), listeners.len());
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(false)
    }
}
