//! Task traits: the execution context a task must run under.
//!
//! A [`TaskTraits`] value names where a task runs ([`Destination`]), how
//! urgent it is ([`TaskPriority`]) and, for thread-pool tasks, whether it is
//! allowed to block. The associated constants cover every combination
//! callers are expected to use.

use std::fmt;

/// Relative urgency of a task.
///
/// Ordered from least to most urgent, so `UserBlocking > BestEffort`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Work the user will not notice if it is delayed.
    BestEffort,
    /// Work whose result the user will eventually see.
    #[default]
    UserVisible,
    /// Work the user is actively waiting on.
    UserBlocking,
}

/// Which executor a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The shared worker pool. Unavailable until the pool is started.
    ThreadPool,
    /// The single UI thread message loop. Available from construction.
    UiThread,
}

/// Execution context for a posted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskTraits {
    priority: TaskPriority,
    destination: Destination,
    may_block: bool,
}

impl TaskTraits {
    pub const BEST_EFFORT: Self = Self::pool(TaskPriority::BestEffort, false);
    pub const BEST_EFFORT_MAY_BLOCK: Self = Self::pool(TaskPriority::BestEffort, true);
    pub const USER_VISIBLE: Self = Self::pool(TaskPriority::UserVisible, false);
    pub const USER_VISIBLE_MAY_BLOCK: Self = Self::pool(TaskPriority::UserVisible, true);
    pub const USER_BLOCKING: Self = Self::pool(TaskPriority::UserBlocking, false);
    pub const USER_BLOCKING_MAY_BLOCK: Self = Self::pool(TaskPriority::UserBlocking, true);

    pub const UI_BEST_EFFORT: Self = Self::ui(TaskPriority::BestEffort);
    pub const UI_USER_VISIBLE: Self = Self::ui(TaskPriority::UserVisible);
    pub const UI_USER_BLOCKING: Self = Self::ui(TaskPriority::UserBlocking);
    pub const UI_DEFAULT: Self = Self::UI_USER_VISIBLE;

    const fn pool(priority: TaskPriority, may_block: bool) -> Self {
        Self {
            priority,
            destination: Destination::ThreadPool,
            may_block,
        }
    }

    const fn ui(priority: TaskPriority) -> Self {
        Self {
            priority,
            destination: Destination::UiThread,
            may_block: false,
        }
    }

    pub const fn priority(self) -> TaskPriority {
        self.priority
    }

    pub const fn destination(self) -> Destination {
        self.destination
    }

    pub const fn may_block(self) -> bool {
        self.may_block
    }

    /// Returns `true` if these traits route to the UI thread.
    pub const fn is_ui(self) -> bool {
        matches!(self.destination, Destination::UiThread)
    }

    /// Returns a copy with a different priority.
    pub const fn with_priority(self, priority: TaskPriority) -> Self {
        Self { priority, ..self }
    }

    /// Returns a copy that is allowed to block. No-op for UI traits, which
    /// must never block the message loop.
    pub const fn with_may_block(self) -> Self {
        Self {
            may_block: !self.is_ui(),
            ..self
        }
    }
}

impl Default for TaskTraits {
    fn default() -> Self {
        Self::USER_VISIBLE
    }
}

impl fmt::Display for TaskTraits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let destination = match self.destination {
            Destination::ThreadPool => "pool",
            Destination::UiThread => "ui",
        };
        let priority = match self.priority {
            TaskPriority::BestEffort => "best_effort",
            TaskPriority::UserVisible => "user_visible",
            TaskPriority::UserBlocking => "user_blocking",
        };
        write!(f, "{destination}:{priority}")?;
        if self.may_block {
            write!(f, ":may_block")?;
        }
        Ok(())
    }
}
