//! Hooks into the presentation layer: route navigation and user notifications.

use async_trait::async_trait;

/// Route navigation as seen by the session coordinator.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Path of the current view, without query.
    fn current_path(&self) -> String;

    /// Path plus query, used as the post-login return target.
    fn current_full_path(&self) -> String {
        self.current_path()
    }

    /// Replace the current view. Query values are raw; encoding is the
    /// navigator's job.
    async fn replace(&self, path: &str, query: &[(String, String)]);

    async fn push(&self, path: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, title: &str, body: &str);
}
