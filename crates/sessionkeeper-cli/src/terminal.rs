//! Terminal stand-ins for the navigation and notification hooks.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use sessionkeeper_core::ui::{Navigator, NotificationKind, Notifier};

/// Tracks a notional current view so logout/login redirects are visible.
pub struct TerminalNavigator {
    path: Mutex<String>,
}

impl TerminalNavigator {
    pub fn new(start: &str) -> Self {
        Self {
            path: Mutex::new(start.to_string()),
        }
    }
}

#[async_trait]
impl Navigator for TerminalNavigator {
    fn current_path(&self) -> String {
        self.path.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn replace(&self, path: &str, query: &[(String, String)]) {
        debug!(path, ?query, "navigate (replace)");
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = path.to_string();
    }

    async fn push(&self, path: &str) {
        debug!(path, "navigate (push)");
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = path.to_string();
    }
}

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, kind: NotificationKind, title: &str, body: &str) {
        match kind {
            NotificationKind::Success => println!("{}: {}", title, body),
            NotificationKind::Error => eprintln!("{}: {}", title, body),
        }
    }
}
