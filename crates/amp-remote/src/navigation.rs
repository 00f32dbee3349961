//! ModalNavigator — at most one open modal, each with a linear screen stack.
//!
//! ```text
//!   Closed ──open(m)──▶ Open(m, ["main"])
//!   Open   ──open(m')─▶ Open(m', ["main"])      (context reset)
//!   Open   ──close()──▶ Closed                  (stack + context cleared)
//! ```
//!
//! Stray calls (push while closed, back at root) are guarded no-ops, never
//! errors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const ROOT_SCREEN: &str = "main";

/// Context keys that belong exclusively to one screen and are dropped when
/// that screen leaves the stack.
const SCREEN_OWNED_KEYS: &[(&str, &[&str])] = &[
    ("client-details", &["selectedClient"]),
    ("group-details", &["selectedGroup"]),
    ("stream-details", &["selectedStream"]),
    ("preset-details", &["selectedPreset"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModalId {
    Snapcast,
    Equalizer,
}

impl ModalId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModalId::Snapcast => "snapcast",
            ModalId::Equalizer => "equalizer",
        }
    }

    fn title_key(&self, screen: &str) -> &'static str {
        match (self, screen) {
            (ModalId::Snapcast, "settings") => "snapcast.settings_title",
            (ModalId::Snapcast, _) => "snapcast.title",
            (ModalId::Equalizer, "settings") => "equalizer.settings_title",
            (ModalId::Equalizer, _) => "equalizer.title",
        }
    }
}

impl fmt::Display for ModalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModalId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapcast" => Ok(ModalId::Snapcast),
            "equalizer" => Ok(ModalId::Equalizer),
            other => anyhow::bail!("unknown modal: {}", other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModalState {
    pub active_modal: Option<ModalId>,
    pub screen_stack: Vec<String>,
    pub context: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct ModalNavigator {
    state: ModalState,
}

impl ModalNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ModalState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        self.state.active_modal.is_some()
    }

    pub fn current_screen(&self) -> Option<&str> {
        self.state.screen_stack.last().map(String::as_str)
    }

    /// i18n key for the header of the current screen.
    pub fn title_key(&self) -> Option<&'static str> {
        let modal = self.state.active_modal?;
        Some(modal.title_key(self.current_screen().unwrap_or(ROOT_SCREEN)))
    }

    pub fn open(&mut self, modal: ModalId) {
        if let Some(prev) = self.state.active_modal {
            debug!("nav: replacing open modal {} with {}", prev, modal);
        }
        self.state.active_modal = Some(modal);
        self.state.screen_stack = vec![ROOT_SCREEN.to_string()];
        self.state.context.clear();
    }

    pub fn close(&mut self) {
        self.state.active_modal = None;
        self.state.screen_stack.clear();
        self.state.context.clear();
    }

    pub fn push_screen(&mut self, screen: &str, extra: Map<String, Value>) {
        if !self.is_open() {
            warn!("nav: push_screen({}) with no modal open", screen);
            return;
        }
        if self.current_screen() != Some(screen) {
            self.state.screen_stack.push(screen.to_string());
        }
        self.merge_context(extra);
    }

    pub fn go_back(&mut self) {
        if self.state.screen_stack.len() < 2 {
            debug!("nav: go_back at root is a no-op");
            return;
        }
        if let Some(popped) = self.state.screen_stack.pop() {
            self.prune_owned(&popped);
        }
    }

    /// Lateral navigation: replace everything above root with `screen`.
    pub fn go_to_screen(&mut self, screen: &str, extra: Map<String, Value>) {
        if !self.is_open() {
            warn!("nav: go_to_screen({}) with no modal open", screen);
            return;
        }
        let removed: Vec<String> = self.state.screen_stack.drain(1..).collect();
        for s in &removed {
            self.prune_owned(s);
        }
        if screen != ROOT_SCREEN {
            self.state.screen_stack.push(screen.to_string());
        }
        self.merge_context(extra);
    }

    fn merge_context(&mut self, extra: Map<String, Value>) {
        for (k, v) in extra {
            self.state.context.insert(k, v);
        }
    }

    fn prune_owned(&mut self, screen: &str) {
        let Some((_, keys)) = SCREEN_OWNED_KEYS.iter().find(|(s, _)| *s == screen) else {
            return;
        };
        for key in keys.iter() {
            self.state.context.remove(*key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use serde_json::json;

    fn data(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn stack(nav: &ModalNavigator) -> Vec<&str> {
        nav.state().screen_stack.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_open_push_back_drops_selected_client() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Snapcast);
        nav.push_screen("client-details", data(json!({"selectedClient": {"id": "c1"}})));
        assert_eq!(nav.state().context["selectedClient"]["id"], "c1");

        nav.go_back();
        assert_eq!(nav.state().active_modal, Some(ModalId::Snapcast));
        assert_eq!(stack(&nav), vec!["main"]);
        assert!(nav.state().context.get("selectedClient").is_none());
    }

    #[test]
    fn test_back_at_root_is_noop() {
        let mut nav = ModalNavigator::new();
        nav.go_back();
        assert!(!nav.is_open());

        nav.open(ModalId::Equalizer);
        nav.go_back();
        nav.go_back();
        assert_eq!(stack(&nav), vec!["main"]);
    }

    #[test]
    fn test_push_while_closed_is_noop() {
        let mut nav = ModalNavigator::new();
        nav.push_screen("settings", data(json!({"k": 1})));
        nav.go_to_screen("settings", data(json!({"k": 1})));
        assert_eq!(nav.state(), &ModalState::default());
    }

    #[test]
    fn test_open_resets_context_and_stack() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Snapcast);
        nav.push_screen("group-details", data(json!({"selectedGroup": "g", "filter": "x"})));
        nav.open(ModalId::Equalizer);
        assert_eq!(nav.state().active_modal, Some(ModalId::Equalizer));
        assert_eq!(stack(&nav), vec!["main"]);
        assert!(nav.state().context.is_empty());
    }

    #[test]
    fn test_close_clears_everything() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Snapcast);
        nav.push_screen("settings", data(json!({"latency": 20})));
        nav.close();
        assert_eq!(nav.state(), &ModalState::default());
        assert_eq!(nav.title_key(), None);
    }

    #[test]
    fn test_push_same_screen_merges_only() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Snapcast);
        nav.push_screen("client-details", data(json!({"selectedClient": "a"})));
        nav.push_screen("client-details", data(json!({"selectedClient": "b"})));
        assert_eq!(stack(&nav), vec!["main", "client-details"]);
        assert_eq!(nav.state().context["selectedClient"], "b");
    }

    #[test]
    fn test_back_keeps_keys_not_owned_by_popped_screen() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Snapcast);
        nav.push_screen("group-details", data(json!({"selectedGroup": "g1"})));
        nav.push_screen("client-details", data(json!({"selectedClient": "c1"})));
        nav.go_back();
        assert_eq!(stack(&nav), vec!["main", "group-details"]);
        assert_eq!(nav.state().context["selectedGroup"], "g1");
        assert!(nav.state().context.get("selectedClient").is_none());
    }

    #[test]
    fn test_go_to_screen_replaces_stack() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Snapcast);
        nav.push_screen("group-details", data(json!({"selectedGroup": "g1"})));
        nav.push_screen("client-details", data(json!({"selectedClient": "c1"})));

        nav.go_to_screen("stream-details", data(json!({"selectedStream": "s1"})));
        assert_eq!(stack(&nav), vec!["main", "stream-details"]);
        assert!(nav.state().context.get("selectedGroup").is_none());
        assert!(nav.state().context.get("selectedClient").is_none());
        assert_eq!(nav.state().context["selectedStream"], "s1");

        nav.go_to_screen(ROOT_SCREEN, Map::new());
        assert_eq!(stack(&nav), vec!["main"]);
    }

    #[test]
    fn test_title_keys() {
        let mut nav = ModalNavigator::new();
        nav.open(ModalId::Equalizer);
        assert_eq!(nav.title_key(), Some("equalizer.title"));
        nav.push_screen("settings", Map::new());
        assert_eq!(nav.title_key(), Some("equalizer.settings_title"));

        nav.open(ModalId::Snapcast);
        nav.push_screen("client-details", Map::new());
        assert_eq!(nav.title_key(), Some("snapcast.title"));
        nav.go_to_screen("settings", Map::new());
        assert_eq!(nav.title_key(), Some("snapcast.settings_title"));
    }

    #[test]
    fn test_random_sequences_keep_stack_invariants() {
        let screens = ["main", "settings", "client-details", "group-details"];
        let mut rng = rand::thread_rng();
        let mut nav = ModalNavigator::new();

        for _ in 0..5000 {
            let screen = screens[rng.gen_range(0..screens.len())];
            match rng.gen_range(0..6) {
                0 => nav.open(if rng.gen_bool(0.5) {
                    ModalId::Snapcast
                } else {
                    ModalId::Equalizer
                }),
                1 => nav.close(),
                2 | 3 => nav.push_screen(screen, data(json!({"k": screen}))),
                4 => nav.go_back(),
                _ => nav.go_to_screen(screen, Map::new()),
            }

            let s = nav.state();
            match s.active_modal {
                None => {
                    assert!(s.screen_stack.is_empty());
                    assert!(s.context.is_empty());
                }
                Some(_) => {
                    assert!(!s.screen_stack.is_empty());
                    assert_eq!(s.screen_stack[0], ROOT_SCREEN);
                    for pair in s.screen_stack.windows(2) {
                        assert_ne!(pair[0], pair[1]);
                    }
                }
            }
        }
    }
}
