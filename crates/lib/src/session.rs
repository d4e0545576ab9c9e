//! Session manager: the tab collection, the active tab pointer, and every mutation on them.
//!
//! The collection is never empty and the active id always names a tab in it. Each mutation
//! rebuilds the affected tab as a whole value and writes tabs + active id through to storage.

use std::fmt;

use crate::store::TabStorage;
use crate::tab::{DebugInfo, Message, Tab, ToolCall};

/// User-facing notification raised by a session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The last remaining tab was closed and replaced by a fresh one.
    SessionReset,
    ChatCleared,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SessionReset => write!(f, "Letzter Tab wurde zurückgesetzt"),
            Notice::ChatCleared => write!(f, "Chat wurde gelöscht"),
        }
    }
}

/// Merge-patch for a tab. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct TabPatch {
    pub messages: Option<Vec<Message>>,
    pub thread_id: Option<Option<String>>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub debug_info: Option<Option<DebugInfo>>,
}

impl TabPatch {
    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Some(messages),
            ..Self::default()
        }
    }

    fn apply(self, tab: &Tab) -> Tab {
        let mut next = tab.clone();
        if let Some(messages) = self.messages {
            next.messages = messages;
        }
        if let Some(thread_id) = self.thread_id {
            next.thread_id = thread_id;
        }
        if let Some(tool_calls) = self.tool_calls {
            next.tool_calls = tool_calls;
        }
        if let Some(debug_info) = self.debug_info {
            next.debug_info = debug_info;
        }
        next
    }
}

pub struct SessionManager {
    tabs: Vec<Tab>,
    active_tab_id: String,
    storage: TabStorage,
}

impl SessionManager {
    /// Load from storage, repair the active pointer if needed, and persist the result.
    pub fn open(storage: TabStorage) -> Self {
        let loaded = storage.load();
        let mut tabs = loaded.tabs;
        if tabs.is_empty() {
            tabs.push(Tab::new(None, storage.greeting()));
        }
        let active_tab_id = loaded
            .active_tab_id
            .filter(|id| tabs.iter().any(|t| &t.id == id))
            .unwrap_or_else(|| tabs[0].id.clone());
        let manager = Self {
            tabs,
            active_tab_id,
            storage,
        };
        manager.persist();
        manager
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab_id(&self) -> &str {
        &self.active_tab_id
    }

    pub fn active_tab(&self) -> &Tab {
        self.tabs
            .iter()
            .find(|t| t.id == self.active_tab_id)
            .unwrap_or(&self.tabs[0])
    }

    pub fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    /// Append a fresh tab and make it active. Returns the new id.
    pub fn new_tab(&mut self) -> String {
        let tab = Tab::new(None, self.storage.greeting());
        let id = tab.id.clone();
        log::debug!("new tab {}", id);
        self.tabs.push(tab);
        self.active_tab_id = id.clone();
        self.persist();
        id
    }

    /// Close a tab. Closing the only tab resets the session instead.
    pub fn close_tab(&mut self, tab_id: &str) -> Option<Notice> {
        if self.tabs.len() == 1 {
            if self.tabs[0].id != tab_id {
                return None;
            }
            let tab = Tab::new(None, self.storage.greeting());
            self.active_tab_id = tab.id.clone();
            self.tabs = vec![tab];
            self.persist();
            return Some(Notice::SessionReset);
        }
        let Some(index) = self.tabs.iter().position(|t| t.id == tab_id) else {
            return None;
        };
        self.tabs.remove(index);
        if self.active_tab_id == tab_id {
            let next = self
                .tabs
                .get(index.saturating_sub(1))
                .unwrap_or(&self.tabs[0]);
            self.active_tab_id = next.id.clone();
        }
        log::debug!("closed tab {}", tab_id);
        self.persist();
        None
    }

    /// Activate an existing tab. Unknown ids are ignored.
    pub fn switch_tab(&mut self, tab_id: &str) -> bool {
        if !self.tabs.iter().any(|t| t.id == tab_id) {
            log::debug!("switch to unknown tab {} ignored", tab_id);
            return false;
        }
        self.active_tab_id = tab_id.to_string();
        self.persist();
        true
    }

    /// Reset the active tab to just the greeting and a fresh server thread.
    pub fn clear_active_tab(&mut self) -> Notice {
        let patch = TabPatch {
            messages: Some(vec![Message::initial(self.storage.greeting())]),
            thread_id: Some(None),
            tool_calls: Some(Vec::new()),
            debug_info: None,
        };
        self.update_active_tab(patch);
        Notice::ChatCleared
    }

    pub fn update_active_tab(&mut self, patch: TabPatch) {
        let id = self.active_tab().id.clone();
        self.update_tab(&id, patch);
    }

    /// Patch one tab by id. Returns false when no such tab exists.
    pub fn update_tab(&mut self, tab_id: &str, patch: TabPatch) -> bool {
        let Some(slot) = self.tabs.iter_mut().find(|t| t.id == tab_id) else {
            return false;
        };
        *slot = patch.apply(slot);
        self.persist();
        true
    }

    fn persist(&self) {
        self.storage.save(&self.tabs, &self.active_tab_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore, STORAGE_KEY_ACTIVE_TAB, STORAGE_KEY_TABS};
    use crate::tab::INITIAL_MESSAGE_ID;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedStore(Arc<MemoryStore>);

    impl KeyValueStore for SharedStore {
        fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.0.set(key, value)
        }
    }

    fn manager() -> (SessionManager, SharedStore) {
        let store = SharedStore::default();
        let storage = TabStorage::new(Box::new(store.clone()));
        (SessionManager::open(storage), store)
    }

    fn assert_invariants(m: &SessionManager) {
        assert!(!m.tabs().is_empty());
        assert!(m.tabs().iter().any(|t| t.id == m.active_tab_id()));
    }

    #[test]
    fn open_persists_fresh_session() {
        let (m, store) = manager();
        assert_eq!(m.tabs().len(), 1);
        assert_eq!(
            store.get(STORAGE_KEY_ACTIVE_TAB).unwrap().as_deref(),
            Some(m.active_tab_id())
        );
        assert!(store.get(STORAGE_KEY_TABS).unwrap().is_some());
    }

    #[test]
    fn open_repairs_dangling_active_id() {
        let store = SharedStore::default();
        let tab = Tab::new(None, "hi");
        store
            .set(STORAGE_KEY_TABS, &serde_json::to_string(&vec![tab.clone()]).unwrap())
            .unwrap();
        store.set(STORAGE_KEY_ACTIVE_TAB, "tab-gone").unwrap();
        let m = SessionManager::open(TabStorage::new(Box::new(store)));
        assert_eq!(m.active_tab_id(), tab.id);
    }

    #[test]
    fn new_tab_becomes_active() {
        let (mut m, store) = manager();
        let id = m.new_tab();
        assert_eq!(m.tabs().len(), 2);
        assert_eq!(m.active_tab_id(), id);
        assert_eq!(store.get(STORAGE_KEY_ACTIVE_TAB).unwrap().as_deref(), Some(id.as_str()));
    }

    #[test]
    fn notices_read_in_german() {
        assert_eq!(Notice::SessionReset.to_string(), "Letzter Tab wurde zurückgesetzt");
        assert_eq!(Notice::ChatCleared.to_string(), "Chat wurde gelöscht");
    }

    #[test]
    fn closing_sole_tab_resets_session() {
        let (mut m, _) = manager();
        let old = m.active_tab_id().to_string();
        m.update_active_tab(TabPatch::messages(vec![
            Message::initial("hi"),
            Message::user("hello"),
        ]));
        let notice = m.close_tab(&old);
        assert_eq!(notice, Some(Notice::SessionReset));
        assert_eq!(m.tabs().len(), 1);
        assert_ne!(m.active_tab_id(), old);
        let tab = m.active_tab();
        assert_eq!(tab.messages.len(), 1);
        assert_eq!(tab.messages[0].id, INITIAL_MESSAGE_ID);
    }

    #[test]
    fn closing_active_tab_selects_previous() {
        let (mut m, _) = manager();
        let first = m.active_tab_id().to_string();
        let second = m.new_tab();
        let third = m.new_tab();
        m.switch_tab(&second);
        assert_eq!(m.close_tab(&second), None);
        assert_eq!(m.active_tab_id(), first);
        assert_eq!(m.tabs().len(), 2);
        assert!(m.tab(&third).is_some());
    }

    #[test]
    fn closing_first_active_tab_selects_new_first() {
        let (mut m, _) = manager();
        let first = m.active_tab_id().to_string();
        let second = m.new_tab();
        m.switch_tab(&first);
        m.close_tab(&first);
        assert_eq!(m.active_tab_id(), second);
    }

    #[test]
    fn closing_inactive_tab_keeps_active() {
        let (mut m, _) = manager();
        let first = m.active_tab_id().to_string();
        let second = m.new_tab();
        m.close_tab(&first);
        assert_eq!(m.active_tab_id(), second);
    }

    #[test]
    fn closing_unknown_tab_is_noop() {
        let (mut m, _) = manager();
        m.new_tab();
        assert_eq!(m.close_tab("tab-nope"), None);
        assert_eq!(m.tabs().len(), 2);
    }

    #[test]
    fn switch_to_unknown_tab_is_ignored() {
        let (mut m, _) = manager();
        let id = m.active_tab_id().to_string();
        assert!(!m.switch_tab("tab-nope"));
        assert_eq!(m.active_tab_id(), id);
    }

    #[test]
    fn new_close_sequences_keep_invariants() {
        let (mut m, _) = manager();
        for round in 0..40 {
            if round % 3 == 0 {
                let victim = m.tabs()[round % m.tabs().len()].id.clone();
                m.close_tab(&victim);
            } else if round % 5 == 0 {
                let active = m.active_tab_id().to_string();
                m.close_tab(&active);
            } else {
                m.new_tab();
            }
            assert_invariants(&m);
        }
        while m.tabs().len() > 1 {
            let active = m.active_tab_id().to_string();
            m.close_tab(&active);
            assert_invariants(&m);
        }
        let last = m.active_tab_id().to_string();
        m.close_tab(&last);
        assert_invariants(&m);
    }

    #[test]
    fn clear_keeps_identity_and_resets_thread() {
        let (mut m, _) = manager();
        let before = m.active_tab().clone();
        m.update_active_tab(TabPatch {
            messages: Some(vec![
                Message::initial("hi"),
                Message::user("hello"),
                Message::placeholder(),
            ]),
            thread_id: Some(Some("t1".to_string())),
            tool_calls: Some(vec![ToolCall {
                name: "search".to_string(),
                args: Default::default(),
                mcp: None,
                schema: None,
            }]),
            debug_info: None,
        });
        let notice = m.clear_active_tab();
        assert_eq!(notice, Notice::ChatCleared);
        let tab = m.active_tab();
        assert_eq!(tab.id, before.id);
        assert_eq!(tab.created_at, before.created_at);
        assert_eq!(tab.name, before.name);
        assert_eq!(tab.messages.len(), 1);
        assert_eq!(tab.messages[0].id, INITIAL_MESSAGE_ID);
        assert!(tab.thread_id.is_none());
        assert!(tab.tool_calls.is_empty());
    }

    #[test]
    fn update_touches_only_target_tab() {
        let (mut m, _) = manager();
        let first = m.active_tab_id().to_string();
        let second = m.new_tab();
        m.update_tab(
            &first,
            TabPatch {
                thread_id: Some(Some("t9".to_string())),
                ..TabPatch::default()
            },
        );
        assert_eq!(m.tab(&first).unwrap().thread_id.as_deref(), Some("t9"));
        assert!(m.tab(&second).unwrap().thread_id.is_none());
        assert_eq!(m.tab(&first).unwrap().messages.len(), 1);
        assert!(!m.update_tab("tab-nope", TabPatch::default()));
    }

    #[test]
    fn reopen_restores_tabs_and_active() {
        let (mut m, store) = manager();
        let second = m.new_tab();
        m.update_active_tab(TabPatch::messages(vec![
            Message::initial("hi"),
            Message::user("persist me"),
        ]));
        let reopened = SessionManager::open(TabStorage::new(Box::new(store)));
        assert_eq!(reopened.tabs().len(), 2);
        assert_eq!(reopened.active_tab_id(), second);
        assert_eq!(reopened.active_tab().messages[1].text, "persist me");
    }
}
