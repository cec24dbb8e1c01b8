use crate::engine::errors::EngineError;
use crate::engine::events::{
    publish, EngineEvent, EventSender, ListenerId, WindowEvent, WindowEventKind, WindowListener,
};
use crate::engine::page::Page;
use crate::engine::window::{Window, WindowId};
use indexmap::IndexSet;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Closed ids remembered to report `WindowClosed`. Older ones report `WindowNotFound`.
const CLOSED_HISTORY: usize = 1024;

struct Node {
    name: String,
    opener: Option<WindowId>,
    parent: Option<WindowId>,
    children: Vec<WindowId>,
    page: Arc<Page>,
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<WindowId, Node>,
    /// Top-level windows in opening order
    top_level: Vec<WindowId>,
    current: Option<WindowId>,
    /// Recently closed ids, oldest first
    closed: IndexSet<WindowId>,
}

impl Tree {
    fn ensure_open(&self, id: WindowId) -> Result<&Node, EngineError> {
        match self.nodes.get(&id) {
            Some(node) => Ok(node),
            None if self.closed.contains(&id) => Err(EngineError::WindowClosed(id)),
            None => Err(EngineError::WindowNotFound(id)),
        }
    }

    fn insert(&mut self, name: &str, opener: Option<WindowId>, parent: Option<WindowId>) -> (WindowId, Arc<Page>) {
        let id = WindowId::new();
        let page = Arc::new(Page::blank(id));

        self.nodes.insert(
            id,
            Node {
                name: name.to_string(),
                opener,
                parent,
                children: Vec::new(),
                page: page.clone(),
            },
        );

        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(parent) => parent.children.push(id),
            None => self.top_level.push(id),
        }
        if self.current.is_none() && parent.is_none() {
            self.current = Some(id);
        }

        (id, page)
    }

    /// Removes `id` and everything below it. Closed events are pushed children first.
    fn remove_subtree(&mut self, id: WindowId, events: &mut Vec<WindowEvent>) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };

        for child in &node.children {
            self.remove_subtree(*child, events);
        }

        match node.parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(parent) => parent.children.retain(|c| *c != id),
            None => self.top_level.retain(|w| *w != id),
        }
        if self.current == Some(id) {
            self.current = None;
        }

        self.closed.insert(id);
        if self.closed.len() > CLOSED_HISTORY {
            self.closed.shift_remove_index(0);
        }
        events.push(WindowEvent::closed(id, node.page));
    }

    fn find_by_name(&self, ids: &[WindowId], name: &str) -> Option<WindowId> {
        for id in ids {
            let node = self.nodes.get(id)?;
            if node.name == name {
                return Some(*id);
            }
            if let Some(found) = self.find_by_name(&node.children, name) {
                return Some(found);
            }
        }
        None
    }
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<WindowEvent>,
    /// Set while a thread is delivering the queue
    draining: bool,
}

/// Owns the window tree and fans out window events to listeners.
///
/// Tree changes happen under a write lock. Their events are queued before that lock is
/// released, so the queue follows the order of the changes, and delivered after it is
/// released so listeners can call back into the manager. One thread at a time delivers:
/// a thread that finds delivery in progress, including a listener calling back in, leaves
/// its events to the delivering thread.
pub struct WindowManager {
    tree: RwLock<Tree>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn WindowListener>)>>,
    outbox: Mutex<Outbox>,
    events: EventSender,
    replace_last_window: bool,
}

impl WindowManager {
    pub(crate) fn new(events: EventSender, replace_last_window: bool) -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            listeners: RwLock::new(Vec::new()),
            outbox: Mutex::new(Outbox::default()),
            events,
            replace_last_window,
        }
    }

    /// Opens a new top-level window showing `about:blank`.
    pub fn open_window(&self, opener: Option<WindowId>, name: &str) -> Result<WindowId, EngineError> {
        let id = {
            let mut tree = self.write();
            if let Some(opener) = opener {
                tree.ensure_open(opener)?;
            }
            let (id, page) = tree.insert(name, opener, None);
            self.enqueue(vec![WindowEvent::opened(id, page)]);
            id
        };

        log::debug!("Window[{id}]: opened '{name}'");
        self.deliver();
        Ok(id)
    }

    /// Opens a frame below `parent`.
    pub fn open_frame(&self, parent: WindowId, name: &str) -> Result<WindowId, EngineError> {
        let id = {
            let mut tree = self.write();
            tree.ensure_open(parent)?;
            let (id, page) = tree.insert(name, None, Some(parent));
            self.enqueue(vec![WindowEvent::opened(id, page)]);
            id
        };

        log::debug!("Window[{id}]: opened frame '{name}' in {parent}");
        self.deliver();
        Ok(id)
    }

    /// Installs `page` in `window`.
    ///
    /// Frames of the replaced page are closed (children first) before the `changed` event
    /// fires. `changed` is only delivered once the new page is in place. Returns the ids of
    /// the closed frames.
    pub fn navigate(&self, window: WindowId, page: Arc<Page>) -> Result<Vec<WindowId>, EngineError> {
        if page.window_id() != window {
            return Err(EngineError::ForeignPage {
                window,
                page_window: page.window_id(),
            });
        }

        let discarded = {
            let mut tree = self.write();
            let mut events = Vec::new();
            let children = tree.ensure_open(window)?.children.clone();
            for child in children {
                tree.remove_subtree(child, &mut events);
            }

            let node = tree
                .nodes
                .get_mut(&window)
                .ok_or(EngineError::WindowNotFound(window))?;
            let old = std::mem::replace(&mut node.page, page.clone());
            events.push(WindowEvent::changed(window, old, page));

            let discarded = closed_ids(&events);
            self.enqueue(events);
            discarded
        };

        self.deliver();
        Ok(discarded)
    }

    /// Closes `window` and its frames, children first.
    ///
    /// Closing the last top-level window opens a blank replacement when configured to;
    /// its `opened` event follows the `closed` events. Returns the ids of all closed windows.
    pub fn close(&self, window: WindowId) -> Result<Vec<WindowId>, EngineError> {
        let closed = {
            let mut tree = self.write();
            let mut events = Vec::new();
            let was_top_level = tree.ensure_open(window)?.parent.is_none();
            tree.remove_subtree(window, &mut events);

            if tree.current.is_none() {
                tree.current = tree.top_level.last().copied();
            }
            if was_top_level && tree.top_level.is_empty() && self.replace_last_window {
                let (id, page) = tree.insert("", None, None);
                log::debug!("Window[{id}]: opened as replacement for {window}");
                events.push(WindowEvent::opened(id, page));
            }

            let closed = closed_ids(&events);
            self.enqueue(events);
            closed
        };

        log::debug!("Window[{window}]: closed");
        self.deliver();
        Ok(closed)
    }

    /// Closes every window, then opens a single fresh blank window which becomes current.
    ///
    /// Returns the new window and the ids of all closed windows.
    pub fn reset(&self) -> (WindowId, Vec<WindowId>) {
        let (id, closed) = {
            let mut tree = self.write();
            let mut events = Vec::new();
            for top in tree.top_level.clone() {
                tree.remove_subtree(top, &mut events);
            }

            let (id, page) = tree.insert("", None, None);
            tree.current = Some(id);
            events.push(WindowEvent::opened(id, page));

            let closed = closed_ids(&events);
            self.enqueue(events);
            (id, closed)
        };

        log::debug!("Window[{id}]: opened after reset");
        self.deliver();
        (id, closed)
    }

    pub fn page(&self, window: WindowId) -> Result<Arc<Page>, EngineError> {
        Ok(self.read().ensure_open(window)?.page.clone())
    }

    pub fn window(&self, window: WindowId) -> Result<Window, EngineError> {
        let tree = self.read();
        let node = tree.ensure_open(window)?;
        Ok(Window {
            id: window,
            name: node.name.clone(),
            opener: node.opener,
            parent: node.parent,
            children: node.children.clone(),
            page: node.page.clone(),
        })
    }

    pub fn ensure_open(&self, window: WindowId) -> Result<(), EngineError> {
        self.read().ensure_open(window).map(|_| ())
    }

    pub fn is_open(&self, window: WindowId) -> bool {
        self.read().nodes.contains_key(&window)
    }

    /// The window navigation defaults to. `None` only when every window is closed and
    /// automatic replacement is off.
    pub fn current_window(&self) -> Option<WindowId> {
        self.read().current
    }

    pub fn set_current_window(&self, window: WindowId) -> Result<(), EngineError> {
        let mut tree = self.write();
        tree.ensure_open(window)?;
        tree.current = Some(window);
        Ok(())
    }

    pub fn top_level_windows(&self) -> Vec<WindowId> {
        self.read().top_level.clone()
    }

    pub fn children(&self, window: WindowId) -> Result<Vec<WindowId>, EngineError> {
        Ok(self.read().ensure_open(window)?.children.clone())
    }

    /// First window or frame with the given name, searching top-level windows in opening
    /// order and their frames depth first.
    pub fn window_by_name(&self, name: &str) -> Option<WindowId> {
        let tree = self.read();
        tree.find_by_name(&tree.top_level, name)
    }

    pub fn add_listener(&self, listener: Arc<dyn WindowListener>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Queues events. Callers hold the tree write lock.
    fn enqueue(&self, events: Vec<WindowEvent>) {
        self.outbox().queue.extend(events);
    }

    /// Delivers queued events in queue order, unless another thread already is.
    fn deliver(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let event = {
                let mut outbox = self.outbox();
                match outbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.dispatch(event);
        }
    }

    fn dispatch(&self, event: WindowEvent) {
        // Snapshot, so listeners may (un)register listeners without deadlocking
        let listeners: Vec<Arc<dyn WindowListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in &listeners {
            let delivered = catch_unwind(AssertUnwindSafe(|| match event.kind {
                WindowEventKind::Opened => listener.on_opened(&event),
                WindowEventKind::Changed => listener.on_changed(&event),
                WindowEventKind::Closed => listener.on_closed(&event),
            }));
            if delivered.is_err() {
                log::error!("Window[{}]: listener panicked while handling {} event", event.window, event.kind);
            }
        }

        let engine_event = match event.kind {
            WindowEventKind::Opened => EngineEvent::WindowOpened { window_id: event.window },
            WindowEventKind::Changed => match &event.new_page {
                Some(page) => EngineEvent::WindowChanged {
                    window_id: event.window,
                    url: page.url().clone(),
                },
                None => return,
            },
            WindowEventKind::Closed => EngineEvent::WindowClosed { window_id: event.window },
        };
        publish(&self.events, engine_event);
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn closed_ids(events: &[WindowEvent]) -> Vec<WindowId> {
    events
        .iter()
        .filter(|e| e.kind == WindowEventKind::Closed)
        .map(|e| e.window)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(WindowEventKind, WindowId)>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<(WindowEventKind, WindowId)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl WindowListener for Recorder {
        fn on_opened(&self, e: &WindowEvent) {
            self.seen.lock().unwrap().push((e.kind, e.window));
        }
        fn on_changed(&self, e: &WindowEvent) {
            self.seen.lock().unwrap().push((e.kind, e.window));
        }
        fn on_closed(&self, e: &WindowEvent) {
            self.seen.lock().unwrap().push((e.kind, e.window));
        }
    }

    struct Panicker;

    impl WindowListener for Panicker {
        fn on_opened(&self, _e: &WindowEvent) {
            panic!("listener failure");
        }
    }

    fn manager(replace: bool) -> WindowManager {
        let (tx, _rx) = broadcast::channel(64);
        WindowManager::new(tx, replace)
    }

    #[test]
    fn first_window_becomes_current() {
        let wm = manager(true);
        let w = wm.open_window(None, "main").unwrap();
        assert_eq!(wm.current_window(), Some(w));
        assert!(wm.page(w).unwrap().is_blank());
        assert_eq!(wm.window_by_name("main"), Some(w));
    }

    #[test]
    fn navigate_emits_changed_after_swap() {
        struct Checker {
            wm: Arc<WindowManager>,
            ok: Mutex<bool>,
        }
        impl WindowListener for Checker {
            fn on_changed(&self, e: &WindowEvent) {
                let current = self.wm.page(e.window).unwrap();
                let expected = e.new_page.as_ref().unwrap();
                *self.ok.lock().unwrap() = Arc::ptr_eq(&current, expected);
            }
        }

        let wm = Arc::new(manager(true));
        let w = wm.open_window(None, "").unwrap();
        let checker = Arc::new(Checker { wm: wm.clone(), ok: Mutex::new(false) });
        wm.add_listener(checker.clone());

        let old = wm.page(w).unwrap();
        wm.navigate(w, Arc::new(Page::blank(w))).unwrap();
        assert!(*checker.ok.lock().unwrap());
        assert!(!Arc::ptr_eq(&old, &wm.page(w).unwrap()));
    }

    #[test]
    fn foreign_page_is_rejected() {
        let wm = manager(true);
        let a = wm.open_window(None, "").unwrap();
        let b = wm.open_window(None, "").unwrap();
        let err = wm.navigate(a, Arc::new(Page::blank(b))).unwrap_err();
        assert!(matches!(err, EngineError::ForeignPage { .. }));
    }

    #[test]
    fn close_is_depth_first_children_first() {
        let wm = manager(false);
        let rec = Arc::new(Recorder::default());

        let top = wm.open_window(None, "top").unwrap();
        let frame = wm.open_frame(top, "frame").unwrap();
        let nested = wm.open_frame(frame, "nested").unwrap();
        let sibling = wm.open_frame(top, "sibling").unwrap();
        wm.add_listener(rec.clone());

        let closed = wm.close(top).unwrap();
        assert_eq!(closed, vec![nested, frame, sibling, top]);
        assert_eq!(
            rec.seen(),
            vec![
                (WindowEventKind::Closed, nested),
                (WindowEventKind::Closed, frame),
                (WindowEventKind::Closed, sibling),
                (WindowEventKind::Closed, top),
            ]
        );
        assert_eq!(wm.current_window(), None);
    }

    #[test]
    fn closing_last_window_opens_replacement_after_closed() {
        let wm = manager(true);
        let rec = Arc::new(Recorder::default());
        let w = wm.open_window(None, "").unwrap();
        wm.add_listener(rec.clone());

        wm.close(w).unwrap();
        let seen = rec.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (WindowEventKind::Closed, w));
        assert_eq!(seen[1].0, WindowEventKind::Opened);
        assert_eq!(wm.current_window(), Some(seen[1].1));
    }

    #[test]
    fn opened_windows_survive_opener_close() {
        let wm = manager(true);
        let a = wm.open_window(None, "").unwrap();
        let b = wm.open_window(Some(a), "popup").unwrap();

        wm.close(a).unwrap();
        assert!(wm.is_open(b));
        assert_eq!(wm.window(b).unwrap().opener, Some(a));
        assert_eq!(wm.current_window(), Some(b));
    }

    #[test]
    fn navigation_discards_frames() {
        let wm = manager(true);
        let rec = Arc::new(Recorder::default());
        let w = wm.open_window(None, "").unwrap();
        let frame = wm.open_frame(w, "f").unwrap();
        wm.add_listener(rec.clone());

        let discarded = wm.navigate(w, Arc::new(Page::blank(w))).unwrap();
        assert_eq!(discarded, vec![frame]);
        assert_eq!(rec.seen(), vec![(WindowEventKind::Closed, frame), (WindowEventKind::Changed, w)]);
        assert!(wm.children(w).unwrap().is_empty());
    }

    #[test]
    fn reset_emits_closed_then_opened() {
        let wm = manager(true);
        let rec = Arc::new(Recorder::default());
        let a = wm.open_window(None, "").unwrap();
        let b = wm.open_window(None, "").unwrap();
        wm.add_listener(rec.clone());

        let (fresh, closed) = wm.reset();
        assert_eq!(closed, vec![a, b]);
        assert_eq!(
            rec.seen(),
            vec![
                (WindowEventKind::Closed, a),
                (WindowEventKind::Closed, b),
                (WindowEventKind::Opened, fresh),
            ]
        );
        assert_eq!(wm.current_window(), Some(fresh));
        assert_eq!(wm.top_level_windows(), vec![fresh]);
    }

    #[test]
    fn closed_and_unknown_windows_are_usage_errors() {
        let wm = manager(false);
        let w = wm.open_window(None, "").unwrap();
        wm.close(w).unwrap();

        assert!(matches!(wm.close(w), Err(EngineError::WindowClosed(id)) if id == w));
        assert!(matches!(wm.page(w), Err(EngineError::WindowClosed(_))));
        assert!(matches!(wm.open_frame(w, ""), Err(EngineError::WindowClosed(_))));

        let unknown = WindowId::new();
        assert!(matches!(wm.page(unknown), Err(EngineError::WindowNotFound(_))));
        assert!(wm.set_current_window(unknown).unwrap_err().is_usage_error());
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let wm = manager(true);
        let rec = Arc::new(Recorder::default());
        wm.add_listener(Arc::new(Panicker));
        wm.add_listener(rec.clone());

        let w = wm.open_window(None, "").unwrap();
        assert_eq!(rec.seen(), vec![(WindowEventKind::Opened, w)]);
    }

    #[test]
    fn removed_listener_is_silent() {
        let wm = manager(true);
        let rec = Arc::new(Recorder::default());
        let id = wm.add_listener(rec.clone());
        assert!(wm.remove_listener(id));
        assert!(!wm.remove_listener(id));

        wm.open_window(None, "").unwrap();
        assert!(rec.seen().is_empty());
    }

    #[test]
    fn old_closed_ids_are_forgotten() {
        let wm = manager(true);
        let first = wm.open_window(None, "").unwrap();
        wm.close(first).unwrap();

        let mut last = first;
        for _ in 0..CLOSED_HISTORY {
            last = wm.open_window(None, "").unwrap();
            wm.close(last).unwrap();
        }

        assert!(matches!(wm.page(first), Err(EngineError::WindowNotFound(_))));
        assert!(matches!(wm.page(last), Err(EngineError::WindowClosed(_))));
    }

    #[derive(Default)]
    struct ChangeLog {
        changes: Mutex<Vec<(Arc<Page>, Arc<Page>)>>,
    }

    impl WindowListener for ChangeLog {
        fn on_changed(&self, e: &WindowEvent) {
            if let (Some(old), Some(new)) = (&e.old_page, &e.new_page) {
                self.changes.lock().unwrap().push((old.clone(), new.clone()));
            }
        }
    }

    #[test]
    fn concurrent_navigations_are_reported_in_swap_order() {
        const THREADS: usize = 8;
        const LOADS: usize = 200;

        let wm = Arc::new(manager(true));
        let w = wm.open_window(None, "").unwrap();
        let initial = wm.page(w).unwrap();
        let log = Arc::new(ChangeLog::default());
        wm.add_listener(log.clone());

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                let wm = wm.clone();
                scope.spawn(move || {
                    for _ in 0..LOADS {
                        wm.navigate(w, Arc::new(Page::blank(w))).unwrap();
                    }
                });
            }
        });

        let changes = log.changes.lock().unwrap();
        assert_eq!(changes.len(), THREADS * LOADS);
        assert!(Arc::ptr_eq(&changes[0].0, &initial));
        for pair in changes.windows(2) {
            assert!(Arc::ptr_eq(&pair[0].1, &pair[1].0), "changed events out of swap order");
        }
        assert!(Arc::ptr_eq(&changes[changes.len() - 1].1, &wm.page(w).unwrap()));
    }

    #[test]
    fn listener_calling_back_sees_events_in_order() {
        struct Opener {
            wm: Arc<WindowManager>,
            seen: Mutex<Vec<&'static str>>,
        }
        impl WindowListener for Opener {
            fn on_opened(&self, _e: &WindowEvent) {
                self.seen.lock().unwrap().push("opened");
            }
            fn on_changed(&self, e: &WindowEvent) {
                self.seen.lock().unwrap().push("changed");
                self.wm.open_window(Some(e.window), "popup").unwrap();
                self.seen.lock().unwrap().push("open_window returned");
            }
        }

        let wm = Arc::new(manager(true));
        let w = wm.open_window(None, "").unwrap();
        let opener = Arc::new(Opener {
            wm: wm.clone(),
            seen: Mutex::new(Vec::new()),
        });
        wm.add_listener(opener.clone());

        wm.navigate(w, Arc::new(Page::blank(w))).unwrap();
        // The nested opened event is delivered once the changed handler returns
        assert_eq!(
            *opener.seen.lock().unwrap(),
            vec!["changed", "open_window returned", "opened"]
        );
        assert!(wm.window_by_name("popup").is_some());
    }
}
