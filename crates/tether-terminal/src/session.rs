//! Per-connection session state and the table that owns it.
//!
//! A session is idle, editing, or writing, never two at once. The
//! `SessionManager` maps transport-assigned identifiers to sessions; each
//! entry is only ever locked by the task serving that connection.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_types::error::{Result, TetherError};

use crate::editor::Editor;
use crate::writer::{WriteMode, Writer};

/// Opaque session identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the next input line of a session is fed to.
#[derive(Debug, Default)]
pub enum Mode {
    /// Lines are command lines.
    #[default]
    Idle,
    Editing(Editor),
    Writing(Writer),
}

/// State of one connected client.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    mode: Mode,
    cwd: PathBuf,
    history: VecDeque<String>,
    /// Recall position into `history`; `history.len()` means "past the end".
    cursor: usize,
    max_history: usize,
}

impl Session {
    pub fn new(id: SessionId, cwd: PathBuf, max_history: usize) -> Self {
        Self {
            id,
            mode: Mode::Idle,
            cwd,
            history: VecDeque::new(),
            cursor: 0,
            max_history: max_history.max(1),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn mode_mut(&mut self) -> &mut Mode {
        &mut self.mode
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.mode, Mode::Idle)
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = cwd;
    }

    // -- Transitions --

    /// Idle -> Editing. Loads the file now; a missing file is an empty buffer.
    pub fn begin_edit(&mut self, path: PathBuf) -> Result<&Editor> {
        self.ensure_idle()?;
        self.mode = Mode::Editing(Editor::open(path)?);
        match &self.mode {
            Mode::Editing(editor) => Ok(editor),
            _ => unreachable!("mode was just set to Editing"),
        }
    }

    /// Idle -> Writing. The target file is not read until the flush.
    pub fn begin_write(&mut self, path: PathBuf, mode: WriteMode) -> Result<&Writer> {
        self.ensure_idle()?;
        self.mode = Mode::Writing(Writer::new(path, mode));
        match &self.mode {
            Mode::Writing(writer) => Ok(writer),
            _ => unreachable!("mode was just set to Writing"),
        }
    }

    /// Editing|Writing -> Idle without saving or flushing.
    ///
    /// Returns whether an interactive mode was actually discarded.
    pub fn cancel(&mut self) -> bool {
        match std::mem::take(&mut self.mode) {
            Mode::Idle => false,
            Mode::Editing(editor) => {
                log::debug!("session {} dropped edit of {}", self.id, editor.path().display());
                true
            },
            Mode::Writing(writer) => {
                log::debug!(
                    "session {} dropped {} buffered line(s) for {}",
                    self.id,
                    writer.buffered().len(),
                    writer.path().display()
                );
                true
            },
        }
    }

    /// Editing|Writing -> Idle after the sub-mode finished on its own.
    pub fn finish(&mut self) {
        self.mode = Mode::Idle;
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(TetherError::Session(
                "another interactive mode is already active".to_string(),
            ))
        }
    }

    // -- History --

    /// Append a command line and move the recall cursor past the end.
    pub fn push_history(&mut self, line: &str) {
        self.history.push_back(line.to_string());
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.cursor = self.history.len();
    }

    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    /// Step the recall cursor back and return the entry there.
    pub fn history_prev(&mut self) -> Option<&str> {
        if self.history.is_empty() {
            return None;
        }
        self.cursor = self.cursor.saturating_sub(1);
        self.history.get(self.cursor).map(String::as_str)
    }

    /// Step the recall cursor forward (stopping at the last entry) and
    /// return the entry there.
    pub fn history_next(&mut self) -> Option<&str> {
        if self.history.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1).min(self.history.len() - 1);
        self.history.get(self.cursor).map(String::as_str)
    }
}

/// Shared handle to one session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Lock a session, recovering the state if a previous holder panicked.
pub fn lock_session(handle: &SessionHandle) -> MutexGuard<'_, Session> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of every live session.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
    default_cwd: PathBuf,
    max_history: usize,
}

impl SessionManager {
    /// New sessions start in `default_cwd` with a history bound of `max_history`.
    pub fn new(default_cwd: PathBuf, max_history: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            default_cwd,
            max_history,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh identifier and create its idle session.
    pub fn open(&self) -> (SessionId, SessionHandle) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = self.get_or_create(id);
        (id, handle)
    }

    /// Return the session for `id`, creating it on first use.
    pub fn get_or_create(&self, id: SessionId) -> SessionHandle {
        let mut table = self.table();
        let handle = table.entry(id).or_insert_with(|| {
            log::debug!("session {id} created");
            Arc::new(Mutex::new(Session::new(
                id,
                self.default_cwd.clone(),
                self.max_history,
            )))
        });
        Arc::clone(handle)
    }

    /// Drop a session and everything it holds. Returns whether it existed.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.table().remove(&id).is_some();
        if removed {
            log::debug!("session {id} removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    fn session() -> Session {
        Session::new(SessionId(1), PathBuf::from("/"), 100)
    }

    #[test]
    fn starts_idle() {
        assert!(session().is_idle());
    }

    #[test]
    fn edit_then_cancel_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        s.begin_edit(dir.path().join("f.txt")).unwrap();
        assert!(matches!(s.mode(), Mode::Editing(_)));
        assert!(s.cancel());
        assert!(s.is_idle());
        assert!(!s.cancel());
    }

    #[test]
    fn only_one_interactive_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        s.begin_write(dir.path().join("w.txt"), WriteMode::Overwrite)
            .unwrap();
        let err = s.begin_edit(dir.path().join("e.txt")).unwrap_err();
        assert!(matches!(err, TetherError::Session(_)));
        assert!(matches!(s.mode(), Mode::Writing(_)));
    }

    #[test]
    fn cancelled_write_never_touches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.txt");
        let mut s = session();
        s.begin_write(path.clone(), WriteMode::Overwrite).unwrap();
        if let Mode::Writing(w) = s.mode_mut() {
            w.handle("buffered");
        }
        s.cancel();
        assert!(!path.exists());
    }

    #[test]
    fn failed_edit_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        assert!(s.begin_edit(dir.path().to_path_buf()).is_err());
        assert!(s.is_idle());
    }

    #[test]
    fn history_navigation() {
        let mut s = session();
        assert_eq!(s.history_prev(), None);
        s.push_history("one");
        s.push_history("two");
        s.push_history("three");
        assert_eq!(s.history_prev(), Some("three"));
        assert_eq!(s.history_prev(), Some("two"));
        assert_eq!(s.history_prev(), Some("one"));
        assert_eq!(s.history_prev(), Some("one"));
        assert_eq!(s.history_next(), Some("two"));
        assert_eq!(s.history_next(), Some("three"));
        assert_eq!(s.history_next(), Some("three"));
    }

    #[test]
    fn push_resets_cursor() {
        let mut s = session();
        s.push_history("a");
        s.push_history("b");
        s.history_prev();
        s.history_prev();
        s.push_history("c");
        assert_eq!(s.history_prev(), Some("c"));
    }

    #[test]
    fn history_is_bounded() {
        let mut s = Session::new(SessionId(1), PathBuf::from("/"), 2);
        s.push_history("a");
        s.push_history("b");
        s.push_history("c");
        assert_eq!(s.history(), vec!["b", "c"]);
    }

    #[test]
    fn manager_lifecycle() {
        let mgr = SessionManager::new(PathBuf::from("/"), 10);
        assert!(mgr.is_empty());
        let (a, _) = mgr.open();
        let (b, _) = mgr.open();
        assert_ne!(a, b);
        assert_eq!(mgr.len(), 2);
        assert!(mgr.remove(a));
        assert!(!mgr.remove(a));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mgr = SessionManager::new(PathBuf::from("/"), 10);
        let first = mgr.get_or_create(SessionId(42));
        let second = mgr.get_or_create(SessionId(42));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn concurrent_editors_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let file_a = dir.path().join("a.txt");
        let file_b = dir.path().join("b.txt");
        fs::write(&file_a, "alpha\n").unwrap();
        fs::write(&file_b, "beta\n").unwrap();

        let mgr = Arc::new(SessionManager::new(dir.path().to_path_buf(), 10));
        let workers: Vec<_> = [(file_a, "from-a"), (file_b, "from-b")]
            .into_iter()
            .map(|(file, text)| {
                let mgr = Arc::clone(&mgr);
                thread::spawn(move || {
                    let (_, handle) = mgr.open();
                    let mut s = lock_session(&handle);
                    s.begin_edit(file).unwrap();
                    for i in 0..50 {
                        if let Mode::Editing(ed) = s.mode_mut() {
                            ed.handle(&format!(":i 1 {text}-{i}"));
                        }
                    }
                    match s.mode() {
                        Mode::Editing(ed) => ed.lines().to_vec(),
                        _ => unreachable!(),
                    }
                })
            })
            .collect();

        let results: Vec<Vec<String>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(results[0].len(), 51);
        assert_eq!(results[1].len(), 51);
        assert!(results[0].iter().all(|l| l == "alpha" || l.starts_with("from-a")));
        assert!(results[1].iter().all(|l| l == "beta" || l.starts_with("from-b")));
    }
}
