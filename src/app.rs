//! Application core
//!
//! [`Core`] owns the view selector, the live discovery session and the task
//! store behind one lock, and routes every user action to them. Observers can
//! subscribe to a broadcast of [`Update`]s.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::dialogue::{DialogueError, DialogueSession, SessionToken};
use crate::models::{Task, TaskId, View, CATALOG_CONTEXT};
use crate::script::{CannedBreakdown, Decomposer, DialogueScript, ScriptedDialogue, Turn};
use crate::store::{FileSlot, StoreError, TaskStore};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Dialogue(#[from] DialogueError),
    #[error("No async runtime is available to schedule the reply")]
    NoRuntime,
}

/// Notification sent to subscribers after a state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Changed,
    /// A task was just created; presentation layers may celebrate it
    Celebrate(TaskId),
}

/// Everything a presentation layer needs to render the current screen
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub view: View,
    pub session: Option<DialogueSession>,
    pub tasks: Vec<Task>,
    pub needs_flush: bool,
}

struct AppState {
    view: View,
    session: Option<DialogueSession>,
    store: TaskStore,
    next_token: u64,
}

impl AppState {
    /// Ends the session and switches to the dashboard
    fn finish_discovery(&mut self) {
        self.session = None;
        self.view = View::Dashboard;
    }

    fn session_mut(&mut self) -> Result<&mut DialogueSession, DialogueError> {
        self.session.as_mut().ok_or(DialogueError::NoSession)
    }

    fn session(&self) -> Result<&DialogueSession, DialogueError> {
        self.session.as_ref().ok_or(DialogueError::NoSession)
    }
}

/// A reply that is being computed for a discovery answer
pub struct PendingReply {
    token: SessionToken,
    handle: JoinHandle<bool>,
}

impl PendingReply {
    /// The session the reply belongs to
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Waits for the reply; true if it was applied to a live session
    pub async fn wait(self) -> bool {
        self.handle.await.unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct Core {
    inner: Arc<Mutex<AppState>>,
    update_tx: Arc<broadcast::Sender<Update>>,
    script: Arc<dyn DialogueScript>,
    decomposer: Arc<dyn Decomposer>,
    thinking_latency: Duration,
}

impl Core {
    /// Creates a core around `store` using the built-in script and breakdown
    pub fn new(store: TaskStore) -> Self {
        Self::with_strategies(store, Arc::new(ScriptedDialogue), Arc::new(CannedBreakdown))
    }

    pub fn with_strategies(
        store: TaskStore,
        script: Arc<dyn DialogueScript>,
        decomposer: Arc<dyn Decomposer>,
    ) -> Self {
        // Create a broadcast channel with capacity for 100 messages
        let (tx, _rx) = broadcast::channel(100);

        Self {
            inner: Arc::new(Mutex::new(AppState {
                view: View::default(),
                session: None,
                store,
                next_token: 0,
            })),
            update_tx: Arc::new(tx),
            script,
            decomposer,
            thinking_latency: Duration::from_millis(crate::config::DEFAULT_THINKING_MS),
        }
    }

    /// Opens the file slot named by `config` and builds a core around it
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let store = TaskStore::open(FileSlot::new(&config.data_file))?;
        Ok(Self::new(store).with_thinking_latency(config.thinking_latency))
    }

    pub fn with_thinking_latency(mut self, latency: Duration) -> Self {
        self.thinking_latency = latency;
        self
    }

    // Helper method to safely access state and notify observers about state changes
    fn with_state<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AppState) -> R,
    {
        let result = f(&mut *self.lock());

        // Notify observers about state changes
        self.notify(Update::Changed);

        result
    }

    /// Like `with_state`, but observers only hear about operations that succeeded
    fn try_with_state<F, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut AppState) -> Result<R, E>,
    {
        let result = f(&mut *self.lock());
        if result.is_ok() {
            self.notify(Update::Changed);
        }
        result
    }

    fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        f(&*self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, update: Update) {
        let _ = self.update_tx.send(update);
    }

    // Subscribe to state updates
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.update_tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read(|state| Snapshot {
            view: state.view,
            session: state.session.clone(),
            tasks: state.store.tasks().to_vec(),
            needs_flush: state.store.needs_flush(),
        })
    }

    pub fn view(&self) -> View {
        self.read(|state| state.view)
    }

    pub fn session(&self) -> Option<DialogueSession> {
        self.read(|state| state.session.clone())
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.read(|state| state.store.tasks().to_vec())
    }

    // View routing

    /// Goes straight from the entry screen to the dashboard
    pub fn enter_dashboard(&self) {
        self.with_state(|state| {
            state.session = None;
            state.view = View::Dashboard;
        });
    }

    /// Returns to the entry screen
    pub fn show_entry(&self) {
        self.with_state(|state| {
            state.session = None;
            state.view = View::Entry;
        });
    }

    /// Starts a new discovery session, discarding any previous one
    pub fn start_discovery(&self) -> DialogueSession {
        let opening = self.script.opening();
        self.with_state(|state| {
            state.next_token += 1;
            let session = DialogueSession::start(SessionToken::new(state.next_token), opening);
            state.session = Some(session.clone());
            state.view = View::Discovery;
            session
        })
    }

    /// Aborts the discovery session and returns to the entry screen.
    ///
    /// A reply still pending for the aborted session is dropped when it lands.
    pub fn close_discovery(&self) {
        self.with_state(|state| {
            if let Some(session) = state.session.take() {
                debug!(token = session.token().value(), "discovery session closed");
            }
            state.view = View::Entry;
        });
    }

    // Dialogue

    /// Records an answer and schedules the reply after the thinking delay.
    ///
    /// The reply runs on the current tokio runtime. Without one the answer is
    /// rejected with [`CoreError::NoRuntime`] and the session is left as it was.
    pub fn select_option(&self, option_text: &str) -> Result<PendingReply, CoreError> {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        let request = self
            .try_with_state(|state| state.session_mut().and_then(|s| s.begin_reply(option_text)))?;

        let core = self.clone();
        let token = request.token;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(core.thinking_latency).await;
            let turn = core.script.next_turn(request.step, &request.input).await;
            core.deliver_reply(request.token, turn)
        });

        Ok(PendingReply { token, handle })
    }

    fn deliver_reply(&self, token: SessionToken, turn: Turn) -> bool {
        let applied = self.lock_mut(|state| match state.session.as_mut() {
            Some(session) => session.apply_reply(token, turn),
            None => {
                debug!(token = token.value(), "dropping reply for closed session");
                false
            }
        });
        if applied {
            self.notify(Update::Changed);
        }
        applied
    }

    fn lock_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AppState) -> R,
    {
        f(&mut *self.lock())
    }

    /// Accepts the terminal action: creates its task and opens the dashboard
    pub fn take_action(&self) -> Result<Task, CoreError> {
        let task = self.try_with_state(|state| -> Result<Task, CoreError> {
            let action = state.session()?.require_action()?;
            let task = state
                .store
                .create_task(&action.task_title, Some(&action.context))?;
            state.finish_discovery();
            Ok(task)
        })?;

        info!(task_id = %task.id(), "task created from discovery");
        self.notify(Update::Celebrate(task.id().clone()));
        Ok(task)
    }

    /// Shortcut from the discovery screen: creates the catalog case's task
    pub fn pick_catalog(&self, case_id: u32) -> Result<Task, CoreError> {
        let task = self.try_with_state(|state| -> Result<Task, CoreError> {
            let case = state.session()?.pick_catalog(case_id)?;
            let task = state.store.create_task(&case.title, Some(CATALOG_CONTEXT))?;
            state.finish_discovery();
            Ok(task)
        })?;

        info!(task_id = %task.id(), case_id, "task created from catalog");
        self.notify(Update::Celebrate(task.id().clone()));
        Ok(task)
    }

    // Tasks

    pub fn create_task(&self, title: &str, context: Option<&str>) -> Result<Task, CoreError> {
        let task = self.try_with_state(|state| state.store.create_task(title, context))?;
        self.notify(Update::Celebrate(task.id().clone()));
        Ok(task)
    }

    pub fn quick_add(&self, title: &str) -> Result<Task, CoreError> {
        let task = self.try_with_state(|state| state.store.quick_add(title))?;
        self.notify(Update::Celebrate(task.id().clone()));
        Ok(task)
    }

    pub fn toggle_complete(&self, id: &TaskId) -> Result<Task, CoreError> {
        Ok(self.try_with_state(|state| state.store.toggle_complete(id))?)
    }

    pub fn delete_task(&self, id: &TaskId) -> Result<Task, CoreError> {
        Ok(self.try_with_state(|state| state.store.delete_task(id))?)
    }

    /// Breaks a task down into subtasks.
    ///
    /// Completed tasks and tasks that already have subtasks are returned
    /// unchanged without consulting the decomposer.
    pub async fn breakdown(&self, id: &TaskId) -> Result<Task, CoreError> {
        let task = self
            .read(|state| state.store.get(id).cloned())
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !task.can_breakdown() {
            return Ok(task);
        }

        let subtasks = self.decomposer.decompose(&task).await;
        Ok(self.try_with_state(|state| state.store.breakdown(id, subtasks))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{canned_breakdown, DISCOVERY_CONTEXT, SEED_TASK_ID};
    use crate::store::MemorySlot;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    const FAST: Duration = Duration::from_millis(5);

    fn new_core() -> Core {
        let store = TaskStore::open(MemorySlot::new()).unwrap();
        Core::new(store).with_thinking_latency(FAST)
    }

    fn option_labels(core: &Core) -> Vec<String> {
        core.session()
            .unwrap()
            .options()
            .iter()
            .map(|o| o.label().to_string())
            .collect()
    }

    async fn answer_first(core: &Core) {
        let first = option_labels(core)[0].clone();
        assert!(core.select_option(&first).unwrap().wait().await);
    }

    #[test]
    fn test_initial_view_is_entry() {
        let core = new_core();

        assert_eq!(core.view(), View::Entry);
        assert!(core.session().is_none());
        assert_eq!(core.tasks().len(), 1);
    }

    #[test]
    fn test_enter_dashboard_and_back() {
        let core = new_core();

        core.enter_dashboard();
        assert_eq!(core.view(), View::Dashboard);
        core.show_entry();
        assert_eq!(core.view(), View::Entry);
    }

    #[tokio::test]
    async fn test_select_option_advances_step() {
        let core = new_core();
        core.start_discovery();

        let pending = core.select_option("感觉有些焦虑，事情太多").unwrap();
        let session = core.session().unwrap();
        assert!(session.is_thinking());
        assert!(session.options().is_empty());

        assert!(pending.wait().await);
        let session = core.session().unwrap();
        assert_eq!(session.step(), 1);
        assert!(!session.is_thinking());
        assert_eq!(option_labels(&core), vec!["工作项目", "个人成长", "两者都有关联"]);
    }

    #[tokio::test]
    async fn test_restart_resets_session() {
        let core = new_core();
        let first = core.start_discovery();
        answer_first(&core).await;

        let second = core.start_discovery();

        assert_ne!(first.token(), second.token());
        assert_eq!(second.step(), 0);
        assert_eq!(second.messages().len(), 1);
        assert_eq!(second.options().len(), 3);
    }

    #[tokio::test]
    async fn test_close_suppresses_pending_reply() {
        let core = new_core();
        core.start_discovery();
        let pending = core.select_option("只是想找点灵感").unwrap();

        core.close_discovery();

        assert!(!pending.wait().await);
        assert!(core.session().is_none());
        assert_eq!(core.view(), View::Entry);
    }

    #[tokio::test]
    async fn test_restart_suppresses_pending_reply() {
        let core = new_core();
        core.start_discovery();
        let pending = core.select_option("只是想找点灵感").unwrap();

        let fresh = core.start_discovery();

        assert!(!pending.wait().await);
        let session = core.session().unwrap();
        assert_eq!(session.token(), fresh.token());
        assert_eq!(session.step(), 0);
        assert_eq!(session.messages().len(), 1);
        assert!(!session.is_thinking());
    }

    #[tokio::test]
    async fn test_full_discovery_creates_task() {
        let core = new_core();
        core.start_discovery();
        for _ in 0..3 {
            answer_first(&core).await;
        }

        let task = core.take_action().unwrap();

        assert_eq!(task.title(), "梳理项目启动清单");
        assert_eq!(task.context(), Some(DISCOVERY_CONTEXT));
        assert!(!task.is_completed());
        assert_eq!(core.tasks()[0], task);
        assert_eq!(core.view(), View::Dashboard);
        assert!(core.session().is_none());
    }

    #[tokio::test]
    async fn test_take_action_too_early() {
        let core = new_core();
        core.start_discovery();

        let result = core.take_action();

        assert!(matches!(
            result,
            Err(CoreError::Dialogue(DialogueError::NoAction))
        ));
        assert_eq!(core.tasks().len(), 1);
        assert_eq!(core.view(), View::Discovery);
    }

    #[tokio::test]
    async fn test_select_without_session() {
        let core = new_core();

        assert!(matches!(
            core.select_option("工作项目"),
            Err(CoreError::Dialogue(DialogueError::NoSession))
        ));
    }

    #[tokio::test]
    async fn test_pick_catalog() {
        let core = new_core();
        core.start_discovery();
        answer_first(&core).await;

        let task = core.pick_catalog(3).unwrap();

        assert_eq!(task.title(), "周五复盘模板");
        assert_eq!(task.context(), Some(CATALOG_CONTEXT));
        assert_eq!(core.view(), View::Dashboard);
    }

    #[tokio::test]
    async fn test_catalog_closed_at_final_step() {
        let core = new_core();
        core.start_discovery();
        answer_first(&core).await;
        answer_first(&core).await;

        assert!(matches!(
            core.pick_catalog(1),
            Err(CoreError::Dialogue(DialogueError::CatalogUnavailable))
        ));
    }

    #[tokio::test]
    async fn test_creation_broadcasts_celebration() {
        let core = new_core();
        let mut rx = core.subscribe();

        let task = core.quick_add("Stretch").unwrap();

        assert_eq!(rx.recv().await.unwrap(), Update::Changed);
        assert_eq!(rx.recv().await.unwrap(), Update::Celebrate(task.id().clone()));
    }

    #[tokio::test]
    async fn test_rejected_operations_do_not_broadcast() {
        let core = new_core();
        let mut rx = core.subscribe();

        assert!(core.quick_add("   ").is_err());
        assert!(core.toggle_complete(&TaskId::new("nope")).is_err());
        assert!(core.delete_task(&TaskId::new("nope")).is_err());
        assert!(core.select_option("工作项目").is_err());
        assert!(core.take_action().is_err());

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        core.toggle_complete(&TaskId::new(SEED_TASK_ID)).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Update::Changed);
    }

    #[test]
    fn test_select_option_without_runtime_leaves_session_untouched() {
        let core = new_core();
        core.start_discovery();
        let before = option_labels(&core);

        let result = core.select_option(&before[0]);

        assert!(matches!(result, Err(CoreError::NoRuntime)));
        let session = core.session().unwrap();
        assert!(!session.is_thinking());
        assert_eq!(session.step(), 0);
        assert_eq!(option_labels(&core), before);
    }

    #[tokio::test]
    async fn test_breakdown_through_core() {
        let core = new_core();
        let id = TaskId::new(SEED_TASK_ID);

        let task = core.breakdown(&id).await.unwrap();
        assert_eq!(task.subtasks(), Some(canned_breakdown().as_slice()));

        let again = core.breakdown(&id).await.unwrap();
        assert_eq!(again, task);

        let missing = core.breakdown(&TaskId::new("nope")).await;
        assert!(matches!(
            missing,
            Err(CoreError::Store(StoreError::NotFound(_)))
        ));
    }
}
