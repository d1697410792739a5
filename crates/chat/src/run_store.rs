//! Durable store of [`PlanRunState`] records.
//!
//! Grounded in the gateway's run-tracking pattern: a bounded in-memory ring
//! (`VecDeque` + `HashMap` index keyed by a logical sequence number) backed
//! by a JSONL append log, replayed on startup. The one addition this store
//! needs beyond that pattern is [`PlanRunStore::try_mark_queued`] — an
//! atomic compare-and-set that is the single choke point guaranteeing
//! at-most-one confirmation of a given draft ever wins.

use ap_domain::error::{Error, Result};
use ap_domain::plan::PlanRun;
use ap_domain::run_state::{PlanRunState, RunLifecycleStatus};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_RUNS_IN_MEMORY: usize = 2000;

/// Fields a caller may update on an existing run. `None` leaves the field
/// untouched; unlike [`ap_domain::chat_state::ChatStateUpdate`] these
/// fields have no clear-without-set case since none of them are ever
/// un-set once written.
#[derive(Debug, Clone, Default)]
pub struct PlanRunUpdate {
    pub status: Option<RunLifecycleStatus>,
    pub current_step_path: Option<Option<String>>,
    pub last_event: Option<String>,
    pub plan: Option<PlanRun>,
    pub error: Option<Option<String>>,
}

pub struct PlanRunStore {
    inner: RwLock<RunStoreInner>,
    log_path: PathBuf,
}

struct RunStoreInner {
    runs: VecDeque<PlanRunState>,
    index: HashMap<String, usize>,
    base_seq: usize,
}

impl RunStoreInner {
    fn new(runs: VecDeque<PlanRunState>) -> Self {
        let mut index = HashMap::with_capacity(runs.len());
        for (i, run) in runs.iter().enumerate() {
            index.insert(run.run_id.clone(), i);
        }
        Self { runs, index, base_seq: 0 }
    }

    fn deque_idx(&self, seq: usize) -> usize {
        seq - self.base_seq
    }

    fn get_mut(&mut self, run_id: &str) -> Option<&mut PlanRunState> {
        let seq = *self.index.get(run_id)?;
        let idx = self.deque_idx(seq);
        self.runs.get_mut(idx)
    }

    fn get(&self, run_id: &str) -> Option<&PlanRunState> {
        let seq = *self.index.get(run_id)?;
        let idx = self.deque_idx(seq);
        self.runs.get(idx)
    }

    fn push_back(&mut self, run: PlanRunState) {
        let seq = self.base_seq + self.runs.len();
        self.index.insert(run.run_id.clone(), seq);
        self.runs.push_back(run);
    }

    fn pop_front(&mut self) -> Option<PlanRunState> {
        let run = self.runs.pop_front()?;
        self.index.remove(&run.run_id);
        self.base_seq += 1;
        Some(run)
    }
}

impl PlanRunStore {
    /// Open (or create) the store under `data_dir/runs/runs.jsonl`, loading
    /// the most recent runs into memory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("runs");
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join("runs.jsonl");
        let (runs, total_on_disk) = Self::load_recent(&log_path);
        if total_on_disk > runs.len() {
            tracing::info!(
                kept = runs.len(),
                pruned = total_on_disk - runs.len(),
                "pruning plan run log on disk"
            );
            Self::rewrite_jsonl(&log_path, &runs)?;
        }
        Ok(Self {
            inner: RwLock::new(RunStoreInner::new(runs)),
            log_path,
        })
    }

    fn load_recent(path: &Path) -> (VecDeque<PlanRunState>, usize) {
        let mut runs = VecDeque::new();
        let mut total = 0;
        if let Ok(content) = std::fs::read_to_string(path) {
            let lines: Vec<&str> = content.lines().collect();
            total = lines.len();
            for line in lines.iter().rev().take(MAX_RUNS_IN_MEMORY) {
                if let Ok(run) = serde_json::from_str::<PlanRunState>(line) {
                    runs.push_front(run);
                }
            }
        }
        (runs, total)
    }

    fn rewrite_jsonl(path: &Path, runs: &VecDeque<PlanRunState>) -> Result<()> {
        let tmp = path.with_extension("jsonl.tmp");
        let mut f = std::fs::File::create(&tmp)?;
        for run in runs {
            writeln!(f, "{}", serde_json::to_string(run)?)?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn append(&self, run: &PlanRunState) -> Result<()> {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(run)?)?;
        Ok(())
    }

    /// Create a new draft run and persist it.
    pub fn create(&self, run_id: impl Into<String>, chat_id: impl Into<String>, plan: PlanRun, now_ms: i64) -> Result<PlanRunState> {
        let state = PlanRunState::new(run_id, chat_id, plan, now_ms);
        self.append(&state)?;
        let mut inner = self.inner.write();
        inner.push_back(state.clone());
        if inner.runs.len() > MAX_RUNS_IN_MEMORY {
            inner.pop_front();
        }
        Ok(state)
    }

    pub fn get(&self, run_id: &str) -> Option<PlanRunState> {
        self.inner.read().get(run_id).cloned()
    }

    /// The most recent run for a chat in the given status, if any.
    pub fn get_latest_by(&self, chat_id: &str, status: RunLifecycleStatus) -> Option<PlanRunState> {
        let inner = self.inner.read();
        inner
            .runs
            .iter()
            .rev()
            .find(|r| r.chat_id == chat_id && r.status == status)
            .cloned()
    }

    pub fn list_by_chat(&self, chat_id: &str, limit: usize) -> Vec<PlanRunState> {
        let inner = self.inner.read();
        inner
            .runs
            .iter()
            .rev()
            .filter(|r| r.chat_id == chat_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<PlanRunState> {
        self.inner.read().runs.iter().cloned().collect()
    }

    /// Apply a patch-style update and persist the resulting row. Returns
    /// `false` if `run_id` is unknown.
    pub fn update(&self, run_id: &str, now_ms: i64, patch: PlanRunUpdate) -> Result<bool> {
        let updated = {
            let mut inner = self.inner.write();
            match inner.get_mut(run_id) {
                Some(run) => {
                    if let Some(status) = patch.status {
                        run.status = status;
                    }
                    if let Some(path) = patch.current_step_path {
                        run.current_step_path = path;
                    }
                    if let Some(event) = patch.last_event {
                        run.last_event = Some(event);
                    }
                    if let Some(plan) = patch.plan {
                        run.plan = plan;
                    }
                    if let Some(err) = patch.error {
                        run.error = err;
                    }
                    run.updated_ts = now_ms;
                    Some(run.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(run) => {
                self.append(&run)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Atomic `draft -> queued` compare-and-set. This is the single choke
    /// point that makes double-confirmation safe: two concurrent callers
    /// racing to confirm the same draft can both attempt this, but only
    /// one observes `status == Draft` and wins.
    pub fn try_mark_queued(&self, run_id: &str, now_ms: i64) -> Result<bool> {
        let updated = {
            let mut inner = self.inner.write();
            match inner.get_mut(run_id) {
                Some(run) if run.status == RunLifecycleStatus::Draft => {
                    run.status = RunLifecycleStatus::Queued;
                    run.last_event = Some("confirm_accepted".into());
                    run.updated_ts = now_ms;
                    Some(run.clone())
                }
                _ => None,
            }
        };
        match updated {
            Some(run) => {
                self.append(&run)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Scan all non-terminal runs (`queued`/`running`) and transition them
    /// to `error`, marking them recovered. Used once at process start.
    pub fn recover_interrupted(&self, now_ms: i64) -> Result<Vec<PlanRunState>> {
        let to_recover: Vec<String> = {
            let inner = self.inner.read();
            inner
                .runs
                .iter()
                .filter(|r| r.status.is_active())
                .map(|r| r.run_id.clone())
                .collect()
        };
        let mut recovered = Vec::new();
        for run_id in to_recover {
            self.update(
                &run_id,
                now_ms,
                PlanRunUpdate {
                    status: Some(RunLifecycleStatus::Error),
                    last_event: Some("recovered_after_reload".into()),
                    error: Some(Some("stopped by server restart".into())),
                    ..Default::default()
                },
            )?;
            if let Some(run) = self.get(&run_id) {
                recovered.push(run);
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_domain::plan::{PlanRun, PlanStep};

    fn plan(id: &str) -> PlanRun {
        PlanRun::new(id, "do a thing", vec![PlanStep::note("1", "note")], 1000)
    }

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ap-run-store-test-{}", uuid::Uuid::new_v4()));
        dir
    }

    #[test]
    fn create_then_get_roundtrips() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        let created = store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
        assert_eq!(created.status, RunLifecycleStatus::Draft);
        let fetched = store.get("run-1").unwrap();
        assert_eq!(fetched.chat_id, "chat-1");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn try_mark_queued_succeeds_once() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
        assert!(store.try_mark_queued("run-1", 1001).unwrap());
        assert!(!store.try_mark_queued("run-1", 1002).unwrap());
        assert_eq!(store.get("run-1").unwrap().status, RunLifecycleStatus::Queued);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn try_mark_queued_unknown_run_is_false() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        assert!(!store.try_mark_queued("nope", 1000).unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn update_applies_only_provided_fields() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
        store
            .update(
                "run-1",
                1010,
                PlanRunUpdate {
                    current_step_path: Some(Some("1".into())),
                    last_event: Some("step_ok".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let run = store.get("run-1").unwrap();
        assert_eq!(run.current_step_path.as_deref(), Some("1"));
        assert_eq!(run.last_event.as_deref(), Some("step_ok"));
        assert_eq!(run.status, RunLifecycleStatus::Draft);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn get_latest_by_status_finds_most_recent() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
        store.create("run-2", "chat-1", plan("plan-2"), 1001).unwrap();
        let latest = store.get_latest_by("chat-1", RunLifecycleStatus::Draft).unwrap();
        assert_eq!(latest.run_id, "run-2");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn recover_interrupted_transitions_active_runs_to_error() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
        store.try_mark_queued("run-1", 1001).unwrap();
        let recovered = store.recover_interrupted(2000).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].status, RunLifecycleStatus::Error);
        assert_eq!(recovered[0].last_event.as_deref(), Some("recovered_after_reload"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopening_store_replays_jsonl() {
        let dir = temp_dir();
        {
            let store = PlanRunStore::open(&dir).unwrap();
            store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
            store.try_mark_queued("run-1", 1001).unwrap();
        }
        let reopened = PlanRunStore::open(&dir).unwrap();
        let run = reopened.get("run-1").unwrap();
        assert_eq!(run.status, RunLifecycleStatus::Queued);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn list_by_chat_excludes_other_chats() {
        let dir = temp_dir();
        let store = PlanRunStore::open(&dir).unwrap();
        store.create("run-1", "chat-1", plan("plan-1"), 1000).unwrap();
        store.create("run-2", "chat-2", plan("plan-2"), 1001).unwrap();
        let runs = store.list_by_chat("chat-1", 10);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "run-1");
        std::fs::remove_dir_all(&dir).ok();
    }
}
