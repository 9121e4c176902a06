//! Broker-backed task queue with named lanes and state buckets.
//!
//! Every lane holds six buckets: `pending` (FIFO), `active`, `scheduled`,
//! `retry`, `archived` and `completed`. Backends move task ids between buckets
//! atomically; [`JobQueue`] layers submission, inspection and the retry
//! bookkeeping on top.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::task::{
    wrong_state, EnqueueOptions, Payload, TaskError, TaskId, TaskInfo, TaskState,
    DEFAULT_MAX_RETRY, DEFAULT_QUEUE, DEFAULT_RETENTION,
};
use crate::error::{Result, VaultError};
use crate::telemetry::QueueDepthGauge;

// ═══════════════════════════════════════════════════════════════════════════════
// Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Point-in-time counts for one lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub queue: String,
    pub pending: usize,
    pub active: usize,
    pub scheduled: usize,
    pub retry: usize,
    pub archived: usize,
    pub completed: usize,
    pub paused: bool,
}

impl QueueInfo {
    /// Tasks still owned by the lane, completed ones excluded.
    pub fn size(&self) -> usize {
        self.pending + self.active + self.scheduled + self.retry + self.archived
    }
}

/// Aggregate counts across every lane, recomputed on each call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queues: Vec<QueueInfo>,
    pub pending: usize,
    pub active: usize,
    pub scheduled: usize,
    pub retry: usize,
    pub archived: usize,
    pub completed: usize,
}

impl QueueStats {
    pub fn from_queues(queues: Vec<QueueInfo>) -> Self {
        let mut stats = Self::default();
        for q in &queues {
            stats.pending += q.pending;
            stats.active += q.active;
            stats.scheduled += q.scheduled;
            stats.retry += q.retry;
            stats.archived += q.archived;
            stats.completed += q.completed;
        }
        stats.queues = queues;
        stats
    }
}

/// Outcome of a guarded bucket move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Done,
    Missing,
    WrongState(TaskState),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage primitives for the queue.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Reachability check.
    async fn ping(&self) -> Result<()>;

    /// Every lane that has ever received a task.
    async fn queue_names(&self) -> Result<Vec<String>>;

    /// Store a new task in the bucket named by `task.state`
    /// (`pending` or `scheduled`). `unique` is a dedup key and its TTL.
    async fn enqueue(&self, task: &TaskInfo, unique: Option<(&str, Duration)>) -> Result<()>;

    /// Move the oldest pending task of a lane to `active`. Paused lanes yield nothing.
    async fn dequeue(&self, queue: &str) -> Result<Option<TaskInfo>>;

    /// Move an active task to the bucket named by `task.state`
    /// (`completed`, `retry` or `archived`), storing the updated record.
    /// Returns false when the task was no longer active.
    async fn finish(&self, task: &TaskInfo) -> Result<bool>;

    /// All tasks of one lane in one bucket.
    async fn list(&self, queue: &str, state: TaskState) -> Result<Vec<TaskInfo>>;

    async fn get(&self, queue: &str, id: &TaskId) -> Result<Option<TaskInfo>>;

    /// Delete a task if it sits in one of `allowed`.
    async fn delete(&self, queue: &str, id: &TaskId, allowed: &[TaskState]) -> Result<Transition>;

    /// Move a task to `pending` if it sits in one of `allowed`.
    async fn run_now(&self, queue: &str, id: &TaskId, allowed: &[TaskState]) -> Result<Transition>;

    /// Promote scheduled and retry tasks due at `now` to `pending`.
    async fn forward(&self, queue: &str, now: DateTime<Utc>) -> Result<usize>;

    /// Delete completed tasks whose retention ended before `now`.
    async fn sweep_completed(&self, queue: &str, now: DateTime<Utc>) -> Result<usize>;

    async fn counts(&self, queue: &str) -> Result<QueueInfo>;

    async fn pause(&self, queue: &str) -> Result<()>;

    async fn resume(&self, queue: &str) -> Result<()>;

    /// Remove the lane and every task in it. Returns the number of tasks removed.
    async fn drop_queue(&self, queue: &str) -> Result<usize>;
}

/// Sort key inside the time-ordered buckets.
fn bucket_score(task: &TaskInfo) -> DateTime<Utc> {
    match task.state {
        TaskState::Scheduled | TaskState::Retry => task.next_run_at.unwrap_or(task.enqueued_at),
        TaskState::Archived => task.last_failed_at.unwrap_or(task.enqueued_at),
        TaskState::Completed => {
            let done = task.completed_at.unwrap_or(task.enqueued_at);
            chrono::Duration::from_std(task.retention)
                .ok()
                .and_then(|r| done.checked_add_signed(r))
                .unwrap_or(done)
        }
        TaskState::Pending | TaskState::Active => task.enqueued_at,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MemoryLane {
    tasks: HashMap<TaskId, TaskInfo>,
    pending: VecDeque<TaskId>,
    paused: bool,
}

impl MemoryLane {
    fn remove_from_bucket(&mut self, id: &TaskId) -> Option<TaskInfo> {
        let task = self.tasks.remove(id)?;
        if task.state == TaskState::Pending {
            self.pending.retain(|p| p != id);
        }
        Some(task)
    }

    fn in_state(&self, state: TaskState) -> Vec<TaskInfo> {
        if state == TaskState::Pending {
            return self
                .pending
                .iter()
                .filter_map(|id| self.tasks.get(id).cloned())
                .collect();
        }
        let mut tasks: Vec<TaskInfo> = self
            .tasks
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect();
        tasks.sort_by_key(bucket_score);
        tasks
    }

    fn count(&self, state: TaskState) -> usize {
        self.tasks.values().filter(|t| t.state == state).count()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    lanes: BTreeMap<String, MemoryLane>,
    unique: HashMap<String, DateTime<Utc>>,
}

/// In-memory queue backend for tests and single-process development.
#[derive(Debug, Default)]
pub struct InMemoryQueueBackend {
    state: Mutex<MemoryState>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn queue_names(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().lanes.keys().cloned().collect())
    }

    async fn enqueue(&self, task: &TaskInfo, unique: Option<(&str, Duration)>) -> Result<()> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let exists = state
            .lanes
            .get(&task.queue)
            .map_or(false, |lane| lane.tasks.contains_key(&task.id));
        if exists {
            return Err(VaultError::task_already_exists(task.id.to_string()));
        }

        if let Some((key, ttl)) = unique {
            if let Some(expires) = state.unique.get(key) {
                if *expires > now {
                    return Err(VaultError::task_already_exists(key)
                        .with_context("unique_key", key));
                }
            }
            let expires = chrono::Duration::from_std(ttl)
                .map(|ttl| now + ttl)
                .unwrap_or(now);
            state.unique.insert(key.to_string(), expires);
        }

        let lane = state.lanes.entry(task.queue.clone()).or_default();
        if task.state == TaskState::Pending {
            lane.pending.push_back(task.id);
        }
        lane.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<TaskInfo>> {
        let mut state = self.state.lock();
        let Some(lane) = state.lanes.get_mut(queue) else {
            return Ok(None);
        };
        if lane.paused {
            return Ok(None);
        }
        while let Some(id) = lane.pending.pop_front() {
            if let Some(task) = lane.tasks.get_mut(&id) {
                task.state = TaskState::Active;
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn finish(&self, task: &TaskInfo) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(lane) = state.lanes.get_mut(&task.queue) else {
            return Ok(false);
        };
        match lane.tasks.get_mut(&task.id) {
            Some(current) if current.state == TaskState::Active => {
                *current = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, queue: &str, state: TaskState) -> Result<Vec<TaskInfo>> {
        Ok(self
            .state
            .lock()
            .lanes
            .get(queue)
            .map(|lane| lane.in_state(state))
            .unwrap_or_default())
    }

    async fn get(&self, queue: &str, id: &TaskId) -> Result<Option<TaskInfo>> {
        Ok(self
            .state
            .lock()
            .lanes
            .get(queue)
            .and_then(|lane| lane.tasks.get(id).cloned()))
    }

    async fn delete(&self, queue: &str, id: &TaskId, allowed: &[TaskState]) -> Result<Transition> {
        let mut state = self.state.lock();
        let Some(lane) = state.lanes.get_mut(queue) else {
            return Ok(Transition::Missing);
        };
        let Some(current) = lane.tasks.get(id).map(|t| t.state) else {
            return Ok(Transition::Missing);
        };
        if !allowed.contains(&current) {
            return Ok(Transition::WrongState(current));
        }
        lane.remove_from_bucket(id);
        Ok(Transition::Done)
    }

    async fn run_now(&self, queue: &str, id: &TaskId, allowed: &[TaskState]) -> Result<Transition> {
        let mut state = self.state.lock();
        let Some(lane) = state.lanes.get_mut(queue) else {
            return Ok(Transition::Missing);
        };
        let Some(task) = lane.tasks.get_mut(id) else {
            return Ok(Transition::Missing);
        };
        if !allowed.contains(&task.state) {
            return Ok(Transition::WrongState(task.state));
        }
        task.state = TaskState::Pending;
        task.next_run_at = None;
        lane.pending.push_back(*id);
        Ok(Transition::Done)
    }

    async fn forward(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock();
        let Some(lane) = state.lanes.get_mut(queue) else {
            return Ok(0);
        };
        let mut due: Vec<(DateTime<Utc>, TaskId)> = lane
            .tasks
            .values()
            .filter(|t| matches!(t.state, TaskState::Scheduled | TaskState::Retry))
            .filter(|t| t.next_run_at.map_or(true, |at| at <= now))
            .map(|t| (bucket_score(t), t.id))
            .collect();
        due.sort();

        for (_, id) in &due {
            if let Some(task) = lane.tasks.get_mut(id) {
                task.state = TaskState::Pending;
                lane.pending.push_back(*id);
            }
        }
        Ok(due.len())
    }

    async fn sweep_completed(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock();
        let Some(lane) = state.lanes.get_mut(queue) else {
            return Ok(0);
        };
        let before = lane.tasks.len();
        lane.tasks
            .retain(|_, t| t.state != TaskState::Completed || bucket_score(t) > now);
        Ok(before - lane.tasks.len())
    }

    async fn counts(&self, queue: &str) -> Result<QueueInfo> {
        let state = self.state.lock();
        let Some(lane) = state.lanes.get(queue) else {
            return Err(VaultError::queue_not_found(queue));
        };
        Ok(QueueInfo {
            queue: queue.to_string(),
            pending: lane.pending.len(),
            active: lane.count(TaskState::Active),
            scheduled: lane.count(TaskState::Scheduled),
            retry: lane.count(TaskState::Retry),
            archived: lane.count(TaskState::Archived),
            completed: lane.count(TaskState::Completed),
            paused: lane.paused,
        })
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        self.state.lock().lanes.entry(queue.to_string()).or_default().paused = true;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        match self.state.lock().lanes.get_mut(queue) {
            Some(lane) => {
                lane.paused = false;
                Ok(())
            }
            None => Err(VaultError::queue_not_found(queue)),
        }
    }

    async fn drop_queue(&self, queue: &str) -> Result<usize> {
        match self.state.lock().lanes.remove(queue) {
            Some(lane) => Ok(lane.tasks.len()),
            None => Err(VaultError::queue_not_found(queue)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

// Bucket KEYS order shared by the move scripts:
// pending, active, scheduled, retry, archived, completed.
const BUCKET_LOOKUP: &str = r#"
local buckets = { pending = 2, active = 3, scheduled = 4, retry = 5, archived = 6, completed = 7 }
local function remove_from(state, id)
  local idx = buckets[state]
  if state == 'pending' or state == 'active' then
    redis.call('LREM', KEYS[idx], 0, id)
  else
    redis.call('ZREM', KEYS[idx], id)
  end
end
local function allowed(state, csv)
  return string.find(',' .. csv .. ',', ',' .. state .. ',', 1, true) ~= nil
end
"#;

// KEYS: task, bucket, queues, unique
// ARGV: msg, state, id, score ('' for the pending list), queue, unique ttl ('' for none)
const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
if ARGV[6] ~= '' then
  if not redis.call('SET', KEYS[4], ARGV[3], 'NX', 'EX', ARGV[6]) then return -1 end
end
redis.call('HSET', KEYS[1], 'msg', ARGV[1], 'state', ARGV[2])
if ARGV[4] == '' then
  redis.call('RPUSH', KEYS[2], ARGV[3])
else
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[3])
end
redis.call('SADD', KEYS[3], ARGV[5])
return 1
"#;

// KEYS: paused, pending, active
// ARGV: queue, task key prefix
const DEQUEUE_SCRIPT: &str = r#"
if redis.call('SISMEMBER', KEYS[1], ARGV[1]) == 1 then return nil end
local id = redis.call('LPOP', KEYS[2])
if not id then return nil end
redis.call('RPUSH', KEYS[3], id)
local key = ARGV[2] .. id
redis.call('HSET', key, 'state', 'active')
return { id, redis.call('HGET', key, 'msg') }
"#;

// KEYS: task, active, destination
// ARGV: id, msg, state, score
const FINISH_SCRIPT: &str = r#"
if redis.call('LREM', KEYS[2], 0, ARGV[1]) == 0 then return 0 end
redis.call('HSET', KEYS[1], 'msg', ARGV[2], 'state', ARGV[3])
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[1])
return 1
"#;

// KEYS: task, pending, active, scheduled, retry, archived, completed
// ARGV: id, allowed states csv, mode ('delete' or 'run')
const MOVE_SCRIPT_BODY: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return 'missing' end
if not allowed(state, ARGV[2]) then return state end
remove_from(state, ARGV[1])
if ARGV[3] == 'delete' then
  redis.call('DEL', KEYS[1])
else
  redis.call('RPUSH', KEYS[2], ARGV[1])
  redis.call('HSET', KEYS[1], 'state', 'pending')
end
return 'ok'
"#;

// KEYS: source zset, pending
// ARGV: now (ms), task key prefix
const FORWARD_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('RPUSH', KEYS[2], id)
  redis.call('HSET', ARGV[2] .. id, 'state', 'pending')
end
return #ids
"#;

// KEYS: completed zset
// ARGV: now (ms), task key prefix
const SWEEP_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('DEL', ARGV[2] .. id)
end
return #ids
"#;

struct Scripts {
    enqueue: redis::Script,
    dequeue: redis::Script,
    finish: redis::Script,
    transition: redis::Script,
    forward: redis::Script,
    sweep: redis::Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: redis::Script::new(ENQUEUE_SCRIPT),
            dequeue: redis::Script::new(DEQUEUE_SCRIPT),
            finish: redis::Script::new(FINISH_SCRIPT),
            transition: redis::Script::new(&format!("{}{}", BUCKET_LOOKUP, MOVE_SCRIPT_BODY)),
            forward: redis::Script::new(FORWARD_SCRIPT),
            sweep: redis::Script::new(SWEEP_SCRIPT),
        }
    }
}

/// Redis-backed queue backend sharing one multiplexed connection.
pub struct RedisQueueBackend {
    conn: redis::aio::MultiplexedConnection,
    prefix: String,
    scripts: Scripts,
}

impl RedisQueueBackend {
    /// Connect to Redis and build the backend.
    ///
    /// # Arguments
    /// * `url` - Redis URL, e.g. `redis://localhost:6379`
    /// * `prefix` - Prefix for every key (e.g. `"dbvault"`)
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
            scripts: Scripts::load(),
        })
    }

    fn queues_key(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    fn paused_key(&self) -> String {
        format!("{}:paused", self.prefix)
    }

    fn task_prefix(&self, queue: &str) -> String {
        format!("{}:{{{}}}:t:", self.prefix, queue)
    }

    fn task_key(&self, queue: &str, id: &TaskId) -> String {
        format!("{}{}", self.task_prefix(queue), id)
    }

    fn bucket_key(&self, queue: &str, state: TaskState) -> String {
        format!("{}:{{{}}}:{}", self.prefix, queue, state.as_str())
    }

    fn unique_key(&self, key: &str) -> String {
        format!("{}:unique:{}", self.prefix, key)
    }

    fn decode(msg: Option<String>, state: Option<String>) -> Result<Option<TaskInfo>> {
        let (Some(msg), Some(state)) = (msg, state) else {
            return Ok(None);
        };
        let mut task: TaskInfo = serde_json::from_str(&msg)?;
        task.state = state.parse()?;
        Ok(Some(task))
    }

    async fn transition(
        &self,
        queue: &str,
        id: &TaskId,
        allowed: &[TaskState],
        mode: &str,
    ) -> Result<Transition> {
        let mut conn = self.conn.clone();
        let csv = allowed
            .iter()
            .map(TaskState::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut invocation = self.scripts.transition.prepare_invoke();
        invocation.key(self.task_key(queue, id));
        for state in TaskState::ALL {
            invocation.key(self.bucket_key(queue, state));
        }
        invocation.arg(id.to_string()).arg(csv).arg(mode);
        let reply: String = invocation.invoke_async(&mut conn).await?;

        Ok(match reply.as_str() {
            "ok" => Transition::Done,
            "missing" => Transition::Missing,
            other => Transition::WrongState(other.parse()?),
        })
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn queue_names(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.queues_key())
            .query_async(&mut conn)
            .await?;
        names.sort();
        Ok(names)
    }

    async fn enqueue(&self, task: &TaskInfo, unique: Option<(&str, Duration)>) -> Result<()> {
        let _span = tracing::debug_span!("redis_enqueue", queue = %task.queue, task_id = %task.id);
        let mut conn = self.conn.clone();
        let msg = serde_json::to_string(task)?;
        let score = match task.state {
            TaskState::Pending => String::new(),
            _ => bucket_score(task).timestamp_millis().to_string(),
        };
        let (unique_key, ttl) = match unique {
            Some((key, ttl)) => (self.unique_key(key), ttl.as_secs().max(1).to_string()),
            None => (self.unique_key("-"), String::new()),
        };

        let mut invocation = self.scripts.enqueue.prepare_invoke();
        invocation
            .key(self.task_key(&task.queue, &task.id))
            .key(self.bucket_key(&task.queue, task.state))
            .key(self.queues_key())
            .key(&unique_key)
            .arg(msg)
            .arg(task.state.as_str())
            .arg(task.id.to_string())
            .arg(score)
            .arg(&task.queue)
            .arg(ttl);
        let reply: i64 = invocation.invoke_async(&mut conn).await?;

        match reply {
            1 => Ok(()),
            0 => Err(VaultError::task_already_exists(task.id.to_string())),
            _ => Err(VaultError::task_already_exists(&unique_key)
                .with_context("unique_key", &unique_key)),
        }
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<TaskInfo>> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.dequeue.prepare_invoke();
        invocation
            .key(self.paused_key())
            .key(self.bucket_key(queue, TaskState::Pending))
            .key(self.bucket_key(queue, TaskState::Active))
            .arg(queue)
            .arg(self.task_prefix(queue));
        let reply: Option<(String, Option<String>)> = invocation.invoke_async(&mut conn).await?;

        match reply {
            Some((_id, msg)) => Self::decode(msg, Some(TaskState::Active.as_str().to_string())),
            None => Ok(None),
        }
    }

    async fn finish(&self, task: &TaskInfo) -> Result<bool> {
        let mut conn = self.conn.clone();
        let msg = serde_json::to_string(task)?;
        let mut invocation = self.scripts.finish.prepare_invoke();
        invocation
            .key(self.task_key(&task.queue, &task.id))
            .key(self.bucket_key(&task.queue, TaskState::Active))
            .key(self.bucket_key(&task.queue, task.state))
            .arg(task.id.to_string())
            .arg(msg)
            .arg(task.state.as_str())
            .arg(bucket_score(task).timestamp_millis());
        let moved: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(moved == 1)
    }

    async fn list(&self, queue: &str, state: TaskState) -> Result<Vec<TaskInfo>> {
        let mut conn = self.conn.clone();
        let command = match state {
            TaskState::Pending | TaskState::Active => "LRANGE",
            _ => "ZRANGE",
        };
        let ids: Vec<String> = redis::cmd(command)
            .arg(self.bucket_key(queue, state))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.cmd("HMGET")
                .arg(format!("{}{}", self.task_prefix(queue), id))
                .arg("msg")
                .arg("state");
        }
        let rows: Vec<(Option<String>, Option<String>)> = pipe.query_async(&mut conn).await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (msg, state) in rows {
            if let Some(task) = Self::decode(msg, state)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn get(&self, queue: &str, id: &TaskId) -> Result<Option<TaskInfo>> {
        let mut conn = self.conn.clone();
        let (msg, state): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(self.task_key(queue, id))
            .arg("msg")
            .arg("state")
            .query_async(&mut conn)
            .await?;
        Self::decode(msg, state)
    }

    async fn delete(&self, queue: &str, id: &TaskId, allowed: &[TaskState]) -> Result<Transition> {
        self.transition(queue, id, allowed, "delete").await
    }

    async fn run_now(&self, queue: &str, id: &TaskId, allowed: &[TaskState]) -> Result<Transition> {
        self.transition(queue, id, allowed, "run").await
    }

    async fn forward(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        for source in [TaskState::Scheduled, TaskState::Retry] {
            let mut invocation = self.scripts.forward.prepare_invoke();
            invocation
                .key(self.bucket_key(queue, source))
                .key(self.bucket_key(queue, TaskState::Pending))
                .arg(now.timestamp_millis())
                .arg(self.task_prefix(queue));
            let count: usize = invocation.invoke_async(&mut conn).await?;
            moved += count;
        }
        Ok(moved)
    }

    async fn sweep_completed(&self, queue: &str, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.sweep.prepare_invoke();
        invocation
            .key(self.bucket_key(queue, TaskState::Completed))
            .arg(now.timestamp_millis())
            .arg(self.task_prefix(queue));
        let count: usize = invocation.invoke_async(&mut conn).await?;
        Ok(count)
    }

    async fn counts(&self, queue: &str) -> Result<QueueInfo> {
        let mut conn = self.conn.clone();
        let (pending, active, scheduled, retry, archived, completed, paused): (
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
            bool,
        ) = redis::pipe()
            .cmd("LLEN")
            .arg(self.bucket_key(queue, TaskState::Pending))
            .cmd("LLEN")
            .arg(self.bucket_key(queue, TaskState::Active))
            .cmd("ZCARD")
            .arg(self.bucket_key(queue, TaskState::Scheduled))
            .cmd("ZCARD")
            .arg(self.bucket_key(queue, TaskState::Retry))
            .cmd("ZCARD")
            .arg(self.bucket_key(queue, TaskState::Archived))
            .cmd("ZCARD")
            .arg(self.bucket_key(queue, TaskState::Completed))
            .cmd("SISMEMBER")
            .arg(self.paused_key())
            .arg(queue)
            .query_async(&mut conn)
            .await?;

        Ok(QueueInfo {
            queue: queue.to_string(),
            pending,
            active,
            scheduled,
            retry,
            archived,
            completed,
            paused,
        })
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(self.queues_key())
            .arg(queue)
            .ignore()
            .cmd("SADD")
            .arg(self.paused_key())
            .arg(queue)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SREM")
            .arg(self.paused_key())
            .arg(queue)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn drop_queue(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let known: bool = redis::cmd("SISMEMBER")
            .arg(self.queues_key())
            .arg(queue)
            .query_async(&mut conn)
            .await?;
        if !known {
            return Err(VaultError::queue_not_found(queue));
        }

        let mut removed = 0;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for state in TaskState::ALL {
            for task in self.list(queue, state).await? {
                pipe.cmd("DEL").arg(self.task_key(queue, &task.id)).ignore();
                removed += 1;
            }
            pipe.cmd("DEL").arg(self.bucket_key(queue, state)).ignore();
        }
        pipe.cmd("SREM").arg(self.queues_key()).arg(queue).ignore();
        pipe.cmd("SREM").arg(self.paused_key()).arg(queue).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(removed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Values applied to tasks enqueued without explicit options.
#[derive(Debug, Clone)]
pub struct QueueDefaults {
    pub timeout: Duration,
    pub max_retry: u32,
    pub retention: Duration,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            max_retry: DEFAULT_MAX_RETRY,
            retention: DEFAULT_RETENTION,
        }
    }
}

/// The queue client shared by producers, workers and inspectors.
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    defaults: QueueDefaults,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, defaults: QueueDefaults) -> Self {
        Self { backend, defaults }
    }

    /// An in-memory queue (for tests and development).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryQueueBackend::new()), QueueDefaults::default())
    }

    /// A Redis-backed queue over one shared connection.
    pub async fn connect_redis(url: &str, prefix: &str, defaults: QueueDefaults) -> Result<Self> {
        let backend = RedisQueueBackend::connect(url, prefix).await?;
        Ok(Self::new(Arc::new(backend), defaults))
    }

    pub fn defaults(&self) -> &QueueDefaults {
        &self.defaults
    }

    fn build_task<P: Serialize + ?Sized>(
        &self,
        task_type: &str,
        payload: &P,
        options: &EnqueueOptions,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<(TaskInfo, Option<String>)> {
        let payload: Payload = match serde_json::to_value(payload)? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(VaultError::new(
                    crate::error::ErrorCode::SerializationError,
                    format!("task payload must be a key/value map, got {}", other),
                ))
            }
        };

        let queue = options
            .queue
            .clone()
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        let now = Utc::now();
        let scheduled = run_at.filter(|at| *at > now);

        let unique_key = options.unique.map(|_| {
            let digest = Sha256::digest(serde_json::Value::Object(payload.clone()).to_string());
            format!("{}:{}:{}", queue, task_type, hex::encode(digest))
        });

        let task = TaskInfo {
            id: options.task_id.unwrap_or_default(),
            task_type: task_type.to_string(),
            payload,
            queue,
            max_retry: options.max_retry.unwrap_or(self.defaults.max_retry),
            retried: 0,
            timeout: options.timeout.unwrap_or(self.defaults.timeout),
            deadline: options.deadline,
            state: if scheduled.is_some() {
                TaskState::Scheduled
            } else {
                TaskState::Pending
            },
            next_run_at: scheduled,
            last_error: None,
            last_failed_at: None,
            enqueued_at: now,
            completed_at: None,
            retention: options.retention.unwrap_or(self.defaults.retention),
        };
        Ok((task, unique_key))
    }

    async fn submit(
        &self,
        task: TaskInfo,
        unique_key: Option<String>,
        options: &EnqueueOptions,
    ) -> Result<TaskInfo> {
        let unique = unique_key.as_deref().zip(options.unique);
        self.backend.enqueue(&task, unique).await?;
        tracing::debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            queue = %task.queue,
            state = %task.state,
            "Task enqueued"
        );
        Ok(task)
    }

    /// Submit a task for immediate processing.
    ///
    /// The payload is serialized before the broker is touched; a payload that
    /// is not a key/value map is rejected.
    pub async fn enqueue_now<P: Serialize + ?Sized>(
        &self,
        task_type: &str,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<TaskInfo> {
        let (task, unique_key) = self.build_task(task_type, payload, &options, None)?;
        self.submit(task, unique_key, &options).await
    }

    /// Submit a task to run at `run_at`. A time in the past enqueues immediately.
    pub async fn enqueue_at<P: Serialize + ?Sized>(
        &self,
        task_type: &str,
        payload: &P,
        run_at: DateTime<Utc>,
        options: EnqueueOptions,
    ) -> Result<TaskInfo> {
        let (task, unique_key) = self.build_task(task_type, payload, &options, Some(run_at))?;
        self.submit(task, unique_key, &options).await
    }

    /// Take the oldest pending task of a lane.
    pub async fn dequeue(&self, queue: &str) -> Result<Option<TaskInfo>> {
        self.backend.dequeue(queue).await
    }

    /// Mark an active task completed; it stays inspectable for its retention.
    pub async fn complete(&self, task: &TaskInfo) -> Result<()> {
        let mut done = task.clone();
        done.state = TaskState::Completed;
        done.completed_at = Some(Utc::now());
        done.next_run_at = None;
        self.finish(done).await
    }

    /// Put an active task in the retry bucket, runnable again after `delay`.
    pub async fn retry(&self, task: &TaskInfo, error: &TaskError, delay: Duration) -> Result<()> {
        let now = Utc::now();
        let mut next = task.clone();
        next.state = TaskState::Retry;
        next.retried += 1;
        next.last_error = Some(error.to_string());
        next.last_failed_at = Some(now);
        next.next_run_at = Some(
            chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now),
        );
        self.finish(next).await
    }

    /// Archive an active task: no further automatic attempts.
    pub async fn archive(&self, task: &TaskInfo, error: &TaskError) -> Result<()> {
        let mut dead = task.clone();
        dead.state = TaskState::Archived;
        dead.last_error = Some(error.to_string());
        dead.last_failed_at = Some(Utc::now());
        dead.next_run_at = None;
        self.finish(dead).await
    }

    async fn finish(&self, task: TaskInfo) -> Result<()> {
        if !self.backend.finish(&task).await? {
            tracing::warn!(
                task_id = %task.id,
                queue = %task.queue,
                state = %task.state,
                "Task was no longer active; outcome discarded"
            );
        }
        Ok(())
    }

    /// Find a task anywhere. Scans every lane and every bucket.
    pub async fn get_by_id(&self, id: &TaskId) -> Result<TaskInfo> {
        for queue in self.backend.queue_names().await? {
            for state in TaskState::ALL {
                let found = self
                    .backend
                    .list(&queue, state)
                    .await?
                    .into_iter()
                    .find(|t| t.id == *id);
                if let Some(task) = found {
                    return Ok(task);
                }
            }
        }
        Err(VaultError::task_not_found(id.to_string()))
    }

    /// Tasks in one bucket across every lane, optionally filtered by exact type.
    pub async fn list(&self, task_type: Option<&str>, state: TaskState) -> Result<Vec<TaskInfo>> {
        let mut tasks = Vec::new();
        for queue in self.backend.queue_names().await? {
            tasks.extend(
                self.backend
                    .list(&queue, state)
                    .await?
                    .into_iter()
                    .filter(|t| task_type.map_or(true, |ty| t.task_type == ty)),
            );
        }
        Ok(tasks)
    }

    /// Remove a task that has not been picked up yet.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let allowed = [TaskState::Pending, TaskState::Scheduled, TaskState::Retry];
        let mut seen = None;
        for queue in self.backend.queue_names().await? {
            match self.backend.delete(&queue, id, &allowed).await? {
                Transition::Done => {
                    tracing::info!(task_id = %id, queue = %queue, "Task cancelled");
                    return Ok(());
                }
                Transition::WrongState(state) => seen = Some(state),
                Transition::Missing => {}
            }
        }
        match seen {
            Some(state) => Err(wrong_state(id, state, "cancel")),
            None => Err(VaultError::task_not_found(id.to_string())),
        }
    }

    /// Make a failed, retrying or scheduled task runnable now, regardless of budget.
    ///
    /// Active tasks are accepted too, for recovering work whose worker died.
    /// A worker that is in fact still running the task loses its result: its
    /// `finish` no longer finds the task active.
    pub async fn force_retry(&self, id: &TaskId) -> Result<TaskInfo> {
        let allowed = [
            TaskState::Archived,
            TaskState::Retry,
            TaskState::Scheduled,
            TaskState::Active,
        ];
        let mut seen = None;
        for queue in self.backend.queue_names().await? {
            match self.backend.run_now(&queue, id, &allowed).await? {
                Transition::Done => {
                    tracing::info!(task_id = %id, queue = %queue, "Task forced to run");
                    return self
                        .backend
                        .get(&queue, id)
                        .await?
                        .ok_or_else(|| VaultError::task_not_found(id.to_string()));
                }
                Transition::WrongState(state) => seen = Some(state),
                Transition::Missing => {}
            }
        }
        match seen {
            Some(state) => Err(wrong_state(id, state, "retry")),
            None => Err(VaultError::task_not_found(id.to_string())),
        }
    }

    /// Fresh per-lane counts summed into a global view.
    pub async fn stats(&self) -> Result<QueueStats> {
        let mut queues = Vec::new();
        for queue in self.backend.queue_names().await? {
            let info = self.backend.counts(&queue).await?;
            QueueDepthGauge::set(&info.queue, info.pending as u64);
            queues.push(info);
        }
        Ok(QueueStats::from_queues(queues))
    }

    pub async fn queue_info(&self, queue: &str) -> Result<QueueInfo> {
        self.backend.counts(queue).await
    }

    pub async fn queue_names(&self) -> Result<Vec<String>> {
        self.backend.queue_names().await
    }

    pub async fn pause(&self, queue: &str) -> Result<()> {
        self.backend.pause(queue).await?;
        tracing::info!(queue = %queue, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> Result<()> {
        self.backend.resume(queue).await?;
        tracing::info!(queue = %queue, "Queue resumed");
        Ok(())
    }

    /// Delete a lane and every task in it.
    pub async fn drop_queue(&self, queue: &str) -> Result<usize> {
        let removed = self.backend.drop_queue(queue).await?;
        tracing::warn!(queue = %queue, removed, "Queue dropped");
        Ok(removed)
    }

    /// Broker reachability and lane enumeration.
    pub async fn health_check(&self) -> Result<()> {
        self.backend.ping().await?;
        self.backend.queue_names().await?;
        Ok(())
    }

    /// Promote due scheduled/retry tasks in every lane.
    pub async fn forward_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut moved = 0;
        for queue in self.backend.queue_names().await? {
            moved += self.backend.forward(&queue, now).await?;
        }
        Ok(moved)
    }

    /// Drop completed tasks past retention in every lane.
    pub async fn sweep_completed(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for queue in self.backend.queue_names().await? {
            removed += self.backend.sweep_completed(&queue, now).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_dequeue_fifo() {
        let queue = JobQueue::in_memory();
        let a = queue
            .enqueue_now("backup:execute", &json!({"n": 1}), EnqueueOptions::new())
            .await
            .unwrap();
        let b = queue
            .enqueue_now("backup:execute", &json!({"n": 2}), EnqueueOptions::new())
            .await
            .unwrap();

        assert_eq!(a.state, TaskState::Pending);
        assert_eq!(queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap().id, a.id);
        assert_eq!(queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap().id, b.id);
        assert!(queue.dequeue(DEFAULT_QUEUE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_map_payload_rejected_before_broker() {
        let queue = JobQueue::in_memory();
        let err = queue
            .enqueue_now("backup:execute", &json!([1, 2, 3]), EnqueueOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
        assert!(queue.queue_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unique_rejects_duplicate() {
        let queue = JobQueue::in_memory();
        let opts = || EnqueueOptions::new().unique(Duration::from_secs(60));
        queue
            .enqueue_now("backup:execute", &json!({"backup_job_id": 1}), opts())
            .await
            .unwrap();
        let dup = queue
            .enqueue_now("backup:execute", &json!({"backup_job_id": 1}), opts())
            .await
            .unwrap_err();
        assert_eq!(dup.error_code(), "TASK_EXISTS");

        queue
            .enqueue_now("backup:execute", &json!({"backup_job_id": 2}), opts())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pause_blocks_dequeue() {
        let queue = JobQueue::in_memory();
        queue
            .enqueue_now("t", &json!({}), EnqueueOptions::new().queue("low"))
            .await
            .unwrap();
        queue.pause("low").await.unwrap();
        assert!(queue.dequeue("low").await.unwrap().is_none());
        assert!(queue.queue_info("low").await.unwrap().paused);

        queue.resume("low").await.unwrap();
        assert!(queue.dequeue("low").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_then_forward() {
        let queue = JobQueue::in_memory();
        queue
            .enqueue_now("t", &json!({}), EnqueueOptions::new())
            .await
            .unwrap();
        let task = queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap();
        queue
            .retry(&task, &TaskError::retryable("flaky"), Duration::from_secs(30))
            .await
            .unwrap();

        let retrying = queue.get_by_id(&task.id).await.unwrap();
        assert_eq!(retrying.state, TaskState::Retry);
        assert_eq!(retrying.retried, 1);
        assert_eq!(retrying.last_error.as_deref(), Some("flaky"));

        assert_eq!(queue.forward_due(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(31);
        assert_eq!(queue.forward_due(later).await.unwrap(), 1);
        assert_eq!(
            queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap().id,
            task.id
        );
    }

    #[tokio::test]
    async fn test_completed_swept_after_retention() {
        let queue = JobQueue::in_memory();
        queue
            .enqueue_now(
                "t",
                &json!({}),
                EnqueueOptions::new().retention(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        let task = queue.dequeue(DEFAULT_QUEUE).await.unwrap().unwrap();
        queue.complete(&task).await.unwrap();

        assert_eq!(queue.list(None, TaskState::Completed).await.unwrap().len(), 1);
        assert_eq!(queue.sweep_completed(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(queue.sweep_completed(later).await.unwrap(), 1);
        assert!(queue.get_by_id(&task.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stats_sum_lanes() {
        let queue = JobQueue::in_memory();
        for lane in ["critical", "default", "default"] {
            queue
                .enqueue_now("t", &json!({}), EnqueueOptions::new().queue(lane))
                .await
                .unwrap();
        }
        queue
            .enqueue_at(
                "t",
                &json!({}),
                Utc::now() + chrono::Duration::hours(1),
                EnqueueOptions::new().queue("low"),
            )
            .await
            .unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.queues.len(), 3);
    }

    #[tokio::test]
    async fn test_drop_queue_removes_everything() {
        let queue = JobQueue::in_memory();
        queue
            .enqueue_now("t", &json!({}), EnqueueOptions::new().queue("low"))
            .await
            .unwrap();
        queue
            .enqueue_at(
                "t",
                &json!({}),
                Utc::now() + chrono::Duration::hours(1),
                EnqueueOptions::new().queue("low"),
            )
            .await
            .unwrap();
        assert_eq!(queue.drop_queue("low").await.unwrap(), 2);
        assert!(queue.queue_names().await.unwrap().is_empty());
        assert!(queue.drop_queue("low").await.is_err());
    }
}
