use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WaitError;
use crate::response::ResponseData;

/// All responses for one waiting instance, delivered exactly once.
#[derive(Debug, Clone)]
pub struct Resumption {
  pub instance_id: String,
  pub responses: HashMap<String, ResponseData>,
}

struct Wait {
  correlation_ids: Vec<String>,
  outstanding: HashSet<String>,
  timer: Option<JoinHandle<()>>,
  /// Held: responses are still recorded, but nothing is delivered and the
  /// wait cannot expire.
  suspended: bool,
}

struct Buffered {
  data: ResponseData,
  posted_at: Instant,
}

#[derive(Default)]
struct Inner {
  /// instance id -> its wait
  waits: HashMap<String, Wait>,
  /// correlation id -> instances waiting on it
  waiters: HashMap<String, HashSet<String>>,
  /// correlation id -> first response posted for it
  responses: HashMap<String, Buffered>,
}

impl Inner {
  /// Remove a completed or expired wait and collect its responses, filling
  /// missing ones with timeouts.
  fn take(&mut self, instance_id: &str) -> Option<Resumption> {
    let wait = self.waits.remove(instance_id)?;
    if let Some(timer) = wait.timer {
      timer.abort();
    }
    for id in &wait.outstanding {
      if let Some(set) = self.waiters.get_mut(id) {
        set.remove(instance_id);
        if set.is_empty() {
          self.waiters.remove(id);
        }
      }
    }

    let responses = wait
      .correlation_ids
      .into_iter()
      .map(|id| {
        let data = match self.responses.get(&id) {
          Some(buffered) => buffered.data.clone(),
          None => ResponseData::Timeout {
            correlation_id: id.clone(),
          },
        };
        (id, data)
      })
      .collect();

    Some(Resumption {
      instance_id: instance_id.to_string(),
      responses,
    })
  }
}

/// Correlation-id based wait/notify.
///
/// Cloning is cheap; clones share the same tables and resumption channel.
#[derive(Clone)]
pub struct Coordinator {
  inner: Arc<Mutex<Inner>>,
  resumptions: mpsc::UnboundedSender<Resumption>,
  retention: Duration,
}

impl Coordinator {
  /// Create a coordinator and the receiver its resumptions are delivered on.
  ///
  /// Responses nobody waits on are kept for `retention` before the sweeper
  /// drops them.
  pub fn new(retention: Duration) -> (Self, mpsc::UnboundedReceiver<Resumption>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let coordinator = Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      resumptions: sender,
      retention,
    };
    (coordinator, receiver)
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn deliver(&self, resumption: Resumption) {
    debug!(
      instance_id = %resumption.instance_id,
      responses = resumption.responses.len(),
      "delivering resumption"
    );
    if self.resumptions.send(resumption).is_err() {
      warn!("resumption receiver dropped");
    }
  }

  /// Suspend `instance_id` until every id in `correlation_ids` has a response.
  ///
  /// Responses already buffered count immediately. With `timeout` set, ids
  /// still outstanding at the deadline resolve to [`ResponseData::Timeout`].
  pub fn register_wait(
    &self,
    instance_id: &str,
    correlation_ids: Vec<String>,
    timeout: Option<Duration>,
  ) -> Result<(), WaitError> {
    self.register(instance_id, correlation_ids, timeout, false)
  }

  /// Register a wait that starts out held, as if [`suspend`](Self::suspend)
  /// had been called on it. Nothing is delivered before
  /// [`release`](Self::release).
  pub fn register_suspended(
    &self,
    instance_id: &str,
    correlation_ids: Vec<String>,
  ) -> Result<(), WaitError> {
    self.register(instance_id, correlation_ids, None, true)
  }

  fn register(
    &self,
    instance_id: &str,
    correlation_ids: Vec<String>,
    timeout: Option<Duration>,
    suspended: bool,
  ) -> Result<(), WaitError> {
    if correlation_ids.is_empty() {
      return Err(WaitError::NoCorrelationIds(instance_id.to_string()));
    }

    let ready = {
      let mut inner = self.lock();
      if inner.waits.contains_key(instance_id) {
        return Err(WaitError::AlreadyWaiting(instance_id.to_string()));
      }

      let outstanding: HashSet<String> = correlation_ids
        .iter()
        .filter(|id| !inner.responses.contains_key(*id))
        .cloned()
        .collect();

      for id in &outstanding {
        inner
          .waiters
          .entry(id.clone())
          .or_default()
          .insert(instance_id.to_string());
      }

      let complete = outstanding.is_empty() && !suspended;
      let timer = match timeout {
        Some(timeout) if !complete && !suspended => Some(self.spawn_timer(instance_id, timeout)),
        _ => None,
      };

      inner.waits.insert(
        instance_id.to_string(),
        Wait {
          correlation_ids,
          outstanding,
          timer,
          suspended,
        },
      );

      if complete { inner.take(instance_id) } else { None }
    };

    debug!(
      instance_id = %instance_id,
      timeout_ms = timeout.map(|t| t.as_millis() as u64),
      suspended,
      "registered wait"
    );

    if let Some(resumption) = ready {
      self.deliver(resumption);
    }
    Ok(())
  }

  fn spawn_timer(&self, instance_id: &str, timeout: Duration) -> JoinHandle<()> {
    let coordinator = self.clone();
    let instance_id = instance_id.to_string();
    tokio::spawn(async move {
      tokio::time::sleep(timeout).await;
      coordinator.expire(&instance_id);
    })
  }

  fn expire(&self, instance_id: &str) {
    let resumption = {
      let mut inner = self.lock();
      match inner.waits.get(instance_id) {
        Some(wait) if !wait.suspended => inner.take(instance_id),
        _ => None,
      }
    };
    if let Some(resumption) = resumption {
      info!(instance_id = %instance_id, "wait timed out");
      self.deliver(resumption);
    }
  }

  /// Post the response for a correlation id.
  ///
  /// The first response for an id wins. Later posts are ignored and return
  /// `false`. A response satisfies every instance waiting on the id.
  pub fn post_response(&self, correlation_id: &str, data: ResponseData) -> bool {
    let ready = {
      let mut inner = self.lock();
      if inner.responses.contains_key(correlation_id) {
        debug!(correlation_id = %correlation_id, "duplicate response ignored");
        return false;
      }
      inner.responses.insert(
        correlation_id.to_string(),
        Buffered {
          data,
          posted_at: Instant::now(),
        },
      );

      let waiting = inner.waiters.remove(correlation_id).unwrap_or_default();
      let mut ready = Vec::new();
      for instance_id in waiting {
        let complete = match inner.waits.get_mut(&instance_id) {
          Some(wait) => {
            wait.outstanding.remove(correlation_id);
            wait.outstanding.is_empty() && !wait.suspended
          }
          None => false,
        };
        if complete {
          ready.extend(inner.take(&instance_id));
        }
      }
      ready
    };

    for resumption in ready {
      self.deliver(resumption);
    }
    true
  }

  /// Drop an instance's wait without delivering anything.
  pub fn cancel(&self, instance_id: &str) -> bool {
    let mut inner = self.lock();
    let Some(wait) = inner.waits.remove(instance_id) else {
      return false;
    };
    if let Some(timer) = wait.timer {
      timer.abort();
    }
    for id in &wait.outstanding {
      if let Some(set) = inner.waiters.get_mut(id) {
        set.remove(instance_id);
        if set.is_empty() {
          inner.waiters.remove(id);
        }
      }
    }
    debug!(instance_id = %instance_id, "wait cancelled");
    true
  }

  /// Hold an instance's wait: its timer stops and completed responses stay
  /// buffered until [`release`](Self::release). Returns `false` when the
  /// instance has no wait, e.g. because it was already delivered.
  pub fn suspend(&self, instance_id: &str) -> bool {
    let mut inner = self.lock();
    let Some(wait) = inner.waits.get_mut(instance_id) else {
      return false;
    };
    if let Some(timer) = wait.timer.take() {
      timer.abort();
    }
    wait.suspended = true;
    debug!(instance_id = %instance_id, outstanding = wait.outstanding.len(), "wait suspended");
    true
  }

  /// Undo [`suspend`](Self::suspend). A wait whose responses all arrived
  /// meanwhile is delivered now; otherwise `timeout` starts afresh.
  pub fn release(&self, instance_id: &str, timeout: Option<Duration>) -> bool {
    let ready = {
      let mut inner = self.lock();
      let Some(wait) = inner.waits.get_mut(instance_id) else {
        return false;
      };
      if !wait.suspended {
        return false;
      }
      wait.suspended = false;
      if wait.outstanding.is_empty() {
        inner.take(instance_id)
      } else {
        if let Some(timeout) = timeout {
          let timer = self.spawn_timer(instance_id, timeout);
          if let Some(wait) = inner.waits.get_mut(instance_id) {
            wait.timer = Some(timer);
          }
        }
        None
      }
    };

    debug!(instance_id = %instance_id, delivered = ready.is_some(), "wait released");
    if let Some(resumption) = ready {
      self.deliver(resumption);
    }
    true
  }

  pub fn is_waiting(&self, instance_id: &str) -> bool {
    self.lock().waits.contains_key(instance_id)
  }

  /// Correlation ids an instance is still waiting on.
  pub fn outstanding(&self, instance_id: &str) -> Vec<String> {
    let inner = self.lock();
    let mut ids: Vec<String> = inner
      .waits
      .get(instance_id)
      .map(|w| w.outstanding.iter().cloned().collect())
      .unwrap_or_default();
    ids.sort();
    ids
  }

  pub fn response(&self, correlation_id: &str) -> Option<ResponseData> {
    self
      .lock()
      .responses
      .get(correlation_id)
      .map(|b| b.data.clone())
  }

  /// Drop buffered responses older than the retention window.
  pub fn sweep(&self) -> usize {
    let retention = self.retention;
    let mut inner = self.lock();
    let before = inner.responses.len();
    inner
      .responses
      .retain(|_, buffered| buffered.posted_at.elapsed() < retention);
    before - inner.responses.len()
  }

  /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
  pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    let coordinator = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.tick().await;
      loop {
        tokio::select! {
          _ = cancel.cancelled() => {
            debug!("response sweeper stopped");
            break;
          }
          _ = ticker.tick() => {
            let removed = coordinator.sweep();
            if removed > 0 {
              debug!(removed, "swept expired responses");
            }
          }
        }
      }
    })
  }
}
