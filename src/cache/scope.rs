//! Repository-owned scope for background refresh work.

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Spawns detached background tasks that outlive the request that started them.
///
/// Tasks are independent: a task that fails or panics does not affect its
/// siblings or the scope. Errors and panics are logged here under the task's
/// label.
#[derive(Clone)]
pub struct TaskScope {
  handle: Handle,
  tracker: TaskTracker,
}

impl TaskScope {
  /// Create a scope on the runtime of the calling task.
  pub fn current() -> Result<Self> {
    let handle =
      Handle::try_current().map_err(|e| eyre!("Task scope requires a Tokio runtime: {}", e))?;
    Ok(Self::with_handle(handle))
  }

  /// Create a scope that spawns onto `handle`.
  pub fn with_handle(handle: Handle) -> Self {
    Self {
      handle,
      tracker: TaskTracker::new(),
    }
  }

  /// Spawn `task` in the background. Errors and panics are logged under `label`.
  pub fn spawn<F>(&self, label: &'static str, task: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.tracker.spawn_on(
      async move {
        match AssertUnwindSafe(task).catch_unwind().await {
          Ok(Ok(())) => {}
          Ok(Err(e)) => warn!(task = label, "Background task failed: {:#}", e),
          Err(panic) => warn!(
            task = label,
            "Background task panicked: {}",
            panic_message(panic.as_ref())
          ),
        }
      },
      &self.handle,
    );
  }

  pub fn is_empty(&self) -> bool {
    self.tracker.is_empty()
  }

  /// Wait until every task spawned so far has finished.
  ///
  /// Tasks spawned while waiting are waited for too. Meant for shutdown and
  /// tests; the scope accepts new work afterwards.
  pub async fn wait_idle(&self) {
    self.tracker.close();
    self.tracker.wait().await;
    self.tracker.reopen();
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  payload
    .downcast_ref::<&'static str>()
    .copied()
    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("non-string panic payload")
}

impl std::fmt::Debug for TaskScope {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskScope")
      .field("running", &self.tracker.len())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_failed_task_does_not_affect_siblings() {
    let scope = TaskScope::current().unwrap();
    let counter = Arc::new(AtomicU32::new(0));

    scope.spawn("failing", async { Err::<(), _>(eyre!("remote unavailable")) });
    for _ in 0..3 {
      let counter = counter.clone();
      scope.spawn("counting", async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }

    scope.wait_idle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(scope.is_empty());
  }

  #[tokio::test]
  async fn test_panicking_task_is_isolated() {
    let scope = TaskScope::current().unwrap();
    let counter = Arc::new(AtomicU32::new(0));

    scope.spawn("panicking", async {
      if std::hint::black_box(true) {
        panic!("boom");
      }
      Ok(())
    });
    let c = counter.clone();
    scope.spawn("counting", async move {
      c.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    scope.wait_idle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_scope_accepts_work_after_wait() {
    let scope = TaskScope::current().unwrap();
    scope.wait_idle().await;

    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    scope.spawn("counting", async move {
      c.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    scope.wait_idle().await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_panic_message_reads_payload() {
    let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "boom");

    let page = 3;
    let payload = std::panic::catch_unwind(|| panic!("lost page {}", page)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "lost page 3");

    let payload: Box<dyn Any + Send> = Box::new(7u32);
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
  }

  #[test]
  fn test_current_requires_runtime() {
    assert!(TaskScope::current().is_err());
  }
}
