//! Zeitbasis und Hintergrund Tasks der Bridge.
//! Alle Debounce-, Settle-, Retry- und Cooldown Zeiten lesen die Zeit nur über eine Clock,
//! damit Tests die logische Zeit vorspulen können statt zu warten.

use log::error;
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};
use std::{
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

/// Zeitquelle
pub trait Clock: Send + Sync {
  /// Monoton steigende Zeit in ms
  fn now_ms(&self) -> u64;
  /// Warten. Darf nie mit gehaltenem Lock aufgerufen werden.
  /// # Arguments
  /// * duration - Wartezeit
  fn sleep(&self, duration: Duration);
}

pub type SharedClock = Arc<dyn Clock>;

/// Echte Zeit, Nullpunkt ist Programmstart
pub struct SystemClock {
  start: Instant,
}
impl SystemClock {
  pub fn new() -> SystemClock {
    SystemClock {
      start: Instant::now(),
    }
  }
}
impl Clock for SystemClock {
  fn now_ms(&self) -> u64 {
    self.start.elapsed().as_millis() as u64
  }
  fn sleep(&self, duration: Duration) {
    thread::sleep(duration);
  }
}

/// Manuell gesteuerte Zeit für Tests.
/// sleep() wartet nicht sondern schiebt die Zeit vorwärts.
#[cfg(test)]
pub struct ManualClock {
  now: AtomicU64,
}
#[cfg(test)]
impl ManualClock {
  pub fn new(start_ms: u64) -> ManualClock {
    ManualClock {
      now: AtomicU64::new(start_ms),
    }
  }
  /// Zeit vorwärts schieben
  /// # Arguments
  /// * ms - Anzahl ms
  pub fn advance(&self, ms: u64) {
    self.now.fetch_add(ms, Ordering::SeqCst);
  }
}
#[cfg(test)]
impl Clock for ManualClock {
  fn now_ms(&self) -> u64 {
    self.now.load(Ordering::SeqCst)
  }
  fn sleep(&self, duration: Duration) {
    self.advance(duration.as_millis() as u64);
  }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Start von einmaligen Hintergrund Tasks (Lashup Erzeugung, PDI Abfragen)
pub trait TaskSpawner: Send + Sync {
  /// # Arguments
  /// * name - Name des Tasks (Threadname)
  /// * task - Auszuführende Arbeit
  fn spawn(&self, name: String, task: Task);
}

/// Jeder Task in einem eigenen Thread
pub struct ThreadSpawner;
impl TaskSpawner for ThreadSpawner {
  fn spawn(&self, name: String, task: Task) {
    if let Err(msg) = thread::Builder::new().name(name.clone()).spawn(task) {
      error!("Task {} konnte nicht gestartet werden: {}", name, msg);
    }
  }
}

/// Sammelt Tasks, Test führt sie explizit aus
#[cfg(test)]
pub struct QueuedSpawner {
  tasks: std::sync::Mutex<Vec<(String, Task)>>,
}
#[cfg(test)]
impl QueuedSpawner {
  pub fn new() -> QueuedSpawner {
    QueuedSpawner {
      tasks: std::sync::Mutex::new(Vec::new()),
    }
  }
  /// Namen der wartenden Tasks
  pub fn pending(&self) -> Vec<String> {
    self
      .tasks
      .lock()
      .unwrap()
      .iter()
      .map(|(name, _)| name.clone())
      .collect()
  }
  /// Alle wartenden Tasks ausführen, Anzahl ausgeführte zurück
  pub fn run_all(&self) -> usize {
    let tasks: Vec<(String, Task)> = self.tasks.lock().unwrap().drain(..).collect();
    let count = tasks.len();
    for (_, task) in tasks {
      task();
    }
    count
  }
}
#[cfg(test)]
impl TaskSpawner for QueuedSpawner {
  fn spawn(&self, name: String, task: Task) {
    self.tasks.lock().unwrap().push((name, task));
  }
}

/// Ist seit `since` mindestens `window` ms vergangen?
/// Kein Zeitstempel -> true
/// # Arguments
/// * now - aktuelle Zeit ms
/// * since - letzter Zeitstempel
/// * window - Fenster ms
pub fn elapsed_since(now: u64, since: Option<u64>, window: u64) -> bool {
  match since {
    Some(t) => now.saturating_sub(t) >= window,
    None => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_test() {
    let clock = ManualClock::new(1000);
    assert_eq!(clock.now_ms(), 1000);
    clock.sleep(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 3000);
    clock.advance(5);
    assert_eq!(clock.now_ms(), 3005);
  }

  #[test]
  fn elapsed_since_test() {
    assert!(elapsed_since(100, None, 500));
    assert!(!elapsed_since(600, Some(200), 500));
    assert!(elapsed_since(700, Some(200), 500));
  }

  #[test]
  fn queued_spawner_test() {
    let spawner = QueuedSpawner::new();
    let flag = Arc::new(AtomicU64::new(0));
    let flag_task = flag.clone();
    spawner.spawn(
      "Test".to_string(),
      Box::new(move || {
        flag_task.store(7, Ordering::SeqCst);
      }),
    );
    assert_eq!(spawner.pending(), vec!["Test".to_string()]);
    assert_eq!(flag.load(Ordering::SeqCst), 0);
    assert_eq!(spawner.run_all(), 1);
    assert_eq!(flag.load(Ordering::SeqCst), 7);
  }
}
