use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// 古いファイルを削除する間隔
pub(crate) const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// すべての定期タスクが監視する停止シグナル
#[derive(Clone, Default)]
pub(crate) struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub(crate) fn trigger(&self) {
        let (stopped, condvar) = &*self.inner;
        *stopped.lock() = true;
        condvar.notify_all();
    }

    #[cfg(test)]
    fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// `deadline`まで待つ。途中で停止シグナルを受けた場合は`true`を返却する。
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let (stopped, condvar) = &*self.inner;
        let mut stopped = stopped.lock();
        while !*stopped {
            if condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// 停止シグナルを共有する定期タスクの集合
///
/// 停止後に再開することはできない。
#[derive(Default)]
pub(crate) struct Scheduler {
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `interval`ごとに`task`を実行するスレッドを起動する。
    ///
    /// 実行が間に合わなかった回は飛ばし、次の周期から再開する。
    pub(crate) fn spawn_periodic<F>(
        &mut self,
        name: &str,
        interval: Duration,
        mut task: F,
    ) -> io::Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while !shutdown.wait_until(next) {
                    task();
                    next += interval;
                    let now = Instant::now();
                    if next <= now {
                        next = now + interval;
                    }
                }
            })?;
        self.tasks.push(handle);

        Ok(())
    }

    /// 停止シグナルを送り、すべてのタスクの終了を待つ。2回目以降は何もしない。
    pub(crate) fn shutdown(&mut self) {
        self.shutdown.trigger();
        for handle in self.tasks.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
impl Scheduler {
    fn is_stopped(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_periodic_task_runs_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        let counter = Arc::clone(&count);
        scheduler
            .spawn_periodic("test-tick", Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(200));
        scheduler.shutdown();
        let after_shutdown = count.load(Ordering::SeqCst);
        assert!(after_shutdown >= 2, "ran {after_shutdown} times");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(after_shutdown, count.load(Ordering::SeqCst));
        assert!(scheduler.is_stopped());
        assert_eq!(0, scheduler.len());
    }

    #[test]
    fn test_shutdown_wakes_long_waits_promptly() {
        let mut scheduler = Scheduler::new();
        scheduler
            .spawn_periodic("test-cleanup", CLEANUP_INTERVAL, || {})
            .unwrap();
        scheduler
            .spawn_periodic("test-sync", CLEANUP_INTERVAL, || {})
            .unwrap();

        let started = Instant::now();
        scheduler.shutdown();
        scheduler.shutdown();

        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_returns_false_on_timeout() {
        let signal = ShutdownSignal::default();
        assert!(!signal.wait_until(Instant::now() + Duration::from_millis(5)));

        signal.trigger();
        assert!(signal.wait_until(Instant::now() + CLEANUP_INTERVAL));
    }
}
