//! 执行 OFF_THREAD 监听器的工作线程池

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use crate::error::{PacketError, Result};

/// 基于 tokio 多线程运行时的阻塞任务池
pub struct AsyncWorkerPool {
    runtime: Mutex<Option<Runtime>>,
    name: String,
}

impl AsyncWorkerPool {
    pub fn new(workers: usize, thread_name: &str) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .max_blocking_threads(workers.max(1))
            .thread_name(thread_name)
            .enable_all()
            .build()
            .map_err(|source| PacketError::WorkerStart {
                name: thread_name.to_string(),
                source,
            })?;
        info!(workers, thread = %thread_name, "Async listener pool started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            name: thread_name.to_string(),
        })
    }

    /// 提交任务；池已关闭时把任务原样交还调用方
    pub fn submit<F>(&self, task: F) -> std::result::Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.runtime.lock();
        match guard.as_ref() {
            Some(runtime) => {
                runtime.spawn_blocking(task);
                Ok(())
            }
            None => Err(task),
        }
    }

    /// `delay` 之后在阻塞线程上执行；池已关闭时把任务交还调用方
    pub fn schedule<F>(&self, delay: Duration, task: F) -> std::result::Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.runtime.lock();
        match guard.as_ref() {
            Some(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(err) = tokio::task::spawn_blocking(task).await {
                        warn!(error = %err, "Scheduled task did not complete");
                    }
                });
                Ok(())
            }
            None => Err(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// 等待在途任务最多 `grace`；重复调用无副作用
    pub fn shutdown(&self, grace: Duration) {
        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(grace);
            debug!(thread = %self.name, "Async listener pool stopped");
        }
    }
}

impl Drop for AsyncWorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn test_submit_and_shutdown() {
        let pool = AsyncWorkerPool::new(1, "pool-test").unwrap();
        let (tx, rx) = channel::bounded(1);
        assert!(pool
            .submit(move || {
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            })
            .is_ok());
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("pool-test"));

        pool.shutdown(Duration::from_secs(1));
        assert!(!pool.is_running());
        // 关闭后任务被交还
        assert!(pool.submit(|| {}).is_err());
        assert!(pool.schedule(Duration::ZERO, || {}).is_err());
        pool.shutdown(Duration::from_secs(1));
    }

    #[test]
    fn test_schedule_runs_after_delay() {
        let pool = AsyncWorkerPool::new(1, "pool-timer").unwrap();
        let (tx, rx) = channel::bounded(1);
        let started = std::time::Instant::now();
        assert!(pool
            .schedule(Duration::from_millis(50), move || {
                let _ = tx.send(started.elapsed());
            })
            .is_ok());
        let elapsed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(elapsed >= Duration::from_millis(50));
        pool.shutdown(Duration::from_secs(1));
    }
}
