//! 后台结构编译器
//!
//! 特化请求进入有界队列，由专用线程逐个编译，调用线程从不等待编译完成。
//! 编译结果按 (记录类型, 字段类型) 缓存在编译器内，生命周期与编译器一致；
//! 安装使用 insert-if-absent，并发请求同一布局时只会产生一个编译结果。
//! 任一次编译失败后编译器自行停用，之后的请求直接退回通用实现。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::compiler::{CompiledStructure, SlotTableSpecializer, Specializer};
use super::structure::{LayoutKey, StructureLayout};
use crate::config::SpecializerConfig;
use crate::error::{PacketError, Result};
use crate::metrics::ProtocolMetrics;
use crate::report::{ErrorReport, ErrorReporter, Severity, TracingErrorReporter};

/// 编译完成回调；`None` 表示保留通用实现
pub type CompileCallback = Box<dyn FnOnce(Option<Arc<CompiledStructure>>) + Send>;

struct CompileJob {
    layout: Arc<StructureLayout>,
}

struct CompilerShared {
    specializer: Arc<dyn Specializer>,
    compiled: DashMap<LayoutKey, Arc<CompiledStructure>>,
    pending: Mutex<HashMap<LayoutKey, Vec<CompileCallback>>>,
    enabled: AtomicBool,
    cancelled: AtomicBool,
    compiled_count: AtomicUsize,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Option<Arc<ProtocolMetrics>>,
}

impl CompilerShared {
    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.specializations_total.with_label_values(&[outcome]).inc();
        }
    }

    /// 插入缓存（已存在则沿用旧值）并安装到布局
    fn install(&self, layout: &StructureLayout, compiled: CompiledStructure) -> Arc<CompiledStructure> {
        let installed = match self.compiled.entry(layout.key()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                self.compiled_count.fetch_add(1, Ordering::AcqRel);
                Arc::clone(entry.insert(Arc::new(compiled)).value())
            }
        };
        layout.install(Arc::clone(&installed));
        installed
    }

    fn finish(&self, key: &LayoutKey, outcome: Option<Arc<CompiledStructure>>) {
        let waiters = self.pending.lock().remove(key).unwrap_or_default();
        for callback in waiters {
            callback(outcome.clone());
        }
    }

    fn disable(&self, layout: &StructureLayout, error: anyhow::Error) {
        self.enabled.store(false, Ordering::Release);
        self.record("failed");
        self.reporter.report(
            ErrorReport::new("structure-compiler", "Structure compilation failed, compiler disabled")
                .severity(Severity::Warning)
                .error(error)
                .detail("class", layout.record_class().name()),
        );
    }

    fn compile(&self, job: CompileJob) {
        let layout = job.layout;
        let key = layout.key();
        if self.cancelled.load(Ordering::Acquire) || !self.enabled.load(Ordering::Acquire) {
            self.finish(&key, None);
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.specializer.specialize(&layout)));
        let outcome = match result {
            Ok(Ok(Some(compiled))) => {
                let installed = self.install(&layout, compiled);
                self.record("compiled");
                debug!(
                    class = %layout.record_class().name(),
                    direct = installed.direct_count(),
                    "Structure specialized"
                );
                Some(installed)
            }
            Ok(Ok(None)) => {
                self.record("skipped");
                debug!(class = %layout.record_class().name(), "No accessible member, specialization skipped");
                None
            }
            Ok(Err(err)) => {
                self.disable(&layout, err.into());
                None
            }
            Err(_) => {
                self.disable(&layout, anyhow::anyhow!("specializer panicked"));
                None
            }
        };
        self.finish(&key, outcome);
    }
}

/// 后台编译器
pub struct BackgroundCompiler {
    shared: Arc<CompilerShared>,
    sender: Mutex<Option<Sender<CompileJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    done: Receiver<()>,
    shutdown_grace: Duration,
}

pub struct BackgroundCompilerBuilder {
    config: SpecializerConfig,
    specializer: Arc<dyn Specializer>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Option<Arc<ProtocolMetrics>>,
}

impl BackgroundCompilerBuilder {
    pub fn specializer(mut self, specializer: Arc<dyn Specializer>) -> Self {
        self.specializer = specializer;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn metrics(mut self, metrics: Arc<ProtocolMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn start(self) -> Result<Arc<BackgroundCompiler>> {
        let (sender, receiver) = channel::bounded::<CompileJob>(self.config.queue_capacity.max(1));
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let shared = Arc::new(CompilerShared {
            specializer: self.specializer,
            compiled: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(self.config.enabled),
            cancelled: AtomicBool::new(false),
            compiled_count: AtomicUsize::new(0),
            reporter: self.reporter,
            metrics: self.metrics,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                for job in receiver.iter() {
                    worker_shared.compile(job);
                }
                let _ = done_tx.send(());
            })
            .map_err(|source| PacketError::WorkerStart {
                name: self.config.thread_name.clone(),
                source,
            })?;

        info!(
            thread = %self.config.thread_name,
            queue_capacity = self.config.queue_capacity,
            "Structure compiler started"
        );

        Ok(Arc::new(BackgroundCompiler {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            done: done_rx,
            shutdown_grace: Duration::from_millis(self.config.shutdown_grace_ms),
        }))
    }
}

impl BackgroundCompiler {
    pub fn builder(config: SpecializerConfig) -> BackgroundCompilerBuilder {
        BackgroundCompilerBuilder {
            config,
            specializer: Arc::new(SlotTableSpecializer),
            reporter: Arc::new(TracingErrorReporter),
            metrics: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// 实际安装的编译结果数
    pub fn compiled_count(&self) -> usize {
        self.shared.compiled_count.load(Ordering::Acquire)
    }

    pub fn compiled(&self, key: &LayoutKey) -> Option<Arc<CompiledStructure>> {
        self.shared.compiled.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 请求特化布局；返回请求是否被接受（已完成、已排队或并入进行中的编译）
    pub fn schedule(&self, layout: Arc<StructureLayout>, callback: Option<CompileCallback>) -> bool {
        let key = layout.key();
        if let Some(done) = self.compiled(&key) {
            layout.install(Arc::clone(&done));
            if let Some(callback) = callback {
                callback(Some(done));
            }
            return true;
        }
        if !self.is_enabled() {
            if let Some(callback) = callback {
                callback(None);
            }
            return false;
        }

        let rejected = {
            let mut pending = self.shared.pending.lock();
            // 持锁复查，避免错过刚完成的编译
            if let Some(done) = self.compiled(&key) {
                drop(pending);
                layout.install(Arc::clone(&done));
                if let Some(callback) = callback {
                    callback(Some(done));
                }
                return true;
            }
            if let Some(waiters) = pending.get_mut(&key) {
                waiters.extend(callback);
                return true;
            }

            let sender = self.sender.lock();
            let send_result = match sender.as_ref() {
                Some(sender) => sender.try_send(CompileJob { layout: Arc::clone(&layout) }),
                None => Err(TrySendError::Disconnected(CompileJob { layout: Arc::clone(&layout) })),
            };
            match send_result {
                Ok(()) => {
                    pending.insert(key, callback.into_iter().collect());
                    return true;
                }
                Err(TrySendError::Full(_)) => (callback, "queue full"),
                Err(TrySendError::Disconnected(_)) => (callback, "compiler stopped"),
            }
        };

        let (callback, reason) = rejected;
        self.shared.record("rejected");
        warn!(class = %layout.record_class().name(), reason, "Structure compilation request rejected");
        self.shared.reporter.report(
            ErrorReport::new("structure-compiler", "Compilation request rejected")
                .severity(Severity::Warning)
                .detail("class", layout.record_class().name())
                .detail("reason", reason),
        );
        if let Some(callback) = callback {
            callback(None);
        }
        false
    }

    /// 请求特化并等待结果
    pub fn specialize_blocking(
        &self,
        layout: Arc<StructureLayout>,
        timeout: Duration,
    ) -> Option<Arc<CompiledStructure>> {
        let (tx, rx) = channel::bounded(1);
        self.schedule(
            layout,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );
        rx.recv_timeout(timeout).ok().flatten()
    }

    /// 取消排队中的编译并在宽限期内等待线程退出；可重复调用
    pub fn shutdown(&self) -> bool {
        self.shutdown_within(self.shutdown_grace)
    }

    pub fn shutdown_within(&self, grace: Duration) -> bool {
        self.shared.cancelled.store(true, Ordering::Release);
        let stopped_now = self.sender.lock().take().is_some();

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.lock().take() {
                    let _ = worker.join();
                }
                if stopped_now {
                    info!("Structure compiler stopped");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(grace_ms = grace.as_millis() as u64, "Structure compiler did not stop within grace period");
                false
            }
        }
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.sender.lock().take();
    }
}
