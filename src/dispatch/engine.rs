//! 监听器分发引擎
//!
//! 每个方向一张 `MessageType -> 有序监听器` 表。一次分发按优先级升序调用监听器：
//! - MONITOR 阶段事件只读，修改被访问层拒绝但迭代继续
//! - 取消只影响后续投递，剩余监听器照常执行
//! - 普通故障被捕获并上报，致命错误立即向上返回
//! - OFF_THREAD 监听器交给工作线程池：先在调用线程跑完所有同级及更低优先级的同步监听器，
//!   工作线程执行完异步监听器后继续执行剩余优先级，最后通过回调交回结果
//!
//! 分发开始时取得的监听器快照贯穿整个事件，之后注册的监听器不会作用于在途事件。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::anyhow;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::pool::AsyncWorkerPool;
use super::sorted::{ListenerEntry, ListenerId, ListenerSnapshot, SortedListeners};
use crate::error::{PacketError, Result};
use crate::events::{
    ListenerError, ListenerOptions, ListenerPriority, ListeningWhitelist, MessageEvent,
    MessageListener,
};
use crate::metrics::ProtocolMetrics;
use crate::registry::{Direction, MessageType};
use crate::report::{ErrorReport, ErrorReporter, Severity};

/// 异步分发结束后的回调，恰好调用一次
pub type Resume = Box<dyn FnOnce(Result<MessageEvent>) + Send>;

/// 分发结果
#[derive(Debug)]
pub enum DispatchOutcome {
    /// 在调用线程上完成
    Completed(MessageEvent),
    /// 已转交工作线程，结果经 [`Resume`] 交回
    Deferred,
}

struct Registration {
    listener: Arc<dyn MessageListener>,
    sending: Vec<MessageType>,
    receiving: Vec<MessageType>,
}

pub struct ListenerDispatcher {
    outbound: SortedListeners,
    inbound: SortedListeners,
    registrations: DashMap<ListenerId, Registration>,
    next_id: AtomicU64,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<ProtocolMetrics>,
    timing: bool,
    pool: Option<Arc<AsyncWorkerPool>>,
}

impl ListenerDispatcher {
    pub fn new(reporter: Arc<dyn ErrorReporter>, metrics: Arc<ProtocolMetrics>) -> Self {
        Self {
            outbound: SortedListeners::new(),
            inbound: SortedListeners::new(),
            registrations: DashMap::new(),
            next_id: AtomicU64::new(1),
            reporter,
            metrics,
            timing: false,
            pool: None,
        }
    }

    /// 记录每个监听器的耗时
    pub fn with_timing(mut self, timing: bool) -> Self {
        self.timing = timing;
        self
    }

    /// 未设置时 OFF_THREAD 监听器在调用线程上执行
    pub fn with_pool(mut self, pool: Arc<AsyncWorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    fn table(&self, direction: Direction) -> &SortedListeners {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }

    /// 过滤掉方向不符的类型
    fn accept(
        &self,
        listener: &dyn MessageListener,
        whitelist: &ListeningWhitelist,
        direction: Direction,
    ) -> Vec<MessageType> {
        let mut accepted = Vec::with_capacity(whitelist.types().len());
        for message_type in whitelist.types() {
            if message_type.direction() == direction {
                accepted.push(message_type.clone());
            } else {
                warn!(
                    owner = %listener.owner(),
                    message_type = %message_type,
                    expected = %direction,
                    "Ignoring message type registered for the wrong direction"
                );
            }
        }
        accepted.sort();
        accepted
    }

    pub fn register(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sending = self.accept(
            listener.as_ref(),
            listener.sending_whitelist(),
            Direction::Outbound,
        );
        let receiving = self.accept(
            listener.as_ref(),
            listener.receiving_whitelist(),
            Direction::Inbound,
        );

        for (direction, whitelist, types) in [
            (Direction::Outbound, listener.sending_whitelist(), &sending),
            (Direction::Inbound, listener.receiving_whitelist(), &receiving),
        ] {
            for message_type in types {
                self.table(direction).insert(
                    message_type.clone(),
                    ListenerEntry {
                        id,
                        priority: whitelist.priority(),
                        options: whitelist.options(),
                        listener: Arc::clone(&listener),
                    },
                );
            }
        }

        debug!(
            owner = %listener.owner(),
            id = id.value(),
            sending = sending.len(),
            receiving = receiving.len(),
            "Listener registered"
        );
        self.registrations.insert(
            id,
            Registration {
                listener,
                sending,
                receiving,
            },
        );
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let Some((_, registration)) = self.registrations.remove(&id) else {
            return false;
        };
        for message_type in &registration.sending {
            self.outbound.remove(message_type, id);
        }
        for message_type in &registration.receiving {
            self.inbound.remove(message_type, id);
        }
        debug!(owner = %registration.listener.owner(), id = id.value(), "Listener unregistered");
        true
    }

    /// 注销某个所有者的全部监听器
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let ids: Vec<ListenerId> = self
            .registrations
            .iter()
            .filter(|r| r.listener.owner() == owner)
            .map(|r| *r.key())
            .collect();
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }

    pub fn clear(&self) {
        self.registrations.clear();
        self.outbound.clear();
        self.inbound.clear();
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn has_listeners(&self, message_type: &MessageType) -> bool {
        self.table(message_type.direction()).contains(message_type)
    }

    /// 某方向上有监听器的全部类型
    pub fn listener_types(&self, direction: Direction) -> Vec<MessageType> {
        self.table(direction).types()
    }

    pub fn snapshot(&self, message_type: &MessageType) -> Option<ListenerSnapshot> {
        self.table(message_type.direction()).get(message_type)
    }

    /// 入站消息是否需要保留解码前的字节
    pub fn requires_input_buffer(&self, message_type: &MessageType) -> bool {
        message_type.is_inbound()
            && self
                .inbound
                .any_with(message_type, ListenerOptions::INTERCEPT_INPUT_BUFFER)
    }

    pub fn requires_primary_thread(&self, message_type: &MessageType) -> bool {
        self.table(message_type.direction())
            .any_with(message_type, ListenerOptions::PRIMARY_THREAD)
    }

    /// 分发一个事件；存在 OFF_THREAD 监听器且配置了线程池时可能延后完成
    pub fn dispatch(self: &Arc<Self>, mut event: MessageEvent, resume: Resume) -> Result<DispatchOutcome> {
        let Some(entries) = self.snapshot(event.message_type()) else {
            return Ok(DispatchOutcome::Completed(event));
        };
        self.count_intercepted(&event);

        let first_async = entries.iter().position(ListenerEntry::is_async);
        let (pool, first_async) = match (&self.pool, first_async) {
            (Some(pool), Some(index)) => (Arc::clone(pool), index),
            _ => {
                self.invoke_entries(&entries, 0, &mut event)?;
                self.finish(&event);
                return Ok(DispatchOutcome::Completed(event));
            }
        };

        let slot = entries[first_async].priority.slot();
        let end = entries[first_async..]
            .iter()
            .position(|e| e.priority.slot() != slot)
            .map_or(entries.len(), |n| first_async + n);

        // 同级及更低优先级的同步监听器先在调用线程上完成
        for entry in entries[..end].iter().filter(|e| !e.is_async()) {
            self.call(entry, &mut event)?;
        }

        trace!(message_type = %event.message_type(), "Deferring dispatch to async listeners");
        let this = Arc::clone(self);
        let job = move || {
            let result = this.resume_async(&entries, first_async, end, event);
            resume(result);
        };
        if let Err(job) = pool.submit(job) {
            warn!("Async listener pool is stopped, running async listeners inline");
            job();
        }
        Ok(DispatchOutcome::Deferred)
    }

    fn resume_async(
        &self,
        entries: &ListenerSnapshot,
        from: usize,
        end: usize,
        mut event: MessageEvent,
    ) -> Result<MessageEvent> {
        for entry in entries[from..end].iter().filter(|e| e.is_async()) {
            self.call(entry, &mut event)?;
        }
        self.invoke_entries(entries, end, &mut event)?;
        self.finish(&event);
        Ok(event)
    }

    /// 在当前线程上同步分发，OFF_THREAD 监听器也在此执行
    pub fn invoke(&self, event: &mut MessageEvent) -> Result<()> {
        let Some(entries) = self.snapshot(event.message_type()) else {
            return Ok(());
        };
        self.count_intercepted(event);
        self.invoke_entries(&entries, 0, event)?;
        self.finish(event);
        Ok(())
    }

    /// 只通知 MONITOR 监听器，用于静默发送
    pub fn invoke_monitors(&self, event: &mut MessageEvent) -> Result<()> {
        let Some(entries) = self.snapshot(event.message_type()) else {
            return Ok(());
        };
        for entry in entries.iter().filter(|e| e.priority == ListenerPriority::Monitor) {
            self.call(entry, event)?;
        }
        event.set_read_only(false);
        Ok(())
    }

    fn invoke_entries(&self, entries: &[ListenerEntry], start: usize, event: &mut MessageEvent) -> Result<()> {
        for entry in &entries[start..] {
            self.call(entry, event)?;
        }
        Ok(())
    }

    fn count_intercepted(&self, event: &MessageEvent) {
        self.metrics
            .intercepted_total
            .with_label_values(&[event.direction().as_str()])
            .inc();
    }

    fn finish(&self, event: &MessageEvent) {
        event.set_read_only(false);
        if event.is_cancelled() {
            self.metrics
                .cancelled_total
                .with_label_values(&[event.direction().as_str()])
                .inc();
        }
    }

    fn call(&self, entry: &ListenerEntry, event: &mut MessageEvent) -> Result<()> {
        let direction = event.direction();
        let method = match direction {
            Direction::Outbound => "on_sending",
            Direction::Inbound => "on_receiving",
        };
        event.set_read_only(entry.priority.is_monitor());

        let started = self.timing.then(Instant::now);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match direction {
            Direction::Outbound => entry.listener.on_sending(event),
            Direction::Inbound => entry.listener.on_receiving(event),
        }));
        if let Some(started) = started {
            self.metrics
                .listener_duration_seconds
                .with_label_values(&[entry.owner()])
                .observe(started.elapsed().as_secs_f64());
        }

        let error = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(ListenerError::Fatal(source))) => {
                event.set_read_only(false);
                return Err(PacketError::ListenerFatal {
                    owner: entry.owner().to_string(),
                    method: method.to_string(),
                    source,
                });
            }
            Ok(Err(ListenerError::Fault(err))) => err,
            Err(payload) => anyhow!("listener panicked: {}", panic_message(payload.as_ref())),
        };

        self.metrics
            .listener_faults_total
            .with_label_values(&[entry.owner()])
            .inc();
        self.reporter.report(
            ErrorReport::new(entry.owner(), format!("{method}() failed"))
                .severity(Severity::Warning)
                .error(PacketError::ListenerFault {
                    owner: entry.owner().to_string(),
                    method: method.to_string(),
                    source: error,
                })
                .detail("message_type", event.message_type())
                .detail("channel", event.channel_id())
                .detail("priority", entry.priority),
        );
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
