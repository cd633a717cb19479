//! 通道拦截器
//!
//! 状态机：`Uninjected -> Injected -> Closed`，状态转换在每通道的锁内完成。
//! 注入后宿主的出站/入站句柄被替换为代理实现：
//! - 出站：宿主写出的消息先经过监听器，可被替换、取消或原样放行；网络标记上的输出处理器
//!   在宿主编码之后按优先级改写字节
//! - 入站：帧由宿主的解码例程解码，解码后的消息经过监听器再交给宿主；只有当某个监听器
//!   请求原始字节时才把帧保存在网络标记中
//! - 拦截器自己发出的合成消息可被标记为"已处理"，下一次经过时跳过分发，标记只生效一次
//!
//! 同一通道同一方向的投递顺序与进入顺序一致，即使部分消息因异步监听器而延后完成。
//! 被监听器延迟的消息继续占用票据，放行后按原顺序投递，超时未放行的被丢弃。
//! 通道关闭后仍在途的消息不再交给宿主。

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::host::{ChannelId, HostChannel, InboundHandler, OutboundHandler, PrimaryThread};
use super::ordering::OrderedDelivery;
use crate::accessor::StructureCache;
use crate::dispatch::{AsyncWorkerPool, DispatchOutcome, ListenerDispatcher, Resume};
use crate::error::{PacketError, Result};
use crate::events::{MessageContainer, MessageEvent, NetworkMarker, ProcessingDelay};
use crate::metrics::ProtocolMetrics;
use crate::reflect::RecordRef;
use crate::registry::{Direction, MessageRegistry, Phase};
use crate::report::{ErrorReport, ErrorReporter, Severity};

/// 拦截器共享的协作方
#[derive(Clone)]
pub struct InterceptorContext {
    pub registry: Arc<MessageRegistry>,
    pub dispatcher: Arc<ListenerDispatcher>,
    pub structures: Arc<StructureCache>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub metrics: Arc<ProtocolMetrics>,
    /// 设置后，带 PRIMARY_THREAD 选项的监听器被转到宿主主线程执行
    pub primary: Option<Arc<dyn PrimaryThread>>,
    /// 延迟放行的超时计时；未设置时使用独立的计时线程
    pub pool: Option<Arc<AsyncWorkerPool>>,
    /// 被延迟的消息等待放行的最长时间
    pub processing_timeout: Duration,
    /// 记录被跳过的未知/非法消息
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninjected,
    Injected,
    Closed,
}

struct Originals {
    outbound: Arc<dyn OutboundHandler>,
    inbound: Arc<dyn InboundHandler>,
    installed_outbound: Arc<dyn OutboundHandler>,
    installed_inbound: Arc<dyn InboundHandler>,
}

enum Prepared {
    /// 不经分发直接交给宿主
    Pass(RecordRef),
    /// 不需要分发，但带有网络标记
    Ready(MessageEvent),
    Dispatch(MessageEvent),
}

enum Delivery {
    Pass(RecordRef),
    Event(MessageEvent),
    /// 等待放行超时
    Expired(MessageEvent),
    Failed(PacketError),
}

pub struct ChannelInjector {
    id: ChannelId,
    channel: Arc<dyn HostChannel>,
    context: InterceptorContext,
    state: Mutex<ChannelState>,
    phase: RwLock<Phase>,
    originals: OnceCell<Originals>,
    saved_markers: DashMap<u64, NetworkMarker>,
    skip: DashSet<u64>,
    outbound_order: OrderedDelivery<Delivery>,
    inbound_order: OrderedDelivery<Delivery>,
}

impl ChannelInjector {
    pub fn new(channel: Arc<dyn HostChannel>, context: InterceptorContext, phase: Phase) -> Arc<Self> {
        Arc::new(Self {
            id: Arc::from(channel.id()),
            channel,
            context,
            state: Mutex::new(ChannelState::Uninjected),
            phase: RwLock::new(phase),
            originals: OnceCell::new(),
            saved_markers: DashMap::new(),
            skip: DashSet::new(),
            outbound_order: OrderedDelivery::new(),
            inbound_order: OrderedDelivery::new(),
        })
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn channel(&self) -> &Arc<dyn HostChannel> {
        &self.channel
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    pub fn is_injected(&self) -> bool {
        self.state() == ChannelState::Injected
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    pub fn set_phase(&self, phase: Phase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            debug!(channel = %self.id, from = %previous, to = %phase, "Channel phase changed");
        }
    }

    /// 尚未投递的消息数（两个方向合计）
    pub fn pending_deliveries(&self) -> u64 {
        self.outbound_order.pending() + self.inbound_order.pending()
    }

    /// 安装代理句柄；重复注入返回 `Ok(false)`，已关闭的通道不能再注入
    pub fn inject(self: &Arc<Self>) -> Result<bool> {
        let mut state = self.state.lock();
        match *state {
            ChannelState::Injected => {
                debug!(
                    channel = %self.id,
                    "{}",
                    PacketError::InjectionConflict(self.id.to_string())
                );
                return Ok(false);
            }
            ChannelState::Closed => return Err(PacketError::ChannelClosed(self.id.to_string())),
            ChannelState::Uninjected => {}
        }
        if !self.channel.is_open() {
            *state = ChannelState::Closed;
            return Err(PacketError::ChannelClosed(self.id.to_string()));
        }

        let weak = Arc::downgrade(self);
        let outbound = self.channel.outbound().get();
        let inbound = self.channel.inbound().get();
        let installed_outbound: Arc<dyn OutboundHandler> = Arc::new(InterceptingOutbound {
            injector: weak.clone(),
            original: Arc::clone(&outbound),
        });
        let installed_inbound: Arc<dyn InboundHandler> = Arc::new(InterceptingInbound {
            injector: weak,
            original: Arc::clone(&inbound),
        });

        if !self
            .channel
            .outbound()
            .compare_and_replace(&outbound, Arc::clone(&installed_outbound))
        {
            return Err(PacketError::InjectionConflict(self.id.to_string()));
        }
        if !self
            .channel
            .inbound()
            .compare_and_replace(&inbound, Arc::clone(&installed_inbound))
        {
            self.channel
                .outbound()
                .compare_and_replace(&installed_outbound, Arc::clone(&outbound));
            return Err(PacketError::InjectionConflict(self.id.to_string()));
        }

        let _ = self.originals.set(Originals {
            outbound,
            inbound,
            installed_outbound,
            installed_inbound,
        });
        *state = ChannelState::Injected;
        self.context.metrics.injected_channels.inc();
        info!(channel = %self.id, phase = %self.phase(), "Channel injected");
        Ok(true)
    }

    /// 换回原句柄并进入终态；可重复调用
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut *state, ChannelState::Closed);
        match previous {
            ChannelState::Closed => return false,
            ChannelState::Uninjected => {}
            ChannelState::Injected => {
                if let Some(originals) = self.originals.get() {
                    let restored_out = self.channel.outbound().compare_and_replace(
                        &originals.installed_outbound,
                        Arc::clone(&originals.outbound),
                    );
                    let restored_in = self.channel.inbound().compare_and_replace(
                        &originals.installed_inbound,
                        Arc::clone(&originals.inbound),
                    );
                    if !restored_out || !restored_in {
                        warn!(channel = %self.id, "Channel handlers were replaced by someone else, leaving them in place");
                    }
                }
                self.context.metrics.injected_channels.dec();
            }
        }
        drop(state);

        self.saved_markers.clear();
        self.skip.clear();
        info!(channel = %self.id, "Channel interceptor closed");
        true
    }

    fn ensure_injected(&self) -> Result<()> {
        match self.state() {
            ChannelState::Injected => Ok(()),
            ChannelState::Closed => Err(PacketError::ChannelClosed(self.id.to_string())),
            ChannelState::Uninjected => Err(PacketError::ChannelNotInjected(self.id.to_string())),
        }
    }

    /// 经拦截器发送一条出站消息
    ///
    /// `filtered = false` 时只通知 MONITOR 监听器，随后这条消息经过拦截器时跳过分发一次。
    pub fn send_message(
        self: &Arc<Self>,
        container: MessageContainer,
        marker: Option<NetworkMarker>,
        filtered: bool,
    ) -> Result<()> {
        self.synthetic(Direction::Outbound, container, marker, filtered)
    }

    /// 模拟收到一条入站消息
    pub fn receive_message(
        self: &Arc<Self>,
        container: MessageContainer,
        marker: Option<NetworkMarker>,
        filtered: bool,
    ) -> Result<()> {
        self.synthetic(Direction::Inbound, container, marker, filtered)
    }

    /// 绕过所有处理直接写出已编码的帧
    pub fn send_wire(&self, frame: Bytes) -> Result<()> {
        self.ensure_injected()?;
        let handler = match self.originals.get() {
            Some(originals) => Arc::clone(&originals.outbound),
            None => self.channel.outbound().get(),
        };
        handler.write_frame(frame).map_err(|source| PacketError::Transport {
            channel: self.id.to_string(),
            source,
        })
    }

    fn synthetic(
        self: &Arc<Self>,
        direction: Direction,
        container: MessageContainer,
        marker: Option<NetworkMarker>,
        filtered: bool,
    ) -> Result<()> {
        self.ensure_injected()?;
        if container.message_type().direction() != direction {
            return Err(PacketError::InvalidArgument(format!(
                "{} is not an {direction} message",
                container.message_type()
            )));
        }

        let record = Arc::clone(container.handle());
        if !filtered {
            let mut event = MessageEvent::new(container, Arc::clone(&self.id), None, false);
            self.context.dispatcher.invoke_monitors(&mut event)?;
            self.skip.insert(record.id());
        }
        if let Some(marker) = marker {
            self.saved_markers.insert(record.id(), marker);
        }
        self.process(direction, record, None);
        Ok(())
    }

    fn order(&self, direction: Direction) -> &OrderedDelivery<Delivery> {
        match direction {
            Direction::Outbound => &self.outbound_order,
            Direction::Inbound => &self.inbound_order,
        }
    }

    fn process_frame(self: &Arc<Self>, frame: Bytes) -> Result<()> {
        let Some(codec) = self.channel.codec() else {
            self.fail(PacketError::CodecUnavailable(self.id.to_string()));
            return Err(PacketError::CodecUnavailable(self.id.to_string()));
        };
        let record = codec
            .decode(self.phase(), &frame)
            .map_err(|source| PacketError::Codec {
                channel: self.id.to_string(),
                source,
            })?;
        self.process(Direction::Inbound, record, Some(frame));
        Ok(())
    }

    fn process(self: &Arc<Self>, direction: Direction, record: RecordRef, frame: Option<Bytes>) {
        let ticket = self.order(direction).ticket();
        match self.prepare(direction, record, frame) {
            Prepared::Pass(record) => self.complete(direction, ticket, Delivery::Pass(record)),
            Prepared::Ready(event) => self.complete(direction, ticket, Delivery::Event(event)),
            Prepared::Dispatch(event) => self.schedule_dispatch(direction, ticket, event),
        }
    }

    fn prepare(&self, direction: Direction, record: RecordRef, frame: Option<Bytes>) -> Prepared {
        let id = record.id();
        let saved = self.saved_markers.remove(&id).map(|(_, marker)| marker);
        let skipped = self.skip.remove(&id).is_some();

        let Some(message_type) = self.context.registry.type_of_record(&record) else {
            if self.context.debug {
                debug!(channel = %self.id, class = %record.class().name(), "Skipping unregistered message");
            }
            return Prepared::Pass(record);
        };
        if message_type.direction() != direction || !self.context.registry.is_legal(&message_type, self.phase()) {
            if self.context.debug {
                debug!(
                    channel = %self.id,
                    message_type = %message_type,
                    phase = %self.phase(),
                    "Skipping message that is illegal here"
                );
            }
            return Prepared::Pass(record);
        }

        let dispatch = !skipped && self.context.dispatcher.has_listeners(&message_type);
        let marker = saved.or_else(|| match frame {
            Some(frame) if dispatch && self.context.dispatcher.requires_input_buffer(&message_type) => {
                Some(NetworkMarker::with_input_buffer(direction, frame))
            }
            _ => None,
        });
        if !dispatch && marker.is_none() {
            return Prepared::Pass(record);
        }

        let structure = self.context.structures.modifier(record.class());
        let container = match MessageContainer::new(message_type, Arc::clone(&record), &structure) {
            Ok(container) => container,
            Err(err) => {
                warn!(channel = %self.id, error = %err, "Cannot wrap message, passing it through");
                return Prepared::Pass(record);
            }
        };
        let event = MessageEvent::new(container, Arc::clone(&self.id), marker, !skipped);
        if dispatch {
            Prepared::Dispatch(event)
        } else {
            Prepared::Ready(event)
        }
    }

    fn schedule_dispatch(self: &Arc<Self>, direction: Direction, ticket: u64, event: MessageEvent) {
        if let Some(primary) = &self.context.primary {
            if !primary.is_primary() && self.context.dispatcher.requires_primary_thread(event.message_type()) {
                trace!(channel = %self.id, message_type = %event.message_type(), "Redispatching to primary thread");
                let this = Arc::clone(self);
                primary.execute(Box::new(move || this.dispatch_now(direction, ticket, event)));
                return;
            }
        }
        self.dispatch_now(direction, ticket, event);
    }

    fn dispatch_now(self: &Arc<Self>, direction: Direction, ticket: u64, event: MessageEvent) {
        let this = Arc::clone(self);
        let resume: Resume = Box::new(move |result| {
            match result {
                Ok(event) => this.settle(direction, ticket, event),
                Err(err) => this.complete(direction, ticket, Delivery::Failed(err)),
            }
        });
        match self.context.dispatcher.dispatch(event, resume) {
            Ok(DispatchOutcome::Completed(event)) => self.settle(direction, ticket, event),
            Ok(DispatchOutcome::Deferred) => {}
            Err(err) => self.complete(direction, ticket, Delivery::Failed(err)),
        }
    }

    /// 分发结束；仍被监听器延迟的消息挂起，票据保持占用直到放行或超时
    fn settle(self: &Arc<Self>, direction: Direction, ticket: u64, event: MessageEvent) {
        let Some(delay) = event.processing_delay().filter(|d| d.is_delayed()).cloned() else {
            self.complete(direction, ticket, Delivery::Event(event));
            return;
        };

        let this = Arc::clone(self);
        let release = Box::new(move |event: MessageEvent, expired: bool| {
            let delivery = if expired {
                Delivery::Expired(event)
            } else {
                Delivery::Event(event)
            };
            this.complete(direction, ticket, delivery);
        });
        match delay.park(event, release) {
            Ok(()) => {
                trace!(channel = %self.id, ticket, "Holding message until transmission is signalled");
                self.schedule_expiry(delay);
            }
            // 回调返回前已全部放行
            Err((event, release)) => release(event, false),
        }
    }

    fn schedule_expiry(&self, delay: ProcessingDelay) {
        let timeout = self.context.processing_timeout;
        let expire = move || {
            delay.expire();
        };
        let expire = match &self.context.pool {
            Some(pool) => match pool.schedule(timeout, expire) {
                Ok(()) => return,
                Err(expire) => expire,
            },
            None => expire,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("packet-hook-delay-{}", self.id))
            .spawn(move || {
                std::thread::sleep(timeout);
                expire();
            });
        if let Err(err) = spawned {
            warn!(channel = %self.id, error = %err, "Cannot start processing timeout timer");
        }
    }

    fn complete(self: &Arc<Self>, direction: Direction, ticket: u64, delivery: Delivery) {
        self.order(direction)
            .complete(ticket, delivery, |delivery| self.deliver(direction, delivery));
    }

    fn deliver(self: &Arc<Self>, direction: Direction, delivery: Delivery) {
        if self.state() == ChannelState::Closed {
            debug!(channel = %self.id, direction = %direction, "Dropping late delivery on a closed channel");
            return;
        }
        let Some(originals) = self.originals.get() else {
            warn!(channel = %self.id, "Dropping message on a channel that was never injected");
            return;
        };
        match delivery {
            Delivery::Pass(record) => {
                self.forward(direction, originals, record);
            }
            Delivery::Failed(err) => self.fail(err),
            Delivery::Expired(event) => {
                warn!(
                    channel = %self.id,
                    message_type = %event.message_type(),
                    timeout_ms = self.context.processing_timeout.as_millis() as u64,
                    "Delayed message was never released, dropping it"
                );
                self.context
                    .metrics
                    .expired_total
                    .with_label_values(&[direction.as_str()])
                    .inc();
                self.context.reporter.report(
                    ErrorReport::new("interceptor", "processing delay expired")
                        .severity(Severity::Warning)
                        .detail("channel", &self.id)
                        .detail("message_type", event.message_type()),
                );
            }
            Delivery::Event(mut event) => {
                if event.is_cancelled() {
                    trace!(channel = %self.id, message_type = %event.message_type(), "Message cancelled");
                    return;
                }
                let mut marker = event.take_marker();
                let record = Arc::clone(event.container().handle());
                let written = match marker.as_ref().filter(|m| m.has_output_handlers()) {
                    Some(marker) => self.write_transformed(originals, &event, marker, &record),
                    None => self.forward(direction, originals, record),
                };
                if let Some(marker) = marker.as_mut().filter(|m| m.has_post_work()) {
                    if written {
                        self.post_delivery(&event, marker);
                    }
                }
            }
        }
    }

    fn forward(&self, direction: Direction, originals: &Originals, record: RecordRef) -> bool {
        let result = match direction {
            Direction::Outbound => originals.outbound.write(record),
            Direction::Inbound => originals.inbound.on_message(record),
        };
        match result {
            Ok(()) => true,
            Err(source) => {
                self.report_transport(source);
                false
            }
        }
    }

    /// 宿主编码后依次交给输出处理器
    fn write_transformed(
        &self,
        originals: &Originals,
        event: &MessageEvent,
        marker: &NetworkMarker,
        record: &RecordRef,
    ) -> bool {
        let Some(codec) = self.channel.codec() else {
            self.fail(PacketError::CodecUnavailable(self.id.to_string()));
            return false;
        };
        let mut frame = match codec.encode(self.phase(), record) {
            Ok(frame) => frame,
            Err(source) => {
                self.context.reporter.report(
                    ErrorReport::new("interceptor", "host encode failed")
                        .severity(Severity::Warning)
                        .error(PacketError::Codec {
                            channel: self.id.to_string(),
                            source,
                        })
                        .detail("message_type", event.message_type()),
                );
                return false;
            }
        };

        for handler in marker.output_handlers() {
            match guarded(|| handler.handle(event, frame.clone())) {
                Ok(changed) => frame = changed,
                Err(err) => self.context.reporter.report(
                    ErrorReport::new(handler.owner(), "output handler failed")
                        .severity(Severity::Warning)
                        .error(err)
                        .detail("channel", &self.id)
                        .detail("message_type", event.message_type()),
                ),
            }
        }

        match originals.outbound.write_frame(frame) {
            Ok(()) => true,
            Err(source) => {
                self.report_transport(source);
                false
            }
        }
    }

    /// 投递完成后的回调以及排定的后续消息
    fn post_delivery(self: &Arc<Self>, event: &MessageEvent, marker: &mut NetworkMarker) {
        for listener in marker.post_listeners() {
            if let Err(err) = guarded(|| listener.call(event)) {
                self.context.reporter.report(
                    ErrorReport::new(listener.owner(), "post listener failed")
                        .severity(Severity::Warning)
                        .error(err)
                        .detail("channel", &self.id),
                );
            }
        }

        for scheduled in marker.take_scheduled() {
            let container = scheduled.container().clone();
            let message_type = container.message_type().clone();
            let result = match message_type.direction() {
                Direction::Outbound => self.send_message(container, None, scheduled.is_filtered()),
                Direction::Inbound => self.receive_message(container, None, scheduled.is_filtered()),
            };
            if let Err(err) = result {
                self.context.reporter.report(
                    ErrorReport::new("interceptor", "scheduled message failed")
                        .severity(Severity::Warning)
                        .error(err)
                        .detail("channel", &self.id)
                        .detail("message_type", &message_type),
                );
            }
        }
    }

    fn report_transport(&self, source: anyhow::Error) {
        self.context.reporter.report(
            ErrorReport::new("interceptor", "host handler failed")
                .severity(Severity::Warning)
                .error(PacketError::Transport {
                    channel: self.id.to_string(),
                    source,
                }),
        );
    }

    /// 致命错误只关闭这一条通道
    fn fail(&self, err: PacketError) {
        warn!(channel = %self.id, error = %err, "Fatal interceptor error, closing channel");
        let reason = err.to_string();
        self.context.reporter.report(
            ErrorReport::new("interceptor", "fatal channel error")
                .error(err)
                .detail("channel", &self.id),
        );
        self.close();
        self.channel.disconnect(&reason);
    }
}

impl fmt::Debug for ChannelInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInjector")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("phase", &self.phase())
            .finish()
    }
}

/// 把回调中的 panic 转为错误，避免打断投递循环
fn guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(anyhow!("callback panicked")),
    }
}

struct InterceptingOutbound {
    injector: Weak<ChannelInjector>,
    original: Arc<dyn OutboundHandler>,
}

impl OutboundHandler for InterceptingOutbound {
    fn write(&self, message: RecordRef) -> anyhow::Result<()> {
        match self.injector.upgrade() {
            Some(injector) if injector.is_injected() => {
                injector.process(Direction::Outbound, message, None);
                Ok(())
            }
            _ => self.original.write(message),
        }
    }

    fn write_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        self.original.write_frame(frame)
    }
}

struct InterceptingInbound {
    injector: Weak<ChannelInjector>,
    original: Arc<dyn InboundHandler>,
}

impl InboundHandler for InterceptingInbound {
    fn on_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        match self.injector.upgrade() {
            Some(injector) if injector.is_injected() => Ok(injector.process_frame(frame)?),
            _ => self.original.on_frame(frame),
        }
    }

    fn on_message(&self, message: RecordRef) -> anyhow::Result<()> {
        match self.injector.upgrade() {
            Some(injector) if injector.is_injected() => {
                injector.process(Direction::Inbound, message, None);
                Ok(())
            }
            _ => self.original.on_message(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::host::{HandlerSlot, HostCodec};
    use crate::reflect::OpaqueRecord;
    use crate::report::TracingErrorReporter;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Sink;

    impl OutboundHandler for Sink {
        fn write(&self, _message: RecordRef) -> anyhow::Result<()> {
            Ok(())
        }

        fn write_frame(&self, _frame: Bytes) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl InboundHandler for Sink {
        fn on_frame(&self, _frame: Bytes) -> anyhow::Result<()> {
            Ok(())
        }

        fn on_message(&self, _message: RecordRef) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct BareChannel {
        outbound: HandlerSlot<dyn OutboundHandler>,
        inbound: HandlerSlot<dyn InboundHandler>,
        disconnected: AtomicBool,
    }

    impl BareChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                outbound: HandlerSlot::new(Arc::new(Sink) as Arc<dyn OutboundHandler>),
                inbound: HandlerSlot::new(Arc::new(Sink) as Arc<dyn InboundHandler>),
                disconnected: AtomicBool::new(false),
            })
        }
    }

    impl HostChannel for BareChannel {
        fn id(&self) -> &str {
            "bare"
        }

        fn outbound(&self) -> &HandlerSlot<dyn OutboundHandler> {
            &self.outbound
        }

        fn inbound(&self) -> &HandlerSlot<dyn InboundHandler> {
            &self.inbound
        }

        fn codec(&self) -> Option<Arc<dyn HostCodec>> {
            None
        }

        fn is_open(&self) -> bool {
            !self.disconnected.load(Ordering::Acquire)
        }

        fn disconnect(&self, _reason: &str) {
            self.disconnected.store(true, Ordering::Release);
        }
    }

    fn context() -> InterceptorContext {
        let metrics = Arc::new(ProtocolMetrics::new().unwrap());
        let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingErrorReporter);
        InterceptorContext {
            registry: Arc::new(MessageRegistry::new()),
            dispatcher: Arc::new(ListenerDispatcher::new(Arc::clone(&reporter), Arc::clone(&metrics))),
            structures: Arc::new(StructureCache::new()),
            reporter,
            metrics,
            primary: None,
            pool: None,
            processing_timeout: Duration::from_millis(50),
            debug: true,
        }
    }

    #[test]
    fn test_state_machine_is_idempotent() {
        let channel = BareChannel::new();
        let original = channel.outbound().get();
        let injector = ChannelInjector::new(channel.clone(), context(), Phase::Play);

        assert!(matches!(
            injector.send_wire(Bytes::new()),
            Err(PacketError::ChannelNotInjected(_))
        ));
        assert!(injector.inject().unwrap());
        assert!(!injector.inject().unwrap());
        assert!(!Arc::ptr_eq(&channel.outbound().get(), &original));
        assert_eq!(injector.context.metrics.injected_channels.get(), 1);

        assert!(injector.close());
        assert!(!injector.close());
        assert!(Arc::ptr_eq(&channel.outbound().get(), &original));
        assert_eq!(injector.context.metrics.injected_channels.get(), 0);
        assert!(matches!(injector.inject(), Err(PacketError::ChannelClosed(_))));
    }

    #[test]
    fn test_missing_codec_closes_only_this_channel() {
        let channel = BareChannel::new();
        let injector = ChannelInjector::new(channel.clone(), context(), Phase::Play);
        injector.inject().unwrap();

        let result = channel.inbound().get().on_frame(Bytes::from_static(b"\x00"));
        assert!(result.is_err());
        assert_eq!(injector.state(), ChannelState::Closed);
        assert!(!channel.is_open());
    }

    #[test]
    fn test_unregistered_messages_pass_through() {
        let channel = BareChannel::new();
        let injector = ChannelInjector::new(channel.clone(), context(), Phase::Play);
        injector.inject().unwrap();

        let class = crate::reflect::ClassBuilder::new("Unknown").build();
        channel.outbound().get().write(OpaqueRecord::new(&class)).unwrap();
        assert_eq!(injector.pending_deliveries(), 0);
    }
}
