//! 处理延迟
//!
//! 监听器可以在回调返回后继续持有一条消息：每次 [`MessageEvent::increment_processing_delay`]
//! 领取一个 [`TransmissionSignal`]，全部信号放行后消息才进入投递队列。
//! 超过配置的等待时间仍未放行的消息被丢弃，同一通道后续的消息随之继续投递。

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::MessageEvent;

/// 挂起结束时的回调；`expired` 表示因超时结束
pub(crate) type Release = Box<dyn FnOnce(MessageEvent, bool) + Send>;

#[derive(Default)]
struct DelayState {
    pending: usize,
    parked: Option<(MessageEvent, Release)>,
}

/// 一条消息上尚未放行的延迟计数，随事件一起克隆共享
#[derive(Clone, Default)]
pub struct ProcessingDelay {
    state: Arc<Mutex<DelayState>>,
}

impl ProcessingDelay {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 尚未放行的信号数
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    pub fn is_delayed(&self) -> bool {
        self.pending() > 0
    }

    pub(crate) fn increment(&self) -> TransmissionSignal {
        self.state.lock().pending += 1;
        TransmissionSignal {
            delay: self.clone(),
        }
    }

    /// 挂起事件等待放行；计数已归零时原样交还
    pub(crate) fn park(
        &self,
        event: MessageEvent,
        release: Release,
    ) -> std::result::Result<(), (MessageEvent, Release)> {
        let mut state = self.state.lock();
        if state.pending == 0 {
            return Err((event, release));
        }
        state.parked = Some((event, release));
        Ok(())
    }

    /// 等待超时；仍挂起的事件以过期状态交还，返回是否有事件过期
    pub(crate) fn expire(&self) -> bool {
        let parked = {
            let mut state = self.state.lock();
            state.pending = 0;
            state.parked.take()
        };
        match parked {
            Some((event, release)) => {
                release(event, true);
                true
            }
            None => false,
        }
    }

    fn signal(&self) -> bool {
        let parked = {
            let mut state = self.state.lock();
            state.pending = state.pending.saturating_sub(1);
            if state.pending > 0 {
                return false;
            }
            state.parked.take()
        };
        match parked {
            Some((event, release)) => {
                release(event, false);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ProcessingDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProcessingDelay")
            .field("pending", &state.pending)
            .field("parked", &state.parked.is_some())
            .finish()
    }
}

/// 放行一次处理延迟；可以移交到任意线程
#[must_use = "the message stays held until the signal is sent or the processing timeout expires"]
pub struct TransmissionSignal {
    delay: ProcessingDelay,
}

impl TransmissionSignal {
    /// 返回这次放行是否把消息交给了投递队列
    pub fn signal(self) -> bool {
        self.delay.signal()
    }
}

impl fmt::Debug for TransmissionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionSignal")
            .field("pending", &self.delay.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::accessor::StructureCache;
    use crate::events::MessageContainer;
    use crate::reflect::{ClassBuilder, Modifiers, OpaqueRecord, builtin::*};
    use crate::registry::{Direction, MessageType, Phase};

    fn event() -> MessageEvent {
        let class = ClassBuilder::new("Chat")
            .field("message", &STRING, Modifiers::PRIVATE)
            .build();
        let cache = StructureCache::new();
        let container = MessageContainer::new(
            MessageType::new(Phase::Play, Direction::Outbound, "Chat"),
            OpaqueRecord::new(&class),
            &cache.modifier(&class),
        )
        .unwrap();
        MessageEvent::new(container, Arc::from("c1"), None, true)
    }

    fn recorder(log: &Arc<Mutex<Vec<bool>>>) -> Release {
        let log = Arc::clone(log);
        Box::new(move |_, expired| log.lock().push(expired))
    }

    #[test]
    fn test_released_after_last_signal() {
        let delay = ProcessingDelay::new();
        let first = delay.increment();
        let second = delay.increment();
        let log = Arc::new(Mutex::new(Vec::new()));

        assert!(delay.park(event(), recorder(&log)).is_ok());
        assert!(!first.signal());
        assert!(log.lock().is_empty());
        assert!(second.signal());
        assert_eq!(*log.lock(), vec![false]);
        assert!(!delay.expire());
    }

    #[test]
    fn test_signal_before_park_hands_event_back() {
        let delay = ProcessingDelay::new();
        let signal = delay.increment();
        assert!(!signal.signal());

        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(delay.park(event(), recorder(&log)).is_err());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_expiry_wins_over_late_signal() {
        let delay = ProcessingDelay::new();
        let signal = delay.increment();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let release: Release = Box::new(move |_, expired| {
            assert!(expired);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(delay.park(event(), release).is_ok());
        assert!(delay.expire());
        assert!(!signal.signal());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
