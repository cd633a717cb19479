//! 按票据顺序投递
//!
//! 每条消息进入拦截器时领取一张票据；处理完成的顺序可能因异步监听器而打乱，
//! 投递总是按票据顺序进行。正在投递的线程负责把后续已就绪的条目一并送出，
//! 投递过程中重入（例如投递触发新的发送）只会排队，不会死锁。

use std::collections::BTreeMap;

use parking_lot::Mutex;

struct OrderState<T> {
    issued: u64,
    next: u64,
    ready: BTreeMap<u64, T>,
    draining: bool,
}

pub(crate) struct OrderedDelivery<T> {
    state: Mutex<OrderState<T>>,
}

impl<T> OrderedDelivery<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(OrderState {
                issued: 0,
                next: 0,
                ready: BTreeMap::new(),
                draining: false,
            }),
        }
    }

    pub(crate) fn ticket(&self) -> u64 {
        let mut state = self.state.lock();
        let ticket = state.issued;
        state.issued += 1;
        ticket
    }

    /// 登记完成的条目，并投递所有按顺序就绪的条目
    pub(crate) fn complete<F>(&self, ticket: u64, item: T, mut deliver: F)
    where
        F: FnMut(T),
    {
        {
            let mut state = self.state.lock();
            state.ready.insert(ticket, item);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        // 投递回调 panic 时由守卫交还投递权
        let _draining = DrainGuard(&self.state);
        loop {
            let item = {
                let mut state = self.state.lock();
                let next = state.next;
                match state.ready.remove(&next) {
                    Some(item) => {
                        state.next += 1;
                        item
                    }
                    None => return,
                }
            };
            deliver(item);
        }
    }

    /// 已领取但尚未投递的票据数
    pub(crate) fn pending(&self) -> u64 {
        let state = self.state.lock();
        state.issued - state.next
    }
}

struct DrainGuard<'a, T>(&'a Mutex<OrderState<T>>);

impl<T> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        self.0.lock().draining = false;
    }
}
