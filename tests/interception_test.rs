// 通道拦截集成测试：内存宿主通道 + 协议管理器
mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use parking_lot::Mutex;

use common::{Fixture, wait_until};
use flare_packet_hook::channel::{ChannelState, PrimaryThread};
use flare_packet_hook::events::{OutputHandler, PostListener, ScheduledMessage};
use flare_packet_hook::{
    FnListener, ListenerError, ListenerOptions, ListenerPriority, ListeningWhitelist, MessageType,
    PacketError, Phase, ProtocolConfig, ProtocolManager,
};

fn manager(fixture: &Fixture, async_workers: usize) -> ProtocolManager {
    let mut config = ProtocolConfig::default();
    config.dispatch.async_workers = async_workers;
    config.specializer.enabled = false;
    ProtocolManager::builder()
        .config(config)
        .registry(Arc::clone(&fixture.registry))
        .build()
        .unwrap()
}

fn whitelist(message_type: MessageType, priority: ListenerPriority) -> ListeningWhitelist {
    ListeningWhitelist::builder()
        .priority(priority)
        .message_type(message_type)
        .build()
}

fn text_of(event: &flare_packet_hook::MessageEvent) -> String {
    event
        .container()
        .strings()
        .read(0)
        .ok()
        .flatten()
        .unwrap_or_default()
}

#[test]
fn test_cancelled_message_reaches_monitor_but_not_transport() {
    let _ = tracing_subscriber::fmt::try_init();
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let chat = fixture.chat_out_type();
    let log = Arc::new(Mutex::new(Vec::new()));
    let monitor_saw = Arc::new(Mutex::new(None));

    let low_log = Arc::clone(&log);
    manager
        .add_listener(
            FnListener::builder("low")
                .sending(whitelist(chat.clone(), ListenerPriority::Low), move |_| {
                    low_log.lock().push("low");
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    let normal_log = Arc::clone(&log);
    manager
        .add_listener(
            FnListener::builder("normal")
                .sending(whitelist(chat.clone(), ListenerPriority::Normal), move |event| {
                    normal_log.lock().push("normal");
                    event.set_cancelled(true)?;
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    let monitor_log = Arc::clone(&log);
    let saw = Arc::clone(&monitor_saw);
    manager
        .add_listener(
            FnListener::builder("monitor")
                .sending(whitelist(chat, ListenerPriority::Monitor), move |event| {
                    monitor_log.lock().push("monitor");
                    *saw.lock() = Some(event.is_cancelled());
                    Ok(())
                })
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("hello")).unwrap();

    assert_eq!(*log.lock(), vec!["low", "normal", "monitor"]);
    assert_eq!(*monitor_saw.lock(), Some(true));
    assert!(channel.transport.frames().is_empty());
    assert_eq!(
        manager
            .metrics()
            .cancelled_total
            .with_label_values(&["outbound"])
            .get(),
        1
    );
}

#[test]
fn test_monitor_cannot_write_through_rebound_view() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let results = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&results);
    manager
        .add_listener(
            FnListener::builder("auditor")
                .sending(
                    whitelist(fixture.chat_out_type(), ListenerPriority::Monitor),
                    move |event| {
                        let strings = event.container().strings();
                        let direct = strings.write(0, Some("direct".to_string()));
                        let retargeted = strings.with_target(event.container().handle())?;
                        let rebound = retargeted.write(0, Some("rebound".to_string()));
                        let mut seen = seen.lock();
                        seen.push(matches!(direct, Err(PacketError::AccessDenied { .. })));
                        seen.push(matches!(rebound, Err(PacketError::AccessDenied { .. })));
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("original")).unwrap();

    assert_eq!(*results.lock(), vec![true, true]);
    assert_eq!(channel.transport.frames(), vec!["ChatOut:original"]);
}

#[test]
fn test_unfiltered_send_skips_dispatch_exactly_once() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let chat = fixture.chat_out_type();
    let normal = Arc::new(AtomicUsize::new(0));
    let monitor = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&normal);
    manager
        .add_listener(
            FnListener::builder("normal")
                .sending(whitelist(chat.clone(), ListenerPriority::Normal), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build(),
        )
        .unwrap();
    let counter = Arc::clone(&monitor);
    manager
        .add_listener(
            FnListener::builder("monitor")
                .sending(whitelist(chat.clone(), ListenerPriority::Monitor), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();

    let container = manager.create_message(&chat, true).unwrap();
    container.strings().write(0, Some("hi".to_string())).unwrap();

    // 静默发送：只有 MONITOR 可见，随后的一次经过跳过分发
    manager
        .send_message("player-1", container.clone(), None, false)
        .unwrap();
    assert_eq!(normal.load(Ordering::SeqCst), 0);
    assert_eq!(monitor.load(Ordering::SeqCst), 1);
    assert_eq!(channel.transport.frames(), vec!["ChatOut:hi"]);

    // 标记不会延续到下一次发送
    manager.send_message("player-1", container, None, true).unwrap();
    assert_eq!(normal.load(Ordering::SeqCst), 1);
    assert_eq!(monitor.load(Ordering::SeqCst), 2);
    assert_eq!(channel.transport.frames(), vec!["ChatOut:hi", "ChatOut:hi"]);
}

#[test]
fn test_marker_output_handlers_post_listeners_and_scheduled_messages() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let chat = fixture.chat_out_type();
    let posted = Arc::new(AtomicUsize::new(0));

    let follow_up = manager.create_message(&chat, true).unwrap();
    follow_up.strings().write(0, Some("scheduled".to_string())).unwrap();

    let counter = Arc::clone(&posted);
    manager
        .add_listener(
            FnListener::builder("decorator")
                .sending(whitelist(chat, ListenerPriority::Normal), move |event| {
                    if text_of(event) == "scheduled" {
                        return Ok(());
                    }
                    let marker = event.network_marker_mut()?;
                    marker.add_output_handler(OutputHandler::new(
                        "upper",
                        ListenerPriority::Normal,
                        |_, frame| Ok(Bytes::from(String::from_utf8_lossy(&frame).to_uppercase())),
                    ))?;
                    marker.add_output_handler(OutputHandler::new(
                        "suffix",
                        ListenerPriority::High,
                        |_, frame| Ok(Bytes::from([&frame[..], &b"!"[..]].concat())),
                    ))?;
                    let counter = Arc::clone(&counter);
                    marker.add_post_listener(PostListener::new("post", move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }));
                    marker.schedule(ScheduledMessage::filtered(follow_up.clone()));
                    Ok(())
                })
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("hello")).unwrap();

    // 输出处理器按优先级在宿主编码后依次改写
    assert_eq!(
        channel.transport.frames(),
        vec!["CHATOUT:HELLO!", "ChatOut:scheduled"]
    );
    assert_eq!(posted.load(Ordering::SeqCst), 1);
}

#[test]
fn test_input_buffer_kept_only_when_requested() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let chat_in = fixture.chat_in_type();
    let buffers = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&buffers);
    manager
        .add_listener(
            FnListener::builder("plain")
                .receiving(whitelist(chat_in.clone(), ListenerPriority::Normal), move |event| {
                    let buffer = event
                        .network_marker()
                        .and_then(|marker| marker.input_buffer().cloned());
                    seen.lock().push(("plain", buffer));
                    Ok(())
                })
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_receive("ChatIn:hey").unwrap();
    assert_eq!(*buffers.lock(), vec![("plain", None)]);

    let seen = Arc::clone(&buffers);
    manager
        .add_listener(
            FnListener::builder("raw")
                .receiving(
                    ListeningWhitelist::builder()
                        .message_type(chat_in)
                        .options(ListenerOptions::INTERCEPT_INPUT_BUFFER)
                        .build(),
                    move |event| {
                        let buffer = event
                            .network_marker()
                            .and_then(|marker| marker.input_buffer().cloned());
                        seen.lock().push(("raw", buffer));
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();

    buffers.lock().clear();
    channel.host_receive("ChatIn:again").unwrap();
    let frame = Some(Bytes::from_static(b"ChatIn:again"));
    assert_eq!(
        *buffers.lock(),
        vec![("plain", frame.clone()), ("raw", frame)]
    );
    assert_eq!(channel.transport.delivered_texts(), vec!["hey", "again"]);
}

#[test]
fn test_async_listener_keeps_delivery_order() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 2);
    let chat = fixture.chat_out_type();

    manager
        .add_listener(
            FnListener::builder("slow")
                .sending(
                    ListeningWhitelist::builder()
                        .message_type(chat)
                        .options(ListenerOptions::OFF_THREAD)
                        .build(),
                    |event| {
                        if text_of(event) == "first" {
                            std::thread::sleep(Duration::from_millis(80));
                        }
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    let injector = manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("first")).unwrap();
    channel.host_write(fixture.outgoing("second")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        channel.transport.frames().len() == 2
    }));
    assert_eq!(
        channel.transport.frames(),
        vec!["ChatOut:first", "ChatOut:second"]
    );
    assert!(wait_until(Duration::from_secs(1), || injector.pending_deliveries() == 0));
}

#[test]
fn test_delayed_message_holds_later_messages_until_signalled() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 2);
    let calls = Arc::new(AtomicUsize::new(0));
    let signals = Arc::new(Mutex::new(Vec::new()));

    let counter = Arc::clone(&calls);
    let held = Arc::clone(&signals);
    manager
        .add_listener(
            FnListener::builder("batcher")
                .sending(
                    ListeningWhitelist::builder()
                        .message_type(fixture.chat_out_type())
                        .options(ListenerOptions::OFF_THREAD)
                        .build(),
                    move |event| {
                        if text_of(event) == "first" {
                            held.lock().push(event.increment_processing_delay()?);
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    let injector = manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("first")).unwrap();
    channel.host_write(fixture.outgoing("second")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) == 2));
    std::thread::sleep(Duration::from_millis(50));
    // 第二条已处理完，但排在被持有的第一条之后
    assert!(channel.transport.frames().is_empty());
    assert_eq!(injector.pending_deliveries(), 2);

    let signal = signals.lock().pop().expect("first message was delayed");
    signal.signal();
    assert!(wait_until(Duration::from_secs(2), || {
        channel.transport.frames().len() == 2
    }));
    assert_eq!(
        channel.transport.frames(),
        vec!["ChatOut:first", "ChatOut:second"]
    );
    assert_eq!(injector.pending_deliveries(), 0);
}

#[test]
fn test_unreleased_delay_expires_and_unblocks_channel() {
    let fixture = Fixture::new();
    let mut config = ProtocolConfig::default();
    config.dispatch.async_workers = 0;
    config.dispatch.processing_timeout_ms = 100;
    config.specializer.enabled = false;
    let manager = ProtocolManager::builder()
        .config(config)
        .registry(Arc::clone(&fixture.registry))
        .build()
        .unwrap();
    let signals = Arc::new(Mutex::new(Vec::new()));

    let held = Arc::clone(&signals);
    manager
        .add_listener(
            FnListener::builder("forgetful")
                .sending(
                    whitelist(fixture.chat_out_type(), ListenerPriority::Normal),
                    move |event| {
                        if text_of(event) == "stuck" {
                            held.lock().push(event.increment_processing_delay()?);
                        }
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("stuck")).unwrap();
    channel.host_write(fixture.outgoing("next")).unwrap();
    assert!(channel.transport.frames().is_empty());

    assert!(wait_until(Duration::from_secs(2), || {
        !channel.transport.frames().is_empty()
    }));
    assert_eq!(channel.transport.frames(), vec!["ChatOut:next"]);
    assert_eq!(
        manager
            .metrics()
            .expired_total
            .with_label_values(&["outbound"])
            .get(),
        1
    );

    // 超时之后的放行不再生效
    let signal = signals.lock().pop().expect("stuck message was delayed");
    assert!(!signal.signal());
    assert_eq!(channel.transport.frames(), vec!["ChatOut:next"]);
}

#[test]
fn test_late_async_completion_is_dropped_after_fatal_close() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 2);
    let (gate_tx, gate_rx) = crossbeam::channel::bounded::<()>(1);

    manager
        .add_listener(
            FnListener::builder("slow")
                .sending(
                    ListeningWhitelist::builder()
                        .message_type(fixture.chat_out_type())
                        .options(ListenerOptions::OFF_THREAD)
                        .build(),
                    move |_| {
                        let _ = gate_rx.recv_timeout(Duration::from_secs(2));
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();
    manager
        .add_listener(
            FnListener::builder("strict")
                .receiving(
                    whitelist(fixture.chat_in_type(), ListenerPriority::Normal),
                    |_| Err(ListenerError::fatal(anyhow!("corrupted session"))),
                )
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    let injector = manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("late")).unwrap();
    channel.host_receive("ChatIn:boom").unwrap();

    assert_eq!(injector.state(), ChannelState::Closed);
    assert!(channel.disconnect_reason.lock().is_some());

    gate_tx.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || injector.pending_deliveries() == 0));
    assert!(channel.transport.frames().is_empty());
    assert!(channel.transport.delivered_texts().is_empty());
}

#[test]
fn test_fatal_listener_closes_only_its_channel() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let chat = fixture.chat_out_type();

    manager
        .add_listener(
            FnListener::builder("strict")
                .sending(whitelist(chat, ListenerPriority::Normal), |event| {
                    if event.channel_id() == "bad" {
                        return Err(ListenerError::fatal(anyhow!("corrupted session")));
                    }
                    Ok(())
                })
                .build(),
        )
        .unwrap();

    let bad = fixture.channel("bad");
    let good = fixture.channel("good");
    let bad_injector = manager.inject(bad.clone(), Phase::Play).unwrap();
    manager.inject(good.clone(), Phase::Play).unwrap();

    bad.host_write(fixture.outgoing("one")).unwrap();
    good.host_write(fixture.outgoing("two")).unwrap();

    assert_eq!(bad_injector.state(), ChannelState::Closed);
    assert!(bad.disconnect_reason.lock().is_some());
    assert!(bad.transport.frames().is_empty());
    assert_eq!(good.transport.frames(), vec!["ChatOut:two"]);
    assert_eq!(manager.channels().len(), 1);
}

#[test]
fn test_unknown_and_wrong_direction_messages_pass_through() {
    let fixture = Fixture::new();
    let manager = manager(&fixture, 0);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    manager
        .add_listener(
            FnListener::builder("all")
                .sending(whitelist(fixture.chat_out_type(), ListenerPriority::Normal), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();

    // 入站类型出现在出站方向
    let misplaced = flare_packet_hook::reflect::OpaqueRecord::new(&fixture.chat_in);
    misplaced.set("text", "odd").unwrap();
    channel.host_write(misplaced).unwrap();

    // 非法阶段
    manager.set_phase("player-1", Phase::Login).unwrap();
    channel.host_write(fixture.outgoing("early")).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        channel.transport.frames(),
        vec!["ChatIn:odd", "ChatOut:early"]
    );
}

#[derive(Default)]
struct QueuedPrimary {
    tasks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl QueuedPrimary {
    fn run_pending(&self) -> usize {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }
}

impl PrimaryThread for QueuedPrimary {
    fn is_primary(&self) -> bool {
        false
    }

    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        self.tasks.lock().push(task);
    }
}

#[test]
fn test_primary_thread_listeners_are_redispatched() {
    let fixture = Fixture::new();
    let primary = Arc::new(QueuedPrimary::default());
    let mut config = ProtocolConfig::default();
    config.dispatch.async_workers = 0;
    config.specializer.enabled = false;
    let manager = ProtocolManager::builder()
        .config(config)
        .registry(Arc::clone(&fixture.registry))
        .primary_thread(Arc::clone(&primary) as Arc<dyn PrimaryThread>)
        .build()
        .unwrap();

    manager
        .add_listener(
            FnListener::builder("world")
                .sending(
                    ListeningWhitelist::builder()
                        .message_type(fixture.chat_out_type())
                        .options(ListenerOptions::PRIMARY_THREAD)
                        .build(),
                    |event| {
                        event.container().strings().write(0, Some("rewritten".to_string()))?;
                        Ok(())
                    },
                )
                .build(),
        )
        .unwrap();

    let channel = fixture.channel("player-1");
    manager.inject(channel.clone(), Phase::Play).unwrap();
    channel.host_write(fixture.outgoing("original")).unwrap();
    assert!(channel.transport.frames().is_empty());

    assert_eq!(primary.run_pending(), 1);
    assert_eq!(channel.transport.frames(), vec!["ChatOut:rewritten"]);
}
