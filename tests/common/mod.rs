// 集成测试共用的内存宿主：文本编解码 + 记录写出帧与入站消息的通道
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use bytes::Bytes;
use parking_lot::Mutex;

use flare_packet_hook::channel::{HandlerSlot, HostChannel, HostCodec, InboundHandler, OutboundHandler};
use flare_packet_hook::reflect::{ClassBuilder, ClassRef, Modifiers, OpaqueRecord, RecordRef, Value, builtin};
use flare_packet_hook::{Direction, MessageRegistry, MessageType, Phase};

/// 帧格式：`<类名>:<text 字段>`
pub struct TextCodec {
    classes: HashMap<String, ClassRef>,
}

impl TextCodec {
    pub fn new(classes: &[&ClassRef]) -> Self {
        Self {
            classes: classes
                .iter()
                .map(|class| (class.name().to_string(), Arc::clone(class)))
                .collect(),
        }
    }
}

impl HostCodec for TextCodec {
    fn decode(&self, _phase: Phase, frame: &Bytes) -> anyhow::Result<RecordRef> {
        let text = std::str::from_utf8(frame).context("frame is not utf-8")?;
        let (name, body) = text.split_once(':').ok_or_else(|| anyhow!("malformed frame"))?;
        let class = self
            .classes
            .get(name)
            .ok_or_else(|| anyhow!("unknown class {name}"))?;
        let record = OpaqueRecord::new(class);
        record.set("text", body)?;
        Ok(record)
    }

    fn encode(&self, _phase: Phase, message: &OpaqueRecord) -> anyhow::Result<Bytes> {
        let text = match message.get("text") {
            Some(Value::Str(text)) => text,
            _ => String::new(),
        };
        Ok(Bytes::from(format!("{}:{}", message.class().name(), text)))
    }
}

/// 宿主侧传输：记录写出的帧与交给宿主的入站消息
#[derive(Default)]
pub struct Transport {
    pub frames: Mutex<Vec<Bytes>>,
    pub delivered: Mutex<Vec<RecordRef>>,
}

impl Transport {
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    pub fn delivered_texts(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|record| match record.get("text") {
                Some(Value::Str(text)) => text,
                _ => String::new(),
            })
            .collect()
    }
}

struct HostOutbound {
    codec: Arc<TextCodec>,
    transport: Arc<Transport>,
}

impl OutboundHandler for HostOutbound {
    fn write(&self, message: RecordRef) -> anyhow::Result<()> {
        let frame = self.codec.encode(Phase::Play, &message)?;
        self.transport.frames.lock().push(frame);
        Ok(())
    }

    fn write_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        self.transport.frames.lock().push(frame);
        Ok(())
    }
}

struct HostInbound {
    codec: Arc<TextCodec>,
    transport: Arc<Transport>,
}

impl InboundHandler for HostInbound {
    fn on_frame(&self, frame: Bytes) -> anyhow::Result<()> {
        let message = self.codec.decode(Phase::Play, &frame)?;
        self.on_message(message)
    }

    fn on_message(&self, message: RecordRef) -> anyhow::Result<()> {
        self.transport.delivered.lock().push(message);
        Ok(())
    }
}

pub struct MemoryChannel {
    id: String,
    outbound: HandlerSlot<dyn OutboundHandler>,
    inbound: HandlerSlot<dyn InboundHandler>,
    codec: Arc<TextCodec>,
    open: AtomicBool,
    pub transport: Arc<Transport>,
    pub disconnect_reason: Mutex<Option<String>>,
}

impl MemoryChannel {
    pub fn new(id: &str, codec: Arc<TextCodec>) -> Arc<Self> {
        let transport = Arc::new(Transport::default());
        let outbound: Arc<dyn OutboundHandler> = Arc::new(HostOutbound {
            codec: Arc::clone(&codec),
            transport: Arc::clone(&transport),
        });
        let inbound: Arc<dyn InboundHandler> = Arc::new(HostInbound {
            codec: Arc::clone(&codec),
            transport: Arc::clone(&transport),
        });
        Arc::new(Self {
            id: id.to_string(),
            outbound: HandlerSlot::new(outbound),
            inbound: HandlerSlot::new(inbound),
            codec,
            open: AtomicBool::new(true),
            transport,
            disconnect_reason: Mutex::new(None),
        })
    }

    /// 宿主写出一条消息
    pub fn host_write(&self, message: RecordRef) -> anyhow::Result<()> {
        self.outbound.get().write(message)
    }

    /// 传输层收到一帧
    pub fn host_receive(&self, frame: &str) -> anyhow::Result<()> {
        self.inbound.get().on_frame(Bytes::from(frame.to_string()))
    }
}

impl HostChannel for MemoryChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn outbound(&self) -> &HandlerSlot<dyn OutboundHandler> {
        &self.outbound
    }

    fn inbound(&self) -> &HandlerSlot<dyn InboundHandler> {
        &self.inbound
    }

    fn codec(&self) -> Option<Arc<dyn HostCodec>> {
        Some(Arc::clone(&self.codec) as Arc<dyn HostCodec>)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn disconnect(&self, reason: &str) {
        self.open.store(false, Ordering::Release);
        *self.disconnect_reason.lock() = Some(reason.to_string());
    }
}

/// 测试用的一组宿主类型及其注册表
pub struct Fixture {
    pub chat_out: ClassRef,
    pub chat_in: ClassRef,
    pub registry: Arc<MessageRegistry>,
    pub codec: Arc<TextCodec>,
}

impl Fixture {
    pub fn new() -> Self {
        let chat_out = ClassBuilder::new("ChatOut")
            .field("text", &builtin::STRING, Modifiers::PRIVATE)
            .field("color", &builtin::INT, Modifiers::PUBLIC)
            .field("recipients", &builtin::LIST, Modifiers::PRIVATE)
            .build();
        let chat_in = ClassBuilder::new("ChatIn")
            .field("text", &builtin::STRING, Modifiers::PRIVATE)
            .build();

        let registry = Arc::new(MessageRegistry::new());
        registry
            .register(&chat_out, Direction::Outbound, Phase::Play)
            .expect("register ChatOut");
        registry
            .register(&chat_in, Direction::Inbound, Phase::Play)
            .expect("register ChatIn");

        let codec = Arc::new(TextCodec::new(&[&chat_out, &chat_in]));
        Self {
            chat_out,
            chat_in,
            registry,
            codec,
        }
    }

    pub fn chat_out_type(&self) -> MessageType {
        self.registry.type_of(&self.chat_out).expect("ChatOut registered")
    }

    pub fn chat_in_type(&self) -> MessageType {
        self.registry.type_of(&self.chat_in).expect("ChatIn registered")
    }

    pub fn channel(&self, id: &str) -> Arc<MemoryChannel> {
        MemoryChannel::new(id, Arc::clone(&self.codec))
    }

    pub fn outgoing(&self, text: &str) -> RecordRef {
        let record = OpaqueRecord::new(&self.chat_out);
        record.set("text", text).expect("text field");
        record
    }
}

/// 轮询直到条件满足或超时
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
