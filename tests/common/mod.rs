//! Shared utilities for integration testing: a fake proxy speaking the
//! offload protocol over real TCP sockets.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use spoa_agent::application::{build_applications, Application, ApplicationRegistry};
use spoa_agent::config::{AgentConfig, ApplicationConfig, BindAddress};
use spoa_agent::net::Listener;
use spoa_agent::protocol::{
    read_frame, write_frame, Action, Frame, FrameFlags, FrameType, KvList, Message, Payload,
    TypedValue,
};
use spoa_agent::{Agent, Shutdown};

/// A running agent bound to an ephemeral port.
pub struct TestAgent {
    pub addr: SocketAddr,
    pub agent: Arc<Agent>,
    pub shutdown: Arc<Shutdown>,
    pub task: JoinHandle<()>,
}

impl TestAgent {
    pub fn registry(&self) -> &Arc<ApplicationRegistry> {
        self.agent.registry()
    }

    /// Trigger shutdown and wait for the accept loop to finish draining.
    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.task).await;
    }
}

/// Config tuned for fast tests.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.bind = BindAddress::Tcp("127.0.0.1:0".into());
    config.timeouts.hello_ms = 500;
    config.timeouts.idle_ms = 5_000;
    config.timeouts.processing_ms = 300;
    config.timeouts.shutdown_grace_ms = 500;
    config
}

/// Start an agent serving the applications described by `apps`.
pub async fn start_agent(config: AgentConfig, apps: &[ApplicationConfig]) -> TestAgent {
    start_agent_with(config, build_applications(apps).unwrap()).await
}

/// Start an agent serving a prebuilt application map.
pub async fn start_agent_with(
    config: AgentConfig,
    apps: HashMap<String, Arc<Application>>,
) -> TestAgent {
    let registry = Arc::new(ApplicationRegistry::new(apps));
    let listener = Listener::bind(&config.bind, config.agent.max_connections)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let agent = Arc::new(Agent::new(&config, registry));
    let shutdown = Arc::new(Shutdown::new());
    let task = {
        let agent = Arc::clone(&agent);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            agent.serve(listener, &shutdown).await.unwrap();
        })
    };

    TestAgent {
        addr,
        agent,
        shutdown,
        task,
    }
}

/// Fake proxy connection.
pub struct ProxyClient {
    stream: TcpStream,
}

impl ProxyClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    /// Connect and complete the handshake.
    pub async fn establish(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        let reply = client.hello(16_384).await;
        assert_eq!(reply.kind, FrameType::AgentHello);
        client
    }

    pub async fn hello(&mut self, max_frame_size: u32) -> Frame {
        self.send(&hello_frame(max_frame_size, false)).await;
        self.recv().await.expect("agent closed during hello")
    }

    pub async fn send(&mut self, frame: &Frame) {
        write_frame(&mut self.stream, frame).await.unwrap();
    }

    /// Write raw bytes, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next frame, or `None` when the agent closed the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.stream, 1 << 20))
            .await
            .expect("no frame within 5s")
            .ok()
            .flatten()
    }

    /// Send one notify and wait for its ack.
    pub async fn notify(&mut self, stream_id: u64, message: Message) -> Frame {
        self.send(&Frame::notify(stream_id, 1, vec![message])).await;
        let ack = self.recv().await.expect("agent closed before ack");
        assert_eq!(ack.kind, FrameType::Ack);
        assert_eq!(ack.stream_id, stream_id);
        ack
    }
}

pub fn hello_frame(max_frame_size: u32, healthcheck: bool) -> Frame {
    let mut items = KvList::new()
        .with("supported-versions", "2.0")
        .with("max-frame-size", TypedValue::Uint32(max_frame_size))
        .with("capabilities", "pipelining,async")
        .with("engine-id", "test-engine");
    if healthcheck {
        items.push("healthcheck", TypedValue::Bool(true));
    }
    Frame {
        kind: FrameType::Hello,
        flags: FrameFlags::FIN,
        stream_id: 0,
        frame_id: 0,
        payload: Payload::KvList(items),
    }
}

pub fn request(args: KvList) -> Message {
    Message::new("coraza-req", args)
}

pub fn response(id: &str, args: KvList) -> Message {
    Message::new("coraza-res", args.with("id", id))
}

/// Value of a transaction variable set by an ack.
pub fn var(ack: &Frame, wanted: &str) -> Option<TypedValue> {
    let Payload::Actions(actions) = &ack.payload else {
        return None;
    };
    actions.iter().find_map(|action| match action {
        Action::SetVar { name, value, .. } if name == wanted => Some(value.clone()),
        _ => None,
    })
}

/// Whether an ack unsets the transaction variable `wanted`.
pub fn unsets(ack: &Frame, wanted: &str) -> bool {
    let Payload::Actions(actions) = &ack.payload else {
        return false;
    };
    actions
        .iter()
        .any(|action| matches!(action, Action::UnsetVar { name, .. } if name == wanted))
}

pub fn action(ack: &Frame) -> Option<String> {
    var(ack, "action").and_then(|v| v.as_str().map(str::to_string))
}

pub fn status(ack: &Frame) -> Option<i64> {
    var(ack, "status").and_then(|v| v.as_i64())
}

pub fn error(ack: &Frame) -> Option<i64> {
    var(ack, "error").and_then(|v| v.as_i64())
}

pub fn id(ack: &Frame) -> String {
    var(ack, "id")
        .and_then(|v| v.as_str().map(str::to_string))
        .expect("ack carries no id")
}

pub fn disconnect_status(frame: &Frame) -> Option<i64> {
    frame.kv_list()?.get("status-code")?.as_i64()
}
