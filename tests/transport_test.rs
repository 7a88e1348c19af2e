mod common;

use arm_relay::domain::ports::Translator;
use arm_relay::{
    CommandDispatcher, CommandValidator, RelayEngine, RelayError, TelemetryHub, TransportServer,
};
use async_trait::async_trait;
use common::{spawn_session, MockBackend};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

struct ScriptedTranslator;

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, intent: &str) -> arm_relay::Result<String> {
        match intent {
            "reset" => Ok("0 180\n1 90\n2 90".to_string()),
            "fail" => Err(RelayError::TranslationError {
                message: "model unavailable".to_string(),
            }),
            _ => Ok("I can only move the three servos.".to_string()),
        }
    }
}

async fn start_server(backend: &MockBackend) -> SocketAddr {
    start_server_with_pacing(backend, Duration::from_millis(10)).await
}

async fn start_server_with_pacing(backend: &MockBackend, pacing: Duration) -> SocketAddr {
    let session = spawn_session(backend);
    let dispatcher =
        CommandDispatcher::new(session.clone(), CommandValidator::default()).with_pacing(pacing);
    let translator: Arc<dyn Translator> = Arc::new(ScriptedTranslator);
    let relay = RelayEngine::new(session, dispatcher, TelemetryHub::default(), Some(translator));

    let server = TransportServer::bind("127.0.0.1:0", relay).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());
    addr
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        let greeting = client.next().await;
        assert_eq!(greeting["event"], "serial_ports");
        client
    }

    async fn send(&mut self, request: Value) {
        let mut line = request.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for event")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Next event of the given kind, skipping anything else.
    async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let event = self.next().await;
            if event["event"] == kind {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn test_greeting_lists_ports() {
    let backend = MockBackend::new().with_ports(&["/dev/ttyUSB0"]);
    let addr = start_server(&backend).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    let greeting: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

    assert_eq!(greeting["event"], "serial_ports");
    assert_eq!(greeting["ports"][0]["path"], "/dev/ttyUSB0");
    assert_eq!(greeting["ports"][0]["vendor_id"], "1a86");
}

#[tokio::test]
async fn test_open_send_close_round_trip() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "open", "path": "/dev/ttyUSB0"})).await;
    let opened = client.next_of("serial_connected").await;
    assert_eq!(opened["success"], true);
    assert_eq!(opened["port"], "/dev/ttyUSB0");

    client.send(json!({"event": "send", "command": "0 90"})).await;
    let sent = client.next_of("command_sent").await;
    assert_eq!(sent["success"], true);
    assert_eq!(sent["command"], "0 90");
    assert_eq!(backend.written(), vec!["0 90\r\n"]);

    client.send(json!({"event": "close"})).await;
    let closed = client.next_of("serial_closed").await;
    assert_eq!(closed["success"], true);
}

#[tokio::test]
async fn test_open_without_path_fails() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "open", "path": null})).await;
    let opened = client.next_of("serial_connected").await;
    assert_eq!(opened["success"], false);

    client.send(json!({"event": "open", "path": ""})).await;
    let opened = client.next_of("serial_connected").await;
    assert_eq!(opened["success"], false);

    assert_eq!(backend.open_calls(), 0);
}

#[tokio::test]
async fn test_send_while_closed_reports_not_open() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "send", "command": "1 45"})).await;
    let sent = client.next_of("command_sent").await;
    assert_eq!(sent["success"], false);
    assert_eq!(sent["error"], "Serial port not open");
}

#[tokio::test]
async fn test_send_non_command_text_is_refused() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "send", "command": "raise the arm"})).await;
    let sent = client.next_of("command_sent").await;
    assert_eq!(sent["success"], false);
    assert_eq!(backend.write_attempts(), 0);
}

#[tokio::test]
async fn test_process_translates_and_dispatches() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "open", "path": "/dev/ttyUSB0"})).await;
    client.next_of("serial_connected").await;

    client.send(json!({"event": "process", "text": "reset"})).await;
    let processing = client.next_of("llm_response").await;
    assert_eq!(processing["status"], "processing");
    let completed = client.next_of("llm_response").await;
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["message"], "0 180\n1 90\n2 90");

    for expected in ["0 180", "1 90", "2 90"] {
        let sent = client.next_of("command_sent").await;
        assert_eq!(sent["command"], expected);
        assert_eq!(sent["success"], true);
    }
    assert_eq!(backend.written(), vec!["0 180\r\n", "1 90\r\n", "2 90\r\n"]);
}

#[tokio::test]
async fn test_process_explanation_is_not_dispatched() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "process", "text": "dance"})).await;
    client.next_of("llm_response").await;
    let completed = client.next_of("llm_response").await;
    assert_eq!(completed["status"], "completed");

    client.send(json!({"event": "list_ports"})).await;
    let next = client.next().await;
    assert_eq!(next["event"], "serial_ports");
    assert_eq!(backend.write_attempts(), 0);
}

#[tokio::test]
async fn test_process_translator_failure() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "process", "text": "fail"})).await;
    client.next_of("llm_response").await;
    let failed = client.next_of("llm_response").await;
    assert_eq!(failed["status"], "error");
}

#[tokio::test]
async fn test_telemetry_reaches_all_clients() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;

    first.send(json!({"event": "open", "path": "/dev/ttyUSB0"})).await;
    first.next_of("serial_connected").await;

    backend.feed(b"Yaw: 90 | Arm1: 45 | Arm2: 135\r\n");

    for client in [&mut first, &mut second] {
        let telemetry = client.next_of("telemetry").await;
        assert_eq!(telemetry["line"], "Yaw: 90 | Arm1: 45 | Arm2: 135");
        assert_eq!(telemetry["pose"]["arm1"], 45);
    }
}

#[tokio::test]
async fn test_malformed_request_keeps_connection_open() {
    let backend = MockBackend::new();
    let addr = start_server(&backend).await;
    let mut client = Client::connect(addr).await;

    client.send_raw("{not json}\n").await;
    let error = client.next().await;
    assert_eq!(error["event"], "error");

    client.send(json!({"event": "list_ports"})).await;
    assert_eq!(client.next().await["event"], "serial_ports");
}

#[tokio::test]
async fn test_command_events_stream_in_input_order() {
    let backend = MockBackend::new();
    let addr = start_server_with_pacing(&backend, Duration::from_millis(300)).await;
    let mut client = Client::connect(addr).await;

    client.send(json!({"event": "open", "path": "/dev/ttyUSB0"})).await;
    client.next_of("serial_connected").await;

    let started = Instant::now();
    client
        .send(json!({"event": "send", "command": "5 10\n0 90\n1 45\n2 10"}))
        .await;

    let mut seen = Vec::new();
    for _ in 0..4 {
        let event = client.next_of("command_sent").await;
        seen.push((event, started.elapsed()));
    }

    let order: Vec<&str> = seen
        .iter()
        .map(|(event, _)| event["command"].as_str().unwrap())
        .collect();
    assert_eq!(order, vec!["5 10", "0 90", "1 45", "2 10"]);
    assert_eq!(seen[0].0["success"], false);
    assert!(seen[1..].iter().all(|(event, _)| event["success"] == true));

    // 第一筆在整批送完前就回報
    assert!(seen[1].1 < Duration::from_millis(300));
    assert!(seen[3].1 >= Duration::from_millis(600));
}
