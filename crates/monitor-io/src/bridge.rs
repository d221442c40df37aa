use crate::metrics::{BRIDGE_COMMANDS, BRIDGE_CONNECTED};
use crate::protocol::{AckMsg, Command, CommandMsg, EventMsg, IncomingMessage, StatusMsg};
use monitor_core::{DeviceDriver, EngineHandle, EventKind, StatusEvent, Subscription};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub struct BridgeConfig {
    pub bind_addr: String,
    /// Events buffered between loop iterations before new ones are dropped.
    pub event_queue: usize,
    /// A client whose unsent output grows past this is disconnected.
    pub max_pending_bytes: usize,
    /// A client that sends more than this without a newline is disconnected.
    pub max_line_bytes: usize,
    pub idle_sleep: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7000".to_string(),
            event_queue: 1024,
            max_pending_bytes: 1 << 20,
            max_line_bytes: 64 * 1024,
            idle_sleep: Duration::from_millis(5),
        }
    }
}

struct Client {
    stream: TcpStream,
    addr: SocketAddr,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    send_offset: usize,
    sequence: u64,
    client_id: Option<String>,
}

impl Client {
    fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            stream,
            addr,
            recv_buf: Vec::with_capacity(4096),
            send_buf: Vec::new(),
            send_offset: 0,
            sequence: 0,
            client_id: None,
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn queue<T: Serialize>(&mut self, msg: &T) {
        match serde_json::to_vec(msg) {
            Ok(mut line) => {
                line.push(b'\n');
                self.send_buf.extend_from_slice(&line);
            }
            Err(err) => warn!(error = %err, "Failed to encode bridge message"),
        }
    }

    fn pending(&self) -> usize {
        self.send_buf.len() - self.send_offset
    }
}

/// JSON-lines bridge serving one client at a time.
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: BridgeConfig,
}

impl BridgeServer {
    pub fn bind(config: BridgeConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Bridge listening");
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `stop` is set.
    pub fn run<D: DeviceDriver + 'static>(self, engine: EngineHandle<D>, stop: Arc<AtomicBool>) {
        let (tx, rx) = mpsc::sync_channel(self.config.event_queue.max(1));
        let _subscriptions = [
            forward(&engine, EventKind::ConnectionChanged, tx.clone()),
            forward(&engine, EventKind::DataUpdated, tx),
        ];

        let mut client: Option<Client> = None;

        while !stop.load(Ordering::Relaxed) {
            if client.is_none() {
                client = self.accept(&engine);
            }

            let Some(active) = client.as_mut() else {
                // Nobody to deliver to
                while rx.try_recv().is_ok() {}
                std::thread::sleep(self.config.idle_sleep);
                continue;
            };

            let keep = service_client(active, &engine, &rx, &self.config);
            if !keep {
                info!(client_addr = %active.addr, client_id = ?active.client_id, "Bridge client disconnected");
                client = None;
                BRIDGE_CONNECTED.set(0);
            }

            std::thread::sleep(self.config.idle_sleep);
        }

        if client.is_some() {
            BRIDGE_CONNECTED.set(0);
        }
        info!("Bridge stopped");
    }

    fn accept<D: DeviceDriver + 'static>(&self, engine: &EngineHandle<D>) -> Option<Client> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                if let Err(err) = stream.set_nonblocking(true) {
                    warn!(error = %err, "Failed to set nonblocking on client");
                    return None;
                }
                let _ = stream.set_nodelay(true);
                info!(client_addr = %addr, "Bridge client connected");
                BRIDGE_CONNECTED.set(1);

                let mut client = Client::new(stream, addr);
                queue_status(&mut client, engine);
                Some(client)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
            Err(err) => {
                warn!("Bridge accept error: {}", err);
                None
            }
        }
    }
}

/// Bind and serve. Returns once `stop` is set.
pub fn run_bridge<D: DeviceDriver + 'static>(
    engine: EngineHandle<D>,
    config: BridgeConfig,
    stop: Arc<AtomicBool>,
) -> io::Result<()> {
    BridgeServer::bind(config)?.run(engine, stop);
    Ok(())
}

fn forward<D: DeviceDriver>(
    engine: &EngineHandle<D>,
    kind: EventKind,
    tx: SyncSender<StatusEvent>,
) -> Subscription {
    engine.subscribe(kind, move |event| match tx.try_send(event.clone()) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            debug!("Bridge event queue full, dropping event");
            Ok(())
        }
        Err(TrySendError::Disconnected(_)) => Err("bridge is gone".into()),
    })
}

/// One pass of read, dispatch, forward and write. Returns false when the
/// client should be dropped.
fn service_client<D: DeviceDriver + 'static>(
    client: &mut Client,
    engine: &EngineHandle<D>,
    events: &Receiver<StatusEvent>,
    config: &BridgeConfig,
) -> bool {
    let mut temp = [0u8; 1024];
    match client.stream.read(&mut temp) {
        Ok(0) => return false,
        Ok(n) => {
            client.recv_buf.extend_from_slice(&temp[..n]);
            while let Some(pos) = client.recv_buf.iter().position(|b| *b == b'\n') {
                let line = client.recv_buf.drain(..=pos).collect::<Vec<u8>>();
                let Ok(text) = std::str::from_utf8(&line) else {
                    warn!("Ignoring non-UTF-8 bridge line");
                    continue;
                };
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match IncomingMessage::parse(trimmed) {
                    Some(msg) => handle_incoming(msg, client, engine, events),
                    None => warn!(line = trimmed, "Ignoring unparsable bridge line"),
                }
            }
            if client.recv_buf.len() > config.max_line_bytes {
                warn!(
                    buffered = client.recv_buf.len(),
                    limit = config.max_line_bytes,
                    "Bridge line too long, dropping client"
                );
                return false;
            }
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(err) => {
            warn!(error = %err, "Bridge read error");
            return false;
        }
    }

    drain_events(client, events);

    if client.pending() > config.max_pending_bytes {
        warn!(pending = client.pending(), "Bridge client too slow, dropping");
        return false;
    }

    while client.pending() > 0 {
        match client.stream.write(&client.send_buf[client.send_offset..]) {
            Ok(0) => return false,
            Ok(n) => {
                client.send_offset += n;
                if client.send_offset >= client.send_buf.len() {
                    client.send_buf.clear();
                    client.send_offset = 0;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                warn!(error = %err, "Bridge write error");
                return false;
            }
        }
    }
    true
}

fn drain_events(client: &mut Client, events: &Receiver<StatusEvent>) {
    while let Ok(event) = events.try_recv() {
        let sequence = client.next_sequence();
        client.queue(&EventMsg::new(sequence, &event));
    }
}

fn queue_status<D: DeviceDriver + 'static>(client: &mut Client, engine: &EngineHandle<D>) {
    let sequence = client.next_sequence();
    client.queue(&StatusMsg::new(
        sequence,
        engine.connection_state(),
        engine.status_text(),
        engine.snapshot(),
    ));
}

#[instrument(skip_all, fields(client_addr = %client.addr))]
fn handle_incoming<D: DeviceDriver + 'static>(
    msg: IncomingMessage,
    client: &mut Client,
    engine: &EngineHandle<D>,
    events: &Receiver<StatusEvent>,
) {
    let version = msg.protocol_version();
    if !version.is_supported() {
        warn!(
            major = version.major,
            minor = version.minor,
            "Unsupported protocol version"
        );
        return;
    }

    match msg {
        IncomingMessage::Hello(hello) => {
            info!(client_id = ?hello.client_id, "Bridge handshake received");
            client.client_id = hello.client_id;
        }
        IncomingMessage::Command(cmd) => {
            BRIDGE_COMMANDS.inc();
            let ack = execute(&cmd, client, engine);
            // Events raised by the command go out ahead of its ack
            drain_events(client, events);
            client.queue(&ack);
        }
    }
}

fn execute<D: DeviceDriver + 'static>(
    cmd: &CommandMsg,
    client: &mut Client,
    engine: &EngineHandle<D>,
) -> AckMsg {
    debug!(command = cmd.command.name(), sequence = cmd.sequence, "Bridge command");
    match cmd.command {
        Command::Connect => {
            let ok = engine.connect();
            AckMsg::new(cmd.sequence, &cmd.command, ok, engine.status_text())
        }
        Command::Disconnect => {
            engine.disconnect();
            AckMsg::new(cmd.sequence, &cmd.command, true, engine.status_text())
        }
        Command::Status => {
            queue_status(client, engine);
            AckMsg::new(cmd.sequence, &cmd.command, true, "")
        }
        Command::SetRunning { running } => match engine.set_running(running) {
            Ok(()) => AckMsg::new(
                cmd.sequence,
                &cmd.command,
                true,
                if running { "running" } else { "stopped" },
            ),
            Err(err) => AckMsg::new(cmd.sequence, &cmd.command, false, err.to_string()),
        },
    }
}
