use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use recall_core::{Error, Result};
use recall_timing::Timer;
use tracing::{debug, trace, warn};

use crate::link::ControlLink;
use crate::protocol::{EventKind, Inbound, SyncEvent};

#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    /// Idle time after which the writer emits a `HEARTBEAT`.
    pub heartbeat_interval: Option<Duration>,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(2),
            heartbeat_interval: Some(Duration::from_millis(1000)),
        }
    }
}

enum Outbound {
    Line(String),
    Shutdown,
}

/// Newline-delimited JSON over TCP.
///
/// A writer thread drains the outbound queue so `send` never waits on the
/// socket; a reader thread routes replies back to the blocking calls and
/// records `START`/`EXIT` from the host.
pub struct TcpLink {
    stream: TcpStream,
    outbound: Sender<Outbound>,
    replies: Receiver<Inbound>,
    started: Arc<AtomicBool>,
    exit: Arc<AtomicBool>,
    options: TcpOptions,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl TcpLink {
    pub fn connect<T>(addr: impl ToSocketAddrs, options: TcpOptions, timer: T) -> Result<Self>
    where
        T: Timer + 'static,
    {
        let peer = addr
            .to_socket_addrs()
            .map_err(|e| Error::connection(format!("cannot resolve control PC address: {e}")))?
            .next()
            .ok_or_else(|| Error::connection("control PC address resolved to nothing"))?;
        let stream = TcpStream::connect_timeout(&peer, options.connect_timeout)
            .map_err(|e| Error::connection(format!("{peer}: {e}")))?;
        stream.set_nodelay(true)?;
        debug!(%peer, "control PC socket open");

        let (out_tx, out_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let started = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(AtomicBool::new(false));

        let write_half = stream.try_clone()?;
        let heartbeat = options.heartbeat_interval;
        let writer = thread::Builder::new()
            .name("control-pc-writer".into())
            .spawn(move || write_loop(write_half, out_rx, heartbeat, timer))?;

        let read_half = stream.try_clone()?;
        let (started_flag, exit_flag) = (started.clone(), exit.clone());
        let reader = thread::Builder::new()
            .name("control-pc-reader".into())
            .spawn(move || read_loop(read_half, reply_tx, started_flag, exit_flag))?;

        Ok(Self {
            stream,
            outbound: out_tx,
            replies: reply_rx,
            started,
            exit,
            options,
            writer: Some(writer),
            reader: Some(reader),
        })
    }

    fn enqueue(&self, event: &SyncEvent) -> Result<()> {
        let line = event.to_line()?;
        self.outbound
            .send(Outbound::Line(line))
            .map_err(|_| Error::connection("control PC writer has stopped"))
    }

    /// Waits for the first reply `accept` recognises. Replies that arrived
    /// for earlier requests are skipped.
    fn await_reply<R>(&self, what: &str, mut accept: impl FnMut(&Inbound) -> Option<R>) -> Result<R> {
        let deadline = Instant::now() + self.options.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) => {
                    if let Some(r) = accept(&reply) {
                        return Ok(r);
                    }
                    trace!(?reply, "ignoring stale reply");
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::connection(format!(
                        "no {what} reply within {:?}",
                        self.options.reply_timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::connection("control PC closed the connection"));
                }
            }
        }
    }
}

impl ControlLink for TcpLink {
    fn handshake(&mut self, hello: SyncEvent) -> Result<()> {
        self.enqueue(&hello)?;
        self.await_reply("CONNECTED", |r| matches!(r, Inbound::Connected).then_some(()))
    }

    fn round_trip(&mut self, probe: SyncEvent) -> Result<f64> {
        let id = probe
            .probe_id()
            .ok_or_else(|| Error::protocol("SYNC probe without an id"))?;
        self.enqueue(&probe)?;
        self.await_reply("SYNC", |r| match r {
            Inbound::Sync { id: got, timestamp } if *got == id => Some(*timestamp),
            _ => None,
        })
    }

    fn send(&mut self, event: SyncEvent) -> Result<()> {
        self.enqueue(&event)
    }

    fn poll_start(&mut self, timeout: Duration) -> Result<bool> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(true);
        }
        thread::sleep(timeout);
        Ok(self.started.load(Ordering::SeqCst))
    }

    fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        let _ = self.outbound.send(Outbound::Shutdown);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn write_loop<T: Timer>(
    mut stream: TcpStream,
    queue: Receiver<Outbound>,
    heartbeat: Option<Duration>,
    timer: T,
) {
    // without a heartbeat the writer just blocks on the queue
    let idle = heartbeat.unwrap_or(Duration::from_secs(3600));
    loop {
        let line = match queue.recv_timeout(idle) {
            Ok(Outbound::Line(line)) => line,
            Ok(Outbound::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) if heartbeat.is_some() => {
                match SyncEvent::new(EventKind::Heartbeat, timer.now_ms()).to_line() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("cannot encode heartbeat: {e}");
                        continue;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
        };
        if let Err(e) = stream.write_all(line.as_bytes()).and_then(|_| stream.flush()) {
            warn!("control PC write failed: {e}");
            break;
        }
    }
}

fn read_loop(
    stream: TcpStream,
    replies: Sender<Inbound>,
    started: Arc<AtomicBool>,
    exit: Arc<AtomicBool>,
) {
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => line,
            Err(e) => {
                debug!("control PC read ended: {e}");
                break;
            }
        };
        match Inbound::parse(&line) {
            Ok(Inbound::Start) => started.store(true, Ordering::SeqCst),
            Ok(Inbound::Exit) => {
                warn!("control PC requested exit");
                exit.store(true, Ordering::SeqCst);
            }
            Ok(Inbound::Heartbeat) => trace!("host heartbeat"),
            Ok(Inbound::Unknown) => debug!(%line, "unhandled host message"),
            Ok(reply) => {
                if replies.send(reply).is_err() {
                    break;
                }
            }
            Err(e) => warn!(%line, "unparseable host message: {e}"),
        }
    }
}
