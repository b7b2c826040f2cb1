//! # Proxy — Channel Multiplexer
//!
//! Funnels many local workers onto one upstream coordinator connection.
//! Downstream-to-upstream frames are forwarded verbatim; upstream frames are
//! routed by cid. The first frame the coordinator sends on an unbound cid
//! binds it to the oldest connected-but-unassigned downstream socket; with
//! no arrival waiting, the frame is dropped and a `STOP` for that cid goes
//! upstream. A downstream failure stops every cid bound to that socket;
//! an upstream failure tears the whole session down and retries after a
//! second.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::tlv::{self, Frame, FrameType};
use crate::MAX_CID;

/// Arrival queue bound: workers connected but not yet bound to a cid.
pub const MAX_NEW_CONN: usize = 300;

pub struct Config {
    /// local listen port for workers (conventionally coordinator port + 1)
    pub listen_port: u16,
    pub upstream: SocketAddr,
}

enum Event {
    FromServer(Frame),
    ServerClosed,
    FromWorker { token: u64, frame: Frame },
    WorkerClosed { token: u64 },
}

/// Run the proxy forever: one upstream session at a time, one second of
/// pause between teardown and reconnect.
pub async fn run(cfg: Config) -> Result<()> {
    loop {
        if let Err(e) = session(&cfg).await {
            info!(error = %e, "proxy session ended");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

struct Session {
    /// cid → downstream socket token
    bound: Vec<Option<u64>>,
    /// connected but not yet bound downstream sockets, oldest first
    arrivals: VecDeque<u64>,
    writers: HashMap<u64, OwnedWriteHalf>,
    upstream: OwnedWriteHalf,
}

async fn session(cfg: &Config) -> Result<()> {
    let upstream = TcpStream::connect(cfg.upstream).await?;
    info!(upstream = %cfg.upstream, "proxy connected to coordinator");
    let listener = TcpListener::bind(("0.0.0.0", cfg.listen_port)).await?;

    let (tx, mut rx) = mpsc::channel::<Event>(1024);
    let (up_rd, up_wr) = upstream.into_split();
    tokio::spawn(upstream_reader(up_rd, tx.clone()));

    let mut s = Session {
        bound: vec![None; MAX_CID],
        arrivals: VecDeque::new(),
        writers: HashMap::new(),
        upstream: up_wr,
    };
    let mut next_token: u64 = 1;

    let result = loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(x) => x,
                    Err(e) => break Err(e.into()),
                };
                if s.arrivals.len() >= MAX_NEW_CONN {
                    debug!(%peer, "arrival queue full, rejecting worker");
                    continue;
                }
                let token = next_token;
                next_token += 1;
                let (rd, wr) = stream.into_split();
                s.writers.insert(token, wr);
                s.arrivals.push_back(token);
                tokio::spawn(worker_reader(rd, token, tx.clone()));
                info!(%peer, token, "worker connected");
            }
            Some(ev) = rx.recv() => {
                match ev {
                    Event::FromServer(frame) => {
                        if let Err(e) = s.route_downstream(frame).await {
                            break Err(e);
                        }
                    }
                    Event::ServerClosed => {
                        break Err(anyhow::anyhow!("upstream closed"));
                    }
                    Event::FromWorker { token: _, frame } => {
                        // forwarded verbatim; value bytes are opaque here
                        if tlv::write_frame(&mut s.upstream, &frame).await.is_err() {
                            break Err(anyhow::anyhow!("upstream write failed"));
                        }
                    }
                    Event::WorkerClosed { token } => {
                        s.drop_worker(token).await;
                    }
                }
            }
        }
    };

    // session teardown: tell every remaining worker to stop
    for (_, mut wr) in s.writers.drain() {
        let _ = tlv::write_frame(&mut wr, &Frame::new(FrameType::Stop, 0, 0)).await;
    }
    result
}

impl Session {
    /// Route a coordinator frame to its downstream socket, binding a waiting
    /// arrival to the cid on first use.
    async fn route_downstream(&mut self, frame: Frame) -> Result<()> {
        let cid = frame.cid as usize;
        if cid >= MAX_CID {
            warn!(cid, "upstream cid out of range, dropping frame");
            return Ok(());
        }
        if self.bound[cid].is_none() {
            match self.arrivals.pop_front() {
                Some(token) => self.bound[cid] = Some(token),
                None => {
                    // nobody to give this channel to
                    if tlv::write_frame(
                        &mut self.upstream,
                        &Frame::new(FrameType::Stop, frame.cid, 0),
                    )
                    .await
                    .is_err()
                    {
                        anyhow::bail!("upstream write failed");
                    }
                    return Ok(());
                }
            }
        }
        let token = self.bound[cid].unwrap_or_default();
        let ok = match self.writers.get_mut(&token) {
            Some(w) => tlv::write_frame(w, &frame).await.is_ok(),
            None => false,
        };
        if !ok {
            warn!(token, "downstream write failed");
            self.drop_worker(token).await;
        }
        Ok(())
    }

    /// Unbind and close a downstream socket, stopping its cids upstream.
    async fn drop_worker(&mut self, token: u64) {
        for cid in 0..MAX_CID {
            if self.bound[cid] == Some(token) {
                self.bound[cid] = None;
                let _ = tlv::write_frame(
                    &mut self.upstream,
                    &Frame::new(FrameType::Stop, cid as u16, 0),
                )
                .await;
            }
        }
        self.arrivals.retain(|&t| t != token);
        self.writers.remove(&token);
    }
}

async fn upstream_reader(mut rd: OwnedReadHalf, tx: mpsc::Sender<Event>) {
    loop {
        match tlv::read_frame(&mut rd).await {
            Ok(frame) => {
                if tx.send(Event::FromServer(frame)).await.is_err() {
                    return;
                }
            }
            Err(_) => {
                let _ = tx.send(Event::ServerClosed).await;
                return;
            }
        }
    }
}

async fn worker_reader(mut rd: OwnedReadHalf, token: u64, tx: mpsc::Sender<Event>) {
    loop {
        match tlv::read_frame(&mut rd).await {
            Ok(frame) => {
                if tx.send(Event::FromWorker { token, frame }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(token, error = %e, "worker read ended");
                let _ = tx.send(Event::WorkerClosed { token }).await;
                return;
            }
        }
    }
}
