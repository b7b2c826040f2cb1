//! # Coordinator — Block Assignment and Fleet Supervision
//!
//! One task owns every piece of coordinator state; per-socket reader tasks
//! only decode frames and forward them over a channel, so all state
//! mutations are totally ordered. Frame writes happen inline on the owning
//! task: a peer that stops draining its socket stalls assignment for
//! everyone, which is the accepted trade-off of the single-owner design.
//!
//! ## The ledger
//!
//! Work lives in a ring of [`MAX_BLOCK`] block slots indexed by a monotonic
//! `head`; the active window is `[tail, head)` and `tail` only advances past
//! `DONE` slots. Each `READY` either reclaims the residual of a `DEAD` block
//! (splitting it when the residual exceeds what the worker's observed rate
//! justifies) or advances the global LCG cursor by a freshly sized block.
//! Block sizing targets [`BLOCK_TIME`] of wall time per block using the
//! ticks-per-iteration rate measured from the worker's previous block,
//! bootstrapped to `20 * RATE` for new channels; counts are forced odd and
//! at least 5.
//!
//! ## Liveness
//!
//! Before handling traffic the oldest live slot is checked: a `RUNNING`
//! block past `expected_t_end + BLOCK_TIMEOUT` marks both the slot and its
//! owning channel `DEAD`. The residual becomes reassignable; a late `READY`
//! from the declared-dead worker is simply treated as a fresh request for
//! work.
//!
//! ## Outputs
//!
//! Anomaly reports append one line `"<tag> 0x<16hex><16hex>"` to stdout and
//! to `lnrc.log` (opened and closed per record, so concurrent readers never
//! see a partially buffered file). Scan progress prints the least
//! uncompleted candidate once a second while it moves (sequential cursor) or
//! the running completion count every five seconds (randomized cursor).

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::lcg::{seed_to_number, Lcg};
use crate::tlv::{self, hex128, Frame, FrameType};
use crate::MAX_CID;

/// Block ring capacity; a power of two.
pub const MAX_BLOCK: u64 = MAX_CID as u64 * 32;
/// Target block duration in ticks (nanoseconds), about 10 seconds.
pub const BLOCK_TIME: u64 = 10_000_000_000;
/// Bootstrap unit for ticks-per-iteration estimates.
pub const RATE: u64 = 1_000;
/// Grace past a block's expected end before it is declared dead.
pub const BLOCK_TIMEOUT: u64 = 2 * BLOCK_TIME;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Unused,
    Pending,
    Running,
    Done,
    Dead,
}

/// One logical channel (cid) and its owning socket token.
#[derive(Clone, Copy, Debug)]
pub struct Connection {
    pub state: SlotState,
    /// ticks per iteration observed from the last completed block
    pub rate: u64,
    /// absolute block index of the owned RUNNING block (0 = none yet)
    pub progress: u64,
    pub sock: u64,
    pub t_connect: u64,
}

#[derive(Clone, Copy, Debug)]
struct Block {
    seed: u128,
    count: u64,
    t_start: u64,
    expected_t_end: u64,
    cid: u16,
    state: SlotState,
}

const EMPTY_BLOCK: Block = Block {
    seed: 0,
    count: 0,
    t_start: 0,
    expected_t_end: 0,
    cid: 0,
    state: SlotState::Unused,
};

/// `(BLOCK_TIME / rate)` rounded up, plus a 3-iteration floor, forced odd —
/// always odd, always >= 5.
pub fn count_from_rate(rate: u64) -> u64 {
    let rate = rate.max(1);
    (((BLOCK_TIME + rate - 1) / rate) + 3) | 1
}

/// All coordinator bookkeeping, free of any I/O: channel slots, the block
/// ring, the window bounds and the global LCG cursor.
pub struct Ledger {
    connections: Vec<Connection>,
    progress: Vec<Block>,
    head: u64,
    tail: u64,
    cursor: Lcg,
    pub done_count: u128,
}

impl Ledger {
    pub fn new(cursor: Lcg) -> Self {
        Ledger {
            connections: vec![
                Connection {
                    state: SlotState::Unused,
                    rate: 20 * RATE,
                    progress: 0,
                    sock: 0,
                    t_connect: 0,
                };
                MAX_CID
            ],
            progress: vec![EMPTY_BLOCK; MAX_BLOCK as usize],
            head: MAX_CID as u64,
            tail: MAX_CID as u64,
            cursor,
            done_count: 0,
        }
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn tail(&self) -> u64 {
        self.tail
    }

    pub fn cursor(&self) -> &Lcg {
        &self.cursor
    }

    pub fn connection(&self, cid: u16) -> &Connection {
        &self.connections[cid as usize]
    }

    /// Allocate the lowest unused cid for a `NEW` request.
    pub fn allocate_cid(&mut self, token: u64, now: u64) -> Option<u16> {
        let j = self
            .connections
            .iter()
            .position(|c| c.state == SlotState::Unused)?;
        self.connections[j] = Connection {
            state: SlotState::Pending,
            rate: 20 * RATE,
            progress: 0,
            sock: token,
            t_connect: now,
        };
        Some(j as u16)
    }

    /// `STOP` from the worker: release the channel, orphaning any running
    /// block as reassignable.
    pub fn stop(&mut self, cid: u16) {
        let c = &mut self.connections[cid as usize];
        if c.state == SlotState::Running {
            let pg = &mut self.progress[(c.progress % MAX_BLOCK) as usize];
            if pg.state == SlotState::Running {
                pg.state = SlotState::Dead;
            }
        }
        c.state = SlotState::Unused;
        c.progress = 0;
    }

    /// Release every channel owned by a broken socket. Returns the cids that
    /// were shut down.
    pub fn broken_socket(&mut self, token: u64) -> Vec<u16> {
        let mut ended = Vec::new();
        for cid in 0..MAX_CID as u16 {
            let c = self.connections[cid as usize];
            if c.sock == token && c.state != SlotState::Unused {
                if c.state == SlotState::Running {
                    let pg = &mut self.progress[(c.progress % MAX_BLOCK) as usize];
                    if pg.state == SlotState::Running {
                        pg.state = SlotState::Dead;
                    }
                }
                self.connections[cid as usize].state = SlotState::Unused;
                ended.push(cid);
            }
        }
        ended
    }

    /// Close out the channel's running block on a `READY` (recomputing its
    /// observed rate), or bootstrap the rate for a fresh channel.
    pub fn complete(&mut self, cid: u16, now: u64) {
        let c = self.connections[cid as usize];
        if c.progress != 0 && c.state == SlotState::Running {
            let pg = &mut self.progress[(c.progress % MAX_BLOCK) as usize];
            self.connections[cid as usize].rate =
                (now.saturating_sub(pg.t_start) / pg.count).max(1);
            pg.state = SlotState::Done;
            self.done_count += pg.count as u128;
        } else {
            self.connections[cid as usize].rate = 20 * RATE;
        }
    }

    /// Pick the next block for a worker with the given rate: the residual of
    /// the oldest reassignable `DEAD` slot, else a fresh cut of the cursor.
    fn get_next(&mut self, rate: u64) -> (u128, u64) {
        let mut j = self.tail;
        while j < self.head {
            let i = (j % MAX_BLOCK) as usize;
            if self.progress[i].state == SlotState::Dead && self.progress[i].count > 0 {
                let seed = self.progress[i].seed;
                let mut ncount = count_from_rate(rate);
                if ncount < self.progress[i].count {
                    // split: the residual block keeps its tail
                    let mut u = self.cursor.clone();
                    u.set_seed(seed);
                    self.progress[i].seed = u.advance(ncount);
                    self.progress[i].count -= ncount;
                } else {
                    ncount = self.progress[i].count;
                    self.progress[i].count = 0;
                    self.progress[i].state = SlotState::Done;
                }
                return (seed, ncount);
            }
            j += 1;
        }

        let seed = self.cursor.current();
        let ncount = count_from_rate(rate);
        self.cursor.advance(ncount);
        (seed, ncount)
    }

    /// Stage the next block at `head` for this channel. The slot becomes
    /// visible only once [`Ledger::commit`] runs after the assignment frames
    /// reach the socket.
    pub fn stage(&mut self, cid: u16, now: u64) -> (u128, u64) {
        let rate = self.connections[cid as usize].rate;
        let (seed, count) = self.get_next(rate);
        let i = (self.head % MAX_BLOCK) as usize;
        self.progress[i] = Block {
            seed,
            count,
            t_start: now,
            expected_t_end: now.saturating_add(count.saturating_mul(rate)),
            cid,
            state: SlotState::Running,
        };
        self.connections[cid as usize].state = SlotState::Running;
        self.connections[cid as usize].progress = self.head;
        (seed, count)
    }

    pub fn commit(&mut self) {
        self.head += 1;
    }

    /// Advance `tail` past completed work, then declare the oldest running
    /// block dead if it blew well past its expected end. At most one channel
    /// is condemned per call.
    pub fn set_timeout(&mut self, now: u64) -> Option<u16> {
        while self.tail < self.head {
            let i = (self.tail % MAX_BLOCK) as usize;
            if self.progress[i].state != SlotState::Done {
                break;
            }
            self.tail += 1;
        }

        if self.tail < self.head {
            let i = (self.tail % MAX_BLOCK) as usize;
            if self.progress[i].state == SlotState::Running
                && now > self.progress[i].expected_t_end + BLOCK_TIMEOUT
            {
                let cid = self.progress[i].cid;
                self.progress[i].state = SlotState::Dead;
                self.connections[cid as usize].state = SlotState::Dead;
                return Some(cid);
            }
        }
        None
    }

    /// The least seed still outstanding in the window, when it undercuts the
    /// cursor. Everything below it has been verified.
    pub fn min_outstanding_seed(&self) -> Option<u128> {
        let mut min_seed = self.cursor.current();
        let mut found = false;
        let mut j = self.tail;
        while j < self.head {
            let i = (j % MAX_BLOCK) as usize;
            if self.progress[i].seed < min_seed {
                min_seed = self.progress[i].seed;
                found = true;
            }
            j += 1;
        }
        found.then_some(min_seed)
    }
}

/// Coordinator configuration.
pub struct Config {
    pub port: u16,
    /// Start the cursor so the next dispatched candidate equals this number.
    pub resume: Option<u128>,
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: crate::SERVER_PORT,
            resume: None,
            log_path: PathBuf::from("lnrc.log"),
        }
    }
}

enum Event {
    Frame { token: u64, frame: Frame },
    Closed { token: u64 },
}

/// Bind the listen port and run the coordinator forever.
pub async fn run(cfg: Config) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
    run_on(listener, cfg).await
}

/// Run the coordinator on an already-bound listener (lets tests use an
/// ephemeral port).
pub async fn run_on(listener: TcpListener, cfg: Config) -> Result<()> {
    let mut cursor = Lcg::new();
    let mut done_count = 0u128;
    if let Some(number) = cfg.resume {
        cursor.set_seed(crate::lcg::number_to_seed(number));
        done_count = number;
    }
    let mut server = Coordinator {
        ledger: Ledger::new(cursor),
        writers: HashMap::new(),
        clock: Instant::now(),
        log_path: cfg.log_path,
        last_display_sec: 0,
        last_display_seed: 0,
    };
    server.ledger.done_count = done_count;
    info!(addr = %listener.local_addr()?, "coordinator listening");

    let (tx, mut rx) = mpsc::channel::<Event>(1024);
    let mut next_token: u64 = 1;
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if let Some(cid) = server.ledger.set_timeout(server.now()) {
            warn!(cid, "block timeout, channel declared dead");
        }

        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let token = next_token;
                next_token += 1;
                let (rd, wr) = stream.into_split();
                server.writers.insert(token, wr);
                tokio::spawn(reader_task(rd, token, tx.clone()));
                info!(%peer, token, "new connection");
            }
            Some(ev) = rx.recv() => {
                match ev {
                    Event::Frame { token, frame } => server.handle_frame(token, frame).await,
                    Event::Closed { token } => server.drop_socket(token),
                }
            }
            _ = tick.tick() => {
                server.display_progress();
            }
        }
    }
}

async fn reader_task(mut rd: OwnedReadHalf, token: u64, tx: mpsc::Sender<Event>) {
    loop {
        match tlv::read_frame(&mut rd).await {
            Ok(frame) => {
                if tx.send(Event::Frame { token, frame }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(token, error = %e, "connection read ended");
                let _ = tx.send(Event::Closed { token }).await;
                return;
            }
        }
    }
}

struct Coordinator {
    ledger: Ledger,
    writers: HashMap<u64, OwnedWriteHalf>,
    clock: Instant,
    log_path: PathBuf,
    last_display_sec: i64,
    last_display_seed: u128,
}

impl Coordinator {
    fn now(&self) -> u64 {
        self.clock.elapsed().as_nanos() as u64
    }

    /// Tear down every channel multiplexed over a socket.
    fn drop_socket(&mut self, token: u64) {
        for cid in self.ledger.broken_socket(token) {
            info!(cid, "end cid");
        }
        self.writers.remove(&token);
    }

    async fn write(&mut self, token: u64, frame: Frame) -> bool {
        match self.writers.get_mut(&token) {
            Some(w) => tlv::write_frame(w, &frame).await.is_ok(),
            None => false,
        }
    }

    async fn handle_frame(&mut self, token: u64, frame: Frame) {
        if frame.cid as usize >= MAX_CID
            && matches!(frame.ftype, FrameType::Stop | FrameType::Ready)
        {
            warn!(cid = frame.cid, "cid out of range");
            self.drop_socket(token);
            return;
        }
        match frame.ftype {
            FrameType::New => {
                let now = self.now();
                match self.ledger.allocate_cid(token, now) {
                    Some(cid) => {
                        info!(cid, "new cid");
                        if !self.write(token, Frame::new(FrameType::New, cid, 0)).await {
                            self.drop_socket(token);
                        }
                    }
                    None => warn!("cid space exhausted, ignoring NEW"),
                }
            }
            FrameType::Stop => {
                self.ledger.stop(frame.cid);
            }
            FrameType::Ready => {
                let now = self.now();
                self.ledger.complete(frame.cid, now);
                let (seed, count) = self.ledger.stage(frame.cid, now);
                let cid = frame.cid;
                let ok = self.write(token, Frame::new(FrameType::Seed, cid, seed)).await
                    && self.write(token, Frame::new(FrameType::Count, cid, count as u128)).await
                    && self.write(token, Frame::new(FrameType::Go, cid, 0)).await;
                if !ok {
                    self.drop_socket(token);
                    return;
                }
                self.ledger.commit();
                self.display_progress();
            }
            FrameType::Pseudoprime => self.report("Pseudoprime", frame.value),
            FrameType::Pseudocomposite => self.report("Pseudocomposite", frame.value),
            FrameType::B1 => self.report("B == 1", frame.value),
            // echoes of our own assignment frames carry nothing
            FrameType::Seed | FrameType::Count | FrameType::Go => {}
        }
    }

    /// One anomaly record: stdout plus an append-open-close on the log file,
    /// so readers tailing it never race a long-lived buffer.
    fn report(&self, tag: &str, v: u128) {
        let line = format!("{tag} {}", hex128(v));
        println!("{line}");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
        {
            Ok(mut f) => {
                let _ = writeln!(f, "{line}");
            }
            Err(e) => warn!(error = %e, "cannot append to anomaly log"),
        }
    }

    fn display_progress(&mut self) {
        let now = chrono::Local::now();
        let sec = now.timestamp();
        if self.ledger.cursor().sequential() {
            if let Some(min_seed) = self.ledger.min_outstanding_seed() {
                if sec != self.last_display_sec && min_seed != self.last_display_seed {
                    self.last_display_sec = sec;
                    self.last_display_seed = min_seed;
                    println!(
                        "{} Completed {}",
                        now.format("%a %b %e %H:%M:%S %Y"),
                        hex128(seed_to_number(min_seed))
                    );
                }
            }
        } else if sec - self.last_display_sec > 5 {
            self.last_display_sec = sec;
            println!(
                "{} Completed count {}",
                now.format("%a %b %e %H:%M:%S %Y"),
                hex128(self.ledger.done_count)
            );
        }
    }
}
