//! # Tlv — Length-Prefixed Binary Frames
//!
//! The wire protocol between coordinator, proxy and workers. One frame is
//!
//! ```text
//! type(1)  cid(2, LE)  len(2, LE)  value(len, LE unsigned)
//! ```
//!
//! with `1 <= len <= 16`. The encoder emits the minimal value length
//! (leading zero bytes stripped, at least one byte kept); the decoder rejects
//! zero and oversized lengths and unknown type bytes, which callers treat as
//! a protocol error on the connection.
//!
//! Also hosts the 128-bit text helpers shared by the anomaly log and the CLI:
//! values print as `0x<16hex><16hex>` (two 64-bit halves, high first) and
//! parse from decimal or `0x` hex.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Block start seed (coordinator → worker).
    Seed = 1,
    /// Block iteration count (coordinator → worker).
    Count = 2,
    /// Terminate the channel (either direction).
    Stop = 3,
    /// Start computing the staged block (coordinator → worker).
    Go = 4,
    /// A prime failing the quadratic test (worker → coordinator).
    Pseudocomposite = 10,
    /// A composite passing the quadratic test (worker → coordinator).
    Pseudoprime = 11,
    /// Idle, requesting work (worker → coordinator).
    Ready = 12,
    /// Channel id allocation (worker → coordinator, echoed back).
    New = 13,
    /// Legacy degenerate-ring report, still logged.
    B1 = 20,
}

impl TryFrom<u8> for FrameType {
    type Error = io::Error;

    fn try_from(b: u8) -> io::Result<FrameType> {
        Ok(match b {
            1 => FrameType::Seed,
            2 => FrameType::Count,
            3 => FrameType::Stop,
            4 => FrameType::Go,
            10 => FrameType::Pseudocomposite,
            11 => FrameType::Pseudoprime,
            12 => FrameType::Ready,
            13 => FrameType::New,
            20 => FrameType::B1,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame type {b}"),
                ))
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub ftype: FrameType,
    pub cid: u16,
    pub value: u128,
}

impl Frame {
    pub fn new(ftype: FrameType, cid: u16, value: u128) -> Self {
        Frame { ftype, cid, value }
    }
}

/// Minimal value length in bytes: leading zeroes stripped, at least one kept.
pub fn value_len(value: u128) -> usize {
    let mut l = 1usize;
    let mut cmp = 0xffu128;
    while l < 16 && value > cmp {
        cmp = (cmp << 8) + 0xff;
        l += 1;
    }
    l
}

/// Encode a frame to its wire bytes (5-byte header + minimal value).
pub fn encode(frame: &Frame) -> Vec<u8> {
    let l = value_len(frame.value);
    let mut buf = Vec::with_capacity(5 + l);
    buf.push(frame.ftype as u8);
    buf.extend_from_slice(&frame.cid.to_le_bytes());
    buf.extend_from_slice(&(l as u16).to_le_bytes());
    let mut v = frame.value;
    for _ in 0..l {
        buf.push((v & 0xff) as u8);
        v >>= 8;
    }
    buf
}

/// Decode one frame from `buf`, returning it and the bytes consumed.
pub fn decode(buf: &[u8]) -> io::Result<(Frame, usize)> {
    if buf.len() < 5 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short frame header"));
    }
    let ftype = FrameType::try_from(buf[0])?;
    let cid = u16::from_le_bytes([buf[1], buf[2]]);
    let len = u16::from_le_bytes([buf[3], buf[4]]) as usize;
    if len < 1 || len > 16 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("illegal value length {len}"),
        ));
    }
    if buf.len() < 5 + len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short frame value"));
    }
    let mut value = 0u128;
    for i in (0..len).rev() {
        value = (value << 8) | buf[5 + i] as u128;
    }
    Ok((Frame { ftype, cid, value }, 5 + len))
}

/// Read one frame from a stream. A peer closing mid-frame surfaces as
/// `UnexpectedEof`; an illegal length or unknown type as `InvalidData`.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Frame> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header).await?;
    let ftype = FrameType::try_from(header[0])?;
    let cid = u16::from_le_bytes([header[1], header[2]]);
    let len = u16::from_le_bytes([header[3], header[4]]) as usize;
    if len < 1 || len > 16 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("illegal value length {len}"),
        ));
    }
    let mut value_bytes = [0u8; 16];
    r.read_exact(&mut value_bytes[..len]).await?;
    let mut value = 0u128;
    for i in (0..len).rev() {
        value = (value << 8) | value_bytes[i] as u128;
    }
    Ok(Frame { ftype, cid, value })
}

/// Write one frame to a stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> io::Result<()> {
    let bytes = encode(frame);
    w.write_all(&bytes).await
}

/// `0x<16hex><16hex>` — a 128-bit value as two 64-bit halves, high first.
pub fn hex128(v: u128) -> String {
    format!("0x{:016x}{:016x}", (v >> 64) as u64, v as u64)
}

/// Parse a decimal or `0x`-prefixed hex 128-bit value.
pub fn parse_u128(s: &str) -> anyhow::Result<u128> {
    let s = s.trim();
    let v = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u128::from_str_radix(hex, 16)?
    } else {
        s.parse::<u128>()?
    };
    Ok(v)
}
