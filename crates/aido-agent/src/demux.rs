//! Container log stream demultiplexing
//!
//! When a container runs without a TTY the engine interleaves stdout and
//! stderr in one byte stream. Each frame is an 8-byte header followed by a
//! payload:
//!
//! ```text
//! [selector, 0, 0, 0, len_be[0], len_be[1], len_be[2], len_be[3]] payload...
//! ```
//!
//! Selector 1 is stdout and 2 is stderr. Anything other than 2 is attributed
//! to stdout.

const HEADER_LEN: usize = 8;

/// Stream selector carried in byte 0 of a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamKind {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

/// Output split back into its two streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demuxed {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Demuxed {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Split a multiplexed log buffer into stdout and stderr.
///
/// - Trailing bytes too short to be a header go to stdout.
/// - A frame whose declared length runs past the end of the buffer gives what
///   is there to its own stream, and parsing stops.
pub fn demultiplex(buf: &[u8]) -> Demuxed {
    let mut out = Demuxed::default();
    let mut rest = buf;

    while !rest.is_empty() {
        if rest.len() < HEADER_LEN {
            out.stdout.extend_from_slice(rest);
            break;
        }

        let selector = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let body = &rest[HEADER_LEN..];
        let target = if selector == StreamKind::Stderr as u8 {
            &mut out.stderr
        } else {
            &mut out.stdout
        };

        if len > body.len() {
            target.extend_from_slice(body);
            break;
        }

        target.extend_from_slice(&body[..len]);
        rest = &body[len..];
    }

    out
}

/// Build one frame. Payloads longer than `u32::MAX` are split across frames.
pub fn encode_frame(stream: StreamKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + HEADER_LEN);
    for chunk in payload.chunks(u32::MAX as usize) {
        out.push(stream as u8);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
        out.extend_from_slice(chunk);
    }
    out
}
