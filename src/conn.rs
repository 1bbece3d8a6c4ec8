//! Per-connection state and the framing layer.
//!
//! A connection owns its nonblocking socket plus an incoming and an
//! outgoing buffer. The event loop tells it when the socket is ready; the
//! handlers here move bytes, carve complete requests out of the incoming
//! buffer, and append length-prefixed responses to the outgoing one.

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;

use socket2::Socket;
use thiserror::Error;
use tracing::{debug, warn};

use crate::buf::Buffer;
use crate::cmd::do_request;
use crate::db::Db;
use crate::out::{response_begin, response_end, K_MAX_MSG};

/// Cap on the argument count of a single request.
const K_MAX_ARGS: usize = 200_000;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("request of {0} bytes exceeds the frame cap")]
    TooLong(usize),

    #[error("request with {0} arguments exceeds the argument cap")]
    TooManyArgs(usize),

    #[error("malformed request body")]
    Malformed,
}

#[derive(Debug)]
pub struct Conn {
    pub socket: Socket,
    // what the event loop should wait for on our behalf
    pub want_read: bool,
    pub want_write: bool,
    pub want_close: bool,
    pub incoming: Buffer,
    pub outgoing: Buffer,
    pub last_active_ms: u64,
    // links of the idle list, as fds into the connection table
    pub idle_prev: Option<RawFd>,
    pub idle_next: Option<RawFd>,
}

impl Conn {
    pub fn new(socket: Socket, now_ms: u64) -> Self {
        Self {
            socket,
            want_read: true,
            want_write: false,
            want_close: false,
            // most requests and responses fit well under a page
            incoming: Buffer::with_capacity(4096),
            outgoing: Buffer::with_capacity(4096),
            last_active_ms: now_ms,
            idle_prev: None,
            idle_next: None,
        }
    }
}

/// Carve one request off the front of `buf`.
/// `Ok(None)` means the frame is still incomplete; wait for more bytes.
fn parse_request(buf: &Buffer) -> Result<Option<(Vec<Vec<u8>>, usize)>, FrameError> {
    let Some(header) = buf.peek(4) else {
        return Ok(None);
    };
    let len = u32::from_le_bytes(header.try_into().expect("peeked 4 bytes")) as usize;
    if len > K_MAX_MSG {
        return Err(FrameError::TooLong(len));
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }

    let body = &buf[4..4 + len];
    if body.len() < 4 {
        return Err(FrameError::Malformed);
    }
    let nstr = u32::from_le_bytes(body[..4].try_into().expect("sliced 4 bytes")) as usize;
    if nstr > K_MAX_ARGS {
        return Err(FrameError::TooManyArgs(nstr));
    }

    let mut args = Vec::with_capacity(nstr.min(64));
    let mut at = 4;
    for _ in 0..nstr {
        if body.len() - at < 4 {
            return Err(FrameError::Malformed);
        }
        let arg_len = u32::from_le_bytes(body[at..at + 4].try_into().expect("sliced 4 bytes")) as usize;
        at += 4;
        if body.len() - at < arg_len {
            return Err(FrameError::Malformed);
        }
        args.push(body[at..at + arg_len].to_vec());
        at += arg_len;
    }
    if at != body.len() {
        // bytes left over after the declared argument list
        return Err(FrameError::Malformed);
    }
    Ok(Some((args, 4 + len)))
}

/// Dispatch every complete pipelined request sitting in the incoming
/// buffer, appending one length-prefixed response each, in order.
fn process_incoming(conn: &mut Conn, db: &mut Db) {
    loop {
        match parse_request(&conn.incoming) {
            Ok(None) => break,
            Ok(Some((args, consumed))) => {
                let header = response_begin(&mut conn.outgoing);
                do_request(db, &args, &mut conn.outgoing);
                response_end(&mut conn.outgoing, header);
                conn.incoming.consume(consumed);
            }
            Err(e) => {
                warn!("protocol error: {e}");
                conn.want_close = true;
                break;
            }
        }
    }
}

pub fn handle_read(conn: &mut Conn, db: &mut Db) {
    let mut buf = [0u8; 64 * 1024];
    let n = match conn.socket.read(&mut buf) {
        Ok(0) => {
            conn.want_close = true; // EOF
            return;
        }
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
        Err(e) => {
            debug!("read error: {e}");
            conn.want_close = true;
            return;
        }
    };
    conn.incoming.append(&buf[..n]);

    process_incoming(conn, db);

    if !conn.outgoing.is_empty() {
        conn.want_read = false;
        conn.want_write = true;
        // the response usually fits the socket buffer; try before polling
        handle_write(conn);
    }
}

pub fn handle_write(conn: &mut Conn) {
    assert!(!conn.outgoing.is_empty());
    let (socket, outgoing) = (&mut conn.socket, &conn.outgoing);
    match socket.write(outgoing) {
        Ok(0) => conn.want_close = true,
        Ok(n) => {
            conn.outgoing.consume(n);
            if conn.outgoing.is_empty() {
                conn.want_read = true;
                conn.want_write = false;
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => {
            debug!("write error: {e}");
            conn.want_close = true;
        }
    }
}
