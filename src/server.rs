//! The event loop: one thread, one `poll(2)` call per tick, every socket
//! nonblocking. Readiness drives the connection handlers; the poll timeout
//! is computed from the nearest timer (idle connection or TTL deadline),
//! and timers run after I/O on every tick.

use std::net::SocketAddr;
use std::os::unix::io::{AsFd, AsRawFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::conn::{handle_read, handle_write, Conn};
use crate::db::{monotonic_ms, Db};
use crate::error::ServerError;

/// Connections with no readiness events for this long are evicted.
const K_IDLE_TIMEOUT_MS: u64 = 5000;

/// Idle connections in eviction order: oldest activity at the head,
/// freshest at the tail. Links are fds into the connection table.
#[derive(Debug, Default)]
struct IdleList {
    head: Option<RawFd>,
    tail: Option<RawFd>,
}

fn idle_detach(conns: &mut [Option<Conn>], idle: &mut IdleList, fd: RawFd) {
    let (prev, next) = {
        let conn = conns[fd as usize].as_ref().expect("idle link points at a live conn");
        (conn.idle_prev, conn.idle_next)
    };
    match prev {
        Some(p) => conns[p as usize].as_mut().expect("idle link points at a live conn").idle_next = next,
        None => idle.head = next,
    }
    match next {
        Some(n) => conns[n as usize].as_mut().expect("idle link points at a live conn").idle_prev = prev,
        None => idle.tail = prev,
    }
    let conn = conns[fd as usize].as_mut().expect("idle link points at a live conn");
    conn.idle_prev = None;
    conn.idle_next = None;
}

fn idle_push_back(conns: &mut [Option<Conn>], idle: &mut IdleList, fd: RawFd) {
    let old_tail = idle.tail;
    {
        let conn = conns[fd as usize].as_mut().expect("idle link points at a live conn");
        conn.idle_prev = old_tail;
        conn.idle_next = None;
    }
    match old_tail {
        Some(t) => conns[t as usize].as_mut().expect("idle link points at a live conn").idle_next = Some(fd),
        None => idle.head = Some(fd),
    }
    idle.tail = Some(fd);
}

pub struct Server {
    listener: Socket,
    conns: Vec<Option<Conn>>,
    idle: IdleList,
    db: Db,
}

impl Server {
    pub fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;
        listener.bind(&addr.into())?;
        listener.set_nonblocking(true)?;
        listener.listen(nix::libc::SOMAXCONN)?;
        Ok(Self {
            listener,
            conns: Vec::new(),
            idle: IdleList::default(),
            db: Db::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        let addr = self.listener.local_addr()?;
        Ok(addr.as_socket().expect("tcp listener has an inet address"))
    }

    pub fn run(&mut self) -> Result<(), ServerError> {
        info!("listening on {}", self.local_addr()?);
        loop {
            self.tick()?;
        }
    }

    fn tick(&mut self) -> Result<(), ServerError> {
        // listener first, then one descriptor per live connection
        let mut poll_fds = Vec::with_capacity(1 + self.conns.len());
        poll_fds.push(PollFd::new(&self.listener, PollFlags::POLLIN));
        for conn in self.conns.iter().flatten() {
            let mut events = PollFlags::POLLERR;
            if conn.want_read {
                events |= PollFlags::POLLIN;
            }
            if conn.want_write {
                events |= PollFlags::POLLOUT;
            }
            poll_fds.push(PollFd::new(&conn.socket, events));
        }

        let timeout_ms = self.next_timer_ms();
        match poll(&mut poll_fds, timeout_ms) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => return Err(ServerError::Poll(e)),
        }

        let ready: Vec<(RawFd, PollFlags)> = poll_fds
            .iter()
            .map(|p| (p.as_fd().as_raw_fd(), p.revents().unwrap_or(PollFlags::empty())))
            .collect();
        drop(poll_fds);

        let listener_fd = self.listener.as_raw_fd();
        let now_ms = monotonic_ms();
        for &(fd, revents) in &ready {
            if revents.is_empty() {
                continue;
            }
            if fd == listener_fd {
                if revents.contains(PollFlags::POLLIN) {
                    self.accept_new();
                }
                continue;
            }

            let Server { conns, idle, db, .. } = self;
            if conns.get(fd as usize).map_or(true, |c| c.is_none()) {
                continue;
            }

            // any readiness counts as activity: bump to the idle tail
            conns[fd as usize].as_mut().expect("checked above").last_active_ms = now_ms;
            idle_detach(conns, idle, fd);
            idle_push_back(conns, idle, fd);

            let conn = conns[fd as usize].as_mut().expect("checked above");
            if revents.contains(PollFlags::POLLIN) && conn.want_read {
                handle_read(conn, db);
            }
            if revents.contains(PollFlags::POLLOUT) && conn.want_write && !conn.outgoing.is_empty() {
                handle_write(conn);
            }

            if revents.contains(PollFlags::POLLERR) || conn.want_close {
                self.close_conn(fd);
            }
        }

        self.process_timers();
        Ok(())
    }

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, peer)) => {
                    if let Err(e) = socket.set_nonblocking(true) {
                        warn!("failed to set up accepted socket: {e}");
                        continue;
                    }
                    let fd = socket.as_raw_fd();
                    debug!(fd, peer = ?peer.as_socket(), "client connected");
                    if self.conns.len() <= fd as usize {
                        self.conns.resize_with(fd as usize + 1, || None);
                    }
                    self.conns[fd as usize] = Some(Conn::new(socket, monotonic_ms()));
                    idle_push_back(&mut self.conns, &mut self.idle, fd);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn close_conn(&mut self, fd: RawFd) {
        idle_detach(&mut self.conns, &mut self.idle, fd);
        self.conns[fd as usize] = None; // drops the socket
        debug!(fd, "connection closed");
    }

    /// Poll timeout until the nearest timer: non-negative delta in ms, or
    /// -1 to wait indefinitely when no timer exists.
    fn next_timer_ms(&self) -> i32 {
        let now_ms = monotonic_ms();
        let mut next_ms = u64::MAX;
        if let Some(fd) = self.idle.head {
            let conn = self.conns[fd as usize].as_ref().expect("idle link points at a live conn");
            next_ms = conn.last_active_ms + K_IDLE_TIMEOUT_MS;
        }
        if let Some(top) = self.db.heap.peek() {
            next_ms = next_ms.min(top.deadline_ms);
        }
        if next_ms == u64::MAX {
            -1
        } else if next_ms <= now_ms {
            0
        } else {
            (next_ms - now_ms).min(i32::MAX as u64) as i32
        }
    }

    fn process_timers(&mut self) {
        let now_ms = monotonic_ms();
        // idle eviction, oldest first; the list is deadline-sorted
        while let Some(fd) = self.idle.head {
            let conn = self.conns[fd as usize].as_ref().expect("idle link points at a live conn");
            if conn.last_active_ms + K_IDLE_TIMEOUT_MS > now_ms {
                break;
            }
            debug!(fd, "idle connection evicted");
            self.close_conn(fd);
        }
        self.db.process_expired(now_ms);
    }
}
