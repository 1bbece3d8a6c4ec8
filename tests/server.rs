//! End-to-end tests: a real server thread, real TCP clients, and the
//! binary wire protocol.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use zkv::out::{ErrCode, Tag};
use zkv::server::Server;

fn start_server() -> SocketAddr {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut server = Server::bind("127.0.0.1:0".parse().unwrap()).expect("bind test server");
        tx.send(server.local_addr().expect("bound address")).unwrap();
        let _ = server.run();
    });
    rx.recv().expect("server thread reports its address")
}

fn frame(args: &[&[u8]]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for a in args {
        body.extend_from_slice(&(a.len() as u32).to_le_bytes());
        body.extend_from_slice(a);
    }
    let mut out = (body.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&body);
    out
}

#[derive(Debug, PartialEq)]
enum Resp {
    Nil,
    Err(u32, String),
    Int(i64),
    Str(Vec<u8>),
    Dbl(f64),
    Arr(Vec<Resp>),
}

fn take_u32(buf: &[u8], at: &mut usize) -> u32 {
    let v = u32::from_le_bytes(buf[*at..*at + 4].try_into().unwrap());
    *at += 4;
    v
}

fn decode_one(buf: &[u8], at: &mut usize) -> Resp {
    let tag = buf[*at];
    *at += 1;
    match tag {
        t if t == Tag::Nil as u8 => Resp::Nil,
        t if t == Tag::Err as u8 => {
            let code = take_u32(buf, at);
            let len = take_u32(buf, at) as usize;
            let msg = String::from_utf8(buf[*at..*at + len].to_vec()).unwrap();
            *at += len;
            Resp::Err(code, msg)
        }
        t if t == Tag::Int as u8 => {
            let v = i64::from_le_bytes(buf[*at..*at + 8].try_into().unwrap());
            *at += 8;
            Resp::Int(v)
        }
        t if t == Tag::Str as u8 => {
            let len = take_u32(buf, at) as usize;
            let v = buf[*at..*at + len].to_vec();
            *at += len;
            Resp::Str(v)
        }
        t if t == Tag::Dbl as u8 => {
            let v = f64::from_le_bytes(buf[*at..*at + 8].try_into().unwrap());
            *at += 8;
            Resp::Dbl(v)
        }
        t if t == Tag::Arr as u8 => {
            let n = take_u32(buf, at);
            Resp::Arr((0..n).map(|_| decode_one(buf, at)).collect())
        }
        t => panic!("bad tag {t}"),
    }
}

struct Client {
    stream: TcpStream,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect to test server");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Self { stream }
    }

    fn send(&mut self, args: &[&[u8]]) {
        self.stream.write_all(&frame(args)).expect("send request");
    }

    /// One whole response: every value sharing its length prefix.
    fn recv(&mut self) -> Vec<Resp> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).expect("response header");
        let len = u32::from_le_bytes(header) as usize;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).expect("response body");
        let mut values = Vec::new();
        let mut at = 0;
        while at < body.len() {
            values.push(decode_one(&body, &mut at));
        }
        values
    }

    fn query(&mut self, args: &[&[u8]]) -> Vec<Resp> {
        self.send(args);
        self.recv()
    }

    fn query1(&mut self, args: &[&[u8]]) -> Resp {
        let mut values = self.query(args);
        assert_eq!(values.len(), 1, "expected one value, got {values:?}");
        values.pop().unwrap()
    }
}

#[test]
fn string_round_trip() {
    let mut c = Client::connect(start_server());
    assert_eq!(c.query1(&[b"set", b"foo", b"bar"]), Resp::Nil);
    assert_eq!(c.query1(&[b"get", b"foo"]), Resp::Str(b"bar".to_vec()));
    assert_eq!(c.query1(&[b"set", b"foo", b"rebar"]), Resp::Nil);
    assert_eq!(c.query1(&[b"get", b"foo"]), Resp::Str(b"rebar".to_vec()));
    assert_eq!(c.query1(&[b"del", b"foo"]), Resp::Int(1));
    assert_eq!(
        c.query1(&[b"get", b"foo"]),
        Resp::Err(ErrCode::Unknown as u32, "key not found".into())
    );
    assert_eq!(
        c.query(&[b"del", b"foo"]),
        vec![
            Resp::Err(ErrCode::Unknown as u32, "key not found".into()),
            Resp::Int(0),
        ]
    );
}

#[test]
fn sorted_set_scenario() {
    let mut c = Client::connect(start_server());
    assert_eq!(c.query1(&[b"zadd", b"s", b"1", b"a"]), Resp::Int(1));
    assert_eq!(c.query1(&[b"zadd", b"s", b"2", b"b"]), Resp::Int(1));
    assert_eq!(c.query1(&[b"zadd", b"s", b"2", b"a"]), Resp::Int(0));
    assert_eq!(c.query1(&[b"zscore", b"s", b"a"]), Resp::Dbl(2.0));
    // both members share score 2; the tie breaks on name bytes
    assert_eq!(
        c.query1(&[b"zquery", b"s", b"0", b"", b"0", b"10"]),
        Resp::Arr(vec![
            Resp::Str(b"a".to_vec()),
            Resp::Dbl(2.0),
            Resp::Str(b"b".to_vec()),
            Resp::Dbl(2.0),
        ])
    );
    assert_eq!(c.query1(&[b"zrem", b"s", b"a"]), Resp::Int(1));
    assert_eq!(c.query1(&[b"zscore", b"s", b"a"]), Resp::Nil);
}

#[test]
fn zquery_boundaries() {
    let mut c = Client::connect(start_server());
    c.query1(&[b"zadd", b"z", b"1", b"a"]);
    c.query1(&[b"zadd", b"z", b"2", b"b"]);
    assert_eq!(c.query1(&[b"zquery", b"z", b"0", b"", b"0", b"0"]), Resp::Arr(vec![]));
    assert_eq!(c.query1(&[b"zquery", b"z", b"0", b"", b"-1", b"10"]), Resp::Arr(vec![]));
    assert_eq!(
        c.query1(&[b"zquery", b"z", b"0", b"", b"1", b"10"]),
        Resp::Arr(vec![Resp::Str(b"b".to_vec()), Resp::Dbl(2.0)])
    );
    assert_eq!(
        c.query1(&[b"zquery", b"nothing", b"0", b"", b"0", b"10"]),
        Resp::Arr(vec![])
    );
}

#[test]
fn ttl_expiry_reaps_the_key() {
    let mut c = Client::connect(start_server());
    assert_eq!(c.query1(&[b"set", b"k", b"v"]), Resp::Nil);
    assert_eq!(c.query1(&[b"pexpire", b"k", b"80"]), Resp::Int(1));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(
        c.query1(&[b"get", b"k"]),
        Resp::Err(ErrCode::Unknown as u32, "key not found".into())
    );
    assert_eq!(c.query1(&[b"pttl", b"k"]), Resp::Int(-2));
}

#[test]
fn pttl_reports_remaining_and_clears() {
    let mut c = Client::connect(start_server());
    c.query1(&[b"set", b"k", b"v"]);
    assert_eq!(c.query1(&[b"pttl", b"k"]), Resp::Int(-1));
    assert_eq!(c.query1(&[b"pexpire", b"k", b"60000"]), Resp::Int(1));
    let Resp::Int(left) = c.query1(&[b"pttl", b"k"]) else {
        panic!("pttl answers with an int");
    };
    assert!((59_000..=60_000).contains(&left), "remaining {left}");

    assert_eq!(c.query1(&[b"pexpire", b"k", b"-1"]), Resp::Int(1));
    assert_eq!(c.query1(&[b"pttl", b"k"]), Resp::Int(-1));
    assert_eq!(c.query1(&[b"get", b"k"]), Resp::Str(b"v".to_vec()));
    assert_eq!(c.query1(&[b"pexpire", b"missing", b"100"]), Resp::Int(0));
}

#[test]
fn pipelined_requests_answer_in_order() {
    let mut c = Client::connect(start_server());
    let mut bytes = frame(&[b"set", b"a", b"1"]);
    bytes.extend_from_slice(&frame(&[b"set", b"b", b"2"]));
    bytes.extend_from_slice(&frame(&[b"keys"]));
    c.stream.write_all(&bytes).unwrap();

    assert_eq!(c.recv(), vec![Resp::Nil]);
    assert_eq!(c.recv(), vec![Resp::Nil]);
    let Resp::Arr(items) = c.recv().pop().unwrap() else {
        panic!("keys answers with an array");
    };
    let mut names: Vec<_> = items
        .into_iter()
        .map(|r| match r {
            Resp::Str(s) => s,
            other => panic!("unexpected element {other:?}"),
        })
        .collect();
    names.sort();
    assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn unknown_command_keeps_the_connection() {
    let mut c = Client::connect(start_server());
    assert_eq!(
        c.query1(&[b"PING"]),
        Resp::Err(ErrCode::Unknown as u32, "unknown command".into())
    );
    assert_eq!(c.query1(&[b"set", b"k", b"v"]), Resp::Nil);
}

#[test]
fn oversized_header_closes_the_connection() {
    let mut c = Client::connect(start_server());
    let too_big = ((32usize << 20) + 1) as u32;
    c.stream.write_all(&too_big.to_le_bytes()).unwrap();
    let mut buf = [0u8; 16];
    match c.stream.read(&mut buf) {
        Ok(0) => {}
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        other => panic!("expected the server to hang up, got {other:?}"),
    }
}

#[test]
fn request_at_the_frame_cap_is_accepted() {
    let mut c = Client::connect(start_server());
    // body = nstr + 3 length-prefixed args; pad the value so the body
    // lands exactly on the 32 MiB cap
    let overhead = 4 + (4 + 3) + (4 + 1) + 4;
    let value = vec![b'x'; (32 << 20) - overhead];
    assert_eq!(c.query1(&[b"set", b"k", &value]), Resp::Nil);
    assert_eq!(c.query1(&[b"pttl", b"k"]), Resp::Int(-1));
}

#[test]
fn large_values_survive_split_reads_and_writes() {
    let mut c = Client::connect(start_server());
    let value: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(c.query1(&[b"set", b"big", &value]), Resp::Nil);
    assert_eq!(c.query1(&[b"get", b"big"]), Resp::Str(value));
}

#[test]
fn deleting_a_large_sorted_set_offloads_cleanly() {
    let mut c = Client::connect(start_server());
    let mut bytes = Vec::new();
    let n = 1_200;
    for i in 0..n {
        let score = format!("{i}");
        let member = format!("member-{i:04}");
        bytes.extend_from_slice(&frame(&[b"zadd", b"big", score.as_bytes(), member.as_bytes()]));
    }
    c.stream.write_all(&bytes).unwrap();
    for _ in 0..n {
        assert_eq!(c.recv(), vec![Resp::Int(1)]);
    }
    assert_eq!(c.query1(&[b"del", b"big"]), Resp::Int(1));
    assert_eq!(
        c.query1(&[b"zquery", b"big", b"0", b"", b"0", b"1"]),
        Resp::Arr(vec![])
    );
    // the server keeps answering while the teardown runs elsewhere
    assert_eq!(c.query1(&[b"set", b"after", b"1"]), Resp::Nil);
}

#[test]
fn idle_connections_are_evicted() {
    let addr = start_server();
    let mut idle = Client::connect(addr);
    thread::sleep(Duration::from_millis(5_400));
    let mut buf = [0u8; 16];
    match idle.stream.read(&mut buf) {
        Ok(0) => {}
        Err(e) if e.kind() == ErrorKind::ConnectionReset => {}
        other => panic!("expected eviction, got {other:?}"),
    }
    // a fresh connection still works
    let mut c = Client::connect(addr);
    assert_eq!(c.query1(&[b"set", b"k", b"v"]), Resp::Nil);
}
