//! Command dispatch: decoded request arguments in, tagged response values
//! out. Verbs are case-sensitive and arities exact; anything else is an
//! `unknown command` error record and the connection carries on.

use std::rc::Rc;
use std::sync::Arc;

use crate::buf::Buffer;
use crate::db::{monotonic_ms, Db};
use crate::entry::{Entry, Value};
use crate::heap::HeapItem;
use crate::out::{begin_arr, end_arr, out_arr, out_dbl, out_err, out_int, out_nil, out_str, ErrCode};

pub fn do_request(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    match (cmd.first().map(|v| v.as_slice()), cmd.len()) {
        (Some(b"get"), 2) => do_get(db, cmd, out),
        (Some(b"set"), 3) => do_set(db, cmd, out),
        (Some(b"del"), 2) => do_del(db, cmd, out),
        (Some(b"keys"), 1) => do_keys(db, out),
        (Some(b"zadd"), 4) => do_zadd(db, cmd, out),
        (Some(b"zrem"), 3) => do_zrem(db, cmd, out),
        (Some(b"zscore"), 3) => do_zscore(db, cmd, out),
        (Some(b"zquery"), 6) => do_zquery(db, cmd, out),
        (Some(b"pexpire"), 3) => do_pexpire(db, cmd, out),
        (Some(b"pttl"), 2) => do_pttl(db, cmd, out),
        _ => out_err(out, ErrCode::Unknown, "unknown command"),
    }
}

fn parse_int(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn parse_float(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn do_get(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    match db.map.lookup(&cmd[1]) {
        None => out_err(out, ErrCode::Unknown, "key not found"),
        Some(entry) => match &entry.value {
            Value::Str(v) => out_str(out, v),
            Value::ZSet(_) => out_err(out, ErrCode::BadArg, "expected string"),
        },
    }
}

fn do_set(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    // take the entry out of the table, swap the value, put it back; the
    // TTL cell rides along untouched
    match db.map.delete(&cmd[1]) {
        Some(mut entry) => {
            if let Value::Str(v) = &mut entry.value {
                *v = cmd[2].clone();
                out_nil(out);
            } else {
                out_err(out, ErrCode::BadArg, "expected string");
            }
            db.map.insert(entry);
        }
        None => {
            db.map.insert(Entry::new_str(&cmd[1], cmd[2].clone()));
            out_nil(out);
        }
    }
}

fn do_del(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    let existed = db.remove(&cmd[1]);
    if !existed {
        // historical wire shape: the miss emits an error record and the
        // count that follows it
        out_err(out, ErrCode::Unknown, "key not found");
    }
    out_int(out, existed as i64);
}

fn do_keys(db: &mut Db, out: &mut Buffer) {
    out_arr(out, db.map.size() as u32);
    for entry in db.map.iter() {
        out_str(out, &entry.key);
    }
}

fn do_zadd(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    let Some(score) = parse_float(&cmd[2]) else {
        out_err(out, ErrCode::BadArg, "expected fp number");
        return;
    };
    let mut entry = match db.map.delete(&cmd[1]) {
        Some(entry) => {
            if matches!(entry.value, Value::Str(_)) {
                db.map.insert(entry);
                out_err(out, ErrCode::BadArg, "expected zset");
                return;
            }
            entry
        }
        None => Entry::new_zset(&cmd[1]),
    };
    if let Value::ZSet(zset) = &mut entry.value {
        let added = zset.insert(&cmd[3], score);
        out_int(out, added as i64);
    }
    db.map.insert(entry);
}

fn do_zrem(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    let Some(mut entry) = db.map.delete(&cmd[1]) else {
        out_int(out, 0);
        return;
    };
    if matches!(entry.value, Value::Str(_)) {
        db.map.insert(entry);
        out_err(out, ErrCode::BadArg, "expected zset");
        return;
    }
    if let Value::ZSet(zset) = &mut entry.value {
        let removed = match zset.lookup(&cmd[2]) {
            Some(id) => {
                zset.delete(id);
                true
            }
            None => false,
        };
        out_int(out, removed as i64);
    }
    db.map.insert(entry);
}

fn do_zscore(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    match db.map.lookup(&cmd[1]) {
        None => out_nil(out),
        Some(entry) => match &entry.value {
            Value::ZSet(zset) => match zset.lookup(&cmd[2]) {
                Some(id) => out_dbl(out, zset.node(id).score),
                None => out_nil(out),
            },
            Value::Str(_) => out_err(out, ErrCode::BadArg, "expected zset"),
        },
    }
}

fn do_zquery(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    let Some(score) = parse_float(&cmd[2]) else {
        out_err(out, ErrCode::BadArg, "expected fp number");
        return;
    };
    let name = &cmd[3];
    let Some(offset) = parse_int(&cmd[4]) else {
        out_err(out, ErrCode::BadArg, "expected int");
        return;
    };
    let Some(limit) = parse_int(&cmd[5]) else {
        out_err(out, ErrCode::BadArg, "expected int");
        return;
    };

    let Some(entry) = db.map.lookup(&cmd[1]) else {
        // an absent key reads as an empty set
        out_arr(out, 0);
        return;
    };
    let Value::ZSet(zset) = &entry.value else {
        out_err(out, ErrCode::BadArg, "expected zset");
        return;
    };

    if limit <= 0 {
        out_arr(out, 0);
        return;
    }

    let mut node = zset.seek_ge(score, name);
    if let Some(id) = node {
        node = zset.offset(id, offset);
    }

    // the array header counts every emitted value: two per member
    let ctx = begin_arr(out);
    let mut n: i64 = 0;
    while let Some(id) = node {
        if n >= limit.saturating_mul(2) {
            break;
        }
        let member = zset.node(id);
        out_str(out, &member.name);
        out_dbl(out, member.score);
        n += 2;
        node = zset.offset(id, 1);
    }
    end_arr(out, ctx, n as u32);
}

fn do_pexpire(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    let Some(ttl_ms) = parse_int(&cmd[2]) else {
        out_err(out, ErrCode::BadArg, "expected int64");
        return;
    };
    let Some(entry) = db.map.lookup(&cmd[1]) else {
        out_int(out, 0);
        return;
    };
    if ttl_ms < 0 {
        if let Some(pos) = entry.heap_pos.get() {
            db.heap.delete(pos);
        }
    } else {
        let deadline = monotonic_ms() + ttl_ms as u64;
        let item = HeapItem::new(deadline, Arc::clone(&entry.key), Rc::clone(&entry.heap_pos));
        db.heap.upsert(item);
    }
    out_int(out, 1);
}

fn do_pttl(db: &mut Db, cmd: &[Vec<u8>], out: &mut Buffer) {
    let Some(entry) = db.map.lookup(&cmd[1]) else {
        out_int(out, -2);
        return;
    };
    match entry.heap_pos.get() {
        None => out_int(out, -1),
        Some(pos) => {
            let deadline = db.heap.deadline(pos);
            let now = monotonic_ms();
            out_int(out, deadline.saturating_sub(now) as i64);
        }
    }
}
