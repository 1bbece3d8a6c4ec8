//! Response serialization: tagged values appended to a connection's
//! outgoing buffer, plus the length-prefix bookkeeping for whole responses.

use crate::buf::Buffer;

/// A response body (everything after the 4-byte length prefix) may not
/// exceed this; an overflowing body is replaced by a single `TooBig` error.
pub const K_MAX_MSG: usize = 32 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Nil = 0,
    Err = 1,
    Int = 2,
    Str = 3,
    Dbl = 4,
    Arr = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrCode {
    Unknown = 1,
    TooBig = 2,
    BadArg = 3,
}

pub fn out_nil(out: &mut Buffer) {
    out.append_u8(Tag::Nil as u8);
}

pub fn out_err(out: &mut Buffer, code: ErrCode, msg: &str) {
    out.append_u8(Tag::Err as u8);
    out.append_u32(code as u32);
    out.append_u32(msg.len() as u32);
    out.append(msg.as_bytes());
}

pub fn out_int(out: &mut Buffer, v: i64) {
    out.append_u8(Tag::Int as u8);
    out.append_i64(v);
}

pub fn out_str(out: &mut Buffer, s: &[u8]) {
    out.append_u8(Tag::Str as u8);
    out.append_u32(s.len() as u32);
    out.append(s);
}

pub fn out_dbl(out: &mut Buffer, v: f64) {
    out.append_u8(Tag::Dbl as u8);
    out.append_f64(v);
}

pub fn out_arr(out: &mut Buffer, n: u32) {
    out.append_u8(Tag::Arr as u8);
    out.append_u32(n);
}

/// Emit an array tag with a placeholder count; returns the position of the
/// tag byte for `end_arr` to patch once the element count is known.
pub fn begin_arr(out: &mut Buffer) -> usize {
    let ctx = out.len();
    out.append_u8(Tag::Arr as u8);
    out.append_u32(0);
    ctx
}

pub fn end_arr(out: &mut Buffer, ctx: usize, n: u32) {
    assert_eq!(out.byte_at(ctx), Tag::Arr as u8);
    out.patch_u32(ctx + 1, n);
}

/// Reserve the 4-byte response length prefix; returns its position.
pub fn response_begin(out: &mut Buffer) -> usize {
    let pos = out.len();
    out.append_u32(0);
    pos
}

fn response_size(out: &Buffer, header: usize) -> usize {
    out.len() - header - 4
}

/// Patch the reserved length prefix. An oversized body is discarded and
/// replaced with a single `TooBig` error record.
pub fn response_end(out: &mut Buffer, header: usize) {
    let mut size = response_size(out, header);
    if size > K_MAX_MSG {
        out.truncate(header + 4);
        out_err(out, ErrCode::TooBig, "response is too big");
        size = response_size(out, header);
    }
    out.patch_u32(header, size as u32);
}
