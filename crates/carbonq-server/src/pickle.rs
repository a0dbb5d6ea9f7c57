//! Pickle Encoder
//!
//! Minimal writer for Python pickle protocol 2, covering exactly the shape
//! the pickle render format needs: a list of dicts with string keys, where
//! values are strings, integers, floats or `None`. Strings are written as
//! BINUNICODE so both Python 2 and 3 read them.

use carbonq_common::series::MetricData;

const PROTO: &[u8] = &[0x80, 0x02];
const EMPTY_LIST: u8 = b']';
const EMPTY_DICT: u8 = b'}';
const MARK: u8 = b'(';
const APPENDS: u8 = b'e';
const SETITEMS: u8 = b'u';
const NONE: u8 = b'N';
const BINFLOAT: u8 = b'G';
const BININT: u8 = b'J';
const BINUNICODE: u8 = b'X';
const STOP: u8 = b'.';

/// Python-compatible list of per-series dicts:
/// `{"name", "start", "end", "step", "values"}` with `None` in absent slots.
pub fn marshal_pickle(results: &[MetricData]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(PROTO);
    out.push(EMPTY_LIST);
    out.push(MARK);
    for s in results {
        write_series_dict(&mut out, s);
    }
    out.push(APPENDS);
    out.push(STOP);
    out
}

fn write_series_dict(out: &mut Vec<u8>, s: &MetricData) {
    out.push(EMPTY_DICT);
    out.push(MARK);

    write_str(out, "name");
    write_str(out, &s.name);

    write_str(out, "start");
    write_int(out, s.start_time);

    write_str(out, "end");
    write_int(out, s.stop_time);

    write_str(out, "step");
    write_int(out, s.step_time);

    write_str(out, "values");
    out.push(EMPTY_LIST);
    out.push(MARK);
    for i in 0..s.values.len() {
        match s.value_at(i) {
            Some(v) => write_float(out, v),
            None => out.push(NONE),
        }
    }
    out.push(APPENDS);

    out.push(SETITEMS);
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.push(BINUNICODE);
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_int(out: &mut Vec<u8>, v: i32) {
    out.push(BININT);
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_float(out: &mut Vec<u8>, v: f64) {
    out.push(BINFLOAT);
    out.extend_from_slice(&v.to_be_bytes());
}
