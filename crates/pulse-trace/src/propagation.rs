//! W3C trace context propagation
//!
//! Parses and emits the `traceparent` / `tracestate` headers plus a
//! `baggage` header sharing the same comma-separated key=value grammar.
//! Malformed input never raises: `extract` returns `None` and the caller
//! starts a fresh root trace. Individually invalid tracestate or baggage
//! entries are dropped without failing the whole header.

use pulse_core::context::{TraceContext, TraceState};
use pulse_core::ids::{SpanId, TraceId};
use pulse_core::kv::KvMap;
use std::collections::HashMap;
use tracing::debug;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const BAGGAGE_HEADER: &str = "baggage";

/// The only traceparent version this engine understands
const SUPPORTED_VERSION: &str = "00";

/// Extract a trace context from incoming headers
///
/// Header lookup is case-insensitive. Returns `None` when the
/// `traceparent` value is missing, malformed, carries an unsupported
/// version, or uses all-zero ids; the caller must then start a fresh
/// root trace.
pub fn extract(headers: &HashMap<String, String>) -> Option<TraceContext> {
    let traceparent = header_value(headers, TRACEPARENT_HEADER)?;

    // {version}-{trace_id}-{span_id}-{flags}, fixed hex widths 2/32/16/2
    let parts: Vec<&str> = traceparent.trim().split('-').collect();
    if parts.len() != 4 {
        debug!("traceparent has {} segments, expected 4", parts.len());
        return None;
    }
    if parts[0].len() != 2 || !parts[0].bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    if parts[0] != SUPPORTED_VERSION {
        debug!("unsupported traceparent version: {}", parts[0]);
        return None;
    }

    let trace_id = TraceId::from_hex(parts[1])?;
    let span_id = SpanId::from_hex(parts[2])?;

    if parts[3].len() != 2 {
        return None;
    }
    let flags = u8::from_str_radix(parts[3], 16).ok()?;
    let sampled = flags & 0x01 == 0x01;

    let trace_state = header_value(headers, TRACESTATE_HEADER)
        .map(|v| parse_trace_state(v))
        .unwrap_or_default();

    let baggage = header_value(headers, BAGGAGE_HEADER)
        .map(|v| parse_baggage(v))
        .unwrap_or_default();

    Some(TraceContext {
        trace_id,
        span_id,
        parent_span_id: None,
        sampled,
        trace_state,
        baggage,
    })
}

/// Serialize the current hop's context into outgoing headers
///
/// The emitted span id becomes the parent for the next hop. Fixed-format
/// fields round-trip byte-for-byte through `extract`.
pub fn inject(ctx: &TraceContext) -> Vec<(String, String)> {
    let flags: u8 = if ctx.sampled { 0x01 } else { 0x00 };
    let mut headers = vec![(
        TRACEPARENT_HEADER.to_string(),
        format!(
            "{}-{}-{}-{:02x}",
            SUPPORTED_VERSION,
            ctx.trace_id.to_hex(),
            ctx.span_id.to_hex(),
            flags
        ),
    )];

    if !ctx.trace_state.is_empty() {
        headers.push((TRACESTATE_HEADER.to_string(), ctx.trace_state.to_header()));
    }

    if !ctx.baggage.is_empty() {
        let value = ctx
            .baggage
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(",");
        headers.push((BAGGAGE_HEADER.to_string(), value));
    }

    headers
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parse a tracestate list, preserving order and foreign vendor keys
///
/// Entries that are empty, lack `=`, or exceed the W3C per-entry size are
/// dropped individually; the list caps at 32 entries.
fn parse_trace_state(value: &str) -> TraceState {
    let mut state = TraceState::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, val)) = entry.split_once('=') else {
            debug!("dropping tracestate entry without '=': {}", entry);
            continue;
        };
        if !state.push(key, val) {
            debug!("dropping oversized or surplus tracestate entry: {}", key);
        }
    }
    state
}

/// Parse a baggage header, percent-decoding each entry
///
/// Invalid entries (no `=`, empty key, bad percent escapes) are dropped
/// individually rather than failing the whole header.
fn parse_baggage(value: &str) -> KvMap {
    let mut baggage = KvMap::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, val)) = entry.split_once('=') else {
            debug!("dropping baggage entry without '=': {}", entry);
            continue;
        };
        let (Some(key), Some(val)) = (percent_decode(key), percent_decode(val)) else {
            debug!("dropping baggage entry with bad escape: {}", entry);
            continue;
        };
        if key.is_empty() {
            continue;
        }
        baggage.insert(key, val);
    }
    baggage
}

/// Decode `%XX` escapes; returns `None` on a truncated or non-hex escape
/// or invalid UTF-8
fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len() {
                return None;
            }
            let hex = s.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Escape the characters that would break the key=value,comma grammar
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'%' | b',' | b'=' | b';' => out.push_str(&format!("%{:02X}", b)),
            0x21..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
