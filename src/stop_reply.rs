//! Stop-Reply parser, first pass of C6: a single-pass grammar that turns a
//! raw `T`/`S`/`W`/`X`/`O` payload into a structured value, with side
//! effects deferred to a second pass (see `thread_registry.rs`), per
//! design notes §9 ("lift into a small grammar ... keeping side effects in
//! a second pass that runs after parsing completes").
//!
//! Grounded on the stop-reply grammar in distilled spec §4.6/§6 and the
//! `ThreadStopReason` tagged-enum shape in
//! `examples/other_examples/*daniel5151-gdbstub__src-stub-stop_reason.rs.rs`.

use crate::error::ProtocolError;
use std::collections::HashMap;

/// Output of the first parsing pass: the raw key/value pairs plus
/// expedited registers, not yet translated into a stop reason (that needs
/// breakpoint-site and resume-state context the parser itself doesn't have).
#[derive(Clone, Debug, Default)]
pub struct RawThreadStop {
    pub signo: u8,
    pub kv: HashMap<String, String>,
    /// Register number -> raw hex-decoded value bytes.
    pub expedited_registers: HashMap<u32, Vec<u8>>,
}

impl RawThreadStop {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.kv.get(key).map(|s| s.as_str())
    }

    pub fn thread(&self) -> Option<u64> {
        parse_hex_u64(self.get("thread")?)
    }

    pub fn threads(&self) -> Vec<u64> {
        self.get("threads")
            .map(|s| s.split(',').filter_map(parse_hex_u64).collect())
            .unwrap_or_default()
    }

    pub fn thread_pcs(&self) -> Vec<u64> {
        self.get("thread-pcs")
            .map(|s| s.split(',').filter_map(parse_hex_u64).collect())
            .unwrap_or_default()
    }

    pub fn reason(&self) -> Option<&str> {
        self.get("reason")
    }

    /// `memory:<addr>=<hex>` entries, to populate the process L1 cache.
    pub fn memory_fills(&self) -> Vec<(u64, Vec<u8>)> {
        self.kv
            .iter()
            .filter_map(|(k, v)| {
                let addr_str = k.strip_prefix("memory:")?;
                let addr = parse_hex_u64(addr_str)?;
                let bytes = hex_decode(v)?;
                Some((addr, bytes))
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
pub enum StopReplyEvent {
    ThreadStop(RawThreadStop),
    Exited { status: u8 },
    Terminated { signal: u8, description: Option<String> },
    Output(Vec<u8>),
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_hex_u8(s: &str) -> Option<u8> {
    u8::from_str_radix(s, 16).ok()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Keys that are never register numbers even though some are two
/// characters; disambiguates the `reg-number-hex` grammar branch.
const NAMED_KEYS: &[&str] = &[
    "thread", "threads", "thread-pcs", "core", "metype", "medata", "name", "hexname", "reason",
    "description", "qaddr", "dispatch_queue_t", "qname", "qkind", "qserialnum", "watch",
    "rwatch", "awatch", "library", "jstopinfo",
];

fn is_named_key(key: &str) -> bool {
    NAMED_KEYS.contains(&key) || key.starts_with("memory:")
}

/// First pass: classify the head byte and, for `T`/`S`, split the
/// remaining `key:value;` pairs, routing each into either the textual kv
/// map or the expedited-register map based on the grammar's
/// `key := name | reg-number-hex` alternative.
pub fn parse(payload: &[u8]) -> Result<StopReplyEvent, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::Malformed("empty stop reply".into()));
    }
    let head = payload[0];
    let rest = std::str::from_utf8(&payload[1..])
        .map_err(|_| ProtocolError::Malformed("non-utf8 stop reply".into()))?;

    match head {
        b'T' | b'S' => {
            if rest.len() < 2 {
                return Err(ProtocolError::Malformed("stop reply missing signal".into()));
            }
            let signo = parse_hex_u8(&rest[..2])
                .ok_or_else(|| ProtocolError::Malformed("bad signal hex".into()))?;
            let mut raw = RawThreadStop {
                signo,
                ..Default::default()
            };
            if head == b'T' {
                for field in rest[2..].split(';') {
                    if field.is_empty() {
                        continue;
                    }
                    let (key, value) = field
                        .split_once(':')
                        .ok_or_else(|| ProtocolError::Malformed(format!("bad T field: {}", field)))?;
                    if !is_named_key(key) && key.len() == 2 && key.chars().all(|c| c.is_ascii_hexdigit()) {
                        let reg_num = u32::from_str_radix(key, 16)
                            .map_err(|_| ProtocolError::Malformed("bad register number".into()))?;
                        let bytes = hex_decode(value)
                            .ok_or_else(|| ProtocolError::Malformed("bad register value hex".into()))?;
                        raw.expedited_registers.insert(reg_num, bytes);
                    } else {
                        raw.kv.insert(key.to_string(), value.to_string());
                    }
                }
            }
            Ok(StopReplyEvent::ThreadStop(raw))
        }
        b'W' => {
            if rest.len() < 2 {
                return Err(ProtocolError::Malformed("W reply missing status".into()));
            }
            let status = parse_hex_u8(&rest[..2])
                .ok_or_else(|| ProtocolError::Malformed("bad exit status hex".into()))?;
            Ok(StopReplyEvent::Exited { status })
        }
        b'X' => {
            if rest.len() < 2 {
                return Err(ProtocolError::Malformed("X reply missing signal".into()));
            }
            let signal = parse_hex_u8(&rest[..2])
                .ok_or_else(|| ProtocolError::Malformed("bad term signal hex".into()))?;
            let description = rest[2..].strip_prefix(';').map(|s| s.to_string());
            Ok(StopReplyEvent::Terminated { signal, description })
        }
        b'O' => {
            let bytes = hex_decode(rest).ok_or_else(|| ProtocolError::Malformed("bad O hex".into()))?;
            Ok(StopReplyEvent::Output(bytes))
        }
        other => Err(ProtocolError::Malformed(format!(
            "unrecognized stop reply head byte {:#x}",
            other
        ))),
    }
}
