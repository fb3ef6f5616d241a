//! Thread Registry, second pass of C6: materializes/refreshes `Thread`
//! entries from a parsed `RawThreadStop`, translates textual stop reasons
//! per §4.6's rules, and reports exec/memory-cache side effects to the
//! caller so they can be applied after the thread-list lock is released.
//!
//! Generalized from the `WeakPtrSet<Box<dyn Task>>` registry pattern in
//! `examples/isgasho-rd/src/thread_group.rs` to a plain `HashMap<tid,
//! Thread>` keyed by protocol TID rather than OS pid, since this core
//! never owns an OS process directly.

use crate::error::ProtocolError;
use crate::stop_reply::RawThreadStop;
use parking_lot::ReentrantMutex;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum QueueKind {
    Serial,
    Concurrent,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct QueueInfo {
    pub name: Option<String>,
    pub kind: QueueKind,
    pub serial_number: Option<u64>,
    pub queue_address: Option<u64>,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum StopReason {
    None,
    BreakpointHit(u64),
    SingleStep,
    WatchpointHit { address: u64 },
    Exception,
    Exec,
    Signal,
}

#[derive(Clone, Debug)]
pub struct Thread {
    pub tid: u64,
    pub pc: Option<u64>,
    pub expedited_registers: HashMap<u32, Vec<u8>>,
    pub stop_reason: StopReason,
    pub signo: u8,
    pub description: Option<String>,
    pub name: Option<String>,
    pub queue_info: Option<QueueInfo>,
}

/// What the last resume requested for a thread, needed to disambiguate a
/// bare `SIGTRAP` with no `reason` key (§4.6 rule 4: "Signal-only ... with
/// SIGTRAP: if the thread's last resume state was Stepping, promote to
/// trace; else report as signal.").
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum LastResume {
    Continuing,
    Stepping,
}

pub const SIGTRAP: u8 = 5;

/// Context the parser's second pass needs but the wire payload doesn't
/// carry: whether an address is a valid, installed breakpoint site for a
/// given thread, each thread's last resume request, and whether this is a
/// MIPS-family target (hit-address-first watchpoint matching quirk).
pub trait StopContext {
    fn site_at(&self, address: u64) -> Option<u64>;
    fn is_site_valid_for_thread(&self, site: u64, tid: u64) -> bool;
    fn last_resume(&self, tid: u64) -> LastResume;
    fn is_mips_family(&self) -> bool;
    fn watchpoint_id_for_address(&self, address: u64) -> Option<u64>;
}

#[derive(Clone, Debug, Default)]
pub struct StopSideEffects {
    pub exec_occurred: bool,
    pub memory_fills: Vec<(u64, Vec<u8>)>,
    pub modules_changed: bool,
}

pub struct ThreadRegistry {
    /// Recursive: stop-reply parsing re-enters this during nested
    /// enumeration (e.g. a caller iterating threads from inside the
    /// update callback), per §5's explicit "guarded by a recursive mutex".
    inner: ReentrantMutex<RefCell<HashMap<u64, Thread>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        ThreadRegistry {
            inner: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, tid: u64) -> Option<Thread> {
        self.inner.lock().borrow().get(&tid).cloned()
    }

    pub fn tids(&self) -> Vec<u64> {
        self.inner.lock().borrow().keys().copied().collect()
    }

    pub fn clear(&self) {
        self.inner.lock().borrow_mut().clear();
    }

    /// §4.6 second pass: materialize/refresh every thread named in the
    /// `threads`/`thread-pcs` lists, translate the primary thread's stop
    /// reason, and return side effects the caller applies next (memory
    /// cache fill, exec handling) — keeping "parse, then apply side
    /// effects" as two distinct steps per design notes §9.
    pub fn apply_stop(&self, raw: &RawThreadStop, ctx: &dyn StopContext) -> (Thread, StopSideEffects) {
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();

        let threads = raw.threads();
        let pcs = raw.thread_pcs();
        for (i, &tid) in threads.iter().enumerate() {
            let pc = pcs.get(i).copied();
            let entry = map.entry(tid).or_insert_with(|| Thread {
                tid,
                pc: None,
                expedited_registers: HashMap::new(),
                stop_reason: StopReason::None,
                signo: raw.signo,
                description: None,
                name: None,
                queue_info: None,
            });
            if pc.is_some() {
                entry.pc = pc;
            }
        }

        let primary_tid = raw.thread().unwrap_or_else(|| threads.first().copied().unwrap_or(0));
        let reason = translate_reason(raw, primary_tid, ctx);

        let name = raw
            .get("name")
            .map(String::from)
            .or_else(|| raw.get("hexname").and_then(|h| hex_to_string(h)));
        let queue_info = parse_queue_info(raw);
        let description = raw.get("description").map(String::from);

        let entry = map.entry(primary_tid).or_insert_with(|| Thread {
            tid: primary_tid,
            pc: None,
            expedited_registers: HashMap::new(),
            stop_reason: StopReason::None,
            signo: raw.signo,
            description: None,
            name: None,
            queue_info: None,
        });
        entry.signo = raw.signo;
        entry.stop_reason = reason;
        entry.expedited_registers = raw.expedited_registers.clone();
        if let Some(d) = &description {
            entry.description = Some(d.clone());
        }
        if name.is_some() {
            entry.name = name;
        }
        if queue_info.is_some() {
            entry.queue_info = queue_info;
        }
        let snapshot = entry.clone();

        let exec_occurred = raw.reason() == Some("exec");
        if exec_occurred {
            map.clear();
        }

        let side_effects = StopSideEffects {
            exec_occurred,
            memory_fills: raw.memory_fills(),
            modules_changed: raw.get("library").is_some(),
        };

        (snapshot, side_effects)
    }

    /// Bulk enumeration via `jThreadsInfo`, whose reply is a JSON array
    /// (unlike the `key:value;` stop-reply grammar) — one object per
    /// thread, each carrying at minimum `tid` and optionally `pc`/`name`/
    /// `reason`. Used to seed the registry right after connect, before any
    /// stop reply has named every thread.
    pub fn ingest_j_threads_info(&self, json: &str) -> Result<(), ProtocolError> {
        let entries: Vec<JThreadInfoEntry> = serde_json::from_str(json)
            .map_err(|e| ProtocolError::Malformed(format!("bad jThreadsInfo json: {}", e)))?;
        let guard = self.inner.lock();
        let mut map = guard.borrow_mut();
        for entry in entries {
            let tid = u64::from_str_radix(entry.tid.trim_start_matches("0x"), 16)
                .map_err(|_| ProtocolError::Malformed(format!("bad tid {:?} in jThreadsInfo", entry.tid)))?;
            let pc = entry
                .pc
                .as_deref()
                .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok());
            let thread = map.entry(tid).or_insert_with(|| Thread {
                tid,
                pc: None,
                expedited_registers: HashMap::new(),
                stop_reason: StopReason::None,
                signo: 0,
                description: None,
                name: None,
                queue_info: None,
            });
            if pc.is_some() {
                thread.pc = pc;
            }
            if entry.name.is_some() {
                thread.name = entry.name;
            }
            if let Some(reason) = entry.reason {
                thread.description.get_or_insert(reason);
            }
        }
        Ok(())
    }
}

/// One element of a `jThreadsInfo` JSON reply. Field names match the
/// wire's own keys; `#[serde(default)]` covers the stub-optional ones.
#[derive(Deserialize)]
struct JThreadInfoEntry {
    tid: String,
    #[serde(default)]
    pc: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_to_string(hex: &str) -> Option<String> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes: Option<Vec<u8>> = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect();
    bytes.and_then(|b| String::from_utf8(b).ok())
}

fn parse_queue_info(raw: &RawThreadStop) -> Option<QueueInfo> {
    if raw.get("qname").is_none() && raw.get("qaddr").is_none() && raw.get("qkind").is_none() {
        return None;
    }
    let kind = match raw.get("qkind") {
        Some("serial") => QueueKind::Serial,
        Some("concurrent") => QueueKind::Concurrent,
        _ => QueueKind::Unknown,
    };
    Some(QueueInfo {
        name: raw.get("qname").map(String::from),
        kind,
        serial_number: raw.get("qserialnum").and_then(|s| u64::from_str_radix(s, 16).ok()),
        queue_address: raw
            .get("qaddr")
            .or_else(|| raw.get("dispatch_queue_t"))
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()),
    })
}

/// §4.6 rule 4, the stop-reason translation table.
fn translate_reason(raw: &RawThreadStop, tid: u64, ctx: &dyn StopContext) -> StopReason {
    match raw.reason() {
        Some("trace") => {
            let pc = raw.thread_pcs().first().copied();
            match pc.and_then(|pc| ctx.site_at(pc)) {
                Some(site) if ctx.is_site_valid_for_thread(site, tid) => StopReason::BreakpointHit(site),
                _ => StopReason::SingleStep,
            }
        }
        Some("breakpoint") => {
            let pc = raw.thread_pcs().first().copied();
            match pc.and_then(|pc| ctx.site_at(pc)) {
                Some(site) if ctx.is_site_valid_for_thread(site, tid) => StopReason::BreakpointHit(site),
                _ => StopReason::None,
            }
        }
        Some("watchpoint") => {
            let requested = raw.get("watch").and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok());
            let hit = raw.get("awatch").or_else(|| raw.get("rwatch")).and_then(|s| {
                u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
            });
            let address = if ctx.is_mips_family() {
                hit.or(requested)
            } else {
                requested.or(hit)
            };
            match address.and_then(|a| ctx.watchpoint_id_for_address(a)) {
                Some(_) => StopReason::WatchpointHit {
                    address: address.unwrap(),
                },
                None => StopReason::None,
            }
        }
        Some("exception") => StopReason::Exception,
        Some("exec") => StopReason::Exec,
        None if raw.signo == SIGTRAP => match ctx.last_resume(tid) {
            LastResume::Stepping => StopReason::SingleStep,
            LastResume::Continuing => StopReason::Signal,
        },
        _ => StopReason::Signal,
    }
}
