//! Target / Process / Target Orchestrator (C9, §3 entities): the public
//! operation surface (`launch`/`attach`/`connect`/`resume`/`halt`/`detach`/
//! `destroy`/`read_memory`/`write_memory`/`allocate`/`deallocate`/
//! `send_raw_command`) plus the per-connection state a `Target` owns:
//! architecture, modules, breakpoints/watchpoints, stop hooks, and its own
//! event broadcaster.
//!
//! Grounded on `examples/isgasho-rd/src/thread_group.rs`'s shared-ownership
//! convention (generalized from `Rc<RefCell<_>>` to `Arc<Mutex<_>>` per §5's
//! multi-threaded model) and the operation surface of
//! `examples/original_source/include/lldb/Target/Target.h` /
//! `source/Plugins/Process/gdb-remote/ProcessGDBRemote.cpp`.

use crate::async_event_thread::{AsyncEventThread, AsyncInput, AsyncState};
use crate::breakpoint::{BreakpointManager, BreakpointOptions, Filter, RemoteSiteInstaller, Resolver, SiteInstaller};
use crate::error::{CoreError, DomainError, DomainErrorKind};
use crate::event_bus::{Broadcaster, BroadcasterId, EventPayload, HijackGuard};
use crate::handle::{BreakpointId, IdRepr, StopHookId, WatchpointId};
use crate::handle::HandleTable;
use crate::module::ModuleList;
use crate::process::{Process, ProcessState};
use crate::register_info::{Arch, RegisterInfo};
use crate::remote_client::{CoreSendError, RemoteClient, Response, SendOptions};
use crate::settings::TargetSettings;
use crate::stop_reply::{self, StopReplyEvent};
use crate::thread_registry::{LastResume, StopContext, ThreadRegistry};
use crate::watchpoint::{AccessKind, Watchpoint};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The hijack mask `resume()` broadcasts/listens on for its own
/// resume-packet-sent confirmation; no other subsystem listens on this bit.
const RESUME_EVENT_MASK: u32 = 1 << 30;

/// A per-thread `vCont` action, per §4.9's resume-plan accounting law (the
/// sum of c/C/s/S actions across all threads must equal the thread count).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ResumeAction {
    Continue,
    ContinueWithSignal(u8),
    Step,
    StepWithSignal(u8),
}

impl ResumeAction {
    fn vcont_tag(self) -> String {
        match self {
            ResumeAction::Continue => "c".to_string(),
            ResumeAction::ContinueWithSignal(sig) => format!("C{:02x}", sig),
            ResumeAction::Step => "s".to_string(),
            ResumeAction::StepWithSignal(sig) => format!("S{:02x}", sig),
        }
    }
}

pub struct StopHook {
    pub thread_filter: Option<u64>,
    pub enabled: bool,
    /// Invoked with the stopped thread's tid; returning `false` asks the
    /// orchestrator to resume the target instead of handing control back
    /// to the caller, per the "auto-continue" stop-hook pattern.
    pub action: Box<dyn Fn(u64) -> bool + Send>,
}

/// Per-connection state owned by the debugger session, independent of the
/// particular `Process` attached to it (a `Target` can outlive several
/// launches, per §3).
pub struct Target {
    pub settings: TargetSettings,
    pub arch: Arch,
    pub registers: RegisterInfo,
    pub modules: ModuleList,
    pub breakpoints: BreakpointManager,
    pub watchpoints: HandleTable<WatchpointId, Watchpoint>,
    stop_hooks: HandleTable<StopHookId, StopHook>,
    pub broadcaster: Broadcaster,
}

impl Target {
    pub fn new(settings: TargetSettings) -> Self {
        Target {
            settings,
            arch: Arch::Other,
            registers: RegisterInfo::default(),
            modules: ModuleList::new(),
            breakpoints: BreakpointManager::new(),
            watchpoints: HandleTable::new(WatchpointId),
            stop_hooks: HandleTable::new(StopHookId),
            broadcaster: Broadcaster::new(BroadcasterId(1)),
        }
    }

    /// Finds the watchpoint (if any) installed at exactly this address, for
    /// `thread_registry::StopContext::watchpoint_id_for_address`.
    fn watchpoint_id_for_address(&self, address: u64) -> Option<u64> {
        self.watchpoints
            .iter()
            .find(|(_, w)| w.address == address)
            .map(|(id, _)| id.repr())
    }

    /// Maps a compile-time source path to a local one, applied front-to-
    /// back, first match wins, per `settings.source_map` (the
    /// `target.source-map` setting of distilled spec §6).
    pub fn remap_source_path(&self, path: &str) -> String {
        for entry in &self.settings.source_map {
            let from = entry.from.to_string_lossy();
            if let Some(rest) = path.strip_prefix(from.as_ref()) {
                return format!("{}{}", entry.to.to_string_lossy(), rest);
            }
        }
        path.to_string()
    }

    pub fn create_stop_hook(&mut self, thread_filter: Option<u64>, action: Box<dyn Fn(u64) -> bool + Send>) -> StopHookId {
        self.stop_hooks.insert(StopHook {
            thread_filter,
            enabled: true,
            action,
        })
    }

    pub fn set_stop_hook_enabled(&mut self, id: StopHookId, enabled: bool) {
        if let Some(h) = self.stop_hooks.get_mut(id) {
            h.enabled = enabled;
        }
    }

    pub fn remove_stop_hook(&mut self, id: StopHookId) {
        self.stop_hooks.remove(id);
    }

    /// Runs every enabled stop hook whose thread filter matches `tid`, in
    /// the order they were created (mirroring LLDB's `Target::RunStopHooks`,
    /// not `HandleTable`'s unspecified internal order).
    /// Returns `true` if every hook voted to hand control back to the
    /// caller (the normal case); `false` if any hook asked for an
    /// auto-continue instead.
    pub fn run_stop_hooks(&self, tid: u64) -> bool {
        let mut hand_back = true;
        let mut hooks: Vec<(StopHookId, &StopHook)> = self.stop_hooks.iter().collect();
        hooks.sort_by_key(|(id, _)| *id);
        for (_, hook) in hooks {
            if !hook.enabled {
                continue;
            }
            if hook.thread_filter.map(|f| f == tid).unwrap_or(true) {
                if !(hook.action)(tid) {
                    hand_back = false;
                }
            }
        }
        hand_back
    }

    pub fn create_breakpoint(&mut self, filter: Filter, resolver: Resolver, options: BreakpointOptions) -> BreakpointId {
        self.breakpoints.create(filter, resolver, options, false)
    }

    pub fn create_watchpoint(&mut self, address: u64, size: u32, kind: AccessKind) -> WatchpointId {
        self.watchpoints.insert(Watchpoint::new(address, size, kind))
    }
}

/// Recovery action run once, best-effort, immediately before a `destroy()`
/// tears the connection down — e.g. removing a stub-side temp file or
/// restoring a patched entry point. Pluggable per DESIGN.md Open Question
/// decision 3, instead of a hardcoded stub-name check.
pub trait PreDestroyRecovery: Send {
    fn run(&self, orchestrator: &TargetOrchestrator);
}

struct NoopRecovery;
impl PreDestroyRecovery for NoopRecovery {
    fn run(&self, _orchestrator: &TargetOrchestrator) {}
}

/// Bridges `Target`'s breakpoint/watchpoint/arch state and an
/// orchestrator-owned per-thread resume log into the context the stop-reply
/// second pass needs, without handing `ThreadRegistry` a reference to
/// either owner directly.
struct OrchestratorStopContext<'a> {
    target: &'a Target,
    last_resume: &'a HashMap<u64, LastResume>,
}

impl<'a> StopContext for OrchestratorStopContext<'a> {
    fn site_at(&self, address: u64) -> Option<u64> {
        self.target.breakpoints.site_at(address)
    }

    fn is_site_valid_for_thread(&self, site: u64, _tid: u64) -> bool {
        self.target.breakpoints.is_site_enabled(site)
    }

    fn last_resume(&self, tid: u64) -> LastResume {
        *self.last_resume.get(&tid).unwrap_or(&LastResume::Continuing)
    }

    fn is_mips_family(&self) -> bool {
        self.target.arch == Arch::Mips
    }

    fn watchpoint_id_for_address(&self, address: u64) -> Option<u64> {
        self.target.watchpoint_id_for_address(address)
    }
}

/// Outcome of `TargetOrchestrator::handle_stop_notification`, distinguishing
/// an ordinary thread stop from the terminal `W`/`X` replies so callers can
/// decide whether to keep pumping notifications.
#[derive(Debug)]
pub enum StopNotification {
    ThreadStop {
        tid: u64,
        reason: crate::thread_registry::StopReason,
        /// Set when the stop reply carried a `library:` key, meaning the
        /// shared-library list moved and a caller should run
        /// `TargetOrchestrator::reconcile_modules` before trusting any
        /// pending breakpoint locations resolved against the old mapping.
        modules_changed: bool,
    },
    Exited { status: u8 },
    Terminated { signal: u8, description: Option<String> },
    Output(Vec<u8>),
}

pub struct TargetOrchestrator {
    pub client: Arc<RemoteClient>,
    pub target: Mutex<Target>,
    pub process: Mutex<Process>,
    pub threads: ThreadRegistry,
    last_resume: Mutex<HashMap<u64, LastResume>>,
    /// Persistent per-thread resume plan set by `set_resume_action`,
    /// consulted by `build_resume_command` whenever a call doesn't override
    /// a thread's action itself (e.g. a plain `resume()`).
    resume_actions: Mutex<HashMap<u64, ResumeAction>>,
    /// The last `vCont`/bare continue command actually sent, replayed by
    /// `with_interrupt_if_running` after a mid-run memory/alloc request.
    last_continue: Mutex<Option<Vec<u8>>>,
    pre_destroy: Mutex<Box<dyn PreDestroyRecovery>>,
    /// Exactly one thread owns the transport's asynchronous side (stop
    /// notifications while the inferior runs, out-of-band interrupts),
    /// per §5 — this is that thread.
    async_thread: AsyncEventThread,
}

impl TargetOrchestrator {
    pub fn new(client: RemoteClient, settings: TargetSettings) -> Self {
        let client = Arc::new(client);
        let (async_thread, _output) = AsyncEventThread::spawn(client.clone(), Duration::from_millis(5));
        TargetOrchestrator {
            client,
            target: Mutex::new(Target::new(settings)),
            process: Mutex::new(Process::new()),
            threads: ThreadRegistry::new(),
            last_resume: Mutex::new(HashMap::new()),
            resume_actions: Mutex::new(HashMap::new()),
            last_continue: Mutex::new(None),
            pre_destroy: Mutex::new(Box::new(NoopRecovery)),
            async_thread,
        }
    }

    pub fn set_resume_action(&self, tid: u64, action: ResumeAction) {
        self.resume_actions.lock().unwrap().insert(tid, action);
    }

    /// Resolves the `vCont` plan for a resume, per §4.9: one explicit
    /// action per known thread unless every thread agrees, in which case a
    /// single bare `c`/`C`/`s`/`S` is sent instead. `overrides` takes
    /// precedence over a thread's persistent `set_resume_action` plan,
    /// which in turn beats the `Continue` default.
    fn build_resume_command(&self, overrides: &HashMap<u64, ResumeAction>) -> Vec<u8> {
        let persistent = self.resume_actions.lock().unwrap();
        let mut tids = self.threads.tids();
        for tid in overrides.keys() {
            if !tids.contains(tid) {
                tids.push(*tid);
            }
        }
        if tids.is_empty() {
            let action = overrides.values().next().copied().unwrap_or(ResumeAction::Continue);
            return action.vcont_tag().into_bytes();
        }
        let resolve = |tid: u64| -> ResumeAction {
            overrides
                .get(&tid)
                .copied()
                .or_else(|| persistent.get(&tid).copied())
                .unwrap_or(ResumeAction::Continue)
        };
        let resolved: Vec<(u64, ResumeAction)> = tids.iter().map(|&tid| (tid, resolve(tid))).collect();
        let first = resolved[0].1;
        if resolved.iter().all(|(_, a)| *a == first) {
            return first.vcont_tag().into_bytes();
        }
        let mut cmd = String::from("vCont");
        for (tid, action) in &resolved {
            cmd.push(';');
            cmd.push_str(&action.vcont_tag());
            cmd.push(':');
            cmd.push_str(&format!("{:x}", tid));
        }
        cmd.into_bytes()
    }

    /// If the process is currently running, interrupts the stub before
    /// `body` runs and re-issues the last continue command afterward, per
    /// §4.3's interrupt-then-requeue rule for requests issued mid-run.
    fn with_interrupt_if_running<T>(&self, body: impl FnOnce() -> Result<T, CoreError>) -> Result<T, CoreError> {
        let was_running = self.process.lock().unwrap().state().is_running();
        if was_running {
            self.client.interrupt().map_err(to_core_error)?;
        }
        let result = body();
        if was_running {
            let cmd = self.last_continue.lock().unwrap().clone().unwrap_or_else(|| b"c".to_vec());
            let _ = self.client.send(&cmd, SendOptions::default());
            self.async_thread.send(AsyncInput::AsyncContinue);
        }
        result
    }

    /// Parses a raw stop-reply/notification payload, runs it through the
    /// thread registry's second pass, applies the reported side effects
    /// (exec clears breakpoint sites, bumps `stop_id`) and advances process
    /// state accordingly.
    pub fn handle_stop_notification(&self, body: &[u8]) -> Result<StopNotification, CoreError> {
        let event = stop_reply::parse(body).map_err(CoreError::Protocol)?;
        match event {
            StopReplyEvent::ThreadStop(raw) => {
                let target = self.target.lock().unwrap();
                let resume = self.last_resume.lock().unwrap();
                let ctx = OrchestratorStopContext {
                    target: &target,
                    last_resume: &resume,
                };
                let (thread, effects) = self.threads.apply_stop(&raw, &ctx);
                drop(resume);
                drop(target);
                if effects.exec_occurred {
                    self.target.lock().unwrap().breakpoints.on_exec();
                    self.last_resume.lock().unwrap().clear();
                    self.process.lock().unwrap().on_exec();
                } else {
                    self.process.lock().unwrap().on_stop_reply();
                }
                let mut p = self.process.lock().unwrap();
                if p.state() != ProcessState::Stopped {
                    let _ = p.transition_to(ProcessState::Stopped);
                }
                Ok(StopNotification::ThreadStop {
                    tid: thread.tid,
                    reason: thread.stop_reason,
                    modules_changed: effects.modules_changed,
                })
            }
            StopReplyEvent::Exited { status } => {
                let mut p = self.process.lock().unwrap();
                p.exit_status = Some(status);
                let _ = p.transition_to(ProcessState::Exited);
                drop(p);
                self.threads.clear();
                Ok(StopNotification::Exited { status })
            }
            StopReplyEvent::Terminated { signal, description } => {
                let mut p = self.process.lock().unwrap();
                p.exit_description = description.clone();
                let _ = p.transition_to(ProcessState::Crashed);
                drop(p);
                Ok(StopNotification::Terminated { signal, description })
            }
            StopReplyEvent::Output(bytes) => Ok(StopNotification::Output(bytes)),
        }
    }

    /// Fetches `qXfer:libraries-svr4:read`, resyncs the module list against
    /// it, and installs sites for any breakpoint location the newly-added
    /// modules expose. Callers run this after a `StopNotification::ThreadStop`
    /// reports `modules_changed`, before treating the stop as fully settled,
    /// since a pending breakpoint may only now have a load address to sit at.
    pub fn reconcile_modules(
        &self,
        symbol_lookup: &dyn Fn(&Resolver) -> Vec<u64>,
        installer: &mut dyn SiteInstaller,
    ) -> Result<Vec<crate::handle::ModuleId>, CoreError> {
        let raw = self
            .client
            .send_then_wait_concat(|offset| format!("qXfer:libraries-svr4:read::{:x},fff", offset).into_bytes())
            .map_err(to_core_error)?;
        let libs = crate::module::parse_svr4_library_list(&raw);
        let mut target = self.target.lock().unwrap();
        let added = target.modules.sync_from_library_list(&libs);
        for module_id in &added {
            if let Some(module) = target.modules.get(*module_id) {
                let name = module.name.clone();
                target.breakpoints.on_module_added(&name, symbol_lookup, installer, true);
            }
        }
        Ok(added)
    }

    /// `reconcile_modules` against a real stub connection: builds a
    /// `RemoteSiteInstaller` over this orchestrator's own client instead of
    /// asking the caller to supply one, for the common case where there's
    /// no test double to inject.
    pub fn reconcile_modules_live(&self, symbol_lookup: &dyn Fn(&Resolver) -> Vec<u64>) -> Result<Vec<crate::handle::ModuleId>, CoreError> {
        let mut installer = RemoteSiteInstaller::new(&self.client);
        self.reconcile_modules(symbol_lookup, &mut installer)
    }

    /// Installs a watchpoint via `Z2`/`Z3`/`Z4`, after checking the size
    /// against the stub's advertised supported sizes (empty = unconstrained).
    pub fn install_watchpoint(&self, id: WatchpointId, supported_sizes: &[u32]) -> Result<(), CoreError> {
        let (address, size, z_type) = {
            let target = self.target.lock().unwrap();
            let wp = target.watchpoints.get(id).ok_or_else(|| {
                CoreError::Domain(DomainError::WatchpointInstallFailed {
                    kind: DomainErrorKind::Other,
                    detail: "unknown watchpoint id".into(),
                })
            })?;
            if !wp.size_is_supported(supported_sizes) {
                return Err(CoreError::Domain(DomainError::WatchpointInstallFailed {
                    kind: DomainErrorKind::SizeUnsupported,
                    detail: format!("watchpoint size {} not supported by stub", wp.size),
                }));
            }
            (wp.address, wp.size, wp.kind.z_type())
        };
        let cmd = format!("Z{},{:x},{:x}", z_type, address, size);
        let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        if let Some(wp) = self.target.lock().unwrap().watchpoints.get_mut(id) {
            wp.mark_installed(true);
        }
        Ok(())
    }

    /// Unsets a watchpoint via the matching `z2`/`z3`/`z4`.
    pub fn remove_watchpoint(&self, id: WatchpointId) -> Result<(), CoreError> {
        let (address, size, z_type) = {
            let target = self.target.lock().unwrap();
            let wp = target.watchpoints.get(id).ok_or_else(|| {
                CoreError::Domain(DomainError::WatchpointInstallFailed {
                    kind: DomainErrorKind::Other,
                    detail: "unknown watchpoint id".into(),
                })
            })?;
            (wp.address, wp.size, wp.kind.z_type())
        };
        let cmd = format!("z{},{:x},{:x}", z_type, address, size);
        let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        if let Some(wp) = self.target.lock().unwrap().watchpoints.get_mut(id) {
            wp.mark_installed(false);
        }
        Ok(())
    }

    /// Enabling re-installs the watchpoint if it isn't already on the stub;
    /// disabling removes it. Mirrors the breakpoint site enable/disable
    /// shape in §4.7.
    pub fn set_watchpoint_enabled(&self, id: WatchpointId, enabled: bool) -> Result<(), CoreError> {
        let already_installed = self
            .target
            .lock()
            .unwrap()
            .watchpoints
            .get(id)
            .map(|w| w.is_installed())
            .unwrap_or(false);
        if enabled {
            if already_installed {
                Ok(())
            } else {
                self.install_watchpoint(id, &[])
            }
        } else if already_installed {
            self.remove_watchpoint(id)
        } else {
            Ok(())
        }
    }

    pub fn set_pre_destroy_recovery(&self, recovery: Box<dyn PreDestroyRecovery>) {
        *self.pre_destroy.lock().unwrap() = recovery;
    }

    fn require_response_ok(&self, resp: Response) -> Result<(), CoreError> {
        match resp {
            Response::Ok | Response::Normal(_) => Ok(()),
            Response::Unsupported => Err(crate::error::ProtocolError::Unsupported.into()),
            Response::Error(code) => Err(crate::error::ProtocolError::StubError(code, "stub reported an error".into()).into()),
        }
    }

    pub fn connect_remote(&self, url: &str) -> Result<(), CoreError> {
        self.client.connect(url).map_err(CoreError::Transport)?;
        self.client.enable_no_ack_mode().map_err(to_core_error)?;
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Connected)
            .map_err(CoreError::State)
    }

    pub fn launch(&self, path: &str, args: &[String]) -> Result<(), CoreError> {
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Launching)
            .map_err(CoreError::State)?;
        let mut cmd = format!("vRun;{}", hex_encode(path.as_bytes()));
        for a in args {
            cmd.push(';');
            cmd.push_str(&hex_encode(a.as_bytes()));
        }
        let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Stopped)
            .map_err(CoreError::State)
    }

    pub fn attach_pid(&self, pid: u32) -> Result<(), CoreError> {
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Attaching)
            .map_err(CoreError::State)?;
        let cmd = format!("vAttach;{:x}", pid);
        let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        self.process.lock().unwrap().pid = Some(pid);
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Stopped)
            .map_err(CoreError::State)
    }

    pub fn attach_name(&self, name: &str, wait_for: bool) -> Result<(), CoreError> {
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Attaching)
            .map_err(CoreError::State)?;
        let cmd = format!(
            "vAttachName;{}{}",
            if wait_for { "wait;" } else { "" },
            hex_encode(name.as_bytes())
        );
        let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Stopped)
            .map_err(CoreError::State)
    }

    /// Continues every thread, per §4.9: a per-thread `vCont` action plan
    /// (falling back to a single bare `c`/`C` when all threads agree), sent
    /// within a dedicated listener hijack that waits for the
    /// resume-packet-sent broadcast before returning.
    pub fn resume(&self) -> Result<(), CoreError> {
        {
            let mut p = self.process.lock().unwrap();
            p.require_alive().map_err(CoreError::State)?;
            p.transition_to(ProcessState::Running).map_err(CoreError::State)?;
        }
        {
            let mut resume = self.last_resume.lock().unwrap();
            for tid in self.threads.tids() {
                resume.insert(tid, LastResume::Continuing);
            }
        }
        let cmd = self.build_resume_command(&HashMap::new());
        *self.last_continue.lock().unwrap() = Some(cmd.clone());
        self.async_thread.send(AsyncInput::AsyncContinue);

        let broadcaster = self.target.lock().unwrap().broadcaster.clone();
        let (_guard, hijack) = HijackGuard::install(broadcaster.clone(), RESUME_EVENT_MASK, None);
        let resp = self.client.send(&cmd, SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        broadcaster.broadcast(RESUME_EVENT_MASK, EventPayload::ResumePacketSent);
        hijack.next_event(Duration::from_millis(50));
        Ok(())
    }

    /// Single-steps `tid` while every other known thread keeps its current
    /// plan (continuing, by default), with an explicit `vCont` action for
    /// every thread per §8's resume-accounting law.
    pub fn step(&self, tid: u64) -> Result<(), CoreError> {
        {
            let mut p = self.process.lock().unwrap();
            p.require_alive().map_err(CoreError::State)?;
            p.transition_to(ProcessState::Stepping).map_err(CoreError::State)?;
        }
        self.last_resume.lock().unwrap().insert(tid, LastResume::Stepping);
        let mut overrides = HashMap::new();
        overrides.insert(tid, ResumeAction::Step);
        let cmd = self.build_resume_command(&overrides);
        *self.last_continue.lock().unwrap() = Some(cmd.clone());
        self.async_thread.send(AsyncInput::AsyncContinue);
        let resp = self.client.send(&cmd, SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)
    }

    /// Out-of-band interrupt, per §4.3/§4.10's async-continue cancellation
    /// path. Routed exclusively through the async event thread — it alone
    /// owns the transport's asynchronous side, per §5.
    pub fn halt(&self) -> Result<(), CoreError> {
        self.async_thread.send(AsyncInput::Interrupt);
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while self.async_thread.state() == AsyncState::Running && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Stopped)
            .map_err(CoreError::State)
    }

    pub fn detach(&self) -> Result<(), CoreError> {
        let resp = self.client.send(b"D", SendOptions::default()).map_err(to_core_error)?;
        self.require_response_ok(resp)?;
        self.process
            .lock()
            .unwrap()
            .transition_to(ProcessState::Detached)
            .map_err(CoreError::State)?;
        self.threads.clear();
        self.last_resume.lock().unwrap().clear();
        Ok(())
    }

    /// Runs the pluggable pre-destroy recovery, then tears the connection
    /// down unconditionally — `destroy` always succeeds from the caller's
    /// perspective even if the recovery action or the disconnect itself
    /// fails, per §6 "destroy is best-effort, not transactional".
    pub fn destroy(&self) {
        {
            let recovery = self.pre_destroy.lock().unwrap();
            recovery.run(self);
        }
        let _ = self.client.disconnect();
        self.threads.clear();
        self.last_resume.lock().unwrap().clear();
        let mut p = self.process.lock().unwrap();
        let _ = p.transition_to(ProcessState::Exited);
    }

    pub fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, CoreError> {
        self.with_interrupt_if_running(|| {
            let max = self.target.lock().unwrap().settings.effective_max_memory_read(None);
            let mut out = Vec::with_capacity(len);
            let mut remaining = len;
            let mut cursor = addr;
            while remaining > 0 {
                let chunk = remaining.min(max);
                let cmd = format!("m{:x},{:x}", cursor, chunk);
                let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
                match resp {
                    Response::Normal(bytes) => {
                        let decoded = hex_decode(&bytes).ok_or_else(|| {
                            CoreError::Domain(DomainError::MemoryFailed {
                                addr: cursor,
                                detail: "malformed hex in memory read reply".into(),
                                bytes_done: out.len(),
                                bytes_requested: len,
                            })
                        })?;
                        let n = decoded.len();
                        out.extend(decoded);
                        cursor += n as u64;
                        remaining = remaining.saturating_sub(n);
                        if n == 0 {
                            break;
                        }
                    }
                    Response::Error(code) => {
                        return Err(CoreError::Domain(DomainError::MemoryFailed {
                            addr: cursor,
                            detail: format!("stub error E{:02x}", code),
                            bytes_done: out.len(),
                            bytes_requested: len,
                        }))
                    }
                    _ => {
                        return Err(CoreError::Domain(DomainError::MemoryFailed {
                            addr: cursor,
                            detail: "unexpected reply to memory read".into(),
                            bytes_done: out.len(),
                            bytes_requested: len,
                        }))
                    }
                }
            }
            Ok(out)
        })
    }

    pub fn write_memory(&self, addr: u64, bytes: &[u8]) -> Result<(), CoreError> {
        self.with_interrupt_if_running(|| {
            let cmd_prefix = format!("M{:x},{:x}:", addr, bytes.len());
            let mut cmd = cmd_prefix.into_bytes();
            cmd.extend(hex_encode(bytes).into_bytes());
            let resp = self.client.send(&cmd, SendOptions::default()).map_err(to_core_error)?;
            match resp {
                Response::Ok => Ok(()),
                Response::Error(code) => Err(CoreError::Domain(DomainError::MemoryFailed {
                    addr,
                    detail: format!("stub error E{:02x}", code),
                    bytes_done: 0,
                    bytes_requested: bytes.len(),
                })),
                _ => Err(CoreError::Domain(DomainError::MemoryFailed {
                    addr,
                    detail: "unexpected reply to memory write".into(),
                    bytes_done: 0,
                    bytes_requested: bytes.len(),
                })),
            }
        })
    }

    /// `_M<size>,<perms>` / `_m<addr>` allocate/deallocate pair.
    pub fn allocate(&self, size: u64, perms: &str) -> Result<u64, CoreError> {
        self.with_interrupt_if_running(|| {
            let cmd = format!("_M{:x},{}", size, perms);
            let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
            match resp {
                Response::Normal(bytes) => {
                    let s = std::str::from_utf8(&bytes).map_err(|_| {
                        CoreError::Domain(DomainError::AllocateFailed("non-utf8 allocate reply".into()))
                    })?;
                    u64::from_str_radix(s.trim(), 16)
                        .map_err(|_| CoreError::Domain(DomainError::AllocateFailed("malformed address".into())))
                }
                _ => Err(CoreError::Domain(DomainError::AllocateFailed("stub refused allocation".into()))),
            }
        })
    }

    pub fn deallocate(&self, addr: u64) -> Result<(), CoreError> {
        self.with_interrupt_if_running(|| {
            let cmd = format!("_m{:x}", addr);
            let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
            self.require_response_ok(resp)
        })
    }

    /// `qRcmd` passthrough: hex-encodes an opaque command string and
    /// concatenates `O`-prefixed console output chunks into one string,
    /// per the supplemented feature in SPEC_FULL §10.
    pub fn send_raw_command(&self, command: &str) -> Result<String, CoreError> {
        self.with_interrupt_if_running(|| {
            let cmd = format!("qRcmd,{}", hex_encode(command.as_bytes()));
            let resp = self.client.send(cmd.as_bytes(), SendOptions::default()).map_err(to_core_error)?;
            match resp {
                Response::Ok => Ok(String::new()),
                Response::Normal(bytes) => {
                    let decoded = hex_decode(&bytes)
                        .ok_or_else(|| CoreError::Protocol(crate::error::ProtocolError::Malformed("bad qRcmd reply hex".into())))?;
                    String::from_utf8(decoded)
                        .map_err(|_| CoreError::Protocol(crate::error::ProtocolError::Malformed("non-utf8 qRcmd output".into())))
                }
                Response::Error(code) => Err(crate::error::ProtocolError::StubError(code, "qRcmd failed".into()).into()),
                Response::Unsupported => Err(crate::error::ProtocolError::Unsupported.into()),
            }
        })
    }

    /// Broadcasts state changes on the target's own broadcaster so
    /// listeners (e.g. `AsyncEventThread`) don't need direct field access.
    pub fn notify_state_change(&self, old: ProcessState, new: ProcessState) {
        self.target.lock().unwrap().broadcaster.broadcast(
            1,
            EventPayload::StateChanged {
                old: old.as_str().to_string(),
                new: new.as_str().to_string(),
            },
        );
    }
}

fn to_core_error(e: CoreSendError) -> CoreError {
    match e {
        CoreSendError::Transport(t) => CoreError::Transport(t),
        CoreSendError::Protocol(p) => CoreError::Protocol(p),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &[u8]) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let s = std::str::from_utf8(s).ok()?;
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackTransport, Transport};

    fn orchestrator_with_script(frames: &[&[u8]]) -> TargetOrchestrator {
        let mut t = LoopbackTransport::new();
        t.connect("loop://").unwrap();
        for f in frames {
            t.push_inbound(&crate::packet::encode_frame(f));
        }
        let client = RemoteClient::new(Box::new(t));
        client.connect("loop://").unwrap();
        client.test_force_no_ack();
        TargetOrchestrator::new(client, TargetSettings::default())
    }

    #[test]
    fn launch_transitions_through_launching_to_stopped() {
        let orch = orchestrator_with_script(&[b"OK"]);
        orch.launch("/bin/true", &[]).unwrap();
        assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Stopped);
    }

    #[test]
    fn read_memory_decodes_hex_reply() {
        let orch = orchestrator_with_script(&[b"deadbeef"]);
        let bytes = orch.read_memory(0x1000, 4).unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn send_raw_command_decodes_console_output() {
        let hex = hex_encode(b"hello\n");
        let orch = orchestrator_with_script(&[hex.as_bytes()]);
        let out = orch.send_raw_command("help").unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn destroy_runs_recovery_before_disconnect() {
        let orch = orchestrator_with_script(&[]);
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        struct MarkRecovery(Arc<std::sync::atomic::AtomicBool>);
        impl PreDestroyRecovery for MarkRecovery {
            fn run(&self, _orchestrator: &TargetOrchestrator) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }
        orch.set_pre_destroy_recovery(Box::new(MarkRecovery(ran.clone())));
        orch.destroy();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Exited);
    }

    #[test]
    fn stop_hook_auto_continue_vote_is_reported() {
        let mut target = Target::new(TargetSettings::default());
        target.create_stop_hook(None, Box::new(|_tid| false));
        assert!(!target.run_stop_hooks(1));
        target.create_stop_hook(None, Box::new(|_tid| true));
        // One hook votes auto-continue; overall result still reflects that.
        assert!(!target.run_stop_hooks(1));
    }

    #[test]
    fn handle_stop_notification_reports_thread_stop_and_stops_process() {
        let orch = orchestrator_with_script(&[]);
        orch.process.lock().unwrap().transition_to(ProcessState::Connected).unwrap();
        orch.process.lock().unwrap().transition_to(ProcessState::Running).unwrap();
        let note = orch
            .handle_stop_notification(b"T05thread:1;threads:1;thread-pcs:1000;reason:signal;")
            .unwrap();
        match note {
            StopNotification::ThreadStop { tid, .. } => assert_eq!(tid, 1),
            other => panic!("expected ThreadStop, got {:?}", other),
        }
        assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Stopped);
        assert_eq!(orch.threads.get(1).unwrap().pc, Some(0x1000));
    }

    #[test]
    fn handle_stop_notification_exec_resets_sites_and_resume_log() {
        let orch = orchestrator_with_script(&[]);
        orch.process.lock().unwrap().transition_to(ProcessState::Connected).unwrap();
        orch.process.lock().unwrap().transition_to(ProcessState::Running).unwrap();
        orch.last_resume.lock().unwrap().insert(1, LastResume::Stepping);
        let note = orch
            .handle_stop_notification(b"T05thread:1;threads:1;thread-pcs:9000;reason:exec;")
            .unwrap();
        assert!(matches!(note, StopNotification::ThreadStop { .. }));
        assert!(orch.last_resume.lock().unwrap().is_empty());
        assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Stopped);
    }

    #[test]
    fn handle_stop_notification_exited_transitions_process() {
        let orch = orchestrator_with_script(&[]);
        orch.process.lock().unwrap().transition_to(ProcessState::Connected).unwrap();
        orch.process.lock().unwrap().transition_to(ProcessState::Running).unwrap();
        let note = orch.handle_stop_notification(b"W00").unwrap();
        assert!(matches!(note, StopNotification::Exited { status: 0 }));
        assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Exited);
    }

    #[test]
    fn resume_seeds_last_resume_log_with_continuing() {
        let orch = orchestrator_with_script(&[b"OK"]);
        orch.threads.ingest_j_threads_info(r#"[{"tid":"1"}]"#).unwrap();
        orch.process.lock().unwrap().transition_to(ProcessState::Connected).unwrap();
        orch.process.lock().unwrap().transition_to(ProcessState::Stopped).unwrap();
        orch.resume().unwrap();
        assert_eq!(orch.last_resume.lock().unwrap().get(&1), Some(&LastResume::Continuing));
    }

    #[test]
    fn source_path_remap_uses_first_match() {
        let mut target = Target::new(TargetSettings::default());
        target.settings.source_map.push(crate::settings::SourceMapEntry {
            from: "/build/".into(),
            to: "/home/me/src/".into(),
        });
        assert_eq!(target.remap_source_path("/build/foo.c"), "/home/me/src/foo.c");
        assert_eq!(target.remap_source_path("/other/foo.c"), "/other/foo.c");
    }
}
