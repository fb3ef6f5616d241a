//! End-to-end scenarios driving `TargetOrchestrator` against a scripted
//! `LoopbackTransport`, exercising the full packet-codec -> remote-client ->
//! thread-registry -> target path without a real stub process.

use rpdbg_core::breakpoint::{BreakpointOptions, Filter, InstallAttempt, NameKindMask, Resolver, SiteInstaller};
use rpdbg_core::error::DomainError;
use rpdbg_core::process::ProcessState;
use rpdbg_core::register_info::Arch;
use rpdbg_core::remote_client::RemoteClient;
use rpdbg_core::settings::TargetSettings;
use rpdbg_core::target::{StopNotification, TargetOrchestrator};
use rpdbg_core::thread_registry::StopReason;
use rpdbg_core::transport::{LoopbackTransport, Transport};
use rpdbg_core::watchpoint::{AccessKind, Watchpoint};

fn frame(payload: &[u8]) -> Vec<u8> {
    rpdbg_core::packet::encode_frame(payload)
}

/// Builds an orchestrator whose client has already completed the no-ack
/// handshake, with `scenario_payloads` queued as the framed replies to
/// whatever the test sends next.
fn ready_orchestrator(scenario_payloads: &[&[u8]]) -> TargetOrchestrator {
    let mut t = LoopbackTransport::new();
    t.connect("loop://").unwrap();
    t.push_inbound(b"+");
    t.push_inbound(&frame(b"OK"));
    for payload in scenario_payloads {
        t.push_inbound(&frame(payload));
    }
    let client = RemoteClient::new(Box::new(t));
    client.connect("loop://").unwrap();
    client.enable_no_ack_mode().unwrap();
    TargetOrchestrator::new(client, TargetSettings::default())
}

/// `SiteInstaller` that always succeeds via the software path, for tests
/// that need an actually-installed breakpoint site rather than just a
/// breakpoint object.
struct AlwaysSoftware;

impl SiteInstaller for AlwaysSoftware {
    fn try_install_software(&mut self, _address: u64, _size: u32) -> InstallAttempt {
        InstallAttempt::Installed
    }
    fn try_install_hardware(&mut self, _address: u64, _size: u32) -> InstallAttempt {
        InstallAttempt::Unsupported
    }
    fn try_remove_software(&mut self, _address: u64, _size: u32) -> InstallAttempt {
        InstallAttempt::Installed
    }
    fn try_remove_hardware(&mut self, _address: u64, _size: u32) -> InstallAttempt {
        InstallAttempt::Installed
    }
    fn read_memory(&mut self, _address: u64, len: usize) -> Result<Vec<u8>, DomainError> {
        Ok(vec![0u8; len])
    }
    fn write_memory(&mut self, _address: u64, _bytes: &[u8]) -> Result<(), DomainError> {
        Ok(())
    }
    fn trap_opcode(&self) -> Vec<u8> {
        vec![0xcc]
    }
}

#[test]
fn no_ack_handshake_brings_up_the_connection() {
    let mut t = LoopbackTransport::new();
    t.connect("loop://").unwrap();
    t.push_inbound(b"+");
    t.push_inbound(&frame(b"OK"));
    let client = RemoteClient::new(Box::new(t));
    let orch = TargetOrchestrator::new(client, TargetSettings::default());
    orch.connect_remote("loop://").unwrap();
    assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Connected);
}

#[test]
fn breakpoint_hit_after_module_load_is_reported_at_its_site() {
    let lib_list =
        br#"l<library-list-svr4 main-lm="0x0"><library name="libfoo.so" l_addr="0x4000"/></library-list-svr4>"#;
    let orch = ready_orchestrator(&[lib_list]);
    {
        let mut target = orch.target.lock().unwrap();
        let filter = Filter {
            module_patterns: vec!["libfoo.so".into()],
            compile_unit_patterns: Vec::new(),
        };
        let resolver = Resolver::FunctionName {
            name: "main".into(),
            name_kind_mask: NameKindMask::Full,
            language: None,
        };
        target.create_breakpoint(filter, resolver, BreakpointOptions::default());
    }

    let library_stop = orch
        .handle_stop_notification(b"T05thread:1;threads:1;thread-pcs:0;reason:trace;library:;")
        .unwrap();
    assert!(matches!(
        library_stop,
        StopNotification::ThreadStop { modules_changed: true, .. }
    ));

    let mut installer = AlwaysSoftware;
    let added = orch.reconcile_modules(&|_| vec![0x4000], &mut installer).unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(orch.target.lock().unwrap().breakpoints.site_count(), 1);

    let note = orch
        .handle_stop_notification(b"T05thread:1;threads:1;thread-pcs:4000;reason:trace;")
        .unwrap();
    match note {
        StopNotification::ThreadStop { tid, reason, .. } => {
            assert_eq!(tid, 1);
            assert_eq!(reason, StopReason::BreakpointHit(0x4000));
        }
        other => panic!("expected a thread stop, got {:?}", other),
    }
}

#[test]
fn mips_watchpoint_stop_matches_the_hit_address_not_the_requested_one() {
    let orch = ready_orchestrator(&[]);
    {
        let mut target = orch.target.lock().unwrap();
        target.arch = Arch::Mips;
        target.watchpoints.insert(Watchpoint::new(0x1004, 4, AccessKind::Write));
    }
    let note = orch
        .handle_stop_notification(b"T05thread:1;threads:1;thread-pcs:1000;reason:watchpoint;watch:1000;awatch:1004;")
        .unwrap();
    match note {
        StopNotification::ThreadStop { reason, .. } => {
            assert_eq!(reason, StopReason::WatchpointHit { address: 0x1004 });
        }
        other => panic!("expected a thread stop, got {:?}", other),
    }
}

#[test]
fn memory_read_expands_a_run_length_encoded_reply() {
    // "f" then an RLE run of 31 more 'f's (count byte 29+31='<') -> 32 hex
    // digits -> 16 bytes of 0xff, matching a stub that compresses a long
    // run of identical bytes per the wire grammar's RLE rule.
    let orch = ready_orchestrator(&[b"f*<"]);
    let bytes = orch.read_memory(0x8000, 16).unwrap();
    assert_eq!(bytes, vec![0xffu8; 16]);
}

#[test]
fn halt_during_a_long_continue_delivers_the_pending_stop() {
    let orch = ready_orchestrator(&[b"OK", b"T05thread:1;threads:1;thread-pcs:2000;reason:signal;"]);
    orch.process.lock().unwrap().transition_to(ProcessState::Connected).unwrap();
    orch.resume().unwrap();
    orch.halt().unwrap();
    assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Stopped);
}

#[test]
fn exec_notification_clears_breakpoint_sites_and_the_resume_log() {
    let orch = ready_orchestrator(&[b"OK"]);
    {
        let mut target = orch.target.lock().unwrap();
        target.create_breakpoint(Filter::default(), Resolver::Address(0x4000), BreakpointOptions::default());
        let mut installer = AlwaysSoftware;
        target
            .breakpoints
            .on_module_added("a.out", &|_| vec![0x4000], &mut installer, true);
        assert_eq!(target.breakpoints.site_count(), 1);
    }
    orch.process.lock().unwrap().transition_to(ProcessState::Connected).unwrap();
    orch.resume().unwrap();
    let note = orch
        .handle_stop_notification(b"T05thread:1;threads:1;thread-pcs:9000;reason:exec;")
        .unwrap();
    assert!(matches!(note, StopNotification::ThreadStop { .. }));
    assert_eq!(orch.target.lock().unwrap().breakpoints.site_count(), 0);
    assert_eq!(orch.process.lock().unwrap().state(), ProcessState::Stopped);
}
