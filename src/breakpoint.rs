//! Breakpoint / Watchpoint Manager (C7): Filter + Resolver + Site model,
//! software↔hardware fallback, refcounted site interning, and
//! reconciliation on module load/unload/replace/exec/process-exit.
//!
//! Grounded on distilled spec §4.7 directly; the install/remove pipeline
//! shape follows `EnableBreakpointSite`/`DisableBreakpointSite` in
//! `examples/original_source/source/Plugins/Process/gdb-remote/ProcessGDBRemote.cpp`.

use crate::error::{DomainError, DomainErrorKind};
use crate::handle::{BreakpointId, BreakpointSiteId, HandleTable};
use crate::remote_client::{RemoteClient, Response, SendOptions};
use std::collections::HashMap;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SiteKind {
    /// Installed via a stub-managed `Z0` (the trap itself lives outside
    /// this core — see Open Question #1 in DESIGN.md).
    External,
    Hardware,
    /// Installed by this core directly patching the inferior's memory.
    Software,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NameKindMask {
    Full,
    Base,
    Method,
    Selector,
    Any,
}

#[derive(Clone, Debug)]
pub enum InlinePolicy {
    Never,
    Headers,
    Always,
}

#[derive(Clone, Debug)]
pub enum Resolver {
    Address(u64),
    FileLine {
        file: String,
        line: u32,
        inline_policy: InlinePolicy,
    },
    FunctionName {
        name: String,
        name_kind_mask: NameKindMask,
        language: Option<String>,
    },
    FunctionRegex(String),
    SourceRegex(String),
    LanguageExceptionKind(String),
}

#[derive(Clone, Debug, Default)]
pub struct Filter {
    pub module_patterns: Vec<String>,
    pub compile_unit_patterns: Vec<String>,
}

impl Filter {
    pub fn matches_module(&self, module_name: &str) -> bool {
        self.module_patterns.is_empty()
            || self
                .module_patterns
                .iter()
                .any(|p| module_name.contains(p.as_str()))
    }
}

#[derive(Clone, Debug, Default)]
pub struct BreakpointOptions {
    pub condition: Option<String>,
    pub thread_filter: Option<u64>,
    pub ignore_count: u32,
    pub hardware: bool,
    pub skip_prologue: bool,
    pub resolve_indirect_symbols: bool,
    pub move_to_nearest_code: bool,
}

/// A candidate address a Resolver produced against one module; load
/// address is filled in once the module is loaded.
#[derive(Clone, Debug)]
pub struct BreakpointLocation {
    pub module_name: String,
    pub file_address: u64,
    pub load_address: Option<u64>,
    pub site: Option<BreakpointSiteId>,
    pub enabled: bool,
}

pub struct Breakpoint {
    pub filter: Filter,
    pub resolver: Resolver,
    pub options: BreakpointOptions,
    pub locations: Vec<BreakpointLocation>,
}

#[derive(Clone, Debug)]
pub struct BreakpointSite {
    pub address: u64,
    pub size: u32,
    pub kind: SiteKind,
    pub refcount: u32,
    pub original_bytes: Option<Vec<u8>>,
    pub enabled: bool,
}

pub enum InstallAttempt {
    Installed,
    Unsupported,
    Error(String),
}

/// Narrow interface onto the Remote Client the site pipeline needs —
/// kept separate from `RemoteClient` itself so breakpoint logic is
/// testable without a transport.
pub trait SiteInstaller {
    fn try_install_software(&mut self, address: u64, size: u32) -> InstallAttempt;
    fn try_install_hardware(&mut self, address: u64, size: u32) -> InstallAttempt;
    fn try_remove_software(&mut self, address: u64, size: u32) -> InstallAttempt;
    fn try_remove_hardware(&mut self, address: u64, size: u32) -> InstallAttempt;
    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DomainError>;
    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<(), DomainError>;
    fn trap_opcode(&self) -> Vec<u8>;
}

#[derive(Default)]
pub struct CapabilityCache {
    pub software_unsupported: bool,
    pub hardware_unsupported: bool,
}

pub struct BreakpointManager {
    user: HandleTable<BreakpointId, Breakpoint>,
    internal: HandleTable<BreakpointId, Breakpoint>,
    sites: HashMap<u64, (BreakpointSiteId, BreakpointSite)>,
    site_ids: HandleTable<BreakpointSiteId, u64>,
    caps: CapabilityCache,
}

impl BreakpointManager {
    pub fn new() -> Self {
        BreakpointManager {
            user: HandleTable::new(BreakpointId),
            internal: HandleTable::new_internal(BreakpointId),
            sites: HashMap::new(),
            site_ids: HandleTable::new(BreakpointSiteId),
            caps: CapabilityCache::default(),
        }
    }

    pub fn create(
        &mut self,
        filter: Filter,
        resolver: Resolver,
        options: BreakpointOptions,
        internal: bool,
    ) -> BreakpointId {
        let bp = Breakpoint {
            filter,
            resolver,
            options,
            locations: Vec::new(),
        };
        if internal {
            self.internal.insert(bp)
        } else {
            self.user.insert(bp)
        }
    }

    fn table_for(&self, id: BreakpointId) -> &HandleTable<BreakpointId, Breakpoint> {
        if id.is_internal() {
            &self.internal
        } else {
            &self.user
        }
    }

    fn table_for_mut(&mut self, id: BreakpointId) -> &mut HandleTable<BreakpointId, Breakpoint> {
        if id.is_internal() {
            &mut self.internal
        } else {
            &mut self.user
        }
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.table_for(id).get(id)
    }

    pub fn user_breakpoints(&self) -> impl Iterator<Item = (BreakpointId, &Breakpoint)> {
        self.user.iter()
    }

    pub fn internal_breakpoints(&self) -> impl Iterator<Item = (BreakpointId, &Breakpoint)> {
        self.internal.iter()
    }

    /// Resolver visits a newly-loaded module, producing candidate
    /// locations that match the Filter. Address-based resolvers always
    /// "match"; name/regex resolvers are modeled here via a caller-
    /// supplied symbol table lookup (symbolication itself is out of
    /// scope per §1 Non-goals).
    pub fn on_module_added(
        &mut self,
        module_name: &str,
        symbol_lookup: &dyn Fn(&Resolver) -> Vec<u64>,
        installer: &mut dyn SiteInstaller,
        is_live: bool,
    ) -> Vec<Result<(), DomainError>> {
        let mut results = Vec::new();
        for (_, bp) in self.user.iter_mut().chain(self.internal.iter_mut()) {
            if !bp.filter.matches_module(module_name) {
                continue;
            }
            let addrs = symbol_lookup(&bp.resolver);
            for file_address in addrs {
                bp.locations.push(BreakpointLocation {
                    module_name: module_name.to_string(),
                    file_address,
                    load_address: Some(file_address),
                    site: None,
                    enabled: true,
                });
            }
        }
        if is_live {
            results.extend(self.install_all_pending(installer));
        }
        results
    }

    /// Installs a site for every pending (unresolved-site) location across
    /// both user and internal breakpoints. Exposed beyond `on_module_added`
    /// so a caller holding a live `RemoteSiteInstaller` can re-run
    /// installation once previously-pending locations gain a load address.
    pub fn install_all_pending(&mut self, installer: &mut dyn SiteInstaller) -> Vec<Result<(), DomainError>> {
        let mut outcomes = Vec::new();
        for (_, bp) in self.user.iter_mut().chain(self.internal.iter_mut()) {
            let hardware_required = bp.options.hardware;
            for loc in bp.locations.iter_mut() {
                if loc.site.is_some() || !loc.enabled {
                    continue;
                }
                if let Some(load_addr) = loc.load_address {
                    let outcome = install_site(&mut self.sites, &mut self.site_ids, &mut self.caps, load_addr, 1, hardware_required, installer);
                    match outcome {
                        Ok(site_id) => {
                            loc.site = Some(site_id);
                            outcomes.push(Ok(()));
                        }
                        Err(e) => outcomes.push(Err(e)),
                    }
                }
            }
        }
        outcomes
    }

    pub fn on_module_removed(&mut self, module_name: &str, installer: &mut dyn SiteInstaller) {
        for (_, bp) in self.user.iter_mut().chain(self.internal.iter_mut()) {
            for loc in bp.locations.iter_mut() {
                if loc.module_name == module_name {
                    if let Some(site_id) = loc.site.take() {
                        remove_site(&mut self.sites, &mut self.site_ids, site_id, installer);
                    }
                    loc.load_address = None;
                }
            }
        }
    }

    /// On `exec`, the address space is unrecognizable: drop all sites
    /// without touching the stub (the process image they pointed into is
    /// gone) and clear every location's resolution so the caller
    /// re-resolves against the post-exec module set.
    pub fn on_exec(&mut self) {
        self.sites.clear();
        self.site_ids = HandleTable::new(BreakpointSiteId);
        for (_, bp) in self.user.iter_mut().chain(self.internal.iter_mut()) {
            bp.locations.clear();
        }
    }

    /// On process exit, drop sites (they no longer exist in any address
    /// space) but keep the breakpoints themselves for the next launch.
    pub fn on_process_exit(&mut self) {
        self.sites.clear();
        self.site_ids = HandleTable::new(BreakpointSiteId);
        for (_, bp) in self.user.iter_mut().chain(self.internal.iter_mut()) {
            for loc in bp.locations.iter_mut() {
                loc.site = None;
                loc.load_address = None;
            }
        }
    }

    pub fn site_refcount(&self, address: u64) -> u32 {
        self.sites.get(&address).map(|(_, s)| s.refcount).unwrap_or(0)
    }

    /// Per `thread_registry::StopContext::site_at`: is there an installed
    /// site at this load address, and if so what's its identifying key
    /// (the address itself — sites are interned by address, see `intern`).
    pub fn site_at(&self, address: u64) -> Option<u64> {
        self.sites.get(&address).map(|_| address)
    }

    pub fn is_site_enabled(&self, address: u64) -> bool {
        self.sites.get(&address).map(|(_, s)| s.enabled).unwrap_or(false)
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    pub fn remove_location_site(&mut self, id: BreakpointId, index: usize, installer: &mut dyn SiteInstaller) {
        if let Some(bp) = self.table_for_mut(id).get_mut(id) {
            if let Some(loc) = bp.locations.get_mut(index) {
                if let Some(site_id) = loc.site.take() {
                    remove_site(&mut self.sites, &mut self.site_ids, site_id, installer);
                }
            }
        }
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.7 steps 1-5, as a pipeline each step of which returns `Installed`,
/// `Unsupported` (advance), or `Error` (abort), threading capability
/// memoization through.
fn install_site(
    sites: &mut HashMap<u64, (BreakpointSiteId, BreakpointSite)>,
    site_ids: &mut HandleTable<BreakpointSiteId, u64>,
    caps: &mut CapabilityCache,
    address: u64,
    size: u32,
    hardware_required: bool,
    installer: &mut dyn SiteInstaller,
) -> Result<BreakpointSiteId, DomainError> {
    // Step 1: intern by address.
    if let Some((id, site)) = sites.get_mut(&address) {
        site.refcount += 1;
        return Ok(*id);
    }

    if !hardware_required && !caps.software_unsupported {
        match installer.try_install_software(address, size) {
            InstallAttempt::Installed => {
                return Ok(intern(sites, site_ids, address, size, SiteKind::External, None));
            }
            InstallAttempt::Unsupported => caps.software_unsupported = true,
            InstallAttempt::Error(detail) => {
                return Err(DomainError::BreakpointInstallFailed {
                    kind: DomainErrorKind::Other,
                    detail,
                })
            }
        }
    }

    if !caps.hardware_unsupported {
        match installer.try_install_hardware(address, size) {
            InstallAttempt::Installed => {
                return Ok(intern(sites, site_ids, address, size, SiteKind::Hardware, None));
            }
            InstallAttempt::Unsupported => caps.hardware_unsupported = true,
            InstallAttempt::Error(detail) => {
                return Err(DomainError::BreakpointInstallFailed {
                    kind: DomainErrorKind::HardwareExhausted,
                    detail,
                })
            }
        }
    }

    if !hardware_required {
        let opcode = installer.trap_opcode();
        let original = installer.read_memory(address, opcode.len())?;
        installer.write_memory(address, &opcode)?;
        return Ok(intern(
            sites,
            site_ids,
            address,
            size,
            SiteKind::Software,
            Some(original),
        ));
    }

    crate::rd_log!(
        crate::logging::LogLevel::LogWarn,
        "breakpoint install failed at {:#x}: hardware required but unavailable",
        address
    );
    Err(DomainError::BreakpointInstallFailed {
        kind: DomainErrorKind::HardwareExhausted,
        detail: "hardware site required but unavailable and software sites aren't an acceptable fallback".into(),
    })
}

fn intern(
    sites: &mut HashMap<u64, (BreakpointSiteId, BreakpointSite)>,
    site_ids: &mut HandleTable<BreakpointSiteId, u64>,
    address: u64,
    size: u32,
    kind: SiteKind,
    original_bytes: Option<Vec<u8>>,
) -> BreakpointSiteId {
    let id = site_ids.insert(address);
    sites.insert(
        address,
        (
            id,
            BreakpointSite {
                address,
                size,
                kind,
                refcount: 1,
                original_bytes,
                enabled: true,
            },
        ),
    );
    id
}

/// Removal reverses whichever kind installed the site, per §4.7 and Open
/// Question #1's resolution in DESIGN.md.
fn remove_site(
    sites: &mut HashMap<u64, (BreakpointSiteId, BreakpointSite)>,
    site_ids: &mut HandleTable<BreakpointSiteId, u64>,
    site_id: BreakpointSiteId,
    installer: &mut dyn SiteInstaller,
) {
    let address = match site_ids.get(site_id) {
        Some(a) => *a,
        None => return,
    };
    let should_remove = {
        let (_, site) = match sites.get_mut(&address) {
            Some(s) => s,
            None => return,
        };
        site.refcount -= 1;
        site.refcount == 0
    };
    if !should_remove {
        return;
    }
    let (_, site) = sites.remove(&address).unwrap();
    site_ids.remove(site_id);
    match site.kind {
        SiteKind::External => {
            let _ = installer.try_remove_software(address, site.size);
        }
        SiteKind::Hardware => {
            let _ = installer.try_remove_hardware(address, site.size);
        }
        SiteKind::Software => {
            if let Some(original) = site.original_bytes {
                let _ = installer.write_memory(address, &original);
            }
        }
    }
}

/// Production `SiteInstaller`: issues real `Z0`/`Z1`/`z0`/`z1` site packets
/// and `m`/`M` memory commands through a `RemoteClient`, closing the gap
/// between the site pipeline above and the wire per §4.7/C7.
pub struct RemoteSiteInstaller<'a> {
    client: &'a RemoteClient,
}

impl<'a> RemoteSiteInstaller<'a> {
    pub fn new(client: &'a RemoteClient) -> Self {
        RemoteSiteInstaller { client }
    }

    fn send_site_packet(&self, kind: u8, set: bool, address: u64, size: u32) -> InstallAttempt {
        let cmd = format!("{}{},{:x},{:x}", if set { 'Z' } else { 'z' }, kind, address, size);
        match self.client.send(cmd.as_bytes(), SendOptions::default()) {
            Ok(Response::Ok) | Ok(Response::Normal(_)) => InstallAttempt::Installed,
            Ok(Response::Unsupported) => InstallAttempt::Unsupported,
            Ok(Response::Error(code)) => InstallAttempt::Error(format!("stub error E{:02x}", code)),
            Err(e) => InstallAttempt::Error(e.to_string()),
        }
    }
}

impl<'a> SiteInstaller for RemoteSiteInstaller<'a> {
    fn try_install_software(&mut self, address: u64, size: u32) -> InstallAttempt {
        self.send_site_packet(0, true, address, size)
    }

    fn try_install_hardware(&mut self, address: u64, size: u32) -> InstallAttempt {
        self.send_site_packet(1, true, address, size)
    }

    fn try_remove_software(&mut self, address: u64, size: u32) -> InstallAttempt {
        self.send_site_packet(0, false, address, size)
    }

    fn try_remove_hardware(&mut self, address: u64, size: u32) -> InstallAttempt {
        self.send_site_packet(1, false, address, size)
    }

    fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DomainError> {
        let cmd = format!("m{:x},{:x}", address, len);
        match self.client.send(cmd.as_bytes(), SendOptions::default()) {
            Ok(Response::Normal(bytes)) => remote_hex_decode(&bytes).ok_or_else(|| DomainError::MemoryFailed {
                addr: address,
                detail: "malformed hex in memory read reply".into(),
                bytes_done: 0,
                bytes_requested: len,
            }),
            Ok(Response::Error(code)) => Err(DomainError::MemoryFailed {
                addr: address,
                detail: format!("stub error E{:02x}", code),
                bytes_done: 0,
                bytes_requested: len,
            }),
            Ok(_) => Err(DomainError::MemoryFailed {
                addr: address,
                detail: "unexpected reply to memory read".into(),
                bytes_done: 0,
                bytes_requested: len,
            }),
            Err(e) => Err(DomainError::MemoryFailed {
                addr: address,
                detail: e.to_string(),
                bytes_done: 0,
                bytes_requested: len,
            }),
        }
    }

    fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<(), DomainError> {
        let mut cmd = format!("M{:x},{:x}:", address, bytes.len()).into_bytes();
        cmd.extend(remote_hex_encode(bytes).into_bytes());
        match self.client.send(&cmd, SendOptions::default()) {
            Ok(Response::Ok) => Ok(()),
            Ok(Response::Error(code)) => Err(DomainError::MemoryFailed {
                addr: address,
                detail: format!("stub error E{:02x}", code),
                bytes_done: 0,
                bytes_requested: bytes.len(),
            }),
            Ok(_) => Err(DomainError::MemoryFailed {
                addr: address,
                detail: "unexpected reply to memory write".into(),
                bytes_done: 0,
                bytes_requested: bytes.len(),
            }),
            Err(e) => Err(DomainError::MemoryFailed {
                addr: address,
                detail: e.to_string(),
                bytes_done: 0,
                bytes_requested: bytes.len(),
            }),
        }
    }

    fn trap_opcode(&self) -> Vec<u8> {
        vec![0xcc]
    }
}

fn remote_hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn remote_hex_decode(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let s = std::str::from_utf8(bytes).ok()?;
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeInstaller {
        software_supported: bool,
        hardware_supported: bool,
        memory: HashMap<u64, Vec<u8>>,
        removed_software: Vec<u64>,
        removed_hardware: Vec<u64>,
    }

    impl FakeInstaller {
        fn new() -> Self {
            FakeInstaller {
                software_supported: true,
                hardware_supported: true,
                memory: HashMap::new(),
                removed_software: Vec::new(),
                removed_hardware: Vec::new(),
            }
        }
    }

    impl SiteInstaller for FakeInstaller {
        fn try_install_software(&mut self, _address: u64, _size: u32) -> InstallAttempt {
            if self.software_supported {
                InstallAttempt::Installed
            } else {
                InstallAttempt::Unsupported
            }
        }
        fn try_install_hardware(&mut self, _address: u64, _size: u32) -> InstallAttempt {
            if self.hardware_supported {
                InstallAttempt::Installed
            } else {
                InstallAttempt::Unsupported
            }
        }
        fn try_remove_software(&mut self, address: u64, _size: u32) -> InstallAttempt {
            self.removed_software.push(address);
            InstallAttempt::Installed
        }
        fn try_remove_hardware(&mut self, address: u64, _size: u32) -> InstallAttempt {
            self.removed_hardware.push(address);
            InstallAttempt::Installed
        }
        fn read_memory(&mut self, address: u64, len: usize) -> Result<Vec<u8>, DomainError> {
            Ok(self.memory.get(&address).cloned().unwrap_or_else(|| vec![0u8; len]))
        }
        fn write_memory(&mut self, address: u64, bytes: &[u8]) -> Result<(), DomainError> {
            self.memory.insert(address, bytes.to_vec());
            Ok(())
        }
        fn trap_opcode(&self) -> Vec<u8> {
            vec![0xcc]
        }
    }

    #[test]
    fn software_capable_path_yields_external_site() {
        let mut sites = HashMap::new();
        let mut ids: HandleTable<BreakpointSiteId, u64> = HandleTable::new(BreakpointSiteId);
        let mut caps = CapabilityCache::default();
        let mut inst = FakeInstaller::new();
        let id = install_site(&mut sites, &mut ids, &mut caps, 0x1000, 1, false, &mut inst).unwrap();
        assert_eq!(sites[&0x1000].1.kind, SiteKind::External);
        assert_eq!(sites[&0x1000].1.refcount, 1);
        let _ = id;
    }

    #[test]
    fn software_unsupported_falls_back_to_hardware() {
        let mut sites = HashMap::new();
        let mut ids: HandleTable<BreakpointSiteId, u64> = HandleTable::new(BreakpointSiteId);
        let mut caps = CapabilityCache::default();
        let mut inst = FakeInstaller::new();
        inst.software_supported = false;
        install_site(&mut sites, &mut ids, &mut caps, 0x2000, 1, false, &mut inst).unwrap();
        assert_eq!(sites[&0x2000].1.kind, SiteKind::Hardware);
        assert!(caps.software_unsupported);
    }

    #[test]
    fn both_unsupported_falls_back_to_memory_patch() {
        let mut sites = HashMap::new();
        let mut ids: HandleTable<BreakpointSiteId, u64> = HandleTable::new(BreakpointSiteId);
        let mut caps = CapabilityCache::default();
        let mut inst = FakeInstaller::new();
        inst.software_supported = false;
        inst.hardware_supported = false;
        install_site(&mut sites, &mut ids, &mut caps, 0x3000, 1, false, &mut inst).unwrap();
        assert_eq!(sites[&0x3000].1.kind, SiteKind::Software);
        assert_eq!(inst.memory[&0x3000], vec![0xcc]);
    }

    #[test]
    fn hardware_required_with_none_available_fails() {
        let mut sites = HashMap::new();
        let mut ids: HandleTable<BreakpointSiteId, u64> = HandleTable::new(BreakpointSiteId);
        let mut caps = CapabilityCache::default();
        let mut inst = FakeInstaller::new();
        inst.hardware_supported = false;
        let err = install_site(&mut sites, &mut ids, &mut caps, 0x4000, 1, true, &mut inst);
        assert!(err.is_err());
    }

    #[test]
    fn site_interning_shares_one_site_across_locations() {
        let mut sites = HashMap::new();
        let mut ids: HandleTable<BreakpointSiteId, u64> = HandleTable::new(BreakpointSiteId);
        let mut caps = CapabilityCache::default();
        let mut inst = FakeInstaller::new();
        let id1 = install_site(&mut sites, &mut ids, &mut caps, 0x5000, 1, false, &mut inst).unwrap();
        let id2 = install_site(&mut sites, &mut ids, &mut caps, 0x5000, 1, false, &mut inst).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(sites[&0x5000].1.refcount, 2);
        remove_site(&mut sites, &mut ids, id1, &mut inst);
        assert_eq!(sites[&0x5000].1.refcount, 1);
        assert!(inst.removed_software.is_empty());
        remove_site(&mut sites, &mut ids, id2, &mut inst);
        assert!(!sites.contains_key(&0x5000));
        assert_eq!(inst.removed_software, vec![0x5000]);
    }

    #[test]
    fn exec_drops_all_sites_without_touching_stub() {
        let mut mgr = BreakpointManager::new();
        let mut inst = FakeInstaller::new();
        let id = mgr.create(Filter::default(), Resolver::Address(0x1000), BreakpointOptions::default(), false);
        mgr.on_module_added("main", &|_| vec![0x1000], &mut inst, true);
        assert_eq!(mgr.site_count(), 1);
        mgr.on_exec();
        assert_eq!(mgr.site_count(), 0);
        assert!(inst.removed_software.is_empty());
        assert!(mgr.get(id).unwrap().locations.is_empty());
    }

    #[test]
    fn internal_and_user_breakpoints_are_listed_separately() {
        let mut mgr = BreakpointManager::new();
        let user_id = mgr.create(Filter::default(), Resolver::Address(1), BreakpointOptions::default(), false);
        let internal_id = mgr.create(Filter::default(), Resolver::Address(2), BreakpointOptions::default(), true);
        assert!(!user_id.is_internal());
        assert!(internal_id.is_internal());
        assert_eq!(mgr.user_breakpoints().count(), 1);
        assert_eq!(mgr.internal_breakpoints().count(), 1);
    }
}
