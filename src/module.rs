//! Module List & Section Load History (C8): which modules are mapped into
//! the inferior's address space, and at which load address each section
//! sat at each stop, so a caller can ask "where was this address at stop
//! N" after the live mapping has since changed.
//!
//! Grounded on `LoadModules`/`GetLoadedDynamicLibrariesInfos`/
//! `LoadModuleAtAddress` in
//! `examples/original_source/source/Plugins/Process/gdb-remote/ProcessGDBRemote.cpp`.

use crate::handle::{HandleTable, ModuleId};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct Section {
    pub name: String,
    pub file_address: u64,
    pub size: u64,
}

#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub path: Option<String>,
    pub uuid: Option<String>,
    pub sections: Vec<Section>,
    /// `None` until a `set_section_load` call places it; cleared again by
    /// `set_section_unloaded`/`unload_module_sections`.
    pub load_bias: Option<i64>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            path: None,
            uuid: None,
            sections: Vec::new(),
            load_bias: None,
        }
    }

    fn section(&self, section_name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == section_name)
    }
}

/// A frozen view of every module's section load addresses as of one stop,
/// keyed by the protocol's `stop_id` (a monotonically increasing counter
/// the async event thread bumps on each stop-reply).
#[derive(Clone, Debug, Default)]
struct Snapshot {
    load_bias: HashMap<ModuleId, i64>,
}

pub struct ModuleList {
    modules: HandleTable<ModuleId, Module>,
    history: Vec<(u64, Snapshot)>,
    current_stop_id: u64,
}

impl ModuleList {
    pub fn new() -> Self {
        ModuleList {
            modules: HandleTable::new(ModuleId),
            history: Vec::new(),
            current_stop_id: 0,
        }
    }

    pub fn add(&mut self, module: Module) -> ModuleId {
        self.modules.insert(module)
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules.iter().find(|(_, m)| m.name == name).map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter()
    }

    /// Advance to a new stop, snapshotting the current load-address state
    /// under the stop id it was observed at so `resolve_load_address_at`
    /// can answer queries about a past stop.
    pub fn begin_stop(&mut self, stop_id: u64) {
        let snapshot = Snapshot {
            load_bias: self
                .modules
                .iter()
                .filter_map(|(id, m)| m.load_bias.map(|b| (id, b)))
                .collect(),
        };
        self.history.push((stop_id, snapshot));
        self.current_stop_id = stop_id;
    }

    pub fn set_section_load(&mut self, module_id: ModuleId, load_bias: i64) {
        if let Some(m) = self.modules.get_mut(module_id) {
            m.load_bias = Some(load_bias);
        }
    }

    pub fn set_section_unloaded(&mut self, module_id: ModuleId) {
        if let Some(m) = self.modules.get_mut(module_id) {
            m.load_bias = None;
        }
    }

    /// Unmaps every section of a module, used when a module is removed
    /// from the inferior entirely (library unload, not just address
    /// relocation).
    pub fn unload_module_sections(&mut self, module_id: ModuleId) {
        self.set_section_unloaded(module_id);
    }

    /// Resolve a (module, section) pair against the *current* mapping.
    pub fn resolve_load_address(&self, module_id: ModuleId, section_name: &str) -> Option<u64> {
        let m = self.modules.get(module_id)?;
        let section = m.section(section_name)?;
        let bias = m.load_bias?;
        Some((section.file_address as i64 + bias) as u64)
    }

    /// Resolve against the mapping as it stood at a specific past stop id,
    /// falling back to the nearest snapshot at or before `stop_id`.
    pub fn resolve_load_address_at(
        &self,
        stop_id: u64,
        module_id: ModuleId,
        section_name: &str,
    ) -> Option<u64> {
        let snapshot = self
            .history
            .iter()
            .rev()
            .find(|(id, _)| *id <= stop_id)
            .map(|(_, s)| s)?;
        let m = self.modules.get(module_id)?;
        let section = m.section(section_name)?;
        let bias = *snapshot.load_bias.get(&module_id)?;
        Some((section.file_address as i64 + bias) as u64)
    }

    /// Ingests a `qXfer:libraries:read`/`qXfer:libraries-svr4:read` or
    /// `jGetLoadedDynamicLibrariesInfos` library list: one entry per
    /// currently-mapped shared object, replacing modules not present in
    /// the new list (full resync, not incremental diff) and returning the
    /// set of module names newly added so the caller can run breakpoint
    /// reconciliation against them.
    pub fn sync_from_library_list(&mut self, libs: &[LibraryInfo]) -> Vec<ModuleId> {
        let present: std::collections::HashSet<&str> = libs.iter().map(|l| l.name.as_str()).collect();
        let stale: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|(_, m)| !present.contains(m.name.as_str()))
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            self.modules.remove(id);
        }
        let mut added = Vec::new();
        for lib in libs {
            match self.find_by_name(&lib.name) {
                Some(id) => self.set_section_load(id, lib.load_bias),
                None => {
                    let mut m = Module::new(lib.name.clone());
                    m.path = lib.path.clone();
                    m.sections = lib.sections.clone();
                    m.load_bias = Some(lib.load_bias);
                    added.push(self.add(m));
                }
            }
        }
        added
    }
}

impl Default for ModuleList {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry of a parsed library list reply, independent of whether it
/// came from `qXfer:libraries-svr4` XML or `jGetLoadedDynamicLibrariesInfos`
/// JSON — both carry the same logical fields.
#[derive(Clone, Debug)]
pub struct LibraryInfo {
    pub name: String,
    pub path: Option<String>,
    pub load_bias: i64,
    pub sections: Vec<Section>,
}

/// Reads the `<library name="..." l_addr="0x...">` elements out of a
/// `qXfer:libraries-svr4:read` reply. Attribute-scan only, no general XML
/// parser: the wire format is attribute-flat and never nests a `library`
/// inside another, so a full tree parser buys nothing here.
pub fn parse_svr4_library_list(xml: &[u8]) -> Vec<LibraryInfo> {
    let text = String::from_utf8_lossy(xml);
    library_tag_bodies(&text)
        .filter_map(|attrs| {
            let name = xml_attribute(attrs, "name")?;
            let load_bias = xml_attribute(attrs, "l_addr")
                .and_then(|v| parse_hex_or_decimal(&v))
                .unwrap_or(0);
            Some(LibraryInfo {
                name,
                path: None,
                load_bias,
                sections: Vec::new(),
            })
        })
        .collect()
}

/// Finds each `<library ...>` tag's attribute text, rejecting matches where
/// `<library` is only a prefix of a longer tag name (`<library-list-svr4`,
/// whose own opening tag contains the literal substring `<library`).
fn library_tag_bodies(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices("<library").filter_map(move |(start, _)| {
        let after = start + "<library".len();
        match text[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '/' || c == '>' => {
                let end = text[after..].find('>').map(|i| after + i).unwrap_or(text.len());
                Some(&text[after..end])
            }
            _ => None,
        }
    })
}

fn xml_attribute(attrs: &str, key: &str) -> Option<String> {
    let needle = format!("{}=\"", key);
    let start = attrs.find(&needle)? + needle.len();
    let rest = &attrs[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn parse_hex_or_decimal(v: &str) -> Option<i64> {
    match v.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => v.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_with_text(name: &str, file_address: u64) -> Module {
        let mut m = Module::new(name);
        m.sections.push(Section {
            name: "__TEXT".into(),
            file_address,
            size: 0x1000,
        });
        m
    }

    #[test]
    fn resolve_uses_load_bias() {
        let mut ml = ModuleList::new();
        let id = ml.add(module_with_text("libfoo.so", 0x1000));
        ml.set_section_load(id, 0x5000_0000);
        assert_eq!(ml.resolve_load_address(id, "__TEXT"), Some(0x5000_1000));
    }

    #[test]
    fn unloaded_section_resolves_to_none() {
        let mut ml = ModuleList::new();
        let id = ml.add(module_with_text("libfoo.so", 0x1000));
        ml.set_section_load(id, 0x5000_0000);
        ml.set_section_unloaded(id);
        assert_eq!(ml.resolve_load_address(id, "__TEXT"), None);
    }

    #[test]
    fn historic_resolution_survives_later_relocation() {
        let mut ml = ModuleList::new();
        let id = ml.add(module_with_text("libfoo.so", 0x1000));
        ml.set_section_load(id, 0x1000_0000);
        ml.begin_stop(1);
        ml.set_section_load(id, 0x2000_0000);
        ml.begin_stop(2);

        assert_eq!(ml.resolve_load_address_at(1, id, "__TEXT"), Some(0x1000_1000));
        assert_eq!(ml.resolve_load_address_at(2, id, "__TEXT"), Some(0x2000_1000));
        assert_eq!(ml.resolve_load_address(id, "__TEXT"), Some(0x2000_1000));
    }

    #[test]
    fn sync_from_library_list_adds_and_drops() {
        let mut ml = ModuleList::new();
        let libs = vec![LibraryInfo {
            name: "libfoo.so".into(),
            path: Some("/lib/libfoo.so".into()),
            load_bias: 0x1000_0000,
            sections: vec![Section {
                name: "__TEXT".into(),
                file_address: 0,
                size: 0x1000,
            }],
        }];
        let added = ml.sync_from_library_list(&libs);
        assert_eq!(added.len(), 1);
        assert!(ml.find_by_name("libfoo.so").is_some());

        let added_again = ml.sync_from_library_list(&[]);
        assert!(added_again.is_empty());
        assert!(ml.find_by_name("libfoo.so").is_none());
    }

    #[test]
    fn parses_svr4_library_list_xml() {
        let xml = br#"<?xml version="1.0"?>
<library-list-svr4 version="1.0" main-lm="0x555555554000">
  <library name="/lib/libfoo.so" lm="0x7ffff7ffe000" l_addr="0x7ffff7a00000" l_ld="0x7ffff7bff000"/>
  <library name="/lib/libbar.so" lm="0x7ffff7ffd000" l_addr="0x7ffff7800000" l_ld="0x7ffff79ff000"/>
</library-list-svr4>"#;
        let libs = parse_svr4_library_list(xml);
        assert_eq!(libs.len(), 2);
        assert_eq!(libs[0].name, "/lib/libfoo.so");
        assert_eq!(libs[0].load_bias, 0x7ffff7a00000);
        assert_eq!(libs[1].name, "/lib/libbar.so");
    }
}
