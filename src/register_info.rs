//! Dynamic Register Info (C5): assembled from protocol probes and/or a
//! target-description document, augmented from an architecture ABI table,
//! with a hardcoded ARM/Thumb fallback. Generalized from `rd`'s
//! `registers.rs`, which hardcodes a single x86/x64 `user_regs_struct`
//! union — here the register set itself is data, discovered at connect
//! time rather than known at compile time, per distilled spec §4.5.

use std::collections::HashMap;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Encoding {
    Uint,
    Sint,
    IeeeSingle,
    IeeeDouble,
    Vector,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Format {
    Hex,
    Decimal,
    Binary,
    VectorUint8,
}

#[derive(Clone, Debug, Default)]
pub struct NumberingKinds {
    pub eh_frame: Option<u32>,
    pub dwarf: Option<u32>,
    pub generic: Option<String>,
    pub process_plugin: Option<u32>,
    pub native: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct RegisterDescriptor {
    pub name: String,
    pub alt_name: Option<String>,
    pub byte_size: usize,
    pub byte_offset: usize,
    pub encoding: Encoding,
    pub format: Format,
    pub numbering: NumberingKinds,
    /// Wider register(s) this one is a view into.
    pub value_regs: Vec<String>,
    /// Registers whose cached value this one's write invalidates.
    pub invalidate_regs: Vec<String>,
    pub set_name: String,
}

#[derive(Clone, Debug, Default)]
pub struct RegisterSet {
    pub name: String,
    pub registers: Vec<usize>, // indices into RegisterInfo::registers
}

#[derive(Clone, Debug, Default)]
pub struct RegisterInfo {
    pub registers: Vec<RegisterDescriptor>,
    pub sets: Vec<RegisterSet>,
    by_name: HashMap<String, usize>,
    finalized: bool,
}

/// Input for strategy 2: a parsed target-description document
/// (`qXfer:features:read:target.xml`). Kept as already-parsed data since
/// XML parsing itself is a symbol/ABI-plugin concern out of this core's
/// scope — callers hand in the feature list once they've run it through
/// whatever XML reader they use.
#[derive(Clone, Debug)]
pub struct TargetXmlFeature {
    pub registers: Vec<RegisterDescriptor>,
}

/// Input for strategy 3: one `qRegisterInfo<n>` reply, already parsed into
/// key/value pairs.
pub type RegisterInfoProbeReply = HashMap<String, String>;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Thumb,
    Arm64,
    Mips,
    Other,
}

pub struct AbiTable {
    /// name -> (eh_frame, dwarf, generic) numbering to fill gaps with.
    pub entries: HashMap<String, (Option<u32>, Option<u32>, Option<String>)>,
}

impl RegisterInfo {
    pub fn new() -> Self {
        RegisterInfo::default()
    }

    /// Strategy 2: assemble straight from a parsed target-description.
    pub fn from_target_xml(feature: TargetXmlFeature) -> Self {
        let mut info = RegisterInfo::new();
        for reg in feature.registers {
            info.push(reg);
        }
        info
    }

    /// Strategy 3: iterate `qRegisterInfo0`, `qRegisterInfo1`, ... until
    /// the first unsupported reply, building a descriptor from each.
    pub fn from_probe_replies(replies: Vec<RegisterInfoProbeReply>) -> Self {
        let mut info = RegisterInfo::new();
        for (idx, kv) in replies.into_iter().enumerate() {
            if let Some(desc) = Self::descriptor_from_probe(idx, &kv) {
                info.push(desc);
            }
        }
        info
    }

    fn descriptor_from_probe(idx: usize, kv: &RegisterInfoProbeReply) -> Option<RegisterDescriptor> {
        let name = kv.get("name")?.clone();
        let byte_size = kv.get("bitsize").and_then(|s| s.parse::<usize>().ok()).unwrap_or(64) / 8;
        let byte_offset = kv
            .get("offset")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(idx * byte_size);
        let encoding = match kv.get("encoding").map(|s| s.as_str()) {
            Some("uint") => Encoding::Uint,
            Some("sint") => Encoding::Sint,
            Some("ieee754") => Encoding::IeeeSingle,
            Some("vector") => Encoding::Vector,
            _ => Encoding::Uint,
        };
        let format = match kv.get("format").map(|s| s.as_str()) {
            Some("hex") => Format::Hex,
            Some("decimal") => Format::Decimal,
            Some("binary") => Format::Binary,
            Some("vector-uint8") => Format::VectorUint8,
            _ => Format::Hex,
        };
        let set_name = kv.get("set").cloned().unwrap_or_else(|| "general".into());
        let value_regs = kv
            .get("value-regs")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_default();
        let invalidate_regs = kv
            .get("invalidate-regs")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_default();
        let alt_name = kv.get("alt-name").cloned();
        Some(RegisterDescriptor {
            name,
            alt_name,
            byte_size,
            byte_offset,
            encoding,
            format,
            numbering: NumberingKinds {
                eh_frame: kv.get("ehframe").and_then(|s| s.parse().ok()),
                dwarf: kv.get("dwarf").and_then(|s| s.parse().ok()),
                generic: kv.get("generic").cloned(),
                process_plugin: None,
                native: None,
            },
            value_regs,
            invalidate_regs,
            set_name,
        })
    }

    fn push(&mut self, desc: RegisterDescriptor) {
        self.by_name.insert(desc.name.clone(), self.registers.len());
        self.registers.push(desc);
    }

    /// Fills missing eh-frame / DWARF / generic numbers from the
    /// architecture's ABI table. Run after the primary strategy, before
    /// `finalize()`.
    pub fn augment_from_abi(&mut self, abi: &AbiTable) {
        for reg in &mut self.registers {
            if let Some((eh, dwarf, generic)) = abi.entries.get(&reg.name) {
                if reg.numbering.eh_frame.is_none() {
                    reg.numbering.eh_frame = *eh;
                }
                if reg.numbering.dwarf.is_none() {
                    reg.numbering.dwarf = *dwarf;
                }
                if reg.numbering.generic.is_none() {
                    reg.numbering.generic = generic.clone();
                }
            }
        }
    }

    /// If no registers were discovered and the architecture is ARM/Thumb,
    /// install a hardcoded fallback set (r0-r15, cpsr), per §4.5.
    pub fn install_arm_thumb_fallback_if_empty(&mut self, arch: Arch) {
        if !self.registers.is_empty() {
            return;
        }
        if !matches!(arch, Arch::Arm | Arch::Thumb) {
            return;
        }
        for i in 0..16 {
            let name = match i {
                13 => "sp".to_string(),
                14 => "lr".to_string(),
                15 => "pc".to_string(),
                n => format!("r{}", n),
            };
            self.push(RegisterDescriptor {
                name,
                alt_name: None,
                byte_size: 4,
                byte_offset: i * 4,
                encoding: Encoding::Uint,
                format: Format::Hex,
                numbering: NumberingKinds {
                    eh_frame: Some(i as u32),
                    dwarf: Some(i as u32),
                    generic: if i == 13 {
                        Some("sp".into())
                    } else if i == 15 {
                        Some("pc".into())
                    } else {
                        None
                    },
                    process_plugin: None,
                    native: None,
                },
                value_regs: Vec::new(),
                invalidate_regs: Vec::new(),
                set_name: "general".into(),
            });
        }
        self.push(RegisterDescriptor {
            name: "cpsr".into(),
            alt_name: None,
            byte_size: 4,
            byte_offset: 16 * 4,
            encoding: Encoding::Uint,
            format: Format::Hex,
            numbering: NumberingKinds {
                eh_frame: None,
                dwarf: Some(16),
                generic: Some("flags".into()),
                process_plugin: None,
                native: None,
            },
            value_regs: Vec::new(),
            invalidate_regs: Vec::new(),
            set_name: "general".into(),
        });
    }

    /// Sorts registers into named sets and freezes the table: after this,
    /// `by_name` lookups are stable for the process lifetime.
    pub fn finalize(&mut self) {
        let mut sets: HashMap<String, RegisterSet> = HashMap::new();
        for (idx, reg) in self.registers.iter().enumerate() {
            sets.entry(reg.set_name.clone())
                .or_insert_with(|| RegisterSet {
                    name: reg.set_name.clone(),
                    registers: Vec::new(),
                })
                .registers
                .push(idx);
        }
        let mut names: Vec<_> = sets.keys().cloned().collect();
        names.sort();
        self.sets = names.into_iter().map(|n| sets.remove(&n).unwrap()).collect();
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.by_name.get(name).map(|&i| &self.registers[i])
    }

    pub fn by_generic(&self, generic: &str) -> Option<&RegisterDescriptor> {
        self.registers
            .iter()
            .find(|r| r.numbering.generic.as_deref() == Some(generic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(name: &str, bitsize: &str, extra: &[(&str, &str)]) -> RegisterInfoProbeReply {
        let mut m = HashMap::new();
        m.insert("name".into(), name.into());
        m.insert("bitsize".into(), bitsize.into());
        for (k, v) in extra {
            m.insert((*k).into(), (*v).into());
        }
        m
    }

    #[test]
    fn probe_strategy_builds_descriptors() {
        let replies = vec![
            probe("rax", "64", &[("dwarf", "0"), ("generic", "arg1")]),
            probe("rip", "64", &[("dwarf", "16"), ("generic", "pc")]),
        ];
        let mut info = RegisterInfo::from_probe_replies(replies);
        info.finalize();
        assert!(info.is_finalized());
        assert_eq!(info.by_name("rax").unwrap().byte_size, 8);
        assert_eq!(info.by_generic("pc").unwrap().name, "rip");
    }

    #[test]
    fn abi_augmentation_fills_gaps_only() {
        let mut info = RegisterInfo::from_probe_replies(vec![probe("rbx", "64", &[])]);
        let mut abi = AbiTable {
            entries: HashMap::new(),
        };
        abi.entries.insert("rbx".into(), (Some(3), Some(3), Some("arg2".into())));
        info.augment_from_abi(&abi);
        assert_eq!(info.by_name("rbx").unwrap().numbering.dwarf, Some(3));
        assert_eq!(info.by_name("rbx").unwrap().numbering.generic, Some("arg2".into()));
    }

    #[test]
    fn arm_thumb_fallback_only_installs_when_empty_and_arm() {
        let mut info = RegisterInfo::new();
        info.install_arm_thumb_fallback_if_empty(Arch::X86_64);
        assert!(info.registers.is_empty());
        info.install_arm_thumb_fallback_if_empty(Arch::Thumb);
        assert_eq!(info.registers.len(), 17);
        assert!(info.by_name("pc").is_some());
        assert!(info.by_name("sp").is_some());
    }

    #[test]
    fn fallback_is_skipped_if_registers_already_present() {
        let mut info = RegisterInfo::from_probe_replies(vec![probe("r0", "32", &[])]);
        info.install_arm_thumb_fallback_if_empty(Arch::Arm);
        assert_eq!(info.registers.len(), 1);
    }
}
