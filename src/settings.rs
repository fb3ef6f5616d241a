//! Target settings, per distilled spec §6. Explicit store, injected into
//! the Target Orchestrator at creation — the direct replacement for `rd`'s
//! `flags.rs` global `lazy_static` `Flags`, which design notes §9 flags as
//! a pattern to re-architect. `TargetSettings::default()` is the "read-only
//! initial snapshot"; nothing here is global.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum InlineBreakpointStrategy {
    Never,
    Headers,
    Always,
}

#[derive(Clone, Debug)]
pub struct SourceMapEntry {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Clone, Debug)]
pub struct TargetSettings {
    pub default_arch: Option<String>,
    pub move_to_nearest_code: bool,
    pub language: Option<String>,
    pub inline_breakpoint_strategy: InlineBreakpointStrategy,
    pub skip_prologue: bool,
    pub breakpoints_use_platform_avoid_list: bool,
    pub max_memory_read_size: usize,
    pub non_stop_mode: bool,
    pub trap_handler_names: Vec<String>,
    pub source_map: Vec<SourceMapEntry>,
    pub exec_search_paths: Vec<PathBuf>,
    pub debug_file_search_paths: Vec<PathBuf>,
    pub clang_module_search_paths: Vec<PathBuf>,
    pub packet_timeout: Duration,
    pub target_definition_file: Option<PathBuf>,
}

/// `min(stub_max_payload, 128 KiB)` when advertised, else this.
pub const DEFAULT_CONSERVATIVE_MAX_MEMORY_READ: usize = 512;
pub const MAX_MEMORY_READ_CEILING: usize = 128 * 1024;

impl Default for TargetSettings {
    fn default() -> Self {
        TargetSettings {
            default_arch: None,
            move_to_nearest_code: true,
            language: None,
            inline_breakpoint_strategy: InlineBreakpointStrategy::Always,
            skip_prologue: true,
            breakpoints_use_platform_avoid_list: true,
            max_memory_read_size: MAX_MEMORY_READ_CEILING,
            non_stop_mode: false,
            trap_handler_names: Vec::new(),
            source_map: Vec::new(),
            exec_search_paths: Vec::new(),
            debug_file_search_paths: Vec::new(),
            clang_module_search_paths: Vec::new(),
            packet_timeout: Duration::from_secs(5),
            target_definition_file: None,
        }
    }
}

impl TargetSettings {
    /// §8 "Memory read size" law: `min(stub_max_payload, 128 KiB)` when the
    /// stub advertises a ceiling, else `DEFAULT_CONSERVATIVE_MAX_MEMORY_READ`.
    pub fn effective_max_memory_read(&self, stub_max_payload: Option<usize>) -> usize {
        let derived = match stub_max_payload {
            Some(n) => n.min(MAX_MEMORY_READ_CEILING),
            None => DEFAULT_CONSERVATIVE_MAX_MEMORY_READ,
        };
        derived.min(self.max_memory_read_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_matches_conservative_default() {
        let s = TargetSettings::default();
        assert_eq!(s.effective_max_memory_read(None), DEFAULT_CONSERVATIVE_MAX_MEMORY_READ);
    }

    #[test]
    fn stub_ceiling_is_capped_at_128kib() {
        let s = TargetSettings::default();
        assert_eq!(s.effective_max_memory_read(Some(1024 * 1024)), MAX_MEMORY_READ_CEILING);
        assert_eq!(s.effective_max_memory_read(Some(256)), 256);
    }
}
