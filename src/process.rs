//! Process entity (§3): the state machine side of a `Target`'s connection
//! to a remote stub. Owns thread/module/breakpoint bookkeeping only
//! insofar as tracking *which* stop_id and pid they belong to — the
//! registries themselves live on `Target`.
//!
//! Grounded on the `eStateType` state machine in LLDB's process model
//! (`examples/original_source/include/lldb/Target/Process.h`) and the
//! `Rc<RefCell<_>>` shared-entity convention in
//! `examples/isgasho-rd/src/thread_group.rs`.

use crate::error::StateError;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ProcessState {
    Invalid,
    Unloaded,
    Connected,
    Attaching,
    Launching,
    Stopped,
    Running,
    Stepping,
    Crashed,
    Detached,
    Exited,
    Suspended,
}

impl ProcessState {
    pub fn is_alive(self) -> bool {
        !matches!(
            self,
            ProcessState::Invalid
                | ProcessState::Unloaded
                | ProcessState::Exited
                | ProcessState::Detached
        )
    }

    pub fn is_running(self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::Stepping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Invalid => "invalid",
            ProcessState::Unloaded => "unloaded",
            ProcessState::Connected => "connected",
            ProcessState::Attaching => "attaching",
            ProcessState::Launching => "launching",
            ProcessState::Stopped => "stopped",
            ProcessState::Running => "running",
            ProcessState::Stepping => "stepping",
            ProcessState::Crashed => "crashed",
            ProcessState::Detached => "detached",
            ProcessState::Exited => "exited",
            ProcessState::Suspended => "suspended",
        }
    }
}

/// Edges allowed out of each state; anything not listed here is rejected
/// by `Process::transition_to` with `StateError::WrongProcessState`.
fn allowed_transitions(from: ProcessState) -> &'static [ProcessState] {
    use ProcessState::*;
    match from {
        Invalid => &[Unloaded],
        Unloaded => &[Attaching, Launching, Connected],
        Attaching => &[Stopped, Exited, Invalid],
        Launching => &[Stopped, Exited, Invalid],
        Connected => &[Stopped, Running, Exited, Crashed],
        Stopped => &[Running, Stepping, Detached, Exited, Suspended, Crashed],
        Running => &[Stopped, Crashed, Exited, Detached],
        Stepping => &[Stopped, Running, Crashed, Exited],
        Crashed => &[Detached, Exited, Stopped],
        Suspended => &[Stopped, Exited, Detached],
        Detached => &[],
        Exited => &[Unloaded],
    }
}

pub struct Process {
    pub pid: Option<u32>,
    state: ProcessState,
    pub exit_status: Option<u8>,
    pub exit_description: Option<String>,
    /// Bumped on every stop-reply; see `module.rs`'s `begin_stop`.
    pub stop_id: u64,
}

impl Process {
    pub fn new() -> Self {
        Process {
            pid: None,
            state: ProcessState::Unloaded,
            exit_status: None,
            exit_description: None,
            stop_id: 0,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn transition_to(&mut self, next: ProcessState) -> Result<(), StateError> {
        if allowed_transitions(self.state).contains(&next) {
            self.state = next;
            Ok(())
        } else {
            Err(StateError::WrongProcessState {
                expected: allowed_transitions(self.state)
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
                actual: self.state.as_str().to_string(),
            })
        }
    }

    pub fn require_alive(&self) -> Result<(), StateError> {
        if self.state.is_alive() {
            Ok(())
        } else {
            Err(StateError::WrongProcessState {
                expected: vec!["any alive state".to_string()],
                actual: self.state.as_str().to_string(),
            })
        }
    }

    pub fn on_stop_reply(&mut self) {
        self.stop_id += 1;
    }

    pub fn on_exec(&mut self) {
        self.stop_id += 1;
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_then_stop_then_run_is_legal() {
        let mut p = Process::new();
        p.transition_to(ProcessState::Launching).unwrap();
        p.transition_to(ProcessState::Stopped).unwrap();
        p.transition_to(ProcessState::Running).unwrap();
        assert!(p.state().is_running());
    }

    #[test]
    fn cannot_run_directly_from_unloaded() {
        let mut p = Process::new();
        assert!(p.transition_to(ProcessState::Running).is_err());
    }

    #[test]
    fn detached_is_terminal() {
        let mut p = Process::new();
        p.transition_to(ProcessState::Connected).unwrap();
        p.transition_to(ProcessState::Stopped).unwrap();
        p.transition_to(ProcessState::Detached).unwrap();
        assert!(p.transition_to(ProcessState::Running).is_err());
        assert!(!p.state().is_alive());
    }

    #[test]
    fn connected_can_crash_before_any_stop_reply() {
        let mut p = Process::new();
        p.transition_to(ProcessState::Connected).unwrap();
        p.transition_to(ProcessState::Crashed).unwrap();
        assert!(p.state().is_alive());
    }

    #[test]
    fn stop_id_advances_on_stop_and_exec() {
        let mut p = Process::new();
        assert_eq!(p.stop_id, 0);
        p.on_stop_reply();
        p.on_exec();
        assert_eq!(p.stop_id, 2);
    }
}
