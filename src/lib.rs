//! `rpdbg-core`: a remote-process debugger control core speaking the
//! GDB-remote wire protocol. Wires together the packet codec, transport,
//! remote client, event bus, register info, thread registry, breakpoint
//! and module management, and the target orchestrator that ties them into
//! the public launch/attach/resume/halt/detach/destroy surface.

pub mod async_event_thread;
pub mod breakpoint;
pub mod error;
pub mod event_bus;
#[macro_use]
pub mod handle;
#[macro_use]
pub mod logging;
pub mod module;
pub mod packet;
pub mod process;
pub mod register_info;
pub mod remote_client;
pub mod settings;
pub mod stop_reply;
pub mod target;
pub mod thread_registry;
pub mod transport;
pub mod watchpoint;

pub use error::{CoreError, CoreResult, OperationOutcome};
pub use settings::TargetSettings;
pub use target::{PreDestroyRecovery, StopNotification, Target, TargetOrchestrator};
