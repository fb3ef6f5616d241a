//! Async Event Thread (C10): a dedicated OS thread that owns listening for
//! stub notifications while the inferior runs, decoupling "the target is
//! running" from "the caller is blocked" per §4.10.
//!
//! Grounded on the spawn/step/resume control-flow shape of
//! `examples/isgasho-rd/src/session/task/replay_task.rs`, generalized from
//! synchronous replay stepping to a thread driven by channel messages.

use crate::remote_client::RemoteClient;
use crate::stop_reply::{self, StopReplyEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AsyncState {
    Idle,
    Resuming,
    Running,
    Draining,
    Terminating,
}

/// Inputs the owning `TargetOrchestrator` (or its caller) feeds the thread.
/// Named after the LLDB `gdb-remote` async-thread inputs this generalizes:
/// `AsyncContinue` kicks the state machine into `Running`, `Interrupt` asks
/// it to request a stop, `ReadThreadDidExit`/`GdbReadThreadGotNotify`
/// correspond to the underlying I/O thread's own lifecycle events.
pub enum AsyncInput {
    AsyncContinue,
    Interrupt,
    AsyncThreadShouldExit,
    ReadThreadDidExit,
    GdbReadThreadGotNotify(Vec<u8>),
}

/// Output the thread reports back: a parsed stop event, or a transition
/// notice useful for tests/diagnostics.
pub enum AsyncOutput {
    Stop(StopReplyEvent),
    StateChanged(AsyncState),
    Error(String),
}

pub struct AsyncEventThread {
    input_tx: Sender<AsyncInput>,
    handle: Option<JoinHandle<()>>,
    state: Arc<std::sync::Mutex<AsyncState>>,
    terminated: Arc<AtomicBool>,
}

impl AsyncEventThread {
    /// Spawns the thread. `client` must outlive the thread (`'static`
    /// bound via `Arc`), since it polls `wait_for_notification` in a loop.
    pub fn spawn(client: Arc<RemoteClient>, poll_interval: Duration) -> (Self, Receiver<AsyncOutput>) {
        let (input_tx, input_rx) = mpsc::channel();
        let (output_tx, output_rx) = mpsc::channel();
        let state = Arc::new(std::sync::Mutex::new(AsyncState::Idle));
        let terminated = Arc::new(AtomicBool::new(false));

        let thread_state = state.clone();
        let thread_terminated = terminated.clone();
        let handle = std::thread::spawn(move || {
            run_loop(client, input_rx, output_tx, thread_state, thread_terminated, poll_interval);
        });

        (
            AsyncEventThread {
                input_tx,
                handle: Some(handle),
                state,
                terminated,
            },
            output_rx,
        )
    }

    pub fn state(&self) -> AsyncState {
        *self.state.lock().unwrap()
    }

    pub fn send(&self, input: AsyncInput) {
        let _ = self.input_tx.send(input);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Drop for AsyncEventThread {
    fn drop(&mut self) {
        let _ = self.input_tx.send(AsyncInput::AsyncThreadShouldExit);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn set_state(state: &Arc<std::sync::Mutex<AsyncState>>, output_tx: &Sender<AsyncOutput>, next: AsyncState) {
    *state.lock().unwrap() = next;
    let _ = output_tx.send(AsyncOutput::StateChanged(next));
}

fn run_loop(
    client: Arc<RemoteClient>,
    input_rx: Receiver<AsyncInput>,
    output_tx: Sender<AsyncOutput>,
    state: Arc<std::sync::Mutex<AsyncState>>,
    terminated: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    loop {
        match input_rx.recv_timeout(poll_interval) {
            Ok(AsyncInput::AsyncContinue) => {
                set_state(&state, &output_tx, AsyncState::Resuming);
                set_state(&state, &output_tx, AsyncState::Running);
            }
            Ok(AsyncInput::Interrupt) => {
                if *state.lock().unwrap() == AsyncState::Running {
                    set_state(&state, &output_tx, AsyncState::Draining);
                    match client.interrupt() {
                        Ok(_) => {}
                        Err(e) => {
                            let _ = output_tx.send(AsyncOutput::Error(e.to_string()));
                        }
                    }
                }
            }
            Ok(AsyncInput::ReadThreadDidExit) => {
                set_state(&state, &output_tx, AsyncState::Terminating);
                break;
            }
            Ok(AsyncInput::GdbReadThreadGotNotify(body)) => {
                handle_notification(&body, &state, &output_tx);
            }
            Ok(AsyncInput::AsyncThreadShouldExit) => {
                set_state(&state, &output_tx, AsyncState::Terminating);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if *state.lock().unwrap() == AsyncState::Running {
                    if let Some(body) = client.wait_for_notification(Duration::from_millis(1)) {
                        handle_notification(&body, &state, &output_tx);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    terminated.store(true, Ordering::SeqCst);
}

fn handle_notification(body: &[u8], state: &Arc<std::sync::Mutex<AsyncState>>, output_tx: &Sender<AsyncOutput>) {
    match stop_reply::parse(body) {
        Ok(event) => {
            if *state.lock().unwrap() == AsyncState::Running || *state.lock().unwrap() == AsyncState::Draining {
                set_state(state, output_tx, AsyncState::Idle);
            }
            let _ = output_tx.send(AsyncOutput::Stop(event));
        }
        Err(e) => {
            let _ = output_tx.send(AsyncOutput::Error(e.to_string()));
        }
    }
}
