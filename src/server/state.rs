//! Server application state shared across handlers

use crate::shutdown::ShutdownState;
use crate::supervisor::ProcessSupervisor;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerAppState {
    /// Authentication token for this session
    pub auth_token: String,

    /// The supervised child process and its observers
    pub supervisor: Arc<ProcessSupervisor>,

    /// Shutdown state
    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    pub fn new(
        auth_token: String,
        supervisor: Arc<ProcessSupervisor>,
        shutdown_state: ShutdownState,
    ) -> Self {
        Self {
            auth_token,
            supervisor,
            shutdown_state,
        }
    }
}
