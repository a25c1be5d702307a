// SPDX-License-Identifier: Apache-2.0

//! Options for the compilation controller.

use serde::{Deserialize, Serialize};

/// Queueing and thread-management knobs of the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ControllerOptions {
    /// Maximum number of compilation worker threads.
    pub max_compilation_threads: usize,
    /// Queued invalidation requests past which further invalidation
    /// recompilations are downgraded to cold.
    pub num_queued_inv_req_to_downgrade_opt_level: usize,
    /// Entries in the compilation tracing ring buffer. Zero disables
    /// tracing.
    pub tracing_buffer_size: usize,
    /// Allow application threads to yield to compilation threads under
    /// queue pressure.
    pub enable_app_thread_yield: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        ControllerOptions {
            max_compilation_threads: 7,
            num_queued_inv_req_to_downgrade_opt_level: 20,
            tracing_buffer_size: 0,
            enable_app_thread_yield: false,
        }
    }
}
