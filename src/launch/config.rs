//! Configuration for contraction-tree compilation.

/// Compile-time configuration of a contraction tree.
///
/// The thread count is an explicit value threaded through compilation
/// rather than a process-wide setting; it sizes the per-thread packing
/// scratch and bounds the fork-join fan-out.
#[derive(Debug, Clone)]
pub struct ContractionConfig {
    /// Worker threads assumed at evaluation time.
    pub num_threads: usize,
    /// Target M extent of a single primitive call.
    pub target_m: usize,
    /// Target N extent of a single primitive call.
    pub target_n: usize,
    /// Target K extent of a single primitive call.
    pub target_k: usize,
}

impl Default for ContractionConfig {
    fn default() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            target_m: 64,
            target_n: 64,
            target_k: 512,
        }
    }
}

impl ContractionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the assumed worker-thread count.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Sets the primitive-size targets that bound loop absorption.
    pub fn with_kernel_targets(mut self, m: usize, n: usize, k: usize) -> Self {
        self.target_m = m.max(1);
        self.target_n = n.max(1);
        self.target_k = k.max(1);
        self
    }
}
