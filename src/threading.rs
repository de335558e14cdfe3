//! CPU affinity helper for worker threads.

/// Attempt to pin the current thread to a specific core when supported.
///
/// Restricts the calling thread to `core_id`, which keeps a worker's snapshot in the same
/// cache between jobs.
///
/// # Platform Support
/// - **Linux**: Uses `pthread_setaffinity_np`
/// - **Other platforms**: No-op
///
/// # Note
/// Pinning may require capabilities; failures are logged and otherwise ignored.
pub fn set_thread_core(core_id: usize) {
    #[cfg(target_os = "linux")]
    {
        use libc::{cpu_set_t, pthread_self, pthread_setaffinity_np, CPU_SET, CPU_SETSIZE, CPU_ZERO};

        if core_id >= CPU_SETSIZE as usize {
            tracing::warn!(core_id, "core id beyond CPU_SETSIZE, not pinning");
            return;
        }
        // SAFETY: `set` is a plain bitmask initialised by CPU_ZERO before use, and the size
        // passed matches its type.
        let rc = unsafe {
            let mut set: cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut set);
            CPU_SET(core_id, &mut set);
            pthread_setaffinity_np(pthread_self(), std::mem::size_of::<cpu_set_t>(), &set)
        };
        if rc != 0 {
            tracing::warn!(core_id, rc, "failed to pin thread to core");
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = core_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinning_to_core_zero_does_not_panic() {
        std::thread::spawn(|| set_thread_core(0)).join().unwrap();
    }

    #[test]
    fn out_of_range_core_is_ignored() {
        std::thread::spawn(|| set_thread_core(usize::MAX)).join().unwrap();
    }
}
