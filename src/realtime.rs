//! Real-time scheduling helpers for the packet-rate ingest thread.
//!
//! Applied best-effort to the VBAN receive loop so packet bursts aren't
//! starved by the default scheduler. Failure to apply any of these is
//! logged and otherwise harmless — the receiver still runs, just without
//! the latency guarantee.

/// Applies SCHED_FIFO scheduling, memory locking, and CPU affinity to
/// the calling thread. Call this first thing on a thread before it
/// enters its hot loop.
pub fn apply_realtime_optimizations() {
    apply_realtime_scheduling();
    apply_memory_locking();
    apply_cpu_affinity();
}

fn apply_realtime_scheduling() {
    unsafe {
        let param = libc::sched_param { sched_priority: 80 };
        let result = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
        if result == 0 {
            tracing::info!("real-time SCHED_FIFO priority 80 enabled for ingest thread");
        } else {
            tracing::warn!(
                "could not set real-time priority (need CAP_SYS_NICE); \
                run: sudo setcap 'cap_sys_nice,cap_ipc_lock+ep' /usr/local/bin/sentinel-audio"
            );
        }
    }
}

fn apply_memory_locking() {
    unsafe {
        let result = libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE);
        if result == 0 {
            tracing::info!("memory locked (mlockall) for ingest thread");
        } else {
            tracing::warn!("could not lock memory (need CAP_IPC_LOCK)");
        }
    }
}

fn apply_cpu_affinity() {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(0, &mut cpuset);
        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset);
        if result == 0 {
            tracing::info!("CPU affinity set to core 0 for ingest thread");
        } else {
            tracing::debug!("could not set CPU affinity (non-critical)");
        }
    }
}
