//! Immutable configuration snapshot (spec §5, §9 "global mutable
//! singletons"). Built once from CLI flags or defaults; read-only for the
//! rest of the pipeline's life, cloned cheaply and shared by reference.

/// Default Reader buffer size (spec §4.1: "default 128 MiB").
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024 * 1024;

/// Chunk queue capacity (spec §4.6).
pub const DEFAULT_CHUNK_QUEUE_CAPACITY: usize = 16;

/// Op queue capacity (spec §4.6).
pub const DEFAULT_OP_QUEUE_CAPACITY: usize = 50_000;

/// Spec floor on worker count (§4.2: "spec floor is 2").
pub const MIN_WORKERS: usize = 2;

/// Implementation-defined ceiling on worker count, to bound memory used by
/// per-worker slots on very wide machines.
pub const MAX_WORKERS: usize = 64;

/// Cap on a single line's length considered by the extractor (§6: "the
/// implementation may choose a reasonable maximum"). The full line is still
/// emitted verbatim in its chunk; only address extraction within it is
/// bounded by this cap (SPEC_FULL.md §11).
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Default interval, in seconds, for the throughput reporter (§5).
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Reader buffer size in bytes.
    pub chunk_size: usize,
    /// Number of worker threads. Forced to 1 when `serial` is set.
    pub worker_count: usize,
    /// Quote-awareness toggle for the field scanner (§4.5 step 1, §6).
    pub greedy: bool,
    /// Emitter writes `<source>.lpi` per input file next to the source.
    pub write_auto: bool,
    /// Force worker count to 1 and disable parallel dispatch (§6 `serial`).
    pub serial: bool,
    /// Verbosity of the observability sink; no semantic effect (§6).
    pub debug_level: u8,
    pub chunk_queue_capacity: usize,
    pub op_queue_capacity: usize,
    pub report_interval_secs: u64,
}

impl Config {
    /// Worker count actually used once `serial` is honored.
    pub fn effective_worker_count(&self) -> usize {
        if self.serial {
            1
        } else {
            self.worker_count
        }
    }
}

/// Builder mirroring the rest of the crate's builder pattern; the CLI (or a
/// library caller) fills in only what it cares about and takes the default
/// otherwise.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    chunk_size: usize,
    worker_count: usize,
    greedy: bool,
    write_auto: bool,
    serial: bool,
    debug_level: u8,
    chunk_queue_capacity: usize,
    op_queue_capacity: usize,
    report_interval_secs: u64,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_count: default_worker_count(),
            greedy: false,
            write_auto: false,
            serial: false,
            debug_level: 0,
            chunk_queue_capacity: DEFAULT_CHUNK_QUEUE_CAPACITY,
            op_queue_capacity: DEFAULT_OP_QUEUE_CAPACITY,
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.clamp(MIN_WORKERS, MAX_WORKERS);
        self
    }

    pub fn greedy(mut self, greedy: bool) -> Self {
        self.greedy = greedy;
        self
    }

    pub fn write_auto(mut self, write_auto: bool) -> Self {
        self.write_auto = write_auto;
        self
    }

    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    pub fn debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    pub fn chunk_queue_capacity(mut self, capacity: usize) -> Self {
        self.chunk_queue_capacity = capacity;
        self
    }

    pub fn op_queue_capacity(mut self, capacity: usize) -> Self {
        self.op_queue_capacity = capacity;
        self
    }

    pub fn report_interval_secs(mut self, secs: u64) -> Self {
        self.report_interval_secs = secs;
        self
    }

    pub fn build(self) -> Config {
        Config {
            chunk_size: self.chunk_size,
            worker_count: self.worker_count,
            greedy: self.greedy,
            write_auto: self.write_auto,
            serial: self.serial,
            debug_level: self.debug_level,
            chunk_queue_capacity: self.chunk_queue_capacity,
            op_queue_capacity: self.op_queue_capacity,
            report_interval_secs: self.report_interval_secs,
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive a worker count from available hardware parallelism, floored at
/// [`MIN_WORKERS`] and capped at [`MAX_WORKERS`] (§4.2).
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_WORKERS)
        .clamp(MIN_WORKERS, MAX_WORKERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_floors() {
        let cfg = ConfigBuilder::new().build();
        assert!(cfg.worker_count >= MIN_WORKERS);
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn serial_forces_single_worker_regardless_of_worker_count() {
        let cfg = ConfigBuilder::new().worker_count(16).serial(true).build();
        assert_eq!(cfg.effective_worker_count(), 1);
    }

    #[test]
    fn worker_count_is_clamped_to_floor() {
        let cfg = ConfigBuilder::new().worker_count(0).build();
        assert_eq!(cfg.worker_count, MIN_WORKERS);
    }
}
