//! Reader → Worker pool → Indexer → Emitter orchestration (spec §2, §4).
//!
//! Structured like the teacher's `processing::process_files_parallel`
//! (dedicated reader/worker threads feeding a work queue), but with
//! `crossbeam-channel` bounded queues in place of `std::sync::mpsc` and a
//! second queue (the "op queue") carrying new-key insertions to a single
//! Indexer thread, neither of which the teacher's single-queue match
//! pipeline needed.
//!
//! Queue closure follows SPEC_FULL.md §9's redesign note: rather than
//! hand-rolling a producer counter, we rely on `crossbeam-channel`'s native
//! behavior — a `Receiver::recv()` returns `Err` once every clone of the
//! paired `Sender` has been dropped and the queue is empty, which is
//! exactly the "producer count reaches zero and queue is empty" signal the
//! original design called for.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::slice::ParallelSliceMut;

use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::extractor::Extractor;
use crate::file_reader;
use crate::index::AddressIndex;
use crate::location::{merge_sorted, Location};

/// A fixed-size buffer of whole lines, annotated with its starting line
/// number (spec §4.1).
struct Chunk {
    buffer: Arc<[u8]>,
    start_line_number: u64,
}

/// A worker's locally-buffered new-key insertion, forwarded to the Indexer
/// in small batches (spec §4.2).
struct PendingInsert {
    key: Arc<str>,
    worker_id: usize,
    loc: Location,
}

/// Batch size for op-queue flushes (spec §4.2: "~5 records, sized to
/// minimize collision windows").
const PENDING_BATCH_SIZE: usize = 5;

/// Running counters shared across Reader/Workers/Indexer, read by the
/// throughput reporter (spec §5 "periodic timer... log throughput").
#[derive(Default)]
struct PipelineStats {
    lines_processed: AtomicU64,
    addresses_extracted: AtomicU64,
}

/// Outcome of one file's pass through the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RunStats {
    pub lines_processed: u64,
    pub addresses_extracted: u64,
    pub unique_addresses: usize,
}

/// Ties Reader, Worker pool, Indexer, and Emitter together for one source
/// file at a time. One `Pipeline` is built per run; `Config` is immutable
/// for its lifetime (spec §9 "global mutable singletons" resolution).
pub struct Pipeline {
    config: Config,
    extractor: Arc<Extractor>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let extractor = Arc::new(Extractor::builder().greedy(config.greedy).build());
        Pipeline { config, extractor }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the full pipeline against `path`, writing the sorted index to
    /// `output`. `quit` is polled at every queue boundary; setting it from
    /// another thread (e.g. a signal handler) triggers orderly shutdown.
    pub fn run_file(
        &self,
        path: &Path,
        output: &mut dyn Write,
        quit: Arc<AtomicBool>,
    ) -> Result<RunStats> {
        let worker_count = self.config.effective_worker_count();
        let index = Arc::new(AddressIndex::new(worker_count));
        let stats = Arc::new(PipelineStats::default());

        let (chunk_tx, chunk_rx) = bounded::<Chunk>(self.config.chunk_queue_capacity);
        let (op_tx, op_rx) = bounded::<Vec<PendingInsert>>(self.config.op_queue_capacity);

        let reporter_done = Arc::new(AtomicBool::new(false));
        let reporter = spawn_reporter(
            stats.clone(),
            self.config.report_interval_secs,
            reporter_done.clone(),
        );

        let reader_quit = quit.clone();
        let reader_path = path.to_path_buf();
        let chunk_size = self.config.chunk_size;
        let reader_handle = thread::spawn(move || read_chunks(&reader_path, chunk_size, chunk_tx, reader_quit));

        let mut worker_handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let chunk_rx = chunk_rx.clone();
            let op_tx = op_tx.clone();
            let index = index.clone();
            let extractor = self.extractor.clone();
            let stats = stats.clone();
            let quit = quit.clone();
            worker_handles.push(thread::spawn(move || {
                worker_loop(worker_id, chunk_rx, op_tx, index, extractor, stats, quit)
            }));
        }
        // The pipeline holds no sender of its own; dropping these originals
        // (the workers hold their own clones) lets the op queue close once
        // every worker has exited.
        drop(op_tx);
        drop(chunk_rx);

        let indexer_index = index.clone();
        let indexer_quit = quit.clone();
        let indexer_handle =
            thread::spawn(move || indexer_loop(op_rx, indexer_index, indexer_quit));

        let reader_result = reader_handle
            .join()
            .map_err(|_| IndexError::Other("reader thread panicked".into()))?;
        for handle in worker_handles {
            handle
                .join()
                .map_err(|_| IndexError::Other("worker thread panicked".into()))?;
        }
        let indexer_result = indexer_handle
            .join()
            .map_err(|_| IndexError::Other("indexer thread panicked".into()))?;

        reporter_done.store(true, Ordering::Relaxed);
        let _ = reporter.join();

        reader_result?;
        indexer_result?;

        let unique_addresses = index.len();
        emit(&index, output)?;

        Ok(RunStats {
            lines_processed: stats.lines_processed.load(Ordering::Relaxed),
            addresses_extracted: stats.addresses_extracted.load(Ordering::Relaxed),
            unique_addresses,
        })
    }
}

/// Read `path` sequentially in `chunk_size`-byte buffers, splitting on the
/// last newline in each read and carrying any trailing partial line forward
/// to the next read (spec §4.1).
fn read_chunks(
    path: &Path,
    chunk_size: usize,
    sender: Sender<Chunk>,
    quit: Arc<AtomicBool>,
) -> Result<()> {
    let mut reader = file_reader::open(path).map_err(IndexError::from)?;
    let mut carry: Vec<u8> = Vec::new();
    let mut line_no = 0u64;

    loop {
        if quit.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut buf = vec![0u8; chunk_size];
        let n = fill_buffer(&mut *reader, &mut buf).map_err(IndexError::from)?;
        buf.truncate(n);

        if n == 0 {
            if !carry.is_empty() {
                line_no += 1;
                let buffer: Arc<[u8]> = Arc::from(carry);
                let _ = sender.send(Chunk {
                    buffer,
                    start_line_number: line_no,
                });
            }
            return Ok(());
        }

        let mut data = std::mem::take(&mut carry);
        data.extend_from_slice(&buf);

        match memchr::memrchr(b'\n', &data) {
            Some(last_nl) => {
                let complete_len = last_nl + 1;
                carry = data[complete_len..].to_vec();
                let complete = data[..complete_len].to_vec();
                let lines_in_chunk = memchr::memchr_iter(b'\n', &complete).count() as u64;
                if lines_in_chunk > 0 {
                    let start_line_number = line_no + 1;
                    line_no += lines_in_chunk;
                    let buffer: Arc<[u8]> = Arc::from(complete);
                    if sender
                        .send(Chunk {
                            buffer,
                            start_line_number,
                        })
                        .is_err()
                    {
                        return Ok(()); // all workers gone; quit must be set
                    }
                }
            }
            None => {
                carry = data;
            }
        }
    }
}

/// Fill `buf` completely from `reader`, looping over short reads, stopping
/// early only at true EOF. Returns the number of bytes actually filled.
fn fill_buffer(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn worker_loop(
    worker_id: usize,
    chunk_rx: Receiver<Chunk>,
    op_tx: Sender<Vec<PendingInsert>>,
    index: Arc<AddressIndex>,
    extractor: Arc<Extractor>,
    stats: Arc<PipelineStats>,
    quit: Arc<AtomicBool>,
) {
    let mut pending: Vec<PendingInsert> = Vec::with_capacity(PENDING_BATCH_SIZE);

    while let Ok(chunk) = chunk_rx.recv() {
        if quit.load(Ordering::Relaxed) {
            break;
        }
        process_chunk(
            &chunk,
            worker_id,
            &index,
            &extractor,
            &op_tx,
            &mut pending,
            &stats,
            &quit,
        );
    }

    if !pending.is_empty() {
        let _ = op_tx.send(pending);
    }
}

fn process_chunk(
    chunk: &Chunk,
    worker_id: usize,
    index: &Arc<AddressIndex>,
    extractor: &Extractor,
    op_tx: &Sender<Vec<PendingInsert>>,
    pending: &mut Vec<PendingInsert>,
    stats: &PipelineStats,
    quit: &Arc<AtomicBool>,
) {
    let buf = &chunk.buffer[..];
    let mut start = 0usize;
    let mut line_idx = 0u64;

    for nl_pos in memchr::memchr_iter(b'\n', buf) {
        let line = &buf[start..nl_pos];
        handle_line(
            line,
            chunk.start_line_number + line_idx,
            worker_id,
            index,
            extractor,
            op_tx,
            pending,
            stats,
        );
        start = nl_pos + 1;
        line_idx += 1;
        if quit.load(Ordering::Relaxed) {
            return;
        }
    }

    // A trailing run with no terminator only happens in the Reader's final
    // EOF chunk (the unterminated last line, delivered verbatim per §4.1).
    if start < buf.len() {
        let line = &buf[start..];
        handle_line(
            line,
            chunk.start_line_number + line_idx,
            worker_id,
            index,
            extractor,
            op_tx,
            pending,
            stats,
        );
    }
}

fn handle_line(
    line: &[u8],
    line_number: u64,
    worker_id: usize,
    index: &Arc<AddressIndex>,
    extractor: &Extractor,
    op_tx: &Sender<Vec<PendingInsert>>,
    pending: &mut Vec<PendingInsert>,
    stats: &PipelineStats,
) {
    stats.lines_processed.fetch_add(1, Ordering::Relaxed);

    let bounded_line = if line.len() > crate::config::MAX_LINE_LEN {
        eprintln!(
            "[WARN] line {line_number} exceeds {} bytes; extraction bounded to the prefix",
            crate::config::MAX_LINE_LEN
        );
        &line[..crate::config::MAX_LINE_LEN]
    } else {
        line
    };

    for addr in extractor.extract_line(bounded_line) {
        let loc = Location::new(line_number, addr.field);
        stats.addresses_extracted.fetch_add(1, Ordering::Relaxed);

        match index.lookup(&addr.key) {
            Some(entry) => entry.record(worker_id, loc),
            None => {
                pending.push(PendingInsert {
                    key: addr.key,
                    worker_id,
                    loc,
                });
                if pending.len() >= PENDING_BATCH_SIZE {
                    let batch = std::mem::replace(pending, Vec::with_capacity(PENDING_BATCH_SIZE));
                    let _ = op_tx.send(batch);
                }
            }
        }
    }
}

fn indexer_loop(
    op_rx: Receiver<Vec<PendingInsert>>,
    index: Arc<AddressIndex>,
    quit: Arc<AtomicBool>,
) -> Result<()> {
    while let Ok(batch) = op_rx.recv() {
        for op in batch {
            if quit.load(Ordering::Relaxed) {
                return Ok(());
            }
            index.insert_unique(op.key, op.worker_id, op.loc)?;
            index.maybe_resize()?;
        }
    }
    Ok(())
}

/// Periodically logs throughput to stderr (spec §5). Stops once `done` is
/// set, which happens right after the Indexer joins.
fn spawn_reporter(
    stats: Arc<PipelineStats>,
    interval_secs: u64,
    done: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let interval = Duration::from_secs(interval_secs.max(1));
        let mut last_report = Instant::now();
        let mut last_lines = 0u64;
        loop {
            thread::sleep(Duration::from_millis(200));
            if done.load(Ordering::Relaxed) {
                return;
            }
            if last_report.elapsed() >= interval {
                let lines = stats.lines_processed.load(Ordering::Relaxed);
                let rate = lines.saturating_sub(last_lines);
                eprintln!("[INFO] processed {lines} lines ({rate} since last report)");
                last_lines = lines;
                last_report = Instant::now();
            }
        }
    })
}

/// Sort every entry (descending count, then ascending key) and write the
/// merged, ascending-`(line,field)` record for each (spec §4.4, §6).
fn emit(index: &AddressIndex, output: &mut dyn Write) -> Result<()> {
    let mut entries = index.snapshot_entries();
    entries.par_sort_unstable_by(|a, b| {
        b.total()
            .cmp(&a.total())
            .then_with(|| a.key.as_bytes().cmp(b.key.as_bytes()))
    });

    let to_output_err = |e: io::Error| IndexError::OutputFailed(e.to_string());

    let mut buffered = io::BufWriter::new(output);
    for entry in entries {
        let slots = entry.sorted_slots();
        let merged = merge_sorted(&slots);
        write!(buffered, "{},{}", entry.key, entry.total()).map_err(to_output_err)?;
        for loc in merged {
            write!(buffered, ",{}:{}", loc.line, loc.field).map_err(to_output_err)?;
        }
        writeln!(buffered).map_err(to_output_err)?;
    }
    buffered.flush().map_err(to_output_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use std::io::Cursor;
    use std::sync::atomic::AtomicBool;
    use tempfile::NamedTempFile;

    fn run(contents: &str, cfg: Config) -> String {
        let mut file = NamedTempFile::new().unwrap();
        file.as_file().write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();

        let pipeline = Pipeline::new(cfg);
        let mut out = Cursor::new(Vec::new());
        pipeline
            .run_file(file.path(), &mut out, Arc::new(AtomicBool::new(false)))
            .unwrap();
        String::from_utf8(out.into_inner()).unwrap()
    }

    #[test]
    fn scenario_single_ipv4() {
        let out = run("GET 10.0.0.1 /index\n", ConfigBuilder::new().build());
        assert_eq!(out, "10.0.0.1,1,1:2\n");
    }

    #[test]
    fn scenario_ipv4_and_mac_same_line() {
        let out = run(
            "client=192.168.1.5 mac=aa:bb:cc:dd:ee:ff ok\n",
            ConfigBuilder::new().build(),
        );
        assert_eq!(out, "192.168.1.5,1,1:1\naa:bb:cc:dd:ee:ff,1,1:2\n");
    }

    #[test]
    fn scenario_frequency_ordering() {
        let out = run(
            "10.0.0.1 x\n10.0.0.2 y\n10.0.0.1 z\n",
            ConfigBuilder::new().build(),
        );
        assert_eq!(out, "10.0.0.1,2,1:1,3:1\n10.0.0.2,1,2:1\n");
    }

    #[test]
    fn scenario_ipv6_canonicalization_dedup() {
        let out = run(
            "src=2001:0db8:0000:0000:0000:0000:0000:0001\nsrc=2001:db8::1\n",
            ConfigBuilder::new().build(),
        );
        assert_eq!(out, "2001:db8::1,2,1:1,2:1\n");
    }

    #[test]
    fn scenario_mac_mixed_separators_dedup() {
        let out = run(
            "aa:bb:cc:dd:ee:ff\naa-bb-cc-dd-ee-ff\n",
            ConfigBuilder::new().build(),
        );
        assert_eq!(out, "aa:bb:cc:dd:ee:ff,2,1:1,2:1\n");
    }

    #[test]
    fn serial_and_parallel_outputs_match() {
        let contents = "10.0.0.1 a\n10.0.0.2 b\n10.0.0.1 c\n10.0.0.3 d\naa:bb:cc:dd:ee:ff e\n";
        let serial = run(contents, ConfigBuilder::new().serial(true).build());
        let parallel = run(contents, ConfigBuilder::new().worker_count(4).build());
        assert_eq!(serial, parallel);
    }

    #[test]
    fn chunking_invariance_across_chunk_sizes() {
        let contents = "10.0.0.1 a\n10.0.0.2 b\n10.0.0.1 c\naa:bb:cc:dd:ee:ff d\n10.0.0.1 e\n";
        let small = run(contents, ConfigBuilder::new().chunk_size(4096).build());
        let large = run(
            contents,
            ConfigBuilder::new().chunk_size(128 * 1024 * 1024).build(),
        );
        assert_eq!(small, large);
    }

    #[test]
    fn unterminated_final_line_is_indexed() {
        let out = run("tag 10.0.0.1 x", ConfigBuilder::new().build());
        assert_eq!(out, "10.0.0.1,1,1:2\n");
    }

    #[test]
    fn no_addresses_produces_empty_output() {
        let out = run("nothing interesting here\n", ConfigBuilder::new().build());
        assert_eq!(out, "");
    }
}
