use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use kael_trace::Symbolizer;

/// Minimum time between moving pending events into the worker-visible
/// buffer, unless a caller forces it (on drain or on a mainloop timeout).
const FORCE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub enum LeakEvent {
    Allocation { size: u64, pointer: u64, timestamp: u64, frames: Vec<u64> },
    Deallocation { pointer: u64, timestamp: u64 },
}

/// Where a backend persists resolved events. Implemented by the filesystem
/// writer; tests can substitute an in-memory collector.
pub trait EventSink: Send + 'static {
    fn write_allocation(&mut self, pointer: u64, size: u64, timestamp: u64, symbols: &[kael_format::SymbolEntry]);
    fn write_deallocation(&mut self, pointer: u64, timestamp: u64);
}

struct Queue {
    pending: Vec<LeakEvent>,
    last_flush: Instant,
}

/// Decouples the IPC mainloop (which must stay responsive to the target)
/// from symbolization and disk I/O (which can be slow): `push_*` only
/// appends to a buffer and occasionally wakes the worker; the worker thread
/// does all the expensive work off that thread.
pub struct QueuedBackend {
    queue: Arc<Mutex<Queue>>,
    interrupt_tx: Sender<()>,
    exit_requested: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl QueuedBackend {
    pub fn spawn<S: Symbolizer + Send + 'static, W: EventSink>(symbolizer: S, mut sink: W) -> Self {
        let queue = Arc::new(Mutex::new(Queue { pending: Vec::new(), last_flush: Instant::now() }));
        let (interrupt_tx, interrupt_rx) = bounded::<()>(1);
        let exit_requested = Arc::new(AtomicBool::new(false));

        let worker_queue = queue.clone();
        let worker_exit = exit_requested.clone();
        let worker = std::thread::spawn(move || loop {
            if interrupt_rx.recv().is_err() {
                break;
            }

            let batch = {
                let mut guard = worker_queue.lock().unwrap();
                std::mem::take(&mut guard.pending)
            };

            for event in batch {
                match event {
                    LeakEvent::Allocation { size, pointer, timestamp, frames } => {
                        let symbols = symbolizer.symbolize(&frames);
                        sink.write_allocation(pointer, size, timestamp, &symbols);
                    }
                    LeakEvent::Deallocation { pointer, timestamp } => {
                        sink.write_deallocation(pointer, timestamp);
                    }
                }
            }

            let drained = worker_queue.lock().unwrap().pending.is_empty();
            if worker_exit.load(Ordering::SeqCst) && drained {
                break;
            }
        });

        QueuedBackend { queue, interrupt_tx, exit_requested, worker: Some(worker) }
    }

    pub fn push_allocation(&self, size: u64, pointer: u64, timestamp: u64, frames: Vec<u64>) {
        self.push(LeakEvent::Allocation { size, pointer, timestamp, frames });
    }

    pub fn push_deallocation(&self, pointer: u64, timestamp: u64) {
        self.push(LeakEvent::Deallocation { pointer, timestamp });
    }

    fn push(&self, event: LeakEvent) {
        let mut guard = self.queue.lock().unwrap();
        guard.pending.push(event);
        if self.should_flush(&guard, false) {
            guard.last_flush = Instant::now();
            drop(guard);
            let _ = self.interrupt_tx.try_send(());
        }
    }

    /// Called when the IPC mainloop's poll times out, i.e. the target is
    /// idle. Forces a flush regardless of how recently the last one ran, so
    /// a quiet target doesn't leave events sitting in memory indefinitely.
    pub fn signal_timeout(&self) {
        let mut guard = self.queue.lock().unwrap();
        if self.should_flush(&guard, true) {
            guard.last_flush = Instant::now();
            drop(guard);
            let _ = self.interrupt_tx.try_send(());
        }
    }

    fn should_flush(&self, queue: &Queue, force: bool) -> bool {
        if queue.pending.is_empty() {
            return false;
        }
        force || queue.last_flush.elapsed() >= FORCE_FLUSH_INTERVAL
    }

    /// Forces a final flush and blocks until the worker has drained
    /// everything and exited.
    pub fn join(mut self) {
        self.exit_requested.store(true, Ordering::SeqCst);
        let _ = self.interrupt_tx.try_send(());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kael_format::SymbolEntry;
    use std::sync::mpsc;

    struct FakeSymbolizer;
    impl Symbolizer for FakeSymbolizer {
        fn init(&mut self, _target: &kael_trace::TargetHandle) -> Result<(), kael_trace::SymbolError> {
            Ok(())
        }
        fn symbolize(&self, frames: &[u64]) -> Vec<SymbolEntry> {
            frames.iter().map(|pc| SymbolEntry { name: format!("fn_{pc:#x}"), file: String::new(), line: 0 }).collect()
        }
    }

    enum Recorded {
        Allocation(u64, u64, u64, Vec<SymbolEntry>),
        Deallocation(u64, u64),
    }

    struct ChannelSink(mpsc::Sender<Recorded>);
    impl EventSink for ChannelSink {
        fn write_allocation(&mut self, pointer: u64, size: u64, timestamp: u64, symbols: &[SymbolEntry]) {
            let _ = self.0.send(Recorded::Allocation(pointer, size, timestamp, symbols.to_vec()));
        }
        fn write_deallocation(&mut self, pointer: u64, timestamp: u64) {
            let _ = self.0.send(Recorded::Deallocation(pointer, timestamp));
        }
    }

    #[test]
    fn forced_flush_delivers_pending_events_and_join_drains() {
        let (tx, rx) = mpsc::channel();
        let backend = QueuedBackend::spawn(FakeSymbolizer, ChannelSink(tx));

        backend.push_allocation(64, 0xA0, 1000, vec![0x1000, 0x2000]);
        backend.push_deallocation(0xA0, 1001);

        // Nothing has flushed yet: the 5s interval hasn't elapsed.
        assert!(rx.try_recv().is_err());

        backend.signal_timeout();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match first {
            Recorded::Allocation(ptr, size, ts, symbols) => {
                assert_eq!(ptr, 0xA0);
                assert_eq!(size, 64);
                assert_eq!(ts, 1000);
                assert_eq!(symbols.len(), 2);
            }
            _ => panic!("expected allocation first"),
        }
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(second, Recorded::Deallocation(0xA0, 1001)));

        backend.join();
    }
}
