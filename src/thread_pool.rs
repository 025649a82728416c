//! A bounded, ordered-result thread pool: a fixed set of worker threads serving one
//! or more bounded job queues with backpressure on dispatch and strict serial-order
//! result delivery.
//!
//! Jobs carry their ownership and cleanup via a boxed `FnOnce` closure: argument
//! ownership passes into the worker when the closure runs, and drops exactly once,
//! whether the job runs to completion or is dropped unexecuted during a queue drain.
//!
//! A job's serial number is never stored explicitly: because the job deque is a
//! plain FIFO and dispatch always appends at the tail, the n-th job popped by any
//! worker is always the n-th job ever dispatched, so a simple pop counter recovers
//! the same ordering an explicit per-job serial field would.
//!
//! The queue registry is a flat `Vec<Option<QueueState>>` keyed by a small integer
//! handle rather than an intrusive linked ring — a queue detached and freed
//! mid-iteration can never leave a dangling "next" reference. A single non-recursive
//! pool `Mutex` suffices because `Queue::close` inlines its flush logic against an
//! already-held guard instead of re-entering a locking wrapper.
//!
//! The per-worker idle wait and the dispatch-side input-not-full wait use a bounded
//! timeout (250ms) rather than an unbounded condition wait, purely so a pool-wide
//! shutdown is always observed promptly without relying on every wakeup being
//! perfectly targeted.

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{MotifScanError, Result};

type BoxedOutcome = Box<dyn Any + Send>;
type Job = Box<dyn FnOnce() -> (bool, BoxedOutcome) + Send>;

const WORKER_POLL: Duration = Duration::from_millis(250);
const FLUSH_POLL: Duration = Duration::from_secs(1);
const RESULT_WAIT: Duration = Duration::from_secs(10);

struct ResultEntry {
    serial: u64,
    data: BoxedOutcome,
}

/// Four condition signals per queue: `output-available`, `input-not-full`,
/// `input-empty`, and `none-processing`. Held behind an `Arc` so a `Queue<T>` handle
/// can wait on them without re-borrowing the pool mutex's guard.
#[derive(Default)]
struct QueueConds {
    output_available: Condvar,
    input_not_full: Condvar,
    input_empty: Condvar,
    none_processing: Condvar,
}

impl QueueConds {
    fn broadcast_all(&self) {
        self.output_available.notify_all();
        self.input_not_full.notify_all();
        self.input_empty.notify_all();
        self.none_processing.notify_all();
    }
}

struct QueueState {
    jobs: VecDeque<Job>,
    results: Vec<ResultEntry>,
    n_processing: usize,
    qsize: usize,
    in_only: bool,
    no_more_input: bool,
    wake_dispatch: bool,
    shutdown: bool,
    shutdown_error: bool,
    next_job_serial: u64,
    next_result_serial: u64,
    ref_count: usize,
    conds: Arc<QueueConds>,
}

impl QueueState {
    fn new(qsize: usize, in_only: bool) -> Self {
        QueueState {
            jobs: VecDeque::new(),
            results: Vec::new(),
            n_processing: 0,
            qsize,
            in_only,
            no_more_input: false,
            wake_dispatch: false,
            shutdown: false,
            shutdown_error: false,
            next_job_serial: 0,
            next_result_serial: 0,
            ref_count: 1,
            conds: Arc::new(QueueConds::default()),
        }
    }

    fn n_job(&self) -> usize {
        self.jobs.len()
    }

    /// Remaining result-storage capacity: room to deposit a future result without
    /// overrunning `qsize`.
    fn result_room(&self) -> usize {
        self.qsize.saturating_sub(self.results.len())
    }
}

struct PoolShared {
    nwaiting: usize,
    njobs: usize,
    shutdown: bool,
    idle: Vec<bool>,
    queues: Vec<Option<QueueState>>,
}

struct PoolInner {
    tsize: usize,
    mutex: Mutex<PoolShared>,
    worker_conds: Vec<Condvar>,
}

/// A fixed-size pool of worker threads serving one or more bounded `Queue`s.
pub struct Pool {
    inner: Arc<PoolInner>,
    handles: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Spawn `n` worker threads, each initially idle and registered in the idle table.
    pub fn new(n: usize) -> Pool {
        let n = n.max(1);
        let shared = PoolShared {
            nwaiting: 0,
            njobs: 0,
            shutdown: false,
            idle: vec![false; n],
            queues: Vec::new(),
        };
        let inner = Arc::new(PoolInner {
            tsize: n,
            mutex: Mutex::new(shared),
            worker_conds: (0..n).map(|_| Condvar::new()).collect(),
        });

        let mut handles = Vec::with_capacity(n);
        for idx in 0..n {
            let inner = Arc::clone(&inner);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("motifscan-worker-{idx}"))
                    .spawn(move || worker_loop(inner, idx))
                    .expect("failed to spawn worker thread"),
            );
        }
        Pool { inner, handles }
    }

    /// Create a new bounded queue attached to this pool. `in_only` causes workers to
    /// discard results (they are computed and then simply dropped) instead of storing
    /// them for ordered retrieval.
    pub fn queue<T: Send + 'static>(&self, qsize: usize, in_only: bool) -> Queue<T> {
        let mut shared = self.inner.mutex.lock().unwrap();
        let state = QueueState::new(qsize, in_only);
        let conds = Arc::clone(&state.conds);
        let handle = match shared.queues.iter().position(|q| q.is_none()) {
            Some(idx) => {
                shared.queues[idx] = Some(state);
                idx
            }
            None => {
                shared.queues.push(Some(state));
                shared.queues.len() - 1
            }
        };
        Queue {
            pool: Arc::clone(&self.inner),
            handle,
            conds,
            _marker: PhantomData,
        }
    }

    /// Signal every worker's pending condition and join all threads. Consumes the pool.
    pub fn shutdown(mut self) {
        {
            let mut shared = self.inner.mutex.lock().unwrap();
            shared.shutdown = true;
            for q in shared.queues.iter().flatten() {
                q.conds.broadcast_all();
            }
        }
        for cond in &self.inner.worker_conds {
            cond.notify_one();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        {
            let mut shared = self.inner.mutex.lock().unwrap();
            shared.shutdown = true;
        }
        for cond in &self.inner.worker_conds {
            cond.notify_one();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// A bounded, ordered-result job queue attached to a `Pool`.
pub struct Queue<T> {
    pool: Arc<PoolInner>,
    handle: usize,
    conds: Arc<QueueConds>,
    _marker: PhantomData<T>,
}

impl<T: Send + 'static> Queue<T> {
    /// Submit `job` to this queue. If `nonblock` is true, returns `Err(QueueFull)`
    /// immediately when the queue is at capacity rather than waiting; otherwise blocks
    /// until capacity frees, the queue closes, or the pool shuts down.
    pub fn dispatch<F>(&self, job: F, nonblock: bool) -> Result<()>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let wrapped: Job = Box::new(move || {
            let result = job();
            let is_err = result.is_err();
            (is_err, Box::new(result) as BoxedOutcome)
        });

        let mut shared = self.pool.mutex.lock().unwrap();
        {
            let q = shared.queues[self.handle].as_ref().unwrap();
            if q.shutdown {
                return Err(if q.shutdown_error {
                    MotifScanError::WorkerPanic
                } else {
                    MotifScanError::QueueClosed
                });
            }
            if q.no_more_input || (q.n_job() >= q.qsize && nonblock) {
                return Err(if q.no_more_input {
                    MotifScanError::QueueClosed
                } else {
                    MotifScanError::QueueFull
                });
            }
        }

        if !nonblock {
            loop {
                let q = shared.queues[self.handle].as_ref().unwrap();
                if q.n_job() < q.qsize {
                    break;
                }
                if q.no_more_input || q.shutdown {
                    return Err(MotifScanError::QueueClosed);
                }
                shared = wait_timeout(&self.conds.input_not_full, shared, WORKER_POLL);
                let q = shared.queues[self.handle].as_mut().unwrap();
                q.wake_dispatch = false;
            }
            let q = shared.queues[self.handle].as_ref().unwrap();
            if q.no_more_input || q.shutdown {
                return Err(MotifScanError::QueueClosed);
            }
        }

        {
            let q = shared.queues[self.handle].as_mut().unwrap();
            q.jobs.push_back(wrapped);
        }
        shared.njobs += 1;
        wake_next_worker(&self.pool, &mut shared, self.handle);
        Ok(())
    }

    /// Return the result whose serial equals the queue's next expected serial, if it
    /// has already arrived. Results come back in strict serial order regardless of
    /// completion order.
    pub fn next_result(&self) -> Option<Result<T>> {
        let mut shared = self.pool.mutex.lock().unwrap();
        self.take_next_result(&mut shared)
    }

    fn take_next_result(&self, shared: &mut PoolShared) -> Option<Result<T>> {
        let (entry, job_room) = {
            let q = shared.queues[self.handle].as_mut().unwrap();
            let pos = q.results.iter().position(|r| r.serial == q.next_result_serial)?;
            let entry = q.results.remove(pos);
            q.next_result_serial += 1;
            (entry, q.qsize > 0 && q.n_job() < q.qsize)
        };

        if job_room {
            self.conds.input_not_full.notify_one();
        }
        let shutdown = shared.queues[self.handle].as_ref().unwrap().shutdown;
        if !shutdown && job_room {
            wake_next_worker(&self.pool, shared, self.handle);
        }

        let result: Result<T> = *entry
            .data
            .downcast::<Result<T>>()
            .expect("job outcome type mismatch");
        Some(result)
    }

    /// Loop on a 10-second `output-available` timed wait until a result is ready or
    /// the queue shuts down, bumping the queue's reference count across the wait to
    /// tolerate concurrent destruction.
    pub fn next_result_wait(&self) -> Option<Result<T>> {
        let mut shared = self.pool.mutex.lock().unwrap();
        loop {
            if let Some(r) = self.take_next_result(&mut shared) {
                return Some(r);
            }
            if shared.queues[self.handle].as_ref().unwrap().shutdown {
                return None;
            }
            shared.queues[self.handle].as_mut().unwrap().ref_count += 1;
            shared = wait_timeout(&self.conds.output_available, shared, RESULT_WAIT);
            shared.queues[self.handle].as_mut().unwrap().ref_count -= 1;
        }
    }

    /// Signal idle workers, temporarily raise `qsize` if in-flight work already exceeds
    /// it (to avoid deadlock while draining), then wait on `input-empty` followed by
    /// `none-processing`, both with 1-second timed waits so shutdown stays responsive.
    pub fn flush(&self) {
        let mut shared = self.pool.mutex.lock().unwrap();
        for (idx, cond) in self.pool.worker_conds.iter().enumerate() {
            if shared.idle[idx] {
                cond.notify_one();
            }
        }
        {
            let q = shared.queues[self.handle].as_mut().unwrap();
            let in_flight = q.results.len() + q.n_job() + q.n_processing;
            if q.qsize < in_flight {
                q.qsize = in_flight;
            }
        }

        loop {
            let (shutdown, n_job, n_processing) = {
                let q = shared.queues[self.handle].as_ref().unwrap();
                (q.shutdown, q.n_job(), q.n_processing)
            };
            if shutdown || (n_job == 0 && n_processing == 0) {
                break;
            }
            if n_job > 0 {
                shared = wait_timeout(&self.conds.input_empty, shared, FLUSH_POLL);
            } else {
                shared = wait_timeout(&self.conds.none_processing, shared, FLUSH_POLL);
            }
        }
    }

    /// True once this queue has observed a worker error and shut down with an error flag.
    pub fn has_error(&self) -> bool {
        let shared = self.pool.mutex.lock().unwrap();
        shared.queues[self.handle]
            .as_ref()
            .map(|q| q.shutdown_error)
            .unwrap_or(false)
    }

    /// `no_more_input` → drain pending jobs (dropped, running their captured
    /// destructors) → wait for in-flight jobs → detach from the pool's registry →
    /// broadcast all four conditions → free once the reference count hits zero.
    pub fn close(self) {
        {
            let mut shared = self.pool.mutex.lock().unwrap();
            let q = shared.queues[self.handle].as_mut().unwrap();
            q.no_more_input = true;
            q.jobs.clear();
        }
        self.flush();

        let mut shared = self.pool.mutex.lock().unwrap();
        let q = shared.queues[self.handle].as_mut().unwrap();
        q.shutdown = true;
        q.conds.broadcast_all();
        q.ref_count -= 1;
        if q.ref_count == 0 {
            shared.queues[self.handle] = None;
        }
    }
}

fn wait_timeout<'a>(
    cond: &Condvar,
    guard: MutexGuard<'a, PoolShared>,
    dur: Duration,
) -> MutexGuard<'a, PoolShared> {
    match cond.wait_timeout(guard, dur) {
        Ok((g, _)) => g,
        Err(poisoned) => poisoned.into_inner().0,
    }
}

/// Only signal a worker if (a) some worker is idle, (b) the pool has more unprocessed
/// jobs than currently-working threads, and (c) the target queue still has result
/// capacity. Always wakes the lowest-index idle worker for cache-friendly LIFO reuse.
fn wake_next_worker(pool: &PoolInner, shared: &mut PoolShared, handle: usize) {
    let running = pool.tsize - shared.nwaiting;
    let lowest_idle = shared.idle.iter().position(|&idle| idle);

    let Some(idx) = lowest_idle else { return };
    if shared.njobs == 0 || shared.njobs <= running {
        return;
    }
    let has_capacity = {
        let q = shared.queues[handle].as_ref().unwrap();
        q.n_processing < q.result_room()
    };
    if has_capacity {
        pool.worker_conds[idx].notify_one();
    }
}

fn worker_loop(inner: Arc<PoolInner>, idx: usize) {
    let mut shared = inner.mutex.lock().unwrap();
    loop {
        if shared.shutdown {
            break;
        }

        let tsize = inner.tsize;
        let nwaiting = shared.nwaiting;
        let available = shared.queues.iter().position(|q| match q {
            Some(q) => q.n_job() > 0 && q.result_room() > tsize - nwaiting && !q.shutdown,
            None => false,
        });

        let Some(handle) = available else {
            shared.idle[idx] = true;
            shared.nwaiting += 1;
            shared = wait_timeout(&inner.worker_conds[idx], shared, WORKER_POLL);
            shared.idle[idx] = false;
            shared.nwaiting -= 1;
            continue;
        };

        shared.queues[handle].as_mut().unwrap().ref_count += 1;

        loop {
            if shared.shutdown {
                break;
            }
            let job = {
                let q = shared.queues[handle].as_mut().unwrap();
                if q.jobs.is_empty() || q.n_processing >= q.result_room() || q.shutdown {
                    None
                } else {
                    q.jobs.pop_front()
                }
            };
            let Some(job) = job else { break };

            let serial = {
                let q = shared.queues[handle].as_mut().unwrap();
                let serial = q.next_job_serial;
                q.next_job_serial += 1;
                q.n_processing += 1;
                let was_full = q.n_job() + 1 >= q.qsize;
                shared.njobs -= 1;
                let q = shared.queues[handle].as_ref().unwrap();
                if was_full {
                    q.conds.input_not_full.notify_all();
                }
                if q.n_job() == 0 {
                    q.conds.input_empty.notify_all();
                }
                serial
            };

            drop(shared);
            let (is_err, data) = job();
            shared = inner.mutex.lock().unwrap();

            push_result(&mut shared, handle, serial, is_err, data);
        }

        let detach = {
            let q = shared.queues[handle].as_mut().unwrap();
            q.ref_count -= 1;
            q.ref_count == 0 && q.no_more_input
        };
        if detach {
            shared.queues[handle] = None;
        }
    }
}

/// Decrement `n_processing`, and on completion either store the result (ordered
/// retrieval) or drop it (`in_only`). A failing job flips every queue on the pool to
/// an error shutdown, so a problem in one chromosome's scan aborts the whole run.
fn push_result(shared: &mut PoolShared, handle: usize, serial: u64, is_err: bool, data: BoxedOutcome) {
    {
        let q = shared.queues[handle].as_ref().unwrap();
        let conds = Arc::clone(&q.conds);
        let q = shared.queues[handle].as_mut().unwrap();
        q.n_processing -= 1;
        if q.n_processing == 0 {
            conds.none_processing.notify_all();
        }
    }

    if is_err {
        for q in shared.queues.iter_mut().flatten() {
            q.shutdown = true;
            q.shutdown_error = true;
            q.conds.broadcast_all();
        }
        return;
    }

    let q = shared.queues[handle].as_mut().unwrap();
    if q.in_only {
        return;
    }
    q.results.push(ResultEntry { serial, data });
    if serial == q.next_result_serial {
        q.conds.output_available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[test]
    fn dispatch_and_retrieve_single_job() {
        let pool = Pool::new(2);
        let queue: Queue<i32> = pool.queue(4, false);
        queue.dispatch(|| Ok(42), false).unwrap();
        let r = queue.next_result_wait().unwrap();
        assert_eq!(r.unwrap(), 42);
        queue.close();
        pool.shutdown();
    }

    #[test]
    fn results_arrive_in_serial_order() {
        let pool = Pool::new(4);
        let queue: Queue<u64> = pool.queue(16, false);
        for i in 0..20u64 {
            // Reverse-skewed sleep so later dispatches tend to finish first.
            let delay = 20 - i;
            queue
                .dispatch(
                    move || {
                        std::thread::sleep(StdDuration::from_micros(delay * 200));
                        Ok(i)
                    },
                    false,
                )
                .unwrap();
        }
        for expected in 0..20u64 {
            let r = queue.next_result_wait().unwrap().unwrap();
            assert_eq!(r, expected);
        }
        queue.close();
        pool.shutdown();
    }

    #[test]
    fn in_only_queue_discards_results() {
        let pool = Pool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let queue: Queue<()> = pool.queue(8, true);
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            queue
                .dispatch(
                    move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                    true,
                )
                .unwrap();
        }
        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        queue.close();
        pool.shutdown();
    }

    #[test]
    fn blocking_dispatch_never_exceeds_capacity() {
        let pool = Pool::new(1);
        let queue: Queue<()> = pool.queue(2, true);
        let gate = Arc::new(std::sync::Barrier::new(2));
        let g1 = Arc::clone(&gate);
        queue
            .dispatch(
                move || {
                    g1.wait();
                    Ok(())
                },
                false,
            )
            .unwrap();
        queue.dispatch(|| Ok(()), false).unwrap();
        // Third dispatch should block until the first job (holding up the sole worker) completes.
        gate.wait();
        queue.dispatch(|| Ok(()), false).unwrap();
        queue.flush();
        queue.close();
        pool.shutdown();
    }

    #[test]
    fn nonblocking_dispatch_errors_when_full() {
        let pool = Pool::new(1);
        let queue: Queue<()> = pool.queue(1, true);
        let gate = Arc::new(std::sync::Barrier::new(2));
        let g1 = Arc::clone(&gate);
        queue
            .dispatch(
                move || {
                    g1.wait();
                    Ok(())
                },
                false,
            )
            .unwrap();
        // Worker is now busy running the first job; a second slot is free in the queue,
        // so fill it, then verify the third nonblocking dispatch is rejected.
        queue.dispatch(|| Ok(()), true).unwrap();
        let err = queue.dispatch(|| Ok(()), true).unwrap_err();
        assert!(matches!(err, MotifScanError::QueueFull));
        gate.wait();
        queue.flush();
        queue.close();
        pool.shutdown();
    }

    #[test]
    fn worker_error_shuts_down_queue() {
        let pool = Pool::new(2);
        let queue: Queue<()> = pool.queue(4, false);
        queue
            .dispatch(|| Err(MotifScanError::WorkerPanic), false)
            .unwrap();
        // give the worker a moment to process and signal shutdown
        std::thread::sleep(StdDuration::from_millis(50));
        assert!(queue.has_error());
        queue.close();
        pool.shutdown();
    }
}
