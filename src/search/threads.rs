use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::board::position::{Move, Position};
use crate::eval::evaluate::INFINITY;
use crate::search::alphabeta::{self, NodeType, Stack, ONE_PLY};
use crate::search::history::History;
use crate::search::movepick::MovePicker;
use crate::search::splitpoint::SplitPoint;
use crate::search::time_management::TimeManager;
use crate::search::transposition::TranspositionTable;

// slavesMask is a u64 bitfield, one bit per worker.
pub const MAX_THREADS: usize = 64;
pub const MAX_SPLITPOINTS_PER_THREAD: usize = 8;

const TIMER_RESOLUTION_MS: u64 = 5;

// One search worker. The split-point array is the thread's stack of open
// splits; other threads hold raw pointers into it while they help, which is
// safe because a split point outlives its split (the master joins before the
// slot is popped).
pub struct Worker {
    pub idx: usize,
    split_points: UnsafeCell<[SplitPoint; MAX_SPLITPOINTS_PER_THREAD]>,
    splits: AtomicUsize,
    active_split_point: AtomicPtr<SplitPoint>,
    pub searching: AtomicBool,
    pub exit: AtomicBool,
    started: AtomicBool,
    mutex: Mutex<()>,
    sleep_condition: Condvar,
}

unsafe impl Send for Worker {}
unsafe impl Sync for Worker {}

impl Worker {
    fn new(idx: usize) -> Self {
        Self {
            idx,
            split_points: UnsafeCell::new(std::array::from_fn(|_| SplitPoint::new())),
            splits: AtomicUsize::new(0),
            active_split_point: AtomicPtr::new(std::ptr::null_mut()),
            searching: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            started: AtomicBool::new(false),
            mutex: Mutex::new(()),
            sleep_condition: Condvar::new(),
        }
    }

    // Wake the thread if it sleeps in its idle loop. The lock round trip
    // pairs with the wait under the same mutex, so the wakeup cannot be lost.
    pub fn notify_one(&self) {
        let _guard = self.mutex.lock().unwrap();
        self.sleep_condition.notify_one();
    }

    #[inline(always)]
    pub fn splits_size(&self) -> usize {
        self.splits.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn split_points_ptr(&self) -> *mut [SplitPoint; MAX_SPLITPOINTS_PER_THREAD] {
        self.split_points.get()
    }

    fn split_point(&self, index: usize) -> &SplitPoint {
        unsafe { &(*self.split_points.get())[index] }
    }

    // True when a beta cutoff happened at the active split point or any of
    // its ancestors; work below such a node is wasted.
    pub fn cutoff_occurred(&self) -> bool {
        let mut sp = self.active_split_point.load(Ordering::Acquire) as *const SplitPoint;
        while !sp.is_null() {
            let s = unsafe { &*sp };
            if s.cutoff_raised() {
                return true;
            }
            sp = s.parent;
        }
        false
    }

    // The helpful-master rule: an idle thread may help `master` only if it
    // has no open splits of its own, or `master` works below its topmost
    // split. Anything else risks a master waiting on a thread that waits on
    // the master.
    pub fn is_available_to(&self, master_idx: usize) -> bool {
        if self.searching.load(Ordering::Acquire) {
            return false;
        }

        // Local copy, the owner may be popping concurrently.
        let size = self.splits_size();
        if size == 0 {
            return true;
        }

        let top = self.split_point(size - 1);
        top.shared.lock().unwrap().slaves_mask & (1u64 << master_idx) != 0
    }
}

#[derive(Clone)]
pub struct SearchParams {
    pub position: Position,
    pub max_depth: i32,
    pub time: TimeManager,
    pub multi_pv: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            position: Position::startpos(),
            max_depth: 1,
            time: TimeManager::infinite(),
            multi_pv: 1,
        }
    }
}

struct ThinkState {
    thinking: bool,
    params: SearchParams,
}

pub struct ThreadPool {
    // Pool mutex: guards membership and serializes slave recruitment.
    workers: Mutex<Vec<Arc<Worker>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,

    state: Mutex<ThinkState>,
    think_cond: Condvar,
    // Signalled when the main thread goes back to sleep; the UI thread waits
    // on it instead of polling.
    pub sleep_condition: Condvar,

    stop: AtomicBool,
    min_split_depth: AtomicI32,
    max_threads_per_split_point: AtomicUsize,
    pub sleep_while_idle: AtomicBool,

    tt: Mutex<Arc<TranspositionTable>>,
    history: Arc<History>,
    time: Mutex<TimeManager>,

    timer_mutex: Mutex<u64>,
    timer_cond: Condvar,
    timer_exit: AtomicBool,

    splits_done: AtomicU64,
}

impl ThreadPool {
    // Creates the pool with its timer thread and the main search thread; call
    // `read_uci_options` afterwards to size the slave set.
    pub fn new(hash_mb: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            workers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            state: Mutex::new(ThinkState {
                thinking: false,
                params: SearchParams::default(),
            }),
            think_cond: Condvar::new(),
            sleep_condition: Condvar::new(),
            stop: AtomicBool::new(false),
            min_split_depth: AtomicI32::new(4 * ONE_PLY),
            max_threads_per_split_point: AtomicUsize::new(8),
            sleep_while_idle: AtomicBool::new(true),
            tt: Mutex::new(Arc::new(TranspositionTable::new(hash_mb))),
            history: Arc::new(History::new()),
            time: Mutex::new(TimeManager::infinite()),
            timer_mutex: Mutex::new(0),
            timer_cond: Condvar::new(),
            timer_exit: AtomicBool::new(false),
            splits_done: AtomicU64::new(0),
        });

        {
            let p = pool.clone();
            pool.handles
                .lock()
                .unwrap()
                .push(std::thread::spawn(move || timer_loop(p)));
        }

        let main = Arc::new(Worker::new(0));
        pool.workers.lock().unwrap().push(main.clone());
        {
            let p = pool.clone();
            let w = main.clone();
            pool.handles
                .lock()
                .unwrap()
                .push(std::thread::spawn(move || main_loop(p, w)));
        }
        while !main.started.load(Ordering::Acquire) {
            std::thread::yield_now();
        }

        pool
    }

    pub fn size(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    pub fn worker(&self, idx: usize) -> Arc<Worker> {
        self.workers.lock().unwrap()[idx].clone()
    }

    pub fn main_worker(&self) -> Arc<Worker> {
        self.worker(0)
    }

    // Applies the UCI thread options: pool size, split depth and width,
    // idle policy. A zero minimum split depth means pick it from the
    // thread count.
    pub fn read_uci_options(
        self: &Arc<Self>,
        threads: usize,
        min_split_depth: i32,
        max_threads_per_split_point: usize,
        sleep_while_idle: bool,
    ) {
        let requested = threads.clamp(1, MAX_THREADS);

        self.max_threads_per_split_point
            .store(max_threads_per_split_point.clamp(4, 8), Ordering::Relaxed);

        let msd = if min_split_depth == 0 {
            if requested < 8 { 4 * ONE_PLY } else { 7 * ONE_PLY }
        } else {
            (min_split_depth * ONE_PLY).max(4 * ONE_PLY)
        };
        self.min_split_depth.store(msd, Ordering::Relaxed);
        self.sleep_while_idle.store(sleep_while_idle, Ordering::Relaxed);

        while self.size() < requested {
            self.spawn_slave();
        }
        while self.size() > requested {
            self.remove_last_slave();
        }
    }

    fn spawn_slave(self: &Arc<Self>) {
        let idx = self.size();
        let worker = Arc::new(Worker::new(idx));
        self.workers.lock().unwrap().push(worker.clone());

        let pool = self.clone();
        let w = worker.clone();
        let handle = std::thread::spawn(move || {
            w.started.store(true, Ordering::Release);
            idle_loop(&pool, &w, std::ptr::null());
        });
        self.handles.lock().unwrap().push(handle);

        // Block until the new thread reached its idle loop.
        while !worker.started.load(Ordering::Acquire) {
            std::thread::yield_now();
        }
    }

    fn remove_last_slave(&self) {
        let worker = {
            let mut workers = self.workers.lock().unwrap();
            if workers.len() <= 1 {
                return;
            }
            workers.pop().unwrap()
        };
        worker.exit.store(true, Ordering::SeqCst);
        worker.notify_one();
        if let Some(handle) = self.handles.lock().unwrap().pop() {
            let _ = handle.join();
        }
    }

    // Cleanly terminates every thread. The timer goes first, the main thread
    // last, after all of its potential helpers are gone.
    pub fn exit(&self) {
        self.wait_for_think_finished();

        self.timer_exit.store(true, Ordering::SeqCst);
        {
            let _guard = self.timer_mutex.lock().unwrap();
            self.timer_cond.notify_one();
        }

        while self.size() > 1 {
            self.remove_last_slave();
        }

        let main = {
            let mut workers = self.workers.lock().unwrap();
            workers.pop()
        };
        if let Some(main) = main {
            main.exit.store(true, Ordering::SeqCst);
            {
                let _st = self.state.lock().unwrap();
                self.think_cond.notify_all();
            }
            main.notify_one();
        }

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }

    #[inline(always)]
    pub fn stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn thinking(&self) -> bool {
        self.state.lock().unwrap().thinking
    }

    pub fn tt(&self) -> Arc<TranspositionTable> {
        self.tt.lock().unwrap().clone()
    }

    pub fn resize_hash(&self, size_mb: usize) {
        *self.tt.lock().unwrap() = Arc::new(TranspositionTable::new(size_mb));
    }

    pub fn clear_hash(&self) {
        self.tt().clear();
        self.history.clear();
    }

    pub fn history(&self) -> Arc<History> {
        self.history.clone()
    }

    #[inline(always)]
    pub fn min_split_depth(&self) -> i32 {
        self.min_split_depth.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn max_threads_per_split_point(&self) -> usize {
        self.max_threads_per_split_point.load(Ordering::Relaxed)
    }

    pub fn splits_done(&self) -> u64 {
        self.splits_done.load(Ordering::Relaxed)
    }

    pub fn search_params(&self) -> SearchParams {
        self.state.lock().unwrap().params.clone()
    }

    // Cheap pre-check before paying for the full split setup.
    pub fn slave_available(&self, master: &Worker) -> bool {
        let workers = self.workers.lock().unwrap();
        workers
            .iter()
            .any(|w| w.idx != master.idx && w.is_available_to(master.idx))
    }

    // Hands the position to the main search thread and returns immediately.
    pub fn start_thinking(
        self: &Arc<Self>,
        position: Position,
        max_depth: i32,
        time: TimeManager,
        multi_pv: usize,
    ) {
        self.wait_for_think_finished();

        self.stop.store(false, Ordering::SeqCst);
        *self.time.lock().unwrap() = time.clone();

        {
            let mut st = self.state.lock().unwrap();
            st.params = SearchParams {
                position,
                max_depth,
                time,
                multi_pv,
            };
            st.thinking = true;
            self.think_cond.notify_all();
        }

        self.set_timer(TIMER_RESOLUTION_MS);
        self.main_worker().notify_one();
    }

    pub fn wait_for_think_finished(&self) {
        let mut st = self.state.lock().unwrap();
        while st.thinking {
            st = self.sleep_condition.wait(st).unwrap();
        }
    }

    fn set_timer(&self, msec: u64) {
        let mut guard = self.timer_mutex.lock().unwrap();
        *guard = msec;
        self.timer_cond.notify_one();
    }

    // Invoked by the timer thread: raises the stop signal when the budget of
    // the current search is spent.
    pub fn check_time(&self) {
        if !self.thinking() {
            return;
        }
        let tm = self.time.lock().unwrap().clone();
        if tm.out_of_time() {
            self.request_stop();
        }
    }
}

fn timer_loop(pool: Arc<ThreadPool>) {
    loop {
        {
            let guard = pool.timer_mutex.lock().unwrap();
            if pool.timer_exit.load(Ordering::Acquire) {
                return;
            }
            let msec = *guard;
            let wait = if msec == 0 { 60_000 } else { msec };
            let _ = pool
                .timer_cond
                .wait_timeout(guard, Duration::from_millis(wait));
        }
        if pool.timer_exit.load(Ordering::Acquire) {
            return;
        }
        pool.check_time();
    }
}

// The main search thread parks here between searches; `start_thinking` wakes
// it, `think` runs the iterative deepening driver.
fn main_loop(pool: Arc<ThreadPool>, worker: Arc<Worker>) {
    worker.started.store(true, Ordering::Release);

    loop {
        {
            let mut st = pool.state.lock().unwrap();
            st.thinking = false;
            pool.sleep_condition.notify_all();
            while !st.thinking && !worker.exit.load(Ordering::Acquire) {
                st = pool.think_cond.wait(st).unwrap();
            }
        }

        if worker.exit.load(Ordering::Acquire) {
            return;
        }

        worker.searching.store(true, Ordering::SeqCst);
        alphabeta::think(&pool);
        worker.searching.store(false, Ordering::SeqCst);

        pool.set_timer(0);
    }
}

// The shared idle loop. Pure slaves run it forever with a null `this_sp`; a
// master re-enters it from `split` with its own split point and leaves once
// every slave has checked out.
pub fn idle_loop(pool: &Arc<ThreadPool>, worker: &Arc<Worker>, this_sp: *const SplitPoint) {
    loop {
        if worker.exit.load(Ordering::Acquire) {
            debug_assert!(this_sp.is_null());
            return;
        }

        if worker.searching.load(Ordering::Acquire) {
            run_split_work(pool, worker, this_sp);
            continue;
        }

        if !this_sp.is_null() {
            let sp = unsafe { &*this_sp };
            let done = sp.shared.lock().unwrap().slaves_mask == 1u64 << sp.master;
            if done {
                return;
            }
        }

        if pool.sleep_while_idle.load(Ordering::Relaxed) {
            let guard = worker.mutex.lock().unwrap();
            if !worker.searching.load(Ordering::Acquire) && !worker.exit.load(Ordering::Acquire) {
                // The timeout doubles as the fallback for a master whose
                // last slave signalled between the check above and the wait.
                let _ = worker
                    .sleep_condition
                    .wait_timeout(guard, Duration::from_millis(2));
            }
        } else {
            std::thread::yield_now();
        }
    }
}

fn run_split_work(pool: &Arc<ThreadPool>, worker: &Arc<Worker>, this_sp: *const SplitPoint) {
    let sp_ptr = worker.active_split_point.load(Ordering::Acquire);
    debug_assert!(!sp_ptr.is_null());
    let sp = unsafe { &*sp_ptr };

    let nodes = alphabeta::split_point_search(pool, worker, sp);

    let mut wake_master = None;
    {
        let mut guard = sp.shared.lock().unwrap();
        worker.searching.store(false, Ordering::Release);
        guard.nodes += nodes;

        // Slaves check out; the master's bit stays until it leaves the
        // split itself.
        if worker.idx != sp.master {
            guard.slaves_mask &= !(1u64 << worker.idx);
            if guard.slaves_mask == 1u64 << sp.master {
                wake_master = sp.master_handle.clone();
            }
        }
    }

    worker
        .active_split_point
        .store(this_sp as *mut SplitPoint, Ordering::Release);

    if let Some(master) = wake_master {
        master.notify_one();
    }
}

// Publishes the remaining moves of a node as a split point, recruits helpful
// idle slaves and joins them as a worker itself. `FAKE` keeps the whole
// protocol but recruits nobody, to exercise the plumbing on one thread.
#[allow(clippy::too_many_arguments)]
pub fn split<const FAKE: bool>(
    pool: &Arc<ThreadPool>,
    worker: &Arc<Worker>,
    pos: &Position,
    mp: &mut MovePicker,
    ss: &Stack,
    ply: i32,
    alpha: i32,
    beta: i32,
    best_value: &mut i32,
    best_move: &mut Move,
    depth: i32,
    threat_move: Move,
    move_count: i32,
    node_type: NodeType,
    cut_node: bool,
    nodes: &mut u64,
) {
    debug_assert!(*best_value <= alpha && alpha < beta && beta <= INFINITY);
    debug_assert!(*best_value > -INFINITY);
    debug_assert!(depth >= pool.min_split_depth());
    debug_assert!(worker.searching.load(Ordering::Acquire));
    debug_assert!(worker.splits_size() < MAX_SPLITPOINTS_PER_THREAD);

    let slot = worker.splits_size();
    let sp = unsafe { &mut (*worker.split_points_ptr())[slot] };

    sp.master = worker.idx;
    sp.master_handle = Some(worker.clone());
    sp.parent = worker.active_split_point.load(Ordering::Acquire);
    sp.pos = pos;
    sp.picker = mp;
    sp.ss = *ss;
    sp.ply = ply;
    sp.depth = depth;
    sp.beta = beta;
    sp.node_type = node_type;
    sp.cut_node = cut_node;
    sp.threat_move = threat_move;
    sp.cutoff.store(false, Ordering::SeqCst);
    {
        let mut guard = sp.shared.lock().unwrap();
        guard.alpha = alpha;
        guard.best_value = *best_value;
        guard.best_move = *best_move;
        guard.move_count = move_count;
        guard.nodes = 0;
        guard.slaves_mask = 1u64 << worker.idx;
    }

    let sp_ptr: *mut SplitPoint = sp;

    // Recruitment is serialized: pool mutex first, split-point mutex second.
    let workers = pool.workers.lock().unwrap();
    let mut guard = sp.shared.lock().unwrap();

    worker.splits.store(slot + 1, Ordering::Release);
    worker.active_split_point.store(sp_ptr, Ordering::Release);

    let mut slaves_cnt = 1usize; // this thread is always included
    if !FAKE {
        while slaves_cnt < pool.max_threads_per_split_point() {
            let slave = workers
                .iter()
                .find(|w| w.idx != worker.idx && w.is_available_to(worker.idx));
            let Some(slave) = slave else { break };

            slaves_cnt += 1;
            guard.slaves_mask |= 1u64 << slave.idx;
            slave.active_split_point.store(sp_ptr, Ordering::Release);
            slave.searching.store(true, Ordering::Release); // slave leaves its idle loop
            slave.notify_one();
        }
    }

    pool.splits_done.fetch_add(1, Ordering::Relaxed);

    drop(guard);
    drop(workers);

    // The master joins its own split through the idle loop: its `searching`
    // flag is still set, so the first thing it does there is pick up work.
    // It comes back once the slaves mask is down to its own bit.
    if slaves_cnt > 1 || FAKE {
        idle_loop(pool, worker, sp_ptr);
        debug_assert!(!worker.searching.load(Ordering::Acquire));
    }

    // Unwind under both locks to keep is_available_to readers consistent.
    let _workers = pool.workers.lock().unwrap();
    let sp = unsafe { &mut (*worker.split_points_ptr())[slot] };
    {
        let guard = sp.shared.lock().unwrap();
        *best_value = guard.best_value;
        *best_move = guard.best_move;
        *nodes += guard.nodes;
    }
    worker.searching.store(true, Ordering::SeqCst);
    worker.splits.store(slot, Ordering::Release);
    worker
        .active_split_point
        .store(sp.parent as *mut SplitPoint, Ordering::Release);

    sp.master_handle = None;
    sp.pos = std::ptr::null();
    sp.picker = std::ptr::null_mut();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_for_tests;
    use crate::search::movepick::MovePicker;

    fn quiet_pool(threads: usize) -> Arc<ThreadPool> {
        init_for_tests();
        let pool = ThreadPool::new(1);
        pool.read_uci_options(threads, 0, 8, true);
        pool
    }

    #[test]
    fn test_pool_resizes_to_requested_threads() {
        let pool = quiet_pool(4);
        assert_eq!(pool.size(), 4);

        pool.read_uci_options(2, 0, 8, true);
        assert_eq!(pool.size(), 2);

        pool.exit();
    }

    #[test]
    fn test_min_split_depth_auto_pick() {
        let pool = quiet_pool(2);
        assert_eq!(pool.min_split_depth(), 4 * ONE_PLY);

        pool.read_uci_options(8, 0, 8, true);
        assert_eq!(pool.min_split_depth(), 7 * ONE_PLY);

        // Explicit values are clamped from below.
        pool.read_uci_options(8, 2, 8, true);
        assert_eq!(pool.min_split_depth(), 4 * ONE_PLY);
        pool.read_uci_options(8, 6, 8, true);
        assert_eq!(pool.min_split_depth(), 6 * ONE_PLY);

        pool.exit();
    }

    #[test]
    fn test_helpful_master_rule() {
        let pool = quiet_pool(3);
        let w1 = pool.worker(1);

        // Idle thread with no split points helps anyone.
        assert!(w1.is_available_to(0));

        // Give w1 an open split whose slaves include thread 2 only.
        unsafe {
            let sps = &mut *w1.split_points_ptr();
            sps[0].master = 1;
            sps[0].shared.lock().unwrap().slaves_mask = (1 << 1) | (1 << 2);
        }
        w1.splits.store(1, Ordering::Release);

        assert!(w1.is_available_to(2), "may help a slave of its own split");
        assert!(!w1.is_available_to(0), "must not help an unrelated master");

        w1.splits.store(0, Ordering::Release);
        unsafe {
            (&mut *w1.split_points_ptr())[0].shared.lock().unwrap().slaves_mask = 0;
        }
        pool.exit();
    }

    #[test]
    fn test_fake_split_runs_whole_protocol_single_threaded() {
        let pool = quiet_pool(1);
        let worker = pool.main_worker();
        let pos = Position::from_fen(
            "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
        )
        .unwrap();

        worker.searching.store(true, Ordering::SeqCst);

        let ss = Stack::new();
        let mut mp = MovePicker::new(&pos, true, Move::NULL, &ss, 4, None);
        // Pull one move: young brothers wait for the first move.
        let first = mp.get_next_move();
        assert_ne!(first, Move::NULL);

        let mut best_value = -100;
        let mut best_move = Move::NULL;
        let mut nodes = 0u64;

        split::<true>(
            &pool, &worker, &pos, &mut mp, &ss, 2, -100, 100, &mut best_value,
            &mut best_move, 4, Move::NULL, 1, NodeType::NonPv, false, &mut nodes,
        );

        // The fake split searched every remaining move on this thread.
        assert!(mp.is_finished());
        assert_ne!(best_move, Move::NULL);
        assert!(best_value > -100);
        assert!(nodes > 0);
        assert_eq!(worker.splits_size(), 0);
        assert!(worker.searching.load(Ordering::Acquire));
        assert_eq!(pool.splits_done(), 1);

        worker.searching.store(false, Ordering::SeqCst);
        pool.exit();
    }

    #[test]
    fn test_split_node_accounting_folds_into_master() {
        let pool = quiet_pool(1);
        let worker = pool.main_worker();
        let pos = Position::from_fen(
            "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
        )
        .unwrap();

        worker.searching.store(true, Ordering::SeqCst);

        let ss = Stack::new();
        let mut mp = MovePicker::new(&pos, true, Move::NULL, &ss, 4, None);
        let _ = mp.get_next_move();

        let mut best_value = -100;
        let mut best_move = Move::NULL;
        let mut nodes = 123u64; // pre-existing node count of the caller

        split::<true>(
            &pool, &worker, &pos, &mut mp, &ss, 2, -100, 100, &mut best_value,
            &mut best_move, 4, Move::NULL, 1, NodeType::NonPv, false, &mut nodes,
        );

        // Everything searched below the split accumulated in the split
        // point's node counter and was folded back into the caller verbatim.
        let sp_nodes = unsafe {
            (*worker.split_points_ptr())[0].shared.lock().unwrap().nodes
        };
        assert!(sp_nodes > 0);
        assert_eq!(nodes, 123 + sp_nodes);

        worker.searching.store(false, Ordering::SeqCst);
        pool.exit();
    }

    #[test]
    fn test_no_deadlock_under_interleaved_splits_and_stops() {
        let pool = quiet_pool(4);
        let fens = [
            "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1",
        ];

        // An outside thread hammers the recruitment path (pool mutex plus
        // split-point mutexes) while searches split and get cancelled at
        // shifting points of their schedule. The test terminating is the
        // property: no interleaving of split, is_available_to and stop may
        // wedge the pool.
        let probing = Arc::new(AtomicBool::new(true));
        let prober = {
            let pool = pool.clone();
            let probing = probing.clone();
            let main = pool.main_worker();
            std::thread::spawn(move || {
                while probing.load(Ordering::Acquire) {
                    let _ = pool.slave_available(&main);
                    std::thread::yield_now();
                }
            })
        };

        for (i, fen) in fens.iter().enumerate() {
            let pos = Position::from_fen(fen).unwrap();
            pool.start_thinking(pos, 6, TimeManager::infinite(), 1);
            if i % 2 == 0 {
                std::thread::sleep(Duration::from_millis(3 * i as u64 + 1));
                pool.request_stop();
            }
            pool.wait_for_think_finished();

            for idx in 0..pool.size() {
                assert_eq!(pool.worker(idx).splits_size(), 0);
            }
        }

        probing.store(false, Ordering::Release);
        let _ = prober.join();
        pool.exit();
    }

    #[test]
    fn test_parallel_search_opens_split_points() {
        let pool = quiet_pool(4);
        let pos = Position::from_fen(
            "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
        )
        .unwrap();

        pool.start_thinking(pos, 7, TimeManager::infinite(), 1);
        pool.wait_for_think_finished();

        assert!(pool.splits_done() > 0, "depth 7 with 4 threads must split");

        // Everything is quiet again: no open splits, no searching slaves.
        for idx in 0..pool.size() {
            let w = pool.worker(idx);
            assert_eq!(w.splits_size(), 0);
            assert!(!w.searching.load(Ordering::Acquire));
        }

        pool.exit();
    }

    #[test]
    fn test_stop_cancels_infinite_search() {
        let pool = quiet_pool(2);
        let pos = Position::startpos();

        pool.start_thinking(pos, crate::search::alphabeta::MAX_PLY - 8, TimeManager::infinite(), 1);
        std::thread::sleep(Duration::from_millis(50));
        pool.request_stop();
        pool.wait_for_think_finished();

        assert!(!pool.thinking());
        pool.exit();
    }
}
