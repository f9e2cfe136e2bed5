// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{fmt, mem::transmute, ptr};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
};

use bytemuck::Zeroable;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::{
    assert_fatal,
    collections::{FixedArray, PriorityQueue},
    debug_assert_fatal, fatal,
    memory::Allocator,
};

/// The maximum amount of live (added but not completed) tasks in a
/// [`TaskManager`].
pub const NUM_TASKS: usize = 128;
const SLOT_MASK: u32 = NUM_TASKS as u32 - 1;
/// Added to the id generator for every new task, so the slot bits are left
/// alone.
const ID_ADD: u32 = NUM_TASKS as u32;

/// Identifies a task of a [`TaskManager`].
///
/// The low 7 bits are the slot of the task, the rest are a generation
/// counter, so ids of completed tasks don't match the tasks that reuse their
/// slots.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TaskId(u32);

impl TaskId {
    /// Never issued by a [`TaskManager`].
    pub const NULL: TaskId = TaskId(0);

    pub fn is_null(self) -> bool {
        self == TaskId::NULL
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    fn slot(self) -> usize {
        (self.0 & SLOT_MASK) as usize
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({}:{})", self.0 >> ID_ADD.trailing_zeros(), self.slot())
    }
}

/// The work of a task: a function and an opaque data pointer it's called
/// with.
///
/// The function pointer is stored type-erased, along with a proxy function
/// that knows its real type and calls it.
#[derive(Clone, Copy)]
pub struct TaskWork {
    data: *mut (),
    func: *const (),
    proxy: Option<fn(*const (), TaskId, *mut ())>,
}

// Safety: the constructors require the data to be usable from any thread
// (either by the caller's guarantee in `new`, or with `T: Sync` in
// `from_static`).
unsafe impl Send for TaskWork {}

impl TaskWork {
    /// Work that does nothing. A task with empty work completes as soon as it
    /// is eligible, which makes it useful as a join point for children.
    pub const fn empty() -> TaskWork {
        TaskWork {
            data: ptr::null_mut(),
            func: ptr::null(),
            proxy: None,
        }
    }

    /// Work that calls `func(id, data)`.
    ///
    /// ### Safety
    ///
    /// `func` will be called on an arbitrary worker thread (or a thread
    /// calling [`TaskManager::wait`]), so whatever `data` points to must be
    /// safe to access from there, and must stay valid until the task has
    /// completed.
    pub unsafe fn new(data: *mut (), func: fn(TaskId, *mut ())) -> TaskWork {
        fn proxy(func: *const (), id: TaskId, data: *mut ()) {
            // Safety: `func` was cast from this exact function pointer type
            // in `TaskWork::new`.
            let func = unsafe { transmute::<*const (), fn(TaskId, *mut ())>(func) };
            func(id, data);
        }
        TaskWork {
            data,
            func: func as *const (),
            proxy: Some(proxy),
        }
    }

    /// Work that calls `func(id, data)` with shared data that outlives every
    /// task.
    pub fn from_static<T: Sync>(data: &'static T, func: fn(TaskId, &T)) -> TaskWork {
        fn proxy<T: Sync>(func: *const (), id: TaskId, data: *mut ()) {
            // Safety: `func` and `data` were cast from these exact types in
            // `TaskWork::from_static`, and the data is 'static and Sync.
            let func = unsafe { transmute::<*const (), fn(TaskId, &T)>(func) };
            let data = unsafe { &*data.cast_const().cast::<T>() };
            func(id, data);
        }
        TaskWork {
            data: ptr::from_ref(data).cast_mut().cast::<()>(),
            func: func as *const (),
            proxy: Some(proxy::<T>),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proxy.is_none()
    }

    fn run(self, id: TaskId) {
        if let Some(proxy) = self.proxy {
            proxy(self.func, id, self.data);
        }
    }
}

impl fmt::Debug for TaskWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWork")
            .field("data", &self.data)
            .field("func", &self.func)
            .finish()
    }
}

#[derive(Clone, Copy)]
struct Task {
    /// [`TaskId::NULL`] for free slots.
    id: TaskId,
    parent: TaskId,
    work: TaskWork,
    priority: u16,
    /// 1 for the task itself, plus 1 for each child that hasn't completed.
    num_incomplete: u32,
    held: bool,
}

impl Task {
    const FREE: Task = Task {
        id: TaskId::NULL,
        parent: TaskId::NULL,
        work: TaskWork::empty(),
        priority: 0,
        num_incomplete: 0,
        held: false,
    };
}

#[derive(Clone, Copy, Zeroable)]
struct ReadyTask {
    priority: u16,
    slot: u8,
}

crate::trivial_collection_values!(ReadyTask);

struct TaskState {
    tasks: [Task; NUM_TASKS],
    free_slots: FixedArray<u8, NUM_TASKS>,
    /// Tasks which are eligible to run: not held, and with every child
    /// completed. Each task is pushed here exactly once.
    ready: PriorityQueue<'static, ReadyTask>,
    id_gen: u32,
    shutdown: bool,
}

// Safety: the only non-Send parts are the TaskWorks, see their Send impl,
// and the ready queue's allocator reference, which is created from a
// `&'static (dyn Allocator + Sync)` in `TaskManager::new`.
unsafe impl Send for TaskState {}

struct Shared {
    state: Mutex<TaskState>,
    work_signal: Condvar,
}

/// Runs tasks on a fixed pool of worker threads, in priority order.
///
/// Tasks can be added held ([`TaskManager::add_hold`]), in which case they
/// don't run before [`TaskManager::end_hold`]. While a task is held, other
/// tasks can be attached to it as children with
/// [`TaskManager::set_parent`], and the parent doesn't run until all of them
/// have completed. [`TaskManager::wait`] runs tasks on the calling thread
/// until the awaited task has completed.
///
/// At most [`NUM_TASKS`] tasks can be live at a time.
pub struct TaskManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskManager {
    /// Creates a task manager with `worker_count` worker threads, named
    /// `tm-worker-<n>`. With zero workers, tasks only run inside
    /// [`TaskManager::wait`].
    pub fn new(worker_count: usize, allocator: &'static (dyn Allocator + Sync)) -> TaskManager {
        let mut free_slots = FixedArray::new();
        for slot in (0..NUM_TASKS as u8).rev() {
            free_slots.push_back(slot);
        }
        let mut ready = PriorityQueue::new(allocator, |a: &ReadyTask, b: &ReadyTask| {
            a.priority < b.priority
        });
        ready.reserve(NUM_TASKS);

        let shared = Arc::new(Shared {
            state: Mutex::new(TaskState {
                tasks: [Task::FREE; NUM_TASKS],
                free_slots,
                ready,
                id_gen: ID_ADD,
                shutdown: false,
            }),
            work_signal: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("tm-worker-{n}"))
                .spawn(move || {
                    trace!("worker started");
                    shared.execute_pending(TaskId::NULL);
                    trace!("worker stopped");
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => fatal!("failed to spawn task manager worker {n}: {err}"),
            }
        }
        debug!(worker_count, "task manager started");

        TaskManager { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Adds a task which is eligible to run immediately.
    pub fn add(&self, work: TaskWork, priority: u16) -> TaskId {
        let mut state = self.shared.state.lock();
        let slot = state.add_task(work, priority);
        state.tasks[slot].held = false;
        self.shared.queue(&mut state, slot);
        state.tasks[slot].id
    }

    /// Adds a task which doesn't run before [`TaskManager::end_hold`] is
    /// called for it.
    pub fn add_hold(&self, work: TaskWork, priority: u16) -> TaskId {
        let mut state = self.shared.state.lock();
        let slot = state.add_task(work, priority);
        state.tasks[slot].id
    }

    /// Adds a held task with no work, to be used as a parent.
    pub fn add_hold_empty(&self, priority: u16) -> TaskId {
        self.add_hold(TaskWork::empty(), priority)
    }

    /// Makes `parent` wait for `child` to complete before running.
    ///
    /// The parent must still be held. If the child has already completed,
    /// this does nothing.
    pub fn set_parent(&self, child: TaskId, parent: TaskId) {
        assert_fatal!(child != parent, "cannot make a task a child of itself");
        let mut state = self.shared.state.lock();
        let child_task = &state.tasks[child.slot()];
        if child.is_null() || child_task.id != child {
            trace!(?child, "set_parent: child does not exist or has completed");
            return;
        }
        assert_fatal!(child_task.parent.is_null(), "child task already has a parent");
        assert_fatal!(!parent.is_null(), "parent ID is invalid");

        let parent_task = &mut state.tasks[parent.slot()];
        assert_fatal!(parent_task.id == parent, "parent task does not exist");
        assert_fatal!(
            parent_task.held,
            "parent task must be held while children are attached to it",
        );
        parent_task.num_incomplete += 1;
        state.tasks[child.slot()].parent = parent;
    }

    /// Releases a held task. It runs once all of its children have
    /// completed.
    pub fn end_hold(&self, id: TaskId) {
        let mut state = self.shared.state.lock();
        let slot = id.slot();
        let task = &mut state.tasks[slot];
        assert_fatal!(!id.is_null() && task.id == id, "task ID is not valid");
        assert_fatal!(task.held, "task is not held");
        task.held = false;
        if task.num_incomplete == 1 {
            self.shared.queue(&mut state, slot);
        }
    }

    /// Runs pending tasks on the calling thread until the task has
    /// completed. Returns immediately for tasks that have already completed.
    pub fn wait(&self, id: TaskId) {
        debug_assert_fatal!(!id.is_null(), "attempted to wait on the null task ID");
        self.shared.execute_pending(id);
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            let live_tasks = NUM_TASKS - state.free_slots.len();
            if live_tasks > 0 {
                warn!(live_tasks, "task manager dropped with incomplete tasks");
            }
            self.shared.work_signal.notify_all();
        }
        for worker in self.workers.drain(..) {
            // Task panics abort the process, so workers don't panic.
            let _ = worker.join();
        }
        debug!("task manager stopped");
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("worker_count", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl TaskState {
    /// Claims a slot for a new held task and returns it.
    fn add_task(&mut self, work: TaskWork, priority: u16) -> usize {
        let Some(slot) = self.free_slots.pop_back() else {
            fatal!("cannot add task to full task manager ({NUM_TASKS} tasks)");
        };
        let slot = slot as usize;
        let id = TaskId(self.id_gen | slot as u32);
        self.id_gen = self.id_gen.wrapping_add(ID_ADD).max(ID_ADD);
        self.tasks[slot] = Task {
            id,
            parent: TaskId::NULL,
            work,
            priority,
            num_incomplete: 1,
            held: true,
        };
        trace!(?id, priority, "added task");
        id.slot()
    }

    fn is_complete(&self, id: TaskId) -> bool {
        self.tasks[id.slot()].id != id
    }
}

impl Shared {
    fn queue(&self, state: &mut TaskState, slot: usize) {
        let priority = state.tasks[slot].priority;
        state.ready.push(ReadyTask {
            priority,
            slot: slot as u8,
        });
        self.work_signal.notify_all();
    }

    /// Frees the task's slot and notifies its parent.
    fn complete(&self, state: &mut TaskState, slot: usize) {
        let task = state.tasks[slot];
        trace!(id = ?task.id, "completed task");
        state.tasks[slot] = Task::FREE;
        state.free_slots.push_back(slot as u8);

        if !task.parent.is_null() {
            let parent_slot = task.parent.slot();
            let parent = &mut state.tasks[parent_slot];
            debug_assert_fatal!(parent.id == task.parent, "parent completed before its child");
            parent.num_incomplete -= 1;
            if parent.num_incomplete == 1 && !parent.held {
                self.queue(state, parent_slot);
            }
        }
        self.work_signal.notify_all();
    }

    /// Runs ready tasks until `wait_id` has completed, or, for
    /// [`TaskId::NULL`], until the manager shuts down.
    fn execute_pending(&self, wait_id: TaskId) {
        let mut state = self.state.lock();
        loop {
            if !wait_id.is_null() && state.is_complete(wait_id) {
                return;
            }
            if state.shutdown {
                return;
            }
            if let Some(ready) = state.ready.pop() {
                let slot = ready.slot as usize;
                let Task { id, work, .. } = state.tasks[slot];
                if !work.is_empty() {
                    // The id and work of a queued task aren't modified until
                    // it's completed below, so they can be used unlocked.
                    MutexGuard::unlocked(&mut state, || run_task(id, work));
                }
                self.complete(&mut state, slot);
                continue;
            }
            self.work_signal.wait(&mut state);
        }
    }
}

fn run_task(id: TaskId, work: TaskWork) {
    trace!(?id, "running task");
    if catch_unwind(AssertUnwindSafe(|| work.run(id))).is_err() {
        fatal!("task {id:?} panicked");
    }
}
