//! Process table and process records.
//!
//! A fixed 32-slot table; the pid *is* the table index. Slot 0 belongs to
//! the boot thread, which doubles as the idle task. Lifecycle:
//! Free → Ready → Running → Terminated → Free, with the final transition
//! performed by the parent's `waitpid` reclaim.
//!
//! Blocking waits do not get their own state: a waiting process stays
//! `Ready` and re-checks its condition each time the round-robin rotation
//! hands it the CPU. That keeps the scheduler a pure rotation and makes the
//! fairness property trivial to reason about.

pub mod exec;
pub mod sched;

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use zenith_core::PhysAddr;

/// Number of process table slots.
pub const MAX_PROCESSES: usize = 32;

/// Capacity of each child-I/O byte queue.
pub const CHILD_IO_CAPACITY: usize = 4096;

/// Inline argv buffer size.
pub const ARGV_CAPACITY: usize = 256;

/// Lifecycle state of a table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Slot unused.
    Free,
    /// Runnable; will get the CPU on its next rotation.
    Ready,
    /// Currently executing.
    Running,
    /// Exited; waiting for the parent to reclaim the slot.
    Terminated,
}

/// Saved kernel execution context: the stack pointer under which
/// `switch_context` parked the callee-saved registers and resume address.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Context {
    /// Kernel stack pointer at the moment of the switch.
    pub rsp: u64,
}

/// Redirected-I/O queues for children spawned via `SYS_SPAWN_REDIR`.
pub struct ChildIo {
    /// Bytes the child wrote to its stdout, drained by the parent.
    pub stdout: VecDeque<u8>,
    /// Key events the parent injected for the child to read.
    pub stdin_keys: VecDeque<crate::input::KeyEvent>,
    /// Terminal size the child should report, `(cols, rows)`.
    pub term_size: (u32, u32),
}

impl ChildIo {
    /// Creates empty queues with an 80×25 default terminal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout: VecDeque::new(),
            stdin_keys: VecDeque::new(),
            term_size: (80, 25),
        }
    }

    /// Appends to the child's stdout, dropping the oldest bytes at capacity.
    pub fn push_stdout(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.stdout.len() == CHILD_IO_CAPACITY {
                self.stdout.pop_front();
            }
            self.stdout.push_back(byte);
        }
    }
}

impl Default for ChildIo {
    fn default() -> Self {
        Self::new()
    }
}

/// One process record.
pub struct Process {
    /// Table index; assigned at spawn.
    pub pid: u32,
    /// Parent pid (0 for children of the kernel).
    pub parent: u32,
    /// Lifecycle state.
    pub state: ProcState,
    /// Program name (last path component).
    pub name: heapless::String<64>,
    /// Physical address of this process's PML4.
    pub pml4: PhysAddr,
    /// Saved kernel context while not running.
    pub context: Context,
    /// The kernel stack backing syscalls and interrupts for this process.
    /// `None` for the boot thread, which runs on the boot stack.
    pub kernel_stack: Option<Box<[u8]>>,
    /// Top of the kernel stack (loaded into TSS.rsp0 when scheduled).
    pub kernel_stack_top: u64,
    /// User-mode entry point (ELF entry).
    pub entry: u64,
    /// Initial user stack pointer.
    pub user_stack_top: u64,
    /// Next free page in the user heap region; grows monotonically.
    pub heap_next: u64,
    /// Inline argv blob (NUL-separated arguments).
    pub argv: heapless::Vec<u8, ARGV_CAPACITY>,
    /// User virtual address of the argv blob, once mapped.
    pub argv_user_ptr: u64,
    /// Exit code recorded at termination.
    pub exit_code: i32,
    /// Present when the process was spawned with redirected I/O.
    pub child_io: Option<ChildIo>,
    /// Framebuffer user mapping address (0 = not mapped).
    pub fb_user_base: u64,
}

impl Process {
    /// Creates a record in the `Ready` state.
    #[must_use]
    pub fn new(pid: u32, parent: u32, name: &str, pml4: PhysAddr) -> Self {
        let mut stored_name = heapless::String::new();
        for ch in name.chars() {
            if stored_name.push(ch).is_err() {
                break;
            }
        }
        Self {
            pid,
            parent,
            state: ProcState::Ready,
            name: stored_name,
            pml4,
            context: Context::default(),
            kernel_stack: None,
            kernel_stack_top: 0,
            entry: 0,
            user_stack_top: 0,
            heap_next: crate::mm::layout::USER_HEAP_BASE,
            argv: heapless::Vec::new(),
            argv_user_ptr: 0,
            exit_code: 0,
            child_io: None,
            fb_user_base: 0,
        }
    }

    /// Stores the argv blob: arguments separated (and terminated) by NUL.
    pub fn set_argv(&mut self, args: &str) {
        self.argv.clear();
        for &byte in args.as_bytes().iter().take(ARGV_CAPACITY - 1) {
            let _ = self.argv.push(byte);
        }
        let _ = self.argv.push(0);
    }
}

/// The fixed process table.
pub struct ProcessTable {
    slots: [Option<Process>; MAX_PROCESSES],
}

impl ProcessTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PROCESSES],
        }
    }

    /// Inserts a process into the lowest free slot, assigning its pid.
    ///
    /// Returns the pid, or `None` when the table is full.
    pub fn insert(&mut self, mut process: Process) -> Option<u32> {
        let slot = self.slots.iter().position(Option::is_none)?;
        process.pid = slot as u32;
        let pid = process.pid;
        self.slots[slot] = Some(process);
        Some(pid)
    }

    /// Borrow a process by pid.
    #[must_use]
    pub fn get(&self, pid: u32) -> Option<&Process> {
        self.slots.get(pid as usize).and_then(Option::as_ref)
    }

    /// Mutably borrow a process by pid.
    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Process> {
        self.slots.get_mut(pid as usize).and_then(Option::as_mut)
    }

    /// Frees a slot outright.
    pub fn remove(&mut self, pid: u32) -> Option<Process> {
        self.slots.get_mut(pid as usize).and_then(Option::take)
    }

    /// Visits every live process.
    pub fn for_each(&self, mut f: impl FnMut(&Process)) {
        for process in self.slots.iter().flatten() {
            f(process);
        }
    }

    /// Round-robin selection: the first `Ready` slot strictly after
    /// `current`, wrapping, falling back to `current` itself if it is the
    /// only runnable process.
    #[must_use]
    pub fn pick_next(&self, current: usize) -> Option<usize> {
        for offset in 1..=MAX_PROCESSES {
            let candidate = (current + offset) % MAX_PROCESSES;
            let runnable = self.slots[candidate].as_ref().is_some_and(|p| {
                p.state == ProcState::Ready
                    || (candidate == current && p.state == ProcState::Running)
            });
            if runnable {
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(name: &str) -> Process {
        Process::new(0, 0, name, PhysAddr::new(0x1000))
    }

    #[test]
    fn insert_assigns_lowest_free_pid() {
        let mut table = ProcessTable::new();
        assert_eq!(table.insert(ready("idle")), Some(0));
        assert_eq!(table.insert(ready("init")), Some(1));
        assert_eq!(table.insert(ready("shell")), Some(2));

        table.remove(1);
        assert_eq!(table.insert(ready("reuse")), Some(1));
    }

    #[test]
    fn table_fills_up() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            assert!(table.insert(ready("p")).is_some());
        }
        assert!(table.insert(ready("overflow")).is_none());
    }

    #[test]
    fn round_robin_rotates_through_ready() {
        let mut table = ProcessTable::new();
        for _ in 0..4 {
            table.insert(ready("p")).unwrap();
        }
        // 0 is Running (current), rest Ready.
        table.get_mut(0).unwrap().state = ProcState::Running;

        assert_eq!(table.pick_next(0), Some(1));
        assert_eq!(table.pick_next(1), Some(2));
        assert_eq!(table.pick_next(2), Some(3));
        // Wraps over Running slot 0 back to 1... unless 0 is Ready again.
        assert_eq!(table.pick_next(3), Some(1));
    }

    #[test]
    fn rotation_skips_terminated_and_free() {
        let mut table = ProcessTable::new();
        for _ in 0..4 {
            table.insert(ready("p")).unwrap();
        }
        table.get_mut(1).unwrap().state = ProcState::Terminated;
        table.remove(2);

        assert_eq!(table.pick_next(0), Some(3));
    }

    #[test]
    fn sole_running_process_keeps_cpu() {
        let mut table = ProcessTable::new();
        table.insert(ready("only")).unwrap();
        table.get_mut(0).unwrap().state = ProcState::Running;
        assert_eq!(table.pick_next(0), Some(0));
    }

    #[test]
    fn no_runnable_process_yields_none() {
        let mut table = ProcessTable::new();
        table.insert(ready("dead")).unwrap();
        table.get_mut(0).unwrap().state = ProcState::Terminated;
        assert_eq!(table.pick_next(0), None);
    }

    #[test]
    fn fairness_over_k_ticks() {
        // With k runnable processes, each runs at least once per k rotations.
        let mut table = ProcessTable::new();
        const K: usize = 5;
        for _ in 0..K {
            table.insert(ready("p")).unwrap();
        }

        let mut current = 0;
        let mut seen = [0u32; K];
        for _ in 0..K {
            current = table.pick_next(current).unwrap();
            seen[current] += 1;
        }
        assert!(seen.iter().all(|&count| count >= 1), "rotation missed a process: {seen:?}");
    }

    #[test]
    fn argv_blob_is_nul_terminated_and_bounded() {
        let mut process = ready("args");
        process.set_argv("hello world");
        assert_eq!(process.argv.as_slice(), b"hello world\0");

        let long = "x".repeat(400);
        process.set_argv(&long);
        assert_eq!(process.argv.len(), ARGV_CAPACITY);
        assert_eq!(*process.argv.last().unwrap(), 0);
    }

    #[test]
    fn child_io_bounded() {
        let mut io = ChildIo::new();
        io.push_stdout(&[1; CHILD_IO_CAPACITY]);
        io.push_stdout(b"xy");
        assert_eq!(io.stdout.len(), CHILD_IO_CAPACITY);
        assert_eq!(io.stdout[CHILD_IO_CAPACITY - 1], b'y');
    }
}
