//! Multi-processor tests: each test thread plays one processor by setting a
//! thread-local processor index.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;

use percpu_slab_allocator::{AllocError, CpuIdProvider, ObjectAllocator, ReleasePolicy};

const SLAB_SIZE: usize = 0x1000;
const CPUS: usize = 4;

thread_local! {
    static CURRENT_CPU: Cell<usize> = const { Cell::new(0) };
}

struct ThreadCpu;

impl CpuIdProvider for ThreadCpu {
    fn current_cpu() -> usize {
        CURRENT_CPU.with(|cpu| cpu.get())
    }
}

fn run_on(cpu: usize) {
    CURRENT_CPU.with(|current| current.set(cpu));
}

type SmpAllocator = ObjectAllocator<ThreadCpu, CPUS, SLAB_SIZE>;

struct TestWindow {
    base: *mut u8,
    layout: Layout,
}

// SAFETY: the window is only read (address and size) from other threads.
unsafe impl Sync for TestWindow {}

impl TestWindow {
    fn new(slabs: usize) -> Self {
        let layout = Layout::from_size_align(slabs * SLAB_SIZE, SLAB_SIZE).unwrap();
        let base = unsafe { alloc(layout) };
        assert!(!base.is_null(), "Failed to allocate test window");
        Self { base, layout }
    }

    fn addr(&self) -> usize {
        self.base as usize
    }

    fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for TestWindow {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

#[test]
fn test_processors_use_separate_cells() {
    let window = TestWindow::new(4);
    let allocator = SmpAllocator::new();
    allocator.init(window.addr(), window.size()).unwrap();

    run_on(0);
    let p0 = allocator.allocate(16);
    run_on(1);
    let p1 = allocator.allocate(16);

    assert!(!p0.is_null() && !p1.is_null());
    assert_eq!(allocator.slab_count(0, 16), Ok(1));
    assert_eq!(allocator.slab_count(1, 16), Ok(1));
    assert_eq!(allocator.reserved_slabs(), 2);

    // Same-processor reuse still holds on processor 1.
    unsafe { allocator.release(p1) };
    assert_eq!(allocator.allocate(16), p1);
}

#[test]
fn test_release_returns_to_owning_cell() {
    let window = TestWindow::new(2);
    let allocator = SmpAllocator::new();
    allocator.init(window.addr(), window.size()).unwrap();

    run_on(2);
    let ptr = allocator.allocate(8);
    run_on(3);
    unsafe { allocator.release(ptr) };

    assert_eq!(allocator.free_count(2, 8), Ok(1));
    assert_eq!(allocator.free_count(3, 8), Ok(0));

    run_on(2);
    assert_eq!(allocator.allocate(8), ptr);
}

#[test]
fn test_current_cpu_policy_migrates_objects() {
    let window = TestWindow::new(2);
    let allocator = SmpAllocator::with_release_policy(ReleasePolicy::CurrentCpu);
    allocator.init(window.addr(), window.size()).unwrap();

    run_on(0);
    let ptr = allocator.allocate(8);
    run_on(1);
    unsafe { allocator.release(ptr) };

    assert_eq!(allocator.free_count(0, 8), Ok(0));
    assert_eq!(allocator.free_count(1, 8), Ok(1));

    // Processor 1 now owns it, without touching the window.
    assert_eq!(allocator.allocate(8), ptr);
    assert_eq!(allocator.reserved_slabs(), 1);
    unsafe { allocator.release(ptr) };
    assert_eq!(allocator.free_count(1, 8), Ok(1));
}

#[test]
fn test_concurrent_allocations_do_not_overlap() {
    const ROUNDS: usize = 2000;
    let window = TestWindow::new(256);
    let allocator = SmpAllocator::new();
    allocator.init(window.addr(), window.size()).unwrap();

    let live: Vec<Vec<(usize, usize)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CPUS)
            .map(|cpu| {
                let allocator = &allocator;
                scope.spawn(move || {
                    run_on(cpu);
                    let mut live = Vec::new();
                    for round in 0..ROUNDS {
                        let size = round % 32 + 1;
                        let ptr = allocator.allocate(size);
                        assert!(!ptr.is_null());
                        unsafe { ptr.write_bytes(cpu as u8, size) };
                        live.push((ptr as usize, size));

                        if round % 3 == 0 {
                            let (old, old_size) = live.swap_remove(round % live.len());
                            let bytes =
                                unsafe { std::slice::from_raw_parts(old as *const u8, old_size) };
                            assert!(bytes.iter().all(|&b| b == cpu as u8));
                            unsafe { allocator.release(old as *mut u8) };
                        }
                    }
                    live
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut seen = HashSet::new();
    for (cpu, objs) in live.iter().enumerate() {
        for &(addr, size) in objs {
            assert!(seen.insert(addr), "object {:#x} handed out twice", addr);
            let bytes = unsafe { std::slice::from_raw_parts(addr as *const u8, size) };
            assert!(bytes.iter().all(|&b| b == cpu as u8));
        }
    }
}

#[test]
fn test_cross_processor_release_under_contention() {
    const OBJECTS: usize = 1000;
    let window = TestWindow::new(64);
    let allocator = SmpAllocator::new();
    allocator.init(window.addr(), window.size()).unwrap();

    run_on(0);
    let ptrs: Vec<usize> = (0..OBJECTS)
        .map(|_| allocator.allocate(12) as usize)
        .collect();
    assert!(ptrs.iter().all(|&p| p != 0));

    thread::scope(|scope| {
        for (cpu, chunk) in ptrs.chunks(OBJECTS / CPUS).enumerate() {
            let allocator = &allocator;
            scope.spawn(move || {
                run_on(cpu);
                for &ptr in chunk {
                    unsafe { allocator.try_release(ptr as *mut u8).unwrap() };
                }
            });
        }
    });

    assert_eq!(allocator.free_count(0, 12), Ok(OBJECTS));
    for cpu in 1..CPUS {
        assert_eq!(allocator.free_count(cpu, 12), Ok(0));
    }
}

#[test]
fn test_concurrent_init_sets_window_once() {
    let window = TestWindow::new(CPUS * 2);
    let allocator = SmpAllocator::new();
    let barrier = Barrier::new(CPUS);

    let results: Vec<(Result<(), AllocError>, usize)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CPUS)
            .map(|cpu| {
                let (allocator, barrier, window) = (&allocator, &barrier, &window);
                scope.spawn(move || {
                    run_on(cpu);
                    barrier.wait();
                    let init = allocator.init(window.addr(), window.size());
                    // Every processor allocates as soon as any init has finished.
                    while !allocator.is_initialized() {
                        std::hint::spin_loop();
                    }
                    (init, allocator.allocate(32) as usize)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|(init, _)| init.is_ok()).count();
    assert_eq!(winners, 1);
    for (init, _) in &results {
        if let Err(e) = init {
            assert_eq!(*e, AllocError::InvalidParam);
        }
    }

    // A losing init must not rewind the cursor: each processor got its own slab.
    let slabs: HashSet<usize> = results.iter().map(|&(_, ptr)| ptr / SLAB_SIZE).collect();
    assert!(results.iter().all(|&(_, ptr)| ptr != 0));
    assert_eq!(slabs.len(), CPUS);
    assert_eq!(allocator.reserved_slabs(), CPUS);

    assert_eq!(
        allocator.init(window.addr(), window.size()),
        Err(AllocError::InvalidParam)
    );
    assert_eq!(allocator.reserved_slabs(), CPUS);
}
