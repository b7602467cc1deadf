//! Task encoding: how work items are laid out in the shared queue.
//!
//! Every task starts with a fixed-size [`TaskHeader`]: the function to call
//! and a signed tag. A negative tag is the bitwise complement of the length
//! of an inline payload that follows the header in the queue; a
//! non-negative tag is the address of a caller-owned payload, and nothing
//! follows the header. Header and inline payload are pushed with one
//! vectored push, so a consumer that sees a header always finds its whole
//! payload behind it.
//!
//! Inline payloads up to [`INLINE_CAPACITY`] bytes are decoded into an
//! aligned stack buffer. Larger ones are decoded into the consuming thread's
//! arena inside a checkpoint that is restored once the task has run, with a
//! heap buffer as the fallback when the arena is exhausted.

use std::alloc::Layout;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use kiln_arena::{Arena, ArenaState};
use kiln_ring::RingBuffer;

use crate::context::WorkerContext;

/// Signature of a task entry point: the payload pointer and the executing
/// thread's context.
///
/// For inline payloads the pointer addresses a private, 16-byte-aligned copy
/// of the submitted bytes, valid only for the duration of the call. For
/// pointer payloads it is the address that was submitted.
pub type RawTaskFn = unsafe fn(NonNull<u8>, &mut WorkerContext);

/// Work that can be shared by pointer instead of copied into the queue.
///
/// Used by [`add_arc`](crate::PoolHandle::add_arc) and
/// [`add_ptr`](crate::PoolHandle::add_ptr).
pub trait Task: Sync {
    /// Execute the task on the calling thread.
    fn run(&self, ctx: &mut WorkerContext);
}

/// Alignment guaranteed for decoded inline payloads.
pub const PAYLOAD_ALIGN: usize = 16;

/// Largest inline payload decoded onto the stack.
pub const INLINE_CAPACITY: usize = 128;

/// The shared task queue carries raw bytes of arbitrary values.
pub(crate) type TaskQueue = RingBuffer<MaybeUninit<u8>>;

/// Bytes occupied by a task header in the queue.
pub(crate) const HEADER_SIZE: usize = mem::size_of::<TaskHeader>();

#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct TaskHeader {
    run: RawTaskFn,
    tag: isize,
}

pub(crate) enum Tag {
    Inline(usize),
    Pointer(NonNull<u8>),
}

impl TaskHeader {
    pub(crate) fn inline(run: RawTaskFn, len: usize) -> Self {
        debug_assert!(len <= isize::MAX as usize);
        Self {
            run,
            tag: !(len as isize),
        }
    }

    pub(crate) fn pointer(run: RawTaskFn, payload: NonNull<u8>) -> Self {
        let addr = payload.as_ptr().expose_provenance();
        assert!(
            addr <= isize::MAX as usize,
            "task payload address does not fit the header tag"
        );
        Self {
            run,
            tag: addr as isize,
        }
    }

    pub(crate) fn encode(&self) -> [MaybeUninit<u8>; HEADER_SIZE] {
        let mut out = [MaybeUninit::uninit(); HEADER_SIZE];
        // SAFETY: `out` is exactly `HEADER_SIZE` bytes; the write is unaligned.
        unsafe { ptr::write_unaligned(out.as_mut_ptr().cast::<TaskHeader>(), *self) };
        out
    }

    /// # Safety
    ///
    /// `bytes` must have been produced by [`encode`](TaskHeader::encode)
    /// in this process.
    pub(crate) unsafe fn decode(bytes: &[MaybeUninit<u8>; HEADER_SIZE]) -> Self {
        // SAFETY: the caller guarantees the bytes are a valid header.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast::<TaskHeader>()) }
    }

    pub(crate) fn tag(&self) -> Tag {
        if self.tag < 0 {
            Tag::Inline(!self.tag as usize)
        } else {
            let p = ptr::with_exposed_provenance_mut::<u8>(self.tag as usize);
            // A pointer tag always comes from a `NonNull`; zero is never encoded.
            Tag::Pointer(NonNull::new(p).unwrap_or(NonNull::dangling()))
        }
    }
}

// ── Trampolines ──────────────────────────────────────────────────────

/// Entry point for a closure whose bytes were copied into the queue.
///
/// # Safety
///
/// `payload` must hold the bytes of an `F` moved in by `add`, aligned for
/// `F`, and must be read at most once.
pub(crate) unsafe fn call_closure<F>(payload: NonNull<u8>, ctx: &mut WorkerContext)
where
    F: FnOnce(&mut WorkerContext),
{
    // SAFETY: ownership of the closure moves out of the payload bytes here.
    let f = unsafe { payload.cast::<F>().as_ptr().read() };
    f(ctx);
}

/// Entry point for an `Arc<T>` leaked by `add_arc`.
///
/// # Safety
///
/// `payload` must come from `Arc::<T>::into_raw` and be consumed once.
pub(crate) unsafe fn call_arc<T: Task>(payload: NonNull<u8>, ctx: &mut WorkerContext) {
    // SAFETY: reclaims the strong count leaked at submission.
    let task = unsafe { Arc::from_raw(payload.cast::<T>().as_ptr()) };
    task.run(ctx);
}

/// Entry point for a borrowed task submitted by `add_ptr`.
///
/// # Safety
///
/// `payload` must point to a live `T` for the duration of the call.
pub(crate) unsafe fn call_ref<T: Task>(payload: NonNull<u8>, ctx: &mut WorkerContext) {
    // SAFETY: the submitter guarantees the task outlives its execution.
    let task = unsafe { payload.cast::<T>().as_ref() };
    task.run(ctx);
}

// ── Decoding ─────────────────────────────────────────────────────────

/// Stack buffer for small inline payloads.
#[repr(C, align(16))]
pub(crate) struct InlineBuf([MaybeUninit<u8>; INLINE_CAPACITY]);

impl InlineBuf {
    pub(crate) fn new() -> Self {
        Self([MaybeUninit::uninit(); INLINE_CAPACITY])
    }
}

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct HeapChunk([MaybeUninit<u8>; PAYLOAD_ALIGN]);

enum Payload {
    Inline,
    Scratch(NonNull<u8>, ArenaState),
    Heap(Vec<HeapChunk>),
    Pointer(NonNull<u8>),
}

/// A task removed from the queue, ready to run.
pub(crate) struct PoppedTask {
    run: RawTaskFn,
    payload: Payload,
}

impl PoppedTask {
    /// Dequeue one task.
    ///
    /// Small payloads land in `inline`; large ones in `arena` scratch (or
    /// on the heap if the arena is exhausted).
    ///
    /// # Safety
    ///
    /// The queue must be non-empty and contain only tasks pushed by this
    /// crate, each as one header-plus-payload unit.
    pub(crate) unsafe fn pop(queue: &mut TaskQueue, inline: &mut InlineBuf, arena: &Arena) -> Self {
        let mut raw = [MaybeUninit::uninit(); HEADER_SIZE];
        queue.pop_no_checks(&mut raw);
        // SAFETY: every unit in the queue starts with an encoded header.
        let header = unsafe { TaskHeader::decode(&raw) };
        let payload = match header.tag() {
            Tag::Inline(len) if len <= INLINE_CAPACITY => {
                queue.pop_no_checks(&mut inline.0[..len]);
                Payload::Inline
            }
            Tag::Inline(len) => {
                let state = arena.state_push();
                let scratch = Layout::from_size_align(len, PAYLOAD_ALIGN)
                    .ok()
                    .and_then(|layout| arena.alloc_layout(layout));
                match scratch {
                    Some(p) => {
                        // SAFETY: `p` spans `len` fresh bytes of arena scratch.
                        let dst = unsafe {
                            slice::from_raw_parts_mut(p.as_ptr().cast::<MaybeUninit<u8>>(), len)
                        };
                        queue.pop_no_checks(dst);
                        Payload::Scratch(p, state)
                    }
                    None => {
                        // SAFETY: nothing was allocated since the push.
                        unsafe { arena.state_restore(state) };
                        let mut chunks = vec![HeapChunk([MaybeUninit::uninit(); PAYLOAD_ALIGN]); len.div_ceil(PAYLOAD_ALIGN)];
                        // SAFETY: the chunks span at least `len` contiguous bytes.
                        let dst = unsafe {
                            slice::from_raw_parts_mut(chunks.as_mut_ptr().cast::<MaybeUninit<u8>>(), len)
                        };
                        queue.pop_no_checks(dst);
                        Payload::Heap(chunks)
                    }
                }
            }
            Tag::Pointer(p) => Payload::Pointer(p),
        };
        Self {
            run: header.run,
            payload,
        }
    }

    /// Whether the payload had to be decoded into heap memory.
    pub(crate) fn used_heap(&self) -> bool {
        matches!(self.payload, Payload::Heap(_))
    }

    /// Run the task, then release any arena scratch its payload used.
    ///
    /// `inline` must be the buffer passed to [`pop`](PoppedTask::pop). If
    /// the task panics, the scratch is still released before the panic
    /// resumes.
    pub(crate) fn run(mut self, inline: &mut InlineBuf, ctx: &mut WorkerContext) {
        let payload = match &mut self.payload {
            Payload::Inline => NonNull::from(&mut inline.0).cast::<u8>(),
            Payload::Scratch(p, _) | Payload::Pointer(p) => *p,
            Payload::Heap(chunks) => NonNull::from(chunks.as_mut_slice()).cast::<u8>(),
        };
        let guard = ScratchGuard {
            payload: self.payload,
            ctx,
        };
        // SAFETY: `payload` is the decoded form of what the submitter
        // encoded for `run`, and lives until the guard drops.
        unsafe { (self.run)(payload, &mut *guard.ctx) };
    }
}

/// Restores the scratch checkpoint of a large payload on every exit path.
struct ScratchGuard<'a> {
    payload: Payload,
    ctx: &'a mut WorkerContext,
}

impl Drop for ScratchGuard<'_> {
    fn drop(&mut self) {
        let payload = mem::replace(&mut self.payload, Payload::Inline);
        if let Payload::Scratch(_, state) = payload {
            // SAFETY: the task has returned (or unwound), so nothing
            // references its payload any more.
            unsafe { self.ctx.arena().state_restore(state) };
        }
    }
}
