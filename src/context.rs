//! Stack-switching primitives.
//!
//! Each [`crate::task::Task`] owns a private [`Stack`] and a [`Context`]
//! (a thin wrapper around POSIX `ucontext_t`). Switching between a task and
//! its worker's scheduler context is a symmetric [`swap`] — there is no
//! notion of "caller"/"callee", just two saved machine states trading
//! places, exactly as `swapcontext(3)` provides.
//!
//! # The trampoline-argument trick
//!
//! The obvious way to start a new context is `makecontext(ctx, f, argc,
//! ...)`, passing the task pointer as one of the varargs. This is what the
//! C implementation this crate is modeled on did not trust: `makecontext`'s
//! variadic argument passing is ABI-specific (pointers are sometimes split
//! across two `int`-sized slots) and genuinely unsafe to rely on across
//! platforms. Instead, the original re-reads "the task that's currently
//! running" from a thread-local set by the dispatcher immediately before
//! the switch-in, and the trampoline trusts *that*, not whatever
//! `makecontext` handed it. This module does the same: [`make`] always
//! calls `makecontext` with zero trampoline arguments, and
//! [`crate::current::with_current_task`] is how the trampoline finds out
//! what to run.
use std::io;
use std::mem::MaybeUninit;
use std::ptr;

use crate::error::{Error, Result};

/// A task's private, heap-allocated call stack.
///
/// Freed on drop, mirroring the original's `FREE(task->stack)` in
/// `synctask_destroy`.
pub(crate) struct Stack {
    buf: Box<[u8]>,
}

impl Stack {
    pub(crate) fn new(size: usize) -> Result<Self> {
        // A plain boxed slice is enough: we don't need guard pages for a
        // cooperative scheduler whose tasks are written by us, not
        // untrusted code. Zeroing isn't required either, but it makes
        // stack-overflow symptoms (if they ever happen) a bit less
        // mysterious under a debugger.
        let buf = vec![0u8; size].into_boxed_slice();
        if buf.len() != size {
            return Err(Error::StackAlloc {
                size,
                source: io::Error::from(io::ErrorKind::OutOfMemory),
            });
        }
        Ok(Self { buf })
    }

    fn base_mut(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

/// A saved execution context: an instruction pointer, a stack pointer, and
/// the rest of the callee-saved machine state `ucontext_t` covers.
///
/// A context started via [`Context::new`] owns the [`Stack`] it runs on, so
/// the two can never be dropped out of the order that would leave a
/// dangling `uc_stack` pointer behind.
pub(crate) struct Context {
    raw: libc::ucontext_t,
    _stack: Option<Stack>,
}

impl Context {
    /// An empty context, suitable as the "scheduler" side of a worker's
    /// first swap (its real contents are filled in by that first
    /// `swapcontext` call, which saves the worker's current state into it).
    /// Carries no stack of its own — it runs on the worker's native thread
    /// stack.
    pub(crate) fn empty() -> Result<Self> {
        let mut raw = zeroed_ucontext();
        // SAFETY: `raw` is a valid, suitably sized `ucontext_t` for
        // `getcontext` to populate; it doesn't read from `raw` beforehand.
        if unsafe { libc::getcontext(&mut raw) } < 0 {
            return Err(Error::Context(io::Error::last_os_error()));
        }
        Ok(Self { raw, _stack: None })
    }

    /// A new context that, when first switched into, starts executing
    /// `trampoline` on a freshly allocated `stack_size`-byte stack and never
    /// returns (the trampoline is responsible for switching away
    /// explicitly; there is no caller to return to).
    pub(crate) fn new(stack_size: usize, trampoline: extern "C" fn()) -> Result<Self> {
        let mut stack = Stack::new(stack_size)?;
        let mut raw = zeroed_ucontext();
        // SAFETY: see `empty`.
        if unsafe { libc::getcontext(&mut raw) } < 0 {
            return Err(Error::Context(io::Error::last_os_error()));
        }
        raw.uc_stack.ss_sp = stack.base_mut() as *mut _;
        raw.uc_stack.ss_size = stack.len();
        raw.uc_stack.ss_flags = 0;
        raw.uc_link = ptr::null_mut();
        // SAFETY: `raw` was just initialized by `getcontext` and given a
        // valid stack above. Zero varargs are passed, sidestepping the
        // ABI-specific pointer-in-varargs hazard described in the module
        // docs; `trampoline` reads whatever it needs to run from
        // `crate::current`, not from an argument.
        unsafe { libc::makecontext(&mut raw, trampoline, 0) };
        Ok(Self {
            raw,
            _stack: Some(stack),
        })
    }

    fn as_mut_ptr(&mut self) -> *mut libc::ucontext_t {
        &mut self.raw
    }

    fn as_ptr(&self) -> *const libc::ucontext_t {
        &self.raw
    }
}

fn zeroed_ucontext() -> libc::ucontext_t {
    // `ucontext_t` is a plain-old-data FFI struct; all-zeroes is a valid
    // (if meaningless until populated) bit pattern for it on every target
    // this crate supports.
    unsafe { MaybeUninit::zeroed().assume_init() }
}

/// Save the caller's machine state into `from` and load `to`'s, symmetric
/// and mutual: the next time *something* swaps back into `from`, execution
/// resumes right after this call, as though it were an ordinary function
/// return.
///
/// # Safety
///
/// `from` and `to` must not be the same context, both must have been
/// produced by [`Context::empty`]/[`Context::new`], and `to` must still be
/// valid (not belong to an already-destroyed task). The calling thread must
/// not be holding any lock that a third thread would need in order to make
/// progress and eventually switch back to `from` — the whole point of a
/// cooperative swap is that this thread is now running someone else's code.
pub(crate) unsafe fn swap(from: &mut Context, to: &Context) -> Result<()> {
    if libc::swapcontext(from.as_mut_ptr(), to.as_ptr()) < 0 {
        return Err(Error::Context(io::Error::last_os_error()));
    }
    Ok(())
}
