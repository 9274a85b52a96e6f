//! Call frames.
//!
//! A frame (call info) is pushed on method entry and popped on return.
//! It records the identity of the invocation and everything needed to
//! resume the caller. Register bases are stored as absolute offsets into
//! the operand stack, never as pointers, so stack reallocation cannot
//! invalidate a frame.

use beryl_bytecode::Irep;
use beryl_core::object::ObjRef;
use beryl_core::Symbol;
use std::sync::Arc;

/// Initial operand-stack size in slots.
pub const STACK_INIT_SIZE: usize = 128;

/// Initial frame-stack capacity.
pub const CALLINFO_INIT_SIZE: usize = 32;

/// One invocation record.
pub struct Frame {
    /// Method name this frame was invoked under; `None` for class
    /// bodies and bare entry frames.
    pub mid: Option<Symbol>,

    /// The executing procedure object.
    pub proc: Option<ObjRef>,

    /// Cached compiled body of `proc`; `None` for native frames.
    pub irep: Option<Arc<Irep>>,

    /// Class the running method was defined in; `super` starts below it.
    pub target_class: ObjRef,

    /// Absolute offset of this frame's register base. Slot 0 is `self`.
    pub stackidx: usize,

    /// Register count allocated to this frame.
    pub nregs: usize,

    /// Argument count as passed; -1 means the caller packed the
    /// arguments into a single array (they exceeded the inline maximum).
    pub argc: i32,

    /// Caller register that receives the return value; -1 marks a host
    /// entry frame, which unwinds to the host instead.
    pub acc: i32,

    /// This frame's own instruction pointer (index into `irep.iseq`).
    /// While a callee runs, the value is already past the call
    /// instruction, so popping back simply resumes here.
    pub pc: usize,

    /// Rescue-stack watermark at frame entry.
    pub ridx: usize,

    /// Ensure-stack watermark at frame entry.
    pub eidx: usize,

    /// Heap environment for this frame, created lazily when a closure
    /// captures it.
    pub env: Option<ObjRef>,
}

impl Frame {
    /// A frame with everything but the unwind watermarks filled in; the
    /// watermarks are inherited from the current top when pushed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mid: Option<Symbol>,
        proc: Option<ObjRef>,
        irep: Option<Arc<Irep>>,
        target_class: ObjRef,
        stackidx: usize,
        nregs: usize,
        argc: i32,
        acc: i32,
    ) -> Frame {
        Frame {
            mid,
            proc,
            irep,
            target_class,
            stackidx,
            nregs,
            argc,
            acc,
            pc: 0,
            ridx: 0,
            eidx: 0,
            env: None,
        }
    }

    /// The permanent bottom frame; never popped.
    pub fn bottom(target_class: ObjRef) -> Frame {
        Frame::new(None, None, None, target_class, 0, 0, 0, -1)
    }

    /// Whether the caller packed the arguments into one array.
    #[inline]
    pub fn packed_args(&self) -> bool {
        self.argc < 0
    }
}
