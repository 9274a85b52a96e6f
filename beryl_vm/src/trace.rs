//! Pluggable trace sink.
//!
//! The trace opcode hands its three operand fields to whatever sink the
//! host installed; the default writes a line to standard output. Tests
//! install a recording sink instead of scraping stdout.

/// Receiver for trace-opcode events.
pub trait TraceSink: Send {
    fn debug(&mut self, a: u32, b: u32, c: u32);
}

/// Default sink: one line per event on stdout.
pub struct StdoutTrace;

impl TraceSink for StdoutTrace {
    fn debug(&mut self, a: u32, b: u32, c: u32) {
        println!("debug {} {} {}", a, b, c);
    }
}

/// Sink that drops everything.
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn debug(&mut self, _a: u32, _b: u32, _c: u32) {}
}
