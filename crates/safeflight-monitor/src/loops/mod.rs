//! Long-running loops.

pub mod control_loop;
