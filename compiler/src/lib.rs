// rcc — Reactive Channel Compiler
//
// Compiles a reactive robot-control program, described as a graph of typed
// signal combinators, into one freestanding C source file for an embedded
// controller. The description runs once on the host and only builds IR;
// the optimizer collapses the graph; the emitter linearizes it.

pub mod action;
pub mod catalog;
pub mod channel;
pub mod codegen;
pub mod context;
pub mod drive;
pub mod hal;
pub mod id;
pub mod ir;
pub mod opt;
pub mod pipeline;
pub mod timer;
