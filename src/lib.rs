//! Core of an assembler/disassembler toolkit for AMD Radeon GPU compute
//! binaries: legacy AMD OpenCL 1.x, AMD OpenCL 2.0, Gallium Compute, and
//! ROCm/HSACO containers.
//!
//! This crate is the shared front end and binary-container layer — the
//! lexer/macro substitutor, expression engine, symbol/section model, the
//! four format backends, and the two driver passes (`asm`/`disasm`) that
//! walk them. Per-architecture instruction encoding/decoding is an
//! external collaborator reached through the `isa` module's traits, not
//! implemented here.

pub mod asm;
pub mod config;
pub mod diag;
pub mod disasm;
pub mod elf;
pub mod expr;
pub mod format;
pub mod gpu;
pub mod isa;
pub mod lexer;
pub mod pos;
pub mod section;
pub mod symbol;

pub use asm::{AsmError, Assembler};
pub use config::{AsmConfig, AsmFlags, BinaryFormat, DriverVersion, ExitCode, Policy};
pub use disasm::{Disassembler, DisasmError};
pub use gpu::{GpuArchitecture, GpuDevice};
