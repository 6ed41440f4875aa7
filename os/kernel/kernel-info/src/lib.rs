//! # Paging Geometry and Address-Space Layout
//!
//! This crate is the single source of truth for the constants that the
//! page-table code and the huge-mapping engine agree on: how a virtual
//! address splits into table indices, how large each mapping granule is, and
//! where user mappings may be placed.
//!
//! ## Virtual Address Split
//!
//! A 48-bit virtual address is walked through four table levels, each holding
//! [`PTRS_PER_TABLE`](memory::PTRS_PER_TABLE) entries:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  P4D  |  PUD  |  PMD  |  PTE  | Offset |
//! ```
//!
//! The top level is the P4D table (the PGD level is folded into it). A PMD
//! entry either points to a PTE table or is itself a 2 MiB leaf.
//!
//! ## User Address-Space Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   unmappable (< mmap_min_addr)  │
//! DEFAULT_MMAP_MIN_ADDR ├─────────────────────────────────┤
//!                       │   top-down search window        │
//! TASK_UNMAPPED_BASE    ├ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┤ bottom-up search starts here
//!                       │                                 │
//! DEFAULT_MMAP_BASE     ├─────────────────────────────────┤ top-down search ends here
//!                       │   stack gap                     │
//! TASK_SIZE             └─────────────────────────────────┘
//! ```
//!
//! ### Design Principles
//! * **Fixed Layout**: Compile-time constants; runtime overrides go through
//!   the `MmapLayout` type of the paging crate.
//! * **Checked**: Compile-time assertions reject inconsistent layouts.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
