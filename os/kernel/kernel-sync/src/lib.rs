//! # Kernel synchronization primitives
//!
//! A test-and-test-and-set [`SpinLock`] with RAII guards. Page-table pages
//! each carry one of these; code that must hold two of them at once (moving
//! a mapping between two tables) takes the second one through
//! [`SpinLock::lock_nested`], which only accepts a guard of an already-held
//! lock. That keeps the acquisition order (primary first, nested second)
//! visible in the types.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
