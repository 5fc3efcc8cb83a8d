//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod app;
pub mod naming;
pub mod push;
pub mod retry;
pub mod staging;
