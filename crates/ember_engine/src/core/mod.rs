//! Core engine services shared by every subsystem.

pub mod config;
