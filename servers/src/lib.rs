//! Network-facing services built on `lib_common`.

pub mod realtime_logic;
