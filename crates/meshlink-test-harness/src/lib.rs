//! meshlink-test-harness: Mock transports for deterministic testing of the
//! protocol engine without real radio hardware.
//!
//! [`MockTransport`] is a scriptable duplex byte pipe: tests hold a
//! [`MockHandle`] to inject inbound bytes (unsolicited frames), pre-load
//! request/response expectations, inspect everything the engine wrote, and
//! inject transport faults.

pub mod mock;

pub use mock::{MockHandle, MockTransport};
