//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the communication
//! stack end to end: a real device store behind the service, with mock
//! links or loopback sockets in front. All tests run on the host with no
//! real hardware required.

mod device_scenarios;
mod mock_link;
mod service_tests;
mod tcp_loopback;
