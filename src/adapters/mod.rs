//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter    | Implements   | Connects to                     |
//! |------------|--------------|---------------------------------|
//! | `json`     | —            | serde_json views for queries    |
//! | `log_sink` | EventSink    | Serial log + diagnostics report |
//! | `nvs`      | ConfigPort   | NVS / in-memory store           |
//! |            | StoragePort  |                                 |
//! | `time`     | Clock        | ESP32 system timer / host clock |

pub mod json;
pub mod log_sink;
pub mod nvs;
pub mod time;
