//! Push notification dispatch core.
//!
//! Each newly created notification record flows through the same pipeline:
//! 1. `gate`: skip records that already reached a terminal status
//! 2. `validator`: turn the record into a `DispatchRequest`
//! 3. `engine`: send through a `PushGateway`, retrying transient failures
//! 4. `recorder`: write the terminal status back through a `RecordStore`
//!
//! `dispatcher::NotificationDispatcher` wires the four together and is the
//! only entrypoint the record watcher calls.

pub mod dead_letter;
pub mod dispatcher;
pub mod engine;
pub mod fcm;
pub mod gate;
pub mod gateway;
pub mod recorder;
pub mod store;
pub mod validator;
