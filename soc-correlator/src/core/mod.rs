/*!
Core modules of the event correlator: detection, storage and dispatch
*/

pub mod analyzer;
pub mod config;
pub mod detection_engine;
pub mod dispatch;
pub mod query;
pub mod signal_store;
pub mod tracker;
