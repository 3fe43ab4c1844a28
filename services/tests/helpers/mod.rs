#![allow(dead_code, unused_imports)]

pub mod ctx;
pub mod keys;

pub use ctx::{setup, setup_on, TestCtx};
pub use keys::ScriptedKeys;
