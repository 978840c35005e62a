// toolbench-core/src/models/mod.rs
pub mod chat;
pub mod completion;
pub mod result;
pub mod tools;
