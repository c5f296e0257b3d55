pub mod alerts;
pub mod config;
pub mod events;
pub mod run;
pub mod sources;
pub mod sync;
