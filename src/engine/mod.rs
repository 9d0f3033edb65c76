// Engine orchestration: attempt lifecycle, download, staging, launch.

pub mod attempt;
pub mod events;
pub mod fetcher;
pub mod launcher;
pub mod orchestrator;
pub mod progress;
pub mod staging;
