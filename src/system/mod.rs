pub mod actions;
pub mod apps;
pub mod bundle;
pub mod cpu;
pub mod dirsize;
pub mod kill;
pub mod platform;
pub mod process;
pub mod sampler;
pub mod snapshot;
pub mod trash;
