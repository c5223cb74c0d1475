pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod images;
pub mod network;
pub mod optim;
pub mod report;
pub mod scheduler;
pub mod stopping;
pub mod tracker;

pub use network::Network;

#[cfg(test)]
mod tests;
