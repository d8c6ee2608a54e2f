pub mod apply;
pub mod crds;
pub mod error;
pub mod plan;
pub mod replicator_controller;
pub mod resolve;
