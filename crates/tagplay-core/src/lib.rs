pub mod chain;
pub mod command;
pub mod config;
pub mod controller;
pub mod decoder_kind;
pub mod device;
pub mod graph;
pub mod pipeline;
pub mod playlist;
pub mod queue;
pub mod registry;
pub mod sensor;
pub mod stage;
pub mod stages;
pub mod status;
