pub mod command;
pub mod config;
pub mod denoise;
pub mod domain;
pub mod engine;
pub mod error;
pub mod finalize;
pub mod layout;
pub mod lifecycle;
pub mod manifest;
pub mod mask;
pub mod merge;
pub mod nuisance;
pub mod output;
pub mod parcellate;
pub mod pipeline;
pub mod regressor;
pub mod series;
