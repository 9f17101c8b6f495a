pub mod backend;
pub mod batch;
pub mod cli;
pub mod config;
pub mod logger;
pub mod operation;
pub mod project;
pub mod status;
pub mod storage;
pub mod transcript;
pub mod web;
