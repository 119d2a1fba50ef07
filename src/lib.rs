pub mod annotate;
pub mod app;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod import;
pub mod lookup;
pub mod output;
pub mod reconcile;
pub mod session;
pub mod table;
pub mod tui;
pub mod upload;
pub mod web;
