//! Infrastructure layer: event store, document store, repositories, command
//! dispatch, projections and the projection manager.

pub mod command_dispatcher;
pub mod config;
pub mod db;
pub mod event_store;
pub mod handlers;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod workers;

mod integration_tests;
