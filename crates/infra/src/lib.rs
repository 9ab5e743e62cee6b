//! Infrastructure layer: event persistence, dispatch, read models, services.

pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod services;
