pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod collaborators;
pub mod state;
pub mod ws;
