pub mod assembly;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod identity;
pub mod logging;
pub mod models;
pub mod optimistic;
pub mod reconcile;
pub mod service;
pub mod utils;

pub use assembly::FullPlanner;
pub use config::Config;
pub use database::Database;
pub use error::PlannerError;
pub use identity::RequestContext;
pub use models::{Content, Item, Planner, Priority, Slot, TimeBlock};
pub use service::PlannerService;
pub use utils::Profile;
