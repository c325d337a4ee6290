//! BDD step definitions for datawatch

pub mod dashboard_steps;
pub mod notification_steps;
pub mod reconciliation_steps;
