//! Recruitment workflow orchestration.
//!
//! Jobs move through SOURCING → SCREENING → ASSESSMENT → ENGAGEMENT under an
//! [`orchestrator::Orchestrator`]. Every stage agent reaches a model through
//! the [`gateway::ModelGateway`], which routes by task class, rate limits per
//! provider and falls back when a provider turns unhealthy. Workflow state is
//! versioned and committed to a [`store::StateStore`] after every unit of
//! work.

pub mod agent;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod limiter;
pub mod orchestrator;
pub mod provider;
pub mod router;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;
