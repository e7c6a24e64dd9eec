//! Asynchronous code-execution subsystem of the judge.
//!
//! Requests enter through [`service::ExecutionService`], which records a job in the
//! [`job_store::JobStore`] and hands the work to the [`worker`] pool. Workers resolve a
//! per-language [`executor::Executor`] from the [`registry::ExecutorRegistry`] and run the
//! code inside a fresh sandbox provided by a [`sandbox::SandboxRuntime`].

pub mod catalog;
pub mod docker;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod job_store;
pub mod languages;
pub mod registry;
pub mod sandbox;
pub mod service;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
