//! Side-effecting adapters: filesystem, processes, git, tracker, LLM, agent.

pub mod agent;
pub mod config;
pub mod context;
pub mod git;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod tracker;
pub mod workflow_store;
