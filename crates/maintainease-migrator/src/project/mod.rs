//! Build-environment discovery and proxy project scaffolding.

pub mod analyzer;
pub mod proxy;

pub use analyzer::{
    find_data_project, find_executable, find_solution_root, match_context,
    scan_sources_for_contexts, ProjectAnalyzer,
};
pub use proxy::{ProxyProject, ProxyProjectGenerator};
