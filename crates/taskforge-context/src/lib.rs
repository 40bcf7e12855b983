mod aux;
mod budget;
mod extraction;
mod history;
mod preamble;
mod project_map;

pub use aux::run_aux_model;
pub use budget::{truncate_middle, ContextConfig};
pub use preamble::ContextBuilder;
pub use project_map::scan_project;
