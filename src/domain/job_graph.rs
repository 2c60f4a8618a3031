pub mod artifact;
pub mod command_template;
pub mod graph;
pub mod graph_builder;
pub mod operation_plan;
pub mod task;
