pub mod annotation;
pub mod backend;
pub mod clock;
pub mod job_graph;
pub mod pipeline;
pub mod results;
pub mod scheduler;
pub mod utils;
