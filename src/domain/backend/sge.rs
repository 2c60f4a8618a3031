pub mod job_script;
pub mod output_parser;
pub mod sge_backend;
