pub mod dispatcher;
pub mod run_report;
pub mod run_state;
pub mod run_status;
pub mod scheduler_config;
