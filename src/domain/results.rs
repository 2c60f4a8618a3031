pub mod aggregator;
pub mod quantification;
pub mod summary_table;
