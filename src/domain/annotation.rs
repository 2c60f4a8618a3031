pub mod event;
pub mod gene;
pub mod gene_set;
pub mod gff_parser;
pub mod sample;
