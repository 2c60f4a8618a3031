mod common;

use rnaseq_orchestrator::domain::annotation::event::EventType;
use rnaseq_orchestrator::domain::annotation::gene_set::GeneSet;
use rnaseq_orchestrator::domain::utils::id::{EventId, GeneId};
use rnaseq_orchestrator::error::Error;

use common::{fixture, scratch_dir};

#[test]
fn test_load_annotation_directory() {
    let genes = GeneSet::load(fixture("annotation")).unwrap();

    assert_eq!(genes.genes().len(), 2);
    assert_eq!(genes.events().len(), 3);

    // Files are read in name order: RI.gff3, SE.gff3, genes.gff3.
    let ids: Vec<&str> = genes.events().iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["RI.1", "SE.1", "SE.2"]);

    // Event types come from the file names.
    assert_eq!(genes.event(&EventId::new("RI.1")).unwrap().event_type, EventType::RetainedIntron);
    assert_eq!(genes.events_of_type(EventType::SkippedExon).len(), 2);

    let gene = genes.gene(&GeneId::new("GENE1")).unwrap();
    assert_eq!(gene.name.as_deref(), Some("Abc1"));
    assert_eq!(genes.events_for_gene(&GeneId::new("GENE1")).len(), 2);
    assert_eq!(genes.events_for_gene(&GeneId::new("GENE2")).len(), 1);
    assert_eq!(genes.source(), fixture("annotation").as_path());
}

#[test]
fn test_region_query() {
    let genes = GeneSet::load(fixture("annotation")).unwrap();

    let hits: Vec<&str> = genes.events_in_region("chr1", 850, 1300).iter().map(|e| e.id.as_str()).collect();
    assert_eq!(hits.len(), 2);
    assert!(hits.contains(&"SE.1"));
    assert!(hits.contains(&"RI.1"));

    assert!(genes.events_in_region("chr2", 1, 100).is_empty());
    assert!(genes.events_in_region("chrX", 1, 1_000_000).is_empty());
}

#[test]
fn test_missing_source_is_io_error() {
    let result = GeneSet::load(fixture("no-such-annotation"));
    assert!(matches!(result, Err(Error::IoError(_))));
}

#[test]
fn test_malformed_file_names_file() {
    let dir = scratch_dir("bad-annotation");
    std::fs::write(dir.join("SE.gff3"), "chr1\tSE\tevent\t100\n").unwrap();

    match GeneSet::load(&dir) {
        Err(Error::ParseError(msg)) => {
            assert!(msg.contains("SE.gff3"));
            assert!(msg.contains("line 1"));
        }
        other => panic!("expected parse error, got {:?}", other),
    }

    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn test_event_with_single_isoform_is_rejected() {
    let dir = scratch_dir("single-isoform");
    std::fs::write(
        dir.join("annotation.gff3"),
        "chr1\tref\tgene\t1\t500\t.\t+\t.\tID=G1\n\
         chr1\tSE\tevent\t1\t500\t.\t+\t.\tID=E1;Parent=G1;event_type=SE\n\
         chr1\tSE\tmRNA\t1\t500\t.\t+\t.\tID=E1.A;Parent=E1\n\
         chr1\tSE\texon\t1\t500\t.\t+\t.\tParent=E1.A\n",
    )
    .unwrap();

    assert!(matches!(GeneSet::load(&dir), Err(Error::ParseError(msg)) if msg.contains("at least two")));

    std::fs::remove_dir_all(dir).unwrap();
}
