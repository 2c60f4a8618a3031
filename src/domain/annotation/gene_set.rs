use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::domain::annotation::event::{Event, EventType};
use crate::domain::annotation::gene::{Gene, Isoform, Segment};
use crate::domain::annotation::gff_parser::{self, FeatureKind, GffRecord, ParsedLine};
use crate::domain::utils::id::{EventId, GeneId, IsoformId};
use crate::error::{Error, Result};

/// All genes and splicing events of one annotation source.
///
/// Immutable once loaded. Shared between the graph builder and the aggregator
/// as `Arc<GeneSet>`.
#[derive(Debug, Clone, Default)]
pub struct GeneSet {
    genes: Vec<Gene>,
    events: Vec<Event>,
    gene_index: HashMap<GeneId, usize>,
    event_index: HashMap<EventId, usize>,
    source: PathBuf,
}

impl GeneSet {
    /// Loads a GFF3 file, or every `*.gff` / `*.gff3` file of a directory
    /// (sorted by name). For a file without `event_type=` attributes, the
    /// file stem names the event type, e.g. `SE.gff3`.
    pub fn load(annotation_source: impl AsRef<Path>) -> Result<GeneSet> {
        let source = annotation_source.as_ref();
        let files = Self::annotation_files(source)?;
        log::info!("Loading annotation from {} file(s) under '{}'.", files.len(), source.display());

        let mut builder = GeneSetBuilder::default();
        for file in &files {
            let default_type = file.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse::<EventType>().ok());
            let reader = BufReader::new(File::open(file)?);
            builder.add_file(reader, default_type).map_err(|e| match e {
                Error::ParseError(msg) => Error::ParseError(format!("{}: {}", file.display(), msg)),
                other => other,
            })?;
        }

        let mut gene_set = builder.build()?;
        gene_set.source = source.to_path_buf();
        log::info!("Annotation loaded: {} genes, {} events.", gene_set.genes.len(), gene_set.events.len());
        Ok(gene_set)
    }

    /// Parses annotation text that is already in memory.
    pub fn from_reader<R: BufRead>(reader: R, default_type: Option<EventType>) -> Result<GeneSet> {
        let mut builder = GeneSetBuilder::default();
        builder.add_file(reader, default_type)?;
        builder.build()
    }

    fn annotation_files(source: &Path) -> Result<Vec<PathBuf>> {
        if source.is_file() {
            return Ok(vec![source.to_path_buf()]);
        }
        if !source.is_dir() {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("annotation source '{}' does not exist", source.display()),
            )));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(source)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && matches!(p.extension().and_then(|e| e.to_str()), Some("gff") | Some("gff3")))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::ParseError(format!("no GFF files found in '{}'", source.display())));
        }
        Ok(files)
    }

    /// Events modelled on `gene_id`. Empty if the gene has none or is unknown.
    pub fn events_for_gene(&self, gene_id: &GeneId) -> Vec<&Event> {
        match self.gene(gene_id) {
            Some(gene) => gene.event_ids.iter().filter_map(|id| self.event(id)).filter(|e| &e.gene_id == gene_id).collect(),
            None => Vec::new(),
        }
    }

    pub fn gene(&self, gene_id: &GeneId) -> Option<&Gene> {
        self.gene_index.get(gene_id).map(|&i| &self.genes[i])
    }

    pub fn event(&self, event_id: &EventId) -> Option<&Event> {
        self.event_index.get(event_id).map(|&i| &self.events[i])
    }

    pub fn genes(&self) -> &[Gene] {
        &self.genes
    }

    /// All events in load order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn events_in_region(&self, chrom: &str, start: u64, end: u64) -> Vec<&Event> {
        self.events.iter().filter(|e| e.overlaps(chrom, start, end)).collect()
    }

    pub fn events_of_type(&self, event_type: EventType) -> Vec<&Event> {
        self.events.iter().filter(|e| e.event_type == event_type).collect()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug)]
struct PendingIsoform {
    id: IsoformId,
    parent: String,
    segments: Vec<Segment>,
}

#[derive(Debug)]
struct PendingEvent {
    record: GffRecord,
    event_type: Option<EventType>,
}

/// Collects records from one or more files, then resolves the
/// gene → event → isoform → exon hierarchy.
#[derive(Debug, Default)]
struct GeneSetBuilder {
    genes: Vec<GffRecord>,
    events: Vec<PendingEvent>,
    isoforms: Vec<PendingIsoform>,
    isoform_index: HashMap<String, usize>,
    exons: Vec<(String, Segment)>,
    seen_ids: HashMap<String, FeatureKind>,
}

impl GeneSetBuilder {
    fn add_file<R: BufRead>(&mut self, reader: R, default_type: Option<EventType>) -> Result<()> {
        for (line_num, line) in reader.lines().enumerate() {
            let line_num = line_num + 1;
            let line = line?;
            let parsed = gff_parser::parse_line(&line).map_err(|e| match e {
                Error::ParseError(msg) => Error::ParseError(format!("{} (line {})", msg, line_num)),
                other => other,
            })?;

            match parsed {
                ParsedLine::Record(record) => self.add(*record, default_type).map_err(|e| match e {
                    Error::ParseError(msg) => Error::ParseError(format!("{} (line {})", msg, line_num)),
                    other => other,
                })?,
                ParsedLine::Ignored(kind) => log::debug!("Ignoring feature type '{}' at line {}.", kind, line_num),
                ParsedLine::Comment => continue,
                ParsedLine::EndOfFile => break,
            }
        }
        Ok(())
    }

    fn add(&mut self, record: GffRecord, default_type: Option<EventType>) -> Result<()> {
        if record.kind != FeatureKind::Exon {
            let id = record.id().ok_or_else(|| Error::ParseError(format!("{:?} feature without ID attribute", record.kind)))?;
            if self.seen_ids.insert(id.to_string(), record.kind).is_some() {
                return Err(Error::ParseError(format!("duplicate ID '{}'", id)));
            }
        }

        match record.kind {
            FeatureKind::Gene => self.genes.push(record),
            FeatureKind::Event => {
                let event_type = match record.attribute("event_type") {
                    Some(label) => Some(label.parse::<EventType>()?),
                    None => default_type,
                };
                self.events.push(PendingEvent { record, event_type });
            }
            FeatureKind::Isoform => {
                let id = record.id().unwrap_or_default().to_string();
                let parent =
                    record.parent().ok_or_else(|| Error::ParseError(format!("isoform '{}' has no Parent attribute", id)))?.to_string();
                self.isoform_index.insert(id.clone(), self.isoforms.len());
                self.isoforms.push(PendingIsoform { id: IsoformId::new(id), parent, segments: Vec::new() });
            }
            FeatureKind::Exon => {
                let parent = record.parent().ok_or_else(|| Error::ParseError("exon has no Parent attribute".to_string()))?;
                // Exons may reference several isoforms ("Parent=a,b").
                for parent_id in parent.split(',') {
                    self.exons.push((parent_id.to_string(), record.segment));
                }
            }
        }
        Ok(())
    }

    fn build(mut self) -> Result<GeneSet> {
        for (parent_id, segment) in std::mem::take(&mut self.exons) {
            let isoform =
                *self.isoform_index.get(&parent_id).ok_or_else(|| Error::ParseError(format!("exon references unknown isoform '{}'", parent_id)))?;
            self.isoforms[isoform].segments.push(segment);
        }
        for isoform in &mut self.isoforms {
            isoform.segments.sort();
        }

        let mut genes: Vec<Gene> = Vec::with_capacity(self.genes.len());
        let mut gene_index = HashMap::new();
        for record in &self.genes {
            let id = GeneId::new(record.id().unwrap_or_default());
            gene_index.insert(id.clone(), genes.len());
            genes.push(Gene {
                id,
                name: record.attribute("Name").map(str::to_string),
                chrom: record.chrom.clone(),
                span: record.segment,
                strand: record.strand,
                isoforms: Vec::new(),
                event_ids: Vec::new(),
            });
        }

        let mut event_isoforms: HashMap<String, Vec<Isoform>> = HashMap::new();
        for pending in self.isoforms {
            let isoform = Isoform { id: pending.id, segments: pending.segments };
            match self.seen_ids.get(&pending.parent) {
                Some(FeatureKind::Gene) => {
                    let idx = gene_index[&GeneId::new(pending.parent.as_str())];
                    genes[idx].isoforms.push(isoform);
                }
                Some(FeatureKind::Event) => {
                    if isoform.segments.is_empty() {
                        return Err(Error::ParseError(format!("isoform '{}' of event '{}' has no exons", isoform.id, pending.parent)));
                    }
                    event_isoforms.entry(pending.parent).or_default().push(isoform)
                }
                _ => {
                    return Err(Error::ParseError(format!("isoform '{}' references unknown parent '{}'", isoform.id, pending.parent)));
                }
            }
        }

        let mut events: Vec<Event> = Vec::with_capacity(self.events.len());
        let mut event_index = HashMap::new();
        for pending in self.events {
            let record = pending.record;
            let id = EventId::new(record.id().unwrap_or_default());

            let gene_id = record
                .parent()
                .map(GeneId::new)
                .ok_or_else(|| Error::ParseError(format!("event '{}' has no Parent gene", id)))?;
            let gene_pos =
                *gene_index.get(&gene_id).ok_or_else(|| Error::ParseError(format!("event '{}' references unknown gene '{}'", id, gene_id)))?;

            let event_type = pending
                .event_type
                .ok_or_else(|| Error::ParseError(format!("event '{}' has no event_type and the file name does not name one", id)))?;

            let isoforms = event_isoforms.remove(id.as_str()).unwrap_or_default();
            if isoforms.len() < 2 {
                return Err(Error::ParseError(format!("event '{}' defines {} isoform(s), at least two are required", id, isoforms.len())));
            }

            genes[gene_pos].event_ids.push(id.clone());
            event_index.insert(id.clone(), events.len());
            events.push(Event { id, event_type, gene_id, chrom: record.chrom, strand: record.strand, isoforms });
        }

        Ok(GeneSet { genes, events, gene_index, event_index, source: PathBuf::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ANNOTATION: &str = "##gff-version 3
chr1\tref\tgene\t100\t2000\t.\t+\t.\tID=GENE1;Name=Abc1
chr1\tref\tgene\t5000\t9000\t.\t-\t.\tID=GENE2
chr1\tSE\tevent\t100\t900\t.\t+\t.\tID=SE.1;Parent=GENE1;event_type=SE
chr1\tSE\tmRNA\t100\t900\t.\t+\t.\tID=SE.1.A;Parent=SE.1
chr1\tSE\tmRNA\t100\t900\t.\t+\t.\tID=SE.1.B;Parent=SE.1
chr1\tSE\texon\t100\t200\t.\t+\t.\tParent=SE.1.A,SE.1.B
chr1\tSE\texon\t400\t500\t.\t+\t.\tParent=SE.1.A
chr1\tSE\texon\t800\t900\t.\t+\t.\tParent=SE.1.A,SE.1.B
chr1\tRI\tevent\t1200\t1900\t.\t+\t.\tID=RI.1;Parent=GENE1;event_type=RI
chr1\tRI\tmRNA\t1200\t1900\t.\t+\t.\tID=RI.1.A;Parent=RI.1
chr1\tRI\tmRNA\t1200\t1900\t.\t+\t.\tID=RI.1.B;Parent=RI.1
chr1\tRI\texon\t1200\t1900\t.\t+\t.\tParent=RI.1.A
chr1\tRI\texon\t1200\t1400\t.\t+\t.\tParent=RI.1.B
chr1\tRI\texon\t1700\t1900\t.\t+\t.\tParent=RI.1.B
chr1\tref\tmRNA\t100\t2000\t.\t+\t.\tID=TX1;Parent=GENE1
chr1\tref\texon\t100\t2000\t.\t+\t.\tParent=TX1
";

    fn load(text: &str) -> Result<GeneSet> {
        GeneSet::from_reader(Cursor::new(text.to_string()), None)
    }

    #[test]
    fn builds_gene_event_hierarchy() {
        let genes = load(ANNOTATION).unwrap();

        assert_eq!(genes.genes().len(), 2);
        assert_eq!(genes.events().len(), 2);

        let gene = genes.gene(&GeneId::new("GENE1")).unwrap();
        assert_eq!(gene.name.as_deref(), Some("Abc1"));
        assert_eq!(gene.isoforms.len(), 1);

        let se = genes.event(&EventId::new("SE.1")).unwrap();
        assert_eq!(se.event_type, EventType::SkippedExon);
        assert_eq!(se.isoforms.len(), 2);
        assert_eq!(se.isoforms[0].segments.len(), 3);
        assert_eq!(se.isoforms[1].segments.len(), 2);
        assert_eq!(se.span(), Some(Segment { start: 100, end: 900 }));
    }

    #[test]
    fn events_for_gene_only_returns_that_genes_events() {
        let genes = load(ANNOTATION).unwrap();

        let events = genes.events_for_gene(&GeneId::new("GENE1"));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.gene_id == GeneId::new("GENE1")));

        assert!(genes.events_for_gene(&GeneId::new("GENE2")).is_empty());
        assert!(genes.events_for_gene(&GeneId::new("NOPE")).is_empty());
    }

    #[test]
    fn region_and_type_queries() {
        let genes = load(ANNOTATION).unwrap();

        let hits = genes.events_in_region("chr1", 850, 1250);
        assert_eq!(hits.len(), 2);
        assert!(genes.events_in_region("chr2", 1, 10_000).is_empty());
        assert_eq!(genes.events_of_type(EventType::RetainedIntron).len(), 1);
    }

    #[test]
    fn event_with_single_isoform_is_rejected() {
        let text = "chr1\tref\tgene\t1\t100\t.\t+\t.\tID=G
chr1\tSE\tevent\t1\t100\t.\t+\t.\tID=E;Parent=G;event_type=SE
chr1\tSE\tmRNA\t1\t100\t.\t+\t.\tID=E.A;Parent=E
chr1\tSE\texon\t1\t100\t.\t+\t.\tParent=E.A
";
        let err = load(text).unwrap_err();
        assert!(matches!(err, Error::ParseError(msg) if msg.contains("at least two")));
    }

    #[test]
    fn event_isoform_without_exons_is_rejected() {
        let text = "chr1\tref\tgene\t1\t100\t.\t+\t.\tID=G
chr1\tSE\tevent\t1\t100\t.\t+\t.\tID=E;Parent=G;event_type=SE
chr1\tSE\tmRNA\t1\t100\t.\t+\t.\tID=E.A;Parent=E
chr1\tSE\tmRNA\t1\t100\t.\t+\t.\tID=E.B;Parent=E
chr1\tSE\texon\t1\t100\t.\t+\t.\tParent=E.A
";
        assert!(matches!(load(text), Err(Error::ParseError(msg)) if msg.contains("'E.B'") && msg.contains("no exons")));
    }

    #[test]
    fn event_with_unknown_gene_is_rejected() {
        let text = "chr1\tSE\tevent\t1\t100\t.\t+\t.\tID=E;Parent=MISSING;event_type=SE\n";
        assert!(matches!(load(text), Err(Error::ParseError(msg)) if msg.contains("unknown gene")));
    }

    #[test]
    fn event_type_falls_back_to_file_label() {
        let text = "chr1\tref\tgene\t1\t100\t.\t+\t.\tID=G
chr1\tA3SS\tevent\t1\t100\t.\t+\t.\tID=E;Parent=G
chr1\tA3SS\tmRNA\t1\t100\t.\t+\t.\tID=E.A;Parent=E
chr1\tA3SS\tmRNA\t1\t100\t.\t+\t.\tID=E.B;Parent=E
chr1\tA3SS\texon\t1\t50\t.\t+\t.\tParent=E.A
chr1\tA3SS\texon\t1\t60\t.\t+\t.\tParent=E.B
";
        let genes = GeneSet::from_reader(Cursor::new(text.to_string()), Some(EventType::Alternative3SpliceSite)).unwrap();
        assert_eq!(genes.events()[0].event_type, EventType::Alternative3SpliceSite);

        assert!(matches!(load(text), Err(Error::ParseError(msg)) if msg.contains("no event_type")));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let text = "chr1\tref\tgene\t1\t100\t.\t+\t.\tID=G\nchr1\tref\tgene\t1\t100\t.\t+\t.\tID=G\n";
        assert!(matches!(load(text), Err(Error::ParseError(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn parse_errors_carry_line_numbers() {
        let text = "##gff-version 3\nchr1\tref\tgene\tx\t100\t.\t+\t.\tID=G\n";
        assert!(matches!(load(text), Err(Error::ParseError(msg)) if msg.contains("line 2")));
    }
}
