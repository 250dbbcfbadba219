//! Local type-tag derivation from file names.
//!
//! Used when no type service is configured. The remote service knows more
//! (e.g. it inspects file headers); this covers the common extensions.

use crate::model::{Dataset, TypeTags};

const EXTENSION_TAGS: &[(&str, &[&str])] = &[
    (".tsv", &["TSV"]),
    (".txt", &["TEXT"]),
    (".csv", &["CSV"]),
    (".bam", &["BAM"]),
    (".bai", &["BAI"]),
    (".vcf", &["VCF"]),
    (".bed", &["BED"]),
    (".gtf", &["GTF"]),
    (".fa", &["FASTA"]),
    (".fasta", &["FASTA"]),
    (".fq", &["FASTQ"]),
    (".fastq", &["FASTQ"]),
    (".fq.gz", &["FASTQ", "GZIP"]),
    (".fastq.gz", &["FASTQ", "GZIP"]),
    (".gz", &["GZIP"]),
    (".png", &["PNG"]),
    (".jpg", &["JPEG"]),
    (".pdf", &["PDF"]),
    (".html", &["HTML"]),
    (".R", &["R"]),
];

/// Derive type tags for a dataset from its name.
///
/// The longest matching suffix wins, so `reads.fq.gz` is tagged
/// `FASTQ` + `GZIP` rather than only `GZIP`. Tags carry an empty value.
pub fn derive_type_tags(dataset: &Dataset) -> TypeTags {
    let name = dataset.name.as_str();
    EXTENSION_TAGS
        .iter()
        .filter(|entry| name.len() > entry.0.len() && name.ends_with(entry.0))
        .max_by_key(|entry| entry.0.len())
        .map(|entry| {
            entry
                .1
                .iter()
                .map(|tag| ((*tag).to_owned(), String::new()))
                .collect()
        })
        .unwrap_or_default()
}
