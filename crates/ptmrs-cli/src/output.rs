use ptmrs_core::record::{PeptideScore, Record};
use rayon::prelude::*;

use crate::runner::Runner;

/// `Phospho: S3: 99.5; S5: 0.5`, one block per modification, blocks joined by ` | `
fn site_column(site_probabilities: &[(String, String)]) -> String {
    site_probabilities
        .iter()
        .map(|(label, sites)| format!("{}: {}", label, sites))
        .collect::<Vec<_>>()
        .join(" | ")
}

impl Runner {
    /// One row per candidate peptide of a successful record
    pub fn serialize_localization(&self, record: &Record) -> Vec<csv::ByteRecord> {
        let Record::Success {
            sequence_id,
            spectrum_id,
            sequence,
            site_probabilities,
            best,
            report,
            peptides,
        } = record
        else {
            return Vec::new();
        };

        let sites = site_column(site_probabilities);
        peptides
            .iter()
            .map(|peptide: &PeptideScore| {
                let mut record = csv::ByteRecord::new();
                record.push_field(itoa::Buffer::new().format(*spectrum_id).as_bytes());
                record.push_field(itoa::Buffer::new().format(*sequence_id).as_bytes());
                record.push_field(sequence.as_bytes());
                record.push_field(itoa::Buffer::new().format(peptide.peptide_id).as_bytes());
                record.push_field(ryu::Buffer::new().format(peptide.score).as_bytes());
                record.push_field(ryu::Buffer::new().format(peptide.probability).as_bytes());
                record.push_field(best.as_bytes());
                record.push_field(sites.as_bytes());
                record.push_field(report.as_bytes());
                record
            })
            .collect()
    }

    pub fn serialize_error(&self, record: &Record) -> Option<csv::ByteRecord> {
        let Record::Error {
            sequence_id,
            spectrum_id,
            message,
            peptide_ids,
        } = record
        else {
            return None;
        };

        let ids = peptide_ids
            .iter()
            .map(|id| itoa::Buffer::new().format(*id).to_string())
            .collect::<Vec<_>>()
            .join(";");

        let mut record = csv::ByteRecord::new();
        record.push_field(itoa::Buffer::new().format(*spectrum_id).as_bytes());
        record.push_field(itoa::Buffer::new().format(*sequence_id).as_bytes());
        record.push_field(ids.as_bytes());
        record.push_field(message.as_bytes());
        Some(record)
    }

    pub fn write_localizations(&self, records: &[Record]) -> anyhow::Result<String> {
        let path = self.make_path("localizations.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let headers = csv::ByteRecord::from(vec![
            "spectrum_id",
            "sequence_id",
            "sequence",
            "peptide_id",
            "score",
            "probability",
            "best_site_probabilities",
            "site_probabilities",
            "report",
        ]);

        wtr.write_byte_record(&headers)?;
        for record in records
            .par_iter()
            .flat_map_iter(|record| self.serialize_localization(record))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    pub fn write_errors(&self, records: &[Record]) -> anyhow::Result<String> {
        let path = self.make_path("errors.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let headers =
            csv::ByteRecord::from(vec!["spectrum_id", "sequence_id", "peptide_ids", "message"]);

        wtr.write_byte_record(&headers)?;
        for record in records.iter().filter_map(|record| self.serialize_error(record)) {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}
