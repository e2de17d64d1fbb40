//! OTU table accumulation and writers.
//!
//! Counts are keyed by (sample, OTU). The sample name comes from a
//! `sample=` or `barcodelabel=` annotation in the query header (falling
//! back to the leading word characters); the OTU name from an `otu=`
//! annotation in the target header (falling back to the label up to the
//! first `;`). A `tax=` annotation on the target is carried into the
//! taxonomy column. Writers produce the classic tab-separated layout, the
//! mothur "shared" format, and BIOM 1.0 JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use regex::Regex;
use serde_json::json;

use crate::error::MetamerError;

/// Accumulated (sample, OTU) counts.
#[derive(Debug)]
pub struct OtuTable {
    regex_sample: Regex,
    regex_otu: Regex,
    regex_tax: Regex,
    samples: BTreeSet<String>,
    otus: BTreeSet<String>,
    counts: BTreeMap<(String, String), u64>,
    taxonomy: BTreeMap<String, String>,
}

impl Default for OtuTable {
    fn default() -> Self {
        Self::new()
    }
}

impl OtuTable {
    pub fn new() -> Self {
        Self {
            regex_sample: Regex::new("(^|;)(sample|barcodelabel)=([^;]*)($|;)")
                .expect("static regex"),
            regex_otu: Regex::new("(^|;)otu=([^;]*)($|;)").expect("static regex"),
            regex_tax: Regex::new("(^|;)tax=([^;]*)($|;)").expect("static regex"),
            samples: BTreeSet::new(),
            otus: BTreeSet::new(),
            counts: BTreeMap::new(),
            taxonomy: BTreeMap::new(),
        }
    }

    fn sample_name(&self, query_header: &str) -> String {
        if let Some(caps) = self.regex_sample.captures(query_header) {
            return caps[3].to_string();
        }
        query_header
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect()
    }

    fn otu_name(&self, target_header: &str) -> String {
        if let Some(caps) = self.regex_otu.captures(target_header) {
            return caps[2].to_string();
        }
        target_header
            .split(';')
            .next()
            .unwrap_or(target_header)
            .to_string()
    }

    /// Records `abundance` reads of the query's sample landing in the
    /// target's OTU.
    pub fn add(&mut self, query_header: &str, target_header: &str, abundance: u64) {
        let sample = self.sample_name(query_header);
        let otu = self.otu_name(target_header);

        if let Some(caps) = self.regex_tax.captures(target_header) {
            self.taxonomy.insert(otu.clone(), caps[2].to_string());
        }

        self.samples.insert(sample.clone());
        self.otus.insert(otu.clone());
        if abundance > 0 {
            *self.counts.entry((sample, otu)).or_insert(0) += abundance;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.otus.is_empty() && self.samples.is_empty()
    }

    fn count(&self, sample: &str, otu: &str) -> u64 {
        self.counts
            .get(&(sample.to_string(), otu.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Classic layout: one row per OTU, one column per sample.
    pub fn write_classic<W: Write>(&self, mut w: W) -> Result<(), MetamerError> {
        write!(w, "#OTU ID")?;
        for sample in &self.samples {
            write!(w, "\t{sample}")?;
        }
        if !self.taxonomy.is_empty() {
            write!(w, "\ttaxonomy")?;
        }
        writeln!(w)?;

        for otu in &self.otus {
            write!(w, "{otu}")?;
            for sample in &self.samples {
                write!(w, "\t{}", self.count(sample, otu))?;
            }
            if !self.taxonomy.is_empty() {
                write!(w, "\t{}", self.taxonomy.get(otu).map_or("", String::as_str))?;
            }
            writeln!(w)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Mothur "shared" layout: one row per sample.
    pub fn write_mothur_shared<W: Write>(&self, mut w: W) -> Result<(), MetamerError> {
        write!(w, "label\tGroup\tnumOtus")?;
        for otu in &self.otus {
            write!(w, "\t{otu}")?;
        }
        writeln!(w)?;

        for sample in &self.samples {
            write!(w, "metamer\t{sample}\t{}", self.otus.len())?;
            for otu in &self.otus {
                write!(w, "\t{}", self.count(sample, otu))?;
            }
            writeln!(w)?;
        }
        w.flush()?;
        Ok(())
    }

    /// BIOM 1.0 sparse JSON.
    pub fn write_biom<W: Write>(&self, mut w: W, table_id: &str) -> Result<(), MetamerError> {
        let otu_index: BTreeMap<&String, usize> =
            self.otus.iter().enumerate().map(|(i, o)| (o, i)).collect();
        let sample_index: BTreeMap<&String, usize> = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s, i))
            .collect();

        let rows: Vec<serde_json::Value> = self
            .otus
            .iter()
            .map(|otu| {
                let metadata = self
                    .taxonomy
                    .get(otu)
                    .map_or(json!(null), |tax| json!({ "taxonomy": tax }));
                json!({ "id": otu, "metadata": metadata })
            })
            .collect();
        let columns: Vec<serde_json::Value> = self
            .samples
            .iter()
            .map(|sample| json!({ "id": sample, "metadata": null }))
            .collect();
        let data: Vec<serde_json::Value> = self
            .counts
            .iter()
            .map(|((sample, otu), count)| {
                json!([otu_index[otu], sample_index[sample], count])
            })
            .collect();

        let biom = json!({
            "id": table_id,
            "format": "Biological Observation Matrix 1.0",
            "format_url": "http://biom-format.org/documentation/format_versions/biom-1.0.html",
            "type": "OTU table",
            "generated_by": concat!("metamer ", env!("CARGO_PKG_VERSION")),
            "date": iso_date_now(),
            "matrix_type": "sparse",
            "matrix_element_type": "int",
            "shape": [self.otus.len(), self.samples.len()],
            "rows": rows,
            "columns": columns,
            "data": data,
        });
        serde_json::to_writer_pretty(&mut w, &biom)?;
        writeln!(w)?;
        w.flush()?;
        Ok(())
    }
}

/// Current UTC time as `YYYY-MM-DDThh:mm:ss`.
fn iso_date_now() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = secs / 86_400;
    let (h, m, s) = (secs % 86_400 / 3600, secs % 3600 / 60, secs % 60);

    // civil-from-days (Howard Hinnant's algorithm)
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!("{year:04}-{month:02}-{d:02}T{h:02}:{m:02}:{s:02}")
}
