// src/config/samples.rs

//! The samples file: one `[section]` per library.
//!
//! ```text
//! # run 42
//! [LIB-001]
//! sample_name: patient-7
//! panel = amplicon-v2
//! fastq1: /data/LIB-001_R1.fastq.gz
//! fastq2: /data/LIB-001_R2.fastq.gz
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::errors::{NgsflowError, Result};

/// Metadata of one sequencing library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    /// Section name; the key jobs refer to the sample by.
    pub name: String,
    pub sample_name: String,
    /// Prefix of every per-sample output file. Defaults to the section name.
    pub library_name: String,
    pub panel: Option<String>,
    pub target_pool: Option<String>,
    pub sequencer: Option<String>,
    pub run_id: Option<String>,
    pub fastq1: Option<String>,
    pub fastq2: Option<String>,
    /// Any other keys, available as template variables.
    pub extra: BTreeMap<String, String>,
}

impl SampleRecord {
    pub fn new(name: impl Into<String>, sample_name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            library_name: name.clone(),
            name,
            sample_name: sample_name.into(),
            panel: None,
            target_pool: None,
            sequencer: None,
            run_id: None,
            fastq1: None,
            fastq2: None,
            extra: BTreeMap::new(),
        }
    }

    /// Template variables contributed by this record.
    pub fn vars(&self) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = self
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        vars.insert("sample".to_string(), self.name.clone());
        vars.insert("sample_name".to_string(), self.sample_name.clone());
        vars.insert("library".to_string(), self.library_name.clone());
        vars.insert("library_name".to_string(), self.library_name.clone());

        let optional = [
            ("panel", &self.panel),
            ("target_pool", &self.target_pool),
            ("sequencer", &self.sequencer),
            ("run_id", &self.run_id),
            ("fastq1", &self.fastq1),
            ("fastq2", &self.fastq2),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                vars.insert(key.to_string(), v.clone());
            }
        }
        vars
    }
}

/// All samples of a run, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSheet {
    records: Vec<SampleRecord>,
}

impl SampleSheet {
    pub fn new(records: Vec<SampleRecord>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for record in &records {
            if !seen.insert(record.name.as_str()) {
                return Err(NgsflowError::Config(format!(
                    "duplicate sample '{}'",
                    record.name
                )));
            }
        }
        Ok(Self { records })
    }

    pub fn get(&self, name: &str) -> Option<&SampleRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse the samples file format.
pub fn parse_samples(text: &str) -> Result<SampleSheet> {
    let mut sections: Vec<(String, usize, BTreeMap<String, String>)> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    NgsflowError::Config(format!(
                        "samples line {}: malformed section header `{}`",
                        line_no, line
                    ))
                })?;
            if sections.iter().any(|(n, _, _)| n == name) {
                return Err(NgsflowError::Config(format!(
                    "samples line {}: duplicate sample section [{}]",
                    line_no, name
                )));
            }
            sections.push((name.to_string(), line_no, BTreeMap::new()));
            continue;
        }

        let split = line.find([':', '=']).ok_or_else(|| {
            NgsflowError::Config(format!(
                "samples line {}: expected `key: value` or `key = value`, got `{}`",
                line_no, line
            ))
        })?;
        let key = line[..split].trim().to_lowercase();
        let value = line[split + 1..].trim().to_string();
        if key.is_empty() {
            return Err(NgsflowError::Config(format!(
                "samples line {}: empty key",
                line_no
            )));
        }

        let Some((section, _, fields)) = sections.last_mut() else {
            return Err(NgsflowError::Config(format!(
                "samples line {}: `{}` appears before any [sample] section",
                line_no, key
            )));
        };
        if fields.insert(key.clone(), value).is_some() {
            return Err(NgsflowError::Config(format!(
                "samples line {}: duplicate key '{}' in [{}]",
                line_no, key, section
            )));
        }
    }

    let records = sections
        .into_iter()
        .map(|(name, line_no, fields)| into_record(name, line_no, fields))
        .collect::<Result<Vec<_>>>()?;

    SampleSheet::new(records)
}

fn into_record(name: String, line_no: usize, mut fields: BTreeMap<String, String>) -> Result<SampleRecord> {
    let sample_name = fields
        .remove("sample_name")
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            NgsflowError::Config(format!(
                "samples line {}: [{}] has no sample_name",
                line_no, name
            ))
        })?;

    let mut record = SampleRecord::new(name, sample_name);
    if let Some(library) = fields.remove("library_name").filter(|v| !v.is_empty()) {
        record.library_name = library;
    }
    record.panel = fields.remove("panel");
    record.target_pool = fields.remove("target_pool");
    record.sequencer = fields.remove("sequencer");
    record.run_id = fields.remove("run_id");
    record.fastq1 = fields.remove("fastq1");
    record.fastq2 = fields.remove("fastq2");
    record.extra = fields;
    Ok(record)
}
