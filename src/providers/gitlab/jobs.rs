use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::providers::gitlab::ci_yaml::{self, CiConfig};

/// One job of the merged pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub name: String,
    pub extends: Vec<String>,
    /// Line count of the job serialized back to YAML
    pub lines: usize,
    pub is_hardcoded: bool,
    pub is_overridden: bool,
}

/// Every job of the merged configuration plus the bookkeeping needed to
/// attribute jobs to the include that introduced them.
#[derive(Debug, Clone, Default)]
pub struct JobTable {
    jobs: IndexMap<String, JobRecord>,
    /// Job name -> names of the jobs that extend it
    extended_by: IndexMap<String, Vec<String>>,
    /// Jobs written in the original configuration; false once an include claims them
    hardcoded: IndexMap<String, bool>,
}

impl JobTable {
    pub fn build(original: &CiConfig, merged: &CiConfig) -> Self {
        let mut table = Self::default();

        for name in original.jobs.keys() {
            table.hardcoded.insert(name.clone(), true);
        }

        for (name, content) in &merged.jobs {
            let extends = ci_yaml::job_extends(content);
            for parent in &extends {
                table
                    .extended_by
                    .entry(parent.clone())
                    .or_default()
                    .push(name.clone());
            }
            table.jobs.insert(
                name.clone(),
                JobRecord {
                    name: name.clone(),
                    extends,
                    lines: ci_yaml::job_line_count(content),
                    is_hardcoded: table.hardcoded.contains_key(name),
                    is_overridden: false,
                },
            );
        }

        table
    }

    pub fn get(&self, name: &str) -> Option<&JobRecord> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> &IndexMap<String, JobRecord> {
        &self.jobs
    }

    pub fn into_jobs(self) -> IndexMap<String, JobRecord> {
        self.jobs
    }

    pub fn extended_by(&self, name: &str) -> &[String] {
        self.extended_by
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Attribute a job to an include and return a copy of its record.
    ///
    /// A job also written in the original configuration stops counting as
    /// hardcoded and is flagged as overridden.
    pub fn claim(&mut self, name: &str) -> Option<JobRecord> {
        let job = self.jobs.get_mut(name)?;
        if let Some(flag) = self.hardcoded.get_mut(name) {
            *flag = false;
            job.is_hardcoded = false;
            job.is_overridden = true;
        }
        Some(job.clone())
    }

    /// Names still hardcoded, in original configuration order.
    pub fn hardcoded_names(&self) -> impl Iterator<Item = &str> {
        self.hardcoded
            .iter()
            .filter(|(_, still)| **still)
            .map(|(name, _)| name.as_str())
    }

    pub fn hardcoded_count(&self) -> usize {
        self.hardcoded_names().count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
