use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::logging::LogContext;
use crate::providers::gitlab::ci_yaml::CiConfig;
use crate::providers::gitlab::collaborators::CiConfigSource;
use crate::providers::gitlab::jobs::{JobRecord, JobTable};
use crate::providers::gitlab::types::{CatalogResource, CiInclude, ProjectInfo};
use crate::providers::gitlab::versions;

pub const COMPONENT_VERSION_SEPARATOR: char = '@';

const INCLUDE_COMPONENT: &str = "component";
const INCLUDE_LOCAL: &str = "local";
const INCLUDE_FILE: &str = "file";
const INCLUDE_REMOTE: &str = "remote";
const INCLUDE_TEMPLATE: &str = "template";

/// Placeholders GitLab accepts in place of the instance host in component paths.
const INSTANCE_PLACEHOLDERS: &[&str] = &["$CI_SERVER_FQDN", "$CI_SERVER_HOST", "$CI_SERVER_URL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    Hardcoded,
    Component,
    Local,
    Project,
    Remote,
    Template,
    #[serde(rename = "")]
    Unknown,
}

impl OriginKind {
    fn from_include_type(include_type: &str) -> Self {
        match include_type {
            INCLUDE_COMPONENT => Self::Component,
            INCLUDE_LOCAL => Self::Local,
            INCLUDE_FILE => Self::Project,
            INCLUDE_REMOTE => Self::Remote,
            INCLUDE_TEMPLATE => Self::Template,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Hardcoded => "hardcoded",
            Self::Component => "component",
            Self::Local => "local",
            Self::Project => "project",
            Self::Remote => "remote",
            Self::Template => "template",
            Self::Unknown => "",
        }
    }
}

/// Normalized descriptor of an include, used to tell origins apart.
///
/// Field order is part of the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeLocation {
    pub location: String,
    #[serde(rename = "type")]
    pub include_type: String,
    pub project: String,
}

impl IncludeLocation {
    /// First eight bytes, big-endian, of the SHA-256 of the JSON encoding.
    pub fn fingerprint(&self) -> Result<u64> {
        let encoded = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&encoded);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Ok(u64::from_be_bytes(head))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDetails {
    pub repo_full_path: String,
    pub repo_web_path: String,
    pub repo_name: String,
    pub component_name: String,
    pub component_latest_version: String,
    pub component_include_path: String,
}

/// One include occurrence of the merged pipeline, or the hardcoded bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    #[serde(rename = "originType")]
    pub kind: OriginKind,
    #[serde(rename = "fromGitlabCatalog")]
    pub from_catalog: bool,
    #[serde(rename = "gitlabIncludeOrigin")]
    pub include: IncludeLocation,
    #[serde(rename = "gitlabComponent")]
    pub component: ComponentDetails,
    /// Zero for the hardcoded bucket
    #[serde(rename = "originHash")]
    pub fingerprint: u64,
    pub version: String,
    pub up_to_date: bool,
    pub nested: bool,
    pub jobs: Vec<JobRecord>,
}

impl Origin {
    fn new(kind: OriginKind, include: IncludeLocation, fingerprint: u64) -> Self {
        Self {
            kind,
            from_catalog: false,
            include,
            component: ComponentDetails::default(),
            fingerprint,
            version: String::new(),
            up_to_date: false,
            nested: false,
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginMetrics {
    pub job_total: usize,
    pub job_hardcoded: usize,
    pub origin_total: usize,
    pub origin_component: usize,
    pub origin_local: usize,
    pub origin_project: usize,
    pub origin_remote: usize,
    pub origin_template: usize,
    #[serde(rename = "originGitLabCatalog")]
    pub origin_gitlab_catalog: usize,
    pub origin_outdated: usize,
}

impl OriginMetrics {
    pub fn compute(table: &JobTable, origins: &[Origin]) -> Self {
        let mut metrics = Self {
            job_total: table.len(),
            job_hardcoded: table.hardcoded_count(),
            origin_total: origins.len(),
            ..Self::default()
        };
        for origin in origins {
            match origin.kind {
                OriginKind::Component => metrics.origin_component += 1,
                OriginKind::Local => metrics.origin_local += 1,
                OriginKind::Project => metrics.origin_project += 1,
                OriginKind::Remote => metrics.origin_remote += 1,
                OriginKind::Template => metrics.origin_template += 1,
                OriginKind::Hardcoded | OriginKind::Unknown => {}
            }
            if origin.from_catalog {
                metrics.origin_gitlab_catalog += 1;
                if !origin.up_to_date {
                    metrics.origin_outdated += 1;
                }
            }
        }
        metrics
    }
}

/// A component reference split into instance host, path and version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentPath {
    /// Instance host or placeholder; empty when the path has neither
    pub instance: String,
    pub clean_path: String,
    pub version: String,
}

fn server_name(instance_url: &str) -> &str {
    let host = instance_url
        .strip_prefix("https://")
        .unwrap_or(instance_url);
    host.strip_prefix("http://").unwrap_or(host)
}

pub fn parse_component_path(path: &str, instance_url: &str) -> ComponentPath {
    let server = server_name(instance_url);
    let mut instance = "";
    let mut clean_path = path;

    for candidate in std::iter::once(server).chain(INSTANCE_PLACEHOLDERS.iter().copied()) {
        if let Some(rest) = path
            .strip_prefix(candidate)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            instance = candidate;
            clean_path = rest;
            break;
        }
    }

    let mut pieces = clean_path.split(COMPONENT_VERSION_SEPARATOR);
    let first = pieces.next().unwrap_or_default();
    let (clean_path, version) = match pieces.next() {
        Some(version) => (first, version),
        None => (clean_path, ""),
    };

    ComponentPath {
        instance: instance.to_string(),
        clean_path: clean_path.to_string(),
        version: version.to_string(),
    }
}

/// Catalog resources indexed by component path, with versions newest first.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    resources: Vec<CatalogResource>,
    by_path: HashMap<String, usize>,
    versions: HashMap<String, Vec<String>>,
}

impl CatalogIndex {
    pub fn build(resources: Vec<CatalogResource>, instance_url: &str) -> Self {
        let mut by_path = HashMap::new();
        let mut versions: HashMap<String, Vec<String>> = HashMap::new();

        for (idx, resource) in resources.iter().enumerate() {
            for version in &resource.versions {
                for component in &version.components {
                    let path = parse_component_path(&component.include_path, instance_url).clean_path;
                    by_path.insert(path.clone(), idx);
                    versions.entry(path).or_default().push(version.name.clone());
                }
            }
        }
        for list in versions.values_mut() {
            versions::sort_versions_desc(list);
        }

        Self {
            resources,
            by_path,
            versions,
        }
    }

    pub fn lookup(&self, clean_path: &str) -> Option<&CatalogResource> {
        self.by_path
            .get(clean_path)
            .and_then(|&idx| self.resources.get(idx))
    }

    pub fn latest_version(&self, clean_path: &str) -> &str {
        self.versions
            .get(clean_path)
            .and_then(|list| list.first())
            .map_or("", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Inputs declared on the includes of the original configuration, keyed by the
/// fingerprint the same include gets in the merged response.
pub type IncludeInputs = HashMap<u64, Mapping>;

pub fn build_inputs_map(original: &CiConfig, instance_url: &str) -> IncludeInputs {
    let mut map = IncludeInputs::new();
    for entry in &original.include {
        let Value::Mapping(fields) = entry else {
            continue;
        };
        let inputs = match fields.get("inputs") {
            Some(Value::Mapping(inputs)) if !inputs.is_empty() => inputs,
            _ => continue,
        };
        let location = include_location_from_entry(fields, instance_url);
        if let Ok(fingerprint) = location.fingerprint() {
            map.insert(fingerprint, inputs.clone());
        }
    }
    map
}

fn include_location_from_entry(fields: &Mapping, instance_url: &str) -> IncludeLocation {
    let text = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    let mut location = IncludeLocation::default();

    for include_type in [
        INCLUDE_COMPONENT,
        INCLUDE_LOCAL,
        INCLUDE_FILE,
        INCLUDE_REMOTE,
        INCLUDE_TEMPLATE,
    ] {
        if let Some(value) = text(include_type) {
            location.location = value;
            location.include_type = include_type.to_string();
            if include_type == INCLUDE_FILE {
                location.project = text("project").unwrap_or_default();
            }
            break;
        }
    }

    if location.include_type == INCLUDE_COMPONENT {
        let path = parse_component_path(&location.location, instance_url);
        let instance = if INSTANCE_PLACEHOLDERS.contains(&path.instance.as_str()) {
            server_name(instance_url)
        } else {
            path.instance.as_str()
        };
        location.location = format!("{instance}/{}", path.clean_path);
    }
    location
}

/// Attributes every job of the merged pipeline to the include that brought it in.
pub struct ProvenanceResolver<'a> {
    project: &'a ProjectInfo,
    instance_url: &'a str,
    catalog: CatalogIndex,
    inputs: IncludeInputs,
    ctx: LogContext,
}

impl<'a> ProvenanceResolver<'a> {
    pub fn new(
        project: &'a ProjectInfo,
        instance_url: &'a str,
        catalog: CatalogIndex,
        inputs: IncludeInputs,
        ctx: LogContext,
    ) -> Self {
        Self {
            project,
            instance_url,
            catalog,
            inputs,
            ctx,
        }
    }

    fn latest_refs(&self) -> [&str; 6] {
        [
            "HEAD",
            self.project.default_branch.as_str(),
            "latest",
            "~latest",
            "main",
            "master",
        ]
    }

    /// Build the origin for one include. `None` means the include is skipped.
    pub fn classify(&self, include: &CiInclude) -> Result<Option<Origin>> {
        let ctx = self.ctx.with_field("include", &include.location);
        let location = IncludeLocation {
            location: include.location.clone(),
            include_type: include.include_type.clone(),
            project: include.extra.project.clone(),
        };
        let kind = OriginKind::from_include_type(&include.include_type);
        let fingerprint = location.fingerprint()?;
        let mut origin = Origin::new(kind, location, fingerprint);
        origin.nested = include.context_project != self.project.path;

        match kind {
            OriginKind::Component => {
                let path = parse_component_path(&origin.include.location, self.instance_url);
                origin.include.location = format!("{}/{}", path.instance, path.clean_path);
                origin.fingerprint = origin.include.fingerprint()?;
                origin.version = path.version.clone();

                match self.catalog.lookup(&path.clean_path) {
                    Some(resource) => {
                        let component_name = path.clean_path.rsplit('/').next().unwrap_or_default();
                        if component_name.is_empty() {
                            ctx.warn("Component name is empty, skipping include");
                            return Ok(None);
                        }
                        let latest = self.catalog.latest_version(&path.clean_path);
                        origin.from_catalog = true;
                        origin.component = ComponentDetails {
                            repo_full_path: format!("{}/{component_name}", resource.full_path),
                            repo_web_path: resource.web_path.clone(),
                            repo_name: resource.name.clone(),
                            component_name: component_name.to_string(),
                            component_latest_version: latest.to_string(),
                            component_include_path: origin.include.location.clone(),
                        };
                        origin.up_to_date =
                            versions::is_up_to_date(&origin.version, latest, &self.latest_refs());
                        ctx.with_field("latest", latest)
                            .debug("Found matching catalog component");
                    }
                    None => ctx
                        .with_field("clean_path", &path.clean_path)
                        .debug("No matching catalog component"),
                }
            }
            OriginKind::Project => origin.version = include.extra.ref_.clone(),
            OriginKind::Unknown => ctx
                .with_field("type", &include.include_type)
                .error("Unknown include type"),
            _ => {}
        }

        Ok(Some(origin))
    }

    /// Walk the merged include list and return one origin per include, followed
    /// by the hardcoded bucket.
    pub async fn resolve(
        &self,
        source: &dyn CiConfigSource,
        includes: &[CiInclude],
        stages: &[String],
        table: &mut JobTable,
    ) -> Result<Vec<Origin>> {
        let mut origins = Vec::with_capacity(includes.len() + 1);

        for include in includes {
            let ctx = self.ctx.with_field("include", &include.location);
            let Some(mut origin) = self.classify(include)? else {
                continue;
            };
            let ctx = ctx.with_field("type", origin.kind.label());

            if origin.nested {
                ctx.debug("Nested include, jobs are not fetched");
                origins.push(origin);
                continue;
            }

            let inputs = self.inputs.get(&origin.fingerprint);
            let introduced = match source
                .fetch_include_jobs(
                    include,
                    &self.project.path,
                    &self.project.latest_commit_sha,
                    inputs,
                    stages,
                )
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    ctx.error(format!("Unable to fetch include: {e}"));
                    continue;
                }
            };
            ctx.with_field("jobs", introduced.len())
                .debug("Fetched include jobs");

            for parent in &introduced {
                let children = table.extended_by(parent).to_vec();
                for child in children {
                    match table.claim(&child) {
                        Some(job) => origin.jobs.push(job),
                        None => ctx
                            .with_field("job", &child)
                            .error("Job extending an included job is missing from the merged configuration"),
                    }
                }
            }

            for name in &introduced {
                match table.claim(name) {
                    Some(job) => origin.jobs.push(job),
                    None => ctx
                        .with_field("job", name)
                        .error("Included job is missing from the merged configuration"),
                }
            }

            origins.push(origin);
        }

        origins.push(self.hardcoded_origin(table));
        Ok(origins)
    }

    fn hardcoded_origin(&self, table: &JobTable) -> Origin {
        let mut origin = Origin::new(OriginKind::Hardcoded, IncludeLocation::default(), 0);
        for name in table.hardcoded_names() {
            match table.get(name) {
                Some(job) => origin.jobs.push(job.clone()),
                None => self
                    .ctx
                    .with_field("job", name)
                    .warn("Hardcoded job not found in the merged configuration"),
            }
        }
        origin
    }
}
