use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use super::core::GitLabClient;
use crate::error::Result;
use crate::providers::gitlab::collaborators::CatalogSource;
use crate::providers::gitlab::types::{CatalogComponent, CatalogResource, CatalogVersion};

const CATALOG_QUERY: &str = r#"
query getCatalogResources($scope: CiCatalogResourceScope) {
  ciCatalogResources(scope: $scope) {
    nodes {
      id
      name
      fullPath
      webPath
      versions {
        nodes {
          name
          components {
            nodes {
              id
              name
              includePath
            }
          }
        }
      }
    }
  }
}
"#;

#[derive(Serialize)]
struct CatalogVariables {
    scope: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogData {
    ci_catalog_resources: Option<Nodes<ResourceNode>>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Nodes<T> {
    #[serde(default)]
    nodes: Vec<T>,
}

impl<T> Default for Nodes<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceNode {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    full_path: String,
    #[serde(default)]
    web_path: String,
    #[serde(default)]
    versions: Option<Nodes<VersionNode>>,
}

#[derive(Deserialize)]
struct VersionNode {
    #[serde(default)]
    name: String,
    #[serde(default)]
    components: Option<Nodes<ComponentNode>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentNode {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    include_path: String,
}

impl From<ResourceNode> for CatalogResource {
    fn from(node: ResourceNode) -> Self {
        Self {
            id: node.id,
            name: node.name,
            full_path: node.full_path,
            web_path: node.web_path,
            versions: node
                .versions
                .unwrap_or_default()
                .nodes
                .into_iter()
                .map(|version| CatalogVersion {
                    name: version.name,
                    components: version
                        .components
                        .unwrap_or_default()
                        .nodes
                        .into_iter()
                        .map(|component| CatalogComponent {
                            id: component.id,
                            name: component.name,
                            include_path: component.include_path,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl CatalogSource for GitLabClient {
    async fn fetch_catalog(&self, is_group: bool) -> Result<Vec<CatalogResource>> {
        let scope = if is_group { "NAMESPACES" } else { "ALL" };
        let data: CatalogData = self
            .execute_graphql_request("getCatalogResources", CATALOG_QUERY, CatalogVariables { scope })
            .await?;

        let resources: Vec<CatalogResource> = data
            .ci_catalog_resources
            .unwrap_or_default()
            .nodes
            .into_iter()
            .map(CatalogResource::from)
            .collect();
        debug!("Fetched {} catalog resources (scope {scope})", resources.len());
        Ok(resources)
    }
}
