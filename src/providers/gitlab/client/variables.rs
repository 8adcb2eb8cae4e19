use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use super::core::{GitLabClient, PageInfo};
use crate::error::Result;
use crate::providers::gitlab::collaborators::VariableSource;
use crate::providers::gitlab::types::CiVariable;
use crate::providers::gitlab::variables::merge_inherited;

const INSTANCE_VARIABLES_QUERY: &str = r#"
query getInstanceVariables($after: String) {
  ciVariables(after: $after) {
    pageInfo {
      hasNextPage
      endCursor
    }
    nodes {
      key
      value
      variableType
      masked
      protected
    }
  }
}
"#;

const PROJECT_VARIABLES_QUERY: &str = r#"
query getProjectVariables($fullPath: ID!, $after: String) {
  project(fullPath: $fullPath) {
    ciVariables(after: $after) {
      pageInfo {
        hasNextPage
        endCursor
      }
      nodes {
        key
        value
        variableType
        masked
        protected
        environmentScope
      }
    }
  }
}
"#;

// Three levels of groups: the project's group and two ancestors.
const GROUP_VARIABLES_QUERY: &str = r#"
query getProjectGroupsVariables($fullPath: ID!) {
  project(fullPath: $fullPath) {
    group {
      ciVariables { nodes { key value variableType masked protected environmentScope } }
      parent {
        ciVariables { nodes { key value variableType masked protected environmentScope } }
        parent {
          ciVariables { nodes { key value variableType masked protected environmentScope } }
        }
      }
    }
  }
}
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VariablesQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    full_path: Option<&'a str>,
    after: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariableConnection {
    #[serde(default)]
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<CiVariable>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceData {
    ci_variables: Option<VariableConnection>,
}

#[derive(Deserialize)]
struct ProjectData<P> {
    project: Option<P>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectVariables {
    ci_variables: Option<VariableConnection>,
}

#[derive(Deserialize)]
struct ProjectGroup {
    group: Option<GroupNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupNode {
    ci_variables: Option<VariableConnection>,
    #[serde(default)]
    parent: Option<Box<GroupNode>>,
}

impl GitLabClient {
    /// Walk a cursor-paginated `ciVariables` connection until the last page.
    async fn collect_variable_pages<T, F>(
        &self,
        operation_name: &'static str,
        query: &'static str,
        full_path: Option<&str>,
        connection: F,
    ) -> Result<Vec<CiVariable>>
    where
        T: serde::de::DeserializeOwned,
        F: Fn(T) -> Option<VariableConnection>,
    {
        let mut variables = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let data: T = self
                .execute_graphql_request(operation_name, query, VariablesQuery { full_path, after })
                .await?;
            let Some(page) = connection(data) else {
                break;
            };
            variables.extend(page.nodes);
            match page.page_info.end_cursor {
                Some(cursor) if page.page_info.has_next_page => after = Some(cursor),
                _ => break,
            }
        }

        Ok(variables)
    }
}

#[async_trait]
impl VariableSource for GitLabClient {
    async fn instance_variables(&self) -> Result<Vec<CiVariable>> {
        let variables = self
            .collect_variable_pages(
                "getInstanceVariables",
                INSTANCE_VARIABLES_QUERY,
                None,
                |data: InstanceData| data.ci_variables,
            )
            .await?;
        debug!("Fetched {} instance variables", variables.len());
        Ok(variables)
    }

    async fn group_variables(&self, project_path: &str) -> Result<Vec<CiVariable>> {
        let data: ProjectData<ProjectGroup> = self
            .execute_graphql_request(
                "getProjectGroupsVariables",
                GROUP_VARIABLES_QUERY,
                VariablesQuery {
                    full_path: Some(project_path),
                    after: None,
                },
            )
            .await?;

        let mut levels = Vec::new();
        let mut group = data.project.and_then(|project| project.group).map(Box::new);
        while let Some(node) = group {
            levels.push(node.ci_variables.map(|c| c.nodes).unwrap_or_default());
            group = node.parent;
        }

        let variables = merge_inherited(&levels);
        debug!(
            "Fetched {} inherited variables over {} group levels",
            variables.len(),
            levels.len()
        );
        Ok(variables)
    }

    async fn project_variables(&self, project_path: &str) -> Result<Vec<CiVariable>> {
        let variables = self
            .collect_variable_pages(
                "getProjectVariables",
                PROJECT_VARIABLES_QUERY,
                Some(project_path),
                |data: ProjectData<ProjectVariables>| data.project.and_then(|p| p.ci_variables),
            )
            .await?;
        debug!("Fetched {} project variables", variables.len());
        Ok(variables)
    }
}
