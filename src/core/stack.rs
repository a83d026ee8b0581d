use crate::domain::model::{ExportKey, Expr, Output, Parameter, RenderScope, Resource, Template};
use crate::domain::reference::{Environment, LogicalRef};
use crate::utils::error::{Result, SynthError};
use serde_json::Map;
use std::collections::{HashMap, HashSet};

/// 可獨立部署的一組資源
#[derive(Debug, Clone)]
pub struct Stack {
    id: String,
    env: Environment,
    description: Option<String>,
    parameters: Vec<(String, Parameter)>,
    resources: Vec<(String, Resource)>,
    outputs: Vec<(String, Output)>,
    logical_ids: HashSet<String>,
}

impl Stack {
    pub fn new(id: impl Into<String>, env: Environment) -> Self {
        Self {
            id: id.into(),
            env,
            description: None,
            parameters: Vec::new(),
            resources: Vec::new(),
            outputs: Vec::new(),
            logical_ids: HashSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// 將 construct id（例如 `"Fargate Cluster"`）轉成 logical id（`FargateCluster`）
    pub fn sanitize_id(id: &str) -> String {
        id.chars().filter(char::is_ascii_alphanumeric).collect()
    }

    fn claim_id(&mut self, id: &str) -> Result<String> {
        let logical_id = Self::sanitize_id(id);
        if logical_id.is_empty() {
            return Err(SynthError::InvalidConfigValueError {
                field: "construct id".to_string(),
                value: id.to_string(),
                reason: "Construct id must contain at least one alphanumeric character".to_string(),
            });
        }
        if !self.logical_ids.insert(logical_id.clone()) {
            return Err(SynthError::DuplicateConstructError {
                stack: self.id.clone(),
                id: logical_id,
            });
        }
        Ok(logical_id)
    }

    pub fn add_resource(&mut self, id: &str, resource: Resource) -> Result<LogicalRef> {
        let logical_id = self.claim_id(id)?;
        tracing::debug!(stack = %self.id, %logical_id, resource_type = %resource.resource_type, "declared resource");
        self.resources.push((logical_id.clone(), resource));
        Ok(LogicalRef::new(self.id.clone(), logical_id))
    }

    pub fn add_parameter(&mut self, id: &str, parameter: Parameter) -> Result<LogicalRef> {
        let logical_id = self.claim_id(id)?;
        self.parameters.push((logical_id.clone(), parameter));
        Ok(LogicalRef::new(self.id.clone(), logical_id))
    }

    pub fn add_output(&mut self, id: &str, output: Output) -> Result<()> {
        let logical_id = Self::sanitize_id(id);
        if logical_id.is_empty() || self.outputs.iter().any(|(k, _)| *k == logical_id) {
            return Err(SynthError::DuplicateConstructError {
                stack: self.id.clone(),
                id: id.to_string(),
            });
        }
        self.outputs.push((logical_id, output));
        Ok(())
    }

    /// 在建立之後補上依賴，例如 service 必須等 listener rule 建好；
    /// 兩者都必須是這個 stack 已宣告的資源
    pub fn add_dependency(&mut self, dependent: &LogicalRef, dependency: &LogicalRef) -> Result<()> {
        for target in [dependent, dependency] {
            if target.stack_id != self.id || !self.logical_ids.contains(&target.logical_id) {
                return Err(SynthError::UnresolvedReferenceError {
                    consumer: self.id.clone(),
                    producer: target.stack_id.clone(),
                    logical_id: target.logical_id.clone(),
                });
            }
        }

        let resource = self
            .resources
            .iter_mut()
            .find(|(id, _)| *id == dependent.logical_id)
            .map(|(_, resource)| resource)
            .ok_or_else(|| SynthError::ConfigError {
                message: format!("{} is not a resource and cannot carry dependencies", dependent),
            })?;
        if !resource.depends_on.contains(&dependency.logical_id) {
            resource.depends_on.push(dependency.logical_id.clone());
        }
        Ok(())
    }

    /// 在已宣告資源的清單屬性後加上 `item`，屬性不存在時建立清單
    pub fn append_to_property(&mut self, target: &LogicalRef, key: &str, item: Expr) -> Result<()> {
        let missing = || SynthError::UnresolvedReferenceError {
            consumer: self.id.clone(),
            producer: target.stack_id.clone(),
            logical_id: target.logical_id.clone(),
        };
        if target.stack_id != self.id {
            return Err(missing());
        }
        let position = self
            .resources
            .iter()
            .position(|(id, _)| *id == target.logical_id)
            .ok_or_else(missing)?;

        let resource = &mut self.resources[position].1;
        match resource.properties.iter_mut().find(|(k, _)| k == key) {
            Some((_, Expr::List(items))) => items.push(item),
            Some((_, other)) => {
                return Err(SynthError::ConfigError {
                    message: format!("Property {} of {} is not a list: {:?}", key, target, other),
                })
            }
            None => resource.properties.push((key.to_string(), Expr::List(vec![item]))),
        }
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|(id, _)| id == logical_id)
            .map(|(_, r)| r)
    }

    pub fn resources(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources.iter().map(|(id, r)| (id.as_str(), r))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&str, &Output)> {
        self.outputs.iter().map(|(id, o)| (id.as_str(), o))
    }

    pub fn has_logical_id(&self, logical_id: &str) -> bool {
        self.logical_ids.contains(logical_id)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.parameters.is_empty() && self.outputs.is_empty()
    }

    pub fn foreign_refs(&self) -> Vec<(&LogicalRef, Option<&str>)> {
        let mut refs = Vec::new();
        for (_, resource) in &self.resources {
            resource.foreign_refs(&self.id, &mut refs);
        }
        for (_, output) in &self.outputs {
            output.value.foreign_refs(&self.id, &mut refs);
        }
        refs
    }

    /// 依 imports 輸出模板，並把 `exports` 接在 stack 自己的 outputs 後面
    pub fn render(
        &self,
        imports: &HashMap<ExportKey, String>,
        exports: &[(String, Output)],
    ) -> Result<Template> {
        let scope = RenderScope::new(&self.id, imports);

        let mut parameters = Map::new();
        for (id, parameter) in &self.parameters {
            parameters.insert(id.clone(), serde_json::to_value(parameter)?);
        }

        let mut resources = Map::new();
        for (id, resource) in &self.resources {
            resources.insert(id.clone(), resource.render(&scope)?);
        }

        let mut outputs = Map::new();
        for (id, output) in self.outputs.iter().chain(exports) {
            outputs.insert(id.clone(), output.render(&scope)?);
        }

        Ok(Template {
            description: self.description.clone(),
            parameters,
            resources,
            outputs,
        })
    }

    /// 輸出不參照其他 stack 的模板
    pub fn to_template(&self) -> Result<Template> {
        self.render(&HashMap::new(), &[])
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
