use crate::domain::reference::LogicalRef;
use crate::utils::error::{Result, SynthError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// CloudFormation 虛擬參數
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pseudo {
    AccountId,
    Partition,
    Region,
    StackName,
    UrlSuffix,
}

impl Pseudo {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pseudo::AccountId => "AWS::AccountId",
            Pseudo::Partition => "AWS::Partition",
            Pseudo::Region => "AWS::Region",
            Pseudo::StackName => "AWS::StackName",
            Pseudo::UrlSuffix => "AWS::URLSuffix",
        }
    }
}

/// 模板中的值。參照帶有所屬 stack，合成時才能區分本地與跨 stack 參照
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ref(LogicalRef),
    GetAtt(LogicalRef, String),
    Pseudo(Pseudo),
    Join(String, Vec<Expr>),
    Select(usize, Box<Expr>),
    GetAzs,
    ImportValue(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
}

impl Expr {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Expr)>,
    {
        Expr::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list<I: IntoIterator<Item = Expr>>(items: I) -> Self {
        Expr::List(items.into_iter().collect())
    }

    /// 空分隔字元的 `Fn::Join`
    pub fn concat<I: IntoIterator<Item = Expr>>(parts: I) -> Self {
        Expr::Join(String::new(), parts.into_iter().collect())
    }

    /// `Fn::Select [index, Fn::GetAZs ""]`
    pub fn availability_zone(index: usize) -> Self {
        Expr::Select(index, Box::new(Expr::GetAzs))
    }

    /// 收集所有指向 `stack_id` 以外的參照
    pub fn foreign_refs<'a>(&'a self, stack_id: &str, out: &mut Vec<(&'a LogicalRef, Option<&'a str>)>) {
        match self {
            Expr::Ref(target) if target.stack_id != stack_id => out.push((target, None)),
            Expr::GetAtt(target, attribute) if target.stack_id != stack_id => {
                out.push((target, Some(attribute.as_str())))
            }
            Expr::Join(_, parts) | Expr::List(parts) => {
                for part in parts {
                    part.foreign_refs(stack_id, out);
                }
            }
            Expr::Select(_, inner) => inner.foreign_refs(stack_id, out),
            Expr::Map(entries) => {
                for (_, value) in entries {
                    value.foreign_refs(stack_id, out);
                }
            }
            _ => {}
        }
    }

    pub fn render(&self, scope: &RenderScope<'_>) -> Result<Value> {
        let rendered = match self {
            Expr::Literal(value) => value.clone(),
            Expr::Ref(target) if target.stack_id == scope.stack_id => {
                json!({ "Ref": target.logical_id })
            }
            Expr::GetAtt(target, attribute) if target.stack_id == scope.stack_id => {
                json!({ "Fn::GetAtt": [target.logical_id, attribute] })
            }
            Expr::Ref(target) => scope.import(target, None)?,
            Expr::GetAtt(target, attribute) => scope.import(target, Some(attribute))?,
            Expr::Pseudo(pseudo) => json!({ "Ref": pseudo.as_str() }),
            Expr::Join(delimiter, parts) => {
                let parts = parts
                    .iter()
                    .map(|part| part.render(scope))
                    .collect::<Result<Vec<_>>>()?;
                json!({ "Fn::Join": [delimiter, parts] })
            }
            Expr::Select(index, inner) => json!({ "Fn::Select": [index, inner.render(scope)?] }),
            Expr::GetAzs => json!({ "Fn::GetAZs": "" }),
            Expr::ImportValue(name) => json!({ "Fn::ImportValue": name }),
            Expr::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.render(scope))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Map(entries) => {
                let mut object = Map::new();
                for (key, value) in entries {
                    object.insert(key.clone(), value.render(scope)?);
                }
                Value::Object(object)
            }
        };
        Ok(rendered)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(Value::String(value))
    }
}

impl From<u32> for Expr {
    fn from(value: u32) -> Self {
        Expr::Literal(Value::from(value))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(Value::Bool(value))
    }
}

/// 跨 stack export 的鍵：producer 的資源，`Fn::GetAtt` 時再加上屬性名稱
pub type ExportKey = (LogicalRef, Option<String>);

/// 在單一 stack 內輸出運算式所需的資訊
pub struct RenderScope<'a> {
    pub stack_id: &'a str,
    pub imports: &'a HashMap<ExportKey, String>,
}

impl<'a> RenderScope<'a> {
    pub fn new(stack_id: &'a str, imports: &'a HashMap<ExportKey, String>) -> Self {
        Self { stack_id, imports }
    }

    fn import(&self, target: &LogicalRef, attribute: Option<&str>) -> Result<Value> {
        let key = (target.clone(), attribute.map(str::to_string));
        match self.imports.get(&key) {
            Some(export_name) => Ok(json!({ "Fn::ImportValue": export_name })),
            None => Err(SynthError::UnresolvedReferenceError {
                consumer: self.stack_id.to_string(),
                producer: target.stack_id.clone(),
                logical_id: target.logical_id.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub properties: Vec<(String, Expr)>,
    pub depends_on: Vec<String>,
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Vec::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Expr> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn foreign_refs<'a>(&'a self, stack_id: &str, out: &mut Vec<(&'a LogicalRef, Option<&'a str>)>) {
        for (_, value) in &self.properties {
            value.foreign_refs(stack_id, out);
        }
    }

    pub fn render(&self, scope: &RenderScope<'_>) -> Result<Value> {
        let mut object = Map::new();
        object.insert("Type".to_string(), Value::String(self.resource_type.clone()));
        if !self.properties.is_empty() {
            let mut properties = Map::new();
            for (key, value) in &self.properties {
                properties.insert(key.clone(), value.render(scope)?);
            }
            object.insert("Properties".to_string(), Value::Object(properties));
        }
        if !self.depends_on.is_empty() {
            object.insert("DependsOn".to_string(), json!(self.depends_on));
        }
        if let Some(policy) = self.deletion_policy {
            let policy = serde_json::to_value(policy)?;
            object.insert("UpdateReplacePolicy".to_string(), policy.clone());
            object.insert("DeletionPolicy".to_string(), policy);
        }
        Ok(Value::Object(object))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Expr,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

impl Output {
    pub fn new(value: impl Into<Expr>) -> Self {
        Self {
            value: value.into(),
            description: None,
            export_name: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn export(mut self, name: impl Into<String>) -> Self {
        self.export_name = Some(name.into());
        self
    }

    pub fn render(&self, scope: &RenderScope<'_>) -> Result<Value> {
        let mut object = Map::new();
        if let Some(description) = &self.description {
            object.insert("Description".to_string(), Value::String(description.clone()));
        }
        object.insert("Value".to_string(), self.value.render(scope)?);
        if let Some(name) = &self.export_name {
            object.insert("Export".to_string(), json!({ "Name": name }));
        }
        Ok(Value::Object(object))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,
    #[serde(rename = "Default", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 輸出後的 CloudFormation 模板。空的區段會省略，所以空 stack 輸出 `{}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Parameters", default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(rename = "Resources", default, skip_serializing_if = "Map::is_empty")]
    pub resources: Map<String, Value>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,
}

impl Template {
    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.resources.get(logical_id)
    }

    /// 指定型別的所有資源 logical id，依宣告順序
    pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r["Type"] == resource_type)
            .map(|(id, _)| id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: &str) -> LogicalRef {
        LogicalRef::new("Producer", id)
    }

    #[test]
    fn test_local_references_render_as_ref_and_getatt() {
        let imports = HashMap::new();
        let scope = RenderScope::new("Producer", &imports);

        let value = Expr::list([
            Expr::Ref(local("HttpVpcLink")),
            Expr::GetAtt(local("Alb"), "DNSName".to_string()),
        ])
        .render(&scope)
        .unwrap();

        assert_eq!(
            value,
            json!([
                { "Ref": "HttpVpcLink" },
                { "Fn::GetAtt": ["Alb", "DNSName"] }
            ])
        );
    }

    #[test]
    fn test_foreign_reference_requires_import() {
        let imports = HashMap::new();
        let scope = RenderScope::new("Consumer", &imports);
        let err = Expr::Ref(local("HttpVpcLink")).render(&scope).unwrap_err();
        assert!(matches!(err, SynthError::UnresolvedReferenceError { .. }));

        let mut imports = HashMap::new();
        imports.insert(
            (local("HttpVpcLink"), None),
            "Producer:ExportsOutputRefHttpVpcLink".to_string(),
        );
        let scope = RenderScope::new("Consumer", &imports);
        assert_eq!(
            Expr::Ref(local("HttpVpcLink")).render(&scope).unwrap(),
            json!({ "Fn::ImportValue": "Producer:ExportsOutputRefHttpVpcLink" })
        );
    }

    #[test]
    fn test_foreign_refs_walks_nested_expressions() {
        let expr = Expr::map([(
            "SubnetIds",
            Expr::list([
                Expr::Ref(local("SubnetA")),
                Expr::concat([Expr::from("x"), Expr::GetAtt(local("Api"), "ApiEndpoint".into())]),
            ]),
        )]);

        let mut refs = Vec::new();
        expr.foreign_refs("Consumer", &mut refs);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].1, Some("ApiEndpoint"));

        let mut refs = Vec::new();
        expr.foreign_refs("Producer", &mut refs);
        assert!(refs.is_empty());
    }

    #[test]
    fn test_empty_template_serializes_to_empty_object() {
        let template = Template::default();
        assert_eq!(serde_json::to_value(&template).unwrap(), json!({}));
    }

    #[test]
    fn test_resource_with_deletion_policy() {
        let imports = HashMap::new();
        let scope = RenderScope::new("Producer", &imports);
        let resource = Resource::new("AWS::Logs::LogGroup")
            .prop("LogGroupName", "/ecs/BookService")
            .deletion_policy(DeletionPolicy::Delete);

        let value = resource.render(&scope).unwrap();
        assert_eq!(value["Properties"]["LogGroupName"], "/ecs/BookService");
        assert_eq!(value["DeletionPolicy"], "Delete");
        assert_eq!(value["UpdateReplacePolicy"], "Delete");
    }
}
