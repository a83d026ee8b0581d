use crate::domain::model::Template;
use crate::domain::reference::Environment;
use serde_json::{json, Map, Value};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: &str = "36.0.0";

/// 合成後的單一 stack
#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    pub stack_id: String,
    pub environment: Environment,
    pub template: Template,
    /// 必須先部署的 stack，依註冊順序
    pub dependencies: Vec<String>,
}

impl StackArtifact {
    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.stack_id)
    }
}

/// 一次合成的結果：依部署順序排列的 stack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudAssembly {
    pub stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    pub fn stack(&self, stack_id: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|s| s.stack_id == stack_id)
    }

    pub fn stack_ids(&self) -> Vec<&str> {
        self.stacks.iter().map(|s| s.stack_id.as_str()).collect()
    }

    pub fn manifest(&self) -> Value {
        let mut artifacts = Map::new();
        for stack in &self.stacks {
            let mut artifact = json!({
                "type": "aws:cloudformation:stack",
                "environment": stack.environment.to_string(),
                "properties": {
                    "templateFile": stack.template_file(),
                },
            });
            if !stack.dependencies.is_empty() {
                artifact["dependencies"] = json!(stack.dependencies);
            }
            artifacts.insert(stack.stack_id.clone(), artifact);
        }

        json!({
            "version": MANIFEST_VERSION,
            "artifacts": artifacts,
        })
    }
}
