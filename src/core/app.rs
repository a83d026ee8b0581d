use crate::core::assembly::{CloudAssembly, StackArtifact};
use crate::core::context::Context;
use crate::core::stack::Stack;
use crate::domain::model::{Expr, ExportKey, Output};
use crate::domain::reference::LogicalRef;
use crate::utils::error::{Result, SynthError};
use std::collections::{HashMap, HashSet};

/// 一次合成的所有 stack，依註冊順序
#[derive(Debug, Default)]
pub struct App {
    stacks: Vec<Stack>,
    context: Context,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: Context) -> Self {
        Self {
            stacks: Vec::new(),
            context,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn add_stack(&mut self, stack: Stack) -> Result<()> {
        if self.stacks.iter().any(|s| s.id() == stack.id()) {
            return Err(SynthError::DuplicateStackError {
                id: stack.id().to_string(),
            });
        }
        tracing::debug!("Registered stack {} ({})", stack.id(), stack.env());
        self.stacks.push(stack);
        Ok(())
    }

    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn stack(&self, id: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.id() == id)
    }

    /// 跨 stack 共用值的 export output id 與 export 名稱
    fn export_names(producer: &str, target: &LogicalRef, attribute: Option<&str>) -> (String, String) {
        let output_id = match attribute {
            None => format!("ExportsOutputRef{}", target.logical_id),
            Some(attribute) => format!(
                "ExportsOutputFnGetAtt{}{}",
                target.logical_id,
                Stack::sanitize_id(attribute)
            ),
        };
        let export_name = format!("{}:{}", producer, output_id);
        (output_id, export_name)
    }

    /// 合成所有 stack：解析跨 stack 參照，產生 export/import 配對
    pub fn synth(&self) -> Result<CloudAssembly> {
        let position: HashMap<&str, usize> = self
            .stacks
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();

        let mut exports: Vec<Vec<(String, Output)>> = vec![Vec::new(); self.stacks.len()];
        let mut imports: Vec<HashMap<ExportKey, String>> = vec![HashMap::new(); self.stacks.len()];
        let mut dependencies: Vec<Vec<String>> = vec![Vec::new(); self.stacks.len()];
        let mut exported: HashSet<ExportKey> = HashSet::new();

        for stack in self.stacks.iter().filter(|s| s.is_empty()) {
            tracing::warn!("⚠️  Stack {} has no resources or outputs", stack.id());
        }

        for (consumer_index, consumer) in self.stacks.iter().enumerate() {
            for (target, attribute) in consumer.foreign_refs() {
                let unresolved = || SynthError::UnresolvedReferenceError {
                    consumer: consumer.id().to_string(),
                    producer: target.stack_id.clone(),
                    logical_id: target.logical_id.clone(),
                };

                // producer 必須先於 consumer 註冊
                let producer_index = match position.get(target.stack_id.as_str()) {
                    Some(&index) if index < consumer_index => index,
                    _ => return Err(unresolved()),
                };
                let producer = &self.stacks[producer_index];

                if !producer.has_logical_id(&target.logical_id) {
                    return Err(unresolved());
                }

                if producer.env() != consumer.env() {
                    return Err(SynthError::CrossEnvironmentReferenceError {
                        consumer: consumer.id().to_string(),
                        consumer_env: consumer.env().to_string(),
                        producer: producer.id().to_string(),
                        producer_env: producer.env().to_string(),
                        logical_id: target.logical_id.clone(),
                    });
                }

                let key: ExportKey = (target.clone(), attribute.map(str::to_string));
                let (output_id, export_name) = Self::export_names(producer.id(), target, attribute);

                if exported.insert(key.clone()) {
                    let value = match attribute {
                        None => Expr::Ref(target.clone()),
                        Some(attribute) => Expr::GetAtt(target.clone(), attribute.to_string()),
                    };
                    tracing::debug!(
                        "Exporting {} from {} for {}",
                        target.logical_id,
                        producer.id(),
                        consumer.id()
                    );
                    exports[producer_index].push((output_id, Output::new(value).export(export_name.clone())));
                }
                imports[consumer_index].insert(key, export_name);

                if !dependencies[consumer_index].iter().any(|d| d == producer.id()) {
                    dependencies[consumer_index].push(producer.id().to_string());
                }
            }
        }

        let mut artifacts = Vec::with_capacity(self.stacks.len());
        for (index, stack) in self.stacks.iter().enumerate() {
            let template = stack.render(&imports[index], &exports[index])?;
            tracing::info!(
                "🧩 Synthesized {} ({} resources, {} outputs)",
                stack.id(),
                template.resources.len(),
                template.outputs.len()
            );
            artifacts.push(StackArtifact {
                stack_id: stack.id().to_string(),
                environment: stack.env().clone(),
                template,
                dependencies: std::mem::take(&mut dependencies[index]),
            });
        }

        Ok(CloudAssembly { stacks: artifacts })
    }
}
