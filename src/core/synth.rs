use crate::core::app::App;
use crate::core::assembly::{CloudAssembly, MANIFEST_FILE};
use crate::domain::ports::Storage;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct SynthesisReport {
    pub output_location: String,
    pub template_files: Vec<String>,
    pub assembly: CloudAssembly,
}

/// 執行一次合成並將 cloud assembly 寫入 storage
pub struct Synthesizer<S: Storage> {
    storage: S,
    monitor: SystemMonitor,
}

impl<S: Storage> Synthesizer<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            monitor: SystemMonitor::new(false),
        }
    }

    pub fn new_with_monitoring(storage: S, monitor_enabled: bool) -> Self {
        Self {
            storage,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self, app: &App) -> Result<SynthesisReport> {
        tracing::info!("Synthesizing {} stack(s)...", app.stacks().len());
        self.monitor.log_stats("Before synthesis");

        // 先完整合成，任何設定錯誤都會在寫檔前中止
        let assembly = app.synth()?;
        self.monitor.log_stats("Synthesis");

        // 先移除舊的 manifest 與不再產生的模板；manifest 最後才寫，
        // 中途失敗時輸出目錄不會有描述半套 assembly 的 manifest
        let previous = self.previous_template_files().await;
        self.storage.remove_file(MANIFEST_FILE).await?;
        for file in previous {
            if assembly.stacks.iter().all(|a| a.template_file() != file) {
                tracing::info!("🧹 Removing stale template {}", file);
                self.storage.remove_file(&file).await?;
            }
        }

        let mut template_files = Vec::with_capacity(assembly.stacks.len());
        for artifact in &assembly.stacks {
            let file = artifact.template_file();
            let body = serde_json::to_vec_pretty(&artifact.template)?;
            tracing::debug!("Writing {} ({} bytes)", file, body.len());
            self.storage.write_file(&file, &body).await?;
            template_files.push(file);
        }

        let manifest = serde_json::to_vec_pretty(&assembly.manifest())?;
        self.storage.write_file(MANIFEST_FILE, &manifest).await?;
        self.monitor.log_stats("Write");
        self.monitor.log_final_stats();

        let output_location = self.storage.location();
        tracing::info!("Cloud assembly written to {}", output_location);

        Ok(SynthesisReport {
            output_location,
            template_files,
            assembly,
        })
    }

    /// 上一次輸出的 manifest 所列的模板檔；讀不到或格式不對就當作沒有
    async fn previous_template_files(&self) -> Vec<String> {
        let data = match self.storage.read_file(MANIFEST_FILE).await {
            Ok(data) => data,
            Err(_) => return Vec::new(),
        };
        let manifest: Value = match serde_json::from_slice(&data) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("⚠️  Ignoring unreadable {}: {}", MANIFEST_FILE, e);
                return Vec::new();
            }
        };

        manifest["artifacts"]
            .as_object()
            .map(|artifacts| {
                artifacts
                    .values()
                    .filter_map(|a| a["properties"]["templateFile"].as_str())
                    // 只處理輸出目錄下的模板檔
                    .filter(|f| f.ends_with(".template.json") && !f.contains(['/', '\\']))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::Stack;
    use crate::domain::model::Resource;
    use crate::domain::reference::Environment;
    use crate::utils::error::SynthError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail_on: Option<String>,
    }

    impl MockStorage {
        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            self.files.lock().await.get(path).cloned()
        }
    }

    #[async_trait]
    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            self.files.lock().await.get(path).cloned().ok_or_else(|| {
                SynthError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            if self.fail_on.as_deref() == Some(path) {
                return Err(SynthError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("disk full: {}", path),
                )));
            }
            self.files
                .lock()
                .await
                .insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn remove_file(&self, path: &str) -> Result<()> {
            self.files.lock().await.remove(path);
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    #[tokio::test]
    async fn test_run_writes_templates_and_manifest() {
        let mut stack = Stack::new("MyTestStack", Environment::region("us-west-2"));
        stack
            .add_resource("Cluster", Resource::new("AWS::ECS::Cluster"))
            .unwrap();
        let mut app = App::new();
        app.add_stack(stack).unwrap();

        let storage = MockStorage::default();
        let report = Synthesizer::new(storage.clone()).run(&app).await.unwrap();

        assert_eq!(report.template_files, vec!["MyTestStack.template.json"]);
        assert_eq!(report.output_location, "memory");

        let template: serde_json::Value =
            serde_json::from_slice(&storage.get_file("MyTestStack.template.json").await.unwrap())
                .unwrap();
        assert_eq!(template["Resources"]["Cluster"]["Type"], "AWS::ECS::Cluster");

        let manifest = storage.read_file(MANIFEST_FILE).await.unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&manifest).unwrap();
        assert!(manifest["artifacts"]["MyTestStack"].is_object());
    }

    #[tokio::test]
    async fn test_failed_synthesis_writes_nothing() {
        let mut app = App::new();
        app.add_stack(Stack::new("A", Environment::default())).unwrap();
        let mut consumer = Stack::new("B", Environment::default());
        consumer
            .add_output(
                "Missing",
                crate::domain::model::Output::new(crate::domain::model::Expr::Ref(
                    crate::domain::reference::LogicalRef::new("A", "Nope"),
                )),
            )
            .unwrap();
        app.add_stack(consumer).unwrap();

        let storage = MockStorage::default();
        let result = Synthesizer::new(storage.clone()).run(&app).await;

        assert!(result.is_err());
        assert!(storage.files.lock().await.is_empty());
    }

    fn app_with(stack_ids: &[&str]) -> App {
        let mut app = App::new();
        for id in stack_ids {
            let mut stack = Stack::new(*id, Environment::region("us-west-2"));
            stack
                .add_resource("Cluster", Resource::new("AWS::ECS::Cluster"))
                .unwrap();
            app.add_stack(stack).unwrap();
        }
        app
    }

    #[tokio::test]
    async fn test_stale_templates_are_removed() {
        let storage = MockStorage::default();
        storage.write_file("notes.txt", b"keep me").await.unwrap();

        Synthesizer::new(storage.clone())
            .run(&app_with(&["FargateVpclinkStack", "HttpApiStack"]))
            .await
            .unwrap();
        assert!(storage.get_file("HttpApiStack.template.json").await.is_some());

        Synthesizer::new(storage.clone())
            .run(&app_with(&["HttpApiBlogCdkLatestStack"]))
            .await
            .unwrap();

        let mut files: Vec<String> = storage.files.lock().await.keys().cloned().collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                "HttpApiBlogCdkLatestStack.template.json",
                MANIFEST_FILE,
                "notes.txt"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_manifest() {
        let storage = MockStorage::default();
        Synthesizer::new(storage.clone())
            .run(&app_with(&["A", "B"]))
            .await
            .unwrap();
        assert!(storage.get_file(MANIFEST_FILE).await.is_some());

        let failing = MockStorage {
            files: storage.files.clone(),
            fail_on: Some("B.template.json".to_string()),
        };
        let result = Synthesizer::new(failing).run(&app_with(&["A", "B"])).await;

        assert!(matches!(result, Err(SynthError::IoError(_))));
        assert!(storage.get_file(MANIFEST_FILE).await.is_none());
    }
}
