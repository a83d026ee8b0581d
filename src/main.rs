use clap::Parser;
use http_api_stacks::utils::error::{ErrorSeverity, SynthError};
use http_api_stacks::utils::{logger, validation::Validate};
use http_api_stacks::{assemble, App, CliArgs, LocalStorage, Synthesizer};

fn fail(stage: &str, e: &SynthError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
        stage,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

fn print_plan(app: &App) {
    println!("📝 Dry run, nothing written");
    for stack in app.stacks() {
        println!(
            "  • {} ({}): {} resources, {} outputs",
            stack.id(),
            stack.env(),
            stack.resource_count(),
            stack.outputs().count()
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting http-api-stacks CLI");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => fail("Loading configuration", &e),
    };
    let context = match args.context() {
        Ok(context) => context,
        Err(e) => fail("Parsing context", &e),
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        fail("Configuration validation", &e);
    }

    let app = match assemble(&config, &context) {
        Ok(app) => app,
        Err(e) => fail("Assembly", &e),
    };

    if args.dry_run {
        // 仍然完整合成一次，確保跨 stack 參照可以解析
        if let Err(e) = app.synth() {
            fail("Synthesis", &e);
        }
        print_plan(&app);
        return Ok(());
    }

    if args.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    let storage = LocalStorage::new(args.output.clone());
    let synthesizer = Synthesizer::new_with_monitoring(storage, args.monitor);

    match synthesizer.run(&app).await {
        Ok(report) => {
            tracing::info!("✅ Synthesis completed successfully!");
            println!("✅ Synthesized {} stack(s)", report.assembly.stacks.len());
            for file in &report.template_files {
                println!("📄 {}/{}", report.output_location, file);
            }
            for artifact in &report.assembly.stacks {
                for (id, output) in &artifact.template.outputs {
                    if output.get("Export").is_none() {
                        println!("🔗 {}.{} = {}", artifact.stack_id, id, output["Value"]);
                    }
                }
            }
        }
        Err(e) => fail("Synthesis", &e),
    }

    Ok(())
}
