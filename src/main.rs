use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use java_perf_radar::project_detector::detect_stack;
use java_perf_radar::report;
use java_perf_radar::{ScanConfig, Scanner};

/// Java Performance Anti-pattern Radar
///
/// CLI 工具，默认输出人类可读的 Markdown，日志写到 stderr
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// 输出 JSON 格式 (默认输出人类可读的 Markdown)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 🛰️ 雷达扫描 - 全项目 AST 分析
    Scan {
        /// 项目路径
        #[arg(short, long, default_value = ".")]
        path: PathBuf,

        /// 显示完整结果（默认只显示 P0）
        #[arg(long)]
        full: bool,

        /// 扫描配置文件 (默认 <path>/.java-perf.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// 扫描线程数
        #[arg(long)]
        threads: Option<usize>,
    },

    /// 📋 检测项目技术栈
    Detect {
        /// 项目路径
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// ⚠️ 列出所有规则
    Rules,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level `{level}`"))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn load_config(root: &Path, explicit: Option<&Path>, threads: Option<usize>) -> Result<ScanConfig> {
    let mut config = match explicit {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::discover(root)?,
    };
    if threads.is_some() {
        config.threads = threads;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    match args.command {
        Command::Scan {
            path,
            full,
            config,
            threads,
        } => {
            let config = load_config(&path, config.as_deref(), threads)?;
            let scanner = Scanner::new(config)?;
            let scan = scanner
                .scan(&path)
                .with_context(|| format!("scan of {} failed", path.display()))?;
            if args.json {
                println!("{}", report::render_json(&scan)?);
            } else {
                print!("{}", report::render_markdown(&scan, full));
            }
        }
        Command::Detect { path } => {
            let stack = detect_stack(&path);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stack)?);
            } else {
                print!("{}", report::render_stack_markdown(&stack));
            }
        }
        Command::Rules => {
            let scanner = Scanner::new(ScanConfig::default())?;
            let catalog = scanner.catalog();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report::rules_json(&catalog))?);
            } else {
                print!("{}", report::render_rules_markdown(&catalog));
            }
        }
    }
    Ok(())
}
