//! webfanyi 命令行入口
//!
//! 对本地 HTML 文件执行整页翻译、还原或按持久化语言重放。

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use webfanyi::html::{html_to_dom, serialize_document};
use webfanyi::translation::{
    PagePipeline, PageTransformer, TranslationConfig, TranslationResult,
};

#[derive(Parser)]
#[command(name = "webfanyi", about = "HTML 页面动态翻译管道", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 翻译一个 HTML 文件
    Translate {
        /// 输入 HTML 文件
        input: PathBuf,

        /// 目标语言；缺省使用配置中的目标语言
        #[arg(short, long)]
        lang: Option<String>,

        /// 输出文件；缺省写到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 还原一个已翻译的 HTML 文件
    Restore {
        /// 输入 HTML 文件
        input: PathBuf,

        /// 输出文件；缺省写到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 按持久化的活动语言重放翻译
    Resume {
        /// 输入 HTML 文件
        input: PathBuf,

        /// 输出文件；缺省写到标准输出
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> TranslationResult<()> {
    match cli.command {
        Command::Translate {
            input,
            lang,
            output,
        } => {
            let config = TranslationConfig::load()?;
            let target = lang.unwrap_or_else(|| config.target_lang.clone());

            let html = tokio::fs::read(&input).await?;
            let dom = html_to_dom(&html, "utf-8");

            let mut pipeline = PagePipeline::new(config)?;
            let report = pipeline.translate_page(&dom, &target).await?;

            eprintln!(
                "扫描 {} / 翻译 {} / 缓存命中 {} / 保持原文 {}",
                report.scanned, report.translated, report.from_cache, report.failed
            );

            write_output(output, serialize_document(&dom, "utf-8")).await
        }

        Command::Restore { input, output } => {
            let html = tokio::fs::read(&input).await?;
            let dom = html_to_dom(&html, "utf-8");

            let restored = PageTransformer::new().restore_all(&dom);
            eprintln!("还原 {} 个元素", restored);

            write_output(output, serialize_document(&dom, "utf-8")).await
        }

        Command::Resume { input, output } => {
            let config = TranslationConfig::load()?;
            let html = tokio::fs::read(&input).await?;
            let dom = html_to_dom(&html, "utf-8");

            let mut pipeline = PagePipeline::new(config)?;
            match pipeline.resume_if_persisted(&dom).await? {
                Some(report) => {
                    eprintln!(
                        "按持久化语言重放: 扫描 {} / 翻译 {}",
                        report.scanned, report.translated
                    );
                }
                None => {
                    eprintln!("没有持久化的活动语言，文档保持原样");
                }
            }

            write_output(output, serialize_document(&dom, "utf-8")).await
        }
    }
}

async fn write_output(output: Option<PathBuf>, bytes: Vec<u8>) -> TranslationResult<()> {
    match output {
        Some(path) => {
            tokio::fs::write(&path, bytes).await?;
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}
