use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the folio binary.
#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Serve pages and export them as PDF documents")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FOLIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(Box<ServeArgs>),
    /// Render a single document to a PDF file.
    Render(Box<RenderArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PdfOverrides {
    /// Override the directory holding the temporary PDF folder.
    #[arg(long = "pdf-temp-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub temp_root: Option<PathBuf>,

    /// Override the page size (a4|letter).
    #[arg(long = "pdf-page-size", value_name = "SIZE")]
    pub page_size: Option<String>,

    /// Override the page orientation (portrait|landscape).
    #[arg(long = "pdf-orientation", value_name = "ORIENTATION")]
    pub orientation: Option<String>,

    /// Toggle the document title header on every page.
    #[arg(
        long = "pdf-header-block",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub header_block: Option<bool>,

    /// Override the layout timeout.
    #[arg(long = "pdf-render-timeout-ms", value_name = "MILLIS")]
    pub render_timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub pdf: PdfOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the public site URL used to resolve page views.
    #[arg(long = "site-base-url", value_name = "URL")]
    pub site_base_url: Option<String>,

    /// Override the directory holding page documents.
    #[arg(long = "site-pages-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub site_pages_dir: Option<PathBuf>,
}

/// Exactly one source is rendered per invocation.
#[derive(Debug, Args, Clone)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["input", "url", "page"])
))]
pub struct RenderArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub pdf: PdfOverrides,

    /// Render an HTML file from disk.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub input: Option<PathBuf>,

    /// Render the markup served at a site-relative URL.
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Render a page by identifier through one of its actions.
    #[arg(long, value_name = "IDENTIFIER")]
    pub page: Option<String>,

    /// Page action fetched with --page.
    #[arg(long, default_value = "print", requires = "page", value_name = "ACTION")]
    pub action: String,

    /// Move the finished PDF here instead of leaving it in the temporary folder.
    #[arg(long, short = 'o', value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Override the public site URL used for --url and --page.
    #[arg(long = "site-base-url", value_name = "URL")]
    pub site_base_url: Option<String>,
}
