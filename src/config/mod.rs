//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::pdf::{
    FontFamily, Margins, Orientation, PageSize, RendererConfig,
    renderer::DEFAULT_RENDER_TIMEOUT, service::DEFAULT_FETCH_TIMEOUT,
    store::DEFAULT_TEMP_FOLDER_NAME,
};

pub use cli::{
    CliArgs, Command, LoggingOverrides, PdfOverrides, RenderArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "folio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SITE_TITLE: &str = "folio";
const DEFAULT_PAGES_DIR: &str = "pages";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub pdf: PdfSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub title: String,
    /// Where page views are fetched from; `http://<server addr>/` when unset.
    pub base_url: Url,
    pub pages_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PdfSettings {
    pub temp_root: PathBuf,
    pub temp_folder: String,
    pub renderer: RendererConfig,
    pub render_timeout: Duration,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FOLIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    pdf: RawPdfSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(url) = overrides.site_base_url.as_ref() {
            self.site.base_url = Some(url.clone());
        }
        if let Some(dir) = overrides.site_pages_dir.as_ref() {
            self.site.pages_dir = Some(dir.clone());
        }

        self.apply_logging_overrides(&overrides.logging);
        self.apply_pdf_overrides(&overrides.pdf);
    }

    fn apply_render_overrides(&mut self, args: &RenderArgs) {
        if let Some(url) = args.site_base_url.as_ref() {
            self.site.base_url = Some(url.clone());
        }

        self.apply_logging_overrides(&args.logging);
        self.apply_pdf_overrides(&args.pdf);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_pdf_overrides(&mut self, overrides: &PdfOverrides) {
        if let Some(root) = overrides.temp_root.as_ref() {
            self.pdf.temp_root = Some(root.clone());
        }
        if let Some(size) = overrides.page_size.as_ref() {
            self.pdf.page_size = Some(size.clone());
        }
        if let Some(orientation) = overrides.orientation.as_ref() {
            self.pdf.orientation = Some(orientation.clone());
        }
        if let Some(header) = overrides.header_block {
            self.pdf.header_block = Some(header);
        }
        if let Some(timeout) = overrides.render_timeout_ms {
            self.pdf.render_timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            pdf,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let site = build_site_settings(site, &server)?;
        let pdf = build_pdf_settings(pdf)?;

        Ok(Self {
            server,
            logging,
            site,
            pdf,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(
    site: RawSiteSettings,
    server: &ServerSettings,
) -> Result<SiteSettings, LoadError> {
    let title = site
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| DEFAULT_SITE_TITLE.to_string());

    let raw_url = site
        .base_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| format!("http://{}/", server.addr));
    let base_url = normalize_base_url(&raw_url)
        .map_err(|reason| LoadError::invalid("site.base_url", reason))?;

    let pages_dir = site
        .pages_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PAGES_DIR));
    if pages_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "site.pages_dir",
            "path must not be empty",
        ));
    }

    Ok(SiteSettings {
        title,
        base_url,
        pages_dir,
    })
}

fn build_pdf_settings(pdf: RawPdfSettings) -> Result<PdfSettings, LoadError> {
    let temp_root = pdf.temp_root.unwrap_or_else(std::env::temp_dir);
    if temp_root.as_os_str().is_empty() {
        return Err(LoadError::invalid("pdf.temp_root", "path must not be empty"));
    }

    let temp_folder = pdf
        .temp_folder
        .unwrap_or_else(|| DEFAULT_TEMP_FOLDER_NAME.to_string());
    if temp_folder.is_empty() || temp_folder.contains(['/', '\\']) || temp_folder == ".." {
        return Err(LoadError::invalid(
            "pdf.temp_folder",
            "must be a single non-empty path segment",
        ));
    }

    let mut renderer = RendererConfig::default();

    renderer.page_size = match (pdf.page_width, pdf.page_height) {
        (Some(width), Some(height)) => PageSize::Custom {
            width: positive(width, "pdf.page_width")?,
            height: positive(height, "pdf.page_height")?,
        },
        (None, None) => match pdf.page_size {
            Some(size) => PageSize::from_str(&size)
                .map_err(|reason| LoadError::invalid("pdf.page_size", reason))?,
            None => renderer.page_size,
        },
        _ => {
            return Err(LoadError::invalid(
                "pdf.page_width",
                "page_width and page_height must be set together",
            ));
        }
    };

    if let Some(orientation) = pdf.orientation {
        renderer.orientation = Orientation::from_str(&orientation)
            .map_err(|reason| LoadError::invalid("pdf.orientation", reason))?;
    }
    if let Some(font) = pdf.body_font {
        renderer.body_font = FontFamily::from_str(&font)
            .map_err(|reason| LoadError::invalid("pdf.body_font", reason))?;
    }
    if let Some(font) = pdf.monospace_font {
        renderer.monospace_font = FontFamily::from_str(&font)
            .map_err(|reason| LoadError::invalid("pdf.monospace_font", reason))?;
    }

    let margins = pdf.margins;
    let defaults = Margins::default();
    renderer.margins = Margins {
        left: non_negative(margins.left.unwrap_or(defaults.left), "pdf.margins.left")?,
        top: non_negative(margins.top.unwrap_or(defaults.top), "pdf.margins.top")?,
        right: non_negative(margins.right.unwrap_or(defaults.right), "pdf.margins.right")?,
        bottom: non_negative(
            margins.bottom.unwrap_or(defaults.bottom),
            "pdf.margins.bottom",
        )?,
    };

    if let Some(value) = pdf.footer_margin {
        renderer.footer_margin = non_negative(value, "pdf.footer_margin")?;
    }
    if let Some(value) = pdf.body_font_size {
        renderer.body_font_size = positive(value, "pdf.body_font_size")?;
    }
    if let Some(value) = pdf.header_font_size {
        renderer.header_font_size = positive(value, "pdf.header_font_size")?;
    }
    if let Some(value) = pdf.footer_font_size {
        renderer.footer_font_size = positive(value, "pdf.footer_font_size")?;
    }
    if let Some(value) = pdf.auto_page_break {
        renderer.auto_page_break = value;
    }
    if let Some(value) = pdf.header_block {
        renderer.header_block = value;
    }
    if let Some(quality) = pdf.image_quality {
        if !(1..=100).contains(&quality) {
            return Err(LoadError::invalid(
                "pdf.image_quality",
                "must be between 1 and 100",
            ));
        }
        renderer.image_quality = quality;
    }

    let (page_width, _) = renderer.page_dimensions();
    if page_width - renderer.margins.left - renderer.margins.right <= 0.0 {
        return Err(LoadError::invalid(
            "pdf.margins",
            "horizontal margins leave no room for content",
        ));
    }
    if renderer.body_height() <= 0.0 {
        return Err(LoadError::invalid(
            "pdf.margins",
            "vertical margins and header leave no room for content",
        ));
    }

    let render_timeout = match pdf.render_timeout_ms {
        Some(millis) => timeout(millis, "pdf.render_timeout_ms")?,
        None => DEFAULT_RENDER_TIMEOUT,
    };
    let fetch_timeout = match pdf.fetch_timeout_ms {
        Some(millis) => timeout(millis, "pdf.fetch_timeout_ms")?,
        None => DEFAULT_FETCH_TIMEOUT,
    };

    Ok(PdfSettings {
        temp_root,
        temp_folder,
        renderer,
        render_timeout,
        fetch_timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    title: Option<String>,
    base_url: Option<String>,
    pages_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPdfSettings {
    temp_root: Option<PathBuf>,
    temp_folder: Option<String>,
    page_size: Option<String>,
    page_width: Option<f32>,
    page_height: Option<f32>,
    orientation: Option<String>,
    margins: RawMargins,
    footer_margin: Option<f32>,
    body_font: Option<String>,
    monospace_font: Option<String>,
    body_font_size: Option<f32>,
    header_font_size: Option<f32>,
    footer_font_size: Option<f32>,
    auto_page_break: Option<bool>,
    header_block: Option<bool>,
    image_quality: Option<u8>,
    render_timeout_ms: Option<u64>,
    fetch_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMargins {
    left: Option<f32>,
    top: Option<f32>,
    right: Option<f32>,
    bottom: Option<f32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn normalize_base_url(raw: &str) -> Result<Url, String> {
    let mut url = Url::parse(raw).map_err(|err| format!("invalid URL `{raw}`: {err}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn positive(value: f32, key: &'static str) -> Result<f32, LoadError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, "must be greater than zero"))
    }
}

fn non_negative(value: f32, key: &'static str) -> Result<f32, LoadError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, "must not be negative"))
    }
}

fn timeout(millis: u64, key: &'static str) -> Result<Duration, LoadError> {
    if millis == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(millis))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
