use std::{future::IntoFuture, path::Path, process, sync::Arc};

use folio::{
    application::{
        error::AppError,
        page::PageService,
        pdf::{
            Delivered, HttpViewResolver, OutputTarget, PdfService, PrintPdfBackend, RenderRequest,
            RenderSource, TempOutputStore,
        },
    },
    config::{self, RenderArgs, Settings},
    domain::pages::PageIdentifier,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        pages::FilePagesRepo,
        telemetry,
    },
    presentation::views::SiteView,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const DEFAULT_OUTPUT_NAME: &str = "document.pdf";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, *args).await,
    }
}

fn build_pdf_service(settings: &Settings) -> Result<PdfService, AppError> {
    let store = TempOutputStore::new(&settings.pdf.temp_root, settings.pdf.temp_folder.clone());
    let resolver = HttpViewResolver::new(settings.site.base_url.as_str())?;

    Ok(PdfService::new(
        Arc::new(store),
        Arc::new(PrintPdfBackend),
        Arc::new(resolver),
    )
    .with_renderer_config(settings.pdf.renderer.clone())
    .with_timeouts(settings.pdf.fetch_timeout, settings.pdf.render_timeout))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let pdf = build_pdf_service(&settings)?;
    let pages = PageService::new(Arc::new(FilePagesRepo::new(&settings.site.pages_dir)));

    let state = HttpState {
        pages: Arc::new(pages),
        pdf: Arc::new(pdf),
        site: SiteView {
            title: settings.site.title.clone(),
            base_href: Some(settings.site.base_url.to_string()),
        },
    };

    serve_http(&settings, state).await
}

async fn serve_http(settings: &Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "folio::serve",
        addr = %settings.server.addr,
        pages_dir = %settings.site.pages_dir.display(),
        "Listening"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            return result.map_err(|err| AppError::unexpected(format!("server error: {err}")));
        }
        _ = shutdown_signal() => {}
    }

    let grace = settings.server.graceful_shutdown;
    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
            info!(target = "folio::serve", "Shut down cleanly");
            Ok(())
        }
        Err(_) => {
            warn!(
                target = "folio::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<(), AppError> {
    let pdf = build_pdf_service(&settings)?;

    let output_name = args
        .output
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_OUTPUT_NAME)
        .to_string();

    let source = if let Some(input) = args.input.as_ref() {
        let markup = tokio::fs::read_to_string(input)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?;
        RenderSource::Markup(markup)
    } else if let Some(url) = args.url.as_ref() {
        RenderSource::Url(url.clone())
    } else if let Some(page) = args.page.as_ref() {
        let identifier = PageIdentifier::parse(page.as_str())?;
        RenderSource::page(&identifier, &args.action)
    } else {
        return Err(AppError::unexpected(
            "render needs one of --input, --url or --page",
        ));
    };

    let delivered = pdf
        .render(RenderRequest::new(source, OutputTarget::File, &output_name))
        .await?;

    let Delivered::File(path) = delivered else {
        return Err(AppError::unexpected("file render did not produce a file"));
    };

    let final_path = match args.output.as_ref() {
        Some(output) => {
            move_file(&path, output).await?;
            output.clone()
        }
        None => path,
    };

    info!(
        target = "folio::render",
        path = %final_path.display(),
        "PDF written"
    );
    println!("{}", final_path.display());
    Ok(())
}

/// Rename when possible; fall back to copy and delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<(), AppError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    if let Err(err) = tokio::fs::remove_file(from).await {
        warn!(
            target = "folio::render",
            path = %from.display(),
            error = %err,
            "Failed to remove temporary PDF after copying"
        );
    }
    Ok(())
}
