//! `filedrop` - deliver files to a list of recipients over SMTP.
//!
//! Exit codes: 0 when every recipient got the message, 1 when some
//! recipients failed or the run was interrupted, 2 when nothing could be
//! sent (bad arguments, configuration, files, delivery list or session).

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;

use std::fs::File;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use filedrop_core::{
    DeliveryCoordinator, DeliveryError, DeliveryList, DeliveryOptions, DeliveryReport,
    DeliveryRequest, Settings, SmtpSession,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Args, Command};

const EXIT_FAILURES: u8 = 1;
const EXIT_UNUSABLE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            cli::print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Deliver(args)) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            cli::print_usage();
            return ExitCode::from(EXIT_UNUSABLE);
        }
    };

    if let Err(e) = init_logging(args.log_file.as_deref()) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_UNUSABLE);
    }

    match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_UNUSABLE)
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filedrop=info,filedrop_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

async fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let mut settings =
        Settings::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(provider) = args.provider {
        settings.apply_provider(provider);
    }
    if let Some(email) = &args.sender_email {
        settings.sender_email.clone_from(email);
    }
    if let Some(password) = &args.sender_password {
        settings.sender_password = Some(password.clone());
    }
    if let Some(name) = &args.sender_name {
        settings.sender_name = Some(name.clone());
    }

    let credentials = settings
        .credentials(args.security)
        .context("invalid configuration")?;
    info!(
        server = %credentials.host,
        port = credentials.port,
        security = %credentials.security,
        sender = %credentials.identity,
        "using SMTP relay"
    );

    let mut request = DeliveryRequest::new(args.files.iter().cloned());
    request.subject.clone_from(&args.subject);
    request.body.clone_from(&args.body);
    request.sender_name.clone_from(&settings.sender_name);

    let mut options = DeliveryOptions::default();
    if let Some(timeout) = args.timeout {
        options = options.with_timeout(timeout);
    }
    if let Some(workers) = args.workers {
        options = options.with_workers(workers);
    }

    let source = DeliveryList::File(args.delivery_list.clone());
    let coordinator = DeliveryCoordinator::with_options(SmtpSession::new, options);

    match coordinator
        .deliver_until(&request, &source, &credentials, interrupted())
        .await
    {
        Ok(report) => {
            print_report(&report, args.json)?;
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILURES)
            })
        }
        Err(DeliveryError::Cancelled(report)) => {
            warn!("interrupted; partial results follow");
            print_report(&report, args.json)?;
            Ok(ExitCode::from(EXIT_FAILURES))
        }
        Err(e) => Err(e).context("delivery did not start"),
    }
}

/// Completes on Ctrl-C; never completes if the handler cannot be installed.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Ctrl-C received, cancelling delivery"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

fn print_report(report: &DeliveryReport, json: bool) -> anyhow::Result<()> {
    if json {
        let text = serde_json::to_string_pretty(report).context("failed to render report")?;
        println!("{text}");
    } else {
        println!("{report}");
    }
    Ok(())
}
