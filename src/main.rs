use clap::Parser;
use quota_gauge::utils::error::{kind_severity, ErrorSeverity};
use quota_gauge::utils::{logger, validation::Validate};
use quota_gauge::{
    CheckConfig, CliConfig, DomainQuotaResult, ErrorKind, QuotaCheck, QuotaError, QuotaStatus,
    Reporter, ResolvedInstance, SoapAdminSession,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting quota-gauge");
    tracing::info!("📁 Loading configuration from: {}", cli.config);

    // 載入並驗證配置
    let config = match CheckConfig::from_file(&cli.config).and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };

    let instances = match select_instances(&config, cli.domain.as_deref()) {
        Ok(instances) => instances,
        Err(e) => exit_with(&e),
    };

    tracing::info!("✅ Configuration loaded: {} instance(s)", instances.len());

    if cli.dry_run {
        tracing::info!("🔍 DRY RUN MODE - the admin server will not be contacted");
        display_dry_run(&config, &instances);
        return Ok(());
    }

    let reporter = match Reporter::from_config(&config.reporter).await {
        Ok(reporter) => reporter,
        Err(e) => exit_with(&e),
    };

    let worst = run_instances(&instances, &reporter, cli.json, shutdown_signal()).await;

    let exit_code = worst.exit_code();
    if exit_code > 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

fn select_instances(
    config: &CheckConfig,
    domain: Option<&str>,
) -> quota_gauge::Result<Vec<ResolvedInstance>> {
    let instances = config.resolved_instances()?;
    let Some(domain) = domain else {
        return Ok(instances);
    };

    let selected: Vec<_> = instances
        .into_iter()
        .filter(|instance| instance.domain.eq_ignore_ascii_case(domain))
        .collect();
    if selected.is_empty() {
        return Err(QuotaError::ConfigValidationError {
            field: "--domain".to_string(),
            message: format!("no instance is configured for domain '{}'", domain),
        });
    }
    Ok(selected)
}

/// One listener for the whole process; the flag stays set once Ctrl-C arrives.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, abandoning the remaining cycles");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|interrupted| *interrupted).await.is_err() {
        // sender gone without a signal: never cancel
        std::future::pending::<()>().await;
    }
}

/// 每個實例各自完成一次獨立的收集週期，收到中斷後不再開始新的週期
async fn run_instances(
    instances: &[ResolvedInstance],
    reporter: &Reporter,
    json: bool,
    shutdown: watch::Receiver<bool>,
) -> ErrorSeverity {
    let mut worst = ErrorSeverity::Low;
    for (index, instance) in instances.iter().enumerate() {
        if *shutdown.borrow() {
            tracing::warn!(
                "⏹️ Skipping {} remaining instance(s) after interrupt",
                instances.len() - index
            );
            worst = worst.max(kind_severity(ErrorKind::Cancelled));
            break;
        }
        let severity = run_instance(instance, reporter, json, shutdown.clone()).await;
        worst = worst.max(severity);
    }
    worst
}

async fn run_instance(
    instance: &ResolvedInstance,
    reporter: &Reporter,
    json: bool,
    shutdown: watch::Receiver<bool>,
) -> ErrorSeverity {
    let session = match SoapAdminSession::new(instance) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("❌ Cannot build admin client for {}: {}", instance.domain, e);
            return e.severity();
        }
    };

    let mut check =
        QuotaCheck::new(session, reporter, instance.domain.clone()).with_timeout(instance.timeout);

    match check.run_until(wait_for_shutdown(shutdown)).await {
        Ok(run) => {
            if json {
                match serde_json::to_string(&run) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!("❌ Cannot serialize cycle outcome: {}", e),
                }
            } else {
                println!("{}", summary_line(&run.result));
            }
            result_severity(&run.result)
        }
        Err(e) => {
            tracing::error!(
                "❌ Reporting for {} failed: {} (Category: {:?}, Severity: {:?})",
                check.domain(),
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            e.severity()
        }
    }
}

fn result_severity(result: &DomainQuotaResult) -> ErrorSeverity {
    match (result.status, result.failure_kind()) {
        (QuotaStatus::Failed, Some(kind)) => {
            tracing::error!(
                "💡 Suggestion: {}",
                quota_gauge::utils::error::kind_recovery_suggestion(kind)
            );
            kind_severity(kind)
        }
        (QuotaStatus::Failed, None) => ErrorSeverity::High,
        _ => ErrorSeverity::Low,
    }
}

fn summary_line(result: &DomainQuotaResult) -> String {
    match result.status {
        QuotaStatus::Complete => format!(
            "✅ {}: {} bytes across {} accounts",
            result.domain, result.total_used_bytes, result.account_count
        ),
        QuotaStatus::PartialSuccess => format!(
            "⚠️ {}: {} bytes across {} accounts ({} skipped)",
            result.domain, result.total_used_bytes, result.account_count, result.skipped_count
        ),
        QuotaStatus::Failed => match &result.failure {
            Some(failure) => format!("❌ {}: {} ({})", result.domain, failure.kind, failure.message),
            None => format!(
                "❌ {}: no valid accounts ({} skipped)",
                result.domain, result.skipped_count
            ),
        },
    }
}

fn display_dry_run(config: &CheckConfig, instances: &[ResolvedInstance]) {
    println!("📋 Reporter: {:?} (metric: {})", config.reporter.kind, config.reporter.metric_name);
    for instance in instances {
        println!("  • {}", instance.domain);
        println!("      endpoint:   {}", instance.endpoint_url);
        println!("      username:   {}", instance.username);
        println!("      page size:  {}", instance.page_size);
        println!("      timeout:    {:?}", instance.timeout);
        println!("      tls verify: {}", instance.tls_verify);
    }
}

fn exit_with(e: &QuotaError) -> ! {
    tracing::error!("❌ Startup failed: {}", e);
    tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    let code = e.severity().exit_code();
    std::process::exit(if code == 0 { 1 } else { code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use quota_gauge::adapters::LogReporter;
    use quota_gauge::config::Secret;
    use std::time::Duration;

    fn instance(server: &MockServer, domain: &str) -> ResolvedInstance {
        ResolvedInstance {
            domain: domain.to_string(),
            endpoint_url: server.base_url(),
            username: "admin@example.com".to_string(),
            password: Secret::new("s3cret"),
            timeout: Duration::from_secs(30),
            page_size: 500,
            tls_verify: true,
        }
    }

    fn log_reporter() -> Reporter {
        Reporter::Log(LogReporter::new("quota.usage"))
    }

    #[tokio::test]
    async fn test_no_cycle_starts_after_interrupt() {
        let server = MockServer::start();
        let auth = server.mock(|when, then| {
            when.method(POST).body_contains("AuthRequest");
            then.status(200);
        });
        let (_tx, rx) = watch::channel(true);
        let instances = vec![
            instance(&server, "a.example.com"),
            instance(&server, "b.example.com"),
        ];

        let worst = run_instances(&instances, &log_reporter(), false, rx).await;

        auth.assert_hits(0);
        assert_eq!(worst, kind_severity(ErrorKind::Cancelled));
        assert_ne!(worst.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_during_cycle_stops_remaining_instances() {
        let slow = MockServer::start();
        slow.mock(|when, then| {
            when.method(POST).body_contains("AuthRequest");
            then.status(200).delay(Duration::from_secs(5));
        });
        let next = MockServer::start();
        let next_auth = next.mock(|when, then| {
            when.method(POST).body_contains("AuthRequest");
            then.status(200);
        });

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });
        let instances = vec![instance(&slow, "a.example.com"), instance(&next, "b.example.com")];

        let worst = run_instances(&instances, &log_reporter(), false, rx).await;

        next_auth.assert_hits(0);
        assert_eq!(worst, ErrorSeverity::Medium);
    }
}
