use std::sync::Arc;

use anyhow::{Context, Result};
use wellness_sentinel::{
    alert::{HttpNotifier, LogNotifier},
    config::Settings,
    location::{FALLBACK_LOCATION, Locator},
    orchestrator::{Notifier, Orchestrator},
    pipeline::{DeviceSuite, SuiteSettings},
    signal::StopSignal,
    speech::speaker_for,
};

fn main() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("failed to read .env: {err}");
        }
    }
    env_logger::init();

    let settings = Settings::from_env();
    settings.validate().context("invalid configuration")?;
    log::debug!("{settings:?}");

    let location = if settings.locate {
        match Locator::new() {
            Ok(locator) => locator.describe(),
            Err(err) => {
                log::warn!("location lookup unavailable: {err:#}");
                FALLBACK_LOCATION.to_string()
            }
        }
    } else {
        FALLBACK_LOCATION.to_string()
    };
    log::info!("reporting location: {location}");

    let notifier: Arc<dyn Notifier> = match &settings.alert_url {
        Some(url) => Arc::new(HttpNotifier::new(url, settings.alert_cooldown)?),
        None => {
            log::warn!("SENTINEL_ALERT_URL not set, alerts will only be logged");
            Arc::new(LogNotifier::new(settings.alert_cooldown))
        }
    };

    let suite = DeviceSuite::new(SuiteSettings::from(&settings));
    if let Err(err) = suite.prepare() {
        log::error!("hand detector model unavailable, probes will escalate: {err:#}");
    }

    let orchestrator_settings = settings.orchestrator_settings(location)?;
    let mut orchestrator = Orchestrator::new(
        suite,
        notifier,
        speaker_for(&settings.speak_command),
        orchestrator_settings,
    );

    log::info!("wellness sentinel running");
    orchestrator.run(&StopSignal::new());
    Ok(())
}
