//! Turns the observations of one scrape into Prometheus text.
//!
//! Observations are grouped by metric name in first-seen order. A family
//! takes its kind and label names from its first member; later members that
//! disagree are dropped with a warning instead of failing the whole scrape.

use crate::scrape::{MetricKind, Observation};
use anyhow::{Context, Result};
use prometheus::{Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Register every observation family on `registry`.
///
/// # Errors
///
/// Returns an error if a family cannot be built or collides with a metric
/// already registered
pub fn register_observations(registry: &Registry, observations: &[Observation]) -> Result<()> {
    for (name, family) in group(observations) {
        register_family(registry, &family).with_context(|| format!("Failed to register {name}"))?;
    }

    Ok(())
}

/// Encode everything registered on `registry` in the text exposition format.
///
/// # Errors
///
/// Returns an error if encoding fails
pub fn encode(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;

    String::from_utf8(buffer).context("Encoded metrics are not valid UTF-8")
}

fn group(observations: &[Observation]) -> Vec<(&'static str, Vec<&Observation>)> {
    let mut families: Vec<(&'static str, Vec<&Observation>)> = Vec::new();

    for observation in observations {
        if let Some((_, family)) = families
            .iter_mut()
            .find(|(name, _)| *name == observation.name)
        {
            family.push(observation);
        } else {
            families.push((observation.name, vec![observation]));
        }
    }

    families
}

fn register_family(registry: &Registry, family: &[&Observation]) -> Result<()> {
    let Some(&first) = family.first() else {
        return Ok(());
    };
    let label_names = first.label_names();
    let opts = Opts::new(first.name, first.help);

    let members = family.iter().filter(|o| {
        let consistent = o.kind == first.kind && o.label_names() == label_names;
        if !consistent {
            warn!(
                metric = first.name,
                kind = %o.kind,
                labels = ?o.label_names(),
                "dropping observation inconsistent with its family"
            );
        }
        consistent
    });

    match (first.kind, label_names.is_empty()) {
        (MetricKind::Gauge, true) => {
            let gauge = Gauge::with_opts(opts)?;
            for o in members {
                gauge.set(o.value);
            }
            registry.register(Box::new(gauge))?;
        }
        (MetricKind::Gauge, false) => {
            let gauges = GaugeVec::new(opts, &label_names)?;
            for o in members {
                gauges.with_label_values(&label_values(o)).set(o.value);
            }
            registry.register(Box::new(gauges))?;
        }
        (MetricKind::Counter, true) => {
            let counter = Counter::with_opts(opts)?;
            for o in members.filter(|o| valid_counter(o)) {
                counter.reset();
                counter.inc_by(o.value);
            }
            registry.register(Box::new(counter))?;
        }
        (MetricKind::Counter, false) => {
            let counters = CounterVec::new(opts, &label_names)?;
            for o in members.filter(|o| valid_counter(o)) {
                let counter = counters.with_label_values(&label_values(o));
                counter.reset();
                counter.inc_by(o.value);
            }
            registry.register(Box::new(counters))?;
        }
    }

    Ok(())
}

fn label_values(observation: &Observation) -> Vec<&str> {
    observation
        .labels
        .iter()
        .map(|(_, value)| value.as_str())
        .collect()
}

// Counters can only move forward.
fn valid_counter(observation: &Observation) -> bool {
    let valid = observation.value.is_finite() && observation.value >= 0.0;
    if !valid {
        warn!(
            metric = observation.name,
            value = observation.value,
            "dropping invalid counter value"
        );
    }
    valid
}
