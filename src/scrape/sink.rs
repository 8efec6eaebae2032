//! Append-only collection of metric observations for a single scrape.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gauge => f.write_str("gauge"),
            Self::Counter => f.write_str("counter"),
        }
    }
}

/// One sample emitted by a scraper or by the orchestrator itself.
///
/// Label order is the declaration order used by the emitter; the encoder
/// groups observations by `name` and expects every member of a family to
/// share the same label names.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl Observation {
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn label_names(&self) -> Vec<&'static str> {
        self.labels.iter().map(|(key, _)| *key).collect()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MetricSink {
    observations: Vec<Observation>,
}

impl MetricSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    pub fn gauge(
        &mut self,
        name: &'static str,
        help: &'static str,
        labels: &[(&'static str, &str)],
        value: f64,
    ) {
        self.emit(name, help, MetricKind::Gauge, labels, value);
    }

    pub fn counter(
        &mut self,
        name: &'static str,
        help: &'static str,
        labels: &[(&'static str, &str)],
        value: f64,
    ) {
        self.emit(name, help, MetricKind::Counter, labels, value);
    }

    fn emit(
        &mut self,
        name: &'static str,
        help: &'static str,
        kind: MetricKind,
        labels: &[(&'static str, &str)],
        value: f64,
    ) {
        self.observations.push(Observation {
            name,
            help,
            kind,
            labels: labels
                .iter()
                .map(|(key, value)| (*key, (*value).to_string()))
                .collect(),
            value,
        });
    }

    pub fn extend<I>(&mut self, observations: I)
    where
        I: IntoIterator<Item = Observation>,
    {
        self.observations.extend(observations);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    #[must_use]
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    #[must_use]
    pub fn into_observations(self) -> Vec<Observation> {
        self.observations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// First observation with the given name whose labels contain every
    /// `(key, value)` pair in `labels`.
    #[must_use]
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&Observation> {
        self.observations.iter().find(|o| {
            o.name == name
                && labels
                    .iter()
                    .all(|(key, value)| o.label(key) == Some(*value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_preserves_emission_order() {
        let mut sink = MetricSink::new();
        sink.gauge("a", "first", &[], 1.0);
        sink.counter("b_total", "second", &[("datname", "app")], 2.0);
        sink.gauge("a", "first", &[("x", "y")], 3.0);

        let names: Vec<&str> = sink.iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["a", "b_total", "a"]);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.observations()[1].kind, MetricKind::Counter);
    }

    #[test]
    fn test_find_matches_label_subset() {
        let mut sink = MetricSink::new();
        sink.gauge("y", "help", &[("datname", "one"), ("mode", "x")], 1.0);
        sink.gauge("y", "help", &[("datname", "two"), ("mode", "x")], 2.0);

        let found = sink.find("y", &[("datname", "two")]);
        assert_eq!(found.map(|o| o.value), Some(2.0));
        assert!(sink.find("y", &[("datname", "three")]).is_none());
        assert!(sink.find("z", &[]).is_none());
    }

    #[test]
    fn test_label_lookup() {
        let mut sink = MetricSink::new();
        sink.gauge("m", "help", &[("scraper", "locks"), ("datname", "db")], 0.5);

        let o = &sink.observations()[0];
        assert_eq!(o.label("scraper"), Some("locks"));
        assert_eq!(o.label("missing"), None);
        assert_eq!(o.label_names(), vec!["scraper", "datname"]);
    }

    #[test]
    fn test_extend_and_into_observations() {
        let mut first = MetricSink::new();
        first.gauge("a", "help", &[], 1.0);

        let mut second = MetricSink::new();
        assert!(second.is_empty());
        second.extend(first.observations().iter().cloned());
        second.extend(first.into_observations());

        assert_eq!(second.len(), 2);
        assert_eq!(second.into_observations().len(), 2);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
        assert_eq!(MetricKind::Counter.to_string(), "counter");
    }
}
