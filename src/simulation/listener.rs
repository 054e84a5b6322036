use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::net::{Marking, Net};

/// Observer notified synchronously after every committed step and every
/// reset.
pub trait StepListener {
    fn on_step(&mut self, net: &Net, time: f64, fired: &[String], marking: &Marking);

    /// `time` is the current simulation time: `0.0` after a reset, the live
    /// clock when a listener is attached mid-run.
    fn on_reset(&mut self, net: &Net, time: f64, marking: &Marking);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: f64,
    pub fired: Vec<String>,
    pub tokens: Vec<f64>,
}

/// Marking history recorded by [`DataCollector`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub places: Vec<String>,
    pub samples: Vec<Sample>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// `(time, tokens)` pairs for one place.
    pub fn series(&self, place: &str) -> Option<Vec<(f64, f64)>> {
        let column = self.places.iter().position(|p| p == place)?;
        Some(
            self.samples
                .iter()
                .map(|s| (s.time, s.tokens[column]))
                .collect(),
        )
    }

    /// One row per sample: `time,<place>...,fired` with fired transitions
    /// joined by `;`.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        let header: Vec<String> = std::iter::once("time".to_string())
            .chain(self.places.iter().map(|p| csv_field(p)))
            .chain(std::iter::once("fired".to_string()))
            .collect();
        writeln!(out, "{}", header.join(","))?;
        for sample in &self.samples {
            let mut row = vec![sample.time.to_string()];
            row.extend(sample.tokens.iter().map(f64::to_string));
            row.push(csv_field(&sample.fired.join(";")));
            writeln!(out, "{}", row.join(","))?;
        }
        Ok(())
    }

    fn record(&mut self, time: f64, fired: &[String], marking: &Marking) {
        self.samples.push(Sample {
            time,
            fired: fired.to_vec(),
            tokens: marking.iter().map(|(_, tokens)| tokens).collect(),
        });
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Listener recording `(time, marking)` after every step. The trace is
/// shared, so callers keep a [`handle`](DataCollector::handle) after handing
/// the collector to the simulation.
#[derive(Debug, Clone, Default)]
pub struct DataCollector {
    trace: Rc<RefCell<Trace>>,
}

impl DataCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Rc<RefCell<Trace>> {
        Rc::clone(&self.trace)
    }
}

impl StepListener for DataCollector {
    fn on_step(&mut self, _net: &Net, time: f64, fired: &[String], marking: &Marking) {
        self.trace.borrow_mut().record(time, fired, marking);
    }

    /// Starts a fresh trace with `marking` as its first sample.
    fn on_reset(&mut self, net: &Net, time: f64, marking: &Marking) {
        let mut trace = self.trace.borrow_mut();
        trace.places = net.places().iter().map(|p| p.name.clone()).collect();
        trace.samples.clear();
        trace.record(time, &[], marking);
    }
}
