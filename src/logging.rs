// src/logging.rs
//
// Record sinks for bidsim.
// - RecordSink: trait consumed by the simulation driver
// - NoopSink:   discards all records
// - MemorySink: buffers records in memory (tests, threaded runs)
// - FileSink:   writes one JSON line per record for external analysis
//
// The engine emits records; persistence and aggregation belong to the
// collaborator on the other side of this trait.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::types::{CalibrationRecord, PostbackRecord, RoundRecord, StepRecord};

/// Abstract sink for per-round / per-step simulation records.
pub trait RecordSink {
    fn log_round(&mut self, record: &RoundRecord);
    fn log_step(&mut self, record: &StepRecord);
    fn log_calibration(&mut self, record: &CalibrationRecord);
    fn log_postback(&mut self, record: &PostbackRecord);
}

/// Sink that discards all records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl RecordSink for NoopSink {
    fn log_round(&mut self, _record: &RoundRecord) {}
    fn log_step(&mut self, _record: &StepRecord) {}
    fn log_calibration(&mut self, _record: &CalibrationRecord) {}
    fn log_postback(&mut self, _record: &PostbackRecord) {}
}

/// Sink that buffers everything in memory, preserving emission order per
/// record kind. Used by tests and to collect per-run output from worker
/// threads before merging in run order.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub rounds: Vec<RoundRecord>,
    pub steps: Vec<StepRecord>,
    pub calibrations: Vec<CalibrationRecord>,
    pub postbacks: Vec<PostbackRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn log_round(&mut self, record: &RoundRecord) {
        self.rounds.push(record.clone());
    }

    fn log_step(&mut self, record: &StepRecord) {
        self.steps.push(record.clone());
    }

    fn log_calibration(&mut self, record: &CalibrationRecord) {
        self.calibrations.push(record.clone());
    }

    fn log_postback(&mut self, record: &PostbackRecord) {
        self.postbacks.push(record.clone());
    }
}

/// Envelope distinguishing record kinds on the shared JSONL stream.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Envelope<'a> {
    Round(&'a RoundRecord),
    Step(&'a StepRecord),
    Calibration(&'a CalibrationRecord),
    Postback(&'a PostbackRecord),
}

/// JSONL file sink. Each record is one JSON object on its own line with a
/// `kind` discriminator.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create a new sink writing to `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn write_line(&mut self, envelope: &Envelope<'_>) {
        // If logging fails we don't want to crash the engine, so I/O
        // errors are deliberately ignored.
        if let Ok(line) = serde_json::to_string(envelope) {
            let _ = self.writer.write_all(line.as_bytes());
            let _ = self.writer.write_all(b"\n");
        }
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) {
        let _ = self.writer.flush();
    }

    /// Write all records buffered in a MemorySink, rounds first, then
    /// steps, calibrations, and postbacks.
    pub fn write_memory(&mut self, mem: &MemorySink) {
        for r in &mem.rounds {
            self.log_round(r);
        }
        for r in &mem.steps {
            self.log_step(r);
        }
        for r in &mem.calibrations {
            self.log_calibration(r);
        }
        for r in &mem.postbacks {
            self.log_postback(r);
        }
    }
}

impl RecordSink for FileSink {
    fn log_round(&mut self, record: &RoundRecord) {
        self.write_line(&Envelope::Round(record));
    }

    fn log_step(&mut self, record: &StepRecord) {
        self.write_line(&Envelope::Step(record));
    }

    fn log_calibration(&mut self, record: &CalibrationRecord) {
        self.write_line(&Envelope::Calibration(record));
    }

    fn log_postback(&mut self, record: &PostbackRecord) {
        self.write_line(&Envelope::Postback(record));
    }
}
