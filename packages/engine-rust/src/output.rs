//! Per-invocation accumulator of payload, error, measures, and attachments.
//!
//! Keywords write to an [`OutputBuilder`] through their context; the invoker
//! turns it into an [`ExecutionResult`] once the keyword finishes or times
//! out. State sits behind a mutex because a worker that outlived its deadline
//! may still be writing while the supervisor builds the timeout result.

use std::sync::Arc;

use keyword_core::{
    Attachment, ClockSource, ExecutionError, ExecutionResult, Measure, MeasureData, Payload,
    SystemClock, Value,
};
use parking_lot::Mutex;
use tracing::debug;

/// Name of the attachment carrying a fault dump.
pub const EXCEPTION_ATTACHMENT: &str = "exception.log";

struct OpenMeasure {
    seq: u64,
    name: String,
    begin: u64,
}

#[derive(Default)]
struct OutputState {
    payload: Payload,
    error: Option<ExecutionError>,
    attachments: Vec<Attachment>,
    /// Started but not yet stopped, innermost last.
    open: Vec<OpenMeasure>,
    /// Closed measures tagged with their start sequence.
    closed: Vec<(u64, Measure)>,
    next_seq: u64,
    /// Index into `closed` of a measure held back for late data.
    held: Option<usize>,
}

impl OutputState {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn push_closed(&mut self, measure: Measure) {
        let seq = self.next_seq();
        self.closed.push((seq, measure));
    }

    fn pop_open(&mut self, end: u64, data: Option<MeasureData>) -> usize {
        let Some(open) = self.open.pop() else {
            panic!("No measure has been started. Call start_measure before stop_measure.");
        };
        let mut measure = Measure::new(open.name, open.begin, end.saturating_sub(open.begin));
        measure.data = data;
        self.closed.push((open.seq, measure));
        self.closed.len() - 1
    }
}

/// Builder for the result of one keyword invocation.
pub struct OutputBuilder {
    clock: Arc<dyn ClockSource>,
    state: Mutex<OutputState>,
}

impl OutputBuilder {
    /// Creates a builder stamping measures with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            clock,
            state: Mutex::new(OutputState::default()),
        }
    }

    // -- payload -------------------------------------------------------------

    /// Adds an output field; an existing field with the same key is replaced.
    pub fn add(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.lock().payload.insert(key.into(), value.into());
    }

    // -- errors --------------------------------------------------------------

    /// Reports a technical error, replacing any previous error.
    pub fn set_error(&self, message: impl Into<String>) {
        self.set_error_record(ExecutionError::technical(message));
    }

    /// Reports a technical error and attaches the cause chain as
    /// `exception.log`.
    pub fn set_error_with_cause(&self, message: impl Into<String>, cause: &anyhow::Error) {
        self.set_error_with_dump(message, &format!("{cause:?}"));
    }

    pub(crate) fn set_error_with_dump(&self, message: impl Into<String>, dump: &str) {
        let mut state = self.state.lock();
        state.error = Some(ExecutionError::technical(message));
        state
            .attachments
            .push(Attachment::from_text(EXCEPTION_ATTACHMENT, dump));
    }

    /// Reports a business error, replacing any previous error.
    pub fn set_business_error(&self, message: impl Into<String>) {
        self.set_error_record(ExecutionError::business(message));
    }

    /// Replaces the error with a fully specified one.
    pub fn set_error_record(&self, error: ExecutionError) {
        self.state.lock().error = Some(error);
    }

    /// Appends to the current error message, or reports a technical error
    /// if there is none yet.
    pub fn append_error(&self, message: &str) {
        let mut state = self.state.lock();
        match state.error.as_mut() {
            Some(error) => error.message.push_str(message),
            None => state.error = Some(ExecutionError::technical(message)),
        }
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.state.lock().error.is_some()
    }

    #[must_use]
    pub fn error(&self) -> Option<ExecutionError> {
        self.state.lock().error.clone()
    }

    // -- attachments ---------------------------------------------------------

    pub fn add_attachment(&self, attachment: Attachment) {
        self.state.lock().attachments.push(attachment);
    }

    pub fn add_attachments(&self, attachments: impl IntoIterator<Item = Attachment>) {
        self.state.lock().attachments.extend(attachments);
    }

    // -- measures ------------------------------------------------------------

    /// Starts a measure now. Measures nest: the next stop closes the most
    /// recently started one.
    pub fn start_measure(&self, name: impl Into<String>) {
        self.start_measure_at(name, self.clock.now());
    }

    /// Starts a measure at an explicit epoch-millis instant.
    pub fn start_measure_at(&self, name: impl Into<String>, begin: u64) {
        let mut state = self.state.lock();
        let seq = state.next_seq();
        state.open.push(OpenMeasure {
            seq,
            name: name.into(),
            begin,
        });
    }

    /// Stops the most recently started measure.
    ///
    /// # Panics
    ///
    /// Panics if no measure is open.
    pub fn stop_measure(&self) {
        self.stop_measure_at(self.clock.now(), None);
    }

    /// Stops the most recently started measure and attaches `data`.
    ///
    /// # Panics
    ///
    /// Panics if no measure is open.
    pub fn stop_measure_with_data(&self, data: MeasureData) {
        self.stop_measure_at(self.clock.now(), Some(data));
    }

    /// Stops the most recently started measure at an explicit instant.
    ///
    /// # Panics
    ///
    /// Panics if no measure is open.
    pub fn stop_measure_at(&self, end: u64, data: Option<MeasureData>) {
        self.state.lock().pop_open(end, data);
    }

    /// Stops the most recently started measure and keeps it addressable by
    /// [`OutputBuilder::set_last_measure_data`].
    ///
    /// # Panics
    ///
    /// Panics if no measure is open.
    pub fn stop_measure_for_additional_data(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let index = state.pop_open(now, None);
        state.held = Some(index);
    }

    /// Sets the data of the measure held by
    /// [`OutputBuilder::stop_measure_for_additional_data`]. Ignored if no
    /// measure is held.
    pub fn set_last_measure_data(&self, data: MeasureData) {
        let mut state = self.state.lock();
        match state.held.take() {
            Some(index) => state.closed[index].1.data = Some(data),
            None => debug!("no measure held for additional data"),
        }
    }

    /// Records an already-finished measure that began now.
    pub fn add_measure(&self, name: impl Into<String>, duration_millis: u64) {
        self.add_measure_at(name, self.clock.now(), duration_millis, None);
    }

    pub fn add_measure_at(
        &self,
        name: impl Into<String>,
        begin: u64,
        duration_millis: u64,
        data: Option<MeasureData>,
    ) {
        let mut measure = Measure::new(name, begin, duration_millis);
        measure.data = data;
        self.push_measure(measure);
    }

    /// Records a complete measure as-is.
    pub fn push_measure(&self, measure: Measure) {
        self.state.lock().push_closed(measure);
    }

    /// Names of the measures still open, outermost first.
    #[must_use]
    pub fn open_measures(&self) -> Vec<String> {
        self.state
            .lock()
            .open
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    // -- merge & build -------------------------------------------------------

    /// Folds another result into this one: payload fields, measures, and
    /// attachments are added and its error message is appended.
    pub fn merge_output(&self, other: &ExecutionResult) {
        {
            let mut state = self.state.lock();
            for (key, value) in &other.payload {
                state.payload.insert(key.clone(), value.clone());
            }
            for measure in &other.measures {
                state.push_closed(measure.clone());
            }
            state.attachments.extend(other.attachments.iter().cloned());
        }
        if let Some(error) = &other.error {
            self.append_error(&error.message);
        }
    }

    /// Snapshot of the current state. Closed measures come out in start
    /// order; measures still open are not reported.
    #[must_use]
    pub fn build(&self) -> ExecutionResult {
        let state = self.state.lock();
        let mut closed: Vec<&(u64, Measure)> = state.closed.iter().collect();
        closed.sort_by_key(|(seq, _)| *seq);
        ExecutionResult {
            payload: state.payload.clone(),
            error: state.error.clone(),
            measures: closed.into_iter().map(|(_, m)| m.clone()).collect(),
            attachments: state.attachments.clone(),
        }
    }
}

impl Default for OutputBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutputBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OutputBuilder")
            .field("payload_len", &state.payload.len())
            .field("has_error", &state.error.is_some())
            .field("open_measures", &state.open.len())
            .field("closed_measures", &state.closed.len())
            .finish_non_exhaustive()
    }
}
