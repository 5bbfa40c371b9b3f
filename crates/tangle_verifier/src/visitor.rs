use {
    crate::TraceRecord,
    std::sync::{Arc, Mutex},
};

/// Observes every invocation once it ends.
pub trait Visitor {
    fn on_maximal(&mut self, trace_records: &[TraceRecord]);
}

impl<F> Visitor for F
where
    F: FnMut(&[TraceRecord]),
{
    fn on_maximal(&mut self, trace_records: &[TraceRecord]) {
        self(trace_records);
    }
}

/// Records the trace of every invocation.
pub struct TraceRecordingVisitor(Arc<Mutex<Vec<Vec<TraceRecord>>>>);

impl TraceRecordingVisitor {
    pub fn new_with_replay() -> (Self, impl Fn() -> Vec<Vec<TraceRecord>>) {
        let visitor = TraceRecordingVisitor(Arc::new(Mutex::new(Vec::new())));
        let traces = Arc::clone(&visitor.0);
        let replay = move || match traces.lock() {
            Ok(traces) => traces.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        (visitor, replay)
    }
}

impl Visitor for TraceRecordingVisitor {
    fn on_maximal(&mut self, trace_records: &[TraceRecord]) {
        let mut traces = match self.0.lock() {
            Ok(traces) => traces,
            Err(poisoned) => poisoned.into_inner(),
        };
        traces.push(trace_records.to_vec());
    }
}
