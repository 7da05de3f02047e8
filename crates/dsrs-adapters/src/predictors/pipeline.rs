use std::fmt;

use tracing::{debug, trace, warn};

use crate::adapter::Adapter;
use crate::{
    Example, LanguageModel, PredictError, Prediction, Signature, truncate,
};

/// Stage of one pipeline invocation.
///
/// Transitions are strictly sequential; any stage may jump to `Failed`.
/// `AwaitingCompletion` is the only stage that waits on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Formatting,
    AwaitingCompletion,
    Parsing,
    Validating,
    Done,
    Failed,
}

impl PipelineState {
    /// The next stage on the success path, or `None` once terminal.
    pub fn next(self) -> Option<PipelineState> {
        match self {
            PipelineState::Idle => Some(PipelineState::Formatting),
            PipelineState::Formatting => Some(PipelineState::AwaitingCompletion),
            PipelineState::AwaitingCompletion => Some(PipelineState::Parsing),
            PipelineState::Parsing => Some(PipelineState::Validating),
            PipelineState::Validating => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Formatting => "formatting",
            PipelineState::AwaitingCompletion => "awaiting_completion",
            PipelineState::Parsing => "parsing",
            PipelineState::Validating => "validating",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one run together with every state it passed through.
#[derive(Debug)]
pub struct PipelineTrace {
    pub states: Vec<PipelineState>,
    pub result: Result<Prediction, PredictError>,
}

struct Run<'a> {
    adapter: &'static str,
    signature: &'a str,
    states: Vec<PipelineState>,
}

impl Run<'_> {
    fn advance(&mut self) {
        let Some(next) = self.current().next() else {
            return;
        };
        debug!(
            state = next.as_str(),
            adapter = self.adapter,
            signature = self.signature,
            "pipeline transition"
        );
        self.states.push(next);
    }

    fn fail(mut self, error: PredictError) -> PipelineTrace {
        warn!(
            from = self.current().as_str(),
            tag = error.tag(),
            adapter = self.adapter,
            signature = self.signature,
            "pipeline failed"
        );
        self.states.push(PipelineState::Failed);
        PipelineTrace {
            states: self.states,
            result: Err(error),
        }
    }

    fn current(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Idle)
    }
}

/// Runs one invocation: format, call the model once, parse, validate.
///
/// The first failure is returned verbatim; nothing is retried.
pub async fn run_pipeline<A: Adapter>(
    adapter: &A,
    lm: &dyn LanguageModel,
    signature: &Signature,
    inputs: &Example,
    demos: &[Example],
) -> Result<Prediction, PredictError> {
    run_pipeline_traced(adapter, lm, signature, inputs, demos)
        .await
        .result
}

/// [`run_pipeline`], also reporting the states the run went through.
#[tracing::instrument(
    name = "dsrs.pipeline.run",
    level = "debug",
    skip_all,
    fields(
        adapter = adapter.name(),
        signature = signature.name(),
        lm = lm.model_name(),
        demos = demos.len()
    )
)]
pub async fn run_pipeline_traced<A: Adapter>(
    adapter: &A,
    lm: &dyn LanguageModel,
    signature: &Signature,
    inputs: &Example,
    demos: &[Example],
) -> PipelineTrace {
    let mut run = Run {
        adapter: adapter.name(),
        signature: signature.name(),
        states: vec![PipelineState::Idle],
    };

    run.advance();
    let request = match adapter.format(signature, inputs, demos) {
        Ok(request) => request,
        Err(err) => return run.fail(err.into()),
    };

    run.advance();
    let completion = match lm.generate(&request).await {
        Ok(completion) => completion,
        Err(err) => return run.fail(err.into()),
    };
    trace!(completion = truncate(&completion.text, 160), "received completion");

    run.advance();
    let raw = match adapter.parse(signature, &completion).await {
        Ok(raw) => raw,
        Err(err) => return run.fail(err),
    };

    run.advance();
    let data = match adapter.validate(signature, &raw) {
        Ok(data) => data,
        Err(source) => {
            return run.fail(PredictError::Parse {
                source,
                raw_response: completion.text.clone(),
                lm_usage: raw.lm_usage.clone(),
            });
        }
    };

    run.advance();
    PipelineTrace {
        states: run.states,
        result: Ok(Prediction::new(data, raw.lm_usage)),
    }
}
