use bon::Builder;

use crate::adapter::AdapterKind;
use crate::predictors::{Predictor, run_pipeline};
use crate::{Example, PredictError, Prediction, Settings, Signature, resolve_adapter};

/// A single pipeline call bound to a signature, its few-shot demos, and an
/// optional program-level adapter override.
#[derive(Builder, Debug, Clone)]
pub struct Predict {
    pub signature: Signature,
    #[builder(default)]
    pub demos: Vec<Example>,
    pub adapter: Option<AdapterKind>,
}

impl Predict {
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            demos: Vec::new(),
            adapter: None,
        }
    }
}

impl Predictor for Predict {
    async fn forward_with(
        &self,
        inputs: &Example,
        settings: &Settings,
        call_adapter: Option<&AdapterKind>,
    ) -> Result<Prediction, PredictError> {
        let adapter = resolve_adapter(call_adapter, self.adapter.as_ref(), &settings.adapter);
        run_pipeline(
            adapter,
            settings.lm.as_ref(),
            &self.signature,
            inputs,
            &self.demos,
        )
        .await
    }
}
