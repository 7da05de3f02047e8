use std::sync::Arc;

use dsrs_adapters::{
    AdapterKind, AdapterName, ChatAdapter, Completion, DefaultAdapter, DummyLM, ErrorClass,
    Example, JsonAdapter, LmError, LmUsage, PipelineState, Predict, PredictError, Predictor,
    Settings, Signature, example, run_pipeline_traced,
};
use rstest::rstest;
use serde_json::json;

use PipelineState::*;

fn qa() -> Signature {
    Signature::parse("question -> answer").unwrap()
}

fn question(text: &str) -> Example {
    Example::default().with_input("question", text)
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn successful_run_visits_every_state() {
    let lm = DummyLM::new([Completion::new("Answer: 4").with_usage(LmUsage::new(12, 3))]);
    let trace = run_pipeline_traced(&DefaultAdapter, &lm, &qa(), &question("2 + 2?"), &[]).await;

    assert_eq!(
        trace.states,
        vec![Idle, Formatting, AwaitingCompletion, Parsing, Validating, Done]
    );
    let prediction = trace.result.unwrap();
    assert_eq!(prediction.get("answer"), Some(&json!("4")));
    assert_eq!(prediction.lm_usage.total_tokens, 15);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn format_failure_never_calls_the_model() {
    let lm = DummyLM::new(["Answer: 4"]);
    let trace = run_pipeline_traced(&DefaultAdapter, &lm, &qa(), &Example::default(), &[]).await;

    assert_eq!(trace.states, vec![Idle, Formatting, Failed]);
    let err = trace.result.unwrap_err();
    assert!(matches!(err, PredictError::Format { .. }));
    assert_eq!(err.class(), ErrorClass::BadRequest);
    assert!(!err.is_retryable());
    assert_eq!(lm.call_count().await, 0);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn transport_failure_stops_after_awaiting() {
    let lm = DummyLM::default();
    let trace = run_pipeline_traced(&JsonAdapter, &lm, &qa(), &question("2 + 2?"), &[]).await;

    assert_eq!(trace.states, vec![Idle, Formatting, AwaitingCompletion, Failed]);
    let err = trace.result.unwrap_err();
    assert!(matches!(err, PredictError::Lm { source: LmError::Provider { .. } }));
    assert_eq!(err.tag(), "lm_error");
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn parse_failure_stops_in_parsing() {
    let lm = DummyLM::new([Completion::new("no idea").with_usage(LmUsage::new(7, 2))]);
    let trace = run_pipeline_traced(&JsonAdapter, &lm, &qa(), &question("2 + 2?"), &[]).await;

    assert_eq!(
        trace.states,
        vec![Idle, Formatting, AwaitingCompletion, Parsing, Failed]
    );
    match trace.result.unwrap_err() {
        PredictError::Parse {
            source,
            raw_response,
            lm_usage,
        } => {
            assert_eq!(source.tag(), "decode_failure");
            assert_eq!(raw_response, "no idea");
            assert_eq!(lm_usage.total_tokens, 9);
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn validation_failure_stops_in_validating() {
    let signature = Signature::parse("question -> answer: int").unwrap();
    let lm = DummyLM::new(["Answer: four"]);
    let trace =
        run_pipeline_traced(&DefaultAdapter, &lm, &signature, &question("2 + 2?"), &[]).await;

    assert_eq!(
        trace.states,
        vec![Idle, Formatting, AwaitingCompletion, Parsing, Validating, Failed]
    );
    let err = trace.result.unwrap_err();
    assert_eq!(err.tag(), "validation_failure");
    assert_eq!(err.class(), ErrorClass::BadResponse);
    assert!(err.is_retryable());
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn demos_are_rendered_before_the_call() {
    let lm = Arc::new(DummyLM::new(["Answer: 6"]));
    let settings = Settings::builder().lm(lm.clone()).build();
    let predict = Predict::builder()
        .signature(qa())
        .demos(vec![example! {
            "question": "input" => "1 + 1?",
            "answer": "output" => "2",
        }])
        .build();

    let prediction = predict.forward(&question("3 + 3?"), &settings).await.unwrap();
    assert_eq!(prediction.get_as::<String>("answer").unwrap(), "6");

    let request = &lm.inspect_history(1).await[0];
    assert_eq!(request.len(), 4);
    assert_eq!(request.messages[1].content(), "Question: 1 + 1?");
    assert_eq!(request.messages[2].content(), "Answer: 2");
    assert_eq!(request.last_user_text(), "Question: 3 + 3?");
}

#[rstest]
#[case::global_only(None, None, AdapterName::Default)]
#[case::program_beats_global(None, Some(JsonAdapter.into()), AdapterName::Json)]
#[case::call_beats_program(Some(ChatAdapter.into()), Some(JsonAdapter.into()), AdapterName::Chat)]
#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn adapter_precedence_reaches_the_request(
    #[case] call: Option<AdapterKind>,
    #[case] program: Option<AdapterKind>,
    #[case] expected: AdapterName,
) {
    let lm = Arc::new(DummyLM::new([
        "Answer: 4",
        r#"{"answer": "4"}"#,
        "[[ ## answer ## ]]\n4\n\n[[ ## completed ## ]]",
    ]));
    let settings = Settings::builder().lm(lm.clone()).build();
    let predict = Predict::builder()
        .signature(qa())
        .maybe_adapter(program)
        .build();

    let _ = predict
        .forward_with(&question("2 + 2?"), &settings, call.as_ref())
        .await;

    let system = lm.inspect_history(1).await[0].system_prompt();
    let marker = system.contains("[[ ## completed ## ]]");
    let json_only = system.contains("Return exactly one JSON object");
    let actual = match (marker, json_only) {
        (true, _) => AdapterName::Chat,
        (false, true) => AdapterName::Json,
        (false, false) => AdapterName::Default,
    };
    assert_eq!(actual, expected);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn configured_adapter_name_builds_the_strategy() {
    let name: AdapterName = serde_json::from_value(json!("marker")).unwrap();
    let lm = Arc::new(DummyLM::new(["[[ ## answer ## ]]\n4\n\n[[ ## completed ## ]]"]));
    let settings = Settings::builder()
        .lm(lm.clone())
        .adapter(AdapterKind::from_name(name, None))
        .build();

    let prediction = Predict::new(qa())
        .forward(&question("2 + 2?"), &settings)
        .await
        .unwrap();
    assert_eq!(prediction.get("answer"), Some(&json!("4")));
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn batch_keeps_one_result_per_input_in_order() {
    let lm = Arc::new(DummyLM::new(["Answer: a", "Answer: b"]));
    let settings = Settings::builder().lm(lm.clone()).build();
    let predict = Predict::new(qa());

    let inputs = vec![question("first"), Example::default(), question("third")];
    let results = predict.batch(&inputs, &settings).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(PredictError::Format { .. })));
    assert!(results[2].is_ok());

    let mut answers: Vec<String> = [&results[0], &results[2]]
        .into_iter()
        .map(|result| result.as_ref().unwrap().get_as::<String>("answer").unwrap())
        .collect();
    answers.sort();
    assert_eq!(answers, vec!["a", "b"]);
    assert_eq!(lm.call_count().await, 2);
}

#[tokio::test]
#[cfg_attr(miri, ignore)]
async fn optional_outputs_stay_absent() {
    let signature = Signature::builder()
        .inputs(vec![dsrs_adapters::Field::builder().name("question").build()])
        .outputs(vec![
            dsrs_adapters::Field::builder().name("answer").build(),
            dsrs_adapters::Field::builder()
                .name("confidence")
                .field_type(dsrs_adapters::FieldType::Number)
                .required(false)
                .default(json!(0.5))
                .build(),
        ])
        .build()
        .unwrap();
    let lm = Arc::new(DummyLM::new(["Answer: 4"]));
    let settings = Settings::builder().lm(lm).build();

    let prediction = Predict::new(signature)
        .forward(&question("2 + 2?"), &settings)
        .await
        .unwrap();
    assert!(prediction.contains("answer"));
    assert!(!prediction.contains("confidence"));
    assert_eq!(prediction.get_as::<Option<f64>>("confidence").unwrap(), None);
}
