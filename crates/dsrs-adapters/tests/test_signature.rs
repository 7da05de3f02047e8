use dsrs_adapters::{Field, FieldType, Signature, SignatureError, TypeSchema};
use rstest::rstest;
use schemars::JsonSchema;
use serde_json::json;

#[allow(dead_code)]
#[derive(JsonSchema)]
struct Citation {
    title: String,
    year: Option<i32>,
}

#[rstest]
fn shorthand_keeps_declaration_order_and_types() {
    let signature: Signature = "context, question -> reasoning, score: float".parse().unwrap();

    let inputs: Vec<&str> = signature.input_fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(inputs, vec!["context", "question"]);
    assert_eq!(signature.output_names().collect::<Vec<_>>(), vec!["reasoning", "score"]);
    assert_eq!(signature.output_field("score").unwrap().field_type, FieldType::Number);
    assert_eq!(
        signature.instructions(),
        "Given the fields `context`, `question`, produce the fields `reasoning`, `score`."
    );
}

#[rstest]
#[case("question -> answer, question")]
#[case("a, a -> b")]
fn duplicate_names_are_rejected(#[case] spec: &str) {
    assert!(matches!(
        Signature::parse(spec),
        Err(SignatureError::DuplicateField { .. })
    ));
}

#[rstest]
#[case("question answer")]
#[case("a -> b -> c")]
#[case("a -> b: decimal")]
fn malformed_shorthand_is_rejected(#[case] spec: &str) {
    assert!(matches!(
        Signature::parse(spec),
        Err(SignatureError::InvalidShorthand { .. })
    ));
}

#[rstest]
#[case("final answer")]
#[case("[[answer]]")]
#[case("a#b")]
fn names_that_would_break_delimiters_are_rejected(#[case] name: &str) {
    let result = Signature::builder()
        .outputs(vec![Field::builder().name(name).build()])
        .build();
    assert_eq!(
        result.unwrap_err(),
        SignatureError::InvalidFieldName { name: name.to_string() }
    );
}

#[rstest]
fn at_least_one_output_is_required() {
    let result = Signature::builder()
        .name("Empty")
        .inputs(vec![Field::builder().name("question").build()])
        .outputs(vec![])
        .build();
    assert_eq!(
        result.unwrap_err(),
        SignatureError::NoOutputFields { name: "Empty".into() }
    );
}

#[rstest]
fn explicit_instructions_replace_the_objective() {
    let signature = Signature::builder()
        .instructions("Answer tersely.")
        .outputs(vec![Field::builder().name("answer").build()])
        .build()
        .unwrap();
    assert_eq!(signature.instructions(), "Answer tersely.");
    assert_eq!(signature.objective(), "Produce the fields `answer`.");

    let renamed = signature.with_instructions("Answer in French.");
    assert_eq!(renamed.instructions(), "Answer in French.");
    assert_eq!(renamed.output_fields(), signature.output_fields());
}

#[rstest]
fn derived_schema_makes_a_field_typed() {
    let schema = TypeSchema::of::<Citation>().unwrap();
    let field = Field::builder()
        .name("citation")
        .field_type(FieldType::Nested)
        .schema(schema)
        .one_of(vec![json!({"title": "Dune", "year": 1965})])
        .build();

    assert!(field.is_typed());
    assert_eq!(field.prefix(), "Citation");

    let signature = Signature::builder()
        .inputs(vec![Field::builder().name("query").build()])
        .outputs(vec![field, Field::builder().name("summary").build()])
        .build()
        .unwrap();
    assert!(signature.has_typed_outputs());
    assert_eq!(signature.typed_output_fields().len(), 1);
    assert_eq!(signature.required_output_fields().len(), 2);
}
