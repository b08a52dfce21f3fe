//! Challenge resolver: idempotence and the per-stage failure pipeline.

mod support;

use serde_json::Value;
use support::ScriptedPage;
use tokenbooth::challenge::{
    response_input, ChallengeError, ChallengeResolver, ChallengeStage, Resolution,
};

const DESCENT: [ChallengeStage; 4] = [
    ChallengeStage::Wrapper,
    ChallengeStage::Frame,
    ChallengeStage::FrameBody,
    ChallengeStage::Trigger,
];

#[tokio::test]
async fn absent_widget_is_a_strict_noop() {
    let page = ScriptedPage::new();
    let resolver = ChallengeResolver::default();

    let resolution = resolver.resolve(&page).await.unwrap();

    assert_eq!(resolution, Resolution::NotPresent);
    assert!(page.evals().is_empty());
    assert!(page.clicks().is_empty());
}

#[tokio::test]
async fn full_descent_triggers_the_control_in_order() {
    let page = ScriptedPage::new().with_challenge_solved();
    let resolver = ChallengeResolver::default();

    let resolution = resolver.resolve(&page).await.unwrap();

    assert_eq!(resolution, Resolution::Triggered);
    let expected: Vec<String> = DESCENT.iter().map(|s| s.script().to_string()).collect();
    assert_eq!(page.evals(), expected);
}

#[tokio::test]
async fn each_broken_stage_fails_by_name() {
    for (broken_index, broken_stage) in DESCENT.iter().enumerate() {
        let mut page = ScriptedPage::new().with_present(response_input());
        for stage in &DESCENT[..broken_index] {
            page = page.with_eval(stage.script(), Value::Bool(true));
        }
        // The broken stage itself stays unscripted and evaluates to nothing.

        let err = ChallengeResolver::default()
            .resolve(&page)
            .await
            .expect_err("descent should fail");

        match err {
            ChallengeError::StageFailed { stage } => assert_eq!(stage, *broken_stage),
            other => panic!("expected a stage failure, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn widget_that_never_renders_fails_at_the_response_input() {
    let page = ScriptedPage::new().with_never_rendering(response_input());

    let err = ChallengeResolver::default()
        .resolve(&page)
        .await
        .expect_err("render wait should fail");

    match err {
        ChallengeError::StageFailed { stage } => {
            assert_eq!(stage, ChallengeStage::ResponseInput)
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
}
