//! Integration tests for the stage-barrier coordinator

mod common;

use std::{sync::Arc, time::Duration};

use common::{coordinator, fast_config, EventLog, ScriptedComponent, ScriptedTransport};
use serde_json::json;
use sgl_shard_coordinator::*;

fn request(shards: &[&str]) -> SearchRequest {
    SearchRequest::new()
        .with_id("req-1")
        .with_shards(shards.iter().copied())
}

fn stages(response: &SearchResponse) -> Vec<u32> {
    response.rounds.iter().map(|r| r.stage.value()).collect()
}

#[tokio::test]
async fn test_local_path_prepares_then_processes_in_order() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[2000]),
            ScriptedComponent::new("b", &log),
        ],
        transport.clone(),
        fast_config(),
    );

    let response = coordinator
        .execute(SearchRequest::new().with_id("local"))
        .await
        .unwrap();

    assert_eq!(
        log.events(),
        vec!["a:prepare", "b:prepare", "a:process", "b:process"]
    );
    assert!(transport.calls().is_empty());
    assert_eq!(response.request_id, "local");
    assert_eq!(response.round_count(), 0);
    assert!(!response.partial);
    assert_eq!(response.section("a"), Some(&json!({"local": true})));
}

#[tokio::test]
async fn test_earliest_vote_wins_and_only_its_voters_build() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log),
            ScriptedComponent::new("b", &log).plan(&[3]),
            ScriptedComponent::new("c", &log).plan(&[5]),
        ],
        Arc::new(ScriptedTransport::new(&log)),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1"])).await.unwrap();

    assert_eq!(log.matching("a:build"), Vec::<String>::new());
    assert_eq!(log.matching("b:build"), vec!["b:build@3"]);
    assert_eq!(log.matching("c:build"), vec!["c:build@5"]);
    assert_eq!(stages(&response), vec![3, 5]);
    assert_eq!(response.rounds[0].builders, vec!["b"]);
    assert_eq!(response.rounds[1].builders, vec!["c"]);
}

#[tokio::test]
async fn test_same_stage_builders_share_one_batch() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log)
                .plan(&[2000])
                .request(ShardRequest::new(Purpose::GET_TOP_IDS).with_param("q", "x")),
            ScriptedComponent::new("b", &log)
                .plan(&[2000])
                .request(ShardRequest::new(Purpose::GET_STATS).with_param("q", "x")),
            ScriptedComponent::new("c", &log).plan(&[3000]),
        ],
        transport.clone(),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1", "s2"])).await.unwrap();

    let a_build = log.position("a:build@2000").unwrap();
    let b_build = log.position("b:build@2000").unwrap();
    assert!(a_build < b_build);

    assert_eq!(response.rounds[0].builders, vec!["a", "b"]);
    assert_eq!(response.rounds[0].requests, 2);
    assert_eq!(response.rounds[0].calls, 2);

    // one coalesced call per shard carrying both requests
    let calls = transport.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].request_ids.len(), 2);
    assert_eq!(calls[1].request_ids.len(), 2);
    assert_eq!(calls[0].purpose, Purpose::GET_TOP_IDS | Purpose::GET_STATS);

    assert!(log.matching("a:handle").contains(&"a:handle@2000:ok=2:err=0".to_string()));
    assert!(log.matching("b:handle").contains(&"b:handle@2000:ok=2:err=0".to_string()));
    assert!(log.matching("a:foreign").is_empty());
    assert!(log.matching("b:foreign").is_empty());
}

#[tokio::test]
async fn test_uncoalesced_calls_when_disabled() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1]),
            ScriptedComponent::new("b", &log).plan(&[1]),
        ],
        transport.clone(),
        CoordinatorConfigBuilder::new()
            .shard_timeout_ms(500)
            .coalesce_requests(false)
            .build()
            .unwrap(),
    );

    let response = coordinator.execute(request(&["s1", "s2"])).await.unwrap();
    assert_eq!(transport.calls().len(), 4);
    assert_eq!(response.rounds[0].calls, 4);
}

#[tokio::test]
async fn test_conflicting_params_are_not_coalesced() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log)
                .plan(&[1])
                .request(ShardRequest::new(Purpose::GET_TOP_IDS).with_param("rows", 5)),
            ScriptedComponent::new("b", &log)
                .plan(&[1])
                .request(ShardRequest::new(Purpose::GET_TOP_GROUPS).with_param("rows", 50)),
        ],
        transport.clone(),
        fast_config(),
    );

    coordinator.execute(request(&["s1"])).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].purpose, Purpose::GET_TOP_IDS);
    assert_eq!(calls[1].purpose, Purpose::GET_TOP_GROUPS);
}

#[tokio::test]
async fn test_params_set_by_one_request_only_are_not_coalesced() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log)
                .plan(&[1])
                .request(ShardRequest::new(Purpose::GET_TOP_IDS).with_param("q", "x")),
            ScriptedComponent::new("b", &log).plan(&[1]).request(
                ShardRequest::new(Purpose::GET_STATS)
                    .with_param("q", "x")
                    .with_param("rows", 2),
            ),
        ],
        transport.clone(),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1"])).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(response.rounds[0].calls, 2);
    assert_eq!(calls[0].purpose, Purpose::GET_TOP_IDS);
    assert_eq!(calls[0].params.get("rows"), None);
    assert_eq!(calls[1].purpose, Purpose::GET_STATS);
    assert_eq!(calls[1].params["rows"], json!(2));
}

#[tokio::test]
async fn test_barrier_holds_responses_until_every_call_finished() {
    let log = EventLog::new();
    let transport = ScriptedTransport::new(&log).slow("s2", Duration::from_millis(80));
    let coordinator = coordinator(
        vec![ScriptedComponent::new("a", &log).plan(&[1])],
        Arc::new(transport),
        fast_config(),
    );

    coordinator.execute(request(&["s1", "s2"])).await.unwrap();

    let handle = log.position("a:handle@1:ok=2:err=0").unwrap();
    assert!(log.position("call:s1").unwrap() < handle);
    assert!(log.position("call:s2").unwrap() < handle);
}

#[tokio::test]
async fn test_documented_two_component_order() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("c1", &log).plan(&[1]),
            ScriptedComponent::new("c2", &log).plan(&[2]),
        ],
        Arc::new(ScriptedTransport::new(&log)),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1"])).await.unwrap();

    assert_eq!(response.round_count(), 2);
    assert_eq!(
        log.events(),
        vec![
            "c1:prepare",
            "c2:prepare",
            "c1:build@1",
            "call:s1",
            "c1:handle@1:ok=1:err=0",
            "c1:finish@1",
            "c2:finish@1",
            "c2:build@2",
            "call:s1",
            "c2:handle@2:ok=1:err=0",
            "c1:finish@2",
            "c2:finish@2",
        ]
    );
}

#[tokio::test]
async fn test_terminates_after_all_plans_complete() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1, 2, 3]),
            ScriptedComponent::new("b", &log).plan(&[2, 4]),
        ],
        Arc::new(ScriptedTransport::new(&log)),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1", "s2"])).await.unwrap();

    assert_eq!(stages(&response), vec![1, 2, 3, 4]);
    assert_eq!(response.rounds[1].builders, vec!["a", "b"]);
    assert_eq!(log.matching("a:finish").len(), 4);
    assert_eq!(log.matching("b:finish").len(), 4);
}

#[tokio::test]
async fn test_round_ceiling_stops_a_stuck_component() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![ScriptedComponent::new("loop", &log).plan(&[7]).stuck()],
        Arc::new(ScriptedTransport::new(&log)),
        CoordinatorConfigBuilder::new().max_rounds(5).build().unwrap(),
    );

    let err = coordinator.execute(request(&["s1"])).await.unwrap_err();

    match err {
        CoordinatorError::NotConverged {
            request_id,
            rounds,
            stage,
        } => {
            assert_eq!(request_id, "req-1");
            assert_eq!(rounds, 5);
            assert_eq!(stage, Stage::new(7));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.matching("loop:build").len(), 5);
}

#[tokio::test]
async fn test_stage_does_not_move_backward() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![ScriptedComponent::new("a", &log).plan(&[5, 3])],
        Arc::new(ScriptedTransport::new(&log)),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1"])).await.unwrap();
    assert_eq!(stages(&response), vec![5, 5]);
}

#[tokio::test]
async fn test_timed_out_shard_only_reaches_components_that_targeted_it() {
    let log = EventLog::new();
    let transport = ScriptedTransport::new(&log).slow("s1", Duration::from_millis(500));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1]).request(
                ShardRequest::new(Purpose::GET_TERMS)
                    .for_shards(vec![ShardId::new("s2")])
                    .with_param("terms", true),
            ),
            ScriptedComponent::new("b", &log)
                .plan(&[1])
                .request(ShardRequest::new(Purpose::GET_STATS).with_param("stats", true)),
        ],
        Arc::new(transport),
        CoordinatorConfigBuilder::new()
            .shard_timeout_ms(50)
            .build()
            .unwrap(),
    );

    let response = coordinator.execute(request(&["s1", "s2"])).await.unwrap();

    assert_eq!(log.matching("a:handle"), vec!["a:handle@1:ok=1:err=0"]);
    assert_eq!(log.matching("b:handle"), vec!["b:handle@1:ok=1:err=1"]);
    assert_eq!(log.matching("a:finish").len(), 1);
    assert_eq!(log.matching("b:finish").len(), 1);

    assert!(response.partial);
    assert_eq!(response.degradations.len(), 1);
    let degradation = &response.degradations[0];
    assert_eq!(degradation.phase, DegradedPhase::Shard);
    assert_eq!(degradation.shard, Some(ShardId::new("s1")));
    assert_eq!(response.rounds[0].failed_calls, 1);
}

#[tokio::test]
async fn test_failing_shard_degrades_tolerant_request() {
    let log = EventLog::new();
    let transport = ScriptedTransport::new(&log).failing("s2", "index corrupt");
    let coordinator = coordinator(
        vec![ScriptedComponent::new("a", &log).plan(&[1])],
        Arc::new(transport),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1", "s2"])).await.unwrap();

    assert!(response.partial);
    assert!(response.degradations[0].message.contains("index corrupt"));
    assert_eq!(
        response.section("a").unwrap()[0]["shard"],
        json!("s1")
    );
}

#[tokio::test]
async fn test_strict_policy_rejects_partial_results() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log).unreachable("s2"));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1]),
            ScriptedComponent::new("b", &log).plan(&[2]),
        ],
        transport,
        fast_config(),
    );

    let err = coordinator
        .execute(request(&["s1", "s2"]).with_partial_results(PartialResultsPolicy::Strict))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::PartialResultsRejected { ref stage, .. } if *stage == Stage::new(1)
    ));
    // the degraded round completes, the next one never starts
    assert_eq!(log.matching("a:finish").len(), 1);
    assert!(log.matching("b:build").is_empty());
}

#[tokio::test]
async fn test_component_failures_inside_a_round_degrade() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1]).failing_build(),
            ScriptedComponent::new("b", &log).plan(&[1]).failing_handle(),
            ScriptedComponent::new("c", &log).failing_finish(),
        ],
        Arc::new(ScriptedTransport::new(&log)),
        fast_config(),
    );

    let response = coordinator.execute(request(&["s1"])).await.unwrap();

    let phases: Vec<(Option<String>, DegradedPhase)> = response
        .degradations
        .iter()
        .map(|d| (d.component.clone(), d.phase))
        .collect();
    assert_eq!(
        phases,
        vec![
            (Some("a".to_string()), DegradedPhase::BuildRequests),
            (Some("b".to_string()), DegradedPhase::HandleResponses),
            (Some("c".to_string()), DegradedPhase::FinishStage),
        ]
    );
    // a built nothing so it never gets responses
    assert!(log.matching("a:handle").is_empty());
    assert_eq!(response.rounds[0].requests, 1);
}

#[tokio::test]
async fn test_prepare_failure_is_fatal() {
    let log = EventLog::new();
    let transport = Arc::new(ScriptedTransport::new(&log));
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1]).failing_prepare(),
            ScriptedComponent::new("b", &log).plan(&[1]),
        ],
        transport.clone(),
        fast_config(),
    );

    let err = coordinator.execute(request(&["s1"])).await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::PrepareFailed { ref component, .. } if component == "a"
    ));
    assert_eq!(err.request_id(), "req-1");
    assert_eq!(log.events(), vec!["a:prepare"]);
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_unavailable_transport_is_fatal() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![ScriptedComponent::new("a", &log).plan(&[1])],
        Arc::new(ScriptedTransport::unavailable(&log)),
        fast_config(),
    );

    let err = coordinator.execute(request(&["s1"])).await.unwrap_err();

    assert!(matches!(err, CoordinatorError::TransportUnavailable { .. }));
    assert!(log.matching("a:handle").is_empty());
    assert!(log.matching("a:finish").is_empty());
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_round() {
    let log = EventLog::new();
    let transport = ScriptedTransport::new(&log).slow("s1", Duration::from_secs(5));
    let coordinator = coordinator(
        vec![ScriptedComponent::new("a", &log).plan(&[1])],
        Arc::new(transport),
        CoordinatorConfigBuilder::new()
            .shard_timeout_ms(10_000)
            .build()
            .unwrap(),
    );

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
    });

    let started = std::time::Instant::now();
    let err = coordinator
        .execute_with_cancel(request(&["s1"]), signal)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(
        err,
        CoordinatorError::Cancelled { ref stage, .. } if *stage == Stage::new(1)
    ));
    assert!(log.matching("a:handle").is_empty());
}

#[tokio::test]
async fn test_request_deadline() {
    let log = EventLog::new();
    let transport = ScriptedTransport::new(&log).slow("s1", Duration::from_secs(2));
    let coordinator = coordinator(
        vec![ScriptedComponent::new("a", &log).plan(&[1])],
        Arc::new(transport),
        CoordinatorConfigBuilder::new()
            .shard_timeout_ms(10_000)
            .request_timeout_ms(50)
            .build()
            .unwrap(),
    );

    let err = coordinator.execute(request(&["s1"])).await.unwrap_err();

    assert!(matches!(
        err,
        CoordinatorError::DeadlineExceeded { timeout_ms: 50, .. }
    ));
}

#[tokio::test]
async fn test_same_inputs_give_identical_results() {
    let log = EventLog::new();
    let coordinator = coordinator(
        vec![
            ScriptedComponent::new("a", &log).plan(&[1, 3]),
            ScriptedComponent::new("b", &log).plan(&[2]),
        ],
        Arc::new(ScriptedTransport::new(&log)),
        fast_config(),
    );

    let first = coordinator.execute(request(&["s1", "s2", "s3"])).await.unwrap();
    let second = coordinator.execute(request(&["s1", "s2", "s3"])).await.unwrap();

    assert_eq!(first.result, second.result);
    assert_eq!(stages(&first), stages(&second));
}
