//! Post-game review over a real driver and the fake engine.

mod common;

use std::time::Duration;

use common::{FakeUci, SearchContext, SearchReply, fast_config, probe_pool};
use rchess_analysis::{
    AnalysisError, Classification, CozyRules, EnginePool, EngineDriver, ReviewRequest,
    ReviewSummary, Score, SearchLimits, Side, review_game, review_game_with,
};

fn moves(list: &[&str]) -> Vec<String> {
    list.iter().map(|m| m.to_string()).collect()
}

fn reply(lines: &[&str]) -> SearchReply {
    SearchReply::Lines(lines.iter().map(|l| l.to_string()).collect())
}

fn single_driver_pool(fake: &FakeUci) -> EnginePool<EngineDriver> {
    EnginePool::new(vec![fake.driver(fast_config())])
}

#[tokio::test]
async fn empty_game_does_not_borrow_an_engine() {
    let (pool, stats) = probe_pool(1, Duration::ZERO);
    let request = ReviewRequest::new(Vec::new(), SearchLimits::movetime(50), 3);

    let reports = review_game(&pool, &CozyRules, &request).await.unwrap();

    assert!(reports.is_empty());
    assert_eq!(stats.count("new_game"), 0);
    assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn played_move_found_among_lines_is_not_searched_again() {
    let fake = FakeUci::new(|ctx: &SearchContext| match ctx.moves.len() {
        0 => reply(&[
            "info depth 14 multipv 1 score cp 40 pv d2d4 d7d5",
            "info depth 14 multipv 2 score cp 30 pv e2e4 e7e5",
            "bestmove d2d4",
        ]),
        _ => reply(&[
            "info depth 14 multipv 1 score cp 10 pv e7e5 g1f3",
            "info depth 14 multipv 2 score cp 5 pv c7c5 g1f3",
            "bestmove e7e5",
        ]),
    });
    let pool = single_driver_pool(&fake);
    let request = ReviewRequest::new(moves(&["e2e4", "e7e5"]), SearchLimits::movetime(50), 2);

    let reports = review_game(&pool, &CozyRules, &request).await.unwrap();

    assert_eq!(reports.len(), 2);
    let first = &reports[0];
    assert_eq!(first.side, Side::White);
    assert_eq!(first.best_move.as_deref(), Some("d2d4"));
    assert_eq!(first.score_before, Some(Score::Cp(40)));
    assert_eq!(first.score_after, Some(Score::Cp(30)));
    assert_eq!(first.classification, Classification::Good);
    assert_eq!(first.alternatives.len(), 1);
    assert_eq!(first.alternatives[0].pv, "d2d4 d7d5");

    let second = &reports[1];
    assert_eq!(second.side, Side::Black);
    assert_eq!(second.score_after, Some(Score::Cp(10)));
    assert_eq!(second.alternatives.iter().map(|a| a.pv.as_str()).collect::<Vec<_>>(), ["c7c5 g1f3"]);

    assert_eq!(fake.count_commands("go"), 2);
    assert_eq!(fake.count_commands("ucinewgame"), 1);
    assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn unseen_move_is_scored_from_the_opponent_search() {
    let fake = FakeUci::new(|ctx: &SearchContext| {
        if ctx.moves.is_empty() {
            reply(&["info depth 14 multipv 1 score cp 40 pv d2d4 d7d5", "bestmove d2d4"])
        } else {
            reply(&["info depth 14 multipv 1 score cp 120 pv c7c5 g1f3", "bestmove c7c5"])
        }
    });
    let pool = single_driver_pool(&fake);
    let request = ReviewRequest::new(moves(&["e2e4"]), SearchLimits::movetime(50), 1);

    let reports = review_game(&pool, &CozyRules, &request).await.unwrap();

    assert_eq!(reports[0].score_before, Some(Score::Cp(40)));
    assert_eq!(reports[0].score_after, Some(Score::Cp(-120)));
    assert_eq!(reports[0].classification, Classification::Blunder);
    assert!(fake.commands().contains(&"position startpos moves e2e4".to_string()));
    assert_eq!(fake.count_commands("go"), 2);

    // the shape printed line by line by the review command
    let json = serde_json::to_value(&reports[0]).unwrap();
    assert_eq!(json["side"], "white");
    assert_eq!(json["played"], "e2e4");
    assert_eq!(json["best_move"], "d2d4");
    assert_eq!(json["classification"], "blunder");
    assert_eq!(json["score_before"], serde_json::json!({ "type": "cp", "value": 40 }));
    assert_eq!(json["score_after"], serde_json::json!({ "type": "cp", "value": -120 }));
    assert_eq!(json["alternatives"][0]["pv"], "d2d4 d7d5");
}

#[tokio::test]
async fn delivering_mate_scores_as_mate_in_one() {
    let fake = FakeUci::new(|ctx: &SearchContext| {
        if ctx.moves.is_empty() {
            reply(&["info depth 5 multipv 1 score mate 2 pv a1b1 g8h8", "bestmove a1b1"])
        } else {
            reply(&["info depth 0 score mate 0", "bestmove (none)"])
        }
    });
    let pool = single_driver_pool(&fake);
    let request = ReviewRequest::new(moves(&["a1a8"]), SearchLimits::depth(5), 1)
        .with_fen("6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1");

    let reports = review_game(&pool, &CozyRules, &request).await.unwrap();

    assert_eq!(reports[0].score_after, Some(Score::Mate(1)));
    assert_eq!(reports[0].classification, Classification::Good);
    assert!(
        fake.commands()
            .contains(&"position fen 6k1/5ppp/8/8/8/8/8/R5K1 w - - 0 1 moves a1a8".to_string())
    );
}

#[tokio::test]
async fn illegal_move_aborts_and_returns_the_engine() {
    let fake = FakeUci::ranked(&["d2d4"], 20);
    let pool = single_driver_pool(&fake);
    let request = ReviewRequest::new(moves(&["e2e4", "e2e4"]), SearchLimits::movetime(50), 1);

    let err = review_game(&pool, &CozyRules, &request).await.unwrap_err();

    assert_eq!(err, AnalysisError::IllegalMove { mv: "e2e4".to_string() });
    assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn invalid_start_position_fails_before_borrowing() {
    let (pool, stats) = probe_pool(1, Duration::ZERO);
    let request = ReviewRequest::new(moves(&["e2e4"]), SearchLimits::movetime(50), 1).with_fen("nonsense");

    let err = review_game(&pool, &CozyRules, &request).await.unwrap_err();

    assert!(matches!(err, AnalysisError::InvalidPosition { .. }));
    assert_eq!(stats.count("new_game"), 0);
}

#[tokio::test]
async fn reports_stream_and_summarize_per_side() {
    let fake = FakeUci::ranked(&["e2e4", "e7e5", "g1f3"], 25);
    let pool = single_driver_pool(&fake);
    let request = ReviewRequest::new(moves(&["e2e4", "e7e5", "g1f3"]), SearchLimits::movetime(50), 3);

    let mut streamed = Vec::new();
    let reports = review_game_with(&pool, &CozyRules, &request, |report| streamed.push(report.ply))
        .await
        .unwrap();
    let summary = ReviewSummary::from_reports(&reports);

    assert_eq!(streamed, vec![0, 1, 2]);
    assert_eq!(summary.white.moves, 2);
    assert_eq!(summary.black.moves, 1);
}
