use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::ingest::{IngestConfig, IngestError, Pipeline};
use crate::ingest::progress::{NoProgress, ProgressReporter};
use crate::ingest::record::GameRecord;
use crate::query::QueryOutcome;
use crate::store::rows::{IngestRunRow, MoveNode, NodeId, RunStatus};
use crate::tests::{found_stats, TestTree, TEST_SOURCE};

const OPENINGS: &str = "\
e4 e5 Nf3 Nc6 1-0
e4 e5 Nf3 Nf6 0-1
e4 c5 1/2-1/2
d4 d5 c4 *
d4 Nf6 1-0
e4 e5 Nf3 Nc6 Bb5 1/2-1/2
";

// Sets the stop flag once `stop_after` lines have been consumed.
struct StopAfter {
    stop: Arc<AtomicBool>,
    stop_after: u64,
}

impl ProgressReporter for StopAfter {
    fn set_total(&mut self, _total: u64) {}

    fn advance(&mut self, processed: u64) {
        if processed >= self.stop_after {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn finish(&mut self, _committed: u64, _skipped: u64) {}
}

#[tokio::test]
async fn shared_prefix_statistics() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest("e4 e5 1-0\ne4 c5 0-1\n").await;

    assert_eq!(summary.committed, 2);
    assert_eq!(summary.skipped, 0);

    let reader = tree.reader().await;

    let e4 = found_stats(&reader, &["e4"]).await;
    assert_eq!(e4.total, 2);
    assert_eq!(e4.white_wins, 1);
    assert_eq!(e4.black_wins, 1);
    assert_eq!(e4.white_win_rate, 0.5);
    assert_eq!(e4.black_win_rate, 0.5);

    let e4_e5 = found_stats(&reader, &["e4", "e5"]).await;
    assert_eq!(e4_e5.total, 1);
    assert_eq!(e4_e5.white_win_rate, 1.0);
    assert_eq!(e4_e5.draw_rate, 0.0);

    assert_eq!(
        reader.query(&["e4", "d4"]).await.unwrap(),
        QueryOutcome::NotFound {
            ply: 2,
            mv: "d4".to_string(),
        },
    );
}

#[tokio::test]
async fn shared_prefixes_share_nodes() {
    let mut tree = TestTree::new().await;
    tree.ingest("e4 e5 Nf3 1-0\ne4 e5 Nc3 0-1\n").await;

    assert_eq!(MoveNode::count(tree.store.connection()).await.unwrap(), 4);
}

#[tokio::test]
async fn every_prefix_counts_every_game_through_it() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest(OPENINGS).await;
    assert_eq!(summary.committed, 6);

    let reader = tree.reader().await;

    let e4 = found_stats(&reader, &["e4"]).await;
    assert_eq!((e4.total, e4.white_wins, e4.black_wins, e4.draws), (4, 1, 1, 2));

    let ruy = found_stats(&reader, &["e4", "e5", "Nf3", "Nc6"]).await;
    assert_eq!((ruy.total, ruy.white_wins, ruy.draws), (2, 1, 1));

    let d4_d5 = found_stats(&reader, &["d4", "d5", "c4"]).await;
    assert_eq!((d4_d5.total, d4_d5.unfinished), (1, 1));

    // a parent's counters are its own game endings plus its children's
    let conn = tree.store.connection();
    let e4_node = MoveNode::find_child(conn, NodeId::ROOT, "e4").await.unwrap().unwrap();
    let e4_e5 = MoveNode::find_child(conn, e4_node, "e5").await.unwrap().unwrap();
    let parent = MoveNode::read_counters(conn, e4_e5).await.unwrap().unwrap();
    let children_total: u64 = MoveNode::children(conn, e4_e5).await.unwrap()
        .iter()
        .map(|child| child.counters.total())
        .sum();
    assert!(parent.total() >= children_total);

    let games = found_stats(&reader, &[] as &[&str]).await;
    assert_eq!(games.total, 6);
}

#[tokio::test]
async fn malformed_lines_are_logged_and_skipped() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest("e4 e5 1-0\ne4\nd4 d5 2-0\n\ne4 c5 0-1\n").await;

    assert_eq!(summary.committed, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.parse_failures, 2);
    assert_eq!(summary.storage_failures, 0);
    assert_eq!(summary.last_committed_line, 5);

    let log = tree.error_log();
    let entries = log.lines().collect::<Vec<_>>();
    assert_eq!(entries, vec![
        "line 2: e4. Error: Invalid game line format: expected at least one move followed by a result",
        "line 3: d4 d5 2-0. Error: Invalid result: 2-0",
    ]);

    let reader = tree.reader().await;
    assert_eq!(found_stats(&reader, &["e4"]).await.total, 2);
    assert!(!reader.query(&["d4"]).await.unwrap().is_found());
}

#[tokio::test]
async fn crlf_line_endings_are_accepted() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest("e4 e5 1-0\r\nd4 d5 *\r\n").await;

    assert_eq!(summary.committed, 2);
    assert_eq!(tree.error_log(), "");
}

#[tokio::test]
async fn illegal_move_rolls_back_the_whole_record() {
    let mut tree = TestTree::new().await;
    let config = IngestConfig {
        validate_moves: true,
        ..tree.config()
    };
    let summary = tree.ingest_with("e4 e5 Qxf7 1-0\nd4 d5 1/2-1/2\n", config).await;

    assert_eq!(summary.committed, 1);
    assert_eq!(summary.skipped, 1);

    let reader = tree.reader().await;
    // the legal prefix of the rejected game must not have been created either
    assert_eq!(
        reader.query(&["e4"]).await.unwrap(),
        QueryOutcome::NotFound {
            ply: 1,
            mv: "e4".to_string(),
        },
    );
    assert_eq!(found_stats(&reader, &["d4", "d5"]).await.draws, 1);
    assert_eq!(MoveNode::count(tree.store.connection()).await.unwrap(), 2);

    assert_eq!(
        tree.error_log().trim_end(),
        "line 1: e4 e5 Qxf7 1-0. Error: Illegal move `Qxf7` at ply 3",
    );
}

#[tokio::test]
async fn without_validation_any_token_is_a_move() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest("e4 e5 Qxf7 1-0\n").await;

    assert_eq!(summary.committed, 1);

    let reader = tree.reader().await;
    assert_eq!(found_stats(&reader, &["e4", "e5", "Qxf7"]).await.total, 1);
}

#[tokio::test]
async fn commits_every_batch_size_records() {
    let mut tree = TestTree::new().await;
    let config = IngestConfig {
        batch_size: NonZeroUsize::new(2).unwrap(),
        ..tree.config()
    };
    let summary = tree.ingest_with("e4 1-0\nd4 0-1\nc4 *\nNf3 1-0\ng3 1/2-1/2\n", config).await;

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.committed, 5);
    assert_eq!(summary.last_committed_line, 5);
}

#[tokio::test]
async fn empty_input_commits_nothing() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest("").await;

    assert_eq!(summary.committed, 0);
    assert_eq!(summary.batches, 0);
    assert!(!summary.interrupted);

    let run = IngestRunRow::fetch(tree.store.connection(), summary.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn completed_run_is_recorded() {
    let mut tree = TestTree::new().await;
    let summary = tree.ingest("e4 e5 1-0\ne4\n").await;

    let run = IngestRunRow::fetch(tree.store.connection(), summary.run_id).await.unwrap().unwrap();
    assert_eq!(run.source, TEST_SOURCE);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.committed_records, 1);
    assert_eq!(run.skipped_records, 1);
    assert_eq!(run.last_committed_line, 2);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn stopped_run_resumes_without_double_counting() {
    let mut tree = TestTree::new().await;
    let input = "e4 e5 1-0\ne4 c5 0-1\nd4 d5 *\ne4 e5 1/2-1/2\n";

    let mut pipeline = Pipeline::new(tree.config());
    let mut progress = StopAfter {
        stop: pipeline.stop_handle(),
        stop_after: 2,
    };
    let first = pipeline
        .run(&mut tree.store, TEST_SOURCE, input.as_bytes(), &mut progress)
        .await
        .unwrap();

    assert!(first.interrupted);
    assert_eq!(first.committed, 2);
    assert_eq!(first.last_committed_line, 2);

    let run = IngestRunRow::fetch(tree.store.connection(), first.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);

    let config = IngestConfig {
        resume: true,
        ..tree.config()
    };
    let second = tree.ingest_with(input, config).await;

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.resumed_after_line, 2);
    assert_eq!(second.committed, 2);
    assert_eq!(second.last_committed_line, 4);

    let run = IngestRunRow::fetch(tree.store.connection(), first.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.committed_records, 4);

    let reader = tree.reader().await;
    let e4 = found_stats(&reader, &["e4"]).await;
    assert_eq!((e4.total, e4.white_wins, e4.black_wins, e4.draws), (3, 1, 1, 1));
    assert_eq!(found_stats(&reader, &[] as &[&str]).await.total, 4);
}

#[tokio::test]
async fn resume_after_completed_run_starts_over() {
    let mut tree = TestTree::new().await;
    let first = tree.ingest("e4 e5 1-0\n").await;

    let config = IngestConfig {
        resume: true,
        ..tree.config()
    };
    let second = tree.ingest_with("e4 e5 1-0\n", config).await;

    assert_ne!(second.run_id, first.run_id);
    assert_eq!(second.resumed_after_line, 0);

    let reader = tree.reader().await;
    assert_eq!(found_stats(&reader, &["e4", "e5"]).await.white_wins, 2);
}

#[tokio::test]
async fn error_log_is_appended_across_runs() {
    let mut tree = TestTree::new().await;
    tree.ingest("e4\n").await;
    tree.ingest("e4 e5 1-0\nd4 3-0\n").await;

    assert_eq!(tree.error_log().lines().collect::<Vec<_>>(), vec![
        "line 1: e4. Error: Invalid game line format: expected at least one move followed by a result",
        "line 2: d4 3-0. Error: Invalid result: 3-0",
    ]);
}

#[tokio::test]
async fn counters_are_conserved_across_the_whole_tree() {
    let mut tree = TestTree::new().await;
    tree.ingest(OPENINGS).await;

    let games = OPENINGS.lines()
        .map(|line| GameRecord::from_str(line).unwrap().moves)
        .collect::<Vec<_>>();

    let conn = tree.store.connection();
    let mut visited = 0u64;
    let mut fully_continued = Vec::new();
    let mut stack = vec![(NodeId::ROOT, Vec::<String>::new())];

    while let Some((node, path)) = stack.pop() {
        let children = MoveNode::children(conn, node).await.unwrap();
        let children_total: u64 = children.iter().map(|child| child.counters.total()).sum();

        if !node.is_root() {
            let total = MoveNode::read_counters(conn, node).await.unwrap().unwrap().total();
            let reached = games.iter().filter(|moves| moves.starts_with(&path)).count() as u64;
            let ended = games.iter().filter(|moves| **moves == path).count() as u64;

            assert_eq!(total, reached, "{path:?}");
            assert_eq!(total, children_total + ended, "{path:?}");
            if total == children_total {
                fully_continued.push(path.join(" "));
            }
            visited += 1;
        }

        for child in children {
            let mut child_path = path.clone();
            child_path.push(child.mv);
            stack.push((child.id, child_path));
        }
    }

    assert_eq!(visited, MoveNode::count(conn).await.unwrap());

    fully_continued.sort();
    assert_eq!(fully_continued, vec!["d4", "d4 d5", "e4", "e4 e5", "e4 e5 Nf3"]);
}

#[tokio::test]
async fn storage_failure_rolls_back_only_its_record() {
    let mut tree = TestTree::new().await;
    sqlx::query(r"
        CREATE TRIGGER reject_bb5 BEFORE INSERT ON moves
        WHEN NEW.move = 'Bb5'
        BEGIN
            SELECT RAISE(ABORT, 'Bb5 is not accepted');
        END;
    ")
        .execute(tree.store.connection())
        .await
        .unwrap();

    let summary = tree.ingest("d4 d5 1-0\ne4 e5 Nf3 Nc6 Bb5 0-1\nc4 e5 *\n").await;

    assert_eq!(summary.committed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.storage_failures, 1);
    assert_eq!(summary.parse_failures, 0);
    assert_eq!(summary.last_committed_line, 3);

    let reader = tree.reader().await;
    // the four nodes created before Bb5 went away with the record
    assert_eq!(
        reader.query(&["e4"]).await.unwrap(),
        QueryOutcome::NotFound {
            ply: 1,
            mv: "e4".to_string(),
        },
    );
    assert_eq!(found_stats(&reader, &["c4", "e5"]).await.unfinished, 1);
    assert_eq!(reader.summary().await.unwrap().nodes, 4);

    let log = tree.error_log();
    let entries = log.lines().collect::<Vec<_>>();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("line 2: e4 e5 Nf3 Nc6 Bb5 0-1. Error: "), "{}", entries[0]);
    assert!(entries[0].contains("Bb5 is not accepted"), "{}", entries[0]);
}

#[tokio::test]
async fn handle_failure_aborts_at_the_last_committed_batch() {
    let mut tree = TestTree::new().await;

    // a few pages of headroom, then the database is "full"
    let conn = tree.store.connection();
    let (pages,): (i64,) = sqlx::query_as("PRAGMA page_count;")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    sqlx::query(&format!("PRAGMA max_page_count = {};", pages + 4))
        .execute(&mut *conn)
        .await
        .unwrap();

    // every fifth line is malformed, and every game only has moves of its own
    let filler = "m".repeat(40);
    let input = (1..=400)
        .map(|line| match line % 5 {
            0 => format!("x{line}"),
            _ => format!("{filler}a{line} {filler}b{line} {filler}c{line} {filler}d{line} 1-0"),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let config = IngestConfig {
        batch_size: NonZeroUsize::new(5).unwrap(),
        ..tree.config()
    };
    let result = Pipeline::new(config)
        .run(&mut tree.store, TEST_SOURCE, input.as_bytes(), &mut NoProgress)
        .await;

    let (committed, last_committed_line) = match result {
        Err(IngestError::Fatal { committed, last_committed_line, source }) => {
            assert!(source.is_fatal(), "{source}");
            (committed, last_committed_line)
        },
        other => panic!("expected a fatal error, got {other:?}"),
    };

    assert!(last_committed_line > 0);
    assert!(last_committed_line < 400);
    assert_eq!(last_committed_line % 5, 0);
    assert_eq!(committed, last_committed_line / 5 * 4);

    let reader = tree.reader().await;
    let mut conn = reader.acquire().await.unwrap();
    let run = IngestRunRow::latest_unfinished(&mut conn, TEST_SOURCE).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_committed_line, last_committed_line);
    assert_eq!(run.committed_records, committed);

    assert_eq!(found_stats(&reader, &[] as &[&str]).await.total, committed);

    // entries of the batch that never committed were dropped
    let log = tree.error_log();
    let logged_lines = log.lines()
        .map(|entry| {
            let number = entry.trim_start_matches("line ").split(':').next().unwrap();
            number.parse::<u64>().unwrap()
        })
        .collect::<Vec<_>>();
    assert_eq!(logged_lines, (5..=last_committed_line).step_by(5).collect::<Vec<_>>());
}
