#![cfg(feature = "inmem-store")]

use anonboard::{
    models::{NewReply, NewThread, PostId},
    repo::{inmem::InMemRepo, with_board, RepoError},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use anonboard::repo::{ReplyRepo, ThreadRepo};
use std::time::Duration;

fn thread(text: &str) -> NewThread {
    NewThread { text: text.into(), delete_password_hash: format!("hash-of-{text}") }
}

fn reply(text: &str) -> NewReply {
    NewReply { text: text.into(), delete_password_hash: format!("hash-of-{text}") }
}

/// Timestamps come from the wall clock; keep consecutive writes apart.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(2)).await;
}

#[tokio::test]
async fn boards_appear_on_first_insert() {
    let r = InMemRepo::new();
    assert!(r.recent_threads("fresh", 10).await.unwrap().is_empty());

    let t = r.insert_thread("fresh", thread("hello")).await.unwrap();
    assert!(!t.reported);
    assert_eq!(t.created_on, t.bumped_on);
    assert_eq!(t.delete_password_hash, "hash-of-hello");

    let listed = r.recent_threads("fresh", 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, t.id);
    assert!(r.recent_threads("other", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn recent_threads_order_by_bump_and_limit() {
    let r = InMemRepo::new();
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(r.insert_thread("b", thread(&format!("t{i}"))).await.unwrap().id);
        tick().await;
    }
    // replying to the oldest moves it to the front
    r.push_reply("b", ids[0], reply("up")).await.unwrap();

    let listed: Vec<PostId> = r.recent_threads("b", 3).await.unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(listed, vec![ids[0], ids[3], ids[2]]);
}

#[tokio::test]
async fn push_reply_appends_and_bumps() {
    let r = InMemRepo::new();
    let t = r.insert_thread("b", thread("op")).await.unwrap();
    tick().await;
    let first = r.push_reply("b", t.id, reply("one")).await.unwrap();
    let second = r.push_reply("b", t.id, reply("two")).await.unwrap();

    let stored = r.get_thread("b", t.id).await.unwrap();
    let ids: Vec<PostId> = stored.replies.iter().map(|x| x.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(stored.bumped_on, second.created_on);
    assert!(stored.bumped_on > stored.created_on);
    assert_eq!(r.get_reply("b", t.id, first.id).await.unwrap().text, "one");
}

#[tokio::test]
async fn lookups_are_scoped_to_board_and_thread() {
    let r = InMemRepo::new();
    let a = r.insert_thread("a", thread("in a")).await.unwrap();
    let other = r.insert_thread("a", thread("other")).await.unwrap();
    let rep = r.push_reply("a", a.id, reply("r")).await.unwrap();

    assert!(matches!(r.get_thread("b", a.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.report_thread("b", a.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.push_reply("b", a.id, reply("x")).await, Err(RepoError::NotFound)));
    assert!(matches!(r.get_reply("a", other.id, rep.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.report_reply("a", other.id, rep.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.set_reply_text("a", a.id, PostId::new(), "x").await, Err(RepoError::NotFound)));
    assert!(matches!(r.delete_thread("nowhere", a.id).await, Err(RepoError::NotFound)));
}

#[tokio::test]
async fn flags_and_text_updates() {
    let r = InMemRepo::new();
    let t = r.insert_thread("b", thread("op")).await.unwrap();
    let rep = r.push_reply("b", t.id, reply("r")).await.unwrap();
    let bumped = r.get_thread("b", t.id).await.unwrap().bumped_on;

    r.report_thread("b", t.id).await.unwrap();
    r.report_reply("b", t.id, rep.id).await.unwrap();
    r.set_reply_text("b", t.id, rep.id, "[deleted]").await.unwrap();

    let stored = r.get_thread("b", t.id).await.unwrap();
    assert!(stored.reported);
    assert!(stored.replies[0].reported);
    assert_eq!(stored.replies[0].text, "[deleted]");
    assert_eq!(stored.replies[0].delete_password_hash, "hash-of-r");
    assert_eq!(stored.bumped_on, bumped);
}

#[tokio::test]
async fn delete_thread_takes_replies_with_it() {
    let r = InMemRepo::new();
    let keep = r.insert_thread("b", thread("keep")).await.unwrap();
    let gone = r.insert_thread("b", thread("gone")).await.unwrap();
    let rep = r.push_reply("b", gone.id, reply("r")).await.unwrap();

    r.delete_thread("b", gone.id).await.unwrap();
    assert!(matches!(r.get_thread("b", gone.id).await, Err(RepoError::NotFound)));
    assert!(matches!(r.get_reply("b", gone.id, rep.id).await, Err(RepoError::NotFound)));
    let listed = r.recent_threads("b", 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, keep.id);
}

#[tokio::test]
async fn board_handle_delegates() {
    let r = InMemRepo::new();
    let board = with_board(&r, "scoped");
    assert_eq!(board.name(), "scoped");
    let t = board.insert_thread(thread("op")).await.unwrap();
    board.push_reply(t.id, reply("r")).await.unwrap();
    assert_eq!(board.get_thread(t.id).await.unwrap().replies.len(), 1);
    assert_eq!(r.recent_threads("scoped", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (thread_id, reply_id) = {
        let r = InMemRepo::open(dir.path());
        let t = r.insert_thread("b", thread("persisted")).await.unwrap();
        let rep = r.push_reply("b", t.id, reply("r")).await.unwrap();
        r.report_reply("b", t.id, rep.id).await.unwrap();
        (t.id, rep.id)
    };
    assert!(dir.path().join("state.json").exists());

    let reopened = InMemRepo::open(dir.path());
    let stored = reopened.get_thread("b", thread_id).await.unwrap();
    assert_eq!(stored.text, "persisted");
    assert_eq!(stored.replies[0].id, reply_id);
    assert!(stored.replies[0].reported);
}

#[tokio::test]
async fn corrupt_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("state.json"), b"{not json").unwrap();
    let r = InMemRepo::open(dir.path());
    assert!(r.recent_threads("b", 10).await.unwrap().is_empty());
    r.insert_thread("b", thread("fresh")).await.unwrap();
    assert_eq!(InMemRepo::open(dir.path()).recent_threads("b", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_snapshot_write_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let r = InMemRepo::open(dir.path());
    let t = r.insert_thread("b", thread("kept")).await.unwrap();

    // a directory where the snapshot file belongs makes every write fail
    std::fs::remove_file(dir.path().join("state.json")).unwrap();
    std::fs::create_dir(dir.path().join("state.json")).unwrap();

    assert!(matches!(r.insert_thread("b", thread("lost")).await, Err(RepoError::Internal(_))));
    assert!(matches!(r.report_thread("b", t.id).await, Err(RepoError::Internal(_))));
    assert!(matches!(r.push_reply("b", t.id, reply("r")).await, Err(RepoError::Internal(_))));
    assert!(matches!(r.delete_thread("b", t.id).await, Err(RepoError::Internal(_))));

    let listed = r.recent_threads("b", 10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, t.id);
    assert!(!listed[0].reported);
    assert!(listed[0].replies.is_empty());
    assert_eq!(listed[0].bumped_on, t.bumped_on);
}

#[tokio::test]
async fn unwritable_snapshot_on_open_rejects_inserts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("state.json")).unwrap();
    let r = InMemRepo::open(dir.path());
    assert!(r.insert_thread("b", thread("lost")).await.is_err());
    assert!(r.recent_threads("b", 10).await.unwrap().is_empty());
}

#[test]
fn concurrent_writers_all_reach_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let r = InMemRepo::open(dir.path());
    std::thread::scope(|scope| {
        for w in 0..8 {
            let r = r.clone();
            scope.spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                rt.block_on(async {
                    for i in 0..5 {
                        r.insert_thread("b", thread(&format!("w{w}-{i}"))).await.unwrap();
                    }
                });
            });
        }
    });

    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let reopened = InMemRepo::open(dir.path());
    let listed = rt.block_on(reopened.recent_threads("b", 100)).unwrap();
    assert_eq!(listed.len(), 40);
}
