use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use dojo_client::memory::{InMemoryBackend, Operation};
use dojo_client::{ProfileStore, StoreError, TaskStore};
use dojo_core::{
    Priority, RankTier, Task, TaskDraft, TaskId, TaskPatch, TaskStatus, UserId, ValidationError,
};
use rstest::{fixture, rstest};

struct Harness {
    backend: Arc<InMemoryBackend>,
    user: UserId,
    profiles: Arc<ProfileStore>,
    tasks: TaskStore,
}

impl Harness {
    async fn signed_in(xp: u32) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let user = backend.add_account("kenji@dojo.test", "hunter22", "kenji");
        backend.set_profile_xp(&user, xp);
        backend.seed_session(&user);

        let profiles = Arc::new(ProfileStore::new(backend.clone(), backend.clone()));
        let tasks = TaskStore::new(backend.clone(), backend.clone(), profiles.clone());
        profiles.fetch().await.unwrap();
        tasks.fetch().await.unwrap();
        Self {
            backend,
            user,
            profiles,
            tasks,
        }
    }

    fn seed(&self, id: &str, priority: Priority, status: TaskStatus, minutes: i64) -> TaskId {
        let start = ten_am();
        self.backend.seed_task(Task {
            id: TaskId::new(id),
            user_id: self.user.clone(),
            title: format!("kata {id}"),
            priority,
            status,
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            allocated_minutes: u32::try_from(minutes).unwrap(),
            created_at: start,
        });
        TaskId::new(id)
    }
}

fn ten_am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
}

fn draft(title: &str, minutes: i64) -> TaskDraft {
    let start = ten_am();
    TaskDraft::new(title, Priority::Medium, start, start + Duration::minutes(minutes))
}

#[fixture]
fn xp() -> u32 {
    0
}

#[fixture]
async fn dojo(xp: u32) -> Harness {
    Harness::signed_in(xp).await
}

#[rstest]
#[tokio::test]
async fn add_shows_provisional_row_before_confirmation(#[future] dojo: Harness) {
    let dojo = dojo.await;
    dojo.backend.hold(Operation::InsertTask);
    let mut rx = dojo.tasks.subscribe();

    let (added, ()) = tokio::join!(dojo.tasks.add(draft("Morning kata", 45)), async {
        let state = rx.wait_for(|s| s.tasks.len() == 1).await.unwrap().clone();
        let row = &state.tasks[0];
        assert!(row.id.is_provisional());
        assert_eq!(row.allocated_minutes, 45);
        assert_eq!(row.status, TaskStatus::Pending);
        dojo.backend.release(Operation::InsertTask);
    });

    let created = added.unwrap();
    assert!(!created.id.is_provisional());
    assert_eq!(dojo.tasks.tasks(), vec![created]);
}

#[rstest]
#[tokio::test]
async fn failed_add_drops_provisional_row(#[future] dojo: Harness) {
    let dojo = dojo.await;
    dojo.backend.fail_next(Operation::InsertTask, "new row violates row-level security policy");

    let err = dojo.tasks.add(draft("Doomed", 30)).await.unwrap_err();
    assert_eq!(err.to_string(), "new row violates row-level security policy");
    assert!(dojo.tasks.tasks().is_empty());
    assert_eq!(
        dojo.tasks.error().as_deref(),
        Some("new row violates row-level security policy")
    );
}

#[rstest]
#[case::inverted(-15)]
#[case::zero_length(0)]
#[tokio::test]
async fn inverted_interval_is_rejected_before_any_change(
    #[future] dojo: Harness,
    #[case] minutes: i64,
) {
    let dojo = dojo.await;
    let before = dojo.tasks.snapshot();

    let err = dojo.tasks.add(draft("Backwards", minutes)).await.unwrap_err();
    assert_eq!(err, StoreError::Validation(ValidationError::EndNotAfterStart));
    assert_eq!(dojo.tasks.snapshot(), before);
    assert_eq!(dojo.backend.calls(Operation::InsertTask), 0);
}

#[tokio::test]
async fn add_without_identity_is_not_authenticated() {
    let backend = Arc::new(InMemoryBackend::new());
    let profiles = Arc::new(ProfileStore::new(backend.clone(), backend.clone()));
    let tasks = TaskStore::new(backend.clone(), backend.clone(), profiles);

    let err = tasks.add(draft("Nobody", 30)).await.unwrap_err();
    assert_eq!(err, StoreError::NotAuthenticated);
    assert_eq!(tasks.error().as_deref(), Some("Not authenticated"));
}

#[rstest]
#[tokio::test]
async fn gong_previews_xp_and_rank_up(
    #[future]
    #[with(480)]
    dojo: Harness,
) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::High, TaskStatus::Active, 95);
    dojo.tasks.fetch().await.unwrap();
    dojo.tasks.set_active(Some(&id)).unwrap();

    let mut profile_rx = dojo.profiles.subscribe();
    profile_rx.mark_unchanged();

    let completion = dojo.tasks.complete(&id).await.unwrap().unwrap();
    assert_eq!(completion.earned_xp, 39);
    assert_eq!(completion.xp_after, Some(519));
    assert_eq!(completion.previous_rank, RankTier::Initiate);
    assert_eq!(completion.new_rank, RankTier::Disciple);
    assert!(completion.ranked_up());

    // one profile update carried both xp and rank
    assert!(profile_rx.has_changed().unwrap());
    let profile = profile_rx.borrow_and_update().profile.clone().unwrap();
    assert_eq!((profile.xp, profile.rank), (519, RankTier::Disciple));

    assert_eq!(dojo.tasks.get(&id).unwrap().status, TaskStatus::Completed);
    assert!(dojo.tasks.active_task_id().is_none());

    // authoritative value agrees after reconciliation
    dojo.profiles.fetch().await.unwrap();
    assert_eq!(dojo.profiles.xp(), Some(519));
}

#[rstest]
#[tokio::test]
async fn gong_twice_awards_once(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();

    assert!(dojo.tasks.complete(&id).await.unwrap().is_some());
    assert!(dojo.tasks.complete(&id).await.unwrap().is_none());
    assert_eq!(dojo.profiles.xp(), Some(13));
    assert_eq!(dojo.backend.calls(Operation::UpdateTask), 1);
}

#[tokio::test]
async fn gong_without_profile_reports_no_total() {
    let backend = Arc::new(InMemoryBackend::new());
    let user = backend.add_account("kenji@dojo.test", "hunter22", "kenji");
    backend.seed_session(&user);
    let start = ten_am();
    backend.seed_task(Task {
        id: TaskId::new("k1"),
        user_id: user.clone(),
        title: "Kihon".to_string(),
        priority: Priority::Low,
        status: TaskStatus::Pending,
        start_time: start,
        end_time: start + Duration::minutes(30),
        allocated_minutes: 30,
        created_at: start,
    });
    let profiles = Arc::new(ProfileStore::new(backend.clone(), backend.clone()));
    let tasks = TaskStore::new(backend.clone(), backend.clone(), profiles.clone());
    tasks.fetch().await.unwrap();

    let completion = tasks.complete(&TaskId::new("k1")).await.unwrap().unwrap();
    assert_eq!(completion.earned_xp, 13);
    assert_eq!(completion.xp_after, None);
    assert!(!completion.ranked_up());
    assert!(profiles.profile().is_none());
}

#[rstest]
#[tokio::test]
async fn gong_on_unknown_kata_is_a_no_op(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let outcome = dojo.tasks.complete(&TaskId::new("ghost")).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(dojo.backend.calls(Operation::UpdateTask), 0);
}

#[rstest]
#[tokio::test]
async fn failed_gong_discards_preview(
    #[future]
    #[with(100)]
    dojo: Harness,
) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::High, TaskStatus::Active, 60);
    dojo.tasks.fetch().await.unwrap();
    dojo.backend.fail_next(Operation::UpdateTask, "network down");

    let err = dojo.tasks.complete(&id).await.unwrap_err();
    assert_eq!(err.to_string(), "network down");
    assert_eq!(dojo.tasks.get(&id).unwrap().status, TaskStatus::Active);
    assert_eq!(dojo.profiles.xp(), Some(100));
    assert_eq!(dojo.tasks.error().as_deref(), Some("network down"));
}

#[rstest]
#[tokio::test]
async fn failed_update_resyncs_from_remote(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::Medium, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();
    let lists_before = dojo.backend.calls(Operation::ListTasks);
    dojo.backend.fail_next(Operation::UpdateTask, "permission denied");

    let err = dojo
        .tasks
        .update(&id, TaskPatch::default().with_title("Renamed"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "permission denied");
    assert_eq!(dojo.tasks.get(&id).unwrap().title, "kata k1");
    assert_eq!(dojo.backend.calls(Operation::ListTasks), lists_before + 1);
    assert_eq!(dojo.tasks.error().as_deref(), Some("permission denied"));
}

#[rstest]
#[tokio::test]
async fn update_recomputes_allocation(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::Medium, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();

    let start = ten_am();
    dojo.tasks
        .update(&id, TaskPatch::default().with_interval(start, start + Duration::minutes(90)))
        .await
        .unwrap();
    assert_eq!(dojo.tasks.get(&id).unwrap().allocated_minutes, 90);
    assert_eq!(dojo.backend.stored_tasks()[0].allocated_minutes, 90);
}

#[rstest]
#[tokio::test]
async fn failed_delete_restores_exact_snapshot(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let keep = dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    let doomed = dojo.seed("k2", Priority::High, TaskStatus::Pending, 60);
    dojo.tasks.fetch().await.unwrap();
    dojo.tasks.set_active(Some(&doomed)).unwrap();

    // an insert still in flight must survive the restore
    dojo.backend.hold(Operation::InsertTask);
    let mut rx = dojo.tasks.subscribe();
    let (_, ()) = tokio::join!(dojo.tasks.add(draft("In flight", 20)), async {
        rx.wait_for(|s| s.tasks.len() == 3).await.unwrap();
        let before = dojo.tasks.snapshot();

        dojo.backend.fail_next(Operation::DeleteTask, "delete refused");
        let err = dojo.tasks.delete(&doomed).await.unwrap_err();
        assert_eq!(err.to_string(), "delete refused");

        let after = dojo.tasks.snapshot();
        assert_eq!(after.tasks, before.tasks);
        assert_eq!(after.active_task_id, Some(doomed.clone()));
        assert!(after.tasks.iter().any(|t| t.id.is_provisional()));
        dojo.backend.release(Operation::InsertTask);
    });

    assert!(dojo.tasks.get(&keep).is_some());
    assert_eq!(dojo.tasks.tasks().len(), 3);
}

#[rstest]
#[tokio::test]
async fn delete_clears_active_pointer(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();
    dojo.tasks.set_active(Some(&id)).unwrap();

    dojo.tasks.delete(&id).await.unwrap();
    assert!(dojo.tasks.tasks().is_empty());
    assert!(dojo.tasks.active_task_id().is_none());
    assert!(dojo.backend.stored_tasks().is_empty());
}

#[rstest]
#[tokio::test]
async fn delete_removes_row_before_confirmation(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let keep = dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    let doomed = dojo.seed("k2", Priority::High, TaskStatus::Pending, 60);
    dojo.tasks.fetch().await.unwrap();
    dojo.tasks.set_active(Some(&doomed)).unwrap();
    dojo.backend.hold(Operation::DeleteTask);
    let mut rx = dojo.tasks.subscribe();

    let (deleted, ()) = tokio::join!(dojo.tasks.delete(&doomed), async {
        let state = rx.wait_for(|s| s.get(&doomed).is_none()).await.unwrap().clone();
        assert_eq!(state.tasks.len(), 1);
        assert_eq!(state.tasks[0].id, keep);
        assert!(state.active_task_id.is_none());
        // still stored remotely while the delete is held
        assert_eq!(dojo.backend.stored_tasks().len(), 2);
        dojo.backend.release(Operation::DeleteTask);
    });

    deleted.unwrap();
    assert_eq!(dojo.backend.stored_tasks().len(), 1);
}

#[rstest]
#[tokio::test]
async fn set_active_accepts_only_open_katas(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let open = dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    let done = dojo.seed("k2", Priority::Low, TaskStatus::Completed, 30);
    dojo.tasks.fetch().await.unwrap();

    dojo.tasks.set_active(Some(&open)).unwrap();
    assert_eq!(dojo.tasks.active_task().unwrap().id, open);

    let err = dojo.tasks.set_active(Some(&done)).unwrap_err();
    assert_eq!(
        err,
        StoreError::TaskNotActivatable {
            id: done,
            status: TaskStatus::Completed
        }
    );
    let err = dojo.tasks.set_active(Some(&TaskId::new("ghost"))).unwrap_err();
    assert_eq!(err, StoreError::TaskNotFound(TaskId::new("ghost")));
    assert_eq!(dojo.tasks.active_task_id(), Some(open));

    dojo.tasks.set_active(None).unwrap();
    assert!(dojo.tasks.active_task_id().is_none());
}

#[rstest]
#[tokio::test]
async fn fetch_after_sign_out_clears_quietly(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();
    dojo.tasks.set_active(Some(&id)).unwrap();

    dojo.backend.clear_session();
    dojo.tasks.fetch().await.unwrap();
    let state = dojo.tasks.snapshot();
    assert!(state.tasks.is_empty());
    assert!(state.active_task_id.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_loading);
}

#[rstest]
#[tokio::test]
async fn fetch_orders_by_start_and_scopes_by_owner(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let stranger = dojo.backend.add_account("other@dojo.test", "pw", "other");
    let start = ten_am();
    for (id, owner, offset) in [("late", &dojo.user, 120), ("early", &dojo.user, 0), ("theirs", &stranger, 60)] {
        dojo.backend.seed_task(Task {
            id: TaskId::new(id),
            user_id: owner.clone(),
            title: id.to_string(),
            priority: Priority::Low,
            status: TaskStatus::Pending,
            start_time: start + Duration::minutes(offset),
            end_time: start + Duration::minutes(offset + 30),
            allocated_minutes: 30,
            created_at: start,
        });
    }

    dojo.tasks.fetch().await.unwrap();
    let ids: Vec<String> = dojo.tasks.tasks().iter().map(|t| t.id.to_string()).collect();
    assert_eq!(ids, ["early", "late"]);
}

#[rstest]
#[tokio::test]
async fn overlapping_mutations_on_one_kata_run_in_order(#[future] dojo: Harness) {
    let dojo = dojo.await;
    let id = dojo.seed("k1", Priority::Medium, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();
    dojo.backend.hold(Operation::UpdateTask);

    let rename = dojo.tasks.update(&id, TaskPatch::default().with_title("First"));
    let gong = dojo.tasks.complete(&id);
    let mut rx = dojo.tasks.subscribe();
    let (renamed, completed, ()) = tokio::join!(rename, gong, async {
        rx.wait_for(|s| s.get(&TaskId::new("k1")).is_some_and(|t| t.title == "First"))
            .await
            .unwrap();
        // the gong has not touched the row while the rename is in flight
        assert_eq!(dojo.tasks.get(&TaskId::new("k1")).unwrap().status, TaskStatus::Pending);
        dojo.backend.release(Operation::UpdateTask);
    });

    renamed.unwrap();
    assert!(completed.unwrap().is_some());
    let row = dojo.tasks.get(&id).unwrap();
    assert_eq!((row.title.as_str(), row.status), ("First", TaskStatus::Completed));
    assert_eq!(dojo.backend.stored_tasks()[0].status, TaskStatus::Completed);
}

#[rstest]
#[tokio::test]
async fn reset_returns_to_initial_state(#[future] dojo: Harness) {
    let dojo = dojo.await;
    dojo.seed("k1", Priority::Low, TaskStatus::Pending, 30);
    dojo.tasks.fetch().await.unwrap();
    assert_eq!(dojo.tasks.tasks().len(), 1);

    dojo.tasks.reset();
    assert_eq!(dojo.tasks.snapshot(), Default::default());
}
