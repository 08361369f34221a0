//! End-to-end worker scenarios on paused time.
//!
//! These drive a real worker (or the dispatcher in front of it) against the
//! recording transport and step tokio's clock through the batching, backoff
//! and correlation windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::delivery::{RenderedMessage, SummaryRenderer};
use crate::queue::{DedupKey, LogEvent, QueueConfig};
use crate::test_utils::{FixedResolver, RecordingTransport, Scripted, target};
use crate::types::{
    AUTO_CREATED_ROLE, DestinationKey, EventKind, EventPayload, GuildId, LogCategory, MemberInfo,
    MessageRef, RoleRef, UserRef,
};

use super::config::EngineConfig;
use super::dispatch::{Dispatcher, IngressOutcome};
use super::message::WorkerMessage;
use super::worker::{DestinationWorker, WorkerExit};

// ─── Test Helpers ───

struct Harness {
    tx: mpsc::Sender<WorkerMessage>,
    transport: Arc<RecordingTransport>,
    shutdown: CancellationToken,
    task: JoinHandle<WorkerExit>,
}

impl Harness {
    fn start(config: QueueConfig, script: &[Scripted]) -> Self {
        let transport = Arc::new(RecordingTransport::new());
        transport.script(script.iter().copied());
        let worker = DestinationWorker::new(
            target("hook-a"),
            config,
            Arc::new(SummaryRenderer),
            Arc::clone(&transport),
        );
        let (tx, rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(worker.run(rx, shutdown.clone()));
        Harness {
            tx,
            transport,
            shutdown,
            task,
        }
    }

    fn new() -> Self {
        Self::start(QueueConfig::default(), &[])
    }

    async fn send(&self, kind: EventKind, payload: EventPayload, key: Option<&str>) {
        let event = LogEvent::new(kind, payload, key.map(DedupKey::from), Instant::now());
        self.tx.send(WorkerMessage::Event(event)).await.unwrap();
    }

    async fn stop(self) -> (WorkerExit, Arc<RecordingTransport>) {
        self.shutdown.cancel();
        let exit = self.task.await.unwrap();
        (exit, self.transport)
    }
}

fn user(id: u64) -> EventPayload {
    EventPayload::for_user(UserRef::new(id, format!("user{id}")))
}

fn deleted(content: &str) -> EventPayload {
    EventPayload {
        message: Some(MessageRef {
            content: Some(content.to_string()),
            ..MessageRef::default()
        }),
        ..EventPayload::default()
    }
}

fn field<'a>(message: &'a RenderedMessage, name: &str) -> Option<&'a str> {
    message
        .embeds
        .iter()
        .flat_map(|e| e.fields.iter())
        .find(|f| f.name == name)
        .map(|f| f.value.as_str())
}

type TestDispatcher = Dispatcher<FixedResolver, SummaryRenderer, RecordingTransport>;

const GUILD: GuildId = GuildId(1);
const MODERATION: LogCategory = LogCategory::Moderation;

/// Guild 1 moderation routed to `hook-a`.
fn hook_a() -> FixedResolver {
    FixedResolver::new().with(GUILD, MODERATION, "hook-a")
}

fn dispatcher_with(
    resolver: &Arc<FixedResolver>,
    transport: &Arc<RecordingTransport>,
) -> TestDispatcher {
    Dispatcher::new(
        EngineConfig::new(),
        Arc::clone(resolver),
        Arc::new(SummaryRenderer),
        Arc::clone(transport),
    )
}

async fn submit(
    dispatcher: &TestDispatcher,
    kind: EventKind,
    payload: EventPayload,
) -> IngressOutcome {
    dispatcher
        .log_event(GUILD, MODERATION, kind, payload, None)
        .await
        .unwrap()
}

async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ─── Merging ───

#[tokio::test(start_paused = true)]
async fn dedup_key_delivers_once_with_merged_fields() {
    let h = Harness::new();
    h.send(EventKind::MemberKick, user(7), Some("kick:1:7")).await;
    h.send(
        EventKind::MemberKick,
        user(7).with_moderator(UserRef::new(99u64, "mod")),
        Some("kick:1:7"),
    )
    .await;
    settle(3).await;

    let delivered = h.transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(field(&delivered[0], "moderator"), Some("mod (99)"));
}

#[tokio::test(start_paused = true)]
async fn message_deletes_render_one_summary() {
    let h = Harness::new();
    for i in 0..5 {
        h.send(EventKind::MessageDelete, deleted(&format!("spam {i}")), None)
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    settle(5).await;

    assert_eq!(h.transport.attempts(), 1);
    assert_eq!(
        h.transport.delivered_titles(),
        vec!["5 \u{d7} messageDelete".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_delete_key_delivers_once() {
    let h = Harness::new();
    let key = Some("messageDelete:42");
    h.send(EventKind::MessageDelete, deleted("spam"), key).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.send(EventKind::MessageDelete, deleted("spam"), key).await;
    settle(5).await;

    assert_eq!(h.transport.delivered_titles(), vec!["messageDelete"]);
}

#[tokio::test(start_paused = true)]
async fn bot_role_folds_into_bot_join() {
    let h = Harness::new();
    h.send(
        EventKind::MemberJoin,
        EventPayload::for_user(UserRef::bot(50u64, "HelperBot")),
        None,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.send(
        EventKind::RoleCreate,
        EventPayload::default().with_role(RoleRef::named("HelperBot")),
        None,
    )
    .await;
    settle(3).await;

    let delivered = h.transport.delivered();
    assert_eq!(
        h.transport.delivered_titles(),
        vec!["memberJoin".to_string()]
    );
    let annotations = delivered[0]
        .embeds
        .iter()
        .flat_map(|e| e.fields.iter())
        .filter(|f| f.name == AUTO_CREATED_ROLE)
        .count();
    assert_eq!(annotations, 1);
}

#[tokio::test(start_paused = true)]
async fn ban_after_leave_carries_join_date() {
    let joined = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
    let h = Harness::new();
    h.send(
        EventKind::MemberLeave,
        EventPayload {
            member: Some(MemberInfo {
                joined_at: Some(joined),
                nickname: None,
            }),
            ..user(7)
        },
        None,
    )
    .await;
    settle(2).await;
    h.send(EventKind::MemberBan, user(7).with_reason("raid"), None)
        .await;
    settle(5).await;

    let delivered = h.transport.delivered();
    assert_eq!(
        h.transport.delivered_titles(),
        vec!["memberBan".to_string()]
    );
    assert_eq!(field(&delivered[0], "joined"), Some("2021-03-04"));
    assert_eq!(field(&delivered[0], "reason"), Some("raid"));
}

#[tokio::test(start_paused = true)]
async fn leave_after_delivered_ban_is_absorbed() {
    let h = Harness::new();
    h.send(EventKind::MemberBan, user(7), None).await;
    settle(2).await;
    assert_eq!(h.transport.attempts(), 1);

    h.send(EventKind::MemberLeave, user(7), None).await;
    settle(6).await;

    assert_eq!(
        h.transport.delivered_titles(),
        vec!["memberBan".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn leave_is_held_for_the_correlation_window() {
    let h = Harness::new();
    let start = Instant::now();
    h.send(EventKind::MemberLeave, user(7), None).await;
    settle(5).await;

    let log = h.transport.attempt_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].at - start >= Duration::from_secs(3));
}

// ─── Ordering and chunking ───

#[tokio::test(start_paused = true)]
async fn high_priority_drains_first() {
    let h = Harness::new();
    for _ in 0..3 {
        h.send(EventKind::InviteCreate, EventPayload::default(), None)
            .await;
    }
    h.send(EventKind::MemberBan, user(7), None).await;
    settle(3).await;

    assert_eq!(
        h.transport.delivered_titles(),
        vec!["memberBan", "inviteCreate", "inviteCreate", "inviteCreate"]
    );
}

#[tokio::test(start_paused = true)]
async fn large_backlog_drains_in_chunks() {
    let h = Harness::new();
    let start = Instant::now();
    for _ in 0..15 {
        h.send(EventKind::InviteCreate, EventPayload::default(), None)
            .await;
    }
    settle(10).await;

    let log = h.transport.attempt_log();
    assert_eq!(log.len(), 15);
    let first_drain = log[0].at;
    assert_eq!(first_drain - start, Duration::from_millis(1650));
    assert!(log[..10].iter().all(|a| a.at == first_drain));
    assert!(log[10..].iter().all(|a| a.at > first_drain));
}

#[tokio::test(start_paused = true)]
async fn overflow_evicts_low_priority_first() {
    let config = QueueConfig {
        max_pending: 2,
        ..QueueConfig::default()
    };
    let h = Harness::start(config, &[]);
    h.send(EventKind::MemberBan, user(7), None).await;
    for _ in 0..3 {
        h.send(EventKind::InviteCreate, EventPayload::default(), None)
            .await;
    }
    settle(3).await;

    assert_eq!(
        h.transport.delivered_titles(),
        vec!["memberBan", "inviteCreate"]
    );
}

// ─── Backoff ───

#[tokio::test(start_paused = true)]
async fn rate_limits_back_off_exponentially() {
    let h = Harness::start(
        QueueConfig::default(),
        &[
            Scripted::RateLimited(Duration::from_secs(1)),
            Scripted::RateLimited(Duration::from_secs(1)),
        ],
    );
    h.send(EventKind::MemberKick, user(7), None).await;
    settle(10).await;

    let log = h.transport.attempt_log();
    assert_eq!(log.len(), 3);
    let first_gap = log[1].at - log[0].at;
    let second_gap = log[2].at - log[1].at;
    assert!(first_gap >= Duration::from_secs(1));
    assert!(second_gap >= first_gap * 2);
    assert_eq!(h.transport.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let h = Harness::start(
        QueueConfig::default(),
        &[
            Scripted::RateLimited(Duration::from_secs(40)),
            Scripted::RateLimited(Duration::from_secs(40)),
        ],
    );
    h.send(EventKind::MemberKick, user(7), None).await;
    settle(200).await;

    let log = h.transport.attempt_log();
    assert_eq!(log.len(), 3);
    assert_eq!(log[1].at - log[0].at, Duration::from_secs(40));
    assert_eq!(log[2].at - log[1].at, Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_entries_keep_their_place() {
    let h = Harness::start(
        QueueConfig::default(),
        &[Scripted::RateLimited(Duration::from_secs(2))],
    );
    h.send(EventKind::InviteCreate, EventPayload::default(), None)
        .await;
    settle(2).await;
    h.send(EventKind::RoleUpdate, EventPayload::default(), None)
        .await;
    settle(10).await;

    assert_eq!(
        h.transport.delivered_titles(),
        vec!["inviteCreate", "roleUpdate"]
    );
}

#[tokio::test(start_paused = true)]
async fn other_errors_drop_the_notification() {
    let h = Harness::start(QueueConfig::default(), &[Scripted::Other]);
    h.send(EventKind::MemberKick, user(7), None).await;
    h.send(EventKind::MemberBan, user(8), None).await;
    settle(20).await;

    assert_eq!(h.transport.attempts(), 2);
    assert_eq!(h.transport.delivered().len(), 1);
}

// ─── Teardown ───

#[tokio::test(start_paused = true)]
async fn invalid_destination_stops_the_worker() {
    let h = Harness::start(QueueConfig::default(), &[Scripted::Invalid]);
    h.send(EventKind::MemberKick, user(7), None).await;
    h.send(EventKind::MemberKick, user(8), None).await;

    let exit = tokio::time::timeout(Duration::from_secs(5), h.task)
        .await
        .expect("worker should exit")
        .unwrap();
    assert_eq!(exit, WorkerExit::Invalidated);
    assert_eq!(h.transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidation_forgets_route_until_reconfigured() {
    let resolver = Arc::new(hook_a());
    let transport = Arc::new(RecordingTransport::new());
    transport.script([Scripted::Invalid]);
    let dispatcher = dispatcher_with(&resolver, &transport);

    submit(&dispatcher, EventKind::MemberKick, user(7)).await;
    settle(3).await;

    let old_key = DestinationKey::new(GUILD, MODERATION, "hook-a");
    assert_eq!(resolver.invalidated(), vec![old_key]);
    assert_eq!(dispatcher.worker_count().await, 0);

    // The resolver forgot the destination: later events go nowhere.
    let outcome = submit(&dispatcher, EventKind::MemberKick, user(8)).await;
    assert_eq!(outcome, IngressOutcome::Disabled);
    settle(3).await;
    assert_eq!(transport.attempts(), 1);

    // A fresh destination gets a fresh worker.
    resolver.set(GUILD, MODERATION, "hook-b");
    let outcome = submit(&dispatcher, EventKind::MemberKick, user(9)).await;
    assert_eq!(
        outcome,
        IngressOutcome::Routed(DestinationKey::new(GUILD, MODERATION, "hook-b"))
    );
    settle(3).await;
    let log = transport.attempt_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].url, "https://hooks.test/hook-b");
}

// ─── Ban suppression ───

#[tokio::test(start_paused = true)]
async fn duplicate_ban_paths_deliver_once() {
    let transport = Arc::new(RecordingTransport::new());
    let dispatcher = dispatcher_with(&Arc::new(hook_a()), &transport);

    submit(&dispatcher, EventKind::MemberBan, user(7)).await;
    tokio::time::sleep(Duration::from_secs(4)).await;
    let moderated = user(7).with_moderator(UserRef::new(99u64, "mod"));
    let second = submit(&dispatcher, EventKind::MemberBan, moderated).await;
    settle(5).await;

    assert_eq!(second, IngressOutcome::Suppressed);
    assert_eq!(transport.delivered_titles(), vec!["memberBan".to_string()]);
}

// ─── Shutdown ───

#[tokio::test(start_paused = true)]
async fn shutdown_drains_everything_including_held_entries() {
    let h = Harness::new();
    h.send(EventKind::MemberLeave, user(7), None).await;
    h.send(EventKind::InviteCreate, EventPayload::default(), None)
        .await;

    let (exit, transport) = h.stop().await;

    assert_eq!(exit, WorkerExit::Shutdown);
    assert_eq!(transport.delivered().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drain_stops_at_rate_limit() {
    let h = Harness::start(
        QueueConfig::default(),
        &[Scripted::RateLimited(Duration::from_secs(1))],
    );
    h.send(EventKind::MemberKick, user(7), None).await;
    h.send(EventKind::MemberKick, user(8), None).await;

    let (exit, transport) = h.stop().await;

    assert_eq!(exit, WorkerExit::Shutdown);
    assert_eq!(transport.attempts(), 1);
    assert!(transport.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_drain_reports_invalid_destination() {
    let h = Harness::start(QueueConfig::default(), &[Scripted::Invalid]);
    h.send(EventKind::MemberKick, user(7), None).await;
    h.send(EventKind::MemberKick, user(8), None).await;

    let (exit, transport) = h.stop().await;

    assert_eq!(exit, WorkerExit::Invalidated);
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_destination_found_at_shutdown_is_reported_to_resolver() {
    let resolver = Arc::new(hook_a());
    let transport = Arc::new(RecordingTransport::new());
    transport.script([Scripted::Invalid]);
    let dispatcher = dispatcher_with(&resolver, &transport);

    submit(&dispatcher, EventKind::MemberKick, user(7)).await;
    dispatcher.shutdown_all().await;

    let key = DestinationKey::new(GUILD, MODERATION, "hook-a");
    assert_eq!(resolver.invalidated(), vec![key]);
}

#[tokio::test(start_paused = true)]
async fn closing_the_channel_stops_the_worker() {
    let h = Harness::new();
    h.send(EventKind::MemberKick, user(7), None).await;
    drop(h.tx);

    let exit = h.task.await.unwrap();
    assert_eq!(exit, WorkerExit::ChannelClosed);
    assert_eq!(h.transport.delivered().len(), 1);
}
